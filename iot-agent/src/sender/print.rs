use async_trait::async_trait;
use metrics::counter;
use rdkafka::error::KafkaError;

use crate::messages::{CommandMessage, TopicMessage};
use crate::sender::{Connector, Transport};

/// Logs outbound messages instead of delivering them, for local development.
pub struct PrintConnector {}

#[async_trait]
impl Connector for PrintConnector {
    type Transport = PrintTransport;

    async fn connect(&self) -> Result<PrintTransport, KafkaError> {
        tracing::info!("using the print transport, messages will not be delivered");
        Ok(PrintTransport {})
    }
}

pub struct PrintTransport {}

#[async_trait]
impl Transport for PrintTransport {
    async fn send_to(&self, queue: &str, message: &CommandMessage) -> Result<(), KafkaError> {
        tracing::info!(
            "command to {}: {} {}",
            queue,
            message.content_type,
            String::from_utf8_lossy(&message.body)
        );
        counter!("iot_agent_printed_messages_total", "kind" => "command").increment(1);
        Ok(())
    }

    async fn publish_on_topic(&self, message: &TopicMessage) -> Result<(), KafkaError> {
        tracing::info!(
            "event on {}: {} {}",
            message.topic,
            message.content_type,
            String::from_utf8_lossy(&message.body)
        );
        counter!("iot_agent_printed_messages_total", "kind" => "event").increment(1);
        Ok(())
    }

    async fn close(&self) -> Result<(), KafkaError> {
        Ok(())
    }
}
