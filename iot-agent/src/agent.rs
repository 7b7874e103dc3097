use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::AgentError;
use crate::decoders::Payload;
use crate::facades::UplinkEvent;
use crate::messages::{CommandMessage, DeviceStatus, MessageReceived, TopicMessage};
use crate::prometheus::{report_message_failed, report_message_sent, report_uplink};
use crate::sender::EventSender;
use crate::uplink::{PayloadPublisher, UplinkProcessor};

/// Entry point for uplink envelopes, whichever way they reached the agent.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait App: Send + Sync {
    async fn message_received(&self, envelope: Bytes) -> Result<(), AgentError>;
}

pub struct IoTAgent {
    processor: UplinkProcessor,
    publisher: OutboundPublisher,
    cancel: CancellationToken,
}

impl IoTAgent {
    pub fn new(
        processor: UplinkProcessor,
        sender: Arc<dyn EventSender>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            processor,
            publisher: OutboundPublisher { sender },
            cancel,
        }
    }
}

#[async_trait]
impl App for IoTAgent {
    async fn message_received(&self, envelope: Bytes) -> Result<(), AgentError> {
        let result = self
            .processor
            .process(&self.cancel, &envelope, &self.publisher)
            .await;

        match &result {
            Ok(()) => report_uplink("published"),
            Err(err) => {
                report_uplink(err.cause());
                warn!("failed to handle uplink: {}", err);
            }
        }
        result
    }
}

/// Sends every decoded payload to the core service, then publishes the
/// device status.
///
/// Once the measurements are accepted the uplink counts as delivered: a
/// failed device status is logged and counted, never returned.
struct OutboundPublisher {
    sender: Arc<dyn EventSender>,
}

impl OutboundPublisher {
    async fn publish_status(&self, event: &UplinkEvent, payload: &Payload) -> Result<(), AgentError> {
        let status = DeviceStatus::from_uplink(event, payload);
        self.sender
            .publish(TopicMessage::from_message(&status)?)
            .await?;
        report_message_sent("device_status");
        Ok(())
    }
}

#[async_trait]
impl PayloadPublisher for OutboundPublisher {
    async fn publish(&self, event: &UplinkEvent, payload: Payload) -> Result<(), AgentError> {
        let received = MessageReceived::from_payload(&payload);
        self.sender
            .send(CommandMessage::from_message(&received)?)
            .await?;
        report_message_sent("message_received");
        info!(
            "sent {} measurements from {}",
            received.pack.len(),
            received.device_id
        );

        if let Err(err) = self.publish_status(event, &payload).await {
            report_message_failed("device_status", err.cause());
            warn!(
                "failed to publish device status of {}: {}",
                received.device_id, err
            );
        }
        Ok(())
    }
}
