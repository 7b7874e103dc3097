use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use reqwest::{header, StatusCode};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};

pub const MQTT_MESSAGES_TOTAL: &str = "iot_agent_mqtt_messages_total";
pub const FORWARD_FAILURES_TOTAL: &str = "iot_agent_forward_failures_total";

#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("forwarding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("forwarding endpoint answered with status {0}")]
    UnexpectedStatus(u16),
}

impl ForwardError {
    fn cause(&self) -> &'static str {
        match self {
            ForwardError::Request(err) if err.is_timeout() => "timeout",
            ForwardError::Request(_) => "request",
            ForwardError::UnexpectedStatus(_) => "status",
        }
    }
}

/// A message delivered by the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Acknowledges one inbound message to the broker.
#[async_trait]
pub trait Acknowledge: Send {
    async fn ack(self: Box<Self>);
}

/// Forwards MQTT messages to the HTTP ingress, one detached task per message.
///
/// Delivery is at most once: the message is acknowledged after the forwarding
/// attempt whatever its outcome, failures are only logged and counted.
#[derive(Clone)]
pub struct MessageHandler {
    client: reqwest::Client,
    endpoint: String,
}

impl MessageHandler {
    pub fn new(endpoint: String, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("iot-agent mqtt forwarder")
            .timeout(request_timeout)
            .build()?;

        Ok(Self { client, endpoint })
    }

    /// Returns immediately, the forwarding happens in the spawned task.
    pub fn handle(&self, message: InboundMessage, ack: Box<dyn Acknowledge>) -> JoinHandle<()> {
        let span = info_span!(
            parent: None,
            "forward_message",
            topic = %message.topic,
            payload_size = message.payload.len(),
        );
        let handler = self.clone();

        tokio::spawn(
            async move {
                counter!(MQTT_MESSAGES_TOTAL).increment(1);

                match handler.forward(message.payload).await {
                    Ok(()) => info!("forwarded message to {}", handler.endpoint),
                    Err(err) => {
                        counter!(FORWARD_FAILURES_TOTAL, "cause" => err.cause()).increment(1);
                        error!("failed to forward message to {}: {}", handler.endpoint, err);
                    }
                }

                ack.ack().await;
            }
            .instrument(span),
        )
    }

    async fn forward(&self, payload: Bytes) -> Result<(), ForwardError> {
        let response = self.client.post(&self.endpoint).body(payload).send().await?;

        match response.status() {
            StatusCode::CREATED => Ok(()),
            status => Err(ForwardError::UnexpectedStatus(status.as_u16())),
        }
    }
}
