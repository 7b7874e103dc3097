use async_trait::async_trait;
use health::{ComponentStatus, HealthHandle};
#[cfg(test)]
use mockall::automock;
use rdkafka::error::KafkaError;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::messages::{CommandMessage, TopicMessage};

pub mod kafka;
pub mod print;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("sender has not been started")]
    NotStarted,
    #[error("sender has been stopped")]
    SenderClosed,
    #[error("failed to connect to the message broker: {0}")]
    ConnectionError(#[source] KafkaError),
    #[error("failed to deliver message: {0}")]
    Transport(#[source] KafkaError),
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outbound messaging towards the rest of the platform.
///
/// Commands are directed to the core service queue, events are published on
/// their own topic. Nothing can be sent before `start` succeeds, nor after
/// `stop`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSender: Send + Sync {
    async fn start(&self) -> Result<(), SenderError>;
    async fn send(&self, message: CommandMessage) -> Result<(), SenderError>;
    async fn publish(&self, message: TopicMessage) -> Result<(), SenderError>;
    async fn stop(&self) -> Result<(), SenderError>;
}

/// An open connection to a message broker.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_to(&self, queue: &str, message: &CommandMessage) -> Result<(), KafkaError>;
    async fn publish_on_topic(&self, message: &TopicMessage) -> Result<(), KafkaError>;
    async fn close(&self) -> Result<(), KafkaError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport;

    async fn connect(&self) -> Result<Self::Transport, KafkaError>;
}

enum SenderState<T> {
    NotStarted,
    Started(T),
    Stopped,
}

/// `EventSender` on top of a broker connection, guarding the connection
/// lifecycle. The readiness handle follows the connection state.
///
/// Connecting happens outside of the state lock: while a `start` is in
/// flight, sends fail right away with `NotStarted`.
pub struct MessagingSender<C: Connector> {
    connector: C,
    command_queue: String,
    state: RwLock<SenderState<C::Transport>>,
    connecting: Mutex<()>,
    readiness: HealthHandle,
}

impl<C: Connector> MessagingSender<C> {
    pub fn new(connector: C, command_queue: String, readiness: HealthHandle) -> Self {
        Self {
            connector,
            command_queue,
            state: RwLock::new(SenderState::NotStarted),
            connecting: Mutex::new(()),
            readiness,
        }
    }
}

#[async_trait]
impl<C: Connector> EventSender for MessagingSender<C> {
    async fn start(&self) -> Result<(), SenderError> {
        // Only one connection attempt at a time
        let _connecting = self.connecting.lock().await;
        match *self.state.read().await {
            SenderState::Started(_) => return Ok(()),
            SenderState::Stopped => return Err(SenderError::SenderClosed),
            SenderState::NotStarted => {}
        }

        let transport = self.connector.connect().await.map_err(|err| {
            warn!("failed to connect to the message broker: {}", err);
            SenderError::ConnectionError(err)
        })?;

        // Still NotStarted: only `start` leaves that state, under `connecting`
        *self.state.write().await = SenderState::Started(transport);
        self.readiness.report_healthy();
        info!("event sender started");
        Ok(())
    }

    #[instrument(skip_all, fields(queue = %self.command_queue))]
    async fn send(&self, message: CommandMessage) -> Result<(), SenderError> {
        match &*self.state.read().await {
            SenderState::Started(transport) => {
                debug!("sending {} command", message.content_type);
                transport
                    .send_to(&self.command_queue, &message)
                    .await
                    .map_err(SenderError::Transport)
            }
            SenderState::NotStarted => Err(SenderError::NotStarted),
            SenderState::Stopped => Err(SenderError::SenderClosed),
        }
    }

    #[instrument(skip_all, fields(topic = message.topic))]
    async fn publish(&self, message: TopicMessage) -> Result<(), SenderError> {
        match &*self.state.read().await {
            SenderState::Started(transport) => {
                debug!("publishing {} event", message.content_type);
                transport
                    .publish_on_topic(&message)
                    .await
                    .map_err(SenderError::Transport)
            }
            SenderState::NotStarted => Err(SenderError::NotStarted),
            SenderState::Stopped => Err(SenderError::SenderClosed),
        }
    }

    async fn stop(&self) -> Result<(), SenderError> {
        let mut state = self.state.write().await;
        match std::mem::replace(&mut *state, SenderState::Stopped) {
            SenderState::Started(transport) => {
                self.readiness.report_status(ComponentStatus::Unhealthy);
                info!("stopping event sender");
                transport.close().await.map_err(SenderError::Transport)
            }
            SenderState::Stopped => Ok(()),
            SenderState::NotStarted => {
                *state = SenderState::NotStarted;
                Err(SenderError::NotStarted)
            }
        }
    }
}
