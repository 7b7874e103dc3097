use std::time::Duration;

use async_trait::async_trait;
use health::{ComponentStatus, HealthHandle};
use rumqttc::{
    AsyncClient, ClientError, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet,
    Publish, QoS,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::MqttConfig;
use crate::mqtt::forwarder::{Acknowledge, InboundMessage, MessageHandler};

const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum SubscriberError {
    #[error("mqtt client error: {0}")]
    Client(#[from] ClientError),
    #[error("mqtt connection error: {0}")]
    Connection(#[from] ConnectionError),
}

struct PublishAck {
    client: AsyncClient,
    publish: Publish,
}

#[async_trait]
impl Acknowledge for PublishAck {
    async fn ack(self: Box<Self>) {
        if let Err(err) = self.client.ack(&self.publish).await {
            warn!("failed to acknowledge message on {}: {}", self.publish.topic, err);
        }
    }
}

fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.mqtt_client_id, &config.mqtt_host, config.mqtt_port);
    options
        .set_keep_alive(Duration::from_secs(config.mqtt_keep_alive_secs))
        .set_clean_session(true)
        .set_manual_acks(true);

    if let (Some(user), Some(password)) = (&config.mqtt_user, &config.mqtt_password) {
        options.set_credentials(user, password);
    }
    options
}

/// Subscribes to the configured topic and hands every message to the handler,
/// reconnecting after a delay when the connection fails. Returns once
/// `shutdown` is cancelled.
#[instrument(name = "mqtt_subscriber", skip_all, fields(host = %config.mqtt_host, topic = %config.mqtt_topic))]
pub async fn run_subscriber(
    config: MqttConfig,
    handler: MessageHandler,
    readiness: HealthHandle,
    shutdown: CancellationToken,
) {
    let retry_delay = Duration::from_millis(config.mqtt_retry_delay_ms);

    while !shutdown.is_cancelled() {
        match run_connection(&config, &handler, &readiness, &shutdown).await {
            Ok(()) => break,
            Err(err) => {
                readiness.report_status(ComponentStatus::Unhealthy);
                error!("{}, reconnecting in {:?}", err, retry_delay);

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(retry_delay) => {}
                }
            }
        }
    }

    info!("mqtt subscriber stopped");
}

async fn run_connection(
    config: &MqttConfig,
    handler: &MessageHandler,
    readiness: &HealthHandle,
    shutdown: &CancellationToken,
) -> Result<(), SubscriberError> {
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(config), 100);
    client.subscribe(&config.mqtt_topic, QoS::AtLeastOnce).await?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("shutdown signal received, disconnecting");
                match client.disconnect().await {
                    Ok(()) => {
                        let flushed = flush_disconnect(&mut eventloop);
                        if tokio::time::timeout(DISCONNECT_TIMEOUT, flushed).await.is_err() {
                            warn!("timed out sending DISCONNECT to the MQTT broker");
                        }
                    }
                    Err(err) => warn!("failed to disconnect cleanly: {}", err),
                }
                return Ok(());
            }
            event = eventloop.poll() => match event? {
                Event::Incoming(Packet::Publish(publish)) => {
                    let message = InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.clone(),
                    };
                    let ack = PublishAck { client: client.clone(), publish };
                    // Detached: the event loop never waits for the forwarding
                    drop(handler.handle(message, Box::new(ack)));
                }
                Event::Incoming(Packet::ConnAck(_)) => {
                    info!("connected to MQTT broker");
                    readiness.report_healthy();
                }
                Event::Incoming(Packet::SubAck(_)) => {
                    info!("subscribed to {}", config.mqtt_topic);
                }
                _ => {}
            }
        }
    }
}

/// `disconnect` only queues the request, the event loop has to write it.
async fn flush_disconnect(eventloop: &mut EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("disconnected from MQTT broker");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                debug!("mqtt event loop closed while disconnecting: {}", err);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use health::HealthRegistry;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    use super::*;

    const CONNECT: u8 = 1;
    const SUBSCRIBE: u8 = 8;
    const DISCONNECT: u8 = 14;

    /// Reads one MQTT control packet, returning its type and variable part.
    async fn read_packet(socket: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
        let header = socket.read_u8().await.ok()?;
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = socket.read_u8().await.ok()?;
            len |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        _ = socket.read_exact(&mut body).await.ok()?;
        Some((header >> 4, body))
    }

    /// Accepts a single client, acknowledges its subscription and reports
    /// whether it sent DISCONNECT before closing the connection.
    async fn fake_broker(listener: TcpListener, subscribed: oneshot::Sender<()>) -> bool {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut subscribed = Some(subscribed);

        while let Some((kind, body)) = read_packet(&mut socket).await {
            match kind {
                CONNECT => socket.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap(),
                SUBSCRIBE => {
                    let suback = [0x90, 0x03, body[0], body[1], 0x01];
                    socket.write_all(&suback).await.unwrap();
                    if let Some(subscribed) = subscribed.take() {
                        _ = subscribed.send(());
                    }
                }
                DISCONNECT => return true,
                _ => {}
            }
        }
        false
    }

    fn config(port: u16) -> MqttConfig {
        MqttConfig {
            mqtt_enabled: true,
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: port,
            mqtt_topic: "application/#".to_string(),
            mqtt_user: None,
            mqtt_password: None,
            mqtt_client_id: "iot-agent-test".to_string(),
            mqtt_retry_delay_ms: 100,
            mqtt_keep_alive_secs: 30,
            forward_timeout_ms: 1000,
        }
    }

    #[tokio::test]
    async fn sends_disconnect_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (subscribed_tx, subscribed_rx) = oneshot::channel();
        let broker = tokio::spawn(fake_broker(listener, subscribed_tx));

        let registry = HealthRegistry::new("readiness");
        let readiness = registry.register("mqtt", None);
        let handler =
            MessageHandler::new("http://127.0.0.1:9/".to_string(), Duration::from_secs(1)).unwrap();
        let shutdown = CancellationToken::new();
        let connection = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { run_connection(&config(port), &handler, &readiness, &shutdown).await }
        });

        subscribed_rx.await.expect("client never subscribed");
        assert!(registry.get_status().healthy);
        shutdown.cancel();

        connection
            .await
            .unwrap()
            .expect("connection should close cleanly");
        assert!(broker.await.unwrap(), "broker never received DISCONNECT");
    }
}
