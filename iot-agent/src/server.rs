use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use health::HealthRegistry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{App, IoTAgent};
use crate::config::Config;
use crate::decoders::DecoderRegistry;
use crate::mqtt::client::run_subscriber;
use crate::mqtt::forwarder::MessageHandler;
use crate::prometheus::setup_metrics_recorder;
use crate::router;
use crate::sender::kafka::KafkaConnector;
use crate::sender::print::PrintConnector;
use crate::sender::{EventSender, MessagingSender, SenderError};
use crate::time::SystemTime;
use crate::uplink::UplinkProcessor;

fn create_sender(config: &Config, readiness: &HealthRegistry) -> Arc<dyn EventSender> {
    let sender_readiness = readiness.register("event_sender", None);
    let command_queue = config.kafka.kafka_command_queue.clone();

    if config.print_sender {
        Arc::new(MessagingSender::new(
            PrintConnector {},
            command_queue,
            sender_readiness,
        ))
    } else {
        // rdkafka reports statistics every 10 seconds
        let rdkafka_liveness = readiness.register("rdkafka", Some(Duration::from_secs(30)));
        let connector = KafkaConnector::new(config.kafka.clone(), rdkafka_liveness);
        Arc::new(MessagingSender::new(
            connector,
            command_queue,
            sender_readiness,
        ))
    }
}

/// The sender does not retry on its own, keep starting it until it connects.
async fn start_sender(
    sender: Arc<dyn EventSender>,
    retry_delay: Duration,
    shutdown: CancellationToken,
) {
    loop {
        match sender.start().await {
            Ok(()) => return,
            Err(err) => warn!("{}, retrying in {:?}", err, retry_delay),
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }
}

/// Runs the agent until `shutdown` is cancelled.
pub async fn serve(
    config: Config,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let readiness = HealthRegistry::new("readiness");

    let sender = create_sender(&config, &readiness);
    let starter = tokio::spawn(start_sender(
        sender.clone(),
        Duration::from_millis(config.sender_start_retry_ms),
        shutdown.clone(),
    ));

    let facade = config.app_server_facade.build();
    let registry = Arc::new(DecoderRegistry::default());
    info!(
        "decoding {} uplinks for profiles {:?}",
        facade.name(),
        registry.profiles().collect::<Vec<_>>()
    );
    let processor = UplinkProcessor::new(facade, registry, Arc::new(SystemTime {}));
    let app: Arc<dyn App> = Arc::new(IoTAgent::new(processor, sender.clone(), shutdown.clone()));

    let subscriber = if config.mqtt.mqtt_enabled {
        let handler = MessageHandler::new(
            config.forwarding_endpoint.clone(),
            Duration::from_millis(config.mqtt.forward_timeout_ms),
        )
        .context("failed to create the forwarding client")?;
        Some(tokio::spawn(run_subscriber(
            config.mqtt.clone(),
            handler,
            readiness.register("mqtt", None),
            shutdown.clone(),
        )))
    } else {
        None
    };

    // Don't install metrics unless asked to, the recorder is global
    let metrics = match config.export_prometheus {
        true => Some(setup_metrics_recorder().context("failed to install metrics recorder")?),
        false => None,
    };

    let app = router::router(SystemTime {}, readiness, app, sender.clone(), metrics);

    info!("listening on {:?}", listener.local_addr()?);
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await
        .context("http server failed")?;

    // The server only returns on errors or after a shutdown signal
    shutdown.cancel();
    if let Some(subscriber) = subscriber {
        if let Err(err) = subscriber.await {
            warn!("mqtt subscriber task failed: {}", err);
        }
    }
    if let Err(err) = starter.await {
        warn!("sender start task failed: {}", err);
    }

    match sender.stop().await {
        Ok(()) | Err(SenderError::NotStarted) => {}
        Err(err) => warn!("failed to stop event sender: {}", err),
    }
    info!("iot-agent stopped");
    Ok(())
}
