use std::time::Duration;

use async_trait::async_trait;
use health::HealthHandle;
use metrics::{counter, gauge};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::messages::{CommandMessage, TopicMessage};
use crate::sender::{Connector, Transport};

pub struct KafkaContext {
    liveness: HealthHandle,
}

impl rdkafka::ClientContext for KafkaContext {
    fn stats(&self, stats: rdkafka::Statistics) {
        // Signal liveness, as the main rdkafka loop is running and calling us
        self.liveness.report_healthy();

        gauge!("iot_agent_kafka_callback_queue_depth").set(stats.replyq as f64);
        gauge!("iot_agent_kafka_producer_queue_depth").set(stats.msg_cnt as f64);
        gauge!("iot_agent_kafka_producer_queue_depth_limit").set(stats.msg_max as f64);

        for (_, stats) in stats.brokers {
            let id_string = format!("{}", stats.nodeid);
            gauge!(
                "iot_agent_kafka_broker_requests_pending",
                "broker" => id_string.clone()
            )
            .set(stats.outbuf_cnt as f64);
            counter!(
                "iot_agent_kafka_broker_tx_errors_total",
                "broker" => id_string
            )
            .absolute(stats.txerrs);
        }
    }
}

/// Connects to the Kafka brokers. Queues and topics are both Kafka topics.
pub struct KafkaConnector {
    config: KafkaConfig,
    liveness: HealthHandle,
}

impl KafkaConnector {
    pub fn new(config: KafkaConfig, liveness: HealthHandle) -> Self {
        Self { config, liveness }
    }

    fn client_config(&self) -> ClientConfig {
        let config = &self.config;
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("statistics.interval.ms", "10000")
            .set("linger.ms", config.kafka_producer_linger_ms.to_string())
            .set(
                "message.timeout.ms",
                config.kafka_message_timeout_ms.to_string(),
            )
            .set("compression.codec", &config.kafka_compression_codec)
            .set(
                "queue.buffering.max.kbytes",
                (config.kafka_producer_queue_mib * 1024).to_string(),
            );

        if !config.kafka_client_id.is_empty() {
            client_config.set("client.id", &config.kafka_client_id);
        }

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        };
        client_config
    }
}

#[async_trait]
impl Connector for KafkaConnector {
    type Transport = KafkaTransport;

    async fn connect(&self) -> Result<KafkaTransport, KafkaError> {
        info!("connecting to Kafka brokers at {}...", self.config.kafka_hosts);

        let client_config = self.client_config();
        debug!("rdkafka configuration: {:?}", client_config);
        let context = KafkaContext {
            liveness: self.liveness.clone(),
        };
        let queue = self.config.kafka_command_queue.clone();
        let metadata_timeout =
            Timeout::After(Duration::from_millis(self.config.kafka_metadata_timeout_ms));

        // Fetching metadata blocks the calling thread until the brokers answer
        let producer = tokio::task::spawn_blocking(move || {
            let producer: FutureProducer<KafkaContext> =
                client_config.create_with_context(context)?;

            // Ping the cluster to make sure we can reach brokers
            drop(producer.client().fetch_metadata(Some(&queue), metadata_timeout)?);
            Ok::<_, KafkaError>(producer)
        })
        .await
        .map_err(|err| {
            error!("kafka connection task failed: {}", err);
            KafkaError::Canceled
        })??;
        info!("connected to Kafka brokers");

        Ok(KafkaTransport {
            producer,
            produce_timeout: Duration::from_millis(u64::from(self.config.kafka_message_timeout_ms)),
        })
    }
}

pub struct KafkaTransport {
    producer: FutureProducer<KafkaContext>,
    produce_timeout: Duration,
}

impl KafkaTransport {
    async fn produce(
        &self,
        topic: &str,
        key: Option<&str>,
        content_type: &str,
        body: &[u8],
    ) -> Result<(), KafkaError> {
        let headers = OwnedHeaders::new().insert(Header {
            key: "content-type",
            value: Some(content_type),
        });
        let record = FutureRecord {
            topic,
            payload: Some(body),
            partition: None,
            key,
            timestamp: None,
            headers: Some(headers),
        };

        match self.producer.send(record, self.produce_timeout).await {
            Ok(_) => {
                counter!("iot_agent_kafka_produced_total", "topic" => topic.to_owned())
                    .increment(1);
                Ok(())
            }
            Err((err, _)) => {
                counter!("iot_agent_kafka_produce_errors_total").increment(1);
                error!("failed to produce to {}: {}", topic, err);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Transport for KafkaTransport {
    async fn send_to(&self, queue: &str, message: &CommandMessage) -> Result<(), KafkaError> {
        self.produce(
            queue,
            message.key.as_deref(),
            message.content_type,
            &message.body,
        )
        .await
    }

    async fn publish_on_topic(&self, message: &TopicMessage) -> Result<(), KafkaError> {
        self.produce(
            message.topic,
            message.key.as_deref(),
            message.content_type,
            &message.body,
        )
        .await
    }

    async fn close(&self) -> Result<(), KafkaError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(Duration::new(30, 0))))
            .await
            .map_err(|err| {
                error!("kafka flush task failed: {}", err);
                KafkaError::Canceled
            })?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use health::HealthRegistry;
    use rdkafka::mocking::MockCluster;
    use rdkafka::producer::DefaultProducerContext;
    use rdkafka::types::{RDKafkaApiKey, RDKafkaRespErr};

    use super::*;
    use crate::sender::{EventSender, MessagingSender, SenderError};

    fn config(hosts: String) -> KafkaConfig {
        KafkaConfig {
            kafka_producer_linger_ms: 0,
            kafka_producer_queue_mib: 50,
            kafka_message_timeout_ms: 500,
            kafka_compression_codec: "none".to_string(),
            kafka_hosts: hosts,
            kafka_command_queue: "iot-core".to_string(),
            kafka_tls: false,
            kafka_client_id: "".to_string(),
            kafka_metadata_timeout_ms: 1000,
        }
    }

    fn command() -> CommandMessage {
        CommandMessage {
            content_type: "application/json",
            key: Some("a81758fffe051d02".to_string()),
            body: br#"{"deviceID":"a81758fffe051d02"}"#.to_vec(),
        }
    }

    async fn start_on_mocked_sender() -> (
        MockCluster<'static, DefaultProducerContext>,
        MessagingSender<KafkaConnector>,
    ) {
        let registry = HealthRegistry::new("liveness");
        let cluster = MockCluster::new(1).expect("failed to create mock brokers");
        let connector = KafkaConnector::new(
            config(cluster.bootstrap_servers()),
            registry.register("rdkafka", Some(Duration::from_secs(30))),
        );
        let sender = MessagingSender::new(
            connector,
            "iot-core".to_string(),
            registry.register("sender", None),
        );
        sender.start().await.expect("failed to start sender");
        (cluster, sender)
    }

    #[tokio::test]
    async fn kafka_sender_error_handling() {
        // Single test to amortize the startup cost of the producer
        let (cluster, sender) = start_on_mocked_sender().await;

        // Wait for producer to be healthy, to keep kafka_message_timeout_ms short and tests faster
        for _ in 0..20 {
            if sender.send(command()).await.is_ok() {
                break;
            }
        }

        sender
            .send(command())
            .await
            .expect("failed to send initial command");
        sender
            .publish(TopicMessage {
                topic: "device-status",
                content_type: "application/json",
                key: None,
                body: b"{}".to_vec(),
            })
            .await
            .expect("failed to publish initial event");

        // Transient errors are retried by the producer
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_BROKER_NOT_AVAILABLE; 2];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        sender
            .send(command())
            .await
            .expect("failed to send command after recovery");

        // Timeout on a sustained transient error
        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        let err = [RDKafkaRespErr::RD_KAFKA_RESP_ERR_BROKER_NOT_AVAILABLE; 50];
        cluster.request_errors(RDKafkaApiKey::Produce, &err);
        match sender.send(command()).await {
            Err(SenderError::Transport(_)) => {} // Expected
            Err(err) => panic!("wrong error code {}", err),
            Ok(()) => panic!("should have errored"),
        };

        cluster.clear_request_errors(RDKafkaApiKey::Produce);
        sender.stop().await.expect("failed to stop sender");
        assert!(matches!(
            sender.send(command()).await,
            Err(SenderError::SenderClosed)
        ));
    }

    #[tokio::test]
    async fn unreachable_brokers_fail_to_start() {
        let registry = HealthRegistry::new("liveness");
        let mut config = config("127.0.0.1:1".to_string());
        config.kafka_metadata_timeout_ms = 200;
        let sender = MessagingSender::new(
            KafkaConnector::new(config, registry.register("rdkafka", None)),
            "iot-core".to_string(),
            registry.register("sender", None),
        );

        match sender.start().await {
            Err(SenderError::ConnectionError(_)) => {} // Expected
            Err(err) => panic!("wrong error code {}", err),
            Ok(()) => panic!("should have errored"),
        };
        assert!(matches!(
            sender.send(command()).await,
            Err(SenderError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn sends_fail_fast_while_brokers_are_unreachable() {
        let registry = HealthRegistry::new("liveness");
        let mut config = config("127.0.0.1:1".to_string());
        config.kafka_metadata_timeout_ms = 2000;
        let sender = Arc::new(MessagingSender::new(
            KafkaConnector::new(config, registry.register("rdkafka", None)),
            "iot-core".to_string(),
            registry.register("sender", None),
        ));

        let starting = tokio::spawn({
            let sender = sender.clone();
            async move { sender.start().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let sent = tokio::time::timeout(Duration::from_millis(200), sender.send(command()))
            .await
            .expect("send blocked on the metadata request");
        assert!(matches!(sent, Err(SenderError::NotStarted)));
        assert!(matches!(
            starting.await.unwrap(),
            Err(SenderError::ConnectionError(_))
        ));
    }
}
