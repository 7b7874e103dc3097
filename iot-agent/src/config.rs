use std::net::SocketAddr;

use envconfig::Envconfig;
use tracing::Level;

use crate::facades::FacadeKind;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "false")]
    pub print_sender: bool,

    #[envconfig(default = "0.0.0.0:8080")]
    pub address: SocketAddr,

    /// Network server whose uplink envelopes we receive
    #[envconfig(default = "chirpstack")]
    pub app_server_facade: FacadeKind,

    /// Where MQTT messages are forwarded to, usually our own messages endpoint
    #[envconfig(default = "http://127.0.0.1:8080/api/v0/messages")]
    pub forwarding_endpoint: String,

    #[envconfig(nested = true)]
    pub mqtt: MqttConfig,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "iot-agent")]
    pub otel_service_name: String,

    #[envconfig(default = "false")]
    pub export_prometheus: bool,

    #[envconfig(default = "info")]
    pub log_level: Level,

    #[envconfig(default = "5000")]
    pub sender_start_retry_ms: u64, // Delay between two attempts to connect the event sender
}

#[derive(Envconfig, Clone)]
pub struct MqttConfig {
    #[envconfig(default = "true")]
    pub mqtt_enabled: bool,
    #[envconfig(default = "localhost")]
    pub mqtt_host: String,
    #[envconfig(default = "1883")]
    pub mqtt_port: u16,
    #[envconfig(default = "application/#")]
    pub mqtt_topic: String,
    pub mqtt_user: Option<String>,
    pub mqtt_password: Option<String>,
    #[envconfig(default = "iot-agent")]
    pub mqtt_client_id: String,
    #[envconfig(default = "5000")]
    pub mqtt_retry_delay_ms: u64, // Wait before reconnecting after a connection error
    #[envconfig(default = "30")]
    pub mqtt_keep_alive_secs: u64,
    #[envconfig(default = "10000")]
    pub forward_timeout_ms: u64, // Timeout of one forwarding request
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic
    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes
    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds
    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,
    #[envconfig(default = "iot-core")]
    pub kafka_command_queue: String,
    #[envconfig(default = "false")]
    pub kafka_tls: bool,
    #[envconfig(default = "")]
    pub kafka_client_id: String,
    #[envconfig(default = "10000")]
    pub kafka_metadata_timeout_ms: u64, // Time to wait for the brokers when connecting
}
