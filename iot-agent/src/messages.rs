use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::api::AgentError;
use crate::decoders::Payload;
use crate::facades::UplinkEvent;
use crate::senml::{self, Pack};
use crate::sender::SenderError;

/// A message type that can leave the agent.
pub trait Message: Serialize {
    fn content_type(&self) -> &'static str;

    /// Partitioning key, so that messages about one device stay ordered.
    fn key(&self) -> Option<&str> {
        None
    }
}

/// A message published on a named topic.
pub trait Topic: Message {
    fn topic_name(&self) -> &'static str;
}

/// A serialized command, directed to a single named queue.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    pub content_type: &'static str,
    pub key: Option<String>,
    pub body: Vec<u8>,
}

impl CommandMessage {
    pub fn from_message<M: Message>(message: &M) -> Result<Self, SenderError> {
        Ok(CommandMessage {
            content_type: message.content_type(),
            key: message.key().map(str::to_owned),
            body: serde_json::to_vec(message)?,
        })
    }
}

/// A serialized event, published to every subscriber of its topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMessage {
    pub topic: &'static str,
    pub content_type: &'static str,
    pub key: Option<String>,
    pub body: Vec<u8>,
}

impl TopicMessage {
    pub fn from_message<M: Topic>(message: &M) -> Result<Self, SenderError> {
        Ok(TopicMessage {
            topic: message.topic_name(),
            content_type: message.content_type(),
            key: message.key().map(str::to_owned),
            body: serde_json::to_vec(message)?,
        })
    }
}

/// Measurements received from a device, as a SenML pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReceived {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    pub pack: Pack,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl MessageReceived {
    pub fn from_payload(payload: &Payload) -> Self {
        MessageReceived {
            device_id: payload.dev_eui.clone(),
            pack: payload.to_senml(),
            timestamp: payload.timestamp,
        }
    }

    /// Builds the message from an LwM2M pack. The pack base time is used when
    /// present, `received_at` otherwise.
    pub fn from_lwm2m(pack: Pack, received_at: OffsetDateTime) -> Result<Self, AgentError> {
        if senml::object_urn(&pack).is_none() {
            return Err(AgentError::MalformedSenML(
                "first record has no object urn".to_string(),
            ));
        }
        let device_id = senml::device_id(&pack)
            .ok_or_else(|| AgentError::MalformedSenML("missing device id".to_string()))?
            .to_owned();
        let timestamp = senml::base_time(&pack)
            .and_then(|bt| OffsetDateTime::from_unix_timestamp_nanos((bt * 1e9) as i128).ok())
            .unwrap_or(received_at);

        Ok(MessageReceived {
            device_id,
            pack,
            timestamp,
        })
    }
}

impl Message for MessageReceived {
    fn content_type(&self) -> &'static str {
        "application/vnd.iot-agent.message-received+json"
    }

    fn key(&self) -> Option<&str> {
        Some(&self.device_id)
    }
}

/// Battery and radio conditions of a device at its latest uplink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(rename = "loRaSNR", skip_serializing_if = "Option::is_none")]
    pub lora_snr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spreading_factor: Option<u8>,
    #[serde(rename = "dr", skip_serializing_if = "Option::is_none")]
    pub data_rate: Option<u8>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl DeviceStatus {
    pub fn from_uplink(event: &UplinkEvent, payload: &Payload) -> Self {
        DeviceStatus {
            device_id: payload.dev_eui.clone(),
            battery_level: payload.battery_level,
            rssi: event.radio.rssi,
            lora_snr: event.radio.lora_snr,
            frequency: event.radio.frequency,
            spreading_factor: event.radio.spreading_factor,
            data_rate: event.radio.data_rate,
            timestamp: payload.timestamp,
        }
    }
}

impl Message for DeviceStatus {
    fn content_type(&self) -> &'static str {
        "application/vnd.iot-agent.device-status+json"
    }

    fn key(&self) -> Option<&str> {
        Some(&self.device_id)
    }
}

impl Topic for DeviceStatus {
    fn topic_name(&self) -> &'static str {
        "device-status"
    }
}
