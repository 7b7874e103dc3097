use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;

use crate::api::AgentError;

pub mod chirpstack;
pub mod netmore;

/// One uplink notification from a network server, for one radio transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct UplinkEvent {
    /// Lowercase hex DevEUI
    pub dev_eui: String,
    /// Device type, used to select a payload decoder
    pub device_profile: Option<String>,
    pub timestamp: OffsetDateTime,
    /// The device's application payload
    pub data: Vec<u8>,
    pub f_port: Option<u8>,
    pub f_cnt: Option<u32>,
    pub radio: RadioInfo,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadioInfo {
    pub rssi: Option<i32>,
    pub lora_snr: Option<f64>,
    pub frequency: Option<u64>,
    pub spreading_factor: Option<u8>,
    pub data_rate: Option<u8>,
}

/// Adapts one network server's uplink envelope to an `UplinkEvent`.
pub trait Facade: Send + Sync {
    fn name(&self) -> &'static str;

    /// `received_at` is used when the envelope carries no reception time.
    fn translate(
        &self,
        envelope: &[u8],
        received_at: OffsetDateTime,
    ) -> Result<UplinkEvent, AgentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeKind {
    Chirpstack,
    Netmore,
}

impl std::str::FromStr for FacadeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_ref() {
            "chirpstack" => Ok(FacadeKind::Chirpstack),
            "netmore" => Ok(FacadeKind::Netmore),
            _ => Err(format!("Unknown application server facade: {s}")),
        }
    }
}

impl FacadeKind {
    pub fn build(self) -> Arc<dyn Facade> {
        match self {
            FacadeKind::Chirpstack => Arc::new(chirpstack::Chirpstack),
            FacadeKind::Netmore => Arc::new(netmore::Netmore),
        }
    }
}

pub(crate) fn malformed(reason: impl std::fmt::Display) -> AgentError {
    AgentError::MalformedEnvelope(reason.to_string())
}

/// Validates a DevEUI and brings it to its lowercase form.
pub(crate) fn normalize_dev_eui(dev_eui: Option<String>) -> Result<String, AgentError> {
    match dev_eui.map(|id| id.trim().to_lowercase()) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(malformed("missing device identifier")),
    }
}
