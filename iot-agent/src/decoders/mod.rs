use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::api::AgentError;
use crate::facades::UplinkEvent;
use crate::senml::{Pack, Record};

pub mod elsys;
pub mod senlabt;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload too short: expected at least {expected} bytes, got {actual}")]
    PayloadTooShort { expected: usize, actual: usize },
    #[error("sensor reported a fault reading (raw value {0})")]
    SensorFaultReading(i16),
    #[error("unsupported payload sub-type {0}")]
    UnsupportedSubType(u8),
    #[error("unknown measurement type {0:#04x}")]
    UnknownMeasurementType(u8),
}

/// One typed reading of a decoded payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Measurement {
    Temperature { temperature: f64 },
    BatteryLevel { battery_level: u8 },
    Record(Record),
}

impl Measurement {
    pub fn to_record(&self) -> Record {
        match self {
            Measurement::Temperature { temperature } => {
                Record::measurement("temperature", "Cel", *temperature)
            }
            Measurement::BatteryLevel { battery_level } => {
                Record::measurement("battery_level", "%", f64::from(*battery_level))
            }
            Measurement::Record(record) => record.clone(),
        }
    }
}

/// Canonical measurement set decoded from one uplink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    #[serde(rename = "devEUI")]
    pub dev_eui: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    pub measurements: Vec<Measurement>,
}

impl Payload {
    /// Converts the measurements into a SenML pack, the first record carrying the
    /// device as base name and the payload timestamp as base time.
    pub fn to_senml(&self) -> Pack {
        let mut pack: Pack = self.measurements.iter().map(Measurement::to_record).collect();
        if let Some(first) = pack.first_mut() {
            first.base_name = Some(format!("{}:", self.dev_eui));
            first.base_time = Some(self.timestamp.unix_timestamp_nanos() as f64 / 1e9);
        }
        pack
    }

    pub fn temperatures(&self) -> impl Iterator<Item = f64> + '_ {
        self.measurements.iter().filter_map(|m| match m {
            Measurement::Temperature { temperature } => Some(*temperature),
            _ => None,
        })
    }
}

/// A decoder for one binary payload layout.
pub type DecoderFn = fn(&UplinkEvent) -> Result<Payload, DecodeError>;

/// Maps device profile names to their payload decoder.
///
/// Built once at startup and read-only afterwards, so it can be shared between
/// request handlers without locking. Lookups are case insensitive.
#[derive(Clone)]
pub struct DecoderRegistry {
    decoders: HashMap<String, DecoderFn>,
}

impl DecoderRegistry {
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    pub fn with_decoder(mut self, profile: &str, decoder: DecoderFn) -> Self {
        _ = self.decoders.insert(profile.to_lowercase(), decoder);
        self
    }

    /// Unknown profiles are an error: there is no fallback decoder.
    pub fn select(&self, profile: &str) -> Result<DecoderFn, AgentError> {
        self.decoders
            .get(&profile.to_lowercase())
            .copied()
            .ok_or_else(|| AgentError::UnsupportedDeviceType(profile.to_owned()))
    }

    pub fn profiles(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(String::as_str)
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::empty()
            .with_decoder("senlabt", senlabt::decode)
            .with_decoder("senlab_t", senlabt::decode)
            .with_decoder("elsys", elsys::decode)
            .with_decoder("elsys_codec", elsys::decode)
            .with_decoder("elt_lite", elsys::decode)
            .with_decoder("ers", elsys::decode)
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::uplink;
    use super::*;

    #[test]
    fn selects_registered_decoders() {
        let registry = DecoderRegistry::default();

        let decode = registry.select("SenlabT").expect("senlabt is registered");
        let payload = decode(&uplink("senlabt", &[1, 254, 0x01, 0x2c])).expect("valid frame");
        assert_eq!(payload.battery_level, Some(100));

        assert!(registry.select("Elsys_Codec").is_ok());
    }

    #[test]
    fn unknown_profiles_are_rejected() {
        let registry = DecoderRegistry::default();

        match registry.select("acme_thermometer") {
            Err(AgentError::UnsupportedDeviceType(profile)) => {
                assert_eq!(profile, "acme_thermometer")
            }
            _ => panic!("expected UnsupportedDeviceType"),
        }

        assert!(DecoderRegistry::empty().select("senlabt").is_err());
    }

    #[test]
    fn payload_converts_to_senml() {
        let payload = senlabt::decode(&uplink("senlabt", &[1, 254, 0x01, 0x2c])).unwrap();
        let pack = payload.to_senml();

        assert_eq!(pack.len(), 2);
        assert_eq!(pack[0].base_name.as_deref(), Some("a81758fffe051d02:"));
        let base_time = pack[0].base_time.expect("missing base time");
        assert!((base_time - 1648471240.653515637).abs() < 1e-6);
        assert_eq!(pack[0].name.as_deref(), Some("temperature"));
        assert_eq!(pack[0].value, Some(18.75));
        assert_eq!(pack[1].name.as_deref(), Some("battery_level"));
        assert_eq!(pack[1].value, Some(100.0));
    }

    #[test]
    fn payload_serializes_measurements_in_order() {
        let payload = senlabt::decode(&uplink("senlabt", &[1, 254, 0x01, 0x2c])).unwrap();
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["devEUI"], "a81758fffe051d02");
        assert_eq!(json["timestamp"], "2022-03-28T12:40:40.653515637Z");
        assert_eq!(
            json["measurements"],
            serde_json::json!([{"temperature": 18.75}, {"battery_level": 100}])
        );
    }
}
