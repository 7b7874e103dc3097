//! SenML (RFC 8428) records, as exchanged with the rest of the platform.
//!
//! LwM2M devices name their records after IPSO objects: the base name of the
//! first record is the object URN (`urn:oma:lwm2m:ext:3303`) and its string
//! value carries the device identity.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "bn", default, skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
    #[serde(rename = "bt", default, skip_serializing_if = "Option::is_none")]
    pub base_time: Option<f64>,
    #[serde(rename = "bu", default, skip_serializing_if = "Option::is_none")]
    pub base_unit: Option<String>,
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(rename = "vs", default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(rename = "vb", default, skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

pub type Pack = Vec<Record>;

impl Record {
    pub fn measurement(name: &str, unit: &str, value: f64) -> Self {
        Record {
            name: Some(name.to_owned()),
            unit: Some(unit.to_owned()),
            value: Some(value),
            ..Default::default()
        }
    }

    pub fn flag(name: &str, value: bool) -> Self {
        Record {
            name: Some(name.to_owned()),
            bool_value: Some(value),
            ..Default::default()
        }
    }
}

pub fn parse_pack(body: &[u8]) -> Result<Pack, serde_json::Error> {
    serde_json::from_slice(body)
}

/// The IPSO object URN the pack describes.
pub fn object_urn(pack: &[Record]) -> Option<&str> {
    pack.first()?.base_name.as_deref()
}

/// Device identity of an LwM2M pack: the last `:` separated segment of the first
/// record's string value (`net:serva:iot:a81758fffe051d02` -> `a81758fffe051d02`).
pub fn device_id(pack: &[Record]) -> Option<&str> {
    let value = pack.first()?.string_value.as_deref()?;
    value.rsplit(':').next().filter(|id| !id.is_empty())
}

/// Base time of the pack, in unix seconds.
pub fn base_time(pack: &[Record]) -> Option<f64> {
    pack.first()?.base_time
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACK: &str = r#"[{"bn": "urn:oma:lwm2m:ext:3303", "bt": 1677079794, "n": "0", "vs": "net:serva:iot:a81758fffe051d02"}, {"n": "5700", "v": -4.5}, {"u": "lat", "v": 62.36956}, {"u": "lon", "v": 17.31984}, {"n": "env", "vs": "air"}, {"n": "tenant", "vs": "default"}]"#;

    #[test]
    fn parses_lwm2m_pack() {
        let pack = parse_pack(PACK.as_bytes()).expect("failed to parse pack");

        assert_eq!(pack.len(), 6);
        assert_eq!(object_urn(&pack), Some("urn:oma:lwm2m:ext:3303"));
        assert_eq!(device_id(&pack), Some("a81758fffe051d02"));
        assert_eq!(base_time(&pack), Some(1677079794.0));
        assert_eq!(pack[1].name.as_deref(), Some("5700"));
        assert_eq!(pack[1].value, Some(-4.5));
        assert_eq!(pack[2].unit.as_deref(), Some("lat"));
    }

    #[test]
    fn plain_device_id_is_kept() {
        let pack = vec![Record {
            string_value: Some("a81758fffe051d02".to_string()),
            ..Default::default()
        }];
        assert_eq!(device_id(&pack), Some("a81758fffe051d02"));

        assert_eq!(device_id(&[]), None);
        assert_eq!(device_id(&[Record::measurement("5700", "Cel", 1.0)]), None);
    }

    #[test]
    fn empty_fields_are_not_serialized() {
        let json = serde_json::to_string(&Record::measurement("temperature", "Cel", 18.75))
            .expect("failed to serialize record");
        assert_eq!(json, r#"{"n":"temperature","u":"Cel","v":18.75}"#);
    }
}
