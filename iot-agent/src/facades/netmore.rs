use serde::Deserialize;
use time::OffsetDateTime;

use crate::api::AgentError;
use crate::facades::{malformed, normalize_dev_eui, Facade, RadioInfo, UplinkEvent};

/// Netmore network server, posting arrays of uplinks with hex encoded payloads.
pub struct Netmore;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Uplink {
    dev_eui: Option<String>,
    sensor_type: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    timestamp: Option<OffsetDateTime>,
    payload: Option<String>,
    f_port: Option<String>,
    f_cnt_up: Option<u32>,
    rssi: Option<String>,
    snr: Option<String>,
    freq: Option<String>,
    spreading_factor: Option<String>,
    dr: Option<u8>,
}

fn parse_opt<T: std::str::FromStr>(value: &Option<String>) -> Option<T> {
    value.as_deref().and_then(|v| v.trim().parse().ok())
}

impl Facade for Netmore {
    fn name(&self) -> &'static str {
        "netmore"
    }

    fn translate(
        &self,
        envelope: &[u8],
        received_at: OffsetDateTime,
    ) -> Result<UplinkEvent, AgentError> {
        let uplinks: Vec<Uplink> = serde_json::from_slice(envelope).map_err(malformed)?;
        let uplink = uplinks
            .into_iter()
            .next()
            .ok_or_else(|| malformed("empty uplink array"))?;

        let dev_eui = normalize_dev_eui(uplink.dev_eui)?;
        let payload = uplink
            .payload
            .ok_or_else(|| malformed("missing payload data"))?;
        let data = hex::decode(payload.trim()).map_err(malformed)?;

        Ok(UplinkEvent {
            dev_eui,
            device_profile: uplink.sensor_type,
            timestamp: uplink.timestamp.unwrap_or(received_at),
            data,
            f_port: parse_opt(&uplink.f_port),
            f_cnt: uplink.f_cnt_up,
            radio: RadioInfo {
                rssi: parse_opt(&uplink.rssi),
                lora_snr: parse_opt(&uplink.snr),
                frequency: parse_opt(&uplink.freq),
                spreading_factor: parse_opt(&uplink.spreading_factor),
                data_rate: uplink.dr,
            },
            tags: Default::default(),
        })
    }
}
