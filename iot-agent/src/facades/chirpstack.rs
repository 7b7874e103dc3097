use std::collections::HashMap;

use base64::Engine;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::api::AgentError;
use crate::facades::{malformed, normalize_dev_eui, Facade, RadioInfo, UplinkEvent};

/// ChirpStack application server JSON integration (`up` events).
pub struct Chirpstack;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Uplink {
    #[serde(rename = "devEUI")]
    dev_eui: Option<String>,
    device_profile_name: Option<String>,
    data: Option<String>,
    f_port: Option<u8>,
    f_cnt: Option<u32>,
    #[serde(default)]
    rx_info: Vec<RxInfo>,
    tx_info: Option<TxInfo>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RxInfo {
    #[serde(default, with = "time::serde::rfc3339::option")]
    time: Option<OffsetDateTime>,
    rssi: Option<i32>,
    #[serde(rename = "loRaSNR")]
    lora_snr: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TxInfo {
    frequency: Option<u64>,
    dr: Option<u8>,
}

impl Facade for Chirpstack {
    fn name(&self) -> &'static str {
        "chirpstack"
    }

    fn translate(
        &self,
        envelope: &[u8],
        received_at: OffsetDateTime,
    ) -> Result<UplinkEvent, AgentError> {
        let uplink: Uplink = serde_json::from_slice(envelope).map_err(malformed)?;

        let dev_eui = normalize_dev_eui(uplink.dev_eui)?;
        let data = uplink.data.ok_or_else(|| malformed("missing payload data"))?;
        let data = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(malformed)?;

        let rx = uplink.rx_info.into_iter().next();
        let timestamp = rx
            .as_ref()
            .and_then(|rx| rx.time)
            .unwrap_or(received_at);

        Ok(UplinkEvent {
            dev_eui,
            device_profile: uplink.device_profile_name,
            timestamp,
            data,
            f_port: uplink.f_port,
            f_cnt: uplink.f_cnt,
            radio: RadioInfo {
                rssi: rx.as_ref().and_then(|rx| rx.rssi),
                lora_snr: rx.as_ref().and_then(|rx| rx.lora_snr),
                frequency: uplink.tx_info.as_ref().and_then(|tx| tx.frequency),
                spreading_factor: None,
                data_rate: uplink.tx_info.as_ref().and_then(|tx| tx.dr),
            },
            tags: uplink.tags,
        })
    }
}
