//! Senlab T temperature probes.
//!
//! ```text
//! | ID(1) | BatteryLevel(1) | Internal(n) | Temp(2)
//! | ID(1) | BatteryLevel(1) | Internal(n) | Temp(2) | Temp(2)
//! ```
//!
//! Temperatures are big endian signed 1/16 degrees, the battery level is scaled
//! from 0..=254 to a percentage.
use crate::decoders::{DecodeError, Measurement, Payload};
use crate::facades::UplinkEvent;

const MIN_FRAME_LEN: usize = 4;
const DUAL_PROBE_MIN_FRAME_LEN: usize = 6;

// -46.75 and 85 degrees, reported by the probe on read errors
const FAULT_READINGS: [i16; 2] = [-748, 1360];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeLayout {
    SingleProbe,
    DualProbe,
}

impl TryFrom<u8> for ProbeLayout {
    type Error = DecodeError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(ProbeLayout::SingleProbe),
            12 => Ok(ProbeLayout::DualProbe),
            other => Err(DecodeError::UnsupportedSubType(other)),
        }
    }
}

pub fn decode(event: &UplinkEvent) -> Result<Payload, DecodeError> {
    let data = event.data.as_slice();
    ensure_len(data, MIN_FRAME_LEN)?;

    let temperatures = match ProbeLayout::try_from(data[0])? {
        ProbeLayout::SingleProbe => vec![temperature_at(data, data.len() - 2)?],
        ProbeLayout::DualProbe => {
            ensure_len(data, DUAL_PROBE_MIN_FRAME_LEN)?;
            vec![
                temperature_at(data, data.len() - 4)?,
                temperature_at(data, data.len() - 2)?,
            ]
        }
    };
    let battery_level = battery_level(data[1]);

    let mut measurements: Vec<Measurement> = temperatures
        .into_iter()
        .map(|temperature| Measurement::Temperature { temperature })
        .collect();
    measurements.push(Measurement::BatteryLevel { battery_level });

    Ok(Payload {
        dev_eui: event.dev_eui.clone(),
        timestamp: event.timestamp,
        battery_level: Some(battery_level),
        measurements,
    })
}

fn ensure_len(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::PayloadTooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn temperature_at(data: &[u8], offset: usize) -> Result<f64, DecodeError> {
    let raw = i16::from_be_bytes([data[offset], data[offset + 1]]);
    if FAULT_READINGS.contains(&raw) {
        return Err(DecodeError::SensorFaultReading(raw));
    }
    Ok(f64::from(raw) / 16.0)
}

fn battery_level(raw: u8) -> u8 {
    ((u16::from(raw) * 100) / 254).min(100) as u8
}
