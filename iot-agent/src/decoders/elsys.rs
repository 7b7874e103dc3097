//! Elsys sensors (ERS, ELT).
//!
//! Payloads are a sequence of `| Type(1) | Value(n) |` entries where the value
//! length is fixed by the type.
use crate::decoders::{DecodeError, Measurement, Payload};
use crate::facades::UplinkEvent;
use crate::senml::Record;

const TEMPERATURE: u8 = 0x01;
const HUMIDITY: u8 = 0x02;
const ACCELERATION: u8 = 0x03;
const LIGHT: u8 = 0x04;
const MOTION: u8 = 0x05;
const CO2: u8 = 0x06;
const VDD: u8 = 0x07;
const ANALOG1: u8 = 0x08;
const PULSE1: u8 = 0x0a;
const EXTERNAL_TEMPERATURE: u8 = 0x0c;
const DIGITAL_INPUT: u8 = 0x0d;
const DISTANCE: u8 = 0x0e;
const OCCUPANCY: u8 = 0x11;
const WATER_LEAK: u8 = 0x12;
const PRESSURE: u8 = 0x14;
const SOUND: u8 = 0x15;

fn value_len(kind: u8) -> Result<usize, DecodeError> {
    let len = match kind {
        HUMIDITY | MOTION | DIGITAL_INPUT | OCCUPANCY | WATER_LEAK => 1,
        TEMPERATURE | LIGHT | CO2 | VDD | ANALOG1 | PULSE1 | EXTERNAL_TEMPERATURE | DISTANCE
        | SOUND => 2,
        ACCELERATION => 3,
        PRESSURE => 4,
        other => return Err(DecodeError::UnknownMeasurementType(other)),
    };
    Ok(len)
}

pub fn decode(event: &UplinkEvent) -> Result<Payload, DecodeError> {
    let data = event.data.as_slice();
    if data.is_empty() {
        return Err(DecodeError::PayloadTooShort {
            expected: 2,
            actual: 0,
        });
    }

    let mut measurements = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let kind = data[offset];
        let len = value_len(kind)?;
        let start = offset + 1;
        let value = data
            .get(start..start + len)
            .ok_or(DecodeError::PayloadTooShort {
                expected: start + len,
                actual: data.len(),
            })?;
        read_value(kind, value, &mut measurements)?;
        offset = start + len;
    }

    Ok(Payload {
        dev_eui: event.dev_eui.clone(),
        timestamp: event.timestamp,
        battery_level: None,
        measurements,
    })
}

/// `value` holds exactly `value_len(kind)` bytes.
fn read_value(
    kind: u8,
    value: &[u8],
    measurements: &mut Vec<Measurement>,
) -> Result<(), DecodeError> {
    let u16_value = || f64::from(u16::from_be_bytes([value[0], value[1]]));
    let i16_value = || f64::from(i16::from_be_bytes([value[0], value[1]]));

    match kind {
        TEMPERATURE => measurements.push(Measurement::Temperature {
            temperature: i16_value() / 10.0,
        }),
        HUMIDITY => measurements.push(record("humidity", "%RH", f64::from(value[0]))),
        ACCELERATION => {
            for (axis, raw) in ["x", "y", "z"].iter().zip(value) {
                let name = format!("acceleration_{axis}");
                measurements.push(record(&name, "1", f64::from(i8::from_be_bytes([*raw]))));
            }
        }
        LIGHT => measurements.push(record("light", "lx", u16_value())),
        MOTION => measurements.push(record("motion", "count", f64::from(value[0]))),
        CO2 => measurements.push(record("co2", "ppm", u16_value())),
        VDD => measurements.push(record("vdd", "mV", u16_value())),
        ANALOG1 => measurements.push(record("analog1", "mV", u16_value())),
        PULSE1 => measurements.push(record("pulse1", "count", u16_value())),
        EXTERNAL_TEMPERATURE => {
            measurements.push(record("external_temperature", "Cel", i16_value() / 10.0))
        }
        DIGITAL_INPUT => measurements.push(Measurement::Record(Record::flag(
            "digital_input",
            value[0] != 0,
        ))),
        DISTANCE => measurements.push(record("distance", "mm", u16_value())),
        OCCUPANCY => measurements.push(record("occupancy", "1", f64::from(value[0]))),
        WATER_LEAK => measurements.push(record("water_leak", "1", f64::from(value[0]))),
        PRESSURE => {
            let raw = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
            measurements.push(record("pressure", "hPa", f64::from(raw) / 1000.0))
        }
        SOUND => {
            measurements.push(record("sound_peak", "dB", f64::from(value[0])));
            measurements.push(record("sound_avg", "dB", f64::from(value[1])));
        }
        other => return Err(DecodeError::UnknownMeasurementType(other)),
    }
    Ok(())
}

fn record(name: &str, unit: &str, value: f64) -> Measurement {
    Measurement::Record(Record::measurement(name, unit, value))
}
