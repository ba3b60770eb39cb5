use std::collections::HashMap;

use anyhow::{Result, bail};
use macaddr::MacAddr6;
use ruuvi_mqtt::ruuvi::{
    HUMIDITY, MEASUREMENT_SEQUENCE_NUMBER, MOVEMENT_COUNTER, Measurements, RawReading, TEMPERATURE,
    Value, round2,
};

// Ref: https://docs.ruuvi.com/communication/bluetooth-advertisements/data-format-5-rawv2
const RUUVI_MANUFACTURER_DATA_COMPANY_ID: u16 = 0x0499;

const DATA_FORMAT_RAWV2: u8 = 5;
const RAWV2_LEN: usize = 24;

pub fn get_ruuvi_manufacturer_data(manufacturer_data: &HashMap<u16, Vec<u8>>) -> Option<&[u8]> {
    manufacturer_data
        .get(&RUUVI_MANUFACTURER_DATA_COMPANY_ID)
        .map(Vec::as_slice)
}

pub fn decode_manufacturer_data(manufacturer_data: &[u8]) -> Result<RawReading> {
    let Some(&data_format) = manufacturer_data.first() else {
        bail!("Ruuvi manufacturer data is empty");
    };

    match data_format {
        DATA_FORMAT_RAWV2 => decode_rawv2_manufacturer_data(manufacturer_data),
        _ => bail!("unsupported Ruuvi data format: {data_format}"),
    }
}

/// Invalid or unavailable values are reported as null fields; an invalid
/// sequence number is left out so the reading counts as malformed.
pub fn decode_rawv2_manufacturer_data(manufacturer_data: &[u8]) -> Result<RawReading> {
    if manufacturer_data.len() < RAWV2_LEN {
        bail!(
            "RAWv2 manufacturer data too short: expected at least {RAWV2_LEN} bytes, got {}",
            manufacturer_data.len()
        )
    }

    let d = manufacturer_data;
    let be_u16 = |i: usize| u16::from_be_bytes([d[i], d[i + 1]]);
    let be_i16 = |i: usize| i16::from_be_bytes([d[i], d[i + 1]]);

    let acceleration_x = decode_acceleration(be_i16(7));
    let acceleration_y = decode_acceleration(be_i16(9));
    let acceleration_z = decode_acceleration(be_i16(11));
    let acceleration = match (acceleration_x, acceleration_y, acceleration_z) {
        (Some(x), Some(y), Some(z)) => {
            let (x, y, z) = (x as f64, y as f64, z as f64);
            Some(round2((x * x + y * y + z * z).sqrt()))
        }
        _ => None,
    };
    let (battery, tx_power) = decode_power_info(be_u16(13));

    let mut measurements = Measurements::new();
    let mut put = |field: &str, value: Option<Value>| {
        measurements.insert(field.to_string(), value);
    };

    put("data_format", Some(Value::Integer(DATA_FORMAT_RAWV2.into())));
    put(HUMIDITY, decode_humidity(be_u16(3)).map(Value::Float));
    put(TEMPERATURE, decode_temperature(be_i16(1)).map(Value::Float));
    put("pressure", decode_pressure(be_u16(5)).map(Value::Float));
    put("acceleration", acceleration.map(Value::Float));
    put("acceleration_x", acceleration_x.map(|v| Value::Integer(v.into())));
    put("acceleration_y", acceleration_y.map(|v| Value::Integer(v.into())));
    put("acceleration_z", acceleration_z.map(|v| Value::Integer(v.into())));
    put("tx_power", tx_power.map(|v| Value::Integer(v.into())));
    put("battery", battery.map(|v| Value::Integer(v.into())));
    put(MOVEMENT_COUNTER, decode_movement_counter(d[15]).map(|v| Value::Integer(v.into())));
    if let Some(sequence) = decode_sequence(be_u16(16)) {
        put(MEASUREMENT_SEQUENCE_NUMBER, Some(Value::Integer(sequence.into())));
    }

    let mac = decode_mac([d[18], d[19], d[20], d[21], d[22], d[23]]);

    Ok(RawReading::new(mac, measurements))
}

fn decode_temperature(v: i16) -> Option<f64> {
    (v != i16::MIN).then(|| round2(v as f64 * 0.005))
}

fn decode_humidity(v: u16) -> Option<f64> {
    (v != u16::MAX).then(|| round2(v as f64 * 0.0025))
}

/// hPa
fn decode_pressure(v: u16) -> Option<f64> {
    (v != u16::MAX).then(|| round2((v as f64 + 50_000.0) / 100.0))
}

/// mG
fn decode_acceleration(v: i16) -> Option<i16> {
    (v != i16::MIN).then_some(v)
}

/// Battery voltage in mV from the upper 11 bits, TX power in dBm from the
/// lower 5.
fn decode_power_info(v: u16) -> (Option<u16>, Option<i8>) {
    let battery = v >> 5;
    let tx_power = (v & 0x1f) as i8;

    (
        (battery != 0x7ff).then_some(battery + 1600),
        (tx_power != 0x1f).then_some(-40 + tx_power * 2),
    )
}

fn decode_movement_counter(v: u8) -> Option<u8> {
    (v != u8::MAX).then_some(v)
}

fn decode_sequence(v: u16) -> Option<u16> {
    (v != u16::MAX).then_some(v)
}

fn decode_mac(v: [u8; 6]) -> Option<MacAddr6> {
    (v != [0xff; 6]).then(|| MacAddr6::from(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_decode_valid_data() {
        let reading =
            decode_manufacturer_data(&hex("0512FC5394C37C0004FFFC040CAC364200CDCBB8334C884F"))
                .unwrap();

        assert_eq!(
            reading.mac,
            Some(MacAddr6::new(0xcb, 0xb8, 0x33, 0x4c, 0x88, 0x4f))
        );
        assert_eq!(reading.sequence(), Some(205));
        assert_eq!(reading.movement_counter(), Some(66));

        let expected = [
            ("data_format", Value::Integer(5)),
            (HUMIDITY, Value::Float(53.49)),
            (TEMPERATURE, Value::Float(24.3)),
            ("pressure", Value::Float(1000.44)),
            ("acceleration", Value::Float(1036.02)),
            ("acceleration_x", Value::Integer(4)),
            ("acceleration_y", Value::Integer(-4)),
            ("acceleration_z", Value::Integer(1036)),
            ("tx_power", Value::Integer(4)),
            ("battery", Value::Integer(2977)),
            (MOVEMENT_COUNTER, Value::Integer(66)),
            (MEASUREMENT_SEQUENCE_NUMBER, Value::Integer(205)),
        ];
        let actual: Vec<(&str, Option<Value>)> = reading
            .measurements
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        let expected: Vec<(&str, Option<Value>)> =
            expected.into_iter().map(|(k, v)| (k, Some(v))).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_decode_invalid_values() {
        let reading =
            decode_manufacturer_data(&hex("058000FFFFFFFF800080008000FFFFFFFFFFFFFFFFFFFFFF"))
                .unwrap();

        assert_eq!(reading.mac, None);
        assert_eq!(reading.sequence(), None);
        assert!(!reading.measurements.contains_key(MEASUREMENT_SEQUENCE_NUMBER));
        for field in [
            HUMIDITY,
            TEMPERATURE,
            "pressure",
            "acceleration",
            "acceleration_x",
            "acceleration_y",
            "acceleration_z",
            "tx_power",
            "battery",
            MOVEMENT_COUNTER,
        ] {
            assert_eq!(reading.measurements.get(field), Some(&None), "{field}");
        }
    }

    #[test]
    fn test_decode_negative_temperature() {
        let mut data = hex("0512FC5394C37C0004FFFC040CAC364200CDCBB8334C884F");
        data[1..3].copy_from_slice(&(-1000i16).to_be_bytes());

        let reading = decode_manufacturer_data(&data).unwrap();

        assert_eq!(reading.get(TEMPERATURE), Some(Value::Float(-5.0)));
    }

    #[test]
    fn test_decode_errors() {
        assert!(decode_manufacturer_data(&[]).is_err());
        assert!(decode_manufacturer_data(&hex("0512FC5394")).is_err());
        assert!(decode_manufacturer_data(&hex("03291A1ECE1EFC18F94202CA0B53")).is_err());
    }

    #[test]
    fn test_get_ruuvi_manufacturer_data() {
        let mut manufacturer_data = HashMap::new();
        assert!(get_ruuvi_manufacturer_data(&manufacturer_data).is_none());

        manufacturer_data.insert(0x0969, vec![1, 2, 3]);
        assert!(get_ruuvi_manufacturer_data(&manufacturer_data).is_none());

        manufacturer_data.insert(0x0499, vec![5]);
        assert_eq!(get_ruuvi_manufacturer_data(&manufacturer_data), Some(&[5u8][..]));
    }
}
