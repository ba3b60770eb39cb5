use indexmap::IndexMap;
use macaddr::MacAddr6;

use crate::ruuvi::Value;

pub const TEMPERATURE: &str = "temperature";
pub const HUMIDITY: &str = "humidity";
pub const MOVEMENT_COUNTER: &str = "movement_counter";
pub const MEASUREMENT_SEQUENCE_NUMBER: &str = "measurement_sequence_number";

/// Measurement name to value, in the order the source reported them.
///
/// `None` marks a field the tag flagged as unavailable.
pub type Measurements = IndexMap<String, Option<Value>>;

#[derive(Debug, Clone)]
pub struct RawReading {
    pub mac: Option<MacAddr6>,

    pub measurements: Measurements,
}

impl RawReading {
    pub fn new(mac: Option<MacAddr6>, measurements: Measurements) -> Self {
        Self { mac, measurements }
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.measurements.get(field).copied().flatten()
    }

    pub fn sequence(&self) -> Option<u32> {
        self.get(MEASUREMENT_SEQUENCE_NUMBER)
            .and_then(|v| v.as_i64())
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn movement_counter(&self) -> Option<u8> {
        self.get(MOVEMENT_COUNTER)
            .and_then(|v| v.as_i64())
            .and_then(|v| u8::try_from(v).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(fields: &[(&str, Option<Value>)]) -> RawReading {
        RawReading::new(
            Some(MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff)),
            fields.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        )
    }

    #[test]
    fn test_sequence() {
        let r = reading(&[(MEASUREMENT_SEQUENCE_NUMBER, Some(Value::Integer(205)))]);
        assert_eq!(r.sequence(), Some(205));

        let r = reading(&[(MEASUREMENT_SEQUENCE_NUMBER, None)]);
        assert_eq!(r.sequence(), None);

        let r = reading(&[(MEASUREMENT_SEQUENCE_NUMBER, Some(Value::Integer(-1)))]);
        assert_eq!(r.sequence(), None);

        let r = reading(&[(MEASUREMENT_SEQUENCE_NUMBER, Some(Value::Float(3.0)))]);
        assert_eq!(r.sequence(), None);

        let r = reading(&[]);
        assert_eq!(r.sequence(), None);
    }

    #[test]
    fn test_movement_counter_range() {
        let r = reading(&[(MOVEMENT_COUNTER, Some(Value::Integer(255)))]);
        assert_eq!(r.movement_counter(), Some(255));

        let r = reading(&[(MOVEMENT_COUNTER, Some(Value::Integer(256)))]);
        assert_eq!(r.movement_counter(), None);
    }
}
