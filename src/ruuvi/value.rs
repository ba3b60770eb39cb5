use serde::Serialize;

/// A single measurement value as reported by a tag.
///
/// Counters and raw integer quantities stay integers so that they serialize
/// without a fractional part.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
}

impl Value {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Integer(v) => v as f64,
            Value::Float(v) => v,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Integer(v) => Some(v),
            Value::Float(_) => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

/// Rounds to two decimal places, the precision tags report with.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
