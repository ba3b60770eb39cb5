use std::{fmt, str::FromStr};

use anyhow::{Error, Result, bail};
use macaddr::MacAddr6;
use serde::{Serialize, Serializer, ser::SerializeMap as _};

use crate::ruuvi::{Measurements, format_mac, format_mac_compact};

pub const DEFAULT_TOPIC: &str = "ruuvi-mqtt/tele/{mac}/{name}/SENSOR";

pub const MAC_KEY: &str = "mac";
pub const NAME_KEY: &str = "ruuvi_mqtt_name";
pub const TIMESTAMP_KEY: &str = "ruuvi_mqtt_timestamp";

/// An enriched reading on its way to the broker. Serializes to one flat JSON
/// object.
///
/// Measurements named like one of the record's own keys are left out, so the
/// object never carries a key twice.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRecord {
    pub mac: MacAddr6,

    pub measurements: Measurements,

    pub name: String,

    /// Milliseconds since the Unix epoch at which the reading left ingest.
    pub timestamp: i64,
}

impl OutgoingRecord {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl Serialize for OutgoingRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;

        map.serialize_entry(MAC_KEY, &format_mac(&self.mac))?;
        for (key, value) in &self.measurements {
            if ![MAC_KEY, NAME_KEY, TIMESTAMP_KEY].contains(&key.as_str()) {
                map.serialize_entry(key, value)?;
            }
        }
        map.serialize_entry(NAME_KEY, &self.name)?;
        map.serialize_entry(TIMESTAMP_KEY, &self.timestamp)?;

        map.end()
    }
}

/// Topic template with `{mac}` and `{name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern(String);

impl TopicPattern {
    /// `{mac}` is rendered without separators.
    pub fn render(&self, mac: &MacAddr6, name: &str) -> String {
        self.0
            .replace("{mac}", &format_mac_compact(mac))
            .replace("{name}", name)
    }

    pub fn render_record(&self, record: &OutgoingRecord) -> String {
        self.render(&record.mac, &record.name)
    }
}

impl Default for TopicPattern {
    fn default() -> Self {
        Self(DEFAULT_TOPIC.to_string())
    }
}

impl FromStr for TopicPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            bail!("topic pattern is empty");
        }
        if s.contains(['+', '#']) {
            bail!("topic pattern {s:?} contains MQTT wildcards");
        }

        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
