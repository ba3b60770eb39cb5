use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use indexmap::IndexMap;
use macaddr::MacAddr6;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::{
    calibration::{CalibrationTable, Polynomial},
    record::TopicPattern,
    ruuvi::{format_mac, parse_mac},
};

pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTT_CLIENT_ID: &str = "ruuvi-mqtt-gateway";
pub const DEFAULT_BUFFER_SIZE: usize = 100_000;

const GENERAL_SECTION: &str = "general";
const OFFSET_PREFIX: &str = "offset-";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("[{section}]: {reason}")]
    InvalidSection { section: String, reason: String },

    #[error("error parsing {entry:?}: {reason}")]
    InvalidEntry { entry: String, reason: String },

    #[error("no MQTT host given")]
    MissingHost,

    #[error("buffer size must be at least 1")]
    ZeroBufferSize,
}

impl ConfigError {
    fn section(section: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidSection {
            section: section.into(),
            reason: reason.to_string(),
        }
    }

    fn entry(entry: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidEntry {
            entry: entry.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,

    pub port: u16,

    pub client_id: String,
}

impl BrokerSettings {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_MQTT_PORT,
            client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
        }
    }
}

/// Runtime configuration, resolved once at startup and shared read-only by
/// both stages.
#[derive(Debug, Clone)]
pub struct Config {
    pub names: IndexMap<MacAddr6, String>,

    pub calibration: CalibrationTable,

    /// Devices to accept readings from. Empty accepts every device.
    pub filter: HashSet<MacAddr6>,

    pub dewpoint: bool,

    pub buffer_size: usize,

    pub topic: TopicPattern,

    pub broker: BrokerSettings,
}

impl Config {
    pub fn new(broker: BrokerSettings) -> Self {
        Self {
            names: IndexMap::new(),
            calibration: CalibrationTable::new(),
            filter: HashSet::new(),
            dewpoint: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            topic: TopicPattern::default(),
            broker,
        }
    }

    /// Configured name of the device, or its MAC when it has none.
    pub fn display_name(&self, mac: &MacAddr6) -> String {
        match self.names.get(mac) {
            Some(name) => name.clone(),
            None => format_mac(mac),
        }
    }

    pub fn accepts(&self, mac: &MacAddr6) -> bool {
        self.filter.is_empty() || self.filter.contains(mac)
    }

    /// Merges the optional config file with command line settings, the
    /// latter taking precedence.
    pub fn resolve(file: Option<ConfigFile>, overrides: Overrides) -> Result<Self, ConfigError> {
        let ConfigFile { general, devices } = file.unwrap_or_default();

        let mut names = IndexMap::new();
        let mut calibration = CalibrationTable::new();

        for (section, device) in devices {
            let mac = parse_mac(&section).map_err(|e| ConfigError::section(&section, e))?;

            if let Some(name) = device.name {
                validate_name(&name).map_err(|e| ConfigError::section(&section, e))?;
                names.insert(mac, name);
            }

            for (key, value) in device.options {
                let Some(measurement) = key.strip_prefix(OFFSET_PREFIX) else {
                    return Err(ConfigError::section(
                        &section,
                        format!("unknown option {key:?}"),
                    ));
                };
                validate_name(measurement).map_err(|e| ConfigError::section(&section, e))?;
                let polynomial = polynomial_from_toml(&value)
                    .map_err(|e| ConfigError::section(&section, format!("{key}: {e}")))?;
                calibration.insert(mac, measurement, polynomial);
            }
        }

        for MacName { mac, name } in overrides.mac_names {
            if names.insert(mac, name).is_some() {
                warn!(mac = %format_mac(&mac), "duplicate name definition");
            }
        }

        for OffsetPoly {
            mac,
            measurement,
            polynomial,
        } in overrides.offset_polys
        {
            if calibration.insert(mac, &measurement, polynomial).is_some() {
                warn!(mac = %format_mac(&mac), measurement, "duplicate offset definition");
            }
        }

        let filter = if overrides.filter_mac_name || general.filter_mac_name.unwrap_or(false) {
            names.keys().copied().collect()
        } else {
            HashSet::new()
        };

        let topic = match (overrides.mqtt_topic, general.mqtt_topic) {
            (Some(topic), _) => topic,
            (None, Some(topic)) => topic
                .parse::<TopicPattern>()
                .map_err(|e| ConfigError::section(GENERAL_SECTION, format!("mqtt-topic: {e}")))?,
            (None, None) => TopicPattern::default(),
        };

        let host = overrides
            .mqtt_host
            .or(general.mqtt_host)
            .filter(|host| !host.is_empty())
            .ok_or(ConfigError::MissingHost)?;

        let buffer_size = overrides
            .buffer_size
            .or(general.buffer_size)
            .unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }

        Ok(Self {
            names,
            calibration,
            filter,
            dewpoint: overrides.dewpoint || general.dewpoint.unwrap_or(false),
            buffer_size,
            topic,
            broker: BrokerSettings {
                host,
                port: overrides
                    .mqtt_port
                    .or(general.mqtt_port)
                    .unwrap_or(DEFAULT_MQTT_PORT),
                client_id: overrides
                    .mqtt_client_id
                    .or(general.mqtt_client_id)
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            },
        })
    }
}

/// Settings given on the command line.
#[derive(Debug, Default)]
pub struct Overrides {
    pub mac_names: Vec<MacName>,

    pub offset_polys: Vec<OffsetPoly>,

    pub filter_mac_name: bool,

    pub dewpoint: bool,

    pub mqtt_topic: Option<TopicPattern>,

    pub mqtt_host: Option<String>,

    pub mqtt_port: Option<u16>,

    pub mqtt_client_id: Option<String>,

    pub buffer_size: Option<usize>,
}

/// `aa:bb:cc:dd:ee:ff/kitchen`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacName {
    pub mac: MacAddr6,

    pub name: String,
}

impl FromStr for MacName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((mac, name)) = s.split_once('/') else {
            return Err(ConfigError::entry(s, "expected mac/name"));
        };

        let mac = parse_mac(mac).map_err(|e| ConfigError::entry(s, e))?;
        validate_name(name).map_err(|e| ConfigError::entry(s, e))?;

        Ok(Self {
            mac,
            name: name.to_string(),
        })
    }
}

/// `aa:bb:cc:dd:ee:ff/temperature/1,1.5`
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetPoly {
    pub mac: MacAddr6,

    pub measurement: String,

    pub polynomial: Polynomial,
}

impl FromStr for OffsetPoly {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        let (Some(mac), Some(measurement), Some(constants)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ConfigError::entry(s, "expected mac/measurement/constants"));
        };

        let mac = parse_mac(mac).map_err(|e| ConfigError::entry(s, e))?;
        validate_name(measurement).map_err(|e| ConfigError::entry(s, e))?;
        let polynomial = constants
            .parse::<Polynomial>()
            .map_err(|e| ConfigError::entry(s, format!("{e:#}")))?;

        Ok(Self {
            mac,
            measurement: measurement.to_lowercase(),
            polynomial,
        })
    }
}

/// The TOML config file: a `[general]` table plus one table per device,
/// named by its MAC.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub general: General,

    #[serde(flatten)]
    pub devices: IndexMap<String, DeviceSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct General {
    pub mqtt_host: Option<String>,

    pub mqtt_port: Option<u16>,

    pub mqtt_client_id: Option<String>,

    pub mqtt_topic: Option<String>,

    pub dewpoint: Option<bool>,

    pub filter_mac_name: Option<bool>,

    pub buffer_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceSection {
    pub name: Option<String>,

    /// `offset-<measurement>` polynomials; anything else is rejected when
    /// the config is resolved.
    #[serde(flatten)]
    pub options: IndexMap<String, toml::Value>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn validate_name(name: &str) -> anyhow::Result<()> {
    if name.is_empty() {
        anyhow::bail!("name is empty");
    }
    if name.chars().any(char::is_whitespace) {
        anyhow::bail!("name {name:?} contains whitespace");
    }

    Ok(())
}

/// Accepts either an array of numbers or a comma separated string.
fn polynomial_from_toml(value: &toml::Value) -> anyhow::Result<Polynomial> {
    match value {
        toml::Value::String(s) => s.parse(),
        toml::Value::Array(items) => {
            let coefficients = items
                .iter()
                .map(|item| match item {
                    toml::Value::Float(f) => Ok(*f),
                    toml::Value::Integer(i) => Ok(*i as f64),
                    other => Err(anyhow::anyhow!("{other} is not a number")),
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            Polynomial::new(coefficients)
        }
        other => anyhow::bail!("expected a list of coefficients, got {other}"),
    }
}
