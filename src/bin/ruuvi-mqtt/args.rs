use std::path::PathBuf;

use clap::Parser;
use ruuvi_mqtt::{
    config::{MacName, OffsetPoly, Overrides},
    record::TopicPattern,
};

const AFTER_HELP: &str = "\
Polynomial offset functions

Polynomial offset functions calibrate measurements across multiple tags. The
raw measurement is passed through the polynomial

  f(x) = an * x^n + ... + a2 * x^2 + a1 * x + a0

and the result is sent to MQTT, with the raw value kept as raw-<measurement>.

--offset-poly takes mac/measurement/constants, where constants is a comma
separated list from an down to a0. All constants must be given, even if 0.

  aa:bb:cc:dd:ee:ff/temperature/1,1.5
      adds 1.5 to every temperature of that tag

  aa:bb:cc:dd:ee:ff/humidity/0.98,1.01,0
      applies f(x) = 0.98 * x^2 + 1.01 * x to its humidity

Configuration file

The file given with --config is TOML. Settings go in [general], each tag gets
a table named after its MAC. The MAC contains colons, so the table name must
be quoted. INI files written for earlier releases need these quotes, and
quoted string values, before they load.

  [general]
  mqtt-host = \"broker.local\"
  dewpoint = true

  [\"aa:bb:cc:dd:ee:ff\"]
  name = \"kitchen\"
  offset-temperature = \"1,1.5\"";

#[derive(Debug, Parser)]
#[command(version, about = "Forward RuuviTag measurements to MQTT", after_help = AFTER_HELP)]
pub struct Args {
    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// TOML configuration file to load, see below
    #[arg(long, env = "RUUVI_MQTT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Name a tag, as mac/name. The name must not contain whitespace
    #[arg(long = "mac-name", value_name = "MAC/NAME")]
    pub mac_names: Vec<MacName>,

    /// Only accept tags named with --mac-name or in the config file
    #[arg(long)]
    pub filter_mac_name: bool,

    /// Polynomial offset for a tag's measurement
    #[arg(long = "offset-poly", value_name = "MAC/MEASUREMENT/CONSTANTS")]
    pub offset_polys: Vec<OffsetPoly>,

    /// Add an approximate dew point as `dew_point`
    #[arg(long)]
    pub dewpoint: bool,

    /// Topic to publish to. `{mac}` (without colons) and `{name}` are
    /// substituted [default: ruuvi-mqtt/tele/{mac}/{name}/SENSOR]
    #[arg(long)]
    pub mqtt_topic: Option<TopicPattern>,

    #[arg(long, env = "MQTT_HOST")]
    pub mqtt_host: Option<String>,

    /// [default: 1883]
    #[arg(long)]
    pub mqtt_port: Option<u16>,

    /// Must be unique among the broker's clients [default: ruuvi-mqtt-gateway]
    #[arg(long)]
    pub mqtt_client_id: Option<String>,

    /// Measurements to buffer while the broker is unavailable. Not kept
    /// across restarts [default: 100000]
    #[arg(long)]
    pub buffer_size: Option<usize>,
}

impl Args {
    pub fn overrides(self) -> Overrides {
        Overrides {
            mac_names: self.mac_names,
            offset_polys: self.offset_polys,
            filter_mac_name: self.filter_mac_name,
            dewpoint: self.dewpoint,
            mqtt_topic: self.mqtt_topic,
            mqtt_host: self.mqtt_host,
            mqtt_port: self.mqtt_port,
            mqtt_client_id: self.mqtt_client_id,
            buffer_size: self.buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;
    use ruuvi_mqtt::config::{Config, ConfigFile};

    use super::*;

    #[test]
    fn test_command() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_config_file_help_example_loads() {
        let example: Vec<&str> = AFTER_HELP[AFTER_HELP.find("  [general]").unwrap()..]
            .lines()
            .map(str::trim_start)
            .collect();
        let file: ConfigFile = toml::from_str(&example.join("\n")).unwrap();

        let config = Config::resolve(Some(file), Overrides::default()).unwrap();

        assert_eq!(config.broker.host, "broker.local");
        assert!(config.dewpoint);
        assert_eq!(config.names.values().collect::<Vec<_>>(), ["kitchen"]);
    }

    #[test]
    fn test_repeated_entries() {
        let args = Args::try_parse_from([
            "ruuvi-mqtt",
            "--mqtt-host",
            "broker.local",
            "--mac-name",
            "aa:bb:cc:dd:ee:ff/kitchen",
            "--mac-name",
            "11:22:33:44:55:66/attic",
            "--offset-poly",
            "aa:bb:cc:dd:ee:ff/temperature/1,1.5",
            "--dewpoint",
        ])
        .unwrap();

        assert_eq!(args.mac_names.len(), 2);
        assert_eq!(args.offset_polys[0].measurement, "temperature");
        assert!(args.dewpoint);

        let overrides = args.overrides();
        assert_eq!(overrides.mqtt_host.as_deref(), Some("broker.local"));
        assert_eq!(overrides.mqtt_port, None);
    }

    #[test]
    fn test_invalid_entries() {
        for bad in [
            ["--mac-name", "kitchen"],
            ["--offset-poly", "aa:bb:cc:dd:ee:ff/temperature/x"],
            ["--mqtt-topic", "ruuvi/#"],
        ] {
            let argv = ["ruuvi-mqtt", "--mqtt-host", "broker.local", bad[0], bad[1]];
            assert!(Args::try_parse_from(argv).is_err(), "{bad:?}");
        }
    }
}
