use std::{collections::HashMap, sync::Arc};

use anyhow::{Result, bail};
use chrono::Utc;
use macaddr::MacAddr6;
use thiserror::Error;
use tokio::sync::mpsc::{Sender, error::TrySendError};
use tokio_stream::{Stream, StreamExt as _};
use tracing::{debug, error, info, trace};

use crate::{
    config::Config,
    derived::{dew_point, movement_delta},
    record::OutgoingRecord,
    ruuvi::{HUMIDITY, RawReading, TEMPERATURE, Value, format_mac},
};

pub const DEW_POINT: &str = "ruuvi_mqtt_dewpoint";
pub const MOVEMENT_DELTA: &str = "ruuvi_mqtt_movement_delta";

/// Tags occasionally report humidity about 100% above the real value. Values
/// slightly above 100% do happen near saturation and are kept.
const MAX_HUMIDITY: f64 = 105.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DeviceState {
    last_sequence: u32,

    last_movement_counter: Option<u8>,
}

/// History of every device seen so far, owned by the ingest stage.
#[derive(Debug, Default)]
struct DeviceStates(HashMap<MacAddr6, DeviceState>);

impl DeviceStates {
    fn get(&self, mac: &MacAddr6) -> DeviceState {
        self.0.get(mac).copied().unwrap_or_default()
    }

    /// Records `sequence` as the latest one seen from `mac`. Returns `false`
    /// without touching the state when it repeats the previous one.
    ///
    /// Sequence numbers normally go up, possibly skipping some. They go down
    /// when a tag reboots, which still counts as a new measurement.
    fn observe_sequence(&mut self, mac: MacAddr6, sequence: u32) -> bool {
        if self.get(&mac).last_sequence == sequence {
            return false;
        }

        self.0.entry(mac).or_default().last_sequence = sequence;
        true
    }

    fn observe_movement(&mut self, mac: MacAddr6, counter: u8) -> u8 {
        let state = self.0.entry(mac).or_default();
        let delta = movement_delta(state.last_movement_counter, counter);
        state.last_movement_counter = Some(counter);
        delta
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("measurement without sequence number or MAC")]
    Malformed,

    #[error("measurement without {0}")]
    MissingField(&'static str),

    #[error("device is not in the filter list")]
    Filtered,

    #[error("duplicate measurement {0}")]
    Duplicate(u32),

    #[error("humidity is null")]
    NullHumidity,

    #[error("invalid humidity value {0:.2}%")]
    HumidityOutOfRange(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Queued,

    /// The buffer was full.
    Dropped,

    Rejected(Rejection),

    /// The delivery side of the channel is gone.
    Closed,
}

/// Turns raw readings into outgoing records and offers them to the buffer.
#[derive(Debug)]
pub struct Ingester {
    config: Arc<Config>,
    states: DeviceStates,
    sender: Sender<OutgoingRecord>,
}

impl Ingester {
    pub fn new(config: Arc<Config>, sender: Sender<OutgoingRecord>) -> Self {
        Self {
            config,
            states: DeviceStates::default(),
            sender,
        }
    }

    /// Never blocks: a full buffer drops the record.
    pub fn handle(&mut self, reading: RawReading) -> Outcome {
        trace!(?reading, "read measurement");

        let record = match self.process(reading) {
            Ok(record) => record,
            Err(rejection) => return Outcome::Rejected(rejection),
        };

        match self.sender.try_send(record) {
            Ok(()) => Outcome::Queued,
            Err(TrySendError::Full(record)) => {
                debug!(mac = %format_mac(&record.mac), "buffer full, dropping measurement");
                Outcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                error!("record channel closed");
                Outcome::Closed
            }
        }
    }

    /// Dew point additionally needs a strictly positive humidity.
    fn valid_humidity(&self, humidity: f64) -> bool {
        if humidity > MAX_HUMIDITY {
            return false;
        }

        !self.config.dewpoint || humidity > 0.0
    }

    fn process(&mut self, reading: RawReading) -> Result<OutgoingRecord, Rejection> {
        let (Some(mac), Some(sequence)) = (reading.mac, reading.sequence()) else {
            error!(?reading, "received measurement without sequence number or MAC");
            return Err(Rejection::Malformed);
        };
        let mac_str = format_mac(&mac);

        if !self.config.accepts(&mac) {
            trace!(mac = %mac_str, "ignoring measurement from unlisted device");
            return Err(Rejection::Filtered);
        }

        if !self.states.observe_sequence(mac, sequence) {
            debug!(mac = %mac_str, sequence, "received duplicate measurement, ignoring");
            return Err(Rejection::Duplicate(sequence));
        }

        match reading.measurements.get(HUMIDITY) {
            Some(None) => {
                error!(mac = %mac_str, sequence, "received null humidity value, ignoring");
                return Err(Rejection::NullHumidity);
            }
            Some(Some(humidity)) if !self.valid_humidity(humidity.as_f64()) => {
                let humidity = humidity.as_f64();
                error!(
                    mac = %mac_str,
                    sequence,
                    "received invalid humidity value {humidity:.2}%, ignoring"
                );
                return Err(Rejection::HumidityOutOfRange(humidity));
            }
            _ => {}
        }

        let movement_counter = reading.movement_counter();
        let mut measurements = self.config.calibration.apply(&mac, reading.measurements);

        if self.config.dewpoint {
            let get = |field: &str| {
                measurements
                    .get(field)
                    .copied()
                    .flatten()
                    .map(|v| v.as_f64())
            };
            let Some(temperature) = get(TEMPERATURE) else {
                error!(mac = %mac_str, sequence, "cannot compute dew point without temperature");
                return Err(Rejection::MissingField(TEMPERATURE));
            };
            let Some(humidity) = get(HUMIDITY) else {
                error!(mac = %mac_str, sequence, "cannot compute dew point without humidity");
                return Err(Rejection::MissingField(HUMIDITY));
            };

            // Calibration can still push humidity out of the range the gate checked.
            let Some(v) = dew_point(temperature, humidity) else {
                error!(
                    mac = %mac_str,
                    sequence,
                    "calibrated humidity {humidity:.2}% has no dew point, ignoring"
                );
                return Err(Rejection::HumidityOutOfRange(humidity));
            };
            measurements.insert(DEW_POINT.to_string(), Some(Value::Float(v)));
        }

        if let Some(counter) = movement_counter {
            let delta = self.states.observe_movement(mac, counter);
            measurements.insert(MOVEMENT_DELTA.to_string(), Some(Value::Integer(delta.into())));
        }

        debug!(mac = %mac_str, ?measurements, "processed measurement");

        Ok(OutgoingRecord {
            mac,
            measurements,
            name: self.config.display_name(&mac),
            timestamp: Utc::now().timestamp_millis(),
        })
    }
}

/// Feeds every reading from `readings` through `ingester`.
///
/// Only returns when the source ends or the buffer's receiving side is gone,
/// both of which are fatal for the gateway.
pub async fn run_ingest<S>(mut ingester: Ingester, mut readings: S) -> Result<()>
where
    S: Stream<Item = RawReading> + Unpin,
{
    info!("ingest stage starting");

    while let Some(reading) = readings.next().await {
        if ingester.handle(reading) == Outcome::Closed {
            bail!("record channel closed");
        }
    }

    bail!("reading source ended")
}
