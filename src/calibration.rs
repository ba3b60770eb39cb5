use std::{collections::HashMap, str::FromStr};

use anyhow::{Context as _, Error, Result, bail};
use macaddr::MacAddr6;

use crate::ruuvi::{Measurements, Value, round2};

/// Prefix of the key that keeps the uncalibrated value next to a calibrated one.
pub const RAW_PREFIX: &str = "raw-";

/// Polynomial with coefficients ordered from the highest degree down to the
/// constant term, so `[1.0, 1.5]` is `f(x) = x + 1.5`.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coefficients: Vec<f64>,
}

impl Polynomial {
    pub fn new(coefficients: Vec<f64>) -> Result<Self> {
        if coefficients.is_empty() {
            bail!("polynomial needs at least one coefficient");
        }
        if let Some(c) = coefficients.iter().find(|c| !c.is_finite()) {
            bail!("polynomial coefficient {c} is not finite");
        }

        Ok(Self { coefficients })
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        self.coefficients.iter().fold(0.0, |acc, c| acc * x + c)
    }
}

impl FromStr for Polynomial {
    type Err = Error;

    /// Parses comma separated coefficients, e.g. `0.98,1.01,0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let coefficients = s
            .split(',')
            .map(|c| {
                c.trim()
                    .parse::<f64>()
                    .with_context(|| format!("invalid polynomial coefficient: {c:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Polynomial::new(coefficients)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalibrationTable {
    devices: HashMap<MacAddr6, HashMap<String, Polynomial>>,
}

impl CalibrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a polynomial, returning the one it replaced.
    pub fn insert(
        &mut self,
        mac: MacAddr6,
        measurement: &str,
        polynomial: Polynomial,
    ) -> Option<Polynomial> {
        self.devices
            .entry(mac)
            .or_default()
            .insert(measurement.to_lowercase(), polynomial)
    }

    pub fn get(&self, mac: &MacAddr6, measurement: &str) -> Option<&Polynomial> {
        self.devices.get(mac)?.get(measurement)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Applies the device's polynomials to `measurements`.
    ///
    /// A calibrated field keeps its key and position; the raw value follows it
    /// under `raw-<field>`. Null fields and fields without a polynomial pass
    /// through untouched.
    pub fn apply(&self, mac: &MacAddr6, measurements: Measurements) -> Measurements {
        let Some(polynomials) = self.devices.get(mac) else {
            return measurements;
        };

        let mut calibrated = Measurements::with_capacity(measurements.len() + polynomials.len());
        for (field, value) in measurements {
            if let Some(polynomial) = polynomials.get(&field)
                && let Some(raw) = value
            {
                let v = round2(polynomial.evaluate(raw.as_f64()));
                let raw_field = format!("{RAW_PREFIX}{field}");
                calibrated.insert(field, Some(Value::Float(v)));
                calibrated.insert(raw_field, Some(raw));
            } else {
                calibrated.insert(field, value);
            }
        }

        calibrated
    }
}
