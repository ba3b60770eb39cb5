//! Values computed from a reading rather than measured by the tag.

use crate::ruuvi::round2;

// Buck (1981), https://doi.org/10.1175/1520-0450(1981)020%3C1527:NEFCVP%3E2.0.CO;2
const MAGNUS_ABOVE_ZERO: (f64, f64) = (17.368, 238.88);
const MAGNUS_BELOW_ZERO: (f64, f64) = (17.966, 247.15);

/// A larger jump than this between two consecutive broadcasts means the tag
/// rebooted and restarted its counter.
const MOVEMENT_RESET_THRESHOLD: u16 = 32;

/// Approximate dew point in °C using the Magnus formula, rounded to two
/// decimals.
///
/// Returns `None` when the relative humidity is not positive, where the
/// logarithm is undefined.
pub fn dew_point(temperature: f64, humidity: f64) -> Option<f64> {
    if humidity <= 0.0 || !humidity.is_finite() || !temperature.is_finite() {
        return None;
    }

    let (b, c) = if temperature >= 0.0 {
        MAGNUS_ABOVE_ZERO
    } else {
        MAGNUS_BELOW_ZERO
    };

    let n = (humidity / 100.0).ln() + (b * temperature) / (c + temperature);

    Some(round2((c * n) / (b - n)))
}

/// Number of movements between two readings of the tag's 8-bit wrapping
/// movement counter.
pub fn movement_delta(previous: Option<u8>, current: u8) -> u8 {
    let Some(previous) = previous else {
        return 0;
    };

    let mut delta = current as i16 - previous as i16;
    if delta < 0 {
        delta += 256;
    }

    if delta as u16 >= MOVEMENT_RESET_THRESHOLD {
        return 0;
    }

    delta as u8
}
