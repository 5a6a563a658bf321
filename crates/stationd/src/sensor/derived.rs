//! Values computed from a remapped snapshot rather than read from one field.
//!
//! Every function here tolerates missing input and answers `None` instead of
//! failing; a station that stops sending a field must not take other sensors
//! down with it.

use serde::Serialize;
use tracing::error;

use super::keys::OUTSIDE_HUMIDITY;
use super::keys::OUTSIDE_TEMP;
use super::keys::WIND_SPEED;
use super::remap::RemappedPayload;

/// Sixteen-point compass rose, starting at NNE so that index 0 covers
/// `[11.25°, 33.75°)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumIter, strum::AsRefStr,
)]
pub enum CompassDirection {
    NNE,
    NE,
    ENE,
    E,
    ESE,
    SE,
    SSE,
    S,
    SSW,
    SW,
    WSW,
    W,
    WNW,
    NW,
    NNW,
    N,
}

const AZIMUT: [CompassDirection; 16] = [
    CompassDirection::NNE,
    CompassDirection::NE,
    CompassDirection::ENE,
    CompassDirection::E,
    CompassDirection::ESE,
    CompassDirection::SE,
    CompassDirection::SSE,
    CompassDirection::S,
    CompassDirection::SSW,
    CompassDirection::SW,
    CompassDirection::WSW,
    CompassDirection::W,
    CompassDirection::WNW,
    CompassDirection::NW,
    CompassDirection::NNW,
    CompassDirection::N,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BatteryLevel {
    Low,
    Normal,
    Unknown,
}

impl BatteryLevel {
    pub fn icon(self) -> &'static str {
        match self {
            BatteryLevel::Low => "mdi:battery-low",
            BatteryLevel::Normal => "mdi:battery",
            BatteryLevel::Unknown => "mdi:battery-unknown",
        }
    }
}

/// Parse a station value; empty strings and garbage are "no value".
pub fn to_float(raw: Option<&str>) -> Option<f64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn ms_to_mph(ms: f64) -> f64 {
    ms * 2.236_936_292_054_4
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Wind direction in degrees to its compass label.
pub fn wind_dir_to_text(deg: Option<f64>) -> Option<CompassDirection> {
    let deg = deg?;
    let index = ((deg - 11.25).rem_euclid(360.0) / 22.5).floor() as usize;
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    Some(AZIMUT[index.min(AZIMUT.len() - 1)])
}

/// Battery flag (`0`/`1`, possibly as a string) to a battery state.
pub fn battery_level(raw: Option<&str>) -> BatteryLevel {
    match raw.map(str::trim).and_then(|v| v.parse::<i64>().ok()) {
        Some(0) => BatteryLevel::Low,
        Some(1) => BatteryLevel::Normal,
        _ => BatteryLevel::Unknown,
    }
}

/// Heat index in °F from outside temperature and humidity.
///
/// Uses the NOAA simple formula and switches to the Rothfusz regression (with
/// its low- and high-humidity adjustments) once the simple estimate averaged
/// with the temperature exceeds 80 °F. With `convert` the temperature is read
/// as °C.
pub fn heat_index(data: &RemappedPayload, convert: bool) -> Option<f64> {
    let Some(mut temp) = to_float(data.get(OUTSIDE_TEMP).map(String::as_str)) else {
        error!("Missing or invalid outside temperature, cannot calculate heat index");
        return None;
    };
    let Some(rh) = to_float(data.get(OUTSIDE_HUMIDITY).map(String::as_str)) else {
        error!("Missing or invalid outside humidity, cannot calculate heat index");
        return None;
    };

    if convert {
        temp = celsius_to_fahrenheit(temp);
    }

    let simple = 0.5 * (temp + 61.0 + ((temp - 68.0) * 1.2) + (rh * 0.094));
    if (simple + temp) / 2.0 <= 80.0 {
        return Some(round2(simple));
    }

    let mut index = -42.379 + 2.049_015_23 * temp + 10.143_331_27 * rh
        - 0.224_755_41 * temp * rh
        - 0.006_837_83 * temp * temp
        - 0.054_817_17 * rh * rh
        + 0.001_228_74 * temp * temp * rh
        + 0.000_852_82 * temp * rh * rh
        - 0.000_001_99 * temp * temp * rh * rh;

    if rh < 13.0 && (80.0..=112.0).contains(&temp) {
        index -= ((13.0 - rh) / 4.0) * ((17.0 - (temp - 95.0).abs()) / 17.0).sqrt();
    }
    if rh > 80.0 && (80.0..=87.0).contains(&temp) {
        index += ((rh - 85.0) / 10.0) * ((87.0 - temp) / 5.0);
    }

    Some(round2(index))
}

/// Wind chill in °F from outside temperature and wind speed.
///
/// Outside the formula's domain (T ≥ 50 °F or V ≤ 3 mph) the temperature is
/// returned as is. With `convert` the inputs are read as °C and m/s.
pub fn chill_index(data: &RemappedPayload, convert: bool) -> Option<f64> {
    let Some(mut temp) = to_float(data.get(OUTSIDE_TEMP).map(String::as_str)) else {
        error!("Missing or invalid outside temperature, cannot calculate wind chill");
        return None;
    };
    let Some(mut wind) = to_float(data.get(WIND_SPEED).map(String::as_str)) else {
        error!("Missing or invalid wind speed, cannot calculate wind chill");
        return None;
    };

    if convert {
        temp = celsius_to_fahrenheit(temp);
        wind = ms_to_mph(wind);
    }

    if temp < 50.0 && wind > 3.0 {
        let v = wind.powf(0.16);
        Some(round2(35.7 + 0.6215 * temp - 35.75 * v + 0.4275 * temp * v))
    } else {
        Some(temp)
    }
}
