//! Static sensor descriptions for each dialect.
//!
//! A description says how to read one sensor out of a remapped snapshot and
//! which unit and classes to report alongside the value.

use serde::Serialize;

use super::derived;
use super::derived::BatteryLevel;
use super::derived::CompassDirection;
use super::keys::*;
use super::remap::Dialect;
use super::remap::RemappedPayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceClass {
    Temperature,
    Humidity,
    AtmosphericPressure,
    WindSpeed,
    Precipitation,
    PrecipitationIntensity,
    Irradiance,
    Enum,
    Battery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StateClass {
    Measurement,
    Total,
    TotalIncreasing,
}

/// How a sensor derives its value from the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    /// The field under the sensor's own key, parsed as a float.
    Float,
    /// The field under the sensor's own key, truncated to an integer.
    Int,
    /// Compass label computed from `wind_dir`.
    WindAzimut,
    /// Reported heat index if present, otherwise computed.
    HeatIndex,
    /// Reported wind chill if present, otherwise computed.
    ChillIndex,
    /// Battery flag mapped to a level.
    Battery,
}

/// A sensor reading as exposed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Float(f64),
    Int(i64),
    Direction(CompassDirection),
    Battery(BatteryLevel),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDescription {
    pub key: &'static str,
    pub unit: Option<&'static str>,
    pub device_class: Option<DeviceClass>,
    pub state_class: Option<StateClass>,
    pub icon: &'static str,
    pub source: ValueSource,
}

impl SensorDescription {
    /// Read this sensor's value out of a snapshot.
    ///
    /// Empty strings and unparsable values are "no value"; `dialect` decides
    /// whether computed indices are reported in °C or °F.
    pub fn value(&self, data: &RemappedPayload, dialect: Dialect) -> Option<SensorValue> {
        let raw = data.get(self.key).map(String::as_str);
        match self.source {
            ValueSource::Float => derived::to_float(raw).map(SensorValue::Float),
            ValueSource::Int => derived::to_float(raw).map(|v| SensorValue::Int(v.trunc() as i64)),
            ValueSource::WindAzimut => {
                let deg = derived::to_float(data.get(WIND_DIR).map(String::as_str));
                derived::wind_dir_to_text(deg).map(SensorValue::Direction)
            }
            ValueSource::HeatIndex => derived::to_float(raw)
                .or_else(|| computed_index(derived::heat_index(data, dialect.is_metric()), dialect))
                .map(SensorValue::Float),
            ValueSource::ChillIndex => derived::to_float(raw)
                .or_else(|| computed_index(derived::chill_index(data, dialect.is_metric()), dialect))
                .map(SensorValue::Float),
            ValueSource::Battery => Some(SensorValue::Battery(derived::battery_level(raw))),
        }
    }

    /// Icon for the current value; battery sensors follow their level.
    pub fn icon_for(&self, value: Option<&SensorValue>) -> &'static str {
        match (self.source, value) {
            (ValueSource::Battery, Some(SensorValue::Battery(level))) => level.icon(),
            (ValueSource::Battery, _) => BatteryLevel::Unknown.icon(),
            _ => self.icon,
        }
    }
}

/// Derived indices are computed in °F; metric stations report °C.
fn computed_index(fahrenheit: Option<f64>, dialect: Dialect) -> Option<f64> {
    let fahrenheit = fahrenheit?;
    if dialect.is_metric() {
        Some((derived::fahrenheit_to_celsius(fahrenheit) * 100.0).round() / 100.0)
    } else {
        Some(fahrenheit)
    }
}

const fn describe(
    key: &'static str,
    unit: Option<&'static str>,
    device_class: Option<DeviceClass>,
    state_class: Option<StateClass>,
    icon: &'static str,
    source: ValueSource,
) -> SensorDescription {
    SensorDescription {
        key,
        unit,
        device_class,
        state_class,
        icon,
        source,
    }
}

use DeviceClass as D;
use StateClass as S;
use ValueSource as V;

const MEASURE: Option<StateClass> = Some(S::Measurement);

pub static WEATHER_UNDERGROUND_SENSORS: &[SensorDescription] = &[
    describe(INDOOR_TEMP, Some("°F"), Some(D::Temperature), MEASURE, "mdi:thermometer", V::Float),
    describe(INDOOR_HUMIDITY, Some("%"), Some(D::Humidity), MEASURE, "mdi:thermometer", V::Int),
    describe(OUTSIDE_TEMP, Some("°F"), Some(D::Temperature), MEASURE, "mdi:thermometer", V::Float),
    describe(OUTSIDE_HUMIDITY, Some("%"), Some(D::Humidity), MEASURE, "mdi:thermometer", V::Int),
    describe(DEW_POINT, Some("°F"), Some(D::Temperature), MEASURE, "mdi:thermometer-lines", V::Float),
    describe(BARO_PRESSURE, Some("inHg"), Some(D::AtmosphericPressure), MEASURE, "mdi:thermometer-lines", V::Float),
    describe(WIND_SPEED, Some("mph"), Some(D::WindSpeed), MEASURE, "mdi:weather-windy", V::Float),
    describe(WIND_GUST, Some("mph"), Some(D::WindSpeed), MEASURE, "mdi:windsock", V::Float),
    describe(WIND_DIR, Some("°"), None, MEASURE, "mdi:sign-direction", V::Int),
    describe(WIND_AZIMUT, None, Some(D::Enum), None, "mdi:sign-direction", V::WindAzimut),
    describe(RAIN, Some("in/h"), Some(D::PrecipitationIntensity), MEASURE, "mdi:weather-pouring", V::Float),
    describe(DAILY_RAIN, Some("in/d"), Some(D::PrecipitationIntensity), MEASURE, "mdi:weather-pouring", V::Float),
    describe(SOLAR_RADIATION, Some("W/m²"), Some(D::Irradiance), MEASURE, "mdi:weather-sunny", V::Float),
    describe(UV, Some("UV index"), None, MEASURE, "mdi:sunglasses", V::Float),
    describe(CH2_TEMP, Some("°F"), Some(D::Temperature), MEASURE, "mdi:weather-sunny", V::Float),
    describe(CH2_HUMIDITY, Some("%"), Some(D::Humidity), MEASURE, "mdi:weather-sunny", V::Int),
    describe(HEAT_INDEX, Some("°F"), Some(D::Temperature), MEASURE, "mdi:weather-sunny", V::HeatIndex),
    describe(CHILL_INDEX, Some("°F"), Some(D::Temperature), MEASURE, "mdi:weather-sunny", V::ChillIndex),
];

pub static WSLINK_SENSORS: &[SensorDescription] = &[
    describe(INDOOR_TEMP, Some("°C"), Some(D::Temperature), MEASURE, "mdi:thermometer", V::Float),
    describe(INDOOR_HUMIDITY, Some("%"), Some(D::Humidity), MEASURE, "mdi:thermometer", V::Int),
    describe(OUTSIDE_TEMP, Some("°C"), Some(D::Temperature), MEASURE, "mdi:thermometer", V::Float),
    describe(OUTSIDE_HUMIDITY, Some("%"), Some(D::Humidity), MEASURE, "mdi:thermometer", V::Int),
    describe(DEW_POINT, Some("°C"), Some(D::Temperature), MEASURE, "mdi:thermometer-lines", V::Float),
    describe(BARO_PRESSURE, Some("hPa"), Some(D::AtmosphericPressure), MEASURE, "mdi:thermometer-lines", V::Float),
    describe(WIND_SPEED, Some("m/s"), Some(D::WindSpeed), MEASURE, "mdi:weather-windy", V::Float),
    describe(WIND_GUST, Some("m/s"), Some(D::WindSpeed), MEASURE, "mdi:windsock", V::Float),
    describe(WIND_DIR, Some("°"), None, MEASURE, "mdi:sign-direction", V::Int),
    describe(WIND_AZIMUT, None, Some(D::Enum), None, "mdi:sign-direction", V::WindAzimut),
    describe(RAIN, Some("mm"), Some(D::Precipitation), Some(S::Total), "mdi:weather-pouring", V::Float),
    describe(HOURLY_RAIN, Some("mm/h"), Some(D::PrecipitationIntensity), MEASURE, "mdi:weather-pouring", V::Float),
    describe(DAILY_RAIN, Some("mm/h"), Some(D::PrecipitationIntensity), MEASURE, "mdi:weather-pouring", V::Float),
    describe(WEEKLY_RAIN, Some("mm"), Some(D::Precipitation), Some(S::TotalIncreasing), "mdi:weather-pouring", V::Float),
    describe(MONTHLY_RAIN, Some("mm"), Some(D::Precipitation), Some(S::TotalIncreasing), "mdi:weather-pouring", V::Float),
    describe(YEARLY_RAIN, Some("mm"), Some(D::Precipitation), Some(S::TotalIncreasing), "mdi:weather-pouring", V::Float),
    describe(SOLAR_RADIATION, Some("W/m²"), Some(D::Irradiance), MEASURE, "mdi:weather-sunny", V::Float),
    describe(UV, Some("UV index"), None, MEASURE, "mdi:sunglasses", V::Float),
    describe(CH2_TEMP, Some("°C"), Some(D::Temperature), MEASURE, "mdi:weather-sunny", V::Float),
    describe(CH2_HUMIDITY, Some("%"), Some(D::Humidity), MEASURE, "mdi:weather-sunny", V::Int),
    describe(CH3_TEMP, Some("°C"), Some(D::Temperature), MEASURE, "mdi:weather-sunny", V::Float),
    describe(CH3_HUMIDITY, Some("%"), Some(D::Humidity), MEASURE, "mdi:weather-sunny", V::Int),
    describe(HEAT_INDEX, Some("°C"), Some(D::Temperature), MEASURE, "mdi:weather-sunny", V::HeatIndex),
    describe(CHILL_INDEX, Some("°C"), Some(D::Temperature), MEASURE, "mdi:weather-sunny", V::ChillIndex),
    describe(OUTSIDE_BATTERY, None, Some(D::Enum), None, "mdi:battery-unknown", V::Battery),
    describe(INDOOR_BATTERY, None, Some(D::Enum), None, "mdi:battery-unknown", V::Battery),
    describe(CH2_BATTERY, None, Some(D::Enum), None, "mdi:battery-unknown", V::Battery),
];

impl Dialect {
    pub fn sensors(self) -> &'static [SensorDescription] {
        match self {
            Dialect::WeatherUnderground => WEATHER_UNDERGROUND_SENSORS,
            Dialect::WsLink => WSLINK_SENSORS,
        }
    }

    pub fn description(self, key: &str) -> Option<&'static SensorDescription> {
        self.sensors().iter().find(|d| d.key == key)
    }
}
