//! Stable internal sensor keys.
//!
//! Both vendor dialects remap onto these identifiers, and the persisted
//! enabled-sensor list stores them verbatim, so renaming one is a breaking
//! change for existing state files.

pub const BARO_PRESSURE: &str = "baro_pressure";
pub const OUTSIDE_TEMP: &str = "outside_temp";
pub const DEW_POINT: &str = "dew_point";
pub const OUTSIDE_HUMIDITY: &str = "outside_humidity";
pub const WIND_SPEED: &str = "wind_speed";
pub const WIND_GUST: &str = "wind_gust";
pub const WIND_DIR: &str = "wind_dir";
pub const WIND_AZIMUT: &str = "wind_azimut";
pub const RAIN: &str = "rain";
pub const HOURLY_RAIN: &str = "hourly_rain";
pub const DAILY_RAIN: &str = "daily_rain";
pub const WEEKLY_RAIN: &str = "weekly_rain";
pub const MONTHLY_RAIN: &str = "monthly_rain";
pub const YEARLY_RAIN: &str = "yearly_rain";
pub const SOLAR_RADIATION: &str = "solar_radiation";
pub const INDOOR_TEMP: &str = "indoor_temp";
pub const INDOOR_HUMIDITY: &str = "indoor_humidity";
pub const UV: &str = "uv";
pub const CH2_TEMP: &str = "ch2_temp";
pub const CH2_HUMIDITY: &str = "ch2_humidity";
pub const CH3_TEMP: &str = "ch3_temp";
pub const CH3_HUMIDITY: &str = "ch3_humidity";
pub const HEAT_INDEX: &str = "heat_index";
pub const CHILL_INDEX: &str = "chill_index";
pub const OUTSIDE_BATTERY: &str = "outside_battery";
pub const INDOOR_BATTERY: &str = "indoor_battery";
pub const CH2_BATTERY: &str = "ch2_battery";
