//! Vendor field names to internal sensor keys.
//!
//! The console speaks one of two dialects. The legacy one is the Weather
//! Underground upload protocol (imperial units, `ID`/`PASSWORD` credentials);
//! the newer WSLink protocol uses metric units and `wsid`/`wspw`. Only fields
//! listed in the dialect's table survive remapping; stations routinely send
//! diagnostic extras that we have no sensor for.

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use super::keys::*;

/// Query parameters exactly as the station sent them, in request order.
pub type RawPayload = IndexMap<String, String>;

/// Readings keyed by internal sensor key, in payload order.
pub type RemappedPayload = IndexMap<String, String>;

/// Path the legacy (Weather Underground style) firmware pushes to.
pub const DEFAULT_URL: &str = "/weatherstation/updateweatherstation.php";

/// Path the WSLink firmware pushes to.
pub const WSLINK_URL: &str = "/data/upload.php";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    #[strum(serialize = "WU")]
    WeatherUnderground,
    #[strum(serialize = "WSLINK")]
    WsLink,
}

const WEATHER_UNDERGROUND_ITEMS: &[(&str, &str)] = &[
    ("baromin", BARO_PRESSURE),
    ("tempf", OUTSIDE_TEMP),
    ("dewptf", DEW_POINT),
    ("humidity", OUTSIDE_HUMIDITY),
    ("windspeedmph", WIND_SPEED),
    ("windgustmph", WIND_GUST),
    ("winddir", WIND_DIR),
    ("rainin", RAIN),
    ("dailyrainin", DAILY_RAIN),
    ("solarradiation", SOLAR_RADIATION),
    ("indoortempf", INDOOR_TEMP),
    ("indoorhumidity", INDOOR_HUMIDITY),
    ("UV", UV),
    ("soiltempf", CH2_TEMP),
    ("soilmoisture", CH2_HUMIDITY),
];

const WSLINK_ITEMS: &[(&str, &str)] = &[
    ("intem", INDOOR_TEMP),
    ("inhum", INDOOR_HUMIDITY),
    ("t1tem", OUTSIDE_TEMP),
    ("t1hum", OUTSIDE_HUMIDITY),
    ("t1dew", DEW_POINT),
    ("t1wdir", WIND_DIR),
    ("t1ws", WIND_SPEED),
    ("t1wgust", WIND_GUST),
    ("t1rainra", RAIN),
    ("t1rainhr", HOURLY_RAIN),
    ("t1raindy", DAILY_RAIN),
    ("t1rainwy", WEEKLY_RAIN),
    ("t1rainmth", MONTHLY_RAIN),
    ("t1rainyr", YEARLY_RAIN),
    ("t1solrad", SOLAR_RADIATION),
    ("rbar", BARO_PRESSURE),
    ("t1uvi", UV),
    ("t1heat", HEAT_INDEX),
    ("t1chill", CHILL_INDEX),
    ("t234c1tem", CH2_TEMP),
    ("t234c1hum", CH2_HUMIDITY),
    ("t234c2tem", CH3_TEMP),
    ("t234c2hum", CH3_HUMIDITY),
    ("t1bat", OUTSIDE_BATTERY),
    ("inbat", INDOOR_BATTERY),
    ("t234c1bat", CH2_BATTERY),
];

impl Dialect {
    pub fn from_wslink(wslink: bool) -> Self {
        if wslink {
            Dialect::WsLink
        } else {
            Dialect::WeatherUnderground
        }
    }

    /// Webhook path this dialect's firmware pushes to.
    pub fn url_path(self) -> &'static str {
        match self {
            Dialect::WeatherUnderground => DEFAULT_URL,
            Dialect::WsLink => WSLINK_URL,
        }
    }

    /// Names of the (id, key) query parameters carrying station credentials.
    pub fn credential_fields(self) -> (&'static str, &'static str) {
        match self {
            Dialect::WeatherUnderground => ("ID", "PASSWORD"),
            Dialect::WsLink => ("wsid", "wspw"),
        }
    }

    /// Vendor field → sensor key lookup table.
    pub fn table(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Dialect::WeatherUnderground => WEATHER_UNDERGROUND_ITEMS,
            Dialect::WsLink => WSLINK_ITEMS,
        }
    }

    pub fn sensor_key(self, field: &str) -> Option<&'static str> {
        self.table()
            .iter()
            .find(|(vendor, _)| *vendor == field)
            .map(|(_, key)| *key)
    }

    /// Whether values arrive in metric units.
    pub fn is_metric(self) -> bool {
        matches!(self, Dialect::WsLink)
    }
}

/// Remap a raw payload into internal sensor keys, dropping unknown fields.
///
/// Values are passed through untouched; parsing and unit handling happen when a
/// sensor reads the snapshot.
pub fn remap(dialect: Dialect, raw: &RawPayload) -> RemappedPayload {
    raw.iter()
        .filter_map(|(field, value)| {
            dialect
                .sensor_key(field)
                .map(|key| (key.to_string(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, &str)]) -> RawPayload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_remap_weather_underground() {
        let raw = payload(&[
            ("ID", "station"),
            ("PASSWORD", "secret"),
            ("tempf", "71.2"),
            ("humidity", "48"),
            ("winddir", "270"),
            ("action", "updateraw"),
        ]);

        let remapped = remap(Dialect::WeatherUnderground, &raw);

        assert_eq!(remapped.len(), 3);
        assert_eq!(remapped.get(OUTSIDE_TEMP).map(String::as_str), Some("71.2"));
        assert_eq!(remapped.get(OUTSIDE_HUMIDITY).map(String::as_str), Some("48"));
        assert_eq!(remapped.get(WIND_DIR).map(String::as_str), Some("270"));
    }

    #[test]
    fn test_remap_wslink() {
        let raw = payload(&[
            ("wsid", "station"),
            ("wspw", "secret"),
            ("t1tem", "21.5"),
            ("t1ws", "3.4"),
            ("t1bat", "1"),
            ("tempf", "70.0"),
        ]);

        let remapped = remap(Dialect::WsLink, &raw);

        assert_eq!(
            remapped.keys().map(String::as_str).collect::<Vec<_>>(),
            vec![OUTSIDE_TEMP, WIND_SPEED, OUTSIDE_BATTERY]
        );
    }

    #[test]
    fn test_remap_drops_unknown_keys() {
        for dialect in [Dialect::WeatherUnderground, Dialect::WsLink] {
            let raw = payload(&[("softwaretype", "EasyWeather"), ("rtfreq", "5"), ("freq", "868M")]);
            assert!(remap(dialect, &raw).is_empty());
        }
    }

    #[test]
    fn test_remap_keeps_every_table_entry_unmodified() {
        for dialect in [Dialect::WeatherUnderground, Dialect::WsLink] {
            let raw: RawPayload = dialect
                .table()
                .iter()
                .enumerate()
                .map(|(i, (vendor, _))| (vendor.to_string(), format!("{i}.5")))
                .collect();

            let remapped = remap(dialect, &raw);

            assert_eq!(remapped.len(), dialect.table().len());
            for (i, (_, key)) in dialect.table().iter().enumerate() {
                assert_eq!(remapped.get(*key), Some(&format!("{i}.5")));
            }
        }
    }

    #[test]
    fn test_dialect_credentials_and_paths() {
        assert_eq!(Dialect::from_wslink(false).url_path(), DEFAULT_URL);
        assert_eq!(Dialect::from_wslink(true).url_path(), WSLINK_URL);
        assert_eq!(
            Dialect::WeatherUnderground.credential_fields(),
            ("ID", "PASSWORD")
        );
        assert_eq!(Dialect::WsLink.credential_fields(), ("wsid", "wspw"));
        assert_eq!(Dialect::WsLink.to_string(), "WSLINK");
    }
}
