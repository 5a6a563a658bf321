use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use super::diagnostics::{
    format_diagnostics, ConfigError, Diagnostic, Error, SourceInfo, ValidationError, Warning,
};
use super::partial::PartialConfig;
use crate::options::Options;
use crate::options::PocasiOptions;
use crate::options::WindyOptions;
use crate::options::POCASI_MIN_INTERVAL;

pub const DEFAULT_LISTEN: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8565;
pub const DEFAULT_LANGUAGE: &str = "en";

/// Values people paste in from the setup form instead of real credentials.
pub const INVALID_CREDENTIALS: &[&str] = &[
    "API", "API_ID", "API ID", "_ID", "ID", "API KEY", "API_KEY", "KEY", "_KEY",
];

#[derive(Debug, Default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub station: StationConfig,
    pub windy: WindyOptions,
    pub pocasi: PocasiOptions,
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    /// Per-target levels, e.g. `"stationd::push" = "debug"`
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Subscriber filter for these settings.
    pub fn targets(&self) -> Targets {
        self.overrides.iter().fold(
            Targets::new().with_default(LevelFilter::from(self.level)),
            |targets, (target, level)| targets.with_target(target.clone(), LevelFilter::from(*level)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: String,
    pub port: u16,
    /// JSON file holding live options. Options live in memory only when unset.
    pub state_file: Option<PathBuf>,
    /// Notification and entity name language.
    pub language: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            port: DEFAULT_PORT,
            state_file: None,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationConfig {
    pub api_id: Option<String>,
    pub api_key: Option<String>,
    pub wslink: bool,
    pub dev_debug: bool,
}

impl Config {
    /// Load configuration from multiple TOML files with import resolution
    ///
    /// Returns Ok((Config, diagnostics)) where diagnostics contains warnings.
    /// Only returns Err if there are actual errors (not just warnings).
    pub fn from_files(paths: &[PathBuf]) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let configs = PartialConfig::load_with_imports(paths)?;

        // Merge with first-wins semantics, collecting diagnostics
        let (partial, diagnostics) = PartialConfig::merge(configs);

        Self::from_partial(partial, diagnostics)
    }

    /// Convert a PartialConfig to a Config, validating all fields
    ///
    /// Takes diagnostics from the merge step and adds validation diagnostics.
    pub fn from_partial(
        partial: PartialConfig,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let logging = partial
            .logging
            .map(|l| LoggingConfig {
                level: l.level.map(|s| *s.get_ref()).unwrap_or_default(),
                overrides: l
                    .overrides
                    .into_iter()
                    .map(|(k, v)| (k, v.into_inner()))
                    .collect(),
            })
            .unwrap_or_default();

        let server = partial
            .server
            .map(|s| {
                let defaults = ServerConfig::default();
                ServerConfig {
                    listen: s.listen.map(|v| v.into_inner()).unwrap_or(defaults.listen),
                    port: s.port.map(|v| v.into_inner()).unwrap_or(defaults.port),
                    state_file: s.state_file.map(|v| PathBuf::from(v.into_inner())),
                    language: s.language.map(|v| v.into_inner()).unwrap_or(defaults.language),
                }
            })
            .unwrap_or_default();

        let station = partial
            .station
            .map(|s| StationConfig {
                api_id: s.api_id.map(|v| v.into_inner()),
                api_key: s.api_key.map(|v| v.into_inner()),
                wslink: s.wslink.map(|v| v.into_inner()).unwrap_or_default(),
                dev_debug: s.dev_debug.map(|v| v.into_inner()).unwrap_or_default(),
            })
            .unwrap_or_default();

        let windy = partial
            .windy
            .map(|w| {
                let defaults = WindyOptions::default();
                WindyOptions {
                    enabled: w.enabled.map(|v| v.into_inner()).unwrap_or(defaults.enabled),
                    station_id: w.station_id.map(|v| v.into_inner()),
                    station_pw: w.station_pw.map(|v| v.into_inner()),
                    logger: w.logger.map(|v| v.into_inner()).unwrap_or(defaults.logger),
                    url: w.url.map(|v| v.into_inner()).unwrap_or(defaults.url),
                }
            })
            .unwrap_or_default();

        let pocasi = partial
            .pocasi
            .map(|p| {
                let defaults = PocasiOptions::default();
                PocasiOptions {
                    enabled: p.enabled.map(|v| v.into_inner()).unwrap_or(defaults.enabled),
                    api_id: p.api_id.map(|v| v.into_inner()),
                    api_key: p.api_key.map(|v| v.into_inner()),
                    send_interval: p
                        .send_interval
                        .map(|v| v.into_inner())
                        .unwrap_or(defaults.send_interval),
                    logger: p.logger.map(|v| v.into_inner()).unwrap_or(defaults.logger),
                    url: p.url.map(|v| v.into_inner()).unwrap_or(defaults.url),
                }
            })
            .unwrap_or_default();

        let mut config = Config {
            logging,
            server,
            station,
            windy,
            pocasi,
        };

        let located = |field_path: &str, message: String| {
            let location = partial.locations.get(field_path);
            Diagnostic::Error(Error::Validation(ValidationError {
                field_path: field_path.to_string(),
                message,
                span: location.map(|l| l.span.clone()),
                source: location.map(|l| SourceInfo {
                    file_path: l.file_path.clone(),
                    content: l.content.clone(),
                }),
            }))
        };

        for (field_path, message) in config.validate() {
            diagnostics.push(located(&field_path, message));
        }
        config.warnings(&mut diagnostics);

        if diagnostics.iter().any(|d| d.is_error()) {
            Err(ConfigError::Invalid(format_diagnostics(&diagnostics)))
        } else {
            Ok((config, diagnostics))
        }
    }

    /// Cross-field checks; returns (field path, message) per failure.
    pub fn validate(&self) -> Vec<(String, String)> {
        let mut errors = Vec::new();

        let placeholder = |value: &Option<String>| {
            value
                .as_deref()
                .is_some_and(|v| INVALID_CREDENTIALS.contains(&v))
        };
        if placeholder(&self.station.api_id) {
            errors.push((
                "station.api_id".to_string(),
                "API ID is a placeholder, enter the ID configured on the station".to_string(),
            ));
        }
        if placeholder(&self.station.api_key) {
            errors.push((
                "station.api_key".to_string(),
                "API key is a placeholder, enter the key configured on the station".to_string(),
            ));
        }
        if self.station.api_id.is_some() && self.station.api_id == self.station.api_key {
            errors.push((
                "station.api_key".to_string(),
                "API ID and API key must not be the same".to_string(),
            ));
        }

        if self.windy.enabled {
            if self.windy.station_id.is_none() {
                errors.push((
                    "windy.enabled".to_string(),
                    "windy.station_id is required when Windy is enabled".to_string(),
                ));
            }
            if self.windy.station_pw.is_none() {
                errors.push((
                    "windy.enabled".to_string(),
                    "windy.station_pw is required when Windy is enabled".to_string(),
                ));
            }
        }

        if self.pocasi.enabled {
            if self.pocasi.api_id.is_none() {
                errors.push((
                    "pocasi.enabled".to_string(),
                    "pocasi.api_id is required when Pocasi Meteo is enabled".to_string(),
                ));
            }
            if self.pocasi.api_key.is_none() {
                errors.push((
                    "pocasi.enabled".to_string(),
                    "pocasi.api_key is required when Pocasi Meteo is enabled".to_string(),
                ));
            }
        }

        errors
    }

    fn warnings(&mut self, diagnostics: &mut Vec<Diagnostic>) {
        for (field_path, value) in [
            ("station.api_id", &self.station.api_id),
            ("station.api_key", &self.station.api_key),
        ] {
            if value.is_none() {
                diagnostics.push(Diagnostic::Warning(Warning::CredentialsUnset {
                    field_path: field_path.to_string(),
                }));
            }
        }

        if self.pocasi.send_interval < POCASI_MIN_INTERVAL {
            diagnostics.push(Diagnostic::Warning(Warning::IntervalClamped {
                field_path: "pocasi.send_interval".to_string(),
                requested: self.pocasi.send_interval,
                minimum: POCASI_MIN_INTERVAL,
            }));
            self.pocasi.send_interval = POCASI_MIN_INTERVAL;
        }
    }

    /// The options-flow form this configuration submits.
    pub fn to_options(&self) -> Options {
        Options {
            api_id: self.station.api_id.clone(),
            api_key: self.station.api_key.clone(),
            wslink: self.station.wslink,
            dev_debug: self.station.dev_debug,
            sensors_to_load: Vec::new(),
            windy: self.windy.clone(),
            pocasi: self.pocasi.clone(),
        }
    }
}
