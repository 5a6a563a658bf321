use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use toml::Spanned;

use super::diagnostics::{
    Diagnostic, Error, LoadError, MergeConflictLocation, MergeError, SourceInfo, Warning,
};
use super::LogLevel;

#[derive(Debug, Default, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub imports: Vec<String>,

    pub logging: Option<PartialLoggingConfig>,
    pub server: Option<PartialServerConfig>,
    pub station: Option<PartialStationConfig>,
    pub windy: Option<PartialWindyConfig>,
    pub pocasi: Option<PartialPocasiConfig>,

    /// Source information for error reporting (not serialized)
    #[serde(skip)]
    pub source: Option<SourceInfo>,

    /// Where each merged field was set, keyed by dotted field path
    #[serde(skip)]
    pub locations: HashMap<String, MergeConflictLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialLoggingConfig {
    pub level: Option<Spanned<LogLevel>>,
    #[serde(default)]
    pub overrides: HashMap<String, Spanned<LogLevel>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialServerConfig {
    pub listen: Option<Spanned<String>>,
    pub port: Option<Spanned<u16>>,
    pub state_file: Option<Spanned<String>>,
    pub language: Option<Spanned<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialStationConfig {
    pub api_id: Option<Spanned<String>>,
    pub api_key: Option<Spanned<String>>,
    pub wslink: Option<Spanned<bool>>,
    pub dev_debug: Option<Spanned<bool>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialWindyConfig {
    pub enabled: Option<Spanned<bool>>,
    pub station_id: Option<Spanned<String>>,
    pub station_pw: Option<Spanned<String>>,
    pub logger: Option<Spanned<bool>>,
    pub url: Option<Spanned<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialPocasiConfig {
    pub enabled: Option<Spanned<bool>>,
    pub api_id: Option<Spanned<String>>,
    pub api_key: Option<Spanned<String>>,
    pub send_interval: Option<Spanned<u64>>,
    pub logger: Option<Spanned<bool>>,
    pub url: Option<Spanned<String>>,
}

/// First-wins bookkeeping shared by every merged field.
#[derive(Default)]
struct Merger {
    seen: HashMap<String, MergeConflictLocation>,
    diagnostics: Vec<Diagnostic>,
}

impl Merger {
    /// Keep `incoming` in `slot` unless an earlier file already set
    /// `field_path`, in which case record a conflict and keep the first value.
    fn field<T>(
        &mut self,
        field_path: &str,
        source: &SourceInfo,
        incoming: Option<Spanned<T>>,
        slot: &mut Option<Spanned<T>>,
    ) {
        let Some(value) = incoming else {
            return;
        };
        let location = MergeConflictLocation {
            file_path: source.file_path.clone(),
            span: value.span(),
            content: source.content.clone(),
        };

        if let Some(prev) = self.seen.get(field_path) {
            self.diagnostics.push(Diagnostic::Error(Error::Merge(MergeError {
                field_path: field_path.to_string(),
                message: format!("'{}' defined in multiple config files", field_path),
                conflicts: vec![prev.clone(), location],
            })));
        } else {
            *slot = Some(value);
            self.seen.insert(field_path.to_string(), location);
        }
    }
}

impl PartialConfig {
    /// Load a single config file without processing imports
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io {
            path: path.to_path_buf(),
            error: e,
        })?;

        let mut config: PartialConfig = toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.to_path_buf(),
            error: e,
        })?;

        config.source = Some(SourceInfo {
            file_path: path.to_path_buf(),
            content,
        });

        Ok(config)
    }

    /// Load config files with import resolution
    ///
    /// Each config file is loaded, then its imports are recursively processed.
    /// Cycle detection prevents infinite loops.
    ///
    /// Returns a Vec of all loaded configs in order (imports first, then parent)
    pub fn load_with_imports(paths: &[PathBuf]) -> Result<Vec<Self>, LoadError> {
        let mut visited = HashSet::new();
        let mut all_configs = Vec::new();

        for path in paths {
            Self::load_recursive(path, &mut visited, &mut all_configs)?;
        }

        Ok(all_configs)
    }

    fn load_recursive(
        path: &Path,
        visited: &mut HashSet<PathBuf>,
        configs: &mut Vec<Self>,
    ) -> Result<(), LoadError> {
        let canonical_path = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());

        if visited.contains(&canonical_path) {
            return Err(LoadError::ImportCycle {
                path: canonical_path.clone(),
                cycle: visited.iter().cloned().collect(),
            });
        }

        visited.insert(canonical_path.clone());

        let config = Self::from_file(path)?;

        // Imports are resolved depth-first, relative to the importing file
        for import_path in &config.imports {
            let import_path_buf = PathBuf::from(import_path);
            let resolved_path = if import_path_buf.is_absolute() {
                import_path_buf
            } else {
                let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
                parent_dir.join(import_path_buf)
            };

            Self::load_recursive(&resolved_path, visited, configs)?;
        }

        configs.push(config);

        // Sibling branches may import the same file
        visited.remove(&canonical_path);

        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.logging.is_none()
            && self.server.is_none()
            && self.station.is_none()
            && self.windy.is_none()
            && self.pocasi.is_none()
            && self.imports.is_empty()
    }

    /// Merge multiple partial configs together
    ///
    /// Uses first-wins semantics: the first occurrence of a field is kept.
    /// Conflicts (same field defined in multiple configs) are collected as errors
    /// but merging continues to find all conflicts at once.
    ///
    /// Returns (merged, diagnostics) where diagnostics may contain warnings and errors
    pub fn merge<I>(configs: I) -> (Self, Vec<Diagnostic>)
    where
        I: IntoIterator<Item = Self>,
    {
        let mut result = PartialConfig::default();
        let mut m = Merger::default();
        let mut imports = Vec::new();

        for config in configs {
            imports.extend(config.imports.clone());

            let source = config.source.clone().unwrap_or_else(|| SourceInfo {
                file_path: PathBuf::from("<unknown>"),
                content: String::new(),
            });

            if config.is_empty() {
                m.diagnostics.push(Diagnostic::Warning(Warning::EmptyConfig {
                    file_path: source.file_path.clone(),
                }));
            }

            if let Some(logging) = config.logging {
                let target = result.logging.get_or_insert_with(Default::default);
                m.field("logging.level", &source, logging.level, &mut target.level);

                for (key, value) in logging.overrides {
                    let mut slot = None;
                    m.field(
                        &format!("logging.overrides.{}", key),
                        &source,
                        Some(value),
                        &mut slot,
                    );
                    if let Some(value) = slot {
                        target.overrides.insert(key, value);
                    }
                }
            }

            if let Some(server) = config.server {
                let target = result.server.get_or_insert_with(Default::default);
                m.field("server.listen", &source, server.listen, &mut target.listen);
                m.field("server.port", &source, server.port, &mut target.port);
                m.field("server.state_file", &source, server.state_file, &mut target.state_file);
                m.field("server.language", &source, server.language, &mut target.language);
            }

            if let Some(station) = config.station {
                let target = result.station.get_or_insert_with(Default::default);
                m.field("station.api_id", &source, station.api_id, &mut target.api_id);
                m.field("station.api_key", &source, station.api_key, &mut target.api_key);
                m.field("station.wslink", &source, station.wslink, &mut target.wslink);
                m.field("station.dev_debug", &source, station.dev_debug, &mut target.dev_debug);
            }

            if let Some(windy) = config.windy {
                let target = result.windy.get_or_insert_with(Default::default);
                m.field("windy.enabled", &source, windy.enabled, &mut target.enabled);
                m.field("windy.station_id", &source, windy.station_id, &mut target.station_id);
                m.field("windy.station_pw", &source, windy.station_pw, &mut target.station_pw);
                m.field("windy.logger", &source, windy.logger, &mut target.logger);
                m.field("windy.url", &source, windy.url, &mut target.url);
            }

            if let Some(pocasi) = config.pocasi {
                let target = result.pocasi.get_or_insert_with(Default::default);
                m.field("pocasi.enabled", &source, pocasi.enabled, &mut target.enabled);
                m.field("pocasi.api_id", &source, pocasi.api_id, &mut target.api_id);
                m.field("pocasi.api_key", &source, pocasi.api_key, &mut target.api_key);
                m.field(
                    "pocasi.send_interval",
                    &source,
                    pocasi.send_interval,
                    &mut target.send_interval,
                );
                m.field("pocasi.logger", &source, pocasi.logger, &mut target.logger);
                m.field("pocasi.url", &source, pocasi.url, &mut target.url);
            }
        }

        result.imports = imports;
        result.locations = m.seen;

        (result, m.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(name: &str, content: &str) -> PartialConfig {
        let mut config: PartialConfig = toml::from_str(content).unwrap();
        config.source = Some(SourceInfo {
            file_path: PathBuf::from(name),
            content: content.to_string(),
        });
        config
    }

    #[test]
    fn test_first_wins() {
        let a = partial("a.toml", "[station]\napi_id = \"first\"\n");
        let b = partial("b.toml", "[station]\napi_id = \"second\"\napi_key = \"key\"\n");

        let (merged, diagnostics) = PartialConfig::merge([a, b]);

        let station = merged.station.unwrap();
        assert_eq!(station.api_id.unwrap().into_inner(), "first");
        assert_eq!(station.api_key.unwrap().into_inner(), "key");
        assert_eq!(diagnostics.len(), 1);
        assert!(matches!(
            &diagnostics[0],
            Diagnostic::Error(Error::Merge(e)) if e.field_path == "station.api_id"
        ));
    }

    #[test]
    fn test_conflict_spans_point_at_values() {
        let a = partial("a.toml", "[windy]\nurl = \"http://a\"\n");
        let b = partial("b.toml", "[windy]\nurl = \"http://b\"\n");

        let (_, diagnostics) = PartialConfig::merge([a, b]);

        let Diagnostic::Error(Error::Merge(e)) = &diagnostics[0] else {
            panic!("expected merge error");
        };
        let first = &e.conflicts[0];
        assert!(first.content[first.span.clone()].contains("http://a"));
        let second = &e.conflicts[1];
        assert!(second.content[second.span.clone()].contains("http://b"));
    }

    #[test]
    fn test_empty_file_warns() {
        let (_, diagnostics) = PartialConfig::merge([partial("empty.toml", "")]);

        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_warning());
    }
}
