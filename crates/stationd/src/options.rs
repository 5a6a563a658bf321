//! Live station options and their persisted form.
//!
//! Options start life as a form submitted from configuration. Auto-discovery
//! then grows `sensors_to_load` at runtime and adapters may switch themselves
//! off, so the live options drift from the submitted form. Both are persisted
//! together so a restart with unchanged configuration resumes exactly where the
//! previous run left off.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;

pub const DEFAULT_WINDY_URL: &str = "https://stations.windy.com/pws/update/";
pub const DEFAULT_POCASI_URL: &str = "http://ms.pocasimeteo.cz";
pub const DEFAULT_POCASI_INTERVAL: u64 = 30;
pub const POCASI_MIN_INTERVAL: u64 = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindyOptions {
    pub enabled: bool,
    pub station_id: Option<String>,
    pub station_pw: Option<String>,
    pub logger: bool,
    pub url: String,
}

impl Default for WindyOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            station_id: None,
            station_pw: None,
            logger: false,
            url: DEFAULT_WINDY_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PocasiOptions {
    pub enabled: bool,
    pub api_id: Option<String>,
    pub api_key: Option<String>,
    /// Seconds between pushes.
    pub send_interval: u64,
    pub logger: bool,
    pub url: String,
}

impl Default for PocasiOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            api_id: None,
            api_key: None,
            send_interval: DEFAULT_POCASI_INTERVAL,
            logger: false,
            url: DEFAULT_POCASI_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub api_id: Option<String>,
    pub api_key: Option<String>,
    pub wslink: bool,
    pub dev_debug: bool,
    /// Enabled sensor keys in discovery order. Only ever grows.
    pub sensors_to_load: Vec<String>,
    pub windy: WindyOptions,
    pub pocasi: PocasiOptions,
}

pub const SENSORS_TO_LOAD: &str = "sensors_to_load";

impl Options {
    /// Top-level option names whose values differ between `self` and `other`.
    pub fn changed_keys(&self, other: &Options) -> Vec<String> {
        let (Ok(serde_json::Value::Object(a)), Ok(serde_json::Value::Object(b))) =
            (serde_json::to_value(self), serde_json::to_value(other))
        else {
            return Vec::new();
        };

        let mut changed: Vec<String> = a
            .iter()
            .filter(|(k, v)| b.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.extend(b.keys().filter(|k| !a.contains_key(*k)).cloned());
        changed
    }

    /// Whether moving from `self` to `other` needs the station rebuilt.
    ///
    /// Discovery rewrites `sensors_to_load` on every new field; that alone
    /// never warrants a rebuild.
    pub fn needs_reload(&self, other: &Options) -> bool {
        let changed = self.changed_keys(other);
        !changed.is_empty() && changed.iter().any(|k| k != SENSORS_TO_LOAD)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("failed to read options from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write options to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("options in {path} are corrupt: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize options: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("options lock poisoned")]
    Poisoned,
}

/// On-disk shape of the state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredOptions {
    /// Last form submitted from configuration.
    pub submitted: Option<Options>,
    /// Live options.
    pub options: Options,
}

/// Persisted option store with change notification.
///
/// Every successful write bumps `revision` and publishes the new options on a
/// watch channel; writes that change nothing are dropped.
pub struct OptionsStore {
    path: Option<PathBuf>,
    stored: RwLock<StoredOptions>,
    tx: watch::Sender<Arc<Options>>,
    revision: AtomicU64,
}

impl OptionsStore {
    /// Store that lives only in memory. Used when no state file is configured.
    pub fn in_memory(options: Options) -> Self {
        let (tx, _) = watch::channel(Arc::new(options.clone()));
        Self {
            path: None,
            stored: RwLock::new(StoredOptions {
                submitted: Some(options.clone()),
                options,
            }),
            tx,
            revision: AtomicU64::new(0),
        }
    }

    /// Open the state file at `path` and reconcile it with a freshly
    /// submitted configuration form.
    ///
    /// If the form matches the one stored last time the stored live options
    /// are kept. Otherwise the form is applied as an options-flow submission.
    pub fn open(path: impl Into<PathBuf>, form: Options) -> Result<Self, OptionsError> {
        let path = path.into();
        let stored = load(&path)?;

        let store = match stored {
            Some(stored) if stored.submitted.as_ref() == Some(&form) => {
                debug!("Configuration unchanged, resuming stored options");
                let (tx, _) = watch::channel(Arc::new(stored.options.clone()));
                Self {
                    path: Some(path),
                    stored: RwLock::new(stored),
                    tx,
                    revision: AtomicU64::new(0),
                }
            }
            Some(stored) => {
                info!("Configuration changed since last run, applying it");
                let next = StoredOptions {
                    options: merge_form(&stored.options, form.clone()),
                    submitted: Some(form),
                };
                save(&path, &next)?;
                let (tx, _) = watch::channel(Arc::new(next.options.clone()));
                Self {
                    path: Some(path),
                    stored: RwLock::new(next),
                    tx,
                    revision: AtomicU64::new(0),
                }
            }
            None => {
                let next = StoredOptions {
                    submitted: Some(form.clone()),
                    options: form,
                };
                save(&path, &next)?;
                let (tx, _) = watch::channel(Arc::new(next.options.clone()));
                Self {
                    path: Some(path),
                    stored: RwLock::new(next),
                    tx,
                    revision: AtomicU64::new(0),
                }
            }
        };

        Ok(store)
    }

    pub fn current(&self) -> Arc<Options> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Options>> {
        self.tx.subscribe()
    }

    /// Number of writes since the store was opened.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Apply a new configuration form, keeping discovered sensors.
    pub fn submit(&self, form: Options) -> Result<bool, OptionsError> {
        self.write(|stored| {
            stored.options = merge_form(&stored.options, form.clone());
            stored.submitted = Some(form);
        })
    }

    /// Modify the live options in place.
    pub fn update(&self, f: impl FnOnce(&mut Options)) -> Result<bool, OptionsError> {
        self.write(|stored| f(&mut stored.options))
    }

    /// Append keys to `sensors_to_load`, skipping any already present.
    ///
    /// Returns the keys that were actually added, in the order given.
    pub fn append_sensors(&self, keys: &[String]) -> Result<Vec<String>, OptionsError> {
        let mut added = Vec::new();
        self.write(|stored| {
            for key in keys {
                if !stored.options.sensors_to_load.contains(key) && !added.contains(key) {
                    stored.options.sensors_to_load.push(key.clone());
                    added.push(key.clone());
                }
            }
        })?;
        Ok(added)
    }

    fn write(&self, f: impl FnOnce(&mut StoredOptions)) -> Result<bool, OptionsError> {
        let mut guard = self.stored.write().map_err(|_| OptionsError::Poisoned)?;

        let mut next = guard.clone();
        f(&mut next);
        if next == *guard {
            return Ok(false);
        }

        if let Some(path) = &self.path {
            save(path, &next)?;
        }
        *guard = next;
        self.revision.fetch_add(1, Ordering::SeqCst);
        self.tx.send_replace(Arc::new(guard.options.clone()));
        Ok(true)
    }
}

fn merge_form(live: &Options, form: Options) -> Options {
    Options {
        sensors_to_load: live.sensors_to_load.clone(),
        ..form
    }
}

fn load(path: &Path) -> Result<Option<StoredOptions>, OptionsError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(OptionsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| OptionsError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn save(path: &Path, stored: &StoredOptions) -> Result<(), OptionsError> {
    let contents = serde_json::to_string_pretty(stored).map_err(OptionsError::Serialize)?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)
        .and_then(|()| std::fs::rename(&tmp, path))
        .map_err(|source| OptionsError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn form() -> Options {
        Options {
            api_id: Some("station".to_string()),
            api_key: Some("secret".to_string()),
            ..Default::default()
        }
    }

    fn keys(k: &[&str]) -> Vec<String> {
        k.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_append_sensors_deduplicates() {
        let store = OptionsStore::in_memory(form());

        let added = store.append_sensors(&keys(&["a", "b", "a"])).unwrap();
        assert_eq!(added, keys(&["a", "b"]));

        let added = store.append_sensors(&keys(&["b", "c"])).unwrap();
        assert_eq!(added, keys(&["c"]));
        assert_eq!(store.current().sensors_to_load, keys(&["a", "b", "c"]));
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_noop_write_is_dropped() {
        let store = OptionsStore::in_memory(form());
        store.append_sensors(&keys(&["a"])).unwrap();

        assert!(store.append_sensors(&keys(&["a"])).unwrap().is_empty());
        assert!(!store.update(|o| o.windy.enabled = false).unwrap());
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_subscribers_see_updates() {
        let store = OptionsStore::in_memory(form());
        let mut rx = store.subscribe();

        store.update(|o| o.dev_debug = true).unwrap();

        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().dev_debug);
    }

    #[test]
    fn test_submit_keeps_discovered_sensors() {
        let store = OptionsStore::in_memory(form());
        store.append_sensors(&keys(&["outside_temp"])).unwrap();

        let mut next = form();
        next.wslink = true;
        assert!(store.submit(next).unwrap());

        let current = store.current();
        assert!(current.wslink);
        assert_eq!(current.sensors_to_load, keys(&["outside_temp"]));
    }

    #[test]
    fn test_changed_keys_and_reload_decision() {
        let a = form();
        let mut b = a.clone();
        b.sensors_to_load.push("uv".to_string());

        assert_eq!(a.changed_keys(&b), keys(&[SENSORS_TO_LOAD]));
        assert!(!a.needs_reload(&b));
        assert!(!a.needs_reload(&a));

        b.pocasi.enabled = true;
        let mut changed = a.changed_keys(&b);
        changed.sort();
        assert_eq!(changed, keys(&["pocasi", SENSORS_TO_LOAD]));
        assert!(a.needs_reload(&b));
    }

    #[test]
    fn test_open_persists_and_resumes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = OptionsStore::open(&path, form()).unwrap();
            store.append_sensors(&keys(&["outside_temp", "uv"])).unwrap();
            store.update(|o| o.windy.enabled = false).unwrap();
        }

        let store = OptionsStore::open(&path, form()).unwrap();
        assert_eq!(store.current().sensors_to_load, keys(&["outside_temp", "uv"]));
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn test_open_applies_changed_form() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = OptionsStore::open(&path, form()).unwrap();
            store.append_sensors(&keys(&["outside_temp"])).unwrap();
        }

        let mut next = form();
        next.api_key = Some("rotated".to_string());
        let store = OptionsStore::open(&path, next).unwrap();

        let current = store.current();
        assert_eq!(current.api_key.as_deref(), Some("rotated"));
        assert_eq!(current.sensors_to_load, keys(&["outside_temp"]));
    }

    #[test]
    fn test_open_rejects_corrupt_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = OptionsStore::open(&path, form()).err().unwrap();
        assert!(matches!(err, OptionsError::Parse { .. }));
    }
}
