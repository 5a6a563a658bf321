//! Sensor entities and the registry that exposes them.
//!
//! Entities never store readings. Each holds a receiver on the coordinator's
//! latest-data channel and renders its value from the newest snapshot on
//! demand, so adding entities never disturbs existing ones.

use std::sync::Arc;
use std::sync::RwLock;

use indexmap::IndexMap;
use serde_json::json;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::discovery::auto_enable_derived;
use crate::notify::Translations;
use crate::options::Options;
use crate::sensor::Dialect;
use crate::sensor::RemappedPayload;
use crate::sensor::SensorDescription;

/// Receiver side of the latest-data channel.
pub type DataReceiver = watch::Receiver<Arc<RemappedPayload>>;

/// Base trait that all entities must implement
pub trait Entity: Send + Sync {
    /// Stable identifier, e.g. `sensor.outside_temp`
    fn entity_id(&self) -> String;

    /// Serialize current state to JSON
    fn state_json(&self) -> serde_json::Value;
}

pub struct WeatherSensor {
    description: &'static SensorDescription,
    dialect: Dialect,
    name: String,
    data: DataReceiver,
}

impl WeatherSensor {
    pub fn new(
        description: &'static SensorDescription,
        dialect: Dialect,
        name: String,
        data: DataReceiver,
    ) -> Self {
        Self {
            description,
            dialect,
            name,
            data,
        }
    }

    pub fn key(&self) -> &'static str {
        self.description.key
    }
}

impl Entity for WeatherSensor {
    fn entity_id(&self) -> String {
        format!("sensor.{}", self.description.key)
    }

    fn state_json(&self) -> serde_json::Value {
        let snapshot = self.data.borrow().clone();
        let value = self.description.value(&snapshot, self.dialect);
        let icon = self.description.icon_for(value.as_ref());
        json!({
            "entity_id": self.entity_id(),
            "unique_id": self.description.key,
            "name": self.name,
            "state": value,
            "unit_of_measurement": self.description.unit,
            "device_class": self.description.device_class,
            "state_class": self.description.state_class,
            "icon": icon,
        })
    }
}

/// Exposed entities keyed by entity id, in creation order.
#[derive(Default)]
pub struct SensorRegistry {
    entities: RwLock<IndexMap<String, Arc<dyn Entity>>>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert entities whose ids are not registered yet; returns how many
    /// were added.
    pub fn insert(&self, entities: Vec<Arc<dyn Entity>>) -> usize {
        let Ok(mut map) = self.entities.write() else {
            warn!("Entity registry poisoned, dropping {} entities", entities.len());
            return 0;
        };

        let mut added = 0;
        for entity in entities {
            let id = entity.entity_id();
            if map.contains_key(&id) {
                continue;
            }
            debug!("Adding entity {}", id);
            map.insert(id, entity);
            added += 1;
        }
        added
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.entities.write() {
            map.clear();
        }
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities
            .read()
            .map(|map| map.contains_key(entity_id))
            .unwrap_or(false)
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.entities
            .read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn states(&self) -> Vec<serde_json::Value> {
        self.entities
            .read()
            .map(|map| map.values().map(|e| e.state_json()).collect())
            .unwrap_or_default()
    }
}

/// Creates sensor entities for the enabled keys of the current dialect.
pub struct SensorPlatform {
    registry: Arc<SensorRegistry>,
    translations: Arc<Translations>,
    data: DataReceiver,
    dialect: RwLock<Dialect>,
}

impl SensorPlatform {
    pub fn new(
        registry: Arc<SensorRegistry>,
        translations: Arc<Translations>,
        data: DataReceiver,
        dialect: Dialect,
    ) -> Self {
        Self {
            registry,
            translations,
            data,
            dialect: RwLock::new(dialect),
        }
    }

    pub fn registry(&self) -> &Arc<SensorRegistry> {
        &self.registry
    }

    fn dialect(&self) -> Dialect {
        self.dialect
            .read()
            .map(|d| *d)
            .unwrap_or(Dialect::WeatherUnderground)
    }

    fn build(&self, description: &'static SensorDescription, dialect: Dialect) -> Arc<dyn Entity> {
        let name = self
            .translations
            .sensor_name(description.key)
            .unwrap_or(description.key)
            .to_string();
        Arc::new(WeatherSensor::new(
            description,
            dialect,
            name,
            self.data.clone(),
        ))
    }

    /// Create entities for every enabled key plus the derived sensors they
    /// support. Returns how many entities were added.
    pub fn setup(&self, options: &Options) -> usize {
        if options.sensors_to_load.is_empty() {
            return 0;
        }

        let dialect = self.dialect();
        let requested = auto_enable_derived(&options.sensors_to_load);
        let entities: Vec<_> = dialect
            .sensors()
            .iter()
            .filter(|d| requested.contains(d.key))
            .map(|d| self.build(d, dialect))
            .collect();

        self.registry.insert(entities)
    }

    /// Add entities for newly discovered keys without touching existing ones.
    ///
    /// Keys without a description in the current dialect are ignored.
    pub fn add_new_sensors(&self, keys: &[String]) -> usize {
        let dialect = self.dialect();
        let entities: Vec<_> = keys
            .iter()
            .filter_map(|k| dialect.description(k))
            .map(|d| self.build(d, dialect))
            .collect();

        if entities.is_empty() {
            return 0;
        }
        self.registry.insert(entities)
    }

    /// Apply changed options. A dialect change replaces every entity, since
    /// units and descriptions differ between dialects.
    pub fn reconfigure(&self, options: &Options) -> usize {
        let dialect = Dialect::from_wslink(options.wslink);
        let changed = match self.dialect.write() {
            Ok(mut current) => {
                let changed = *current != dialect;
                *current = dialect;
                changed
            }
            Err(_) => false,
        };

        if changed {
            info!("Dialect switched to {}, recreating sensors", dialect);
            self.registry.clear();
        }
        self.setup(options)
    }
}
