//! Localized strings and persistent notifications.
//!
//! Catalogs are embedded at build time and flattened into dotted keys such as
//! `entity.sensor.outside_temp.name` or `notify.added.message`. Lookups fall
//! back to English; a string missing from both degrades the caller's feature
//! (no notification, raw key as a name) instead of failing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::info;
use tracing::warn;

const CATALOGS: &[(&str, &str)] = &[
    ("en", include_str!("../translations/en.json")),
    ("cs", include_str!("../translations/cs.json")),
];

const FALLBACK_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Default)]
pub struct Translations {
    language: String,
    strings: HashMap<String, String>,
    fallback: HashMap<String, String>,
}

impl Translations {
    /// Load the catalog for `language`, falling back to English.
    pub fn load(language: &str) -> Self {
        let fallback = catalog(FALLBACK_LANGUAGE).unwrap_or_default();
        let strings = match catalog(language) {
            Some(s) => s,
            None => {
                warn!(
                    "No translations for language '{}', using '{}'",
                    language, FALLBACK_LANGUAGE
                );
                HashMap::new()
            }
        };

        Self {
            language: language.to_string(),
            strings,
            fallback,
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Look up `<category>.<translation_key>.<field>`.
    pub fn get(&self, category: &str, translation_key: &str, field: &str) -> Option<&str> {
        let key = format!("{category}.{translation_key}.{field}");
        self.strings
            .get(&key)
            .or_else(|| self.fallback.get(&key))
            .map(String::as_str)
    }

    /// Display name of a sensor key.
    pub fn sensor_name(&self, key: &str) -> Option<&str> {
        self.get("entity", &format!("sensor.{key}"), "name")
    }
}

fn catalog(language: &str) -> Option<HashMap<String, String>> {
    let (_, raw) = CATALOGS.iter().find(|(lang, _)| *lang == language)?;
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => {
            let mut out = HashMap::new();
            flatten("", &value, &mut out);
            Some(out)
        }
        Err(e) => {
            warn!("Embedded '{}' translations are invalid: {}", language, e);
            None
        }
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&key, v, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        _ => {}
    }
}

/// Substitute `{name}` placeholders. Unknown placeholders are left as is.
pub fn format_placeholders(template: &str, placeholders: &[(&str, &str)]) -> String {
    placeholders
        .iter()
        .fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), value)
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub notification_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// In-memory persistent notifications, in creation order.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    notifications: RwLock<IndexMap<String, Notification>>,
    next_id: AtomicU64,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a notification, replacing any with the same id.
    pub fn create(
        &self,
        message: String,
        title: Option<String>,
        notification_id: Option<String>,
    ) -> Notification {
        let notification_id = notification_id
            .unwrap_or_else(|| (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string());
        let notification = Notification {
            notification_id: notification_id.clone(),
            message,
            title,
        };

        match self.notifications.write() {
            Ok(mut guard) => {
                if guard.insert(notification_id.clone(), notification.clone()).is_some() {
                    debug!("Updated notification: {}", notification_id);
                } else {
                    info!("Created notification: {}", notification_id);
                }
            }
            Err(_) => warn!("Notification store poisoned, dropping {}", notification_id),
        }

        notification
    }

    pub fn dismiss(&self, notification_id: &str) -> Option<Notification> {
        self.notifications
            .write()
            .ok()?
            .shift_remove(notification_id)
    }

    pub fn get_all(&self) -> Vec<Notification> {
        self.notifications
            .read()
            .map(|guard| guard.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Raise the notification stored under `notify.<translation_key>`.
///
/// Returns `None` without notifying when the catalog has no message for the
/// key.
pub fn translated_notification(
    translations: &Translations,
    center: &NotificationCenter,
    translation_key: &str,
    placeholders: &[(&str, &str)],
    notification_id: Option<String>,
) -> Option<Notification> {
    let Some(message) = translations.get("notify", translation_key, "message") else {
        debug!("No translation for notification '{}'", translation_key);
        return None;
    };
    let title = translations
        .get("notify", translation_key, "title")
        .map(str::to_string);

    Some(center.create(
        format_placeholders(message, placeholders),
        title,
        notification_id,
    ))
}

/// Translations and the notification center, bundled for code that raises
/// notifications.
#[derive(Debug, Clone)]
pub struct Notifier {
    pub translations: Arc<Translations>,
    pub center: Arc<NotificationCenter>,
}

impl Notifier {
    pub fn new(language: &str) -> Self {
        Self {
            translations: Arc::new(Translations::load(language)),
            center: Arc::new(NotificationCenter::new()),
        }
    }

    pub fn notify(&self, translation_key: &str, placeholders: &[(&str, &str)]) -> Option<Notification> {
        translated_notification(
            &self.translations,
            &self.center,
            translation_key,
            placeholders,
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_names() {
        let t = Translations::load("en");
        assert_eq!(t.sensor_name("outside_temp"), Some("Outside temperature"));
        assert_eq!(t.sensor_name("no_such_sensor"), None);
    }

    #[test]
    fn test_language_fallback() {
        let cs = Translations::load("cs");
        assert_eq!(cs.sensor_name("outside_temp"), Some("Venkovní teplota"));
        assert!(cs.get("notify", "windy_invalid_key", "message").is_some());

        let unknown = Translations::load("xx");
        assert_eq!(unknown.language(), "xx");
        assert_eq!(unknown.sensor_name("uv"), Some("UV index"));
    }

    #[test]
    fn test_format_placeholders() {
        assert_eq!(
            format_placeholders("{a} and {b} and {c}", &[("a", "1"), ("b", "2")]),
            "1 and 2 and {c}"
        );
    }

    #[test]
    fn test_translated_notification() {
        let t = Translations::load("en");
        let center = NotificationCenter::new();

        let n = translated_notification(
            &t,
            &center,
            "added",
            &[("added_sensors", "Outside temperature\nUV index\n")],
            None,
        )
        .unwrap();

        insta::assert_snapshot!(n.message, @r"
        Outside temperature
        UV index

        Sensors have been added and are now available.
        ");
        assert_eq!(n.title.as_deref(), Some("New sensors for SWS 12500 found."));
        assert_eq!(center.get_all(), vec![n]);
    }

    #[test]
    fn test_missing_translation_skips_notification() {
        let t = Translations::load("en");
        let center = NotificationCenter::new();

        assert!(translated_notification(&t, &center, "nope", &[], None).is_none());
        assert!(center.get_all().is_empty());
    }

    #[test]
    fn test_notification_ids() {
        let center = NotificationCenter::new();

        let a = center.create("a".to_string(), None, None);
        let b = center.create("b".to_string(), None, None);
        assert_ne!(a.notification_id, b.notification_id);

        center.create("c".to_string(), None, Some(a.notification_id.clone()));
        let all = center.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "c");

        assert!(center.dismiss(&b.notification_id).is_some());
        assert!(center.dismiss(&b.notification_id).is_none());
    }
}
