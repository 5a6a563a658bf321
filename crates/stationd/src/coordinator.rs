//! Per-request ingestion pipeline.
//!
//! A push is authenticated, forwarded to enabled aggregators, remapped,
//! checked for newly seen sensors and finally published to every entity.
//! Only authentication can fail a request; everything after it is best effort.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::discovery::check_disabled;
use crate::discovery::newly_visible;
use crate::entity::SensorPlatform;
use crate::notify::Notifier;
use crate::options::Options;
use crate::options::OptionsStore;
use crate::push::PushTarget;
use crate::sensor::Dialect;
use crate::sensor::RawPayload;
use crate::sensor::RemappedPayload;
use crate::sensor::remap;

pub const SUCCESS_BODY: &str = "OK";

/// Query fields masked in debug logs.
const SECRETS: &[&str] = &["ID", "PASSWORD", "wsid", "wspw"];

/// Sender side of the latest-data channel.
pub type DataSender = watch::Sender<Arc<RemappedPayload>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    #[error("no security data provided")]
    MissingCredentials,

    #[error("unauthorised access")]
    Unauthorized,

    #[error("station API ID or API key is not configured")]
    Misconfigured,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::MissingCredentials | IngestError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
            }
            IngestError::Misconfigured => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Invalid configuration").into_response()
            }
        }
    }
}

/// Copy of a raw payload that is safe to log.
pub fn anonymize(raw: &RawPayload) -> RawPayload {
    raw.iter()
        .map(|(k, v)| {
            let v = if SECRETS.contains(&k.as_str()) {
                "***".to_string()
            } else {
                v.clone()
            };
            (k.clone(), v)
        })
        .collect()
}

pub struct Coordinator {
    options: Arc<Options>,
    dialect: Dialect,
    targets: Vec<Arc<dyn PushTarget>>,
    data: Arc<DataSender>,
    store: Arc<OptionsStore>,
    platform: Arc<SensorPlatform>,
    notifier: Notifier,
}

impl Coordinator {
    pub fn new(
        options: Arc<Options>,
        targets: Vec<Arc<dyn PushTarget>>,
        data: Arc<DataSender>,
        store: Arc<OptionsStore>,
        platform: Arc<SensorPlatform>,
        notifier: Notifier,
    ) -> Self {
        Self {
            dialect: Dialect::from_wslink(options.wslink),
            options,
            targets,
            data,
            store,
            platform,
            notifier,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn targets(&self) -> &[Arc<dyn PushTarget>] {
        &self.targets
    }

    pub fn target_names(&self) -> Vec<&'static str> {
        self.targets.iter().map(|t| t.name()).collect()
    }

    /// Handle one station push.
    pub async fn received_data(&self, raw: RawPayload) -> Result<&'static str, IngestError> {
        self.authenticate(&raw)?;

        for target in &self.targets {
            let status = target.push(&raw, self.dialect).await;
            debug!("{} push: {:?}", target.name(), status);
        }

        let remapped = remap(self.dialect, &raw);
        self.discover(&remapped);
        self.data.send_replace(Arc::new(remapped));

        if self.options.dev_debug {
            info!("Dev log: {:?}", anonymize(&raw));
        }

        Ok(SUCCESS_BODY)
    }

    fn authenticate(&self, raw: &RawPayload) -> Result<(), IngestError> {
        let (id_field, key_field) = self.dialect.credential_fields();
        let (Some(id), Some(key)) = (raw.get(id_field), raw.get(key_field)) else {
            error!("Invalid request. No security data provided!");
            return Err(IngestError::MissingCredentials);
        };

        let Some(expected_id) = &self.options.api_id else {
            error!("API ID is not set! Update your config!");
            return Err(IngestError::Misconfigured);
        };
        let Some(expected_key) = &self.options.api_key else {
            error!("API key is not set! Update your config!");
            return Err(IngestError::Misconfigured);
        };

        if id != expected_id || key != expected_key {
            error!("Unauthorised access!");
            return Err(IngestError::Unauthorized);
        }
        Ok(())
    }

    /// Persist, announce and expose keys that are not enabled yet.
    fn discover(&self, remapped: &RemappedPayload) {
        let current = self.store.current();
        let Some(missing) = check_disabled(remapped, &current.sensors_to_load, self.options.dev_debug)
        else {
            return;
        };

        let added = match self.store.append_sensors(&missing) {
            Ok(added) => added,
            Err(e) => {
                error!("Failed to persist discovered sensors: {}", e);
                return;
            }
        };
        if added.is_empty() {
            return;
        }

        let names: Vec<&str> = added
            .iter()
            .filter_map(|k| self.notifier.translations.sensor_name(k))
            .collect();
        let listing = format!("{}\n", names.join("\n"));
        self.notifier.notify("added", &[("added_sensors", listing.as_str())]);

        let previous: Vec<String> = current
            .sensors_to_load
            .iter()
            .filter(|k| !added.contains(k))
            .cloned()
            .collect();
        let created = self
            .platform
            .add_new_sensors(&newly_visible(&previous, &added));
        info!(
            "Discovered {} new sensor(s), {} entities created",
            added.len(),
            created
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::entity::SensorRegistry;
    use crate::push::PushStatus;
    use crate::sensor::keys::*;

    struct RecordingTarget {
        calls: Arc<Mutex<Vec<(RawPayload, Dialect)>>>,
    }

    #[async_trait]
    impl PushTarget for RecordingTarget {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn built_from(&self, _options: &Options) -> bool {
            true
        }

        async fn push(&self, raw: &RawPayload, dialect: Dialect) -> PushStatus {
            self.calls.lock().unwrap().push((raw.clone(), dialect));
            PushStatus::TransportFailed
        }
    }

    struct Harness {
        coordinator: Coordinator,
        store: Arc<OptionsStore>,
        registry: Arc<SensorRegistry>,
        notifier: Notifier,
        rx: watch::Receiver<Arc<RemappedPayload>>,
        calls: Arc<Mutex<Vec<(RawPayload, Dialect)>>>,
    }

    fn harness(options: Options) -> Harness {
        let (tx, rx) = watch::channel(Arc::new(RemappedPayload::new()));
        let store = Arc::new(OptionsStore::in_memory(options.clone()));
        let notifier = Notifier::new("en");
        let registry = Arc::new(SensorRegistry::new());
        let platform = Arc::new(SensorPlatform::new(
            registry.clone(),
            notifier.translations.clone(),
            rx.clone(),
            Dialect::from_wslink(options.wslink),
        ));
        platform.setup(&options);

        let calls = Arc::new(Mutex::new(Vec::new()));
        let coordinator = Coordinator::new(
            Arc::new(options),
            vec![Arc::new(RecordingTarget {
                calls: calls.clone(),
            })],
            Arc::new(tx),
            store.clone(),
            platform,
            notifier.clone(),
        );

        Harness {
            coordinator,
            store,
            registry,
            notifier,
            rx,
            calls,
        }
    }

    fn options() -> Options {
        Options {
            api_id: Some("station".to_string()),
            api_key: Some("secret".to_string()),
            ..Default::default()
        }
    }

    fn payload(pairs: &[(&str, &str)]) -> RawPayload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let h = harness(options());

        let err = h
            .coordinator
            .received_data(payload(&[("ID", "station"), ("tempf", "70")]))
            .await
            .unwrap_err();

        assert_eq!(err, IngestError::MissingCredentials);
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
        assert!(h.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_credentials() {
        let h = harness(options());

        let err = h
            .coordinator
            .received_data(payload(&[("ID", "station"), ("PASSWORD", "guess")]))
            .await
            .unwrap_err();

        assert_eq!(err, IngestError::Unauthorized);
        assert!(h.rx.borrow().is_empty());
        assert!(h.store.current().sensors_to_load.is_empty());
    }

    #[tokio::test]
    async fn test_misconfigured() {
        let h = harness(Options::default());

        let err = h
            .coordinator
            .received_data(payload(&[("ID", "station"), ("PASSWORD", "secret")]))
            .await
            .unwrap_err();

        assert_eq!(err, IngestError::Misconfigured);
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_wslink_uses_its_own_credential_fields() {
        let mut opts = options();
        opts.wslink = true;
        let h = harness(opts);

        let err = h
            .coordinator
            .received_data(payload(&[("ID", "station"), ("PASSWORD", "secret")]))
            .await
            .unwrap_err();
        assert_eq!(err, IngestError::MissingCredentials);

        let ok = h
            .coordinator
            .received_data(payload(&[("wsid", "station"), ("wspw", "secret"), ("t1tem", "20")]))
            .await;
        assert_eq!(ok, Ok(SUCCESS_BODY));
        assert_eq!(h.calls.lock().unwrap()[0].1, Dialect::WsLink);
    }

    #[tokio::test]
    async fn test_ingest_publishes_discovers_and_forwards() {
        let h = harness(options());
        let raw = payload(&[
            ("ID", "station"),
            ("PASSWORD", "secret"),
            ("tempf", "70"),
            ("humidity", "50"),
            ("softwaretype", "EasyWeather"),
        ]);

        assert_eq!(h.coordinator.received_data(raw.clone()).await, Ok("OK"));

        // forwarded untouched even though the target failed
        assert_eq!(h.calls.lock().unwrap()[0].0, raw);

        let published = h.rx.borrow().clone();
        assert_eq!(
            published.keys().map(String::as_str).collect::<Vec<_>>(),
            vec![OUTSIDE_TEMP, OUTSIDE_HUMIDITY]
        );

        assert_eq!(
            h.store.current().sensors_to_load,
            vec![OUTSIDE_TEMP.to_string(), OUTSIDE_HUMIDITY.to_string()]
        );
        assert_eq!(
            h.registry.entity_ids(),
            vec![
                "sensor.outside_temp".to_string(),
                "sensor.outside_humidity".to_string(),
                "sensor.heat_index".to_string(),
            ]
        );

        let notifications = h.notifier.center.get_all();
        assert_eq!(notifications.len(), 1);
        insta::assert_snapshot!(notifications[0].message, @r"
        Outside temperature
        Outside humidity

        Sensors have been added and are now available.
        ");
    }

    #[tokio::test]
    async fn test_known_sensors_are_not_rediscovered() {
        let h = harness(options());
        let raw = payload(&[("ID", "station"), ("PASSWORD", "secret"), ("tempf", "70")]);

        h.coordinator.received_data(raw.clone()).await.unwrap();
        let revision = h.store.revision();
        h.coordinator.received_data(raw).await.unwrap();

        assert_eq!(h.store.revision(), revision);
        assert_eq!(h.notifier.center.get_all().len(), 1);
        assert_eq!(h.registry.entity_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_enabled_set_only_grows() {
        let h = harness(options());
        let payloads = [
            vec![("tempf", "70"), ("humidity", "40")],
            vec![("tempf", "71")],
            vec![("winddir", "90"), ("tempf", "71")],
            vec![],
        ];

        let mut previous: Vec<String> = Vec::new();
        for fields in payloads {
            let mut raw = payload(&[("ID", "station"), ("PASSWORD", "secret")]);
            raw.extend(payload(&fields));
            h.coordinator.received_data(raw).await.unwrap();

            let current = h.store.current().sensors_to_load.clone();
            assert!(current.starts_with(&previous));
            previous = current;
        }
        assert_eq!(previous, vec![OUTSIDE_TEMP, OUTSIDE_HUMIDITY, WIND_DIR]);
    }

    #[test]
    fn test_anonymize() {
        let raw = payload(&[
            ("ID", "station"),
            ("PASSWORD", "secret"),
            ("wsid", "a"),
            ("wspw", "b"),
            ("tempf", "70"),
        ]);

        let masked = anonymize(&raw);

        assert_eq!(masked.len(), 5);
        assert_eq!(masked["ID"], "***");
        assert_eq!(masked["PASSWORD"], "***");
        assert_eq!(masked["wsid"], "***");
        assert_eq!(masked["wspw"], "***");
        assert_eq!(masked["tempf"], "70");
    }
}
