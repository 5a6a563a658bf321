use std::sync::Arc;
use std::sync::Mutex;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::response::IntoResponse;
use axum::response::Response;
use strum::IntoEnumIterator;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;

use crate::coordinator::Coordinator;
use crate::coordinator::DataSender;
use crate::entity::SensorPlatform;
use crate::entity::SensorRegistry;
use crate::notify::Notifier;
use crate::options::Options;
use crate::options::OptionsStore;
use crate::push::PushClient;
use crate::push::PushContext;
use crate::push::PushTarget;
use crate::push::build_targets;
use crate::routes::RouteError;
use crate::routes::Routes;
use crate::routes::WebhookHandler;
use crate::routes::WebhookRequest;
use crate::sensor::Dialect;
use crate::sensor::RemappedPayload;

/// Webhook handler that always talks to the newest coordinator.
struct StationHandler {
    coordinator: Arc<ArcSwap<Coordinator>>,
}

#[async_trait]
impl WebhookHandler for StationHandler {
    async fn handle(&self, request: WebhookRequest) -> Response {
        let coordinator = self.coordinator.load_full();
        match coordinator.received_data(request.query).await {
            Ok(body) => body.into_response(),
            Err(e) => e.into_response(),
        }
    }
}

/// One configured weather station.
///
/// Owns the webhook routes, the sensor platform and the current coordinator.
/// When options change in a way that matters the coordinator is rebuilt and
/// swapped in; requests already in flight finish on the old one.
pub struct Station {
    coordinator: Arc<ArcSwap<Coordinator>>,
    routes: Arc<Routes>,
    platform: Arc<SensorPlatform>,
    store: Arc<OptionsStore>,
    notifier: Notifier,
    client: Arc<dyn PushClient>,
    data: Arc<DataSender>,
    applied: Mutex<Arc<Options>>,
}

impl Station {
    pub fn new(
        store: Arc<OptionsStore>,
        notifier: Notifier,
        client: Arc<dyn PushClient>,
    ) -> Result<Self, RouteError> {
        let options = store.current();
        let dialect = Dialect::from_wslink(options.wslink);

        let (tx, rx) = watch::channel(Arc::new(RemappedPayload::new()));
        let data = Arc::new(tx);

        let platform = Arc::new(SensorPlatform::new(
            Arc::new(SensorRegistry::new()),
            notifier.translations.clone(),
            rx,
            dialect,
        ));
        let created = platform.setup(&options);
        info!("Created {} sensor entities", created);

        let coordinator = Arc::new(ArcSwap::from_pointee(build_coordinator(
            options.clone(),
            &[],
            &store,
            &client,
            &notifier,
            &data,
            &platform,
        )));

        let routes = Arc::new(Routes::new());
        for d in Dialect::iter() {
            let handler = Arc::new(StationHandler {
                coordinator: coordinator.clone(),
            });
            routes.add_route(d.url_path(), handler, d == dialect)?;
        }
        info!("{}", routes.show_enabled());

        Ok(Self {
            coordinator,
            routes,
            platform,
            store,
            notifier,
            client,
            data,
            applied: Mutex::new(options),
        })
    }

    pub fn routes(&self) -> &Arc<Routes> {
        &self.routes
    }

    pub fn registry(&self) -> &Arc<SensorRegistry> {
        self.platform.registry()
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn store(&self) -> &Arc<OptionsStore> {
        &self.store
    }

    pub fn dialect(&self) -> Dialect {
        self.coordinator.load().dialect()
    }

    /// Apply a new options snapshot.
    ///
    /// Returns whether the station was rebuilt. Growth of `sensors_to_load`
    /// alone is handled incrementally by discovery and never rebuilds.
    pub fn apply(&self, next: Arc<Options>) -> Result<bool, RouteError> {
        let mut applied = self.applied.lock().map_err(|_| RouteError::Poisoned)?;
        let reload = applied.needs_reload(&next);
        *applied = next.clone();
        if !reload {
            return Ok(false);
        }

        info!("Options changed, reloading station");
        let previous = self.coordinator.load().targets().to_vec();
        let coordinator = build_coordinator(
            next.clone(),
            &previous,
            &self.store,
            &self.client,
            &self.notifier,
            &self.data,
            &self.platform,
        );
        let dialect = coordinator.dialect();
        self.coordinator.store(Arc::new(coordinator));

        self.routes.switch_route(dialect.url_path())?;
        info!("{}", self.routes.show_enabled());
        self.platform.reconfigure(&next);
        Ok(true)
    }

    /// Follow option changes until shutdown.
    ///
    /// The subscription is taken before the task starts, so no update made
    /// after this call is missed.
    pub fn spawn_options_watcher(
        self: &Arc<Self>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let station = self.clone();
        let mut options_rx = self.store.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = options_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let next = options_rx.borrow_and_update().clone();
                        if let Err(e) = station.apply(next) {
                            error!("Failed to apply new options: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("Options watcher stopped");
        })
    }
}

fn build_coordinator(
    options: Arc<Options>,
    previous: &[Arc<dyn PushTarget>],
    store: &Arc<OptionsStore>,
    client: &Arc<dyn PushClient>,
    notifier: &Notifier,
    data: &Arc<DataSender>,
    platform: &Arc<SensorPlatform>,
) -> Coordinator {
    let targets = build_targets(
        &PushContext {
            options: &options,
            store,
            client,
            notifier,
        },
        previous,
    );
    for target in &targets {
        info!("Forwarding to {}", target.name());
    }

    Coordinator::new(
        options,
        targets,
        data.clone(),
        store.clone(),
        platform.clone(),
        notifier.clone(),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::to_bytes;
    use axum::http::StatusCode;

    use super::*;
    use crate::push::MockPushClient;
    use crate::routes::UNREGISTERED_BODY;
    use crate::sensor::RawPayload;
    use crate::sensor::remap::DEFAULT_URL;
    use crate::sensor::remap::WSLINK_URL;

    fn options() -> Options {
        Options {
            api_id: Some("station".to_string()),
            api_key: Some("secret".to_string()),
            ..Default::default()
        }
    }

    fn station(options: Options) -> Station {
        Station::new(
            Arc::new(OptionsStore::in_memory(options)),
            Notifier::new("en"),
            Arc::new(MockPushClient::new()),
        )
        .unwrap()
    }

    fn request(path: &str, pairs: &[(&str, &str)]) -> WebhookRequest {
        WebhookRequest {
            path: path.to_string(),
            query: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<RawPayload>(),
        }
    }

    async fn body(response: Response) -> (StatusCode, String) {
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_routes_follow_dialect() {
        let station = station(options());
        assert_eq!(station.routes().enabled_path().as_deref(), Some(DEFAULT_URL));

        let wu = request(DEFAULT_URL, &[("ID", "station"), ("PASSWORD", "secret"), ("tempf", "70")]);
        assert_eq!(
            body(station.routes().dispatch(wu).await).await,
            (StatusCode::OK, "OK".to_string())
        );

        let wslink = request(WSLINK_URL, &[("wsid", "station"), ("wspw", "secret")]);
        assert_eq!(
            body(station.routes().dispatch(wslink).await).await,
            (StatusCode::BAD_REQUEST, UNREGISTERED_BODY.to_string())
        );
        assert!(station.registry().contains("sensor.outside_temp"));
    }

    #[tokio::test]
    async fn test_discovery_does_not_reload() {
        let station = station(options());

        let wu = request(DEFAULT_URL, &[("ID", "station"), ("PASSWORD", "secret"), ("UV", "2")]);
        station.routes().dispatch(wu).await;

        assert_eq!(station.store().revision(), 1);
        assert!(!station.apply(station.store().current()).unwrap());
        assert_eq!(station.dialect(), Dialect::WeatherUnderground);
    }

    #[tokio::test]
    async fn test_dialect_switch_reloads() {
        let station = station(options());
        let wu = request(DEFAULT_URL, &[("ID", "station"), ("PASSWORD", "secret"), ("tempf", "70")]);
        station.routes().dispatch(wu).await;

        station.store().update(|o| o.wslink = true).unwrap();
        assert!(station.apply(station.store().current()).unwrap());

        assert_eq!(station.dialect(), Dialect::WsLink);
        assert_eq!(station.routes().enabled_path().as_deref(), Some(WSLINK_URL));
        let state = &station.registry().states()[0];
        assert_eq!(state["unit_of_measurement"], "°C");

        let wslink = request(WSLINK_URL, &[("wsid", "station"), ("wspw", "secret"), ("t1tem", "21")]);
        assert_eq!(
            body(station.routes().dispatch(wslink).await).await,
            (StatusCode::OK, "OK".to_string())
        );
        let wu = request(DEFAULT_URL, &[("ID", "station"), ("PASSWORD", "secret")]);
        assert_eq!(
            body(station.routes().dispatch(wu).await).await.0,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_credential_change_applies_to_next_request() {
        let station = station(options());
        station
            .store()
            .update(|o| o.api_key = Some("rotated".to_string()))
            .unwrap();
        station.apply(station.store().current()).unwrap();

        let old = request(DEFAULT_URL, &[("ID", "station"), ("PASSWORD", "secret")]);
        assert_eq!(
            body(station.routes().dispatch(old).await).await.0,
            StatusCode::UNAUTHORIZED
        );
        let new = request(DEFAULT_URL, &[("ID", "station"), ("PASSWORD", "rotated")]);
        assert_eq!(
            body(station.routes().dispatch(new).await).await.0,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_watch_options_applies_updates() {
        let station = Arc::new(station(options()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = station.spawn_options_watcher(shutdown_rx);

        station.store().update(|o| o.wslink = true).unwrap();
        for _ in 0..100 {
            if station.dialect() == Dialect::WsLink {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(station.dialect(), Dialect::WsLink);

        shutdown_tx.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_target_leaves_others_on_schedule() {
        let mut options = options();
        options.windy.enabled = true;
        options.windy.station_id = Some("windy-station".to_string());
        options.windy.station_pw = Some("windy-pw".to_string());
        options.pocasi.enabled = true;
        options.pocasi.api_id = Some("pocasi-id".to_string());
        options.pocasi.api_key = Some("pocasi-key".to_string());
        options.pocasi.send_interval = 60;

        let client = Arc::new(MockPushClient::new());
        let station = Station::new(
            Arc::new(OptionsStore::in_memory(options)),
            Notifier::new("en"),
            client.clone(),
        )
        .unwrap();
        let windy = station
            .coordinator
            .load()
            .targets()
            .iter()
            .find(|t| t.name() == "windy")
            .cloned()
            .unwrap();
        let push = || request(DEFAULT_URL, &[("ID", "station"), ("PASSWORD", "secret"), ("tempf", "70")]);

        // Windy reads this as unknown, Pocasi as a rejected key.
        tokio::time::advance(Duration::from_secs(60)).await;
        client.respond(Ok("Invalid API ID"));
        client.respond(Ok("Invalid API ID"));
        station.routes().dispatch(push()).await;
        assert_eq!(client.requests().len(), 2);
        assert!(!station.store().current().pocasi.enabled);

        assert!(station.apply(station.store().current()).unwrap());
        assert_eq!(station.coordinator.load().target_names(), vec!["windy"]);
        assert!(Arc::ptr_eq(&station.coordinator.load().targets()[0], &windy));

        tokio::time::advance(Duration::from_secs(60)).await;
        station.routes().dispatch(push()).await;
        assert_eq!(client.requests().len(), 2);

        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        station.routes().dispatch(push()).await;
        assert_eq!(client.requests().len(), 3);
    }
}
