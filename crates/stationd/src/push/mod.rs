//! Best-effort forwarding of station pushes to third-party aggregators.
//!
//! Each target is rate limited on its own schedule and switches itself off
//! (by writing its `enabled` option) when its credentials are rejected or the
//! service stays unreachable. Nothing a target does can fail the inbound
//! request.

#[cfg(feature = "push_pocasi")]
pub mod pocasi;
#[cfg(feature = "push_windy")]
pub mod windy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::time::Instant;
use tracing::error;

use crate::notify::Notifier;
use crate::options::Options;
use crate::options::OptionsStore;
use crate::sensor::Dialect;
use crate::sensor::RawPayload;

/// Consecutive transport failures after which a target disables itself.
pub const MAX_TRANSPORT_FAILURES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
}

/// One outbound GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub url: String,
    pub params: Vec<(String, String)>,
    pub bearer: Option<String>,
}

/// How the service answered, judged from its response text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PushOutcome {
    NotInserted,
    Success,
    InvalidKey,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// Called before the target's next allowed send.
    NotDue,
    Sent(PushOutcome),
    TransportFailed,
    /// The target has switched itself off.
    Disabled,
}

/// Trait for outbound HTTP
///
/// This trait allows for mocking the network in tests
#[async_trait]
pub trait PushClient: Send + Sync {
    /// Perform the request and return the response body
    async fn get(&self, request: &PushRequest) -> Result<String, PushError>;
}

/// Real client using reqwest
///
/// Certificate verification is off; several aggregators serve self-signed or
/// expired certificates.
pub struct ReqwestPushClient {
    client: reqwest::Client,
}

impl ReqwestPushClient {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PushClient for ReqwestPushClient {
    async fn get(&self, request: &PushRequest) -> Result<String, PushError> {
        let transport = |e: reqwest::Error| PushError::Transport {
            url: request.url.clone(),
            message: e.to_string(),
        };

        let mut builder = self.client.get(&request.url).query(&request.params);
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(transport)?;
        response.text().await.map_err(transport)
    }
}

/// Mock client for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockPushClient {
    pub responses: std::sync::Mutex<std::collections::VecDeque<Result<String, PushError>>>,
    pub requests: std::sync::Mutex<Vec<PushRequest>>,
}

#[cfg(test)]
impl MockPushClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response; calls beyond the queue answer with an empty body.
    pub fn respond(&self, response: Result<&str, PushError>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(response.map(str::to_string));
    }

    pub fn fail(&self) {
        self.respond(Err(PushError::Transport {
            url: "mock".to_string(),
            message: "connection refused".to_string(),
        }));
    }

    pub fn requests(&self) -> Vec<PushRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl PushClient for MockPushClient {
    async fn get(&self, request: &PushRequest) -> Result<String, PushError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// A forwarding target
#[async_trait]
pub trait PushTarget: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this target was built from the settings `options` now holds
    /// for it.
    fn built_from(&self, options: &Options) -> bool;

    /// Forward one raw station payload if the target is due.
    async fn push(&self, raw: &RawPayload, dialect: Dialect) -> PushStatus;
}

pub struct PushContext<'a> {
    pub options: &'a Options,
    pub store: &'a Arc<OptionsStore>,
    pub client: &'a Arc<dyn PushClient>,
    pub notifier: &'a Notifier,
}

/// Result type for target factory functions
pub type PushFactoryResult = anyhow::Result<Option<Box<dyn PushTarget>>>;

#[distributed_slice]
pub static PUSH_TARGETS: [fn(&PushContext) -> PushFactoryResult];

/// Build every target enabled in `ctx.options`.
///
/// A target in `previous` whose own settings are unchanged is carried over
/// as is, keeping its schedule and failure count.
pub fn build_targets(
    ctx: &PushContext,
    previous: &[Arc<dyn PushTarget>],
) -> Vec<Arc<dyn PushTarget>> {
    let mut targets = Vec::new();
    for constr in PUSH_TARGETS {
        match constr(ctx) {
            Ok(Some(t)) => {
                let kept = previous
                    .iter()
                    .find(|p| p.name() == t.name() && p.built_from(ctx.options));
                targets.push(match kept {
                    Some(p) => p.clone(),
                    None => Arc::from(t),
                });
            }
            Ok(None) => continue,
            Err(e) => error!("failed to set up push target: {:#}", e),
        }
    }
    targets
}

/// Send schedule and failure tracking shared by all targets.
#[derive(Debug)]
pub(crate) struct Schedule {
    pub last_update: Instant,
    pub next_update: Instant,
    pub invalid_response_count: u32,
    pub disabled: bool,
}

impl Schedule {
    pub fn new(first_delay: Duration) -> Self {
        let now = Instant::now();
        Self {
            last_update: now,
            next_update: now + first_delay,
            invalid_response_count: 0,
            disabled: false,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_update
    }

    pub fn sent(&mut self, interval: Duration) {
        self.last_update = Instant::now();
        self.next_update = self.last_update + interval;
    }

    /// Count a transport failure; true once the limit is reached.
    ///
    /// Answers from the service never clear the count.
    pub fn failed(&mut self) -> bool {
        self.invalid_response_count += 1;
        self.invalid_response_count >= MAX_TRANSPORT_FAILURES
    }
}

/// Switch a target off in the persisted options.
pub(crate) fn disable(store: &OptionsStore, target: &str, f: impl FnOnce(&mut Options)) {
    if let Err(e) = store.update(f) {
        error!("Failed to disable {} push: {}", target, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_schedule() {
        let mut schedule = Schedule::new(Duration::from_secs(60));
        assert!(!schedule.is_due(Instant::now()));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(schedule.is_due(Instant::now()));

        schedule.sent(Duration::from_secs(300));
        assert!(!schedule.is_due(Instant::now()));
    }

    #[test]
    fn test_failure_counter_reaches_limit() {
        let mut schedule = Schedule {
            last_update: Instant::now(),
            next_update: Instant::now(),
            invalid_response_count: 0,
            disabled: false,
        };

        assert!(!schedule.failed());
        assert!(!schedule.failed());
        assert!(schedule.failed());
        assert_eq!(schedule.invalid_response_count, MAX_TRANSPORT_FAILURES);
    }

    #[cfg(all(feature = "push_windy", feature = "push_pocasi"))]
    #[test]
    fn test_build_targets_honours_enabled_flags() {
        let options = Options::default();
        let store = Arc::new(OptionsStore::in_memory(options.clone()));
        let client: Arc<dyn PushClient> = Arc::new(MockPushClient::new());
        let notifier = Notifier::new("en");

        let ctx = PushContext {
            options: &options,
            store: &store,
            client: &client,
            notifier: &notifier,
        };
        assert!(build_targets(&ctx, &[]).is_empty());

        let mut options = Options::default();
        options.windy.enabled = true;
        options.windy.station_id = Some("abc".to_string());
        options.windy.station_pw = Some("pw".to_string());
        options.pocasi.enabled = true;
        options.pocasi.api_id = Some("id".to_string());
        options.pocasi.api_key = Some("key".to_string());
        let ctx = PushContext {
            options: &options,
            store: &store,
            client: &client,
            notifier: &notifier,
        };

        let first = build_targets(&ctx, &[]);
        let mut names: Vec<_> = first.iter().map(|t| t.name()).collect();
        names.sort();
        assert_eq!(names, vec!["pocasi", "windy"]);

        // Pocasi switched off; Windy keeps its instance.
        options.pocasi.enabled = false;
        let ctx = PushContext {
            options: &options,
            store: &store,
            client: &client,
            notifier: &notifier,
        };
        let second = build_targets(&ctx, &first);
        assert_eq!(second.len(), 1);
        let windy = first.iter().find(|t| t.name() == "windy").unwrap();
        assert!(Arc::ptr_eq(&second[0], windy));

        // New Windy credentials make a fresh instance.
        options.windy.station_pw = Some("other".to_string());
        let ctx = PushContext {
            options: &options,
            store: &store,
            client: &client,
            notifier: &notifier,
        };
        let third = build_targets(&ctx, &second);
        assert_eq!(third.len(), 1);
        assert!(!Arc::ptr_eq(&third[0], &second[0]));
    }
}
