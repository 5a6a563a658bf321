//! Pocasi Meteo relay.
//!
//! Pocasi Meteo speaks the station protocols natively, so the payload is
//! replayed to the same dialect path on their server with our credentials
//! swapped for the Pocasi ones.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::PUSH_TARGETS;
use super::PushClient;
use super::PushContext;
use super::PushFactoryResult;
use super::PushOutcome;
use super::PushRequest;
use super::PushStatus;
use super::PushTarget;
use super::Schedule;
use crate::notify::Notifier;
use crate::options::Options;
use crate::options::OptionsStore;
use crate::options::POCASI_MIN_INTERVAL;
use crate::options::PocasiOptions;
use crate::sensor::Dialect;
use crate::sensor::RawPayload;

const INVALID_KEY: &str =
    "Pocasi Meteo rejected the API credentials. Sending to Pocasi Meteo is now disabled.";
const UNEXPECTED: &str =
    "Pocasi Meteo could not be reached 3 times in a row. Sending to Pocasi Meteo is now disabled!";

/// Phrases the server uses when it rejects the credentials themselves.
const KEY_ERRORS: &[&str] = &[
    "Unauthorized",
    "Invalid API key",
    "Invalid API ID",
    "Invalid credentials",
];

fn has_word(response: &str, word: &str) -> bool {
    response
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|w| w == word)
}

pub fn classify(response: &str) -> PushOutcome {
    if KEY_ERRORS.iter().any(|e| response.contains(e)) {
        PushOutcome::InvalidKey
    } else if has_word(response, "SUCCESS") || has_word(response, "OK") {
        PushOutcome::Success
    } else if response.contains("NOTICE") {
        PushOutcome::NotInserted
    } else {
        PushOutcome::Unknown
    }
}

/// Send interval with the server's floor applied.
pub fn effective_interval(send_interval: u64) -> Duration {
    Duration::from_secs(send_interval.max(POCASI_MIN_INTERVAL))
}

/// The raw payload with the dialect's credential fields set to ours.
pub fn pocasi_request(options: &PocasiOptions, raw: &RawPayload, dialect: Dialect) -> PushRequest {
    let (id_field, key_field) = dialect.credential_fields();

    let mut data = raw.clone();
    data.insert(id_field.to_string(), options.api_id.clone().unwrap_or_default());
    data.insert(key_field.to_string(), options.api_key.clone().unwrap_or_default());

    PushRequest {
        url: format!("{}{}", options.url.trim_end_matches('/'), dialect.url_path()),
        params: data.into_iter().collect(),
        bearer: None,
    }
}

pub struct PocasiPush {
    options: PocasiOptions,
    interval: Duration,
    client: Arc<dyn PushClient>,
    store: Arc<OptionsStore>,
    notifier: Notifier,
    schedule: Mutex<Schedule>,
}

impl PocasiPush {
    pub fn new(
        options: PocasiOptions,
        client: Arc<dyn PushClient>,
        store: Arc<OptionsStore>,
        notifier: Notifier,
    ) -> Self {
        let interval = effective_interval(options.send_interval);
        Self {
            options,
            interval,
            client,
            store,
            notifier,
            schedule: Mutex::new(Schedule::new(interval)),
        }
    }

    fn disable(&self, schedule: &mut Schedule) {
        schedule.disabled = true;
        super::disable(&self.store, "Pocasi Meteo", |o| o.pocasi.enabled = false);
    }
}

#[async_trait]
impl PushTarget for PocasiPush {
    fn name(&self) -> &'static str {
        "pocasi"
    }

    fn built_from(&self, options: &Options) -> bool {
        self.options == options.pocasi
    }

    async fn push(&self, raw: &RawPayload, dialect: Dialect) -> PushStatus {
        let mut schedule = self.schedule.lock().await;
        if schedule.disabled {
            return PushStatus::Disabled;
        }

        if self.options.logger {
            info!(
                "Pocasi Meteo last update {:?} ago, next update in {:?}",
                schedule.last_update.elapsed(),
                schedule.next_update.saturating_duration_since(Instant::now())
            );
        }
        if !schedule.is_due(Instant::now()) {
            debug!(
                "Pocasi Meteo interval of {:?} not yet elapsed",
                self.interval
            );
            return PushStatus::NotDue;
        }

        let request = pocasi_request(&self.options, raw, dialect);
        debug!(
            "Payload for Pocasi Meteo: [mode={}] [url={}]",
            dialect, request.url
        );

        let status = match self.client.get(&request).await {
            Ok(response) => {
                if self.options.logger {
                    info!("Pocasi Meteo responded: {}", response);
                }

                let outcome = classify(&response);
                match outcome {
                    PushOutcome::InvalidKey => {
                        error!("{}", INVALID_KEY);
                        self.disable(&mut schedule);
                        self.notifier.notify("pocasi_invalid_key", &[]);
                    }
                    PushOutcome::NotInserted => warn!("Pocasi Meteo did not insert data: {}", response),
                    PushOutcome::Unknown => warn!("Unrecognised response from Pocasi Meteo: {}", response),
                    PushOutcome::Success => {}
                }
                PushStatus::Sent(outcome)
            }
            Err(e) => {
                error!("Invalid response from Pocasi Meteo: {}", e);
                if schedule.failed() {
                    error!("{}", UNEXPECTED);
                    self.disable(&mut schedule);
                }
                PushStatus::TransportFailed
            }
        };

        schedule.sent(self.interval);
        status
    }
}

#[distributed_slice(PUSH_TARGETS)]
fn init_pocasi(ctx: &PushContext) -> PushFactoryResult {
    let pocasi = &ctx.options.pocasi;
    if !pocasi.enabled {
        return Ok(None);
    }
    if pocasi.api_id.is_none() || pocasi.api_key.is_none() {
        anyhow::bail!("Pocasi Meteo is enabled but api_id or api_key is missing");
    }

    Ok(Some(Box::new(PocasiPush::new(
        pocasi.clone(),
        ctx.client.clone(),
        ctx.store.clone(),
        ctx.notifier.clone(),
    ))))
}
