//! Windy station uploads.
//!
//! Windy accepts at most one update every five minutes per station, so the
//! first push waits a minute for the station to settle and the rest follow on
//! a five minute cadence.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::sync::Mutex;
use tokio::time::Instant;
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
use crate::options::WindyOptions;
use crate::sensor::Dialect;
use crate::sensor::RawPayload;

pub const FIRST_PUSH_DELAY: Duration = Duration::from_secs(60);
pub const PUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Fields Windy has no use for, or that must not leave the house.
const PURGE: &[&str] = &[
    "ID",
    "PASSWORD",
    "wsid",
    "wspw",
    "action",
    "rtfreq",
    "realtime",
    "dateutc",
    "solarradiation",
    "indoortempf",
    "indoorhumidity",
    "dailyrainin",
];

/// WSLink field names to Windy's vocabulary.
const WSLINK_RENAMES: &[(&str, &str)] = &[
    ("t1ws", "wind"),
    ("t1wgust", "gust"),
    ("t1wdir", "winddir"),
    ("t1hum", "humidity"),
    ("t1dew", "dewpoint"),
    ("t1tem", "temp"),
    ("rbar", "mbar"),
    ("t1rainhr", "precip"),
    ("t1uvi", "uv"),
    ("t1solrad", "solarradiation"),
];

const NOT_INSERTED: &str =
    "Data was sent to Windy, but not inserted by the Windy API. Is another device sending data for this station?";
const INVALID_KEY: &str =
    "Windy station password is invalid. Sending to Windy is now disabled. Check your Windy settings and try again.";
const SUCCESS: &str = "Windy accepted and inserted the data";
const UNEXPECTED: &str =
    "Windy could not be reached 3 times in a row. Sending to Windy is now disabled!";

pub fn classify(response: &str) -> PushOutcome {
    if response.contains("NOTICE") {
        PushOutcome::NotInserted
    } else if response.contains("SUCCESS") {
        PushOutcome::Success
    } else if response.contains("Invalid API key") || response.contains("Unauthorized") {
        PushOutcome::InvalidKey
    } else {
        PushOutcome::Unknown
    }
}

/// Query parameters for Windy built from a raw station payload.
pub fn windy_params(raw: &RawPayload, dialect: Dialect, station_id: &str) -> Vec<(String, String)> {
    let mut data = raw.clone();
    for field in PURGE {
        data.shift_remove(*field);
    }

    if dialect == Dialect::WsLink {
        data = data
            .into_iter()
            .map(|(k, v)| {
                let renamed = WSLINK_RENAMES
                    .iter()
                    .find(|(from, _)| *from == k)
                    .map(|(_, to)| to.to_string());
                (renamed.unwrap_or(k), v)
            })
            .collect();
    }

    data.insert("id".to_string(), station_id.to_string());
    data.insert("time".to_string(), "now".to_string());
    data.into_iter().collect()
}

pub struct WindyPush {
    options: WindyOptions,
    client: Arc<dyn PushClient>,
    store: Arc<OptionsStore>,
    notifier: Notifier,
    schedule: Mutex<Schedule>,
}

impl WindyPush {
    pub fn new(
        options: WindyOptions,
        client: Arc<dyn PushClient>,
        store: Arc<OptionsStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            options,
            client,
            store,
            notifier,
            schedule: Mutex::new(Schedule::new(FIRST_PUSH_DELAY)),
        }
    }

    fn disable(&self, schedule: &mut Schedule) {
        schedule.disabled = true;
        super::disable(&self.store, "Windy", |o| o.windy.enabled = false);
    }
}

#[async_trait]
impl PushTarget for WindyPush {
    fn name(&self) -> &'static str {
        "windy"
    }

    fn built_from(&self, options: &Options) -> bool {
        self.options == options.windy
    }

    async fn push(&self, raw: &RawPayload, dialect: Dialect) -> PushStatus {
        let mut schedule = self.schedule.lock().await;
        if schedule.disabled {
            return PushStatus::Disabled;
        }

        if self.options.logger {
            info!(
                "Windy last update {:?} ago, next update in {:?}",
                schedule.last_update.elapsed(),
                schedule.next_update.saturating_duration_since(Instant::now())
            );
        }
        if !schedule.is_due(Instant::now()) {
            return PushStatus::NotDue;
        }

        let request = PushRequest {
            url: self.options.url.clone(),
            params: windy_params(
                raw,
                dialect,
                self.options.station_id.as_deref().unwrap_or_default(),
            ),
            bearer: self.options.station_pw.clone(),
        };
        if self.options.logger {
            info!("Dataset for windy: {:?}", request.params);
        }

        let status = match self.client.get(&request).await {
            Ok(response) => {
                if self.options.logger {
                    info!("Windy raw response: {}", response);
                }

                let outcome = classify(&response);
                match outcome {
                    PushOutcome::NotInserted => error!("{}", NOT_INSERTED),
                    PushOutcome::InvalidKey => {
                        error!("{}", INVALID_KEY);
                        self.disable(&mut schedule);
                        self.notifier.notify("windy_invalid_key", &[]);
                    }
                    PushOutcome::Success => {
                        if self.options.logger {
                            info!("{}", SUCCESS);
                        }
                    }
                    PushOutcome::Unknown => warn!("Unrecognised response from Windy: {}", response),
                }
                PushStatus::Sent(outcome)
            }
            Err(e) => {
                error!("Invalid response from Windy: {}", e);
                if schedule.failed() {
                    error!("{}", UNEXPECTED);
                    self.disable(&mut schedule);
                }
                PushStatus::TransportFailed
            }
        };

        schedule.sent(PUSH_INTERVAL);
        if self.options.logger {
            info!("Next Windy update in {:?}", PUSH_INTERVAL);
        }

        status
    }
}

#[distributed_slice(PUSH_TARGETS)]
fn init_windy(ctx: &PushContext) -> PushFactoryResult {
    let windy = &ctx.options.windy;
    if !windy.enabled {
        return Ok(None);
    }
    if windy.station_id.is_none() || windy.station_pw.is_none() {
        anyhow::bail!("Windy is enabled but station_id or station_pw is missing");
    }

    Ok(Some(Box::new(WindyPush::new(
        windy.clone(),
        ctx.client.clone(),
        ctx.store.clone(),
        ctx.notifier.clone(),
    ))))
}
