//! Digest scheduler — per-channel one-shot timers that compute the next
//! delivery instant and invoke the digest service. A channel-id -> handle
//! map where rescheduling always cancels the previous handle first, which
//! is what makes repeated `schedule_next` calls idempotent.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, TimeZone, Timelike, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::digest::DigestService;
use crate::model::{DigestConfig, DigestMode, QuietHoursConfig, Severity};
use crate::quiet_hours;

const DELIVERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Resolves a channel id to its digest and quiet-hours configuration.
/// The persistent store this core sits on top of only owns Rule, Alert,
/// and DigestEntry records (§3/§6); channel-level delivery policy is kept
/// behind this narrow collaborator rather than invented as a fourth store
/// entity — see DESIGN.md's open-question resolution.
pub trait ChannelDirectory: Send + Sync {
    fn digest_config(&self, channel_id: &str) -> Option<DigestConfig>;
    fn quiet_hours_config(&self, channel_id: &str) -> Option<QuietHoursConfig>;

    /// The channel's nominal transport type ("email", "webhook", ...).
    /// Defaults to "email" when the directory has no opinion, matching
    /// §4.9d's "channel type defaults to the channel's nominal type or
    /// 'email'".
    fn channel_type(&self, _channel_id: &str) -> Option<String> {
        None
    }
}

/// Reference directory backed by a plain map, used by the demo binary and
/// the test suite.
#[derive(Default)]
pub struct InMemoryChannelDirectory {
    channels: std::sync::RwLock<HashMap<String, (DigestConfig, Option<QuietHoursConfig>, String)>>,
}

impl InMemoryChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        channel_id: impl Into<String>,
        digest: DigestConfig,
        quiet_hours: Option<QuietHoursConfig>,
        channel_type: impl Into<String>,
    ) {
        self.channels
            .write()
            .expect("channel directory lock poisoned")
            .insert(channel_id.into(), (digest, quiet_hours, channel_type.into()));
    }
}

impl ChannelDirectory for InMemoryChannelDirectory {
    fn digest_config(&self, channel_id: &str) -> Option<DigestConfig> {
        self.channels
            .read()
            .expect("channel directory lock poisoned")
            .get(channel_id)
            .map(|(d, _, _)| d.clone())
    }

    fn quiet_hours_config(&self, channel_id: &str) -> Option<QuietHoursConfig> {
        self.channels
            .read()
            .expect("channel directory lock poisoned")
            .get(channel_id)
            .and_then(|(_, q, _)| q.clone())
    }

    fn channel_type(&self, channel_id: &str) -> Option<String> {
        self.channels
            .read()
            .expect("channel directory lock poisoned")
            .get(channel_id)
            .map(|(_, _, t)| t.clone())
    }
}

/// Pure computation of the next delivery instant for a digest mode,
/// ignoring quiet hours (applied separately so it stays unit-testable
/// without a running timer). `now` and the returned instant are both UTC;
/// `schedule` is interpreted in `config.timezone`.
pub fn compute_next_instant(config: &DigestConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if config.mode == DigestMode::Immediate {
        return None;
    }

    let tz: chrono_tz::Tz = config.timezone.parse().unwrap_or_else(|_| {
        warn!(timezone = %config.timezone, "unknown IANA timezone in digest config, falling back to UTC");
        chrono_tz::UTC
    });
    let local_now = now.with_timezone(&tz);

    let next_local = match config.mode {
        DigestMode::Immediate => unreachable!("handled above"),
        DigestMode::Hourly => {
            let minute: u32 = config
                .schedule
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let mut candidate = local_now
                .date_naive()
                .and_hms_opt(local_now.hour(), minute, 0)
                .expect("valid minute 0..59");
            if candidate <= local_now.naive_local() {
                candidate += chrono::Duration::hours(1);
            }
            candidate
        }
        DigestMode::Daily => {
            let (hour, minute) = config
                .schedule
                .as_deref()
                .and_then(|s| NaiveTime::parse_from_str(s, "%H:%M").ok())
                .map(|t| (t.hour(), t.minute()))
                .unwrap_or((0, 0));
            let mut candidate = local_now
                .date_naive()
                .and_hms_opt(hour, minute, 0)
                .expect("valid HH:MM");
            if candidate <= local_now.naive_local() {
                candidate += chrono::Duration::days(1);
            }
            candidate
        }
    };

    let localized = match tz.from_local_datetime(&next_local) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => local_now,
    };
    Some(localized.with_timezone(&Utc))
}

/// If `instant` falls inside the quiet-hours window, advances it to the
/// window's end. Severity is irrelevant here — a digest delivery instant
/// is deferred regardless of what severities it happens to contain.
fn defer_past_quiet_hours(instant: DateTime<Utc>, quiet_hours: &QuietHoursConfig) -> DateTime<Utc> {
    let (suppressed, _) = quiet_hours::should_suppress(quiet_hours, Severity::Info, instant);
    if suppressed {
        quiet_hours::next_delivery_time(quiet_hours, instant)
    } else {
        instant
    }
}

struct TimerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

pub struct DigestScheduler {
    clock: Arc<dyn Clock>,
    digest_service: Arc<DigestService>,
    directory: Arc<dyn ChannelDirectory>,
    timers: Mutex<HashMap<String, TimerHandle>>,
}

impl DigestScheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        digest_service: Arc<DigestService>,
        directory: Arc<dyn ChannelDirectory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            clock,
            digest_service,
            directory,
            timers: Mutex::new(HashMap::new()),
        })
    }

    /// Cancels any existing timer for `channel_id`, computes the next
    /// delivery instant, and arms a new one-shot timer. A no-op (after
    /// cancelling) when the channel has no digest config or is in
    /// immediate mode.
    pub async fn schedule_next(self: &Arc<Self>, channel_id: &str) {
        self.cancel_timer(channel_id).await;

        let Some(digest_config) = self.directory.digest_config(channel_id) else {
            return;
        };
        let now = self.clock.now();
        let Some(mut next) = compute_next_instant(&digest_config, now) else {
            return;
        };

        if let Some(quiet_hours) = self.directory.quiet_hours_config(channel_id) {
            next = defer_past_quiet_hours(next, &quiet_hours);
        }

        let delay = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
        let cancel = CancellationToken::new();
        let cancel_for_task = cancel.clone();
        let scheduler = self.clone();
        let channel = channel_id.to_string();

        let join = tokio::spawn(async move {
            tokio::select! {
                _ = cancel_for_task.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match tokio::time::timeout(DELIVERY_TIMEOUT, scheduler.digest_service.deliver_digest(&channel)).await {
                Ok(Ok(())) => info!(channel_id = %channel, "scheduled digest delivery complete"),
                Ok(Err(e)) => warn!(channel_id = %channel, error = %e, "scheduled digest delivery failed"),
                Err(_) => warn!(channel_id = %channel, "scheduled digest delivery timed out"),
            }

            scheduler.schedule_next(&channel).await;
        });

        self.timers
            .lock()
            .await
            .insert(channel_id.to_string(), TimerHandle { cancel, join });
    }

    async fn cancel_timer(&self, channel_id: &str) {
        if let Some(timer) = self.timers.lock().await.remove(channel_id) {
            timer.cancel.cancel();
        }
    }

    /// Cancels every timer and waits for any in-flight delivery to drain.
    /// Idempotent.
    pub async fn stop(&self) {
        let timers: Vec<TimerHandle> = self.timers.lock().await.drain().map(|(_, v)| v).collect();
        for timer in timers {
            timer.cancel.cancel();
            let _ = timer.join.await;
        }
    }
}
