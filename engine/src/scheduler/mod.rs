//! Deferred-element scheduler
//!
//! Delay elements and jump waits park a continuation in the waiting queue;
//! the scheduler sweeps the queue on a timer, deactivates every due entry
//! exactly once, and hands a ready notification to the delivery layer.
//! Sweeps run on a single task and each tick completes before the next
//! starts, so they never overlap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::ReadyNotification;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, info, warn};

use crate::db::waiting::WaitingStore;
use crate::element::duration::{parse_duration, split_days};

/// Receives ready notifications from the sweep
#[async_trait]
pub trait ReadyNotifier: Send + Sync {
    async fn notify(&self, notification: ReadyNotification) -> anyhow::Result<()>;
}

/// Default notifier: logs each ready continuation
///
/// Deployments wire a transport-backed notifier instead; the log keeps
/// headless and test runs observable.
pub struct LogNotifier;

#[async_trait]
impl ReadyNotifier for LogNotifier {
    async fn notify(&self, notification: ReadyNotification) -> anyhow::Result<()> {
        info!(
            chat_id = notification.chat_id,
            course_id = %notification.course_id,
            target = ?notification.target_element_id,
            "waiting element ready"
        );
        Ok(())
    }
}

/// Resolve the sweep cadence from its config string
///
/// Uses the shared duration grammar. Unparseable strings and cadences
/// mixing day and sub-day units fall back to `default`.
pub fn sweep_cadence(check_interval: &str, default: StdDuration) -> StdDuration {
    let parsed = match parse_duration(check_interval) {
        Ok(duration) => duration,
        Err(_) => {
            warn!(%check_interval, "invalid sweep cadence, using default");
            return default;
        }
    };

    let (days, sub_day_secs) = split_days(parsed);
    if days > 0 && sub_day_secs > 0 {
        warn!(%check_interval, "mixed day and sub-day cadence, using default");
        return default;
    }

    match u64::try_from(parsed.num_seconds()) {
        Ok(secs) if secs > 0 => StdDuration::from_secs(secs),
        _ => {
            warn!(%check_interval, "non-positive sweep cadence, using default");
            default
        }
    }
}

/// The waiting-queue scheduler
pub struct Scheduler {
    waiting: WaitingStore,
    notifier: Arc<dyn ReadyNotifier>,
}

impl Scheduler {
    pub fn new(waiting: WaitingStore, notifier: Arc<dyn ReadyNotifier>) -> Self {
        Self { waiting, notifier }
    }

    /// Insert an active waiting entry
    pub async fn register(
        &self,
        chat_id: i64,
        course_id: &str,
        target_element_id: Option<&str>,
        due_at: DateTime<Utc>,
    ) -> Result<i64, EngineError> {
        self.waiting
            .insert(chat_id, course_id, target_element_id, due_at)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))
    }

    /// One sweep: deactivate every due entry and notify for it exactly once
    ///
    /// Returns how many entries fired.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let due = self
            .waiting
            .select_due_active(now)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?;

        let mut fired = 0;
        for entry in due {
            // The deactivation is the exactly-once gate: a concurrent sweep
            // that lost the update skips the notification.
            let flipped = self
                .waiting
                .deactivate(entry.id)
                .await
                .map_err(|e| EngineError::Database(e.to_string()))?;
            if !flipped {
                continue;
            }

            let notification = ReadyNotification {
                chat_id: entry.chat_id,
                course_id: entry.course_id.clone(),
                target_element_id: entry.target_element_id.clone(),
            };
            if let Err(e) = self.notifier.notify(notification).await {
                // The entry stays consumed; delivery failures are the
                // delivery layer's problem to retry from its own state.
                error!(entry = entry.id, error = %e, "ready notification failed");
            }
            fired += 1;
        }

        Ok(fired)
    }

    /// Timer loop: sweep once per cadence until shutdown
    ///
    /// The tick body is awaited before the next tick is taken, so sweeps
    /// never overlap even when one runs long.
    pub async fn run(self, cadence: StdDuration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(cadence_secs = cadence.as_secs(), "scheduler started");
        let mut ticker = tokio::time::interval(cadence);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        error!(error = %e, "sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler stopping");
                        return;
                    }
                }
            }
        }
    }
}
