//! Background worker draining the invalidation outbox.

use gradeportal_storage::{CACHE_INVALIDATE_EVENT, OutboxRecord, OutboxStorage, mask_student_id};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex, watch};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::dispatch::CacheInvalidator;
use crate::error::OutboxError;
use crate::metrics;
use crate::payload::InvalidationPayload;

/// Invalidation worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Delay between passes in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum records fetched per pass
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Age after which a PROCESSING record counts as abandoned by a crashed worker
    #[serde(default = "default_stuck_threshold_secs")]
    pub stuck_threshold_secs: u64,

    /// Retry ceiling; records at or above it are never picked up again
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Move FAILED records below the ceiling back to PENDING on every pass
    #[serde(default = "default_requeue_failed")]
    pub requeue_failed: bool,
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_batch_size() -> u32 {
    100
}

fn default_stuck_threshold_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_requeue_failed() -> bool {
    true
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            stuck_threshold_secs: default_stuck_threshold_secs(),
            max_retries: default_max_retries(),
            requeue_failed: default_requeue_failed(),
        }
    }
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_secs)
    }
}

/// What one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub fetched: u64,
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    /// Lost the claim to another worker.
    pub skipped: u64,
    pub requeued: u64,
    pub recovered: u64,
    /// Stuck records that hit the retry ceiling and were marked FAILED.
    pub abandoned: u64,
}

impl PassReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

pub struct InvalidationWorker<S, I>
where
    S: OutboxStorage + ?Sized,
    I: CacheInvalidator + ?Sized,
{
    storage: Arc<S>,
    invalidator: Arc<I>,
    settings: WorkerSettings,
    pass_guard: Mutex<()>,
}

impl<S, I> InvalidationWorker<S, I>
where
    S: OutboxStorage + ?Sized,
    I: CacheInvalidator + ?Sized,
{
    pub fn new(storage: Arc<S>, invalidator: Arc<I>, settings: WorkerSettings) -> Self {
        Self {
            storage,
            invalidator,
            settings,
            pass_guard: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Run passes every `poll_interval` until `shutdown` turns `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.settings.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_ms = self.settings.poll_interval_ms,
            batch_size = self.settings.batch_size,
            "Invalidation worker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_pass().await {
                        Ok(report) if report.is_idle() => {}
                        Ok(report) => info!(
                            completed = report.completed,
                            failed = report.failed,
                            skipped = report.skipped,
                            requeued = report.requeued,
                            recovered = report.recovered,
                            "Processed cache invalidation events"
                        ),
                        Err(e) => error!(error = %e, "Error processing cache invalidation events"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Invalidation worker stopped");
    }

    /// Process one batch, then requeue failed records and recover stuck ones.
    ///
    /// Returns an empty report without touching storage if another pass is in progress.
    ///
    /// # Errors
    ///
    /// Only a failure to fetch the batch is returned. Per-record failures are
    /// recorded on the record itself.
    pub async fn run_pass(&self) -> Result<PassReport, OutboxError> {
        let Ok(_guard) = self.pass_guard.try_lock() else {
            debug!("Previous invalidation pass still running, skipping");
            return Ok(PassReport::default());
        };

        let mut report = PassReport::default();
        let pending = self
            .storage
            .fetch_pending(
                CACHE_INVALIDATE_EVENT,
                self.settings.max_retries,
                self.settings.batch_size,
            )
            .await?;
        report.fetched = pending.len() as u64;

        for record in &pending {
            self.process_record(record, &mut report).await;
        }

        if self.settings.requeue_failed {
            report.requeued = self.requeue_failed().await;
        }
        self.recover_stuck(&mut report).await;

        metrics::record_outcome("completed", report.completed);
        metrics::record_outcome("failed", report.failed);
        metrics::record_outcome("skipped", report.skipped);
        metrics::record_outcome("requeued", report.requeued);
        metrics::record_outcome("recovered", report.recovered);
        metrics::record_outcome("abandoned", report.abandoned);

        Ok(report)
    }

    async fn process_record(&self, record: &OutboxRecord, report: &mut PassReport) {
        match self.storage.claim(record.id).await {
            Ok(true) => report.claimed += 1,
            Ok(false) => {
                debug!(event_id = record.id, "Failed to claim event for processing");
                report.skipped += 1;
                return;
            }
            Err(e) => {
                warn!(event_id = record.id, error = %e, "Claim failed");
                report.skipped += 1;
                return;
            }
        }

        match self.apply(record).await {
            Ok(()) => match self
                .storage
                .mark_completed(record.id, OffsetDateTime::now_utc())
                .await
            {
                Ok(true) => report.completed += 1,
                Ok(false) => warn!(event_id = record.id, "Failed to mark event as completed"),
                Err(e) => error!(event_id = record.id, error = %e, "Failed to mark event as completed"),
            },
            Err(e) => {
                error!(
                    event_id = record.id,
                    retry_count = record.retry_count,
                    error = %e,
                    "Failed to process cache invalidation event"
                );
                report.failed += 1;
                match self
                    .storage
                    .mark_failed(record.id, OffsetDateTime::now_utc())
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => warn!(event_id = record.id, "Failed to mark event as failed"),
                    Err(e) => error!(event_id = record.id, error = %e, "Failed to mark event as failed"),
                }
            }
        }
    }

    async fn apply(&self, record: &OutboxRecord) -> Result<(), OutboxError> {
        let payload: InvalidationPayload = serde_json::from_str(&record.payload)?;
        debug!(
            event_id = record.id,
            cache_type = %payload.cache_type,
            student = ?payload.student_id.map(mask_student_id),
            semester = %payload.semester,
            reason = ?payload.reason,
            "Processing cache invalidation event"
        );
        self.invalidator.invalidate(&payload).await
    }

    async fn requeue_failed(&self) -> u64 {
        match self
            .storage
            .requeue_failed(CACHE_INVALIDATE_EVENT, self.settings.max_retries)
            .await
        {
            Ok(count) => {
                if count > 0 {
                    info!(count, "Requeued failed events");
                }
                count
            }
            Err(e) => {
                error!(error = %e, "Failed to requeue failed events");
                0
            }
        }
    }

    async fn recover_stuck(&self, report: &mut PassReport) {
        let threshold = OffsetDateTime::now_utc() - self.settings.stuck_threshold();
        let stuck = match self.storage.find_stuck(threshold).await {
            Ok(stuck) => stuck,
            Err(e) => {
                error!(error = %e, "Failed to recover stuck events");
                return;
            }
        };

        for record in stuck {
            warn!(
                event_id = record.id,
                created_at = %record.created_at,
                retry_count = record.retry_count,
                "Recovering stuck event"
            );

            // The reset counts as a retry; once that reaches the ceiling the
            // record would never be fetched again, so park it as FAILED.
            if record.retry_count.saturating_add(1) >= self.settings.max_retries {
                match self
                    .storage
                    .mark_failed(record.id, OffsetDateTime::now_utc())
                    .await
                {
                    Ok(true) => {
                        warn!(event_id = record.id, "Stuck event exceeded retry limit, marked FAILED");
                        report.abandoned += 1;
                    }
                    Ok(false) => {}
                    Err(e) => error!(event_id = record.id, error = %e, "Failed to mark stuck event as failed"),
                }
                continue;
            }

            match self.storage.reset_stuck(record.id).await {
                Ok(true) => {
                    info!(event_id = record.id, "Reset stuck event to PENDING");
                    report.recovered += 1;
                }
                Ok(false) => {}
                Err(e) => error!(event_id = record.id, error = %e, "Failed to reset stuck event"),
            }
        }
    }
}
