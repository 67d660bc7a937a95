//! Periodic removal of expired files.
//!
//! `Idle -> Scanning -> Idle` on every tick. The object is deleted before its
//! record, so a crash between the two leaves a record whose object is already
//! gone; the next sweep deletes the (missing) object again and then the
//! record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cv_core::CvResult;
use cv_storage::ObjectStore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metadata::MetadataStore;
use crate::unix_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Scanning,
}

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

pub struct ExpiryScheduler {
    store: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    interval: Duration,
    scanning: AtomicBool,
}

/// Resets the scheduler to `Idle` however a sweep ends.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ExpiryScheduler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            metadata,
            interval,
            scanning: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.scanning.load(Ordering::SeqCst) {
            SchedulerState::Scanning
        } else {
            SchedulerState::Idle
        }
    }

    /// Sweep every `interval` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        self.run_with(cancel, |_| {}).await
    }

    /// Like [`run`](Self::run), handing each finished sweep's report to
    /// `on_sweep`.
    pub async fn run_with<F>(&self, cancel: CancellationToken, mut on_sweep: F)
    where
        F: FnMut(&SweepReport) + Send,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = self.interval.as_secs(), "expiry scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.sweep_once(unix_now(), &cancel).await {
                Ok(report) => {
                    if report.scanned > 0 {
                        info!(
                            scanned = report.scanned,
                            deleted = report.deleted,
                            failed = report.failed,
                            "expiry sweep complete"
                        );
                    }
                    on_sweep(&report);
                }
                Err(e) => warn!("expiry sweep could not list records: {e}"),
            }
        }
        info!("expiry scheduler stopped");
    }

    /// One pass over the records expired at `now`.
    ///
    /// `cancel` is checked between records, never in the middle of one.
    pub async fn sweep_once(
        &self,
        now: u64,
        cancel: &CancellationToken,
    ) -> CvResult<SweepReport> {
        self.scanning.store(true, Ordering::SeqCst);
        let _idle = ScanGuard(&self.scanning);

        let expired = self.metadata.list_expired(now).await?;
        let mut report = SweepReport {
            scanned: expired.len(),
            ..Default::default()
        };

        for record in expired {
            if cancel.is_cancelled() {
                debug!("expiry sweep cancelled");
                break;
            }

            if let Err(e) = self.store.delete(&record.storage_path).await {
                warn!(
                    file_id = %record.file_id,
                    path = %record.storage_path,
                    "deleting expired object failed, keeping record: {e}"
                );
                report.failed += 1;
                continue;
            }

            match self.metadata.delete_record(&record.file_id).await {
                Ok(()) => {
                    debug!(file_id = %record.file_id, "expired file removed");
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(file_id = %record.file_id, "deleting expired record failed: {e}");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}
