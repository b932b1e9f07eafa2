use crate::error::{SeedError, SeedResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Live state of the import for one destination. Fields are updated independently;
/// readers take a [`ProgressSnapshot`].
#[derive(Debug, Default)]
pub struct JobProgress {
    total: AtomicU64,
    progress: AtomicU64,
    running: AtomicBool,
    succeeded: AtomicBool,
    batches_sent: AtomicU64,
    lines_skipped: AtomicU64,
    started_at_ms: AtomicI64,
    finished_at_ms: AtomicI64,
    failed: Mutex<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub destination: String,
    pub total: u64,
    pub progress: u64,
    pub running: bool,
    pub succeeded: bool,
    pub failed: Option<String>,
    pub batches_sent: u64,
    pub lines_skipped: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub total: u64,
    pub progress: u64,
}

impl JobProgress {
    /// State of a run that has just been claimed.
    fn started() -> Self {
        let progress = Self::default();
        progress.running.store(true, Ordering::Relaxed);
        progress
            .started_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        progress
    }

    fn failed_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.failed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn set_progress(&self, lines_read: u64) {
        self.progress.store(lines_read, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.lines_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_succeeded(&self) {
        self.progress
            .store(self.total.load(Ordering::Relaxed), Ordering::Relaxed);
        self.succeeded.store(true, Ordering::Relaxed);
    }

    pub fn mark_failed(&self, message: impl Into<String>) {
        self.succeeded.store(false, Ordering::Relaxed);
        *self.failed_slot() = Some(message.into());
    }

    /// Clears the running flag. Always the last write of a job.
    pub fn finish(&self) {
        self.finished_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.running.store(false, Ordering::Release);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> Option<String> {
        self.failed_slot().clone()
    }

    pub fn batches_sent(&self) -> u64 {
        self.batches_sent.load(Ordering::Relaxed)
    }

    pub fn lines_skipped(&self) -> u64 {
        self.lines_skipped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, destination: &str) -> ProgressSnapshot {
        ProgressSnapshot {
            destination: destination.to_string(),
            total: self.total(),
            progress: self.progress(),
            running: self.is_running(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            batches_sent: self.batches_sent(),
            lines_skipped: self.lines_skipped(),
            started_at: millis_to_datetime(self.started_at_ms.load(Ordering::Relaxed)),
            finished_at: millis_to_datetime(self.finished_at_ms.load(Ordering::Relaxed)),
        }
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis(ms)
}

/// Progress for every destination, created on first use.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    jobs: Mutex<HashMap<String, Arc<JobProgress>>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(&self, destination: &str) -> Arc<JobProgress> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.entry(destination.to_string())
            .or_insert_with(|| Arc::new(JobProgress::default()))
            .clone()
    }

    /// Installs fresh progress for a new run of `destination`, unless a job
    /// already holds it. A finished job keeps writing only to the progress it was
    /// started with.
    pub fn try_begin(&self, destination: &str) -> SeedResult<Arc<JobProgress>> {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs.get(destination).is_some_and(|current| current.is_running()) {
            return Err(SeedError::AlreadyRunning(destination.to_string()));
        }

        let progress = Arc::new(JobProgress::started());
        jobs.insert(destination.to_string(), progress.clone());
        Ok(progress)
    }

    pub fn snapshot(&self, destination: &str) -> ProgressSnapshot {
        self.progress(destination).snapshot(destination)
    }

    pub fn is_running(&self, destination: &str) -> bool {
        self.progress(destination).is_running()
    }

    /// Polling view used by the progress endpoint. A recorded failure clears the
    /// running flag and is returned as the error; reaching the total marks the
    /// import succeeded.
    pub fn poll(&self, destination: &str) -> Result<PollReport, String> {
        let progress = self.progress(destination);

        if let Some(message) = progress.failed() {
            progress.running.store(false, Ordering::Release);
            return Err(message);
        }

        let report = PollReport {
            total: progress.total(),
            progress: progress.progress(),
        };
        if report.total > 0 && report.progress >= report.total {
            progress.running.store(false, Ordering::Release);
            progress.succeeded.store(true, Ordering::Relaxed);
        }
        Ok(report)
    }
}
