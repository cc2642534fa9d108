//! Job registry and result sink
//!
//! A job exists from the moment a division's crawl starts until it is finalized.
//! While it exists it owns an open record store, the caller's output sink and a
//! cancellation flag. At most one job per division code is active at a time.
//!
//! Finalization removes the job from the registry first, so a job is finalized at
//! most once and its output sees exactly one close or abort.

use crate::output::{emit_records, OutputSink};
use crate::storage::{
    cache_key, CacheEntry, CacheStore, RecordStore, RecordStoreProvider, SchoolRecord,
};
use crate::{CrawlError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Cooperative cancellation shared between a job and its scheduler
#[derive(Debug, Default)]
pub struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Where the scheduler delivers extracted records
pub trait RecordSink: Send + Sync {
    /// Appends a record to the active job for `division_code`
    ///
    /// Records for a division with no active job are logged and discarded.
    fn record_result(&self, division_code: u32, record: SchoolRecord) -> Result<()>;

    /// Whether the job for `division_code` still wants results
    fn is_active(&self, division_code: u32) -> bool;
}

/// State of one in-progress division crawl
pub struct CrawlJob {
    division_code: u32,
    store: Arc<dyn RecordStore>,
    output: Mutex<Option<Box<dyn OutputSink>>>,
    cancel: Arc<CancelFlag>,
}

impl CrawlJob {
    pub fn division_code(&self) -> u32 {
        self.division_code
    }

    pub fn cancel_flag(&self) -> Arc<CancelFlag> {
        self.cancel.clone()
    }

    fn take_output(&self) -> Option<Box<dyn OutputSink>> {
        self.output
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// True once the consumer has gone away
    fn is_output_closed(&self) -> bool {
        self.output
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map_or(true, |sink| sink.is_closed())
    }

    fn drop_store(&self) {
        if let Err(e) = self.store.drop_store() {
            tracing::warn!(
                "Failed to drop record store {} for division {}: {}",
                self.store.name(),
                self.division_code,
                e
            );
        }
    }
}

/// Active jobs keyed by division code
pub struct JobRegistry {
    jobs: Mutex<HashMap<u32, Arc<CrawlJob>>>,
    stores: Arc<dyn RecordStoreProvider>,
}

impl JobRegistry {
    pub fn new(stores: Arc<dyn RecordStoreProvider>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            stores,
        }
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Arc<CrawlJob>>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get(&self, division_code: u32) -> Option<Arc<CrawlJob>> {
        self.jobs().get(&division_code).cloned()
    }

    pub fn is_running(&self, division_code: u32) -> bool {
        self.jobs().contains_key(&division_code)
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs().len()
    }

    /// Registers a job for `division_code` with a freshly opened record store
    ///
    /// A second job for a division that already has one is rejected, and its output
    /// is aborted so the caller still observes a terminal signal.
    pub fn start_job(
        &self,
        division_code: u32,
        output: Box<dyn OutputSink>,
    ) -> Result<Arc<CrawlJob>> {
        let mut jobs = self.jobs();

        if jobs.contains_key(&division_code) {
            let error = CrawlError::JobInProgress { division_code };
            output.abort(&error.to_string());
            return Err(error);
        }

        let store = match self.stores.open(&format!("records-{}", division_code)) {
            Ok(store) => store,
            Err(e) => {
                output.abort(&e.to_string());
                return Err(e.into());
            }
        };

        let job = Arc::new(CrawlJob {
            division_code,
            store,
            output: Mutex::new(Some(output)),
            cancel: Arc::new(CancelFlag::new()),
        });
        jobs.insert(division_code, job.clone());

        tracing::debug!("Started job for division {}", division_code);
        Ok(job)
    }

    /// Requests cancellation of the division's job; false when none is active
    pub fn cancel(&self, division_code: u32) -> bool {
        match self.get(division_code) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Finishes the division's job
    ///
    /// On success the stored records are cached under `fingerprint` and written to the
    /// output, which is then closed. On failure the output is aborted with the error.
    /// The record store is dropped either way.
    ///
    /// A cache write failure is logged and does not withhold the records.
    pub fn finalize_job(
        &self,
        division_code: u32,
        outcome: Result<String>,
        cache: &dyn CacheStore,
    ) -> Result<Vec<SchoolRecord>> {
        let job = self
            .jobs()
            .remove(&division_code)
            .ok_or(CrawlError::NoSuchJob { division_code })?;

        let result = Self::complete(&job, outcome, cache);
        job.drop_store();
        result
    }

    fn complete(
        job: &CrawlJob,
        outcome: Result<String>,
        cache: &dyn CacheStore,
    ) -> Result<Vec<SchoolRecord>> {
        let output = job.take_output();

        let fingerprint = match outcome {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                if let Some(output) = output {
                    output.abort(&e.to_string());
                }
                return Err(e);
            }
        };

        let records = match job.store.get_all() {
            Ok(records) => records,
            Err(e) => {
                if let Some(output) = output {
                    output.abort(&e.to_string());
                }
                return Err(e.into());
            }
        };

        let entry = CacheEntry::new(job.division_code, fingerprint, records);
        if let Err(e) = cache.set(&cache_key(job.division_code), &entry) {
            tracing::error!(
                "Failed to cache results for division {}: {}",
                job.division_code,
                e
            );
        }

        match output {
            Some(output) => emit_records(output, &entry.data)?,
            None => tracing::warn!(
                "Output for division {} was already released",
                job.division_code
            ),
        }

        tracing::info!(
            "Finished division {} with {} records",
            job.division_code,
            entry.data.len()
        );
        Ok(entry.data)
    }

    /// Aborts and removes `job` if it is still registered
    fn release(&self, job: &Arc<CrawlJob>, reason: &str) {
        let removed = {
            let mut jobs = self.jobs();
            match jobs.get(&job.division_code) {
                Some(current) if Arc::ptr_eq(current, job) => jobs.remove(&job.division_code),
                _ => None,
            }
        };

        if let Some(job) = removed {
            tracing::warn!("Releasing division {} job: {}", job.division_code, reason);
            if let Some(output) = job.take_output() {
                output.abort(reason);
            }
            job.drop_store();
        }
    }
}

impl RecordSink for JobRegistry {
    fn record_result(&self, division_code: u32, record: SchoolRecord) -> Result<()> {
        match self.get(division_code) {
            Some(job) => {
                job.store.push(&record)?;
                Ok(())
            }
            None => {
                tracing::warn!(
                    "Discarding record '{}' for division {} with no active job",
                    record.name,
                    division_code
                );
                Ok(())
            }
        }
    }

    fn is_active(&self, division_code: u32) -> bool {
        self.get(division_code)
            .is_some_and(|job| !job.cancel.is_cancelled() && !job.is_output_closed())
    }
}

/// Releases a job that was never finalized, e.g. when its crawl future is dropped
pub struct JobGuard {
    registry: Arc<JobRegistry>,
    job: Option<Arc<CrawlJob>>,
}

impl JobGuard {
    pub fn new(registry: Arc<JobRegistry>, job: Arc<CrawlJob>) -> Self {
        Self {
            registry,
            job: Some(job),
        }
    }

    /// Called after `finalize_job`; the guard then does nothing on drop
    pub fn disarm(mut self) {
        self.job = None;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            self.registry.release(&job, "crawl interrupted");
        }
    }
}
