//! Orchestrator - the public entry point for division scrapes
//!
//! A `scrape` call:
//! - Probes the division's list page and compares the fingerprint with the cache
//! - Serves the cached records when unchanged, refreshing the entry's timestamp
//! - Otherwise starts a job, runs the scheduler from the first list page, and
//!   finalizes the job into the cache and the caller's output
//! - A crawl with permanently failed requests is cached under the sentinel
//!   fingerprint, so the next check crawls again instead of serving it as complete

use crate::cache::{ChangeDetector, SENTINEL_FINGERPRINT};
use crate::config::Config;
use crate::crawler::fetcher::{Fetcher, HttpFetcher};
use crate::crawler::jobs::{JobGuard, JobRegistry};
use crate::crawler::request::PageRequest;
use crate::crawler::scheduler::{CrawlContext, Scheduler};
use crate::output::{emit_records, output_channel, CrawlReport, OutputSink};
use crate::storage::{
    cache_key, open_storage, CacheEntry, CacheStore, RecordStoreProvider, SchoolRecord,
    SqliteStorage,
};
use crate::url::division_list_url;
use crate::{CrawlError, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Result of one `scrape` call, alongside the records written to its output
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub report: CrawlReport,

    /// Fingerprint the emitted records were cached under
    pub fingerprint: String,
}

/// Shared crawler instance serving scrapes for any number of divisions
pub struct Orchestrator {
    config: Config,
    ctx: Arc<CrawlContext>,
    detector: ChangeDetector,
    registry: Arc<JobRegistry>,
    cache: Arc<dyn CacheStore>,
}

impl Orchestrator {
    /// Creates an orchestrator over HTTP with the configured SQLite database
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    ///
    /// # Returns
    ///
    /// * `Ok(Orchestrator)` - Ready to serve scrapes
    /// * `Err(CrawlError)` - The database could not be opened or the config is unusable
    pub fn new(config: Config) -> Result<Self> {
        let storage = open_storage(Path::new(&config.cache.database_path))?;
        let fetcher = Arc::new(HttpFetcher::new(&config.crawler));
        Self::with_storage(config, fetcher, storage)
    }

    /// Creates an orchestrator with a custom transport over one SQLite storage
    pub fn with_storage(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        storage: SqliteStorage,
    ) -> Result<Self> {
        let storage = Arc::new(storage);
        Self::with_stores(config, fetcher, storage.clone(), storage)
    }

    /// Creates an orchestrator from its individual collaborators
    pub fn with_stores(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn CacheStore>,
        stores: Arc<dyn RecordStoreProvider>,
    ) -> Result<Self> {
        let ctx = Arc::new(CrawlContext::new(&config, fetcher)?);
        let detector = ChangeDetector::new(
            config.cache.strategy,
            ctx.fetcher.clone(),
            ctx.antiblock.clone(),
            ctx.rate.clone(),
            cache.clone(),
        );

        Ok(Self {
            config,
            ctx,
            detector,
            registry: Arc::new(JobRegistry::new(stores)),
            cache,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &Arc<CrawlContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Requests cancellation of the division's running crawl
    pub fn cancel(&self, division_code: u32) -> bool {
        self.registry.cancel(division_code)
    }

    /// Reads the cached entry for a division without probing
    pub fn cached(&self, division_code: u32) -> Result<Option<CacheEntry>> {
        Ok(self.cache.get(&cache_key(division_code))?)
    }

    /// Scrapes a division into `output`
    ///
    /// The output receives the JSON array of records and is then closed, or is aborted
    /// if the scrape fails. Exactly one of the two always happens.
    ///
    /// # Arguments
    ///
    /// * `division_code` - The division to scrape
    /// * `force_refresh` - Crawl even if the fingerprint is unchanged
    /// * `output` - Where the records are written
    ///
    /// # Errors
    ///
    /// * `JobInProgress` - a scrape for this division is already running
    /// * `SeedFailed` - the first list page could not be fetched
    /// * `Cancelled` - the job was cancelled or the consumer went away
    pub async fn scrape(
        &self,
        division_code: u32,
        force_refresh: bool,
        output: Box<dyn OutputSink>,
    ) -> Result<ScrapeOutcome> {
        let started = Instant::now();

        let list_url = match division_list_url(&self.config.site, division_code) {
            Ok(url) => url,
            Err(e) => {
                output.abort(&e.to_string());
                return Err(e.into());
            }
        };

        if self.registry.is_running(division_code) {
            let error = CrawlError::JobInProgress { division_code };
            output.abort(&error.to_string());
            return Err(error);
        }

        let fingerprint = if force_refresh {
            tracing::info!("Force refresh requested for division {}", division_code);
            self.detector.compute_fingerprint(&list_url).await
        } else {
            let freshness = self.detector.check_freshness(division_code, &list_url).await;
            match freshness.cached {
                Some(entry) if freshness.fresh => {
                    return self.serve_cached(entry, output, started);
                }
                _ => freshness.fingerprint,
            }
        };

        let job = self.registry.start_job(division_code, output)?;
        let guard = JobGuard::new(self.registry.clone(), job.clone());

        let scheduler = Scheduler::new(
            self.ctx.clone(),
            self.registry.clone(),
            job.cancel_flag(),
            division_code,
        );
        let crawl = scheduler
            .run(PageRequest::list(list_url, division_code, 1))
            .await;

        let (report, outcome) = match crawl {
            Ok(report) if !report.failures.is_empty() => {
                tracing::warn!(
                    "Division {} finished with {} failed requests, caching as incomplete",
                    division_code,
                    report.failures.len()
                );
                (Some(report), Ok(SENTINEL_FINGERPRINT.to_string()))
            }
            Ok(report) => (Some(report), Ok(fingerprint)),
            Err(e) => {
                tracing::error!("Crawl for division {} failed: {}", division_code, e);
                (None, Err(e))
            }
        };

        let cached_under = outcome.as_ref().ok().cloned();
        let finalized = self
            .registry
            .finalize_job(division_code, outcome, self.cache.as_ref());
        guard.disarm();
        let records = finalized?;

        let mut report = report.unwrap_or_else(|| CrawlReport::new(division_code));
        report.records_emitted = records.len();
        report.elapsed = started.elapsed();

        tracing::info!(
            "Division {} scraped: {} records in {:.1}s",
            division_code,
            records.len(),
            report.elapsed.as_secs_f64()
        );

        Ok(ScrapeOutcome {
            report,
            fingerprint: cached_under.unwrap_or_else(|| SENTINEL_FINGERPRINT.to_string()),
        })
    }

    fn serve_cached(
        &self,
        entry: CacheEntry,
        output: Box<dyn OutputSink>,
        started: Instant,
    ) -> Result<ScrapeOutcome> {
        let entry = entry.touched();
        if let Err(e) = self.cache.set(&cache_key(entry.division_code), &entry) {
            tracing::warn!(
                "Failed to refresh cache timestamp for division {}: {}",
                entry.division_code,
                e
            );
        }

        emit_records(output, &entry.data)?;

        tracing::info!(
            "Division {} unchanged, served {} cached records",
            entry.division_code,
            entry.data.len()
        );

        let mut report = CrawlReport::new(entry.division_code);
        report.cache_hit = true;
        report.records_emitted = entry.data.len();
        report.elapsed = started.elapsed();

        Ok(ScrapeOutcome {
            report,
            fingerprint: entry.fingerprint,
        })
    }

    /// Scrapes a division and collects the emitted records in memory
    pub async fn scrape_to_vec(
        &self,
        division_code: u32,
        force_refresh: bool,
    ) -> Result<(Vec<SchoolRecord>, ScrapeOutcome)> {
        let (sink, stream) = output_channel();

        let (outcome, body) = tokio::join!(
            self.scrape(division_code, force_refresh, Box::new(sink)),
            stream.collect()
        );

        let outcome = outcome?;
        let records: Vec<SchoolRecord> = serde_json::from_slice(&body?)?;
        Ok((records, outcome))
    }
}
