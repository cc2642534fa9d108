//! Request scheduler for one division crawl
//!
//! This module handles:
//! - The job's FIFO request queue with per-division URL deduplication
//! - The current [`PageState`] of every accepted request, keyed like the dedup set
//! - Global concurrency limiting via a semaphore shared by every job
//! - Per-attempt identity, delay and rate-window gating
//! - Retry, escalation and terminal failure bookkeeping
//!
//! A scheduler runs until its queue is empty and nothing is in flight, or until the
//! job is cancelled, its output consumer goes away, or the seed request fails.

use crate::antiblock::{AntiBlocking, AttemptOutcome};
use crate::config::Config;
use crate::crawler::autoscale::AutoscaleController;
use crate::crawler::fetcher::{classify_response, BlockPolicy, FetchRequest, FetchResult, Fetcher};
use crate::crawler::jobs::{CancelFlag, RecordSink};
use crate::crawler::parser::{address_selector, parse_detail_page_with, parse_list_page, ListPage};
use crate::crawler::request::{PageKind, PageRequest};
use crate::output::{CrawlReport, FailureRecord};
use crate::state::{PageState, RateWindow};
use crate::url::{dedup_key, list_page_url};
use crate::{CrawlError, Result};
use scraper::Selector;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use url::Url;

/// How often an idle scheduler re-checks cancellation and consumer liveness
const LIVENESS_POLL: Duration = Duration::from_millis(200);

/// Components shared by every job's scheduler
///
/// One context backs all concurrent jobs, so the concurrency ceiling, rate window and
/// session pool are global rather than per division.
pub struct CrawlContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub antiblock: Arc<AntiBlocking>,
    pub rate: Arc<RateWindow>,
    pub autoscale: Arc<AutoscaleController>,
    permits: Arc<Semaphore>,
    block_policy: BlockPolicy,
    address_selector: Selector,
    max_concurrency: usize,
    max_request_retries: u32,
}

impl CrawlContext {
    /// Creates the shared context
    ///
    /// # Arguments
    ///
    /// * `config` - The validated configuration
    /// * `fetcher` - Transport used for every page fetch
    ///
    /// # Returns
    ///
    /// The context, or a configuration error if the address selector does not compile
    pub fn new(config: &Config, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let max_concurrency = (config.crawler.max_concurrency as usize).max(1);

        Ok(Self {
            fetcher,
            antiblock: Arc::new(AntiBlocking::new(config)),
            rate: Arc::new(RateWindow::new(config.crawler.max_requests_per_minute)),
            autoscale: Arc::new(AutoscaleController::new(
                &config.autoscale,
                config.crawler.max_concurrency,
            )),
            permits: Arc::new(Semaphore::new(max_concurrency)),
            block_policy: BlockPolicy::new(&config.crawler),
            address_selector: address_selector(&config.site.address_selector)?,
            max_concurrency,
            max_request_retries: config.crawler.max_request_retries,
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Fetches currently holding a permit, across all jobs
    pub fn in_flight(&self) -> usize {
        self.max_concurrency - self.permits.available_permits()
    }
}

/// What a finished attempt asks the scheduler to do next
enum TaskOutcome {
    Listed { request: PageRequest, page: ListPage },
    Recorded { request: PageRequest },
    Retry { request: PageRequest, reason: String },
    Failed {
        request: PageRequest,
        state: PageState,
        reason: String,
    },
    Fatal(CrawlError),
}

enum Event {
    Permit(Option<OwnedSemaphorePermit>),
    Joined(std::result::Result<TaskOutcome, JoinError>),
    Wake,
}

/// Drives one division's requests to completion
pub struct Scheduler {
    ctx: Arc<CrawlContext>,
    sink: Arc<dyn RecordSink>,
    cancel: Arc<CancelFlag>,
    division_code: u32,
    queue: VecDeque<PageRequest>,
    states: HashMap<String, PageState>,
    in_flight: JoinSet<TaskOutcome>,
    report: CrawlReport,
}

impl Scheduler {
    pub fn new(
        ctx: Arc<CrawlContext>,
        sink: Arc<dyn RecordSink>,
        cancel: Arc<CancelFlag>,
        division_code: u32,
    ) -> Self {
        Self {
            ctx,
            sink,
            cancel,
            division_code,
            queue: VecDeque::new(),
            states: HashMap::new(),
            in_flight: JoinSet::new(),
            report: CrawlReport::new(division_code),
        }
    }

    /// Adds a request unless its normalized URL was already enqueued for this division
    ///
    /// Returns whether the request was accepted.
    pub fn enqueue(&mut self, request: PageRequest) -> bool {
        let key = dedup_key(request.division_code, request.url.as_str());
        if self.states.contains_key(&key) {
            tracing::debug!("Skipping duplicate {} {}", request.label(), request.url);
            self.report.record_state(PageState::Duplicate);
            return false;
        }
        self.states.insert(key, PageState::Queued);

        match request.kind {
            PageKind::List { .. } => self.report.list_requests += 1,
            PageKind::Detail { .. } => self.report.detail_requests += 1,
        }
        self.queue.push_back(request);
        true
    }

    /// Runs the crawl from `seed` and returns its report
    ///
    /// # Errors
    ///
    /// * `SeedFailed` - the first list page failed permanently
    /// * `Cancelled` - the job was cancelled or its consumer went away
    /// * any record store error raised while appending results
    pub async fn run(mut self, seed: PageRequest) -> Result<CrawlReport> {
        tracing::info!("Crawling division {} from {}", self.division_code, seed.url);
        self.enqueue(seed);

        loop {
            if self.should_stop() {
                let error = CrawlError::Cancelled {
                    division_code: self.division_code,
                };
                return Err(self.shutdown(error).await);
            }

            self.ctx.autoscale.tick();

            let can_dispatch = !self.queue.is_empty() && self.in_flight.len() < self.capacity();
            if !can_dispatch && self.in_flight.is_empty() {
                break;
            }

            let permits = self.ctx.permits.clone();
            let cancel = self.cancel.clone();
            let event = tokio::select! {
                permit = permits.acquire_owned(), if can_dispatch => Event::Permit(permit.ok()),
                Some(joined) = self.in_flight.join_next() => Event::Joined(joined),
                _ = cancel.cancelled() => Event::Wake,
                _ = tokio::time::sleep(LIVENESS_POLL) => Event::Wake,
            };

            match event {
                Event::Permit(Some(permit)) => self.dispatch(permit),
                Event::Permit(None) => {
                    let error = CrawlError::Cancelled {
                        division_code: self.division_code,
                    };
                    return Err(self.shutdown(error).await);
                }
                Event::Joined(joined) => {
                    if let Err(e) = self.handle(joined) {
                        return Err(self.shutdown(e).await);
                    }
                }
                Event::Wake => {}
            }
        }

        tracing::info!(
            "Division {} drained: {} processed, {} failed, {} retries",
            self.division_code,
            self.report.count(PageState::Processed),
            self.report.failures.len(),
            self.report.retries
        );
        Ok(self.report)
    }

    /// Current local ceiling: the autoscaled desire, never above max-concurrency
    fn capacity(&self) -> usize {
        self.ctx
            .autoscale
            .desired()
            .clamp(1, self.ctx.max_concurrency)
    }

    /// Current state of the request for `url`, if it was ever accepted
    pub fn state_of(&self, url: &Url) -> Option<PageState> {
        self.states
            .get(&dedup_key(self.division_code, url.as_str()))
            .copied()
    }

    /// Requests accepted but not yet in a terminal state
    pub fn unfinished(&self) -> usize {
        self.states.values().filter(|state| state.is_active()).count()
    }

    fn transition(&mut self, request: &PageRequest, state: PageState) {
        tracing::trace!("{} {} -> {}", request.label(), request.url, state);
        self.states
            .insert(dedup_key(request.division_code, request.url.as_str()), state);
    }

    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || !self.sink.is_active(self.division_code)
    }

    fn dispatch(&mut self, permit: OwnedSemaphorePermit) {
        let Some(request) = self.queue.pop_front() else {
            return;
        };
        self.transition(&request, PageState::Fetching);

        let ctx = self.ctx.clone();
        let sink = self.sink.clone();
        self.in_flight.spawn(async move {
            let outcome = attempt(&ctx, sink.as_ref(), request).await;
            drop(permit);
            outcome
        });

        self.report.peak_in_flight = self.report.peak_in_flight.max(self.in_flight.len());
    }

    fn handle(&mut self, joined: std::result::Result<TaskOutcome, JoinError>) -> Result<()> {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Crawl task for division {} died: {}", self.division_code, e);
                self.report.record_state(PageState::Failed);
                return Ok(());
            }
        };

        match outcome {
            TaskOutcome::Listed { request, page } => self.on_list_page(request, page),
            TaskOutcome::Recorded { request } => {
                tracing::debug!("Recorded {}", request.url);
                self.transition(&request, PageState::Processed);
                self.report.record_state(PageState::Processed);
            }
            TaskOutcome::Retry { request, reason } => {
                tracing::warn!(
                    "Retrying {} {} (attempt {}/{}): {}",
                    request.label(),
                    request.url,
                    request.retry_count + 1,
                    self.ctx.max_request_retries + 1,
                    reason
                );
                self.report.retries += 1;
                self.transition(&request, PageState::Retrying);
                self.queue.push_back(request);
            }
            TaskOutcome::Failed {
                request,
                state,
                reason,
            } => {
                tracing::warn!(
                    "Giving up on {} {} after {} retries: {}",
                    request.label(),
                    request.url,
                    request.retry_count,
                    reason
                );
                self.transition(&request, state);

                if request.is_seed() {
                    return Err(CrawlError::SeedFailed {
                        url: request.url.to_string(),
                        attempts: request.retry_count + 1,
                        reason,
                    });
                }

                self.report.record_failure(FailureRecord {
                    url: request.url.to_string(),
                    kind: state,
                    retries: request.retry_count,
                    reason,
                });
            }
            TaskOutcome::Fatal(e) => return Err(e),
        }

        Ok(())
    }

    fn on_list_page(&mut self, request: PageRequest, page: ListPage) {
        self.transition(&request, PageState::Processed);
        self.report.record_state(PageState::Processed);

        let current = match request.kind {
            PageKind::List { page: number } => number,
            PageKind::Detail { .. } => return,
        };

        tracing::info!(
            "Division {} list page {}/{}: {} schools",
            self.division_code,
            current,
            page.total_pages,
            page.links.len()
        );

        for link in page.links {
            self.enqueue(PageRequest::detail(link.url, self.division_code, link.stub));
        }

        if current < page.total_pages {
            let next = current + 1;
            self.enqueue(PageRequest::list(
                list_page_url(&request.url, next),
                self.division_code,
                next,
            ));
        }
    }

    /// Stops every in-flight task and returns `error` for the caller to propagate
    async fn shutdown(&mut self, error: CrawlError) -> CrawlError {
        tracing::warn!(
            "Stopping division {} with {} in flight and {} unfinished: {}",
            self.division_code,
            self.in_flight.len(),
            self.unfinished(),
            error
        );

        self.in_flight.abort_all();
        while self.in_flight.join_next().await.is_some() {}
        self.queue.clear();

        error
    }
}

/// Performs one attempt at `request` and decides what happens next
async fn attempt(ctx: &CrawlContext, sink: &dyn RecordSink, request: PageRequest) -> TaskOutcome {
    let plan = ctx
        .antiblock
        .prepare(request.retry_count, request.session_id, request.escalation);

    if !plan.delay.is_zero() {
        tokio::time::sleep(plan.delay).await;
    }
    ctx.rate.acquire().await;

    let mut fetch = FetchRequest::get(request.url.clone());
    fetch.headers = plan.headers.to_pairs();
    fetch.proxy = plan.proxy().map(str::to_string);

    tracing::debug!(
        "Fetching {} {} (attempt {}, session {}, {})",
        request.label(),
        request.url,
        request.retry_count + 1,
        plan.session.id,
        plan.headers.device
    );
    let result = classify_response(ctx.fetcher.fetch(fetch).await, &ctx.block_policy);

    let (outcome, failed_state) = match &result {
        FetchResult::Success(_) => (AttemptOutcome::Success, PageState::Processed),
        FetchResult::Blocked { .. } => (AttemptOutcome::Blocked, PageState::Blocked),
        FetchResult::HttpError {
            transient: true, ..
        } => (AttemptOutcome::TransientFailure, PageState::Failed),
        FetchResult::HttpError {
            transient: false, ..
        } => (AttemptOutcome::PermanentFailure, PageState::DeadLink),
        FetchResult::NetworkError { .. } => (AttemptOutcome::TransientFailure, PageState::Unreachable),
    };

    let escalation = match ctx
        .antiblock
        .after_attempt(&plan.session, request.escalation, outcome)
    {
        Ok(escalation) => escalation,
        Err(exhausted) => {
            return TaskOutcome::Failed {
                reason: format!(
                    "{}; proxy tiers exhausted at tier {}",
                    result.describe(),
                    exhausted.tier
                ),
                state: PageState::Failed,
                request,
            }
        }
    };

    let response = match result {
        FetchResult::Success(response) => response,
        failure => {
            let reason = failure.describe();
            if !failure.is_retryable() || request.retry_count >= ctx.max_request_retries {
                return TaskOutcome::Failed {
                    request,
                    state: failed_state,
                    reason,
                };
            }
            return TaskOutcome::Retry {
                request: request.next_attempt(plan.session.id, escalation),
                reason,
            };
        }
    };

    match request.kind.clone() {
        PageKind::List { .. } => {
            let page = parse_list_page(&response.body, &response.final_url);
            TaskOutcome::Listed { request, page }
        }
        PageKind::Detail { stub } => {
            let address = parse_detail_page_with(&response.body, &ctx.address_selector);
            let record = stub.into_record(address, request.division_code);
            match sink.record_result(request.division_code, record) {
                Ok(()) => TaskOutcome::Recorded { request },
                Err(e) => TaskOutcome::Fatal(e),
            }
        }
    }
}
