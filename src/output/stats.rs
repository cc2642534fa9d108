//! Per-job crawl report
//!
//! This module provides the summary a job returns alongside its record stream and the
//! formatting used by the CLI to display it.

use crate::state::PageState;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

/// A request that reached a failed terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub url: String,
    pub kind: PageState,
    pub retries: u32,
    pub reason: String,
}

/// Crawl statistics for one `scrape` call
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlReport {
    /// Division this report covers
    pub division_code: u32,

    /// Whether the result was served from the cache without crawling
    pub cache_hit: bool,

    /// Count of requests by terminal state
    pub pages_by_state: HashMap<PageState, u64>,

    /// Requests that failed permanently
    pub failures: Vec<FailureRecord>,

    /// LIST requests enqueued, including the seed
    pub list_requests: u64,

    /// DETAIL requests enqueued
    pub detail_requests: u64,

    /// Attempts beyond the first across all requests
    pub retries: u64,

    /// Highest number of simultaneously in-flight fetches
    pub peak_in_flight: usize,

    /// Records written to the output
    pub records_emitted: usize,

    /// Wall-clock time for the whole call
    #[serde(skip)]
    pub elapsed: Duration,
}

impl CrawlReport {
    pub fn new(division_code: u32) -> Self {
        Self {
            division_code,
            ..Self::default()
        }
    }

    /// Records a request reaching a terminal state
    pub fn record_state(&mut self, state: PageState) {
        *self.pages_by_state.entry(state).or_insert(0) += 1;
    }

    /// Records a permanent failure and counts its terminal state
    pub fn record_failure(&mut self, failure: FailureRecord) {
        self.record_state(failure.kind);
        self.failures.push(failure);
    }

    /// Number of requests that reached a given state
    pub fn count(&self, state: PageState) -> u64 {
        self.pages_by_state.get(&state).copied().unwrap_or(0)
    }

    /// Total requests that reached a terminal state other than `Duplicate`
    pub fn total_fetched(&self) -> u64 {
        self.pages_by_state
            .iter()
            .filter(|(state, _)| **state != PageState::Duplicate)
            .map(|(_, count)| count)
            .sum()
    }

    /// Returns the success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.total_fetched();
        if total == 0 {
            return 0.0;
        }
        (self.count(PageState::Processed) as f64 / total as f64) * 100.0
    }
}

/// Formats a report as human-readable text
pub fn format_report(report: &CrawlReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "=== Crawl Report: division {} ===", report.division_code);
    let _ = writeln!(out);

    if report.cache_hit {
        let _ = writeln!(out, "Served from cache (content unchanged)");
        let _ = writeln!(out, "  Records emitted: {}", report.records_emitted);
        let _ = writeln!(out, "  Elapsed: {:.2}s", report.elapsed.as_secs_f64());
        return out;
    }

    let _ = writeln!(out, "Overview:");
    let _ = writeln!(out, "  List requests: {}", report.list_requests);
    let _ = writeln!(out, "  Detail requests: {}", report.detail_requests);
    let _ = writeln!(out, "  Retries: {}", report.retries);
    let _ = writeln!(out, "  Peak in flight: {}", report.peak_in_flight);
    let _ = writeln!(out, "  Records emitted: {}", report.records_emitted);
    let _ = writeln!(out, "  Elapsed: {:.2}s", report.elapsed.as_secs_f64());
    let _ = writeln!(out);

    let _ = writeln!(out, "Requests by State:");
    let mut state_counts: Vec<_> = report.pages_by_state.iter().collect();
    state_counts.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
    for (state, count) in state_counts {
        let _ = writeln!(out, "  {}: {}", state, count);
    }
    let _ = writeln!(out);

    if !report.failures.is_empty() {
        let _ = writeln!(out, "Failures ({}):", report.failures.len());
        for failure in &report.failures {
            let _ = writeln!(
                out,
                "  - [{}] {} after {} retries: {}",
                failure.kind, failure.url, failure.retries, failure.reason
            );
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(
        out,
        "Success Rate: {:.1}% ({} / {} requests processed)",
        report.success_rate(),
        report.count(PageState::Processed),
        report.total_fetched()
    );

    out
}

/// Prints a report to stderr, keeping stdout free for the record stream
pub fn print_report(report: &CrawlReport) {
    eprint!("{}", format_report(report));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_failure_counts_state() {
        let mut report = CrawlReport::new(5);
        report.record_state(PageState::Processed);
        report.record_failure(FailureRecord {
            url: "https://example.com/school/1".to_string(),
            kind: PageState::Unreachable,
            retries: 3,
            reason: "connection reset".to_string(),
        });

        assert_eq!(report.count(PageState::Processed), 1);
        assert_eq!(report.count(PageState::Unreachable), 1);
        assert_eq!(report.failures.len(), 1);
    }

    #[test]
    fn test_success_rate_ignores_duplicates() {
        let mut report = CrawlReport::new(5);
        for _ in 0..3 {
            report.record_state(PageState::Processed);
        }
        report.record_state(PageState::Failed);
        report.record_state(PageState::Duplicate);
        report.record_state(PageState::Duplicate);

        assert_eq!(report.total_fetched(), 4);
        assert!((report.success_rate() - 75.0).abs() < 0.01);
    }

    #[test]
    fn test_success_rate_zero_requests() {
        assert_eq!(CrawlReport::new(1).success_rate(), 0.0);
    }

    #[test]
    fn test_format_report_lists_failures() {
        let mut report = CrawlReport::new(12);
        report.list_requests = 2;
        report.detail_requests = 5;
        report.record_failure(FailureRecord {
            url: "https://example.com/school/9".to_string(),
            kind: PageState::Blocked,
            retries: 3,
            reason: "status 403".to_string(),
        });

        let text = format_report(&report);
        assert!(text.contains("division 12"));
        assert!(text.contains("Detail requests: 5"));
        assert!(text.contains("https://example.com/school/9 after 3 retries"));
    }

    #[test]
    fn test_format_report_cache_hit() {
        let mut report = CrawlReport::new(12);
        report.cache_hit = true;
        report.records_emitted = 4;

        let text = format_report(&report);
        assert!(text.contains("Served from cache"));
        assert!(!text.contains("Requests by State"));
    }
}
