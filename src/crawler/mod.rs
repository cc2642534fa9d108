//! Crawler module for division scrapes
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching and response classification
//! - List and detail page extraction
//! - Request scheduling with retries, escalation and autoscaling
//! - The job registry and the orchestrator tying it all together

mod autoscale;
mod coordinator;
mod fetcher;
mod jobs;
mod parser;
mod request;
mod scheduler;

pub use autoscale::AutoscaleController;
pub use coordinator::{Orchestrator, ScrapeOutcome};
pub use fetcher::{
    build_http_client, classify_response, BlockPolicy, FetchError, FetchMethod, FetchRequest,
    FetchResponse, FetchResult, Fetcher, HttpFetcher,
};
pub use jobs::{CancelFlag, CrawlJob, JobGuard, JobRegistry, RecordSink};
pub use parser::{
    address_selector, parse_detail_page, parse_detail_page_with, parse_list_page, ListPage,
    SchoolLink,
};
pub use request::{PageKind, PageRequest};
pub use scheduler::{CrawlContext, Scheduler};

pub(crate) use parser::{find_schools_table, pagination_html};
