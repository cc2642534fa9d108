//! Change-detection cache
//!
//! Decides whether a division needs a full crawl. Every check issues one cheap probe
//! of the division's first list page (HEAD or GET, depending on the strategy),
//! fingerprints it, and compares against the stored [`CacheEntry`]. Failures never
//! escape: they degrade to [`SENTINEL_FINGERPRINT`], which forces a crawl.

mod fingerprint;

pub use fingerprint::{
    content_fingerprint, content_fingerprint_from, fingerprints_match, header_fingerprint,
    header_fingerprint_from, normalize_fragment, FingerprintError, SENTINEL_FINGERPRINT,
};

use crate::antiblock::{AntiBlocking, Escalation};
use crate::config::FingerprintStrategy;
use crate::crawler::{FetchRequest, Fetcher};
use crate::state::RateWindow;
use crate::storage::{cache_key, CacheEntry, CacheStore};
use std::sync::Arc;
use url::Url;

/// Outcome of a freshness check
#[derive(Debug, Clone)]
pub struct Freshness {
    /// True when the stored entry can be served as-is
    pub fresh: bool,

    /// Fingerprint of the current upstream content (possibly the sentinel)
    pub fingerprint: String,

    /// The stored entry, when one exists
    pub cached: Option<CacheEntry>,
}

/// Computes fingerprints and compares them with the cache
pub struct ChangeDetector {
    strategy: FingerprintStrategy,
    fetcher: Arc<dyn Fetcher>,
    antiblock: Arc<AntiBlocking>,
    rate: Arc<RateWindow>,
    cache: Arc<dyn CacheStore>,
}

impl ChangeDetector {
    pub fn new(
        strategy: FingerprintStrategy,
        fetcher: Arc<dyn Fetcher>,
        antiblock: Arc<AntiBlocking>,
        rate: Arc<RateWindow>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            strategy,
            fetcher,
            antiblock,
            rate,
            cache,
        }
    }

    /// Fingerprints the division's list page and compares it with the stored entry
    pub async fn check_freshness(&self, division_code: u32, list_url: &Url) -> Freshness {
        let fingerprint = self.compute_fingerprint(list_url).await;

        let cached = match self.cache.get(&cache_key(division_code)) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(
                    "Cache read failed for division {}, treating as stale: {}",
                    division_code,
                    e
                );
                None
            }
        };

        let fresh = cached
            .as_ref()
            .is_some_and(|entry| fingerprints_match(&fingerprint, &entry.fingerprint));

        tracing::debug!(
            "Division {} fingerprint {} ({})",
            division_code,
            fingerprint,
            if fresh { "unchanged" } else { "stale" }
        );

        Freshness {
            fresh,
            fingerprint,
            cached,
        }
    }

    /// Fingerprints the list page, returning the sentinel on any failure
    pub async fn compute_fingerprint(&self, list_url: &Url) -> String {
        match self.try_fingerprint(list_url).await {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                tracing::warn!("Fingerprint unavailable for {}: {}", list_url, e);
                SENTINEL_FINGERPRINT.to_string()
            }
        }
    }

    async fn try_fingerprint(&self, list_url: &Url) -> Result<String, FingerprintError> {
        let plan = self.antiblock.prepare(0, None, Escalation::default());

        let mut request = match self.strategy {
            FingerprintStrategy::Header => FetchRequest::head(list_url.clone()),
            FingerprintStrategy::Content => FetchRequest::get(list_url.clone()),
        };
        request.headers = plan.headers.to_pairs();
        request.proxy = plan.proxy().map(str::to_string);

        self.rate.acquire().await;
        let response = self
            .fetcher
            .fetch(request)
            .await
            .map_err(|e| FingerprintError::Probe(e.to_string()))?;

        match self.strategy {
            FingerprintStrategy::Header => header_fingerprint_from(&response),
            FingerprintStrategy::Content => content_fingerprint_from(&response),
        }
    }
}
