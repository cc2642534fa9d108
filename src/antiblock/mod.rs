//! Anti-blocking layer
//!
//! Every attempt at a request runs through two steps:
//! - [`AntiBlocking::prepare`] builds an [`AttemptPlan`]: identity headers, a session
//!   bound to a proxy on the request's current tier, and a politeness delay. On a retry
//!   the previous session is retired first, so a failed identity is never reused.
//! - [`AntiBlocking::after_attempt`] takes the attempt's outcome and returns the
//!   request's next [`Escalation`], retiring the session on a block.
//!
//! Both are plain functions of their inputs plus the shared session pool; nothing here
//! mutates the request itself.

pub mod headers;
pub mod proxy;
pub mod reference;
pub mod session;

pub use headers::{HeaderSet, HeaderSynthesizer};
pub use proxy::{Escalation, ProxyTiers, TiersExhausted};
pub use reference::DeviceClass;
pub use session::{PoolStats, SessionPool};

use crate::config::Config;
use crate::state::Session;
use rand::Rng;
use std::time::Duration;

/// Everything needed to dispatch one attempt
#[derive(Debug, Clone)]
pub struct AttemptPlan {
    pub headers: HeaderSet,
    pub session: Session,
    pub delay: Duration,
}

impl AttemptPlan {
    /// Proxy endpoint for this attempt, if any
    pub fn proxy(&self) -> Option<&str> {
        self.session.proxy.as_deref()
    }
}

/// How an attempt ended, as far as identity management cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Blocked,
    TransientFailure,
    PermanentFailure,
}

/// Per-attempt identity, proxy and delay decisions
#[derive(Debug)]
pub struct AntiBlocking {
    headers: HeaderSynthesizer,
    tiers: ProxyTiers,
    sessions: SessionPool,
    delay_min_ms: u64,
    delay_max_ms: u64,
    failures_before_escalation: u32,
}

impl AntiBlocking {
    pub fn new(config: &Config) -> Self {
        let delay_min_ms = config.crawler.politeness_delay_min_ms;
        Self {
            headers: HeaderSynthesizer::new(&config.headers),
            tiers: ProxyTiers::from_config(&config.effective_proxy_tiers()),
            sessions: SessionPool::new(&config.session),
            delay_min_ms,
            delay_max_ms: config.crawler.politeness_delay_max_ms.max(delay_min_ms),
            failures_before_escalation: config.crawler.failures_before_escalation.max(1),
        }
    }

    pub fn tiers(&self) -> &ProxyTiers {
        &self.tiers
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.sessions.stats()
    }

    /// Builds the plan for the next attempt using the thread-local generator
    pub fn prepare(
        &self,
        retry_count: u32,
        previous_session: Option<u64>,
        escalation: Escalation,
    ) -> AttemptPlan {
        self.prepare_with(retry_count, previous_session, escalation, &mut rand::rng())
    }

    pub fn prepare_with<R: Rng + ?Sized>(
        &self,
        retry_count: u32,
        previous_session: Option<u64>,
        escalation: Escalation,
        rng: &mut R,
    ) -> AttemptPlan {
        if retry_count > 0 {
            if let Some(id) = previous_session {
                if self.sessions.retire(id) {
                    tracing::debug!("Retired session {} before retry {}", id, retry_count);
                }
            }
        }

        let session = self.sessions.checkout(escalation.tier, &self.tiers, rng);
        let headers = self.headers.synthesize(rng);
        let delay = Duration::from_millis(rng.random_range(self.delay_min_ms..=self.delay_max_ms));

        AttemptPlan {
            headers,
            session,
            delay,
        }
    }

    /// Returns the request's escalation state after an attempt
    ///
    /// A block retires the session and escalates immediately. Transport failures
    /// escalate after `failures-before-escalation` in a row on the same tier.
    pub fn after_attempt(
        &self,
        session: &Session,
        escalation: Escalation,
        outcome: AttemptOutcome,
    ) -> Result<Escalation, TiersExhausted> {
        match outcome {
            AttemptOutcome::Success | AttemptOutcome::PermanentFailure => Ok(escalation),
            AttemptOutcome::Blocked => {
                self.sessions.retire(session.id);
                let next = escalation.escalate(&self.tiers)?;
                if next.tier != escalation.tier {
                    tracing::info!(
                        "Blocked on tier {}, escalating to proxy tier {}",
                        escalation.tier,
                        next.tier
                    );
                }
                Ok(next)
            }
            AttemptOutcome::TransientFailure => {
                let failures = escalation.consecutive_failures + 1;
                if failures >= self.failures_before_escalation {
                    escalation.escalate(&self.tiers)
                } else {
                    Ok(Escalation {
                        tier: escalation.tier,
                        consecutive_failures: failures,
                    })
                }
            }
        }
    }
}
