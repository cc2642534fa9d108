//! Shared session pool
//!
//! Checkout and retirement happen under one lock, so a session retired by one request
//! is never handed to another afterwards.

use super::proxy::ProxyTiers;
use crate::config::SessionConfig;
use crate::state::Session;
use rand::Rng;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct PoolInner {
    sessions: Vec<Session>,
    next_id: u64,
    created: u64,
    retired: u64,
}

/// Pool of live sessions, partitioned by proxy tier
#[derive(Debug)]
pub struct SessionPool {
    inner: Mutex<PoolInner>,
    max_usage_count: u32,
    max_pool_size: usize,
}

/// Pool counters for logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub live: usize,
    pub created: u64,
    pub retired: u64,
}

impl SessionPool {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            max_usage_count: config.max_usage_count.max(1),
            max_pool_size: (config.max_pool_size as usize).max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        // The pool holds no invariants a panicking holder could have broken halfway
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Checks out a session on `tier`, counting the use
    ///
    /// Reuses a random usable session on that tier when one exists, otherwise creates
    /// one bound to a random endpoint of the tier. A session that reaches its usage
    /// ceiling with this checkout is retired and leaves the pool immediately.
    pub fn checkout<R: Rng + ?Sized>(
        &self,
        tier: usize,
        tiers: &ProxyTiers,
        rng: &mut R,
    ) -> Session {
        let mut inner = self.lock();

        let candidates: Vec<usize> = inner
            .sessions
            .iter()
            .enumerate()
            .filter(|(_, s)| s.proxy_tier == tier && s.is_usable(self.max_usage_count))
            .map(|(i, _)| i)
            .collect();

        let index = if candidates.is_empty() {
            if inner.sessions.len() >= self.max_pool_size {
                // Make room by dropping the most used session
                let most_used = inner
                    .sessions
                    .iter()
                    .enumerate()
                    .max_by_key(|(_, s)| s.usage_count)
                    .map(|(i, _)| i);
                if let Some(oldest) = most_used {
                    inner.sessions.remove(oldest);
                    inner.retired += 1;
                }
            }

            let id = inner.next_id;
            inner.next_id += 1;
            inner.created += 1;
            let proxy = tiers.pick_endpoint(tier, rng);
            inner.sessions.push(Session::new(id, tier, proxy));
            inner.sessions.len() - 1
        } else {
            candidates[rng.random_range(0..candidates.len())]
        };

        let max_usage = self.max_usage_count;
        inner.sessions[index].record_use(max_usage);
        let snapshot = inner.sessions[index].clone();

        if snapshot.retired {
            inner.sessions.remove(index);
            inner.retired += 1;
        }

        snapshot
    }

    /// Retires a session so it is never handed out again
    ///
    /// Returns false if the session had already left the pool.
    pub fn retire(&self, session_id: u64) -> bool {
        let mut inner = self.lock();
        match inner.sessions.iter().position(|s| s.id == session_id) {
            Some(index) => {
                inner.sessions.remove(index);
                inner.retired += 1;
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        PoolStats {
            live: inner.sessions.len(),
            created: inner.created,
            retired: inner.retired,
        }
    }
}
