//! Session identity values
//!
//! A session is a bound identity (proxy endpoint plus connection) usable for a bounded
//! number of requests. It is passed around as a plain value; the pool that hands them
//! out lives in `antiblock::session`.

/// Snapshot of a session at checkout time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Pool-unique identifier
    pub id: u64,

    /// Requests served so far, including the one this snapshot was checked out for
    pub usage_count: u32,

    /// Proxy tier the session was created on
    pub proxy_tier: usize,

    /// Proxy endpoint bound to this session (None for a direct connection)
    pub proxy: Option<String>,

    /// Whether the session has been retired; retired sessions are never handed out again
    pub retired: bool,
}

impl Session {
    /// Creates a fresh, unused session
    pub fn new(id: u64, proxy_tier: usize, proxy: Option<String>) -> Self {
        Self {
            id,
            usage_count: 0,
            proxy_tier,
            proxy,
            retired: false,
        }
    }

    /// Whether the session can serve another request under the given ceiling
    pub fn is_usable(&self, max_usage_count: u32) -> bool {
        !self.retired && self.usage_count < max_usage_count
    }

    /// Records one more request served, retiring the session once it hits the ceiling
    pub fn record_use(&mut self, max_usage_count: u32) {
        self.usage_count += 1;
        if self.usage_count >= max_usage_count {
            self.retired = true;
        }
    }

    /// Marks the session retired
    pub fn retire(&mut self) {
        self.retired = true;
    }
}
