//! State module for tracking crawl progress
//!
//! This module provides state management for page requests and crawl identities.
//!
//! # Components
//!
//! - `PageState`: Tracks the state of individual page requests (queued, fetching, processed, etc.)
//! - `Session`: A bound crawl identity with a usage count and retirement flag
//! - `RateWindow`: Rolling per-minute dispatch ceiling shared across jobs

mod page_state;
mod rate_window;
mod session;

// Re-export main types
pub use page_state::PageState;
pub use rate_window::{DispatchLog, RateWindow};
pub use session::Session;
