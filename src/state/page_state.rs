//! Request state definitions for tracking crawl progress
//!
//! This module defines every state a page request can be in while a job runs.
use serde::Serialize;
use std::fmt;

/// Represents the current state of a page request in the crawl process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageState {
    // ===== Active States =====
    /// Request is waiting in the queue
    Queued,

    /// Request is currently being fetched
    Fetching,

    /// Request failed an attempt and was put back with a fresh identity
    Retrying,

    // ===== Terminal Success States =====
    /// Page was fetched and its content extracted
    Processed,

    // ===== Terminal Skip States =====
    /// Request was dropped because its normalized URL was already enqueued
    Duplicate,

    // ===== Terminal Error States =====
    /// Page returned a non-retryable HTTP status (404 and the like)
    DeadLink,

    /// Every attempt was answered with a block signal
    Blocked,

    /// Every attempt ended in a transport error (timeout, refused, TLS)
    Unreachable,

    /// Request failed for other reasons (proxy tiers exhausted, server errors)
    Failed,
}

impl PageState {
    /// Returns true if this is a terminal state (no further processing needed)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Fetching | Self::Retrying)
    }

    /// Returns true if this is an active state (request may still be processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Fetching | Self::Retrying)
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Processed)
    }

    /// Returns true if this represents an error state
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::DeadLink | Self::Blocked | Self::Unreachable | Self::Failed
        )
    }

    /// Short machine-readable name, used in logs and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Retrying => "retrying",
            Self::Processed => "processed",
            Self::Duplicate => "duplicate",
            Self::DeadLink => "dead_link",
            Self::Blocked => "blocked",
            Self::Unreachable => "unreachable",
            Self::Failed => "failed",
        }
    }

    /// Parses a state from its short name
    ///
    /// Returns None if the string doesn't match any known state.
    pub fn from_str_name(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "fetching" => Some(Self::Fetching),
            "retrying" => Some(Self::Retrying),
            "processed" => Some(Self::Processed),
            "duplicate" => Some(Self::Duplicate),
            "dead_link" => Some(Self::DeadLink),
            "blocked" => Some(Self::Blocked),
            "unreachable" => Some(Self::Unreachable),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible request states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Queued,
            Self::Fetching,
            Self::Retrying,
            Self::Processed,
            Self::Duplicate,
            Self::DeadLink,
            Self::Blocked,
            Self::Unreachable,
            Self::Failed,
        ]
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_terminal() {
        assert!(!PageState::Queued.is_terminal());
        assert!(!PageState::Fetching.is_terminal());
        assert!(!PageState::Retrying.is_terminal());

        assert!(PageState::Processed.is_terminal());
        assert!(PageState::Duplicate.is_terminal());
        assert!(PageState::DeadLink.is_terminal());
        assert!(PageState::Blocked.is_terminal());
        assert!(PageState::Unreachable.is_terminal());
        assert!(PageState::Failed.is_terminal());
    }

    #[test]
    fn test_active_and_terminal_partition_all_states() {
        for state in PageState::all_states() {
            assert_ne!(state.is_active(), state.is_terminal(), "{}", state);
        }
    }

    #[test]
    fn test_duplicate_is_neither_success_nor_error() {
        assert!(!PageState::Duplicate.is_success());
        assert!(!PageState::Duplicate.is_error());
    }

    #[test]
    fn test_name_roundtrip() {
        for state in PageState::all_states() {
            assert_eq!(PageState::from_str_name(state.as_str()), Some(state));
        }
        assert_eq!(PageState::from_str_name("invalid"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(PageState::DeadLink.to_string(), "dead_link");
        assert_eq!(PageState::Processed.to_string(), "processed");
    }
}
