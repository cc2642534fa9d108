//! Page requests as they move through the scheduler

use crate::antiblock::Escalation;
use crate::storage::SchoolStub;
use url::Url;

/// What a request fetches, with the data only that kind carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageKind {
    /// A page of the division's school table
    List { page: u32 },

    /// A school's own page; the stub comes from the list row that linked to it
    Detail { stub: SchoolStub },
}

/// One unit of scheduler work
///
/// The URL, kind and division never change after enqueue. The retry count, last
/// session and escalation are updated between attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub url: Url,
    pub kind: PageKind,
    pub division_code: u32,
    pub retry_count: u32,
    pub session_id: Option<u64>,
    pub escalation: Escalation,
}

impl PageRequest {
    pub fn list(url: Url, division_code: u32, page: u32) -> Self {
        Self::new(url, PageKind::List { page }, division_code)
    }

    pub fn detail(url: Url, division_code: u32, stub: SchoolStub) -> Self {
        Self::new(url, PageKind::Detail { stub }, division_code)
    }

    fn new(url: Url, kind: PageKind, division_code: u32) -> Self {
        Self {
            url,
            kind,
            division_code,
            retry_count: 0,
            session_id: None,
            escalation: Escalation::default(),
        }
    }

    /// The first list page; losing it fails the whole job
    pub fn is_seed(&self) -> bool {
        matches!(self.kind, PageKind::List { page: 1 })
    }

    pub fn label(&self) -> &'static str {
        match self.kind {
            PageKind::List { .. } => "LIST",
            PageKind::Detail { .. } => "DETAIL",
        }
    }

    /// The same request, set up for its next attempt
    pub fn next_attempt(mut self, session_id: u64, escalation: Escalation) -> Self {
        self.retry_count += 1;
        self.session_id = Some(session_id);
        self.escalation = escalation;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://example.com/list?division=1").unwrap()
    }

    #[test]
    fn test_seed_is_first_list_page() {
        assert!(PageRequest::list(url(), 1, 1).is_seed());
        assert!(!PageRequest::list(url(), 1, 2).is_seed());

        let stub = SchoolStub {
            name: "A".to_string(),
            division: "B".to_string(),
            grade_span: "K-5".to_string(),
        };
        assert!(!PageRequest::detail(url(), 1, stub).is_seed());
    }

    #[test]
    fn test_next_attempt_keeps_identity_fields() {
        let request = PageRequest::list(url(), 9, 1);
        let escalation = Escalation {
            tier: 1,
            consecutive_failures: 0,
        };

        let retry = request.clone().next_attempt(42, escalation);

        assert_eq!(retry.url, request.url);
        assert_eq!(retry.kind, request.kind);
        assert_eq!(retry.division_code, 9);
        assert_eq!(retry.retry_count, 1);
        assert_eq!(retry.session_id, Some(42));
        assert_eq!(retry.escalation.tier, 1);
    }
}
