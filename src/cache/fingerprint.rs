//! Fingerprint computation for list pages
//!
//! Two strategies produce a hex SHA-256 digest:
//! - header: the ETag, Last-Modified and Content-Length validators of a HEAD probe
//! - content: the normalized schools table and pager HTML of the first list page

use crate::crawler::{find_schools_table, pagination_html, FetchResponse};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Fingerprint that never matches anything, itself included
pub const SENTINEL_FINGERPRINT: &str = "unavailable";

static COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment regex"));

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static TAG_BOUNDARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\s*([<>"'])\s*"#).expect("valid boundary regex"));

/// Why a fingerprint could not be computed
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Probe request failed: {0}")]
    Probe(String),

    #[error("Probe returned status {0}")]
    Status(u16),

    #[error("List page has no schools table")]
    MissingTable,
}

/// Whether two fingerprints prove the content unchanged
///
/// The sentinel compares unequal to everything, so a failed fingerprint always forces
/// a crawl.
pub fn fingerprints_match(current: &str, stored: &str) -> bool {
    current != SENTINEL_FINGERPRINT && stored != SENTINEL_FINGERPRINT && current == stored
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hashes the validator headers, joined by commas; a missing header is an empty string
pub fn header_fingerprint(
    etag: Option<&str>,
    last_modified: Option<&str>,
    content_length: Option<&str>,
) -> String {
    let joined = [etag, last_modified, content_length]
        .iter()
        .map(|v| v.unwrap_or(""))
        .collect::<Vec<_>>()
        .join(",");
    sha256_hex(&joined)
}

/// Fingerprints a HEAD probe response
pub fn header_fingerprint_from(response: &FetchResponse) -> Result<String, FingerprintError> {
    if !(200..300).contains(&response.status) {
        return Err(FingerprintError::Status(response.status));
    }

    Ok(header_fingerprint(
        response.header("etag"),
        response.header("last-modified"),
        response.header("content-length"),
    ))
}

/// Normalizes an HTML fragment so formatting-only edits hash identically
///
/// Strips comments, collapses whitespace runs, removes whitespace next to tag
/// boundaries and attribute quotes, and lowercases.
pub fn normalize_fragment(html: &str) -> String {
    let without_comments = COMMENT_RE.replace_all(html, "");
    let collapsed = WHITESPACE_RE.replace_all(&without_comments, " ");
    let tightened = TAG_BOUNDARY_RE.replace_all(&collapsed, "$1");
    tightened.trim().to_lowercase()
}

/// Fingerprints the schools table and pager of a list page
pub fn content_fingerprint(html: &str) -> Result<String, FingerprintError> {
    let document = Html::parse_document(html);

    let table = find_schools_table(&document).ok_or(FingerprintError::MissingTable)?;
    let pager = pagination_html(&document).unwrap_or_default();

    let normalized = format!(
        "{}{}",
        normalize_fragment(&table.html()),
        normalize_fragment(&pager)
    );
    Ok(sha256_hex(&normalized))
}

/// Fingerprints a full GET of the first list page
pub fn content_fingerprint_from(response: &FetchResponse) -> Result<String, FingerprintError> {
    if !(200..300).contains(&response.status) {
        return Err(FingerprintError::Status(response.status));
    }
    content_fingerprint(&response.body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use url::Url;

    const PAGE: &str = r#"<html><body>
        <table>
          <thead><tr><th>School</th><th>Division</th></tr></thead>
          <tbody>
            <tr><td><a href="/school/oak">Oak Elementary</a></td><td>Henrico</td></tr>
          </tbody>
        </table>
        <div class="pagination"><a class="page-numbers" href="/page/2">2</a></div>
    </body></html>"#;

    #[test]
    fn test_header_fingerprint_joins_with_commas() {
        let expected = sha256_hex("\"abc\",Mon, 01 Jan 2024 00:00:00 GMT,1234");
        assert_eq!(
            header_fingerprint(
                Some("\"abc\""),
                Some("Mon, 01 Jan 2024 00:00:00 GMT"),
                Some("1234")
            ),
            expected
        );
    }

    #[test]
    fn test_missing_validators_are_empty_strings() {
        assert_eq!(header_fingerprint(None, None, None), sha256_hex(",,"));
        assert_ne!(
            header_fingerprint(Some("a"), None, None),
            header_fingerprint(None, Some("a"), None)
        );
    }

    #[test]
    fn test_header_fingerprint_from_rejects_error_status() {
        let response = FetchResponse {
            status: 503,
            headers: HashMap::new(),
            body: String::new(),
            final_url: Url::parse("https://example.com/").unwrap(),
        };
        assert!(matches!(
            header_fingerprint_from(&response),
            Err(FingerprintError::Status(503))
        ));
    }

    #[test]
    fn test_content_fingerprint_is_deterministic() {
        assert_eq!(
            content_fingerprint(PAGE).unwrap(),
            content_fingerprint(PAGE).unwrap()
        );
    }

    #[test]
    fn test_multi_attribute_tags_hash_identically_across_parses() {
        let page = PAGE.replace(
            r#"<a href="/school/oak">"#,
            r#"<a class="x" href="/s/1" title="t" data-id="1">"#,
        );

        let fingerprints: HashSet<String> = (0..20)
            .map(|_| content_fingerprint(&page).unwrap())
            .collect();
        assert_eq!(fingerprints.len(), 1);

        let document = Html::parse_document(&page);
        let table = find_schools_table(&document).unwrap().html();
        assert!(table.contains(r#"class="x" href="/s/1" title="t" data-id="1""#));
    }

    #[test]
    fn test_whitespace_and_comments_do_not_change_fingerprint() {
        let reformatted = PAGE
            .replace("<tbody>", "<tbody>\n\n   <!-- rendered 12:00 -->")
            .replace("Oak Elementary", "Oak   Elementary")
            .replace("<td>Henrico</td>", "<td>  Henrico\n</td>");

        assert_eq!(
            content_fingerprint(PAGE).unwrap(),
            content_fingerprint(&reformatted).unwrap()
        );
    }

    #[test]
    fn test_case_does_not_change_fingerprint() {
        let shouted = PAGE.replace("Oak Elementary", "OAK ELEMENTARY");
        assert_eq!(
            content_fingerprint(PAGE).unwrap(),
            content_fingerprint(&shouted).unwrap()
        );
    }

    #[test]
    fn test_content_change_changes_fingerprint() {
        let changed = PAGE.replace("Oak Elementary", "Maple Elementary");
        assert_ne!(
            content_fingerprint(PAGE).unwrap(),
            content_fingerprint(&changed).unwrap()
        );

        let new_page = PAGE.replace(">2</a>", ">3</a>");
        assert_ne!(
            content_fingerprint(PAGE).unwrap(),
            content_fingerprint(&new_page).unwrap()
        );
    }

    #[test]
    fn test_outside_content_is_ignored() {
        let with_banner = PAGE.replace("<body>", "<body><div>Today's date: 2024-05-01</div>");
        assert_eq!(
            content_fingerprint(PAGE).unwrap(),
            content_fingerprint(&with_banner).unwrap()
        );
    }

    #[test]
    fn test_missing_table_is_an_error() {
        assert!(matches!(
            content_fingerprint("<html><body>down for maintenance</body></html>"),
            Err(FingerprintError::MissingTable)
        ));
    }

    #[test]
    fn test_normalize_fragment() {
        assert_eq!(
            normalize_fragment("<TD class = \" x \" >  A\n B <!-- c --> </TD>"),
            "<td class =\"x\">a b</td>"
        );
    }

    #[test]
    fn test_sentinel_never_matches() {
        assert!(!fingerprints_match(SENTINEL_FINGERPRINT, SENTINEL_FINGERPRINT));
        assert!(!fingerprints_match("abc", SENTINEL_FINGERPRINT));
        assert!(fingerprints_match("abc", "abc"));
        assert!(!fingerprints_match("abc", "abd"));
    }
}
