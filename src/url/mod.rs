//! URL handling module for School-Sweep
//!
//! This module provides URL normalization for deduplication and the derivation of
//! division list URLs and their paginated siblings.

mod normalize;

use crate::config::SiteConfig;
use crate::UrlError;
use url::Url;

// Re-export main functions
pub use normalize::normalize_url;

/// Builds the first list page URL for a division
///
/// # Example
///
/// ```
/// use school_sweep::config::SiteConfig;
/// use school_sweep::url::division_list_url;
///
/// let url = division_list_url(&SiteConfig::default(), 42).unwrap();
/// assert_eq!(
///     url.as_str(),
///     "https://schoolquality.virginia.gov/virginia-schools?division=42"
/// );
/// ```
pub fn division_list_url(site: &SiteConfig, division_code: u32) -> Result<Url, UrlError> {
    let base = Url::parse(&site.base_url).map_err(|e| UrlError::Parse(e.to_string()))?;
    let mut url = base
        .join(&site.list_path)
        .map_err(|e| UrlError::Malformed(e.to_string()))?;

    url.query_pairs_mut()
        .append_pair(&site.division_param, &division_code.to_string());

    Ok(url)
}

/// Derives the URL of a given list page from any list page URL of the same division
///
/// Page 1 is the bare list URL. Later pages replace a trailing `/page/<n>` path suffix
/// (or append one), keeping the query string intact.
pub fn list_page_url(list_url: &Url, page: u32) -> Url {
    let mut url = list_url.clone();
    let base_path = strip_page_suffix(list_url.path());

    let path = if page <= 1 {
        base_path.to_string()
    } else {
        format!("{}/page/{}", base_path.trim_end_matches('/'), page)
    };

    url.set_path(if path.is_empty() { "/" } else { &path });
    url
}

/// Removes a trailing `/page/<digits>` segment pair from a path
fn strip_page_suffix(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');

    if let Some((head, last)) = trimmed.rsplit_once('/') {
        if !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()) {
            if let Some(stripped) = head.strip_suffix("/page") {
                return stripped;
            }
        }
    }

    trimmed
}

/// Builds the deduplication key for a request: the division plus the normalized URL
///
/// Falls back to the raw URL text when normalization fails, so an odd link is still
/// deduplicated against itself rather than rejected.
pub fn dedup_key(division_code: u32, url: &str) -> String {
    match normalize_url(url) {
        Ok(normalized) => format!("{}|{}", division_code, normalized),
        Err(e) => {
            tracing::debug!("Could not normalize {}: {}", url, e);
            format!("{}|{}", division_code, url.trim())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SiteConfig {
        SiteConfig {
            base_url: "https://schools.example.com".to_string(),
            list_path: "/directory".to_string(),
            division_param: "division".to_string(),
            address_selector: "span[itemprop='address']".to_string(),
        }
    }

    #[test]
    fn test_division_list_url() {
        let url = division_list_url(&site(), 7).unwrap();
        assert_eq!(url.as_str(), "https://schools.example.com/directory?division=7");
    }

    #[test]
    fn test_division_list_url_with_base_path() {
        let mut site = site();
        site.base_url = "http://127.0.0.1:4000/mirror/".to_string();
        site.list_path = "/directory".to_string();
        let url = division_list_url(&site, 3).unwrap();
        // An absolute list path replaces the base path, like a link would
        assert_eq!(url.as_str(), "http://127.0.0.1:4000/directory?division=3");
    }

    #[test]
    fn test_list_page_url_first_page_is_bare() {
        let list = division_list_url(&site(), 7).unwrap();
        assert_eq!(list_page_url(&list, 1), list);
    }

    #[test]
    fn test_list_page_url_appends_page_segment() {
        let list = division_list_url(&site(), 7).unwrap();
        let page2 = list_page_url(&list, 2);
        assert_eq!(
            page2.as_str(),
            "https://schools.example.com/directory/page/2?division=7"
        );
    }

    #[test]
    fn test_list_page_url_replaces_existing_page_segment() {
        let page2 = Url::parse("https://schools.example.com/directory/page/2?division=7").unwrap();
        let page3 = list_page_url(&page2, 3);
        assert_eq!(
            page3.as_str(),
            "https://schools.example.com/directory/page/3?division=7"
        );

        let back_to_first = list_page_url(&page3, 1);
        assert_eq!(
            back_to_first.as_str(),
            "https://schools.example.com/directory?division=7"
        );
    }

    #[test]
    fn test_strip_page_suffix_ignores_non_numeric() {
        assert_eq!(strip_page_suffix("/directory/page/next"), "/directory/page/next");
        assert_eq!(strip_page_suffix("/directory/page/12/"), "/directory");
        assert_eq!(strip_page_suffix("/page/2"), "");
    }

    #[test]
    fn test_dedup_key_includes_division() {
        let a = dedup_key(1, "https://example.com/school/1/");
        let b = dedup_key(1, "https://EXAMPLE.com/school/1#x");
        let c = dedup_key(2, "https://example.com/school/1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_dedup_key_falls_back_to_raw() {
        assert_eq!(dedup_key(5, " not a url "), "5|not a url");
    }
}
