//! HTML parser for directory pages
//!
//! This module handles parsing the two page kinds of a division crawl:
//! - List pages: one school stub per table row, each bound to its detail link, plus
//!   the total page count from the pager
//! - Detail pages: the single address field
//!
//! Neither function fails. A missing table yields no rows, a garbled pager means a
//! single page, and a missing address becomes the sentinel.

use crate::storage::{SchoolStub, ADDRESS_NOT_FOUND};
use crate::ConfigError;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

static TABLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table").expect("valid table selector"));

static HEADER_CELL_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("thead th, tr th").expect("valid header selector"));

static ROW_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("tbody tr").expect("valid row selector"));

static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("valid cell selector"));

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("valid link selector"));

static PAGER_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.pagination a.page-numbers:not(.current):not(.next):not(.prev)")
        .expect("valid pagination selector")
});

static PAGINATION_BLOCK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.pagination").expect("valid pagination block selector"));

static DEFAULT_ADDRESS_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("span[itemprop='address']").expect("valid address selector")
});

/// A detail link bound to the stub from the same row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchoolLink {
    pub url: Url,
    pub stub: SchoolStub,
}

/// Everything extracted from one list page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPage {
    pub links: Vec<SchoolLink>,
    /// Always at least 1
    pub total_pages: u32,
}

/// Compiles the configurable detail-page address selector
pub fn address_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| {
        ConfigError::Validation(format!("Invalid address selector '{}': {:?}", selector, e))
    })
}

/// Parses a list page into row-bound detail links and the page count
///
/// # Table Location
///
/// The schools table is the first `<table>` with a header cell containing "School".
/// Each body row contributes one link: the first cell's anchor, resolved against
/// `base_url`. The name, division, and grade span come from the first three cells of
/// that same row. Rows without an anchor are skipped.
///
/// # Example
///
/// ```
/// use school_sweep::crawler::parse_list_page;
/// use url::Url;
///
/// let html = r#"<table><thead><tr><th>School</th><th>Division</th><th>Grades</th></tr></thead>
///   <tbody><tr><td><a href="/school/oak">Oak</a></td><td>Henrico</td><td>K-5</td></tr></tbody>
/// </table>"#;
/// let base = Url::parse("https://example.com/list?division=43").unwrap();
/// let page = parse_list_page(html, &base);
///
/// assert_eq!(page.total_pages, 1);
/// assert_eq!(page.links[0].url.as_str(), "https://example.com/school/oak");
/// assert_eq!(page.links[0].stub.grade_span, "K-5");
/// ```
pub fn parse_list_page(html: &str, base_url: &Url) -> ListPage {
    let document = Html::parse_document(html);

    let links = match find_schools_table(&document) {
        Some(table) => table
            .select(&ROW_SELECTOR)
            .filter_map(|row| parse_row(row, base_url))
            .collect(),
        None => {
            tracing::debug!("No schools table on {}", base_url);
            Vec::new()
        }
    };

    ListPage {
        links,
        total_pages: parse_total_pages(&document),
    }
}

/// Reads the address from a detail page using the default selector
pub fn parse_detail_page(html: &str) -> String {
    parse_detail_page_with(html, &DEFAULT_ADDRESS_SELECTOR)
}

/// Reads the address from a detail page
///
/// Returns [`ADDRESS_NOT_FOUND`] when the field is absent or blank.
pub fn parse_detail_page_with(html: &str, selector: &Selector) -> String {
    let document = Html::parse_document(html);

    document
        .select(selector)
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .find(|text| !text.is_empty())
        .unwrap_or_else(|| ADDRESS_NOT_FOUND.to_string())
}

/// Finds the table whose header row has a "School" column
pub(crate) fn find_schools_table(document: &Html) -> Option<ElementRef<'_>> {
    document.select(&TABLE_SELECTOR).find(|table| {
        table
            .select(&HEADER_CELL_SELECTOR)
            .any(|th| th.text().collect::<String>().contains("School"))
    })
}

/// Outer HTML of the pagination block, if present
pub(crate) fn pagination_html(document: &Html) -> Option<String> {
    document
        .select(&PAGINATION_BLOCK_SELECTOR)
        .next()
        .map(|element| element.html())
}

fn parse_row(row: ElementRef<'_>, base_url: &Url) -> Option<SchoolLink> {
    let cells: Vec<ElementRef<'_>> = row.select(&CELL_SELECTOR).collect();
    let first = cells.first()?;

    let href = first
        .select(&LINK_SELECTOR)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())?;

    let url = match base_url.join(href) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => url,
        Ok(url) => {
            tracing::debug!("Skipping non-HTTP school link {}", url);
            return None;
        }
        Err(e) => {
            tracing::debug!("Skipping unresolvable school link '{}': {}", href, e);
            return None;
        }
    };

    let cell_text = |index: usize| {
        cells
            .get(index)
            .map(|cell| collapse_whitespace(&cell.text().collect::<String>()))
            .unwrap_or_default()
    };

    Some(SchoolLink {
        url,
        stub: SchoolStub {
            name: cell_text(0),
            division: cell_text(1),
            grade_span: cell_text(2),
        },
    })
}

fn parse_total_pages(document: &Html) -> u32 {
    document
        .select(&PAGER_SELECTOR)
        .filter_map(|link| {
            link.text()
                .collect::<String>()
                .trim()
                .replace(',', "")
                .parse::<u32>()
                .ok()
        })
        .max()
        .unwrap_or(1)
        .max(1)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
