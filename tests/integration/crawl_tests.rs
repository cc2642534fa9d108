//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for a school directory and drive full
//! scrapes through the real HTTP fetcher and an on-disk SQLite cache.

use school_sweep::cache::SENTINEL_FINGERPRINT;
use school_sweep::config::{AutoscaleConfig, Config, CrawlerConfig};
use school_sweep::output::{output_channel, OutputError};
use school_sweep::state::PageState;
use school_sweep::storage::SchoolRecord;
use school_sweep::{CrawlError, Orchestrator};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a fast, deterministic configuration pointing at the mock server
fn create_test_config(base_url: &str, db_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.site.base_url = base_url.to_string();
    config.site.list_path = "/directory".to_string();
    config.crawler = CrawlerConfig {
        max_concurrency: 4,
        max_requests_per_minute: 10_000,
        max_request_retries: 1,
        politeness_delay_min_ms: 0,
        politeness_delay_max_ms: 0,
        request_timeout_secs: 5,
        ..CrawlerConfig::default()
    };
    config.autoscale = AutoscaleConfig {
        enabled: false,
        ..AutoscaleConfig::default()
    };
    config.cache.database_path = db_dir
        .path()
        .join("cache.db")
        .to_string_lossy()
        .into_owned();
    config
}

fn list_html(slugs: &[&str], total_pages: u32) -> String {
    let rows: String = slugs
        .iter()
        .map(|slug| {
            format!(
                r#"<tr><td><a href="/school/{slug}">{slug} Elementary</a></td><td>Henrico County</td><td>PK-5</td></tr>"#
            )
        })
        .collect();
    let pager: String = (1..=total_pages)
        .map(|n| format!(r#"<a class="page-numbers" href="/directory/page/{n}">{n}</a>"#))
        .collect();

    format!(
        r#"<html><body>
        <table>
          <thead><tr><th>School</th><th>Division</th><th>Grades</th></tr></thead>
          <tbody>{rows}</tbody>
        </table>
        <div class="pagination">{pager}</div>
        </body></html>"#
    )
}

fn detail_html(slug: &str) -> String {
    format!(
        r#"<html><body><h1>{slug}</h1>
        <span itemprop="address">100 {slug} Road, Richmond, VA</span>
        </body></html>"#
    )
}

/// Mounts a two-page directory for division 43: three schools, then two
async fn mount_directory(server: &MockServer, etag: &str) {
    Mock::given(method("HEAD"))
        .and(path("/directory"))
        .respond_with(ResponseTemplate::new(200).insert_header("etag", etag))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/directory"))
        .and(query_param("division", "43"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list_html(&["a", "b", "c"], 2)))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/directory/page/2"))
        .and(query_param("division", "43"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list_html(&["d", "e"], 2)))
        .mount(server)
        .await;

    for slug in ["a", "b", "c", "d", "e"] {
        Mock::given(method("GET"))
            .and(path(format!("/school/{}", slug)))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_html(slug)))
            .mount(server)
            .await;
    }
}

async fn count_requests(server: &MockServer, http_method: &str, prefix: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.to_string() == http_method && r.url.path().starts_with(prefix))
        .count()
}

fn sorted_names(records: &[SchoolRecord]) -> Vec<String> {
    let mut names: Vec<String> = records.iter().map(|r| r.name.clone()).collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_full_scrape_two_list_pages() {
    let mock_server = MockServer::start().await;
    mount_directory(&mock_server, "\"v1\"").await;

    let db_dir = TempDir::new().unwrap();
    let orchestrator =
        Orchestrator::new(create_test_config(&mock_server.uri(), &db_dir)).unwrap();

    let (records, outcome) = orchestrator.scrape_to_vec(43, false).await.unwrap();

    assert_eq!(records.len(), 5);
    assert_eq!(
        sorted_names(&records),
        vec![
            "a Elementary",
            "b Elementary",
            "c Elementary",
            "d Elementary",
            "e Elementary"
        ]
    );
    assert!(records.iter().all(|r| r.division_code == 43));
    assert!(records.iter().all(|r| r.division == "Henrico County"));
    assert!(records
        .iter()
        .any(|r| r.name == "d Elementary" && r.address == "100 d Road, Richmond, VA"));

    let report = &outcome.report;
    assert!(!report.cache_hit);
    assert_eq!(report.list_requests, 2);
    assert_eq!(report.detail_requests, 5);
    assert_eq!(report.count(PageState::Processed), 7);
    assert_eq!(report.records_emitted, 5);

    let cached = orchestrator.cached(43).unwrap().unwrap();
    assert_eq!(cached.data.len(), 5);
    assert_eq!(cached.fingerprint, outcome.fingerprint);
}

#[tokio::test]
async fn test_records_serialize_with_camel_case_keys() {
    let mock_server = MockServer::start().await;
    mount_directory(&mock_server, "\"v1\"").await;

    let db_dir = TempDir::new().unwrap();
    let orchestrator =
        Orchestrator::new(create_test_config(&mock_server.uri(), &db_dir)).unwrap();

    let (sink, stream) = output_channel();
    let (outcome, body) = tokio::join!(
        orchestrator.scrape(43, false, Box::new(sink)),
        stream.collect()
    );
    outcome.unwrap();

    let json: serde_json::Value = serde_json::from_slice(&body.unwrap()).unwrap();
    let first = &json.as_array().unwrap()[0];
    assert!(first.get("gradeSpan").is_some());
    assert!(first.get("divisionCode").is_some());
    assert!(first.get("address").is_some());
}

#[tokio::test]
async fn test_unchanged_fingerprint_serves_cache() {
    let mock_server = MockServer::start().await;
    mount_directory(&mock_server, "\"v1\"").await;

    let db_dir = TempDir::new().unwrap();
    let orchestrator =
        Orchestrator::new(create_test_config(&mock_server.uri(), &db_dir)).unwrap();

    let (first, _) = orchestrator.scrape_to_vec(43, false).await.unwrap();
    let before = orchestrator.cached(43).unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let (second, outcome) = orchestrator.scrape_to_vec(43, false).await.unwrap();
    let after = orchestrator.cached(43).unwrap().unwrap();

    assert!(outcome.report.cache_hit);
    assert_eq!(sorted_names(&first), sorted_names(&second));
    assert!(after.timestamp > before.timestamp);
    assert_eq!(after.fingerprint, before.fingerprint);

    assert_eq!(count_requests(&mock_server, "GET", "/school/").await, 5);
    assert_eq!(count_requests(&mock_server, "HEAD", "/directory").await, 2);
}

#[tokio::test]
async fn test_changed_fingerprint_recrawls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/directory"))
        .respond_with(ResponseTemplate::new(200).insert_header("etag", "\"v1\""))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    mount_directory(&mock_server, "\"v2\"").await;

    let db_dir = TempDir::new().unwrap();
    let orchestrator =
        Orchestrator::new(create_test_config(&mock_server.uri(), &db_dir)).unwrap();

    let (_, first) = orchestrator.scrape_to_vec(43, false).await.unwrap();
    let (records, second) = orchestrator.scrape_to_vec(43, false).await.unwrap();

    assert!(!second.report.cache_hit);
    assert_ne!(first.fingerprint, second.fingerprint);
    assert_eq!(records.len(), 5);
    assert_eq!(count_requests(&mock_server, "GET", "/school/").await, 10);
}

#[tokio::test]
async fn test_compressed_head_reply_still_detects_change() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/directory"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .insert_header("content-length", "100"),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/directory"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list_html(&["a"], 1)))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/directory"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .insert_header("content-length", "200"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/directory"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list_html(&["a", "b"], 1)))
        .mount(&mock_server)
        .await;
    for slug in ["a", "b"] {
        Mock::given(method("GET"))
            .and(path(format!("/school/{}", slug)))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_html(slug)))
            .mount(&mock_server)
            .await;
    }

    let db_dir = TempDir::new().unwrap();
    let orchestrator =
        Orchestrator::new(create_test_config(&mock_server.uri(), &db_dir)).unwrap();

    let (first, first_outcome) = orchestrator.scrape_to_vec(43, false).await.unwrap();
    let (second, second_outcome) = orchestrator.scrape_to_vec(43, false).await.unwrap();

    assert_eq!(first.len(), 1);
    assert!(!second_outcome.report.cache_hit);
    assert_ne!(first_outcome.fingerprint, second_outcome.fingerprint);
    assert_eq!(sorted_names(&second), vec!["a Elementary", "b Elementary"]);
}

#[tokio::test]
async fn test_incomplete_crawl_is_not_served_from_cache() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/school/b"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    mount_directory(&mock_server, "\"v1\"").await;

    let db_dir = TempDir::new().unwrap();
    let orchestrator =
        Orchestrator::new(create_test_config(&mock_server.uri(), &db_dir)).unwrap();

    let (first, first_outcome) = orchestrator.scrape_to_vec(43, false).await.unwrap();
    assert_eq!(first.len(), 4);
    assert_eq!(first_outcome.report.failures.len(), 1);
    assert_eq!(first_outcome.fingerprint, SENTINEL_FINGERPRINT);

    let cached = orchestrator.cached(43).unwrap().unwrap();
    assert_eq!(cached.fingerprint, SENTINEL_FINGERPRINT);
    assert_eq!(cached.data.len(), 4);

    let (second, second_outcome) = orchestrator.scrape_to_vec(43, false).await.unwrap();
    assert!(!second_outcome.report.cache_hit);
    assert!(second_outcome.report.failures.is_empty());
    assert_eq!(second.len(), 5);
    assert_ne!(second_outcome.fingerprint, SENTINEL_FINGERPRINT);

    let (_, third) = orchestrator.scrape_to_vec(43, false).await.unwrap();
    assert!(third.report.cache_hit);
}

#[tokio::test]
async fn test_force_refresh_recrawls_unchanged_division() {
    let mock_server = MockServer::start().await;
    mount_directory(&mock_server, "\"v1\"").await;

    let db_dir = TempDir::new().unwrap();
    let orchestrator =
        Orchestrator::new(create_test_config(&mock_server.uri(), &db_dir)).unwrap();

    orchestrator.scrape_to_vec(43, false).await.unwrap();
    let (records, outcome) = orchestrator.scrape_to_vec(43, true).await.unwrap();

    assert!(!outcome.report.cache_hit);
    assert_eq!(records.len(), 5);
    assert_eq!(count_requests(&mock_server, "GET", "/school/").await, 10);
    assert_eq!(count_requests(&mock_server, "HEAD", "/directory").await, 2);
}

#[tokio::test]
async fn test_failed_detail_does_not_stop_siblings() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/school/b"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;
    mount_directory(&mock_server, "\"v1\"").await;

    let db_dir = TempDir::new().unwrap();
    let orchestrator =
        Orchestrator::new(create_test_config(&mock_server.uri(), &db_dir)).unwrap();

    let (records, outcome) = orchestrator.scrape_to_vec(43, false).await.unwrap();

    assert_eq!(records.len(), 4);
    assert!(!sorted_names(&records).contains(&"b Elementary".to_string()));

    let report = &outcome.report;
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].url.ends_with("/school/b"));
    assert_eq!(report.failures[0].retries, 1);
    assert_eq!(count_requests(&mock_server, "GET", "/school/b").await, 2);
}

#[tokio::test]
async fn test_missing_address_uses_sentinel() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/school/c"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body><h1>c</h1></body></html>"),
        )
        .mount(&mock_server)
        .await;
    mount_directory(&mock_server, "\"v1\"").await;

    let db_dir = TempDir::new().unwrap();
    let orchestrator =
        Orchestrator::new(create_test_config(&mock_server.uri(), &db_dir)).unwrap();

    let (records, _) = orchestrator.scrape_to_vec(43, false).await.unwrap();
    let c = records.iter().find(|r| r.name == "c Elementary").unwrap();

    assert_eq!(c.address, "Address not found");
}

#[tokio::test]
async fn test_seed_failure_aborts_output() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/directory"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/directory"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let db_dir = TempDir::new().unwrap();
    let orchestrator =
        Orchestrator::new(create_test_config(&mock_server.uri(), &db_dir)).unwrap();

    let (sink, stream) = output_channel();
    let (result, body) = tokio::join!(
        orchestrator.scrape(43, false, Box::new(sink)),
        stream.collect()
    );

    assert!(matches!(result, Err(CrawlError::SeedFailed { attempts: 2, .. })));
    assert!(matches!(body, Err(OutputError::Aborted(_))));
    assert!(orchestrator.cached(43).unwrap().is_none());
    assert!(!orchestrator.registry().is_running(43));
}

#[tokio::test]
async fn test_concurrent_duplicate_scrape_is_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/directory"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(list_html(&["a"], 1))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&mock_server)
        .await;
    mount_directory(&mock_server, "\"v1\"").await;

    let db_dir = TempDir::new().unwrap();
    let orchestrator =
        Orchestrator::new(create_test_config(&mock_server.uri(), &db_dir)).unwrap();

    let first = orchestrator.scrape_to_vec(43, false);
    let second = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        orchestrator.scrape_to_vec(43, false).await
    };
    let (first, second) = tokio::join!(first, second);

    let (records, _) = first.unwrap();
    assert_eq!(records.len(), 1);
    assert!(matches!(
        second,
        Err(CrawlError::JobInProgress { division_code: 43 })
    ));
}

#[tokio::test]
async fn test_divisions_crawl_concurrently_without_mixing() {
    let mock_server = MockServer::start().await;
    mount_directory(&mock_server, "\"v1\"").await;

    Mock::given(method("GET"))
        .and(path("/directory"))
        .and(query_param("division", "44"))
        .respond_with(ResponseTemplate::new(200).set_body_string(list_html(&["x", "y"], 1)))
        .mount(&mock_server)
        .await;
    for slug in ["x", "y"] {
        Mock::given(method("GET"))
            .and(path(format!("/school/{}", slug)))
            .respond_with(ResponseTemplate::new(200).set_body_string(detail_html(slug)))
            .mount(&mock_server)
            .await;
    }

    let db_dir = TempDir::new().unwrap();
    let orchestrator =
        Orchestrator::new(create_test_config(&mock_server.uri(), &db_dir)).unwrap();

    let (a, b) = tokio::join!(
        orchestrator.scrape_to_vec(43, false),
        orchestrator.scrape_to_vec(44, false)
    );
    let (first, _) = a.unwrap();
    let (second, _) = b.unwrap();

    assert_eq!(first.len(), 5);
    assert!(first.iter().all(|r| r.division_code == 43));
    assert_eq!(sorted_names(&second), vec!["x Elementary", "y Elementary"]);
    assert!(second.iter().all(|r| r.division_code == 44));
}
