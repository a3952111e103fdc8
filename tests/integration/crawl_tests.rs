//! Integration tests for the mirror
//!
//! These tests use wiremock to create mock HTTP servers and drive complete
//! runs end-to-end into temporary output directories. Mock call counts stand in
//! for a recording transport.

use pagepull::config::Config;
use pagepull::manifest::{objects_dir, Manifest, ObjectStore};
use pagepull::output::{replay_entries, SITEMAP_FILE, SUMMARY_FILE};
use pagepull::{Mirror, PagePullError, RecordStatus};
use std::path::Path;
use tempfile::TempDir;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a fast test configuration for the given seed and output directory
fn create_test_config(seed: &str, output: &Path) -> Config {
    let mut config = Config::default();
    config.site.url = seed.to_string();
    config.output.directory = output.to_string_lossy().into_owned();
    config.crawler.workers = 2;
    config.crawler.delay_ms = 0;
    config.crawler.requests_per_second = 1000.0;
    config.crawler.timeout_secs = 5;
    config.crawler.retry_base_ms = 1;
    config.crawler.retry_max_ms = 5;
    config.crawler.random_seed = Some(7);
    config
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
}

async fn record_status(output: &Path, url: &str) -> Option<RecordStatus> {
    let manifest = Manifest::open(output).await.expect("Failed to open manifest");
    manifest.lookup(url).await.map(|r| r.status)
}

#[tokio::test]
async fn test_end_to_end_three_runs() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let output = TempDir::new().unwrap();

    // Any conditional request is answered with 304
    Mock::given(method("GET"))
        .and(header_exists("if-none-match"))
        .respond_with(ResponseTemplate::new(304))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            html(r#"<html><head><title>Home</title></head><body>
                <a href="/b">B</a>
                <a href="/c">C</a>
                </body></html>"#)
            .insert_header("etag", "\"a-1\""),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(
            html(r#"<html><head><title>B</title></head><body><img src="img1.png"></body></html>"#)
                .insert_header("etag", "\"b-1\""),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(
            html("<html><head><title>C</title></head><body>Leaf</body></html>")
                .insert_header("etag", "\"c-1\""),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/img1.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0u8; 80 * 1024])
                .insert_header("content-type", "image/png")
                .insert_header("etag", "\"img-1\""),
        )
        .mount(&mock_server)
        .await;

    let seed = format!("{}/", base_url);
    let img_url = format!("{}/img1.png", base_url);

    // First run: everything is new
    let config = create_test_config(&seed, output.path());
    let summary = Mirror::new(config)
        .expect("Failed to create mirror")
        .run_once()
        .await
        .expect("First run failed");

    assert!(summary.completed);
    assert_eq!(summary.fetched, 4, "summary: {:?}", summary);
    assert_eq!(summary.failed, 0);

    let manifest = Manifest::open(output.path()).await.unwrap();
    let records = manifest.records().await;
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.status == RecordStatus::Fetched));

    let index = std::fs::read_to_string(output.path().join("index.html")).unwrap();
    assert!(index.contains(r#"href="b.html""#), "index.html: {}", index);
    assert!(index.contains(r#"href="c.html""#), "index.html: {}", index);
    assert!(output.path().join("b.html").exists());
    assert!(output.path().join("c.html").exists());
    assert_eq!(
        std::fs::metadata(output.path().join("img1.png")).unwrap().len(),
        80 * 1024
    );
    assert!(output.path().join(SUMMARY_FILE).exists());
    let sitemap = std::fs::read_to_string(output.path().join(SITEMAP_FILE)).unwrap();
    assert!(sitemap.contains(r#"<a href="b.html">B</a>"#));

    // Exporters get the pristine body back, not the rewritten one
    let objects = ObjectStore::new(objects_dir(output.path()));
    let entries = replay_entries(output.path(), &records, &objects).await;
    assert_eq!(entries.len(), 4);
    let home = entries.iter().find(|e| e.local_path == "index.html").unwrap();
    assert!(String::from_utf8_lossy(&home.body).contains(r#"href="/b""#));

    // Second run: the origin answers 304 for everything
    let config = create_test_config(&seed, output.path());
    let summary = Mirror::new(config).unwrap().run_once().await.expect("Second run failed");

    assert!(summary.completed);
    assert_eq!(summary.cached_unchanged, 4, "summary: {:?}", summary);
    assert_eq!(summary.fetched, 0);
    assert_eq!(summary.bytes_downloaded, 0);
    assert_eq!(summary.files_written, 0);
    assert_eq!(summary.files_rewritten, 0);
    let index_again = std::fs::read_to_string(output.path().join("index.html")).unwrap();
    assert_eq!(index, index_again);

    // Third run: a 50 KB size cap excludes the image and removes it from disk
    let mut config = create_test_config(&seed, output.path());
    config.filter.max_asset_size_kb = Some(50);
    let summary = Mirror::new(config).unwrap().run_once().await.expect("Third run failed");

    assert!(summary.completed);
    assert_eq!(summary.skipped_filter, 1, "summary: {:?}", summary);
    assert_eq!(summary.cached_unchanged, 3);
    assert_eq!(summary.stale_files_removed, 1);
    assert_eq!(
        record_status(output.path(), &img_url).await,
        Some(RecordStatus::SkippedFilter)
    );
    assert!(!output.path().join("img1.png").exists());

    // The page now points at the live image instead of a missing file
    let b = std::fs::read_to_string(output.path().join("b.html")).unwrap();
    assert!(b.contains(&format!(r#"src="{}""#, img_url)), "b.html: {}", b);
}

#[tokio::test]
async fn test_shared_image_fetched_once() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<a href="/p1">1</a><a href="/p2">2</a><a href="/p3">3</a><img src="/shared.png">"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    for page in ["/p1", "/p2", "/p3"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(html(r#"<img src="/shared.png"><a href="/">home</a>"#))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/shared.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"PNG".to_vec())
                .insert_header("content-type", "image/png"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&format!("{}/", base_url), output.path());
    config.crawler.workers = 4;
    let summary = Mirror::new(config).unwrap().run_once().await.unwrap();

    assert_eq!(summary.fetched, 5);
    mock_server.verify().await;
}

#[tokio::test]
async fn test_equivalent_urls_fetched_once() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&format!(
            r#"<a href="/a">1</a>
               <a href="/a/">2</a>
               <a href="/a#frag">3</a>
               <a href="./a?utm_source=feed">4</a>
               <a href="{}/a">5</a>"#,
            base_url
        )))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html("<p>A</p>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&format!("{}/", base_url), output.path());
    let summary = Mirror::new(config).unwrap().run_once().await.unwrap();

    assert_eq!(summary.fetched, 2);
    let index = std::fs::read_to_string(output.path().join("index.html")).unwrap();
    assert!(index.contains(r#"href="a.html#frag""#), "index.html: {}", index);
    mock_server.verify().await;
}

#[tokio::test]
async fn test_exclude_pattern_skips_without_request() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/report.pdf">Report</a><a href="/about">About</a>"#))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html("<p>About</p>"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/report.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF".to_vec()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&format!("{}/", base_url), output.path());
    config.filter.exclude_patterns = vec![r"\.pdf$".to_string()];
    let summary = Mirror::new(config).unwrap().run_once().await.unwrap();

    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.skipped_filter, 1);
    assert_eq!(
        record_status(output.path(), &format!("{}/report.pdf", base_url)).await,
        Some(RecordStatus::SkippedFilter)
    );
    mock_server.verify().await;
}

#[tokio::test]
async fn test_robots_disallow() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("User-agent: *\nDisallow: /private\n")
                .insert_header("content-type", "text/plain"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/private/page">Secret</a><a href="/public">Public</a>"#))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(html("<p>Public</p>"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/page"))
        .respond_with(html("<p>Secret</p>"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&format!("{}/", base_url), output.path());
    let summary = Mirror::new(config).unwrap().run_once().await.unwrap();

    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.skipped_robots, 1);
    assert_eq!(summary.robots_fetches, 1);
    assert_eq!(
        summary.robots_skipped,
        vec![format!("{}/private/page", base_url)]
    );
    mock_server.verify().await;
}

#[tokio::test]
async fn test_transient_failure_is_retried_then_failed() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/flaky">Flaky</a>"#))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&format!("{}/", base_url), output.path());
    let summary = Mirror::new(config).unwrap().run_once().await.unwrap();

    assert!(summary.completed);
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.failures[0].0, format!("{}/flaky", base_url));
    assert!(summary.failures[0].1.contains("3 attempt"));

    let manifest = Manifest::open(output.path()).await.unwrap();
    let flaky = manifest.lookup(&format!("{}/flaky", base_url)).await.unwrap();
    assert_eq!(flaky.status, RecordStatus::Failed);
    assert_eq!(flaky.http_status, Some(503));
    mock_server.verify().await;
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/missing">Missing</a>"#))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&format!("{}/", base_url), output.path());
    let summary = Mirror::new(config).unwrap().run_once().await.unwrap();

    assert_eq!(summary.failed, 1);
    let manifest = Manifest::open(output.path()).await.unwrap();
    let missing = manifest.lookup(&format!("{}/missing", base_url)).await.unwrap();
    assert_eq!(missing.status, RecordStatus::Failed);
    assert_eq!(missing.http_status, Some(404));
    mock_server.verify().await;
}

#[tokio::test]
async fn test_corrupt_manifest_runs_fresh() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let output = TempDir::new().unwrap();

    let state = output.path().join(".pagepull");
    std::fs::create_dir_all(&state).unwrap();
    std::fs::write(state.join("manifest.json"), b"{ definitely not json").unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<p>Home</p>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&format!("{}/", base_url), output.path());
    let summary = Mirror::new(config).unwrap().run_once().await.unwrap();

    assert!(summary.completed);
    assert_eq!(summary.fetched, 1);
    assert!(state.join("manifest.json.corrupt").exists());
    assert_eq!(
        record_status(output.path(), &format!("{}/", base_url)).await,
        Some(RecordStatus::Fetched)
    );
    mock_server.verify().await;
}

#[tokio::test]
async fn test_cancelled_run_skips_rewrite() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(html("<p>Home</p>"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&format!("{}/", base_url), output.path());
    let mirror = Mirror::new(config).unwrap();
    mirror.cancel_handle().cancel();
    let summary = mirror.run_once().await.unwrap();

    assert!(!summary.completed);
    assert_eq!(summary.total(), 0);
    assert!(!output.path().join(SITEMAP_FILE).exists());
    assert!(output.path().join(SUMMARY_FILE).exists());
    mock_server.verify().await;
}

#[tokio::test]
async fn test_invalid_seed_is_rejected() {
    let output = TempDir::new().unwrap();
    let config = create_test_config("mailto:someone@example.com", output.path());
    assert!(matches!(Mirror::new(config), Err(PagePullError::Config(_))));
}

#[tokio::test]
async fn test_filter_rejection_reused_until_filters_change() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<img src="/x.png"><p>Home</p>"#))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"PNG".to_vec())
                .insert_header("content-type", "image/png"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let seed = format!("{}/", base_url);
    let image_url = format!("{}/x.png", base_url);
    let excluding = |output: &Path| {
        let mut config = create_test_config(&seed, output);
        config.filter.exclude_patterns = vec![r"x\.png$".to_string()];
        config
    };

    let summary = Mirror::new(excluding(output.path())).unwrap().run_once().await.unwrap();
    assert_eq!(summary.skipped_filter, 1);
    let manifest = Manifest::open(output.path()).await.unwrap();
    let first = manifest.lookup(&image_url).await.unwrap();
    assert_eq!(first.status, RecordStatus::SkippedFilter);

    // Same filters: the stored rejection stands and only the page is requested
    let summary = Mirror::new(excluding(output.path())).unwrap().run_once().await.unwrap();
    assert_eq!(summary.skipped_filter, 1);
    assert_eq!(summary.requests, 1, "summary: {:?}", summary);
    let manifest = Manifest::open(output.path()).await.unwrap();
    let second = manifest.lookup(&image_url).await.unwrap();
    assert_eq!(second, first);

    // Different filters: the resource is evaluated and fetched again
    let config = create_test_config(&seed, output.path());
    let summary = Mirror::new(config).unwrap().run_once().await.unwrap();
    assert_eq!(summary.skipped_filter, 0);
    assert_eq!(
        record_status(output.path(), &image_url).await,
        Some(RecordStatus::Fetched)
    );
    assert!(output.path().join("x.png").exists());
    mock_server.verify().await;
}

#[tokio::test]
async fn test_size_known_only_after_download_is_discarded() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let output = TempDir::new().unwrap();

    // 204 bytes once decoded; the client drops Content-Length for encoded bodies
    let gzipped: Vec<u8> = vec![
        0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x03, 0x2b, 0xc9, 0xcc, 0xab, 0xd4,
        0x2d, 0xc8, 0x4b, 0xd7, 0x2d, 0x48, 0xac, 0xcc, 0xc9, 0x4f, 0x4c, 0xd1, 0x2d, 0x19, 0xba,
        0x02, 0x00, 0x25, 0x9b, 0x18, 0x2c, 0xcc, 0x00, 0x00, 0x00,
    ];

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<img src="/tiny.png">"#))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tiny.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(gzipped)
                .insert_header("content-type", "image/png")
                .insert_header("content-encoding", "gzip"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&format!("{}/", base_url), output.path());
    config.filter.min_asset_size_kb = Some(1);
    let summary = Mirror::new(config).unwrap().run_once().await.unwrap();

    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.skipped_filter, 1);
    let manifest = Manifest::open(output.path()).await.unwrap();
    let tiny = manifest.lookup(&format!("{}/tiny.png", base_url)).await.unwrap();
    assert_eq!(tiny.status, RecordStatus::SkippedFilter);
    assert_eq!(tiny.size, Some(204));
    assert!(tiny.local_path.is_none());
    assert!(!output.path().join("tiny.png").exists());
    mock_server.verify().await;
}

#[tokio::test]
async fn test_latin1_page_keeps_its_bytes() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            b"<html><head><meta charset=\"iso-8859-1\"></head><body><p>caf\xE9</p><a href=\"/b\">b</a></body></html>".to_vec(),
            "text/html",
        ))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html("<p>B</p>"))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&format!("{}/", base_url), output.path());
    let summary = Mirror::new(config).unwrap().run_once().await.unwrap();
    assert_eq!(summary.fetched, 2);

    let index = std::fs::read(output.path().join("index.html")).unwrap();
    assert_eq!(
        index,
        b"<html><head><meta charset=\"iso-8859-1\"></head><body><p>caf\xE9</p><a href=\"b.html\">b</a></body></html>".to_vec()
    );
}

#[tokio::test]
async fn test_redirected_seed_is_mirrored_at_root() {
    let origin = MockServer::start().await;
    let target = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("location", format!("{}/", target.uri()).as_str()),
        )
        .expect(1)
        .mount(&origin)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/b">B</a><a href="/">Home</a>"#))
        .expect(1)
        .mount(&target)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(html(r#"<a href="/">Home</a>"#))
        .expect(1)
        .mount(&target)
        .await;

    let config = create_test_config(&format!("{}/", origin.uri()), output.path());
    let summary = Mirror::new(config).unwrap().run_once().await.unwrap();

    assert_eq!(summary.fetched, 2, "summary: {:?}", summary);
    assert!(output.path().join("b.html").exists());
    assert!(!output.path().join("_hosts").exists());

    let index = std::fs::read_to_string(output.path().join("index.html")).unwrap();
    assert!(index.contains(r#"href="b.html""#), "index.html: {}", index);
    assert!(index.contains(r#"href="index.html""#), "index.html: {}", index);
    let b = std::fs::read_to_string(output.path().join("b.html")).unwrap();
    assert!(b.contains(r#"href="index.html""#), "b.html: {}", b);

    origin.verify().await;
    target.verify().await;
}
