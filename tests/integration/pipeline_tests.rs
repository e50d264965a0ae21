//! Fetch, extract and robots behaviour against mock HTTP servers

use delver_frontier::app::Application;
use delver_frontier::config::{parse_config, HttpClientConfig, RobotsConfig};
use delver_frontier::extractor::LinkExtractor;
use delver_frontier::fetcher::{build_http_client, HttpFetcher};
use delver_frontier::maps::KvMap;
use delver_frontier::message::{CompositeAnalysis, FetchRequest, MessageType};
use delver_frontier::objectstore::{FilesystemObjectStore, ObjectStore};
use delver_frontier::robots::{RobotsCache, RobotsPolicy};
use delver_frontier::worker::Worker;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> reqwest::Client {
    build_http_client(&HttpClientConfig {
        timeout_secs: 5,
        user_agent: "delver-test".to_string(),
        max_retries: 1,
    })
    .unwrap()
}

fn html_page(base: &str) -> String {
    format!(
        r#"<html><head><title>Home</title></head><body>
        <a href="/a">A</a>
        <a href="{}/b#section">B</a>
        <a href="http://other.test/x">Elsewhere</a>
        <a href="mailto:someone@example.com">Mail</a>
        </body></html>"#,
        base
    )
}

#[tokio::test]
async fn test_fetch_then_extract() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html_page(&base))
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()).unwrap());
    let fetcher = HttpFetcher::new(client(), store.clone(), 1);
    let extractor = LinkExtractor::new(store.clone());

    let request = FetchRequest::new(&format!("{}/", base), "", 1).unwrap();
    let fetched = fetcher.on_message(&request.to_message().unwrap()).await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].message_type, MessageType::FetchResponse);

    let extracted = extractor.on_message(&fetched[0]).await.unwrap();
    let analysis: CompositeAnalysis = extracted[0].decode(MessageType::CompositeAnalysis).unwrap();

    assert!(analysis.response.success);
    assert_eq!(analysis.response.http_code, 200);
    assert_eq!(analysis.depth(), 1);
    assert_eq!(
        analysis.uris,
        vec![
            format!("{}/a", base),
            format!("{}/b", base),
            "http://other.test/x".to_string(),
        ]
    );

    let key = analysis.response.store_key.unwrap();
    let mut body = String::new();
    store
        .get(&key.to_string())
        .unwrap()
        .read_to_string(&mut body)
        .unwrap();
    assert!(body.contains("Elsewhere"));
    assert_eq!(analysis.response.content_sha256.as_ref().map(|d| d.len()), Some(64));
}

#[tokio::test]
async fn test_error_status_is_recorded_without_links() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("<a href='/nope'>x</a>"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(FilesystemObjectStore::new(dir.path()).unwrap());
    let fetcher = HttpFetcher::new(client(), store.clone(), 3);

    let request = FetchRequest::new(&format!("{}/missing", server.uri()), "", 0).unwrap();
    let response = fetcher.fetch(request).await;

    assert!(!response.success);
    assert_eq!(response.http_code, 404);
    assert!(response.store_key.is_some());

    let analysis = LinkExtractor::new(store).analyse(response);
    assert!(analysis.uris.is_empty());
}

#[tokio::test]
async fn test_robots_rules_are_fetched_once_and_applied() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let robots = RobotsCache::new(client(), &RobotsConfig::default());
    let base = server.uri();

    assert!(robots.is_allowed(&format!("{}/public", base)).await.unwrap());
    assert!(!robots.is_allowed(&format!("{}/private/page", base)).await.unwrap());
    assert!(robots.is_allowed(&format!("{}/", base)).await.unwrap());
    assert_eq!(robots.len(), 1);
}

#[tokio::test]
async fn test_missing_robots_allows_everything() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let robots = RobotsCache::new(client(), &RobotsConfig::default());
    assert!(robots
        .is_allowed(&format!("{}/anything", server.uri()))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_application_crawls_seed_and_defers_other_domains() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html_page(&base))
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>leaf a</p>"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<a href='/'>home</a>"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let root = dir.path().display();
    let config = parse_config(&format!(
        r#"
[workers]
worker-counts = 2
termination-grace-ms = 1000

[http-client]
timeout-secs = 5
user-agent = "delver-test"

[[resource]]
type = "file-queue"
name = "fetch"
path = "{root}/fetch"
max-poll-delay-ms = 20

[[resource]]
type = "file-queue"
name = "extract"
path = "{root}/extract"
max-poll-delay-ms = 20

[[resource]]
type = "file-queue"
name = "accumulate"
path = "{root}/accumulate"
max-poll-delay-ms = 20

[[resource]]
type = "rolling-bloom-filter"
name = "visited"
max-n = 10000
p = 0.01

[[resource]]
type = "multi-host-map"
name = "urls"
path = "{root}/urls"

[[resource]]
type = "persistent-map"
name = "hosts"
path = "{root}/hosts.db"

[[resource]]
type = "filesystem-object-store"
name = "bodies"
path = "{root}/bodies"

[[worker]]
name = "fetcher"
type = "http-fetcher"
inbox = "fetch"
outbox = ["extract"]
object-store = "bodies"

[[worker]]
name = "extractor"
type = "link-extractor"
inbox = "extract"
outbox = ["accumulate"]
object-store = "bodies"

[[worker]]
name = "accumulator"
type = "dfs-accumulator"
inbox = "accumulate"
outbox = ["fetch"]
bloom = "visited"
url-store = "urls"
max-depth = 3

[[worker]]
name = "publisher"
type = "dfs-publisher"
manager = "job"
interval-ms = 100
url-store = "urls"
visited-hosts = "hosts"
queue = "fetch"
rotate-after-secs = 3600
respect-robots = false

[[worker]]
name = "seeds"
type = "fixed-seed-publisher"
manager = "job"
interval-ms = 100
outbox = ["fetch"]
seeds = ["{base}/"]
"#
    ))
    .unwrap();

    let app = Application::from_config(&config).unwrap();
    app.start().unwrap();

    let urls = app.multi_host_map("urls").unwrap();
    let mut deferred = None;
    for _ in 0..100 {
        if let Some(value) = urls.get(b"http://other.test/x").unwrap() {
            deferred = Some(value);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Let the same-domain pages drain before stopping.
    for _ in 0..100 {
        if server.received_requests().await.unwrap().len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    app.shutdown().await.unwrap();

    let deferred: FetchRequest = serde_json::from_slice(&deferred.expect("link was not deferred")).unwrap();
    assert_eq!(deferred.origin, format!("{}/", base));

    let paths: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert!(paths.contains(&"/a".to_string()));
    assert!(paths.contains(&"/b".to_string()));
    assert_eq!(paths.iter().filter(|p| p.as_str() == "/").count(), 1);
}
