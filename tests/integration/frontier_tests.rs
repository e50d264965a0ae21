//! The accumulate, defer and refill loop over durable resources

use delver_frontier::bloom::{Bloom, RollingBloomFilter};
use delver_frontier::frontier::{DfsAccumulator, DfsPublisher};
use delver_frontier::maps::{KvMap, MapSettings, MultiHostMap, PersistentMap};
use delver_frontier::message::{CompositeAnalysis, FetchRequest, FetchResponse, MessageType};
use delver_frontier::queue::{FileQueue, Queue};
use delver_frontier::robots::AllowAll;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Frontier {
    bloom: Arc<RollingBloomFilter>,
    urls: Arc<MultiHostMap>,
    hosts: Arc<PersistentMap>,
    queue: Arc<FileQueue>,
}

fn open(dir: &Path) -> Frontier {
    Frontier {
        bloom: Arc::new(
            RollingBloomFilter::open(1000, 0.01, 3, Some(dir.join("visited.bloom"))).unwrap(),
        ),
        urls: Arc::new(MultiHostMap::open(&dir.join("urls"), MapSettings::default()).unwrap()),
        hosts: Arc::new(PersistentMap::open(&dir.join("hosts.db"), MapSettings::default()).unwrap()),
        queue: Arc::new(
            FileQueue::new("fetch", dir.join("fetch"), None, Duration::from_millis(20), false)
                .unwrap(),
        ),
    }
}

fn analysis(uri: &str, depth: u32, links: &[&str]) -> CompositeAnalysis {
    let request = FetchRequest::new(uri, "", depth).unwrap();
    CompositeAnalysis {
        response: FetchResponse {
            request,
            store_key: None,
            content_sha256: None,
            elapsed_time_ms: 3,
            error: None,
            header: HashMap::new(),
            http_code: 200,
            success: true,
            timestamp: 0,
        },
        uris: links.iter().map(|l| l.to_string()).collect(),
        features: BTreeMap::new(),
    }
}

fn drain(queue: &FileQueue) -> Vec<FetchRequest> {
    let mut requests = Vec::new();
    while let Some(message) = queue.claim_next().unwrap() {
        requests.push(message.decode(MessageType::FetchRequest).unwrap());
        queue.end_transaction(&message, true).unwrap();
    }
    requests
}

#[tokio::test]
async fn test_deferred_links_are_refilled_at_depth_zero() {
    let dir = TempDir::new().unwrap();
    let f = open(dir.path());

    let accumulator = DfsAccumulator::new(f.bloom.clone(), f.urls.clone(), 3);
    let next = accumulator.accumulate(&analysis(
        "http://a.com/",
        1,
        &[
            "http://a.com/next",
            "http://www.b.com/one",
            "http://c.b.com/two",
            "http://d.org/three",
        ],
    ));

    assert_eq!(next.len(), 1);
    assert_eq!(next[0].uri, "http://a.com/next");
    assert_eq!(next[0].depth, 2);
    assert_eq!(f.urls.hosts().unwrap(), vec!["b.com", "d.org"]);

    let publisher = DfsPublisher::new(
        f.queue.clone(),
        f.urls.clone(),
        f.hosts.clone(),
        Arc::new(AllowAll),
        Duration::ZERO,
        2,
    );

    assert_eq!(publisher.on_tick().await.unwrap(), 3);

    let mut published = drain(&f.queue);
    published.sort_by(|a, b| a.uri.cmp(&b.uri));
    let uris: Vec<&str> = published.iter().map(|r| r.uri.as_str()).collect();
    assert_eq!(
        uris,
        vec!["http://c.b.com/two", "http://d.org/three", "http://www.b.com/one"]
    );
    assert!(published.iter().all(|r| r.depth == 0));
    assert!(published.iter().all(|r| r.origin == "http://a.com/"));

    assert!(f.urls.hosts().unwrap().is_empty());
    assert!(f.hosts.get(b"b.com").unwrap().is_some());
    assert!(f.hosts.get(b"d.org").unwrap().is_some());
}

#[tokio::test]
async fn test_drained_hosts_stay_drained_across_restart() {
    let dir = TempDir::new().unwrap();

    {
        let f = open(dir.path());
        let accumulator = DfsAccumulator::new(f.bloom.clone(), f.urls.clone(), 3);
        accumulator.accumulate(&analysis("http://a.com/", 0, &["http://b.com/first"]));

        let publisher = DfsPublisher::new(
            f.queue.clone(),
            f.urls.clone(),
            f.hosts.clone(),
            Arc::new(AllowAll),
            Duration::ZERO,
            1,
        );
        assert_eq!(publisher.on_tick().await.unwrap(), 1);
        assert_eq!(drain(&f.queue).len(), 1);

        f.bloom.close().unwrap();
        f.hosts.close().unwrap();
    }

    let f = open(dir.path());
    assert!(f.bloom.contains(b"http://a.com/"));

    let accumulator = DfsAccumulator::new(f.bloom.clone(), f.urls.clone(), 3);
    accumulator.accumulate(&analysis(
        "http://e.com/",
        0,
        &["http://b.com/again", "http://f.com/new"],
    ));
    assert_eq!(f.urls.hosts().unwrap(), vec!["b.com", "f.com"]);

    let publisher = DfsPublisher::new(
        f.queue.clone(),
        f.urls.clone(),
        f.hosts.clone(),
        Arc::new(AllowAll),
        Duration::ZERO,
        1,
    );

    assert_eq!(publisher.on_tick().await.unwrap(), 1);
    let published = drain(&f.queue);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].uri, "http://f.com/new");
    assert!(f.urls.hosts().unwrap().is_empty());
}

#[tokio::test]
async fn test_refill_waits_for_the_queue_to_stay_empty() {
    let dir = TempDir::new().unwrap();
    let f = open(dir.path());

    let publisher = DfsPublisher::new(
        f.queue.clone(),
        f.urls.clone(),
        f.hosts.clone(),
        Arc::new(AllowAll),
        Duration::from_millis(100),
        1,
    );

    // The first pass finds nothing to publish.
    assert_eq!(publisher.on_tick().await.unwrap(), 0);

    let accumulator = DfsAccumulator::new(f.bloom.clone(), f.urls.clone(), 3);
    accumulator.accumulate(&analysis("http://a.com/", 0, &["http://b.com/x"]));

    assert_eq!(publisher.on_tick().await.unwrap(), 0);
    assert_eq!(publisher.on_tick().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(publisher.on_tick().await.unwrap(), 1);
    assert_eq!(f.queue.len(), Some(1));
}
