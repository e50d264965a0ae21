//! Durability of the file queue across process restarts

use delver_frontier::message::{FetchRequest, MessageType};
use delver_frontier::queue::{FileQueue, Queue};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn open(dir: &Path) -> FileQueue {
    FileQueue::new("fetch", dir.join("fetch"), None, Duration::from_millis(20), false).unwrap()
}

fn request(uri: &str) -> delver_frontier::Message {
    FetchRequest::new(uri, "", 0).unwrap().to_message().unwrap()
}

#[tokio::test]
async fn test_unacknowledged_message_survives_restart() {
    let dir = TempDir::new().unwrap();

    {
        let queue = open(dir.path());
        queue.put(&request("http://a.com/"), 0).unwrap();
        queue.start().unwrap();

        let message = tokio::time::timeout(Duration::from_secs(2), queue.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.message_type, MessageType::FetchRequest);
        // Simulated crash: the claim is never ended.
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let queue = open(dir.path());
    assert!(queue.claim_next().unwrap().is_none());

    queue.prepare().unwrap();
    let redelivered = queue.claim_next().unwrap().unwrap();
    let decoded: FetchRequest = redelivered.decode(MessageType::FetchRequest).unwrap();
    assert_eq!(decoded.uri, "http://a.com/");

    queue.end_transaction(&redelivered, true).unwrap();
    assert_eq!(queue.len(), Some(0));
}

#[tokio::test]
async fn test_failed_transaction_is_redelivered() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path());
    queue.put(&request("http://a.com/"), 0).unwrap();
    queue.start().unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), queue.recv())
        .await
        .unwrap()
        .unwrap();
    queue.end_transaction(&first, false).unwrap();

    let second = tokio::time::timeout(Duration::from_secs(2), queue.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id, second.id);

    queue.end_transaction(&second, true).unwrap();
    queue.stop().await;
    assert_eq!(queue.len(), Some(0));
}

#[tokio::test]
async fn test_priority_then_insertion_order() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path());

    queue.put(&request("http://a.com/low"), 5).unwrap();
    queue.put(&request("http://a.com/first"), 0).unwrap();
    queue.put(&request("http://a.com/second"), 0).unwrap();

    let mut order = Vec::new();
    while let Some(message) = queue.claim_next().unwrap() {
        let request: FetchRequest = message.decode(MessageType::FetchRequest).unwrap();
        order.push(request.uri);
        queue.end_transaction(&message, true).unwrap();
    }

    assert_eq!(
        order,
        vec!["http://a.com/first", "http://a.com/second", "http://a.com/low"]
    );
}

#[tokio::test]
async fn test_stop_releases_buffered_message() {
    let dir = TempDir::new().unwrap();
    let queue = open(dir.path());
    queue.put(&request("http://a.com/"), 0).unwrap();
    queue.start().unwrap();

    // Give the poller time to claim the entry into its hand-off buffer.
    tokio::time::sleep(Duration::from_millis(200)).await;
    queue.stop().await;

    let reopened = open(dir.path());
    assert!(reopened.claim_next().unwrap().is_some());
}

#[test]
fn test_concurrent_consumers_claim_each_entry_once() {
    let dir = TempDir::new().unwrap();

    let producer = open(dir.path());
    let mut put: Vec<String> = (0..300).map(|i| format!("http://a.com/{}", i)).collect();
    for uri in &put {
        producer.put(&request(uri), 0).unwrap();
    }
    let ids: Vec<String> = std::fs::read_dir(dir.path().join("fetch"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(ids.len(), 300);

    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let root = dir.path().to_path_buf();
            std::thread::spawn(move || {
                let queue = open(&root);
                let mut claimed = Vec::new();
                while let Some(message) = queue.claim_next().unwrap() {
                    let request: FetchRequest = message.decode(MessageType::FetchRequest).unwrap();
                    claimed.push((message.id.clone(), request.uri));
                    queue.end_transaction(&message, true).unwrap();
                }
                claimed
            })
        })
        .collect();

    let claimed: Vec<(String, String)> = consumers
        .into_iter()
        .flat_map(|c| c.join().unwrap())
        .collect();

    let mut claimed_ids: Vec<String> = claimed.iter().map(|(id, _)| id.clone()).collect();
    let mut claimed_uris: Vec<String> = claimed.into_iter().map(|(_, uri)| uri).collect();
    let mut ids = ids;
    claimed_ids.sort();
    claimed_uris.sort();
    ids.sort();
    put.sort();

    assert_eq!(claimed_ids, ids);
    assert_eq!(claimed_uris, put);
    assert_eq!(producer.len(), Some(0));
}
