use crate::message::{FetchRequest, FetchResponse, Message, MessageType};
use crate::objectstore::ObjectStore;
use crate::worker::Worker;
use crate::{FrontierError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Fetches URIs and stores their bodies
pub struct HttpFetcher {
    client: Client,
    store: Arc<dyn ObjectStore>,
    max_retries: u32,
}

impl HttpFetcher {
    /// Creates a fetcher
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client carrying timeout and user agent
    /// * `store` - Object store receiving response bodies
    /// * `max_retries` - Additional attempts after a failed one
    pub fn new(client: Client, store: Arc<dyn ObjectStore>, max_retries: u32) -> Self {
        Self {
            client,
            store,
            max_retries,
        }
    }

    /// Fetches one request
    ///
    /// Transport and storage failures are retried up to `max_retries` times.
    /// Any HTTP status counts as a completed fetch; `success` reflects whether
    /// it was 2xx.
    ///
    /// # Returns
    ///
    /// The response; on exhausted retries a failed response carrying the last error
    pub async fn fetch(&self, request: FetchRequest) -> FetchResponse {
        let mut last_error = String::new();

        for attempt in 0..=self.max_retries {
            match self.attempt(&request).await {
                Ok(response) => return response,
                Err(e) => {
                    tracing::debug!(
                        "Fetch of {} failed (attempt {}/{}): {}",
                        request.uri,
                        attempt + 1,
                        self.max_retries + 1,
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }

        tracing::warn!("Giving up on {}: {}", request.uri, last_error);
        FetchResponse::failure(request, last_error)
    }

    async fn attempt(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let started = Instant::now();
        let response = self.client.get(&request.uri).send().await?;

        let status = response.status();
        let mut header: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                header
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        let body = response.bytes().await?;
        let key = Uuid::new_v4();
        let store = Arc::clone(&self.store);

        let digest = tokio::task::spawn_blocking(move || store.put(&key.to_string(), &mut &body[..]))
            .await
            .map_err(|e| FrontierError::Task(e.to_string()))??;

        Ok(FetchResponse {
            request: request.clone(),
            store_key: Some(key),
            content_sha256: Some(digest),
            elapsed_time_ms: started.elapsed().as_millis() as u64,
            error: None,
            header,
            http_code: status.as_u16(),
            success: status.is_success(),
            timestamp: chrono::Utc::now().timestamp(),
        })
    }
}

#[async_trait]
impl Worker for HttpFetcher {
    async fn on_message(&self, message: &Message) -> Result<Vec<Message>> {
        let request: FetchRequest = message.decode(MessageType::FetchRequest)?;
        let response = self.fetch(request).await;

        Ok(vec![Message::new(MessageType::FetchResponse, &response)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::FilesystemObjectStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unreachable_host_yields_failed_response() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FilesystemObjectStore::new(dir.path()).unwrap());
        let fetcher = HttpFetcher::new(Client::new(), store, 1);

        let request = FetchRequest::new("http://127.0.0.1:1/", "", 0).unwrap();
        let response = fetcher.fetch(request.clone()).await;

        assert!(!response.success);
        assert!(response.error.is_some());
        assert_eq!(response.store_key, None);
        assert_eq!(response.request, request);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_other_message_types() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FilesystemObjectStore::new(dir.path()).unwrap());
        let fetcher = HttpFetcher::new(Client::new(), store, 0);

        assert!(fetcher.on_message(&Message::timer()).await.is_err());
    }
}
