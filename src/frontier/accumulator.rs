use crate::bloom::Bloom;
use crate::maps::{Entry, KvMap, MultiHostMap};
use crate::message::{CompositeAnalysis, FetchRequest, Message, MessageType};
use crate::url::{host_of, registrable_domain};
use crate::worker::Worker;
use crate::{FrontierError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Turns analysed pages into new fetch requests, depth first
#[derive(Clone)]
pub struct DfsAccumulator {
    bloom: Arc<dyn Bloom>,
    url_store: Arc<MultiHostMap>,
    max_depth: u32,
}

impl DfsAccumulator {
    /// Creates an accumulator
    ///
    /// # Arguments
    ///
    /// * `bloom` - Visited-URI filter
    /// * `url_store` - Store receiving deferred cross-domain discoveries
    /// * `max_depth` - Same-domain links are followed while the page depth is below this
    pub fn new(bloom: Arc<dyn Bloom>, url_store: Arc<MultiHostMap>, max_depth: u32) -> Self {
        Self {
            bloom,
            url_store,
            max_depth,
        }
    }

    /// Processes one analysed page
    ///
    /// Marks the page visited, then sorts every discovered URI:
    /// - same registrable domain, below the depth limit, not yet visited:
    ///   returned as a request at `depth + 1` and marked visited
    /// - same registrable domain at the depth limit: dropped
    /// - other registrable domain: stored in the URL store for a later refill
    ///
    /// Storage failures are logged; they never fail the page.
    ///
    /// # Returns
    ///
    /// The fetch requests to publish, in discovery order
    pub fn accumulate(&self, analysis: &CompositeAnalysis) -> Vec<FetchRequest> {
        let origin = analysis.uri();
        let depth = analysis.depth();

        if let Err(e) = self.bloom.add(origin.as_bytes()) {
            tracing::warn!("Failed to mark {} as visited: {}", origin, e);
        }

        let source_host = if analysis.response.request.host.is_empty() {
            host_of(origin).unwrap_or_default()
        } else {
            analysis.response.request.host.clone()
        };
        let source_domain = registrable_domain(&source_host);

        let mut requests = Vec::new();
        let mut to_visit: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut deferred: Vec<Entry> = Vec::new();

        for uri in &analysis.uris {
            if !seen.insert(uri.as_str()) {
                continue;
            }

            let target_domain = match host_of(uri) {
                Ok(host) => registrable_domain(&host),
                Err(e) => {
                    tracing::debug!("Skipping discovered link {}: {}", uri, e);
                    continue;
                }
            };

            if target_domain == source_domain {
                if depth >= self.max_depth || self.bloom.contains(uri.as_bytes()) {
                    continue;
                }

                match FetchRequest::new(uri, origin, depth + 1) {
                    Ok(request) => {
                        requests.push(request);
                        to_visit.push(uri);
                    }
                    Err(e) => tracing::debug!("Skipping discovered link {}: {}", uri, e),
                }
            } else {
                let stored = FetchRequest::new(uri, origin, 0)
                    .map_err(FrontierError::from)
                    .and_then(|request| Ok(serde_json::to_vec(&request)?));

                match stored {
                    Ok(value) => deferred.push((uri.as_bytes().to_vec(), value)),
                    Err(e) => tracing::debug!("Not deferring {}: {}", uri, e),
                }
            }
        }

        if !to_visit.is_empty() {
            let values: Vec<&[u8]> = to_visit.iter().map(|u| u.as_bytes()).collect();
            if let Err(e) = self.bloom.set_many(&values) {
                tracing::warn!("Failed to mark {} links as visited: {}", values.len(), e);
            }
        }

        if !deferred.is_empty() {
            if let Err(e) = self.url_store.set_many(&deferred) {
                tracing::warn!("Failed to defer {} links: {}", deferred.len(), e);
            }
        }

        tracing::debug!(
            "{} at depth {}: {} to fetch, {} deferred",
            origin,
            depth,
            requests.len(),
            deferred.len()
        );

        requests
    }
}

#[async_trait]
impl Worker for DfsAccumulator {
    async fn on_message(&self, message: &Message) -> Result<Vec<Message>> {
        let analysis: CompositeAnalysis = message.decode(MessageType::CompositeAnalysis)?;
        let this = self.clone();

        let requests = tokio::task::spawn_blocking(move || this.accumulate(&analysis))
            .await
            .map_err(|e| FrontierError::Task(e.to_string()))?;

        requests
            .iter()
            .map(|request| Ok(request.to_message()?))
            .collect()
    }
}
