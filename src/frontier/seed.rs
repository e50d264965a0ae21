use crate::message::{FetchRequest, Message};
use crate::worker::Worker;
use crate::Result;
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, PartialEq, Eq)]
enum SeedState {
    Pending,
    /// Emitted on the tick with this message id, not yet confirmed
    InFlight(String),
    Published,
}

/// Job that publishes a fixed list of seed URIs once
///
/// A tick emits one depth-1 request per seed until the manager reports them
/// delivered; a failed forward makes the next tick emit them again.
pub struct FixedSeedPublisher {
    seeds: Vec<String>,
    state: Mutex<SeedState>,
}

impl FixedSeedPublisher {
    pub fn new(seeds: Vec<String>) -> Self {
        Self {
            seeds,
            state: Mutex::new(SeedState::Pending),
        }
    }

    /// True once the seeds reached every outbox
    pub fn is_published(&self) -> bool {
        *self.state() == SeedState::Published
    }

    /// Builds the seed requests, skipping seeds that are not http(s) URLs
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.seeds
            .iter()
            .filter_map(|seed| match FetchRequest::new(seed, "", 1) {
                Ok(request) => Some(request),
                Err(e) => {
                    tracing::error!("Failed to parse seed {}: {}", seed, e);
                    None
                }
            })
            .collect()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Worker for FixedSeedPublisher {
    async fn on_message(&self, message: &Message) -> Result<Vec<Message>> {
        {
            let mut state = self.state();
            if *state != SeedState::Pending {
                return Ok(Vec::new());
            }
            *state = SeedState::InFlight(message.id.clone());
        }

        let requests = self.requests();
        tracing::info!("Publishing {} seed(s)", requests.len());

        requests
            .iter()
            .map(|request| Ok(request.to_message()?))
            .collect()
    }

    async fn on_delivered(&self, message: &Message, delivered: bool) {
        let mut state = self.state();
        if !matches!(&*state, SeedState::InFlight(id) if *id == message.id) {
            return;
        }

        if delivered {
            *state = SeedState::Published;
        } else {
            tracing::warn!("Seeds were not delivered; retrying on the next tick");
            *state = SeedState::Pending;
        }
    }
}
