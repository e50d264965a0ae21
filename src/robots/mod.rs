//! Robots.txt handling module
//!
//! The frontier publisher consults a [`RobotsPolicy`] before republishing a
//! deferred URI. [`RobotsCache`] fetches and caches robots.txt per host;
//! [`AllowAll`] disables the check.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache};
pub use parser::ParsedRobots;

use crate::Result;
use async_trait::async_trait;

/// Decides whether a URI may be fetched
#[async_trait]
pub trait RobotsPolicy: Send + Sync {
    /// Checks a URI against the robots.txt of its host
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The URI may be fetched
    /// * `Ok(false)` - robots.txt disallows it
    /// * `Err(FrontierError)` - The URI could not be parsed
    async fn is_allowed(&self, uri: &str) -> Result<bool>;
}

/// Policy that allows every URI
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl RobotsPolicy for AllowAll {
    async fn is_allowed(&self, _uri: &str) -> Result<bool> {
        Ok(true)
    }
}
