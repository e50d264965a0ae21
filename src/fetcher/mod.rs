//! HTTP fetching stage
//!
//! [`HttpFetcher`] consumes fetch requests, downloads each URI with retries,
//! stores the body in an object store and emits a fetch response.

mod http;

pub use http::HttpFetcher;

use crate::config::HttpClientConfig;
use reqwest::Client;
use std::time::Duration;

/// Builds the shared HTTP client
///
/// # Arguments
///
/// * `config` - Timeout and user agent settings
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use delver_frontier::config::HttpClientConfig;
/// use delver_frontier::fetcher::build_http_client;
///
/// let client = build_http_client(&HttpClientConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &HttpClientConfig) -> Result<Client, reqwest::Error> {
    let timeout = Duration::from_secs(config.timeout_secs);

    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(timeout)
        .connect_timeout(timeout)
        .gzip(true)
        .brotli(true)
        .build()
}
