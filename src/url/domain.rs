use crate::{UrlError, UrlResult};
use std::net::IpAddr;
use url::Url;

/// Extracts the lowercase host of an absolute URI
///
/// # Arguments
///
/// * `uri` - The URI to inspect
///
/// # Returns
///
/// * `Ok(String)` - The lowercase host, without port
/// * `Err(UrlError)` - The URI does not parse or has no host
pub fn host_of(uri: &str) -> UrlResult<String> {
    let url = Url::parse(uri).map_err(|e| UrlError::Parse(format!("{}: {}", uri, e)))?;

    url.host_str()
        .map(|h| h.to_lowercase())
        .ok_or_else(|| UrlError::MissingHost(uri.to_string()))
}

/// Returns the registrable domain (second-level plus top-level label) of a host
///
/// IP addresses and single-label hosts are returned unchanged. A trailing dot is
/// ignored and the result is lowercase.
///
/// # Examples
///
/// ```
/// use delver_frontier::url::registrable_domain;
///
/// assert_eq!(registrable_domain("foo.Example.com"), "example.com");
/// assert_eq!(registrable_domain("example.com"), "example.com");
/// assert_eq!(registrable_domain("localhost"), "localhost");
/// assert_eq!(registrable_domain("127.0.0.1"), "127.0.0.1");
/// ```
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    if bare.parse::<IpAddr>().is_ok() {
        return host;
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();

    if labels.len() <= 2 {
        return labels.join(".");
    }

    labels[labels.len() - 2..].join(".")
}

/// Derives a filesystem-safe shard identifier for a registrable domain
///
/// The identifier is the hex encoding of the domain, so it is reversible with
/// [`shard_host`] and never contains path separators.
pub fn shard_id(domain: &str) -> String {
    hex::encode(domain.as_bytes())
}

/// Recovers the registrable domain from a shard identifier
///
/// # Returns
///
/// * `Ok(String)` - The domain the shard belongs to
/// * `Err(UrlError::InvalidShard)` - The identifier was not produced by [`shard_id`]
pub fn shard_host(id: &str) -> UrlResult<String> {
    let bytes = hex::decode(id).map_err(|_| UrlError::InvalidShard(id.to_string()))?;
    String::from_utf8(bytes).map_err(|_| UrlError::InvalidShard(id.to_string()))
}
