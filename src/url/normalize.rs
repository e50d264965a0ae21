use url::Url;

/// Resolves a discovered link against the page it was found on
///
/// Returns `None` for links that should not be crawled:
/// - empty hrefs and pure fragments
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - anything that is not http(s) after resolution
///
/// The fragment is removed from the result.
///
/// # Examples
///
/// ```
/// use delver_frontier::url::normalize_link;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/dir/page").unwrap();
/// assert_eq!(
///     normalize_link("../other#top", &base),
///     Some("https://example.com/other".to_string())
/// );
/// assert_eq!(normalize_link("mailto:a@example.com", &base), None);
/// ```
pub fn normalize_link(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut url = base.join(href).ok()?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    url.host_str()?;
    url.set_fragment(None);

    Some(url.to_string())
}
