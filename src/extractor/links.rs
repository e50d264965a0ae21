use crate::message::{CompositeAnalysis, FetchResponse, Message, MessageType};
use crate::objectstore::ObjectStore;
use crate::url::normalize_link;
use crate::worker::Worker;
use crate::{FrontierError, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::sync::Arc;
use url::Url;

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Absolute, de-duplicated links in document order
    pub links: Vec<String>,
}

/// Parses HTML content and extracts links and the title
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - anything that does not resolve to an http(s) URL with a host
///
/// Fragments are removed before de-duplication.
///
/// # Example
///
/// ```
/// use delver_frontier::extractor::extract_links;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page#top">Link</a></body></html>"#;
/// let base = Url::parse("https://example.com/").unwrap();
/// let parsed = extract_links(html, &base);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links, vec!["https://example.com/page".to_string()]);
/// ```
pub fn extract_links(html: &str, base: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let mut push = |href: &str| {
        if let Some(link) = normalize_link(href, base) {
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }
    };

    if let Ok(selector) = Selector::parse("a[href]") {
        for element in document.select(&selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    if let Ok(selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    ParsedPage {
        title: extract_title(&document),
        links,
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;

    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Turns fetch responses into composite analyses carrying discovered links
pub struct LinkExtractor {
    store: Arc<dyn ObjectStore>,
}

impl LinkExtractor {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Builds the analysis for one response
    ///
    /// Failed fetches, and bodies that can no longer be read, pass through
    /// with no links.
    pub fn analyse(&self, response: FetchResponse) -> CompositeAnalysis {
        let mut analysis = CompositeAnalysis {
            response,
            uris: Vec::new(),
            features: BTreeMap::new(),
        };

        let key = match analysis.response.store_key {
            Some(key) if analysis.response.success => key,
            _ => return analysis,
        };

        let base = match Url::parse(analysis.uri()) {
            Ok(base) => base,
            Err(e) => {
                tracing::warn!("Cannot resolve links of {}: {}", analysis.uri(), e);
                return analysis;
            }
        };

        let mut body = Vec::new();
        let read = self
            .store
            .get(&key.to_string())
            .map_err(FrontierError::from)
            .and_then(|mut file| Ok(file.read_to_end(&mut body)?));

        if let Err(e) = read {
            tracing::warn!("Body of {} unavailable: {}", analysis.uri(), e);
            return analysis;
        }

        let page = extract_links(&String::from_utf8_lossy(&body), &base);
        if let Some(title) = page.title {
            analysis
                .features
                .insert("title".to_string(), serde_json::Value::String(title));
        }
        analysis.uris = page.links;
        analysis
    }
}

#[async_trait]
impl Worker for LinkExtractor {
    async fn on_message(&self, message: &Message) -> Result<Vec<Message>> {
        let response: FetchResponse = message.decode(MessageType::FetchResponse)?;
        let store = Arc::clone(&self.store);

        let analysis = tokio::task::spawn_blocking(move || LinkExtractor { store }.analyse(response))
            .await
            .map_err(|e| FrontierError::Task(e.to_string()))?;

        tracing::debug!("{}: {} links", analysis.uri(), analysis.uris.len());
        Ok(vec![analysis.to_message()?])
    }
}
