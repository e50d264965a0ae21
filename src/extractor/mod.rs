//! Link extraction stage
//!
//! [`LinkExtractor`] reads a fetched body back from the object store, extracts
//! absolute http(s) links and emits a composite analysis for the accumulator.

mod links;

pub use links::{extract_links, LinkExtractor, ParsedPage};
