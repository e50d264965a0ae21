//! Integration tests for the frontier pipeline
//!
//! HTTP behaviour is exercised against wiremock servers; durable state lives in
//! temporary directories.

mod frontier_tests;
mod pipeline_tests;
mod queue_tests;
