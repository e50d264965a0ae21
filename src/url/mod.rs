//! URL handling module
//!
//! Registrable-domain extraction, shard identifiers derived from it, and
//! normalization of discovered links.

mod domain;
mod normalize;

pub use domain::{host_of, registrable_domain, shard_host, shard_id};
pub use normalize::normalize_link;
