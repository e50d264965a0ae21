//! Depth-first crawl frontier
//!
//! The [`DfsAccumulator`] consumes analysed pages: same-domain links below the
//! depth limit are fetched straight away, cross-domain links are deferred to a
//! [`MultiHostMap`](crate::maps::MultiHostMap). The [`DfsPublisher`] watches the
//! fetch-input queue and, once it has stayed empty long enough, drains deferred
//! hosts back into it. [`FixedSeedPublisher`] starts the loop.

mod accumulator;
mod publisher;
mod seed;

pub use accumulator::DfsAccumulator;
pub use publisher::DfsPublisher;
pub use seed::FixedSeedPublisher;
