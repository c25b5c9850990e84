//! Telemetry for the dispatch loop and its owners.
//!
//! Counters and latency figures here are for observability only; nothing in
//! the scheduling path reads them back to make decisions.

pub mod latency;
pub mod metrics;

pub use latency::LatencySampler;
pub use metrics::{Metrics, MetricsSnapshot};
