//! Throughput and latency accounting (spec.md §4.11).

mod counters;
mod histogram;
mod monitor;
mod registry;

pub use counters::{CounterSnapshot, SessionCounters};
pub use histogram::{LatencyHistograms, LatencyStats};
pub use monitor::{Monitor, Rates};
pub use registry::SessionRegistry;
