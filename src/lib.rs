//! netnav - live network diagnostics engine.
//!
//! Periodically collects local interfaces and socket connections, runs
//! traceroute, ping and speed test probes on demand, and exposes the latest
//! results as race-free snapshots.

pub mod collector;
pub mod config;
pub mod engine;
pub mod geo;
pub mod graph;
pub mod model;
pub mod probe;
pub mod scheduler;
pub mod store;
pub mod web;

pub use config::DiagnosticsConfig;
pub use engine::{Diagnostics, EngineError};
pub use graph::{build_graph, RouteGraph};
pub use model::*;
pub use probe::{ProbeError, ProbeHandle};
pub use store::SnapshotStore;
