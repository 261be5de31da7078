//! Metrics module
//!
//! Prometheus collectors for the shared volume control loop.

mod sync;

pub use sync::{ReconcileResult, SyncMetrics};
