//! Shared Volume Operator
//!
//! Gives NFS shared volumes a stable in-cluster frontend. For every shared,
//! Kubernetes-provisioned volume reported by the storage control plane, the
//! operator keeps a ClusterIP `Service` and a manually managed `Endpoints`
//! object pointing at the volume's current NFS server, then publishes the
//! Service address back to the control plane as the volume's external
//! endpoint.
//!
//! # Architecture
//!
//! ```text
//! Control Plane ──list──▶ Control Loop ──ensure──▶ Reconciler ──▶ Service + Endpoints
//!       ▲                                              │
//!       └──────────── publish external endpoint ───────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Infrastructure adapters implementing domain ports
//! - [`controller`] - Control loop, change-detection cache and reconciler
//! - [`domain`] - Domain types, ports and events
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus metrics for the control loop

pub mod adapters;
pub mod controller;
pub mod domain;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use controller::{SharedVolumeController, SyncConfig};
pub use domain::{Endpoint, SharedVolume};
pub use error::{Error, Result};
pub use metrics::SyncMetrics;
