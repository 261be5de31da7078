//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports, following the
//! Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Domain Layer                              │
//! │   VolumeGateway  │  ClusterResources  │  EventPublisher           │
//! └──────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    Adapters (This Module)                         │
//! │   RestVolumeGateway │ KubernetesClusterResources                  │
//! │   KubernetesEventPublisher │ LoggingEventPublisher                │
//! │   InMemory* fakes for tests                                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod control_plane;
mod event_publisher;
mod kubernetes;
pub mod memory;

pub use control_plane::{ControlPlaneConfig, RestVolumeGateway};
pub use event_publisher::{
    InMemoryEventCollector, KubernetesEventPublisher, LoggingEventPublisher, EVENT_REPORTER,
};
pub use kubernetes::{KubernetesClusterResources, FIELD_MANAGER};
pub use memory::{CallCounts, InMemoryClusterResources, InMemoryVolumeGateway, PublishedEndpoint};
