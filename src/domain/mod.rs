//! Domain Layer
//!
//! Value objects, ports and events for shared volume reconciliation.
//!
//! - **Endpoint** (`endpoint.rs`) - `host:port` parsing
//! - **Volume** (`volume.rs`) - `SharedVolume` and control-plane classification
//! - **Ports** (`ports.rs`) - Trait abstractions for external dependencies
//! - **Events** (`events.rs`) - Domain events for audit and notifications
//! - **Reset** (`reset.rs`) - Gateway reset signal
//!
//! # Usage
//!
//! ```ignore
//! use shared_volume_operator::domain::{ClusterResources, VolumeGateway};
//!
//! async fn publish_all<G: VolumeGateway>(gateway: &G) -> Result<()> {
//!     for volume in gateway.list_shared_volumes().await? {
//!         // ...
//!     }
//!     Ok(())
//! }
//! ```

pub mod endpoint;
pub mod events;
pub mod ports;
pub mod reset;
pub mod volume;

pub use endpoint::Endpoint;
pub use events::{CompanionKind, DomainEvent};
pub use ports::{ClusterResources, EventPublisher, VolumeGateway};
pub use reset::{reset_channel, GatewayReset, ResetListener};
pub use volume::{classify, Classification, SharedVolume};
