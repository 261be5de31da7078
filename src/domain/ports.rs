//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! The reconciler and control loop only talk to the outside world through
//! these traits. Adapters provide the Kubernetes, REST and in-memory
//! implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │  VolumeGateway │ ClusterResources │ EventPublisher  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  RestVolumeGateway │ KubernetesClusterResources     │    │
//! │  │  KubernetesEventPublisher │ InMemory*               │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, PersistentVolumeClaim, Service};

use super::events::DomainEvent;
use super::volume::SharedVolume;
use crate::error::Result;

// =============================================================================
// Storage Control Plane Port
// =============================================================================

/// Port for the storage control plane.
#[async_trait]
pub trait VolumeGateway: Send + Sync {
    /// List every volume that is shared and was provisioned through a PVC.
    async fn list_shared_volumes(&self) -> Result<Vec<SharedVolume>>;

    /// Record `endpoint` (`host:port`) as the stable address of a volume.
    async fn set_external_endpoint(&self, id: &str, namespace: &str, endpoint: &str)
        -> Result<()>;
}

// =============================================================================
// Cluster Resource Port
// =============================================================================

/// Port for typed access to the cluster objects the reconciler touches.
///
/// Getters return `Ok(None)` when the object does not exist. Create and
/// update take the namespace from the object's metadata.
#[async_trait]
pub trait ClusterResources: Send + Sync {
    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    async fn create_service(&self, service: &Service) -> Result<Service>;

    async fn update_service(&self, service: &Service) -> Result<Service>;

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>>;

    async fn create_endpoints(&self, endpoints: &Endpoints) -> Result<Endpoints>;

    async fn update_endpoints(&self, endpoints: &Endpoints) -> Result<Endpoints>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;
}
