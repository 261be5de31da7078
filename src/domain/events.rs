//! Domain Events
//!
//! Immutable records of the changes the reconciler makes. They feed the
//! Kubernetes event sink (human-visible "created"/"updated" notes on the
//! companion Service) and the structured log.
//!
//! # Example
//!
//! ```ignore
//! let event = DomainEvent::companion_created(CompanionKind::Service, &volume);
//! event_publisher.publish(event).await?;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::volume::SharedVolume;

/// The two companion objects fronting a shared volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompanionKind {
    /// Frontend with the stable virtual IP
    Service,
    /// Target pointing at the live NFS server
    Endpoints,
}

impl std::fmt::Display for CompanionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompanionKind::Service => write!(f, "Service"),
            CompanionKind::Endpoints => write!(f, "Endpoints"),
        }
    }
}

/// Domain event representing a change made on behalf of a shared volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    /// A companion object was created.
    CompanionCreated {
        kind: CompanionKind,
        volume_id: String,
        namespace: String,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A companion object was updated in place.
    CompanionUpdated {
        kind: CompanionKind,
        volume_id: String,
        namespace: String,
        name: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// A new stable endpoint was handed to the storage control plane.
    ExternalEndpointPublished {
        volume_id: String,
        namespace: String,
        name: String,
        endpoint: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn companion_created(kind: CompanionKind, volume: &SharedVolume) -> Self {
        DomainEvent::CompanionCreated {
            kind,
            volume_id: volume.id.clone(),
            namespace: volume.namespace.clone(),
            name: volume.service_name.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn companion_updated(
        kind: CompanionKind,
        volume: &SharedVolume,
        detail: impl Into<String>,
    ) -> Self {
        DomainEvent::CompanionUpdated {
            kind,
            volume_id: volume.id.clone(),
            namespace: volume.namespace.clone(),
            name: volume.service_name.clone(),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn endpoint_published(volume: &SharedVolume, endpoint: &str) -> Self {
        DomainEvent::ExternalEndpointPublished {
            volume_id: volume.id.clone(),
            namespace: volume.namespace.clone(),
            name: volume.service_name.clone(),
            endpoint: endpoint.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Get the event type as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::CompanionCreated { .. } => "CompanionCreated",
            DomainEvent::CompanionUpdated { .. } => "CompanionUpdated",
            DomainEvent::ExternalEndpointPublished { .. } => "ExternalEndpointPublished",
        }
    }

    /// Short reason string, suitable for a Kubernetes Event `reason`.
    pub fn reason(&self) -> &'static str {
        match self {
            DomainEvent::CompanionCreated { .. } => "Created",
            DomainEvent::CompanionUpdated { .. } => "Updated",
            DomainEvent::ExternalEndpointPublished { .. } => "EndpointPublished",
        }
    }

    /// Human readable message.
    pub fn message(&self) -> String {
        match self {
            DomainEvent::CompanionCreated {
                kind,
                volume_id,
                name,
                ..
            } => format!("Created {} {} for shared volume {}", kind, name, volume_id),
            DomainEvent::CompanionUpdated {
                kind, name, detail, ..
            } => format!("Updated {} {}: {}", kind, name, detail),
            DomainEvent::ExternalEndpointPublished {
                volume_id,
                endpoint,
                ..
            } => format!("Published endpoint {} for shared volume {}", endpoint, volume_id),
        }
    }

    /// Namespace and name of the Service the event is about.
    pub fn service_ref(&self) -> (&str, &str) {
        match self {
            DomainEvent::CompanionCreated {
                namespace, name, ..
            }
            | DomainEvent::CompanionUpdated {
                namespace, name, ..
            }
            | DomainEvent::ExternalEndpointPublished {
                namespace, name, ..
            } => (namespace, name),
        }
    }

    /// Get the volume ID associated with this event.
    pub fn volume_id(&self) -> &str {
        match self {
            DomainEvent::CompanionCreated { volume_id, .. }
            | DomainEvent::CompanionUpdated { volume_id, .. }
            | DomainEvent::ExternalEndpointPublished { volume_id, .. } => volume_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> SharedVolume {
        SharedVolume {
            id: "1234".to_string(),
            service_name: "baz-service".to_string(),
            pvc_name: "foo".to_string(),
            namespace: "bar".to_string(),
            internal_endpoint: "1.2.3.4:1234".to_string(),
            external_endpoint: String::new(),
        }
    }

    #[test]
    fn test_created_event() {
        let event = DomainEvent::companion_created(CompanionKind::Service, &volume());

        assert_eq!(event.event_type(), "CompanionCreated");
        assert_eq!(event.reason(), "Created");
        assert_eq!(event.volume_id(), "1234");
        assert_eq!(event.service_ref(), ("bar", "baz-service"));
        assert_eq!(
            event.message(),
            "Created Service baz-service for shared volume 1234"
        );
    }

    #[test]
    fn test_updated_event_message() {
        let event =
            DomainEvent::companion_updated(CompanionKind::Endpoints, &volume(), "port 1234 -> 5678");
        assert_eq!(event.reason(), "Updated");
        assert_eq!(
            event.message(),
            "Updated Endpoints baz-service: port 1234 -> 5678"
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = DomainEvent::endpoint_published(&volume(), "1.2.3.4:2049");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"ExternalEndpointPublished\""));
        assert!(json.contains("1.2.3.4:2049"));

        let back: DomainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
