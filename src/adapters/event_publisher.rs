//! Event Publisher Adapters
//!
//! Implements the `EventPublisher` port with various backends.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::{debug, info};

use crate::domain::{DomainEvent, EventPublisher};
use crate::error::Result;

/// Controller name reported on Kubernetes events.
pub const EVENT_REPORTER: &str = "shared-volume-operator";

/// Publishes domain events as Kubernetes `Event`s on the companion Service.
#[derive(Clone)]
pub struct KubernetesEventPublisher {
    recorder: Recorder,
}

impl KubernetesEventPublisher {
    pub fn new(client: Client, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: EVENT_REPORTER.to_string(),
            instance,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }

    fn service_reference(event: &DomainEvent) -> ObjectReference {
        let (namespace, name) = event.service_ref();
        ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Service".to_string()),
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn to_kube_event(event: &DomainEvent) -> Event {
        Event {
            type_: EventType::Normal,
            reason: event.reason().to_string(),
            note: Some(event.message()),
            action: "Reconcile".to_string(),
            secondary: None,
        }
    }
}

impl std::fmt::Debug for KubernetesEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesEventPublisher").finish()
    }
}

#[async_trait]
impl EventPublisher for KubernetesEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let reference = Self::service_reference(&event);
        self.recorder
            .publish(&Self::to_kube_event(&event), &reference)
            .await?;
        debug!(event_type = event.event_type(), "Recorded Kubernetes event");
        Ok(())
    }
}

/// Logging-based event publisher.
///
/// Publishes domain events to the tracing/logging system.
#[derive(Debug, Clone, Default)]
pub struct LoggingEventPublisher {
    /// Whether to log events at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingEventPublisher {
    /// Create a new logging event publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a publisher that logs at info level.
    pub fn info_level() -> Self {
        Self { info_level: true }
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let event_type = event.event_type();
        let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));

        if self.info_level {
            info!(event_type = %event_type, event = %json, "Domain event");
        } else {
            debug!(event_type = %event_type, event = %json, "Domain event");
        }

        Ok(())
    }
}

/// In-memory event collector for testing.
#[derive(Debug, Default)]
pub struct InMemoryEventCollector {
    events: parking_lot::RwLock<Vec<DomainEvent>>,
}

impl InMemoryEventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Get events of a specific type.
    pub fn events_of_type(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventCollector {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompanionKind, SharedVolume};

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

    #[tokio::test]
    async fn test_in_memory_collector() {
        let collector = InMemoryEventCollector::new();
        assert!(collector.is_empty());

        collector
            .publish(DomainEvent::companion_created(CompanionKind::Service, &volume()))
            .await
            .unwrap();
        collector
            .publish(DomainEvent::endpoint_published(&volume(), "1.2.3.4:2049"))
            .await
            .unwrap();

        assert_eq!(collector.len(), 2);
        assert_eq!(collector.events_of_type("CompanionCreated").len(), 1);
        assert_eq!(collector.events_of_type("ExternalEndpointPublished").len(), 1);

        collector.clear();
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_logging_publisher() {
        let publisher = LoggingEventPublisher::info_level();
        let result = publisher
            .publish(DomainEvent::companion_created(CompanionKind::Endpoints, &volume()))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_kube_event_mapping() {
        let event = DomainEvent::companion_updated(
            CompanionKind::Endpoints,
            &volume(),
            "target 1.2.3.4:1234 -> 1.2.3.4:5678",
        );

        let reference = KubernetesEventPublisher::service_reference(&event);
        assert_eq!(reference.kind.as_deref(), Some("Service"));
        assert_eq!(reference.namespace.as_deref(), Some("bar"));
        assert_eq!(reference.name.as_deref(), Some("baz-service"));

        let kube_event = KubernetesEventPublisher::to_kube_event(&event);
        assert_eq!(kube_event.reason, "Updated");
        assert_eq!(kube_event.action, "Reconcile");
        assert_eq!(
            kube_event.note.as_deref(),
            Some("Updated Endpoints baz-service: target 1.2.3.4:1234 -> 1.2.3.4:5678")
        );
    }
}
