//! Resource Reconciler
//!
//! Makes sure one shared volume is fronted by its companion pair:
//!
//! ```text
//!   clients ──▶ Service (stable ClusterIP:2049) ──▶ Endpoints (internal host:port) ──▶ NFS server
//! ```
//!
//! # Safety Guarantees
//!
//! 1. The Service ClusterIP is never written; only the target port is updated
//! 2. Companion objects are never deleted here, the PVC owner reference
//!    lets garbage collection remove them with the claim
//! 3. A readiness timeout fails the volume for this pass and leaves the
//!    created object in place

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, PersistentVolumeClaim, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::SyncConfig;
use crate::domain::{
    ClusterResources, CompanionKind, DomainEvent, Endpoint, EventPublisher, SharedVolume,
    VolumeGateway,
};
use crate::error::{Error, Result};

/// Port clients mount through the Service.
pub const NFS_PORT: i32 = 2049;

/// Name of the single Service/Endpoints port.
pub const NFS_PORT_NAME: &str = "nfs";

/// Label linking companion objects to their shared volume.
pub const SHARED_VOLUME_ID_LABEL: &str = "sharedvolume-id";

/// What happened to a volume during [`Reconciler::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Companion objects verified; `published` is set when a new external
    /// endpoint was sent to the control plane.
    Synced { published: bool },
    /// The PVC does not exist (yet); nothing was touched.
    PvcMissing,
}

/// Creates and verifies the companion objects of shared volumes.
pub struct Reconciler {
    config: SyncConfig,
    cluster: Arc<dyn ClusterResources>,
    gateway: Arc<dyn VolumeGateway>,
    events: Arc<dyn EventPublisher>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish()
    }
}

impl Reconciler {
    pub fn new(
        config: SyncConfig,
        cluster: Arc<dyn ClusterResources>,
        gateway: Arc<dyn VolumeGateway>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            cluster,
            gateway,
            events,
        }
    }

    /// Bring the companion objects of `volume` in line and publish the
    /// frontend address. On success `volume.external_endpoint` holds the
    /// published address.
    #[instrument(skip(self, volume, cancel), fields(volume = %volume.id, namespace = %volume.namespace))]
    pub async fn ensure(
        &self,
        volume: &mut SharedVolume,
        cancel: &CancellationToken,
    ) -> Result<EnsureOutcome> {
        let internal = Endpoint::parse(&volume.internal_endpoint)?;

        let Some(pvc) = self
            .cluster
            .get_pvc(&volume.namespace, &volume.pvc_name)
            .await?
        else {
            debug!(pvc = %volume.pvc_name, "PVC not found, volume not yet provisioned");
            return Ok(EnsureOutcome::PvcMissing);
        };

        let owner = pvc_owner_reference(&pvc)?;

        let service = self
            .ensure_service(volume, &internal, &owner, cancel)
            .await?;
        self.ensure_endpoints(volume, &internal, &owner, cancel)
            .await?;

        let Some(address) = frontend_address(&service) else {
            warn!(
                service = %volume.display_name(),
                "Service has no usable frontend address, not publishing"
            );
            return Ok(EnsureOutcome::Synced { published: false });
        };

        if address == volume.external_endpoint {
            return Ok(EnsureOutcome::Synced { published: false });
        }

        self.gateway
            .set_external_endpoint(&volume.id, &volume.namespace, &address)
            .await?;
        info!(
            previous = %volume.external_endpoint,
            endpoint = %address,
            "Published external endpoint"
        );
        self.record(DomainEvent::endpoint_published(volume, &address))
            .await;
        volume.external_endpoint = address;

        Ok(EnsureOutcome::Synced { published: true })
    }

    async fn ensure_service(
        &self,
        volume: &SharedVolume,
        internal: &Endpoint,
        owner: &OwnerReference,
        cancel: &CancellationToken,
    ) -> Result<Service> {
        let namespace = volume.namespace.as_str();
        let name = volume.service_name.as_str();
        let desired_target = IntOrString::Int(i32::from(internal.port));

        let service = match self.cluster.get_service(namespace, name).await? {
            None => {
                let desired = desired_service(volume, internal, owner);
                let created = self.cluster.create_service(&desired).await?;
                info!(service = %volume.display_name(), "Created Service");
                self.record(DomainEvent::companion_created(CompanionKind::Service, volume))
                    .await;
                created
            }
            Some(mut existing) => match single_port_mut(&mut existing) {
                Some(port) if port.target_port.as_ref() != Some(&desired_target) => {
                    let detail = format!(
                        "target port {} -> {}",
                        describe_target(port.target_port.as_ref()),
                        internal.port
                    );
                    port.target_port = Some(desired_target);
                    let updated = self.cluster.update_service(&existing).await?;
                    info!(service = %volume.display_name(), %detail, "Updated Service");
                    self.record(DomainEvent::companion_updated(
                        CompanionKind::Service,
                        volume,
                        detail,
                    ))
                    .await;
                    updated
                }
                Some(_) => existing,
                None => {
                    warn!(
                        service = %volume.display_name(),
                        ports = port_count(&existing),
                        "Service does not have exactly one port, leaving it untouched"
                    );
                    existing
                }
            },
        };

        if cluster_ip(&service).is_some() {
            return Ok(service);
        }

        self.wait_for_ready(
            "Service",
            namespace,
            name,
            cancel,
            || self.cluster.get_service(namespace, name),
            |svc: &Service| cluster_ip(svc).is_some(),
        )
        .await
    }

    async fn ensure_endpoints(
        &self,
        volume: &SharedVolume,
        internal: &Endpoint,
        owner: &OwnerReference,
        cancel: &CancellationToken,
    ) -> Result<Endpoints> {
        let namespace = volume.namespace.as_str();
        let name = volume.service_name.as_str();
        let subset = desired_subset(internal);

        match self.cluster.get_endpoints(namespace, name).await? {
            None => {
                let desired = desired_endpoints(volume, internal, owner);
                self.cluster.create_endpoints(&desired).await?;
                info!(endpoints = %volume.display_name(), target = %internal, "Created Endpoints");
                self.record(DomainEvent::companion_created(
                    CompanionKind::Endpoints,
                    volume,
                ))
                .await;

                self.wait_for_ready(
                    "Endpoints",
                    namespace,
                    name,
                    cancel,
                    || self.cluster.get_endpoints(namespace, name),
                    |_: &Endpoints| true,
                )
                .await
            }
            Some(existing) if existing.subsets.as_deref() == Some(std::slice::from_ref(&subset)) => {
                Ok(existing)
            }
            Some(mut existing) => {
                let detail = format!(
                    "target {} -> {}",
                    describe_subsets(existing.subsets.as_deref()),
                    internal
                );
                existing.subsets = Some(vec![subset]);
                let updated = self.cluster.update_endpoints(&existing).await?;
                info!(endpoints = %volume.display_name(), %detail, "Updated Endpoints");
                self.record(DomainEvent::companion_updated(
                    CompanionKind::Endpoints,
                    volume,
                    detail,
                ))
                .await;
                Ok(updated)
            }
        }
    }

    /// Poll `fetch` until it returns an object accepted by `ready`.
    ///
    /// Missing objects and failed polls are retried until the deadline.
    async fn wait_for_ready<T, F, Fut, P>(
        &self,
        kind: &'static str,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
        fetch: F,
        ready: P,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
        P: Fn(&T) -> bool,
    {
        let deadline = Instant::now() + self.config.readiness_timeout;

        loop {
            match fetch().await {
                Ok(Some(obj)) if ready(&obj) => return Ok(obj),
                Ok(Some(_)) => debug!("{} {}/{} not ready yet", kind, namespace, name),
                Ok(None) => debug!("{} {}/{} not found yet", kind, namespace, name),
                Err(e) => warn!("Failed to poll {} {}/{}: {}", kind, namespace, name, e),
            }

            if Instant::now() >= deadline {
                return Err(Error::ReadinessTimeout {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    timeout: self.config.readiness_timeout,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep(self.config.readiness_poll_interval) => {}
            }
        }
    }

    async fn record(&self, event: DomainEvent) {
        let event_type = event.event_type();
        if let Err(e) = self.events.publish(event).await {
            warn!(event_type, "Failed to record event: {}", e);
        }
    }
}

// =============================================================================
// Desired State
// =============================================================================

fn pvc_owner_reference(pvc: &PersistentVolumeClaim) -> Result<OwnerReference> {
    let uid = pvc.metadata.uid.clone().ok_or_else(|| {
        Error::Internal(format!("PVC {} has no uid", pvc.name_any()))
    })?;

    Ok(OwnerReference {
        api_version: PersistentVolumeClaim::api_version(&()).to_string(),
        kind: PersistentVolumeClaim::kind(&()).to_string(),
        name: pvc.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: None,
    })
}

fn companion_metadata(volume: &SharedVolume, owner: &OwnerReference) -> ObjectMeta {
    ObjectMeta {
        name: Some(volume.service_name.clone()),
        namespace: Some(volume.namespace.clone()),
        labels: Some(BTreeMap::from([(
            SHARED_VOLUME_ID_LABEL.to_string(),
            volume.id.clone(),
        )])),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

/// ClusterIP Service with the single NFS port.
pub fn desired_service(
    volume: &SharedVolume,
    internal: &Endpoint,
    owner: &OwnerReference,
) -> Service {
    Service {
        metadata: companion_metadata(volume, owner),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(vec![ServicePort {
                name: Some(NFS_PORT_NAME.to_string()),
                port: NFS_PORT,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(i32::from(internal.port))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Endpoints with one address and one port pointing at the NFS server.
pub fn desired_endpoints(
    volume: &SharedVolume,
    internal: &Endpoint,
    owner: &OwnerReference,
) -> Endpoints {
    Endpoints {
        metadata: companion_metadata(volume, owner),
        subsets: Some(vec![desired_subset(internal)]),
    }
}

fn desired_subset(internal: &Endpoint) -> EndpointSubset {
    EndpointSubset {
        addresses: Some(vec![EndpointAddress {
            ip: internal.host.clone(),
            ..Default::default()
        }]),
        ports: Some(vec![EndpointPort {
            name: Some(NFS_PORT_NAME.to_string()),
            port: i32::from(internal.port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

// =============================================================================
// Observed State
// =============================================================================

/// The assigned ClusterIP, if any.
fn cluster_ip(service: &Service) -> Option<&str> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != "None")
}

fn port_count(service: &Service) -> usize {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .map_or(0, Vec::len)
}

fn single_port_mut(service: &mut Service) -> Option<&mut ServicePort> {
    match service.spec.as_mut()?.ports.as_mut()?.as_mut_slice() {
        [port] => Some(port),
        _ => None,
    }
}

/// `<clusterIP>:<port>` of a Service with exactly one port.
///
/// Anything else (no IP yet, zero or several ports) yields `None`.
pub fn frontend_address(service: &Service) -> Option<String> {
    let ip = cluster_ip(service)?;
    let ports = service.spec.as_ref()?.ports.as_ref()?;
    let [port] = ports.as_slice() else {
        return None;
    };
    let port = u16::try_from(port.port).ok()?;

    Some(Endpoint::new(ip, port).to_string())
}

fn describe_target(target: Option<&IntOrString>) -> String {
    match target {
        Some(IntOrString::Int(p)) => p.to_string(),
        Some(IntOrString::String(s)) => s.clone(),
        None => "<none>".to_string(),
    }
}

fn describe_subsets(subsets: Option<&[EndpointSubset]>) -> String {
    let targets: Vec<String> = subsets
        .unwrap_or_default()
        .iter()
        .flat_map(|subset| {
            let ports = subset.ports.as_deref().unwrap_or_default();
            subset
                .addresses
                .as_deref()
                .unwrap_or_default()
                .iter()
                .flat_map(move |addr| ports.iter().map(move |p| format!("{}:{}", addr.ip, p.port)))
        })
        .collect();

    if targets.is_empty() {
        "<none>".to_string()
    } else {
        targets.join(",")
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

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "v1".to_string(),
            kind: "PersistentVolumeClaim".to_string(),
            name: "foo".to_string(),
            uid: "uid-foo".to_string(),
            controller: Some(true),
            block_owner_deletion: None,
        }
    }

    fn with_cluster_ip(mut service: Service, ip: &str) -> Service {
        if let Some(spec) = service.spec.as_mut() {
            spec.cluster_ip = Some(ip.to_string());
        }
        service
    }

    #[test]
    fn test_desired_service_shape() {
        let svc = desired_service(&volume(), &Endpoint::new("1.2.3.4", 1234), &owner());

        assert_eq!(svc.metadata.name.as_deref(), Some("baz-service"));
        assert_eq!(svc.metadata.namespace.as_deref(), Some("bar"));
        assert_eq!(
            svc.metadata.labels.as_ref().unwrap().get(SHARED_VOLUME_ID_LABEL),
            Some(&"1234".to_string())
        );
        assert_eq!(svc.metadata.owner_references, Some(vec![owner()]));

        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert!(spec.cluster_ip.is_none());
        let ports = spec.ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some("nfs"));
        assert_eq!(ports[0].port, 2049);
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(1234)));
    }

    #[test]
    fn test_desired_endpoints_shape() {
        let ep = desired_endpoints(&volume(), &Endpoint::new("1.2.3.4", 1234), &owner());

        assert_eq!(ep.metadata.name.as_deref(), Some("baz-service"));
        let subsets = ep.subsets.unwrap();
        assert_eq!(subsets.len(), 1);
        assert_eq!(subsets[0].addresses.as_ref().unwrap()[0].ip, "1.2.3.4");
        let port = &subsets[0].ports.as_ref().unwrap()[0];
        assert_eq!(port.port, 1234);
        assert_eq!(port.name.as_deref(), Some("nfs"));
        assert_eq!(port.protocol.as_deref(), Some("TCP"));
    }

    #[test]
    fn test_frontend_address() {
        let svc = desired_service(&volume(), &Endpoint::new("1.2.3.4", 1234), &owner());
        assert_eq!(frontend_address(&svc), None);

        let svc = with_cluster_ip(svc, "10.96.0.15");
        assert_eq!(frontend_address(&svc).as_deref(), Some("10.96.0.15:2049"));
    }

    #[test]
    fn test_frontend_address_ipv6() {
        let svc = desired_service(&volume(), &Endpoint::new("1.2.3.4", 1234), &owner());
        let svc = with_cluster_ip(svc, "fd00:10:96::a");
        assert_eq!(frontend_address(&svc).as_deref(), Some("[fd00:10:96::a]:2049"));
    }

    #[test]
    fn test_frontend_address_headless_or_multi_port() {
        let svc = desired_service(&volume(), &Endpoint::new("1.2.3.4", 1234), &owner());
        assert_eq!(frontend_address(&with_cluster_ip(svc.clone(), "None")), None);

        let mut multi = with_cluster_ip(svc, "10.96.0.15");
        if let Some(ports) = multi.spec.as_mut().and_then(|s| s.ports.as_mut()) {
            ports.push(ServicePort {
                name: Some("extra".to_string()),
                port: 111,
                ..Default::default()
            });
        }
        assert_eq!(frontend_address(&multi), None);
        assert!(single_port_mut(&mut multi).is_none());
    }

    #[test]
    fn test_pvc_owner_reference() {
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some("foo".to_string()),
                namespace: Some("bar".to_string()),
                uid: Some("uid-foo".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(pvc_owner_reference(&pvc).unwrap(), owner());

        let no_uid = PersistentVolumeClaim::default();
        assert!(pvc_owner_reference(&no_uid).is_err());
    }

    #[test]
    fn test_describe_subsets() {
        let ep = desired_endpoints(&volume(), &Endpoint::new("1.2.3.4", 1234), &owner());
        assert_eq!(describe_subsets(ep.subsets.as_deref()), "1.2.3.4:1234");
        assert_eq!(describe_subsets(None), "<none>");
    }
}
