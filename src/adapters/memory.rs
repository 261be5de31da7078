//! In-memory adapters.
//!
//! Deterministic stand-ins for the cluster and the storage control plane.
//! They count calls so tests can assert how much API traffic a pass caused,
//! and they mimic the asynchronous ClusterIP allocation of a real API server:
//! a created Service has no IP until it is read back.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, PersistentVolumeClaim, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::{Mutex, RwLock};

use crate::domain::{ClusterResources, SharedVolume, VolumeGateway};
use crate::error::{Error, Result};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta_key(meta: &ObjectMeta) -> Result<Key> {
    match (meta.namespace.as_deref(), meta.name.as_deref()) {
        (Some(ns), Some(name)) => Ok(key(ns, name)),
        _ => Err(Error::Internal("object has no namespace/name".to_string())),
    }
}

fn bump_version(meta: &mut ObjectMeta) {
    let next = meta
        .resource_version
        .as_deref()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    meta.resource_version = Some(next.to_string());
}

// =============================================================================
// Cluster
// =============================================================================

/// Number of cluster API calls observed, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub reads: usize,
    pub creates: usize,
    pub updates: usize,
}

impl CallCounts {
    pub fn mutations(&self) -> usize {
        self.creates + self.updates
    }

    pub fn total(&self) -> usize {
        self.reads + self.mutations()
    }
}

#[derive(Debug, Default)]
struct ClusterStore {
    pvcs: BTreeMap<Key, PersistentVolumeClaim>,
    services: BTreeMap<Key, Service>,
    endpoints: BTreeMap<Key, Endpoints>,
    ip_pool: VecDeque<String>,
    next_ip: u32,
    failing_namespaces: BTreeSet<String>,
    calls: CallCounts,
}

impl ClusterStore {
    fn check(&self, namespace: &str) -> Result<()> {
        if self.failing_namespaces.contains(namespace) {
            return Err(Error::Internal(format!(
                "injected API failure in namespace {}",
                namespace
            )));
        }
        Ok(())
    }

    fn allocate_ip(&mut self) -> String {
        self.ip_pool.pop_front().unwrap_or_else(|| {
            self.next_ip += 1;
            format!("10.96.{}.{}", self.next_ip / 250, self.next_ip % 250 + 1)
        })
    }
}

/// In-memory cluster with PVCs, Services and Endpoints.
#[derive(Debug)]
pub struct InMemoryClusterResources {
    store: Mutex<ClusterStore>,
    assign_cluster_ips: AtomicBool,
}

impl Default for InMemoryClusterResources {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryClusterResources {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(ClusterStore::default()),
            assign_cluster_ips: AtomicBool::new(true),
        }
    }

    /// Hand out these ClusterIPs, in order, before falling back to generated ones.
    pub fn with_cluster_ips<I, S>(ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cluster = Self::new();
        cluster.store.lock().ip_pool = ips.into_iter().map(Into::into).collect();
        cluster
    }

    /// When disabled, created Services never receive a ClusterIP.
    pub fn set_assign_cluster_ips(&self, enabled: bool) {
        self.assign_cluster_ips.store(enabled, Ordering::SeqCst);
    }

    /// Make every call touching `namespace` fail.
    pub fn fail_namespace(&self, namespace: &str) {
        self.store
            .lock()
            .failing_namespaces
            .insert(namespace.to_string());
    }

    pub fn heal_namespace(&self, namespace: &str) {
        self.store.lock().failing_namespaces.remove(namespace);
    }

    /// Add a bound PVC and return its uid.
    pub fn insert_pvc(&self, namespace: &str, name: &str) -> String {
        let uid = uuid::Uuid::new_v4().to_string();
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                uid: Some(uid.clone()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        self.store.lock().pvcs.insert(key(namespace, name), pvc);
        uid
    }

    pub fn remove_pvc(&self, namespace: &str, name: &str) {
        self.store.lock().pvcs.remove(&key(namespace, name));
    }

    /// Current Service, without counting a call.
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.store.lock().services.get(&key(namespace, name)).cloned()
    }

    /// Current Endpoints, without counting a call.
    pub fn endpoints(&self, namespace: &str, name: &str) -> Option<Endpoints> {
        self.store.lock().endpoints.get(&key(namespace, name)).cloned()
    }

    /// Replace a Service out of band, as a human with kubectl would.
    pub fn put_service(&self, service: Service) -> Result<()> {
        let k = meta_key(&service.metadata)?;
        self.store.lock().services.insert(k, service);
        Ok(())
    }

    /// Replace Endpoints out of band.
    pub fn put_endpoints(&self, endpoints: Endpoints) -> Result<()> {
        let k = meta_key(&endpoints.metadata)?;
        self.store.lock().endpoints.insert(k, endpoints);
        Ok(())
    }

    /// Delete a Service out of band.
    pub fn delete_service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.store.lock().services.remove(&key(namespace, name))
    }

    pub fn service_count(&self) -> usize {
        self.store.lock().services.len()
    }

    pub fn endpoints_count(&self) -> usize {
        self.store.lock().endpoints.len()
    }

    pub fn calls(&self) -> CallCounts {
        self.store.lock().calls
    }

    pub fn reset_calls(&self) {
        self.store.lock().calls = CallCounts::default();
    }
}

#[async_trait]
impl ClusterResources for InMemoryClusterResources {
    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        let mut store = self.store.lock();
        store.calls.reads += 1;
        store.check(namespace)?;
        Ok(store.pvcs.get(&key(namespace, name)).cloned())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let assign = self.assign_cluster_ips.load(Ordering::SeqCst);
        let mut store = self.store.lock();
        store.calls.reads += 1;
        store.check(namespace)?;

        let k = key(namespace, name);
        let needs_ip = store
            .services
            .get(&k)
            .and_then(|svc| svc.spec.as_ref())
            .is_some_and(|spec| spec.cluster_ip.is_none());
        if assign && needs_ip {
            let ip = store.allocate_ip();
            if let Some(spec) = store.services.get_mut(&k).and_then(|s| s.spec.as_mut()) {
                spec.cluster_ip = Some(ip.clone());
                spec.cluster_ips = Some(vec![ip]);
            }
        }

        Ok(store.services.get(&k).cloned())
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        let mut store = self.store.lock();
        store.calls.creates += 1;
        let k = meta_key(&service.metadata)?;
        store.check(&k.0)?;

        if store.services.contains_key(&k) {
            return Err(Error::Internal(format!(
                "services \"{}\" already exists",
                k.1
            )));
        }

        let mut created = service.clone();
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        created.metadata.resource_version = Some("1".to_string());
        store.services.insert(k, created.clone());
        Ok(created)
    }

    async fn update_service(&self, service: &Service) -> Result<Service> {
        let mut store = self.store.lock();
        store.calls.updates += 1;
        let k = meta_key(&service.metadata)?;
        store.check(&k.0)?;

        let Some(current) = store.services.get(&k) else {
            return Err(Error::Internal(format!("services \"{}\" not found", k.1)));
        };

        let current_ip = current.spec.as_ref().and_then(|s| s.cluster_ip.clone());
        let mut updated = service.clone();
        let spec = updated.spec.get_or_insert_with(Default::default);
        let requested_ip = spec.cluster_ip.clone();
        match (current_ip, requested_ip) {
            (Some(old), Some(new)) if old != new => {
                return Err(Error::Internal(
                    "spec.clusterIP: Invalid value: field is immutable".to_string(),
                ));
            }
            (Some(old), None) => spec.cluster_ip = Some(old),
            _ => {}
        }

        bump_version(&mut updated.metadata);
        store.services.insert(k, updated.clone());
        Ok(updated)
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>> {
        let mut store = self.store.lock();
        store.calls.reads += 1;
        store.check(namespace)?;
        Ok(store.endpoints.get(&key(namespace, name)).cloned())
    }

    async fn create_endpoints(&self, endpoints: &Endpoints) -> Result<Endpoints> {
        let mut store = self.store.lock();
        store.calls.creates += 1;
        let k = meta_key(&endpoints.metadata)?;
        store.check(&k.0)?;

        if store.endpoints.contains_key(&k) {
            return Err(Error::Internal(format!(
                "endpoints \"{}\" already exists",
                k.1
            )));
        }

        let mut created = endpoints.clone();
        created.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        created.metadata.resource_version = Some("1".to_string());
        store.endpoints.insert(k, created.clone());
        Ok(created)
    }

    async fn update_endpoints(&self, endpoints: &Endpoints) -> Result<Endpoints> {
        let mut store = self.store.lock();
        store.calls.updates += 1;
        let k = meta_key(&endpoints.metadata)?;
        store.check(&k.0)?;

        if !store.endpoints.contains_key(&k) {
            return Err(Error::Internal(format!("endpoints \"{}\" not found", k.1)));
        }

        let mut updated = endpoints.clone();
        bump_version(&mut updated.metadata);
        store.endpoints.insert(k, updated.clone());
        Ok(updated)
    }
}

// =============================================================================
// Storage Control Plane
// =============================================================================

/// One call to [`VolumeGateway::set_external_endpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEndpoint {
    pub id: String,
    pub namespace: String,
    pub endpoint: String,
}

/// In-memory storage control plane.
#[derive(Debug)]
pub struct InMemoryVolumeGateway {
    volumes: RwLock<Vec<SharedVolume>>,
    published: RwLock<Vec<PublishedEndpoint>>,
    persist_published: AtomicBool,
    fail_listing: AtomicBool,
    list_calls: AtomicUsize,
}

impl Default for InMemoryVolumeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVolumeGateway {
    pub fn new() -> Self {
        Self {
            volumes: RwLock::new(Vec::new()),
            published: RwLock::new(Vec::new()),
            persist_published: AtomicBool::new(true),
            fail_listing: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_volumes(volumes: Vec<SharedVolume>) -> Self {
        let gateway = Self::new();
        *gateway.volumes.write() = volumes;
        gateway
    }

    /// Insert or replace a volume (matched by namespace and id).
    pub fn upsert_volume(&self, volume: SharedVolume) {
        let mut volumes = self.volumes.write();
        match volumes
            .iter_mut()
            .find(|v| v.id == volume.id && v.namespace == volume.namespace)
        {
            Some(existing) => *existing = volume,
            None => volumes.push(volume),
        }
    }

    pub fn remove_volume(&self, id: &str) {
        self.volumes.write().retain(|v| v.id != id);
    }

    pub fn volume(&self, id: &str) -> Option<SharedVolume> {
        self.volumes.read().iter().find(|v| v.id == id).cloned()
    }

    /// When disabled, published endpoints are recorded but not reflected in
    /// later listings.
    pub fn set_persist_published(&self, enabled: bool) {
        self.persist_published.store(enabled, Ordering::SeqCst);
    }

    pub fn set_fail_listing(&self, enabled: bool) {
        self.fail_listing.store(enabled, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishedEndpoint> {
        self.published.read().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VolumeGateway for InMemoryVolumeGateway {
    async fn list_shared_volumes(&self) -> Result<Vec<SharedVolume>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::ControlPlaneRequest(
                "401 Unauthorized: token expired".to_string(),
            ));
        }
        Ok(self.volumes.read().clone())
    }

    async fn set_external_endpoint(&self, id: &str, namespace: &str, endpoint: &str) -> Result<()> {
        self.published.write().push(PublishedEndpoint {
            id: id.to_string(),
            namespace: namespace.to_string(),
            endpoint: endpoint.to_string(),
        });

        if self.persist_published.load(Ordering::SeqCst) {
            if let Some(v) = self
                .volumes
                .write()
                .iter_mut()
                .find(|v| v.id == id && v.namespace == namespace)
            {
                v.external_endpoint = endpoint.to_string();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn service(ns: &str, name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec::default()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cluster_ip_assigned_on_read() {
        let cluster = InMemoryClusterResources::with_cluster_ips(["1.2.3.4"]);

        let created = cluster.create_service(&service("bar", "svc")).await.unwrap();
        assert!(created.spec.unwrap().cluster_ip.is_none());

        let read = cluster.get_service("bar", "svc").await.unwrap().unwrap();
        assert_eq!(read.spec.unwrap().cluster_ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(
            cluster.calls(),
            CallCounts {
                reads: 1,
                creates: 1,
                updates: 0
            }
        );
    }

    #[tokio::test]
    async fn test_cluster_ip_immutable() {
        let cluster = InMemoryClusterResources::new();
        cluster.create_service(&service("bar", "svc")).await.unwrap();
        let mut svc = cluster.get_service("bar", "svc").await.unwrap().unwrap();

        svc.spec.as_mut().unwrap().cluster_ip = Some("10.0.0.99".to_string());
        assert!(cluster.update_service(&svc).await.is_err());
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let cluster = InMemoryClusterResources::new();
        cluster.create_service(&service("bar", "svc")).await.unwrap();
        assert!(cluster.create_service(&service("bar", "svc")).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_namespace() {
        let cluster = InMemoryClusterResources::new();
        cluster.insert_pvc("bar", "foo");
        cluster.fail_namespace("bar");
        assert!(cluster.get_pvc("bar", "foo").await.is_err());

        cluster.heal_namespace("bar");
        assert!(cluster.get_pvc("bar", "foo").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_gateway_persists_published_endpoint() {
        let volume = SharedVolume {
            id: "1234".to_string(),
            service_name: "baz-service".to_string(),
            pvc_name: "foo".to_string(),
            namespace: "bar".to_string(),
            internal_endpoint: "1.2.3.4:1234".to_string(),
            external_endpoint: String::new(),
        };
        let gateway = InMemoryVolumeGateway::with_volumes(vec![volume]);

        gateway
            .set_external_endpoint("1234", "bar", "10.96.0.1:2049")
            .await
            .unwrap();

        let listed = gateway.list_shared_volumes().await.unwrap();
        assert_eq!(listed[0].external_endpoint, "10.96.0.1:2049");
        assert_eq!(gateway.published().len(), 1);

        gateway.set_fail_listing(true);
        assert!(gateway.list_shared_volumes().await.is_err());
        assert_eq!(gateway.list_calls(), 2);
    }
}
