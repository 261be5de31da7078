//! Kubernetes Cluster Resources Adapter
//!
//! Implements the `ClusterResources` port with typed `kube::Api` handles.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, PersistentVolumeClaim, Service};
use kube::api::{Api, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::domain::ClusterResources;
use crate::error::{Error, Result};

/// Field manager recorded on objects this operator writes.
pub const FIELD_MANAGER: &str = "shared-volume-operator";

/// Kubernetes-backed cluster resources adapter.
#[derive(Clone)]
pub struct KubernetesClusterResources {
    client: Client,
}

impl KubernetesClusterResources {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }

    fn namespace_of<K: ResourceExt>(obj: &K) -> Result<String> {
        obj.namespace().ok_or_else(|| {
            Error::Internal(format!("{} has no namespace", obj.name_any()))
        })
    }

    async fn get_opt<K>(&self, namespace: &str, name: &str) -> Result<Option<K>>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as Resource>::DynamicType: Default,
    {
        let found = self.api::<K>(namespace).get_opt(name).await?;
        if found.is_none() {
            debug!(namespace, name, "Object not found");
        }
        Ok(found)
    }
}

impl std::fmt::Debug for KubernetesClusterResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesClusterResources").finish()
    }
}

#[async_trait]
impl ClusterResources for KubernetesClusterResources {
    #[instrument(skip(self))]
    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        self.get_opt(namespace, name).await
    }

    #[instrument(skip(self))]
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        self.get_opt(namespace, name).await
    }

    #[instrument(skip(self, service), fields(name = %service.name_any()))]
    async fn create_service(&self, service: &Service) -> Result<Service> {
        let namespace = Self::namespace_of(service)?;
        let created = self
            .api::<Service>(&namespace)
            .create(&Self::post_params(), service)
            .await?;
        Ok(created)
    }

    #[instrument(skip(self, service), fields(name = %service.name_any()))]
    async fn update_service(&self, service: &Service) -> Result<Service> {
        let namespace = Self::namespace_of(service)?;
        let updated = self
            .api::<Service>(&namespace)
            .replace(&service.name_any(), &Self::post_params(), service)
            .await?;
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>> {
        self.get_opt(namespace, name).await
    }

    #[instrument(skip(self, endpoints), fields(name = %endpoints.name_any()))]
    async fn create_endpoints(&self, endpoints: &Endpoints) -> Result<Endpoints> {
        let namespace = Self::namespace_of(endpoints)?;
        let created = self
            .api::<Endpoints>(&namespace)
            .create(&Self::post_params(), endpoints)
            .await?;
        Ok(created)
    }

    #[instrument(skip(self, endpoints), fields(name = %endpoints.name_any()))]
    async fn update_endpoints(&self, endpoints: &Endpoints) -> Result<Endpoints> {
        let namespace = Self::namespace_of(endpoints)?;
        let updated = self
            .api::<Endpoints>(&namespace)
            .replace(&endpoints.name_any(), &Self::post_params(), endpoints)
            .await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_post_params_field_manager() {
        let params = KubernetesClusterResources::post_params();
        assert_eq!(params.field_manager.as_deref(), Some("shared-volume-operator"));
        assert!(!params.dry_run);
    }

    #[test]
    fn test_namespace_required() {
        let mut svc = Service {
            metadata: ObjectMeta {
                name: Some("baz-service".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(KubernetesClusterResources::namespace_of(&svc).is_err());

        svc.metadata.namespace = Some("bar".to_string());
        assert_eq!(KubernetesClusterResources::namespace_of(&svc).unwrap(), "bar");
    }
}
