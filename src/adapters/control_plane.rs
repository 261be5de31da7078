//! Storage Control Plane Adapter
//!
//! Implements the `VolumeGateway` port against the control plane's REST API.
//! Volumes are resource definitions carrying a flat property map; see
//! [`crate::domain::volume`] for the properties that matter here.
//!
//! The HTTP client (connection pool and bearer token) is rebuilt whenever
//! the control loop signals a reset through [`ResetListener`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::volume::PROP_EXTERNAL_ENDPOINT;
use crate::domain::{classify, Classification, ResetListener, SharedVolume, VolumeGateway};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the control plane client
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    /// Base URL, e.g. `http://storage-controller.storage.svc:3370`
    pub base_url: String,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// File holding a bearer token, re-read on every reset
    pub token_file: Option<PathBuf>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: "http://storage-controller.storage.svc.cluster.local:3370".to_string(),
            request_timeout: Duration::from_secs(30),
            token_file: None,
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ResourceDefinition {
    name: String,
    #[serde(default)]
    props: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct ResourceDefinitionModify<'a> {
    override_props: BTreeMap<&'a str, &'a str>,
}

// =============================================================================
// Gateway
// =============================================================================

/// REST client for the storage control plane
pub struct RestVolumeGateway {
    config: ControlPlaneConfig,
    client: RwLock<Client>,
}

impl std::fmt::Debug for RestVolumeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestVolumeGateway")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl RestVolumeGateway {
    /// Create a new gateway
    pub fn new(config: ControlPlaneConfig) -> Result<Self> {
        let client = Self::build_client(&config)?;
        Ok(Self {
            config,
            client: RwLock::new(client),
        })
    }

    fn build_client(config: &ControlPlaneConfig) -> Result<Client> {
        let mut headers = HeaderMap::new();
        if let Some(path) = &config.token_file {
            let token = std::fs::read_to_string(path)?;
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|e| Error::Config(format!("Invalid token in {}: {}", path.display(), e)))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))
    }

    /// Drop pooled connections and re-read credentials.
    pub fn reset(&self) -> Result<()> {
        let client = Self::build_client(&self.config)?;
        *self.client.write() = client;
        Ok(())
    }

    /// Serve reset requests until cancelled or every sender is gone.
    pub async fn run_reset_listener(&self, mut listener: ResetListener, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                request = listener.recv() => {
                    if request.is_none() {
                        break;
                    }
                    match self.reset() {
                        Ok(()) => info!("Control plane client reset"),
                        Err(e) => error!("Failed to reset control plane client: {}", e),
                    }
                }
            }
        }
        debug!("Control plane reset listener stopped");
    }

    fn client(&self) -> Client {
        self.client.read().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::ControlPlaneRequest(format!("{}: {}", status, body.trim())))
    }
}

/// Keep the shared, Kubernetes-provisioned volumes of a listing.
fn shared_volumes(definitions: Vec<ResourceDefinition>) -> Vec<SharedVolume> {
    definitions
        .into_iter()
        .filter_map(|rd| match classify(&rd.name, &rd.props) {
            Classification::Shared(volume) => Some(volume),
            other => {
                debug!(volume = %rd.name, "Skipping volume: {}", other);
                None
            }
        })
        .collect()
}

#[async_trait]
impl VolumeGateway for RestVolumeGateway {
    #[instrument(skip(self))]
    async fn list_shared_volumes(&self) -> Result<Vec<SharedVolume>> {
        let response = self
            .client()
            .get(self.url("v1/resource-definitions"))
            .send()
            .await
            .map_err(Error::ControlPlaneConnection)?;

        let definitions: Vec<ResourceDefinition> = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::ControlPlaneResponseParse(e.to_string()))?;

        let total = definitions.len();
        let volumes = shared_volumes(definitions);
        debug!(total, shared = volumes.len(), "Listed resource definitions");
        Ok(volumes)
    }

    #[instrument(skip(self))]
    async fn set_external_endpoint(&self, id: &str, namespace: &str, endpoint: &str) -> Result<()> {
        let body = ResourceDefinitionModify {
            override_props: BTreeMap::from([(PROP_EXTERNAL_ENDPOINT, endpoint)]),
        };
        let path = format!("v1/resource-definitions/{}", urlencoding::encode(id));

        let response = self
            .client()
            .put(self.url(&path))
            .json(&body)
            .send()
            .await
            .map_err(Error::ControlPlaneConnection)?;

        if let Err(e) = Self::check_status(response).await {
            warn!("Control plane rejected external endpoint: {}", e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::volume::{
        PROP_INTERNAL_ENDPOINT, PROP_PVC_NAME, PROP_PVC_NAMESPACE, PROP_PV_NAME,
    };

    #[test]
    fn test_control_plane_config_default() {
        let config = ControlPlaneConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.token_file.is_none());
    }

    #[test]
    fn test_url_joining() {
        let gateway = RestVolumeGateway::new(ControlPlaneConfig {
            base_url: "http://cp:3370/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            gateway.url("v1/resource-definitions"),
            "http://cp:3370/v1/resource-definitions"
        );
    }

    #[test]
    fn test_listing_filters_unshared() {
        let json = format!(
            r#"[
                {{"name": "pvc-a", "props": {{
                    "{ie}": "10.0.0.7:1234",
                    "{pv}": "pvc-a", "{pvc}": "data", "{ns}": "apps"
                }}}},
                {{"name": "pvc-b", "props": {{ "{pv}": "pvc-b", "{pvc}": "logs", "{ns}": "apps" }}}},
                {{"name": "plain"}}
            ]"#,
            ie = PROP_INTERNAL_ENDPOINT,
            pv = PROP_PV_NAME,
            pvc = PROP_PVC_NAME,
            ns = PROP_PVC_NAMESPACE,
        );

        let definitions: Vec<ResourceDefinition> = serde_json::from_str(&json).unwrap();
        let volumes = shared_volumes(definitions);

        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].id, "pvc-a");
        assert_eq!(volumes[0].pvc_name, "data");
    }

    #[test]
    fn test_modify_body() {
        let body = ResourceDefinitionModify {
            override_props: BTreeMap::from([(PROP_EXTERNAL_ENDPOINT, "10.96.0.20:2049")]),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json["override_props"][PROP_EXTERNAL_ENDPOINT],
            "10.96.0.20:2049"
        );
    }

    #[test]
    fn test_missing_token_file_is_error() {
        let result = RestVolumeGateway::new(ControlPlaneConfig {
            token_file: Some(PathBuf::from("/nonexistent/token")),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_reset_listener_stops_on_cancel() {
        let gateway = RestVolumeGateway::new(ControlPlaneConfig::default()).unwrap();
        let (reset, listener) = crate::domain::reset_channel();
        let cancel = CancellationToken::new();

        assert!(reset.request());
        cancel.cancel();
        gateway.run_reset_listener(listener, cancel).await;
    }
}
