//! Error types for the Shared Volume Operator

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Shared Volume Operator
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Storage Control Plane Errors
    // =========================================================================
    /// Control plane connection error
    #[error("Control plane connection error: {0}")]
    ControlPlaneConnection(#[source] reqwest::Error),

    /// Control plane rejected a request
    #[error("Control plane request failed: {0}")]
    ControlPlaneRequest(String),

    /// Control plane response parse error
    #[error("Failed to parse control plane response: {0}")]
    ControlPlaneResponseParse(String),

    // =========================================================================
    // Reconciliation Errors
    // =========================================================================
    /// Malformed `host:port` endpoint
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// A companion object never reported readiness
    #[error("{kind} {namespace}/{name} not ready after {timeout:?}")]
    ReadinessTimeout {
        kind: &'static str,
        namespace: String,
        name: String,
        timeout: Duration,
    },

    /// Operation interrupted by shutdown
    #[error("Operation cancelled")]
    Cancelled,

    // =========================================================================
    // Process Errors
    // =========================================================================
    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build an [`Error::InvalidEndpoint`].
    pub fn invalid_endpoint(endpoint: &str, reason: impl Into<String>) -> Self {
        Error::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if this is a Kubernetes "not found" response.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }
}
