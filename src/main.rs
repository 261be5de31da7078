//! Shared Volume Operator
//!
//! Keeps a ClusterIP Service in front of every NFS shared volume and
//! publishes its address to the storage control plane.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Shared Volume Operator                       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │ Control Plane│───▶│ Control Loop │───▶│  Reconciler  │       │
//! │  │   Gateway    │    │   (+cache)   │    │ Svc/Endpoints│       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shared_volume_operator::adapters::{
    ControlPlaneConfig, KubernetesClusterResources, KubernetesEventPublisher, RestVolumeGateway,
};
use shared_volume_operator::controller::{SharedVolumeController, SyncConfig};
use shared_volume_operator::domain::reset_channel;
use shared_volume_operator::error::{Error, Result};
use shared_volume_operator::metrics::SyncMetrics;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Shared Volume Operator - stable Service endpoints for NFS shared volumes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Storage control plane REST URL
    #[arg(
        long,
        env = "CONTROL_PLANE_URL",
        default_value = "http://storage-controller.storage.svc.cluster.local:3370"
    )]
    control_plane_url: String,

    /// File holding a bearer token for the control plane
    #[arg(long, env = "CONTROL_PLANE_TOKEN_FILE")]
    control_plane_token_file: Option<PathBuf>,

    /// Control plane request timeout in seconds
    #[arg(long, env = "CONTROL_PLANE_TIMEOUT_SECONDS", default_value = "30")]
    control_plane_timeout_seconds: u64,

    /// Interval between control plane polls in seconds
    #[arg(long, env = "POLL_INTERVAL_SECONDS", default_value = "5")]
    poll_interval_seconds: u64,

    /// How long a synced volume skips verification, in seconds
    #[arg(long, env = "CACHE_TTL_SECONDS", default_value = "60")]
    cache_ttl_seconds: u64,

    /// Interval between readiness checks in milliseconds
    #[arg(long, env = "READINESS_POLL_INTERVAL_MS", default_value = "1000")]
    readiness_poll_interval_ms: u64,

    /// Readiness timeout for created objects in seconds
    #[arg(long, env = "READINESS_TIMEOUT_SECONDS", default_value = "20")]
    readiness_timeout_seconds: u64,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            cache_ttl: Duration::from_secs(self.cache_ttl_seconds),
            readiness_poll_interval: Duration::from_millis(self.readiness_poll_interval_ms),
            readiness_timeout: Duration::from_secs(self.readiness_timeout_seconds),
        }
    }

    fn control_plane_config(&self) -> ControlPlaneConfig {
        ControlPlaneConfig {
            base_url: self.control_plane_url.clone(),
            request_timeout: Duration::from_secs(self.control_plane_timeout_seconds),
            token_file: self.control_plane_token_file.clone(),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    let sync_config = args.sync_config();

    info!("Starting Shared Volume Operator");
    info!("  Control plane URL: {}", args.control_plane_url);
    info!("  Poll interval: {:?}", sync_config.poll_interval);
    info!("  Cache TTL: {:?}", sync_config.cache_ttl);
    info!("  Readiness timeout: {:?}", sync_config.readiness_timeout);

    // Create Kubernetes client
    let client = Client::try_default().await.map_err(|e| {
        error!("Failed to create Kubernetes client: {}", e);
        Error::Internal(format!("Kubernetes client creation failed: {}", e))
    })?;

    info!("Connected to Kubernetes cluster");

    let registry = Arc::new(Registry::new());
    let metrics = SyncMetrics::new(&registry)?;

    let cancel = CancellationToken::new();

    // Control plane gateway and its reset listener
    let gateway = Arc::new(RestVolumeGateway::new(args.control_plane_config())?);
    let (reset, reset_listener) = reset_channel();
    {
        let gateway = gateway.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            gateway.run_reset_listener(reset_listener, cancel).await;
        });
    }

    let instance = std::env::var("POD_NAME").ok();
    let controller = SharedVolumeController::new(
        sync_config,
        gateway,
        Arc::new(KubernetesClusterResources::new(client.clone())),
        Arc::new(KubernetesEventPublisher::new(client, instance)),
        metrics,
        reset,
    );

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::spawn(shutdown_on_signal(cancel.clone()));

    // Run the control loop
    info!("Starting shared volume control loop");
    controller.run(cancel).await?;

    info!("Operator shutdown complete");
    Ok(())
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received SIGINT");
    }

    cancel.cancel();
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |s: &str| {
        s.parse::<tracing_subscriber::filter::Directive>()
            .map_err(|e| Error::Config(format!("Invalid log directive {}: {}", s, e)))
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("kube=info")?)
        .add_directive(directive("tower=warn")?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// Health Server
// =============================================================================

type HttpResponse = hyper::Response<http_body_util::Full<hyper::body::Bytes>>;

fn text_response(status: hyper::StatusCode, body: &'static str) -> HttpResponse {
    let mut response = hyper::Response::new(http_body_util::Full::new(hyper::body::Bytes::from(body)));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn health_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<HttpResponse, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
            _ => text_response(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid health server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind health server: {}", e)))?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Health server accept error: {}", e)))?;

        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(health_handler))
                .await
            {
                tracing::error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: Arc<Registry>) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    fn metrics_response(registry: &Registry) -> HttpResponse {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
            error!("Failed to encode metrics: {}", e);
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed");
        }

        let mut response = Response::new(Full::new(Bytes::from(buffer)));
        if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        response
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid metrics server address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Internal(format!("Metrics server accept error: {}", e)))?;

        let io = TokioIo::new(stream);
        let registry = registry.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let registry = registry.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => metrics_response(&registry),
                        _ => text_response(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
