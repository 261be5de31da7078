//! Shared Volume Control Loop
//!
//! ```text
//!   Idle ─▶ Polling ─▶ Reconciling (one volume at a time) ─▶ Sleeping ─┐
//!              ▲                                                        │
//!              └────────────────────────────────────────────────────────┘
//!   cancellation ─▶ Cancelled
//! ```
//!
//! One instance runs per process. Volumes are handled strictly in sequence;
//! a failing volume is logged and retried on the next pass without
//! touching its cache entry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::cache::VolumeCache;
use super::reconciler::{EnsureOutcome, Reconciler};
use super::SyncConfig;
use crate::domain::{ClusterResources, EventPublisher, GatewayReset, SharedVolume, VolumeGateway};
use crate::error::Result;
use crate::metrics::{ReconcileResult, SyncMetrics};

/// States of the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopState {
    /// Constructed, not started
    Idle,
    /// Listing shared volumes from the control plane
    Polling,
    /// Running the reconciler over the listed volumes
    Reconciling,
    /// Waiting for the next pass
    Sleeping,
    /// Stopped by cancellation
    Cancelled,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => write!(f, "Idle"),
            LoopState::Polling => write!(f, "Polling"),
            LoopState::Reconciling => write!(f, "Reconciling"),
            LoopState::Sleeping => write!(f, "Sleeping"),
            LoopState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Result of one pass over the control plane listing
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassSummary {
    pub listed: usize,
    pub synced: usize,
    pub cache_hits: usize,
    pub pvc_missing: usize,
    pub failed: usize,
    pub published: usize,
    pub list_failed: bool,
    pub duration: Duration,
}

impl PassSummary {
    fn tally(&mut self, result: ReconcileResult) {
        match result {
            ReconcileResult::Synced => self.synced += 1,
            ReconcileResult::CacheHit => self.cache_hits += 1,
            ReconcileResult::PvcMissing => self.pvc_missing += 1,
            ReconcileResult::Failed => self.failed += 1,
        }
    }
}

/// Polls the control plane and keeps every shared volume's companion
/// objects and published endpoint in sync.
pub struct SharedVolumeController {
    config: SyncConfig,
    gateway: Arc<dyn VolumeGateway>,
    reconciler: Reconciler,
    cache: VolumeCache,
    metrics: SyncMetrics,
    reset: GatewayReset,
    state: RwLock<LoopState>,
}

impl std::fmt::Debug for SharedVolumeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedVolumeController")
            .field("config", &self.config)
            .field("state", &*self.state.read())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl SharedVolumeController {
    /// Create a new controller
    pub fn new(
        config: SyncConfig,
        gateway: Arc<dyn VolumeGateway>,
        cluster: Arc<dyn ClusterResources>,
        events: Arc<dyn EventPublisher>,
        metrics: SyncMetrics,
        reset: GatewayReset,
    ) -> Arc<Self> {
        let reconciler = Reconciler::new(config.clone(), cluster, gateway.clone(), events);

        Arc::new(Self {
            config,
            gateway,
            reconciler,
            cache: VolumeCache::new(),
            metrics,
            reset,
            state: RwLock::new(LoopState::Idle),
        })
    }

    pub fn state(&self) -> LoopState {
        *self.state.read()
    }

    /// Read access to the change-detection cache.
    pub fn cache(&self) -> &VolumeCache {
        &self.cache
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    fn set_state(&self, state: LoopState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!("Control loop {} -> {}", previous, state);
        }
    }

    /// Run passes until `cancel` fires.
    ///
    /// Cancellation while sleeping ends the loop cleanly. A pass in progress
    /// finishes the volume it is working on and skips the rest.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("Starting shared volume control loop with {:?}", self.config);

        while !cancel.is_cancelled() {
            let summary = self.sync_pass(&cancel).await;
            info!(
                listed = summary.listed,
                synced = summary.synced,
                cache_hits = summary.cache_hits,
                pvc_missing = summary.pvc_missing,
                failed = summary.failed,
                published = summary.published,
                duration_ms = summary.duration.as_millis() as u64,
                "Shared volume pass complete"
            );

            self.set_state(LoopState::Sleeping);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.config.poll_interval) => {}
            }
        }

        self.set_state(LoopState::Cancelled);
        info!("Shared volume control loop stopped");
        Ok(())
    }

    /// Execute one full pass: list, reconcile each volume, purge the cache.
    #[instrument(skip(self, cancel))]
    pub async fn sync_pass(&self, cancel: &CancellationToken) -> PassSummary {
        let started = Instant::now();
        let mut summary = PassSummary::default();

        self.set_state(LoopState::Polling);
        let volumes = match self.list_volumes(cancel).await {
            Ok(volumes) => volumes,
            Err(e) => {
                error!("Failed to list shared volumes: {}", e);
                self.metrics.record_list_failure();
                summary.list_failed = true;
                if self.reset.request() {
                    info!("Requested control plane client reset");
                } else {
                    debug!("Control plane client reset already pending");
                }
                Vec::new()
            }
        };
        summary.listed = volumes.len();

        self.set_state(LoopState::Reconciling);
        for volume in volumes {
            if cancel.is_cancelled() {
                info!("Shutdown requested, skipping remaining shared volumes");
                break;
            }

            let (result, published) = self.sync_volume(volume, cancel).await;
            self.metrics.record_reconcile(result);
            if published {
                self.metrics.record_publish();
                summary.published += 1;
            }
            summary.tally(result);
        }

        let purged = self.cache.purge_expired();
        if purged > 0 {
            debug!(purged, "Dropped expired cache entries");
        }
        self.metrics.set_cached_volumes(self.cache.len());

        summary.duration = started.elapsed();
        self.metrics.observe_pass(summary.duration);
        summary
    }

    async fn list_volumes(&self, cancel: &CancellationToken) -> Result<Vec<SharedVolume>> {
        tokio::select! {
            _ = cancel.cancelled() => Ok(Vec::new()),
            volumes = self.gateway.list_shared_volumes() => volumes,
        }
    }

    async fn sync_volume(
        &self,
        volume: SharedVolume,
        cancel: &CancellationToken,
    ) -> (ReconcileResult, bool) {
        if self.cache.is_unchanged(&volume) {
            debug!(volume = %volume.id, "Unchanged since last sync, skipping verification");
            return (ReconcileResult::CacheHit, false);
        }

        let mut volume = volume;
        match self.reconciler.ensure(&mut volume, cancel).await {
            Ok(EnsureOutcome::Synced { published }) => {
                let id = volume.id.clone();
                self.cache.set(&id, volume, self.config.cache_ttl);
                (ReconcileResult::Synced, published)
            }
            Ok(EnsureOutcome::PvcMissing) => (ReconcileResult::PvcMissing, false),
            Err(e) => {
                warn!(
                    volume = %volume.id,
                    service = %volume.display_name(),
                    "Failed to reconcile shared volume: {}",
                    e
                );
                (ReconcileResult::Failed, false)
            }
        }
    }
}
