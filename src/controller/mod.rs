//! Controller module
//!
//! The shared volume control loop, its change-detection cache and the
//! per-volume resource reconciler.

pub mod cache;
pub mod reconciler;
mod shared_volume;

use std::time::Duration;

pub use cache::{CacheStats, VolumeCache};
pub use reconciler::{EnsureOutcome, Reconciler, NFS_PORT, NFS_PORT_NAME, SHARED_VOLUME_ID_LABEL};
pub use shared_volume::{LoopState, PassSummary, SharedVolumeController};

/// Configuration for the shared volume control loop
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between control plane polls
    pub poll_interval: Duration,

    /// How long a synced snapshot short-circuits verification
    pub cache_ttl: Duration,

    /// Interval between readiness checks of freshly created objects
    pub readiness_poll_interval: Duration,

    /// Give up waiting for readiness after this long
    pub readiness_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(60),
            readiness_poll_interval: Duration::from_secs(1),
            readiness_timeout: Duration::from_secs(20),
        }
    }
}
