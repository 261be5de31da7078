//! Control loop metrics.
//!
//! All collectors are registered on a registry handed in by the caller, so
//! tests can build as many independent instances as they like.

use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::error::Result;

/// Result label values for `sharedvolume_reconcile_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    Synced,
    CacheHit,
    PvcMissing,
    Failed,
}

impl ReconcileResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileResult::Synced => "synced",
            ReconcileResult::CacheHit => "cache_hit",
            ReconcileResult::PvcMissing => "pvc_missing",
            ReconcileResult::Failed => "failed",
        }
    }
}

/// Metrics recorded by the shared volume control loop
#[derive(Clone)]
pub struct SyncMetrics {
    pass_duration: Histogram,
    reconcile_total: IntCounterVec,
    publish_total: IntCounter,
    list_failures: IntCounter,
    cached_volumes: IntGauge,
}

impl std::fmt::Debug for SyncMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMetrics")
            .field("passes", &self.pass_count())
            .field("published", &self.publish_count())
            .finish()
    }
}

impl SyncMetrics {
    /// Create the collectors and register them on `registry`.
    pub fn new(registry: &Registry) -> Result<Self> {
        let pass_duration = Histogram::with_opts(
            HistogramOpts::new(
                "sharedvolume_sync_pass_duration_seconds",
                "Wall-clock duration of one full shared volume sync pass",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        )?;
        let reconcile_total = IntCounterVec::new(
            Opts::new(
                "sharedvolume_reconcile_total",
                "Shared volume reconcile attempts by result",
            ),
            &["result"],
        )?;
        let publish_total = IntCounter::new(
            "sharedvolume_endpoint_publish_total",
            "External endpoints published to the storage control plane",
        )?;
        let list_failures = IntCounter::new(
            "sharedvolume_list_failures_total",
            "Failed attempts to list shared volumes",
        )?;
        let cached_volumes = IntGauge::new(
            "sharedvolume_cached_volumes",
            "Volumes currently held in the change-detection cache",
        )?;

        registry.register(Box::new(pass_duration.clone()))?;
        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(publish_total.clone()))?;
        registry.register(Box::new(list_failures.clone()))?;
        registry.register(Box::new(cached_volumes.clone()))?;

        Ok(Self {
            pass_duration,
            reconcile_total,
            publish_total,
            list_failures,
            cached_volumes,
        })
    }

    pub fn observe_pass(&self, duration: Duration) {
        self.pass_duration.observe(duration.as_secs_f64());
    }

    pub fn record_reconcile(&self, result: ReconcileResult) {
        self.reconcile_total
            .with_label_values(&[result.as_str()])
            .inc();
    }

    pub fn record_publish(&self) {
        self.publish_total.inc();
    }

    pub fn record_list_failure(&self) {
        self.list_failures.inc();
    }

    pub fn set_cached_volumes(&self, count: usize) {
        self.cached_volumes.set(count as i64);
    }

    pub fn reconcile_count(&self, result: ReconcileResult) -> u64 {
        self.reconcile_total
            .with_label_values(&[result.as_str()])
            .get()
    }

    pub fn publish_count(&self) -> u64 {
        self.publish_total.get()
    }

    pub fn list_failure_count(&self) -> u64 {
        self.list_failures.get()
    }

    pub fn pass_count(&self) -> u64 {
        self.pass_duration.get_sample_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_on_given_registry() {
        let registry = Registry::new();
        let metrics = SyncMetrics::new(&registry).unwrap();

        metrics.record_reconcile(ReconcileResult::Synced);
        metrics.record_reconcile(ReconcileResult::Synced);
        metrics.record_reconcile(ReconcileResult::CacheHit);
        metrics.record_publish();
        metrics.observe_pass(Duration::from_millis(120));
        metrics.set_cached_volumes(3);

        assert_eq!(metrics.reconcile_count(ReconcileResult::Synced), 2);
        assert_eq!(metrics.reconcile_count(ReconcileResult::CacheHit), 1);
        assert_eq!(metrics.reconcile_count(ReconcileResult::Failed), 0);
        assert_eq!(metrics.publish_count(), 1);
        assert_eq!(metrics.pass_count(), 1);

        let text = prometheus::TextEncoder::new()
            .encode_to_string(&registry.gather())
            .unwrap();
        assert!(text.contains("sharedvolume_sync_pass_duration_seconds_count 1"));
        assert!(text.contains("sharedvolume_cached_volumes 3"));
        assert!(text.contains("sharedvolume_reconcile_total{result=\"synced\"} 2"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        SyncMetrics::new(&registry).unwrap();

        assert!(SyncMetrics::new(&registry).is_err());
    }

    #[test]
    fn test_independent_registries() {
        let a = SyncMetrics::new(&Registry::new()).unwrap();
        let b = SyncMetrics::new(&Registry::new()).unwrap();

        a.record_list_failure();
        assert_eq!(a.list_failure_count(), 1);
        assert_eq!(b.list_failure_count(), 0);
    }

    #[test]
    fn test_result_labels() {
        assert_eq!(ReconcileResult::PvcMissing.as_str(), "pvc_missing");
        assert_eq!(ReconcileResult::Failed.as_str(), "failed");
    }
}
