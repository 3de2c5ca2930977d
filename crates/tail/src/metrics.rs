use metrics::counter;

/// Hooks fired as manifests are discovered, changed and removed.
pub trait MetricsRecorder: Send + Sync {
    /// A full refresh finished and saw `count` objects.
    fn record_full_run(&self, count: usize);
    fn record_manifest_added(&self);
    fn record_manifest_changed(&self);
    fn record_manifest_removed(&self);
}

/// Routes the hooks to the `metrics` facade; whichever exporter the binary installs receives them.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeMetrics;

impl MetricsRecorder for FacadeMetrics {
    fn record_full_run(&self, count: usize) {
        counter!("manifests_total", count as u64);
        counter!("full_runs_total", 1u64);
    }

    fn record_manifest_added(&self) { counter!("manifests_added_total", 1u64); }

    fn record_manifest_changed(&self) { counter!("manifests_changed_total", 1u64); }

    fn record_manifest_removed(&self) { counter!("manifests_removed_total", 1u64); }
}
