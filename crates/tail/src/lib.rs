//! manifest-tail orchestration: periodic full refresh of every configured rule and long-running
//! watch subscriptions feeding the same filter/persist/report pipeline.

#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use mtail_core::{namespace::ExcludeSet, Config, Diff, TailError};
use mtail_kubehub::{ClusterApi, Fetcher};
use tokio::time::Instant;
use tracing::{debug, info};

pub mod metrics;
pub mod processor;
pub mod report;
mod watch;

pub use self::metrics::{FacadeMetrics, MetricsRecorder};
pub use processor::Processor;
pub use report::{DetailedDiffReport, DiffLogger, DiffSink};
pub use watch::WatchExit;

/// Shared handle over the cluster, configuration and processing pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Tail {
    api: Arc<dyn ClusterApi>,
    config: Arc<Config>,
    fetcher: Arc<Fetcher>,
    exclude: Arc<ExcludeSet>,
    processor: Arc<Processor>,
    sink: Arc<dyn DiffSink>,
    metrics: Option<Arc<dyn MetricsRecorder>>,
}

impl Tail {
    pub fn new(api: Arc<dyn ClusterApi>, config: Config, processor: Processor, sink: Arc<dyn DiffSink>) -> Self {
        let fetcher = Fetcher::new(api.clone(), &config);
        let exclude = ExcludeSet::new(&config.exclude_namespaces);
        Self {
            api,
            config: Arc::new(config),
            fetcher: Arc::new(fetcher),
            exclude: Arc::new(exclude),
            processor: Arc::new(processor),
            sink,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &Config { &self.config }

    /// List every rule once and push each object through the pipeline. Returns the number of
    /// objects seen. All list calls share one deadline `timeout` from now; the first error aborts.
    pub async fn run_full_manifest_check(&self, timeout: Duration) -> Result<usize, TailError> {
        let deadline = Instant::now() + timeout;
        let mut total = 0usize;
        for rule in &self.config.objects {
            let items = self.fetcher.fetch(rule, deadline).await?;
            total += items.len();
            let mut changed = 0usize;
            for doc in items {
                if let Some(diff) = self.processor.process(rule, doc)? {
                    changed += 1;
                    self.emit(&diff);
                }
            }
            debug!(kind = %rule.kind, changed, "rule refreshed");
        }
        if let Some(m) = &self.metrics {
            m.record_full_run(total);
        }
        info!(total, "full manifest check complete");
        Ok(total)
    }

    fn emit(&self, diff: &Diff) {
        self.sink.log(diff);
        if let Some(m) = &self.metrics {
            match diff {
                Diff::Created { .. } => m.record_manifest_added(),
                Diff::Modified { .. } => m.record_manifest_changed(),
                Diff::Deleted { .. } => m.record_manifest_removed(),
            }
        }
    }
}
