use std::sync::Arc;

use mtail_core::{Config, Diff, Document, DocumentExt, Rule, TailError};
use mtail_manifest::FilterChain;
use mtail_persist::{FileStore, Store};
use tracing::info;

/// Filters, optional manifest logging, then persistence. Built once and shared by every task.
pub struct Processor {
    filters: FilterChain,
    store: Arc<dyn Store>,
    log_manifests: bool,
}

impl Processor {
    pub fn new(filters: FilterChain, store: Arc<dyn Store>, log_manifests: bool) -> Self {
        Self { filters, store, log_manifests }
    }

    /// Standard filter chain writing into the configured output tree.
    pub fn from_config(config: &Config) -> Result<Self, TailError> {
        let store = FileStore::new(&config.output)?;
        Ok(Self::new(FilterChain::standard(), Arc::new(store), config.logging.log_manifests))
    }

    /// Filter and persist one object; `Some(diff)` when the stored manifest changed.
    pub fn process(&self, rule: &Rule, doc: Document) -> Result<Option<Diff>, TailError> {
        let doc = self.filters.apply(doc);
        if self.log_manifests {
            log_manifest(&doc);
        }
        self.store.write(rule, &doc).map_err(|e| with_identity("process", &doc, e))
    }

    /// Filter and remove one object; returns the filtered document for reporting.
    pub fn delete(&self, rule: &Rule, doc: Document) -> Result<Document, TailError> {
        let doc = self.filters.apply(doc);
        self.store.delete(rule, &doc).map_err(|e| with_identity("delete", &doc, e))?;
        Ok(doc)
    }
}

fn with_identity(op: &'static str, doc: &Document, source: TailError) -> TailError {
    TailError::Process {
        op,
        kind: doc.object_kind().to_string(),
        namespace: doc.object_namespace().unwrap_or("cluster").to_string(),
        name: doc.object_name().to_string(),
        source: Box::new(source),
    }
}

fn log_manifest(doc: &Document) {
    let body = doc.to_string();
    info!(
        target: "mtail::manifest",
        action = "manifest",
        k8s.kind = doc.object_kind(),
        k8s.object.name = doc.object_name(),
        k8s.namespace.name = doc.object_namespace().unwrap_or(""),
        "{}",
        body
    );
}
