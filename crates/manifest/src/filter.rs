use mtail_core::{Document, DocumentExt};
use serde_json::Value as Json;

/// Replacement written over literal container env values.
pub const REDACTED_VALUE: &str = "<Redacted>";

const SERVER_METADATA: &[&str] = &["managedFields", "resourceVersion", "uid", "selfLink", "generation", "creationTimestamp"];

/// A document transformation. Each one is idempotent and a no-op when its subtree is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Drop the top-level `status` object.
    StripStatus,
    /// Drop server-populated metadata that changes without user intent.
    StripServerMetadata,
    /// Replace literal env values in workload pod templates.
    RedactEnvValues,
}

impl Filter {
    pub fn apply(self, mut doc: Document) -> Document {
        match self {
            Filter::StripStatus => {
                if let Some(obj) = doc.as_object_mut() {
                    obj.remove("status");
                }
            }
            Filter::StripServerMetadata => {
                if let Some(meta) = doc.get_mut("metadata").and_then(Json::as_object_mut) {
                    for key in SERVER_METADATA {
                        meta.remove(*key);
                    }
                }
            }
            Filter::RedactEnvValues => {
                if let Some(path) = pod_spec_path(doc.object_kind()) {
                    if let Some(spec) = lookup_mut(&mut doc, path) {
                        redact_pod_spec(spec);
                    }
                }
            }
        }
        doc
    }
}

/// Where the pod spec lives for kinds that embed one.
fn pod_spec_path(kind: &str) -> Option<&'static [&'static str]> {
    match kind {
        "Pod" => Some(&["spec"]),
        "Deployment" | "ReplicaSet" | "StatefulSet" | "DaemonSet" | "Job" => Some(&["spec", "template", "spec"]),
        "CronJob" => Some(&["spec", "jobTemplate", "spec", "template", "spec"]),
        _ => None,
    }
}

fn lookup_mut<'a>(doc: &'a mut Json, path: &[&str]) -> Option<&'a mut Json> {
    path.iter().try_fold(doc, |cur, key| cur.get_mut(*key))
}

fn redact_pod_spec(spec: &mut Json) {
    for list in ["containers", "initContainers"] {
        let Some(containers) = spec.get_mut(list).and_then(Json::as_array_mut) else { continue };
        for env in containers.iter_mut().filter_map(|c| c.get_mut("env")).filter_map(Json::as_array_mut) {
            for entry in env.iter_mut().filter_map(Json::as_object_mut) {
                if entry.contains_key("valueFrom") {
                    continue;
                }
                if let Some(value) = entry.get_mut("value") {
                    *value = Json::String(REDACTED_VALUE.to_string());
                }
            }
        }
    }
}

/// Ordered list of filters applied to every document before it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new(filters: Vec<Filter>) -> Self { Self { filters } }

    /// Status, server metadata, then env redaction.
    pub fn standard() -> Self {
        Self::new(vec![Filter::StripStatus, Filter::StripServerMetadata, Filter::RedactEnvValues])
    }

    pub fn filters(&self) -> &[Filter] { &self.filters }

    pub fn apply(&self, doc: Document) -> Document {
        self.filters.iter().fold(doc, |doc, f| f.apply(doc))
    }
}

impl Default for FilterChain {
    fn default() -> Self { Self::standard() }
}
