//! Diff reporting through tracing.

use mtail_core::{Action, Diff, Document, DocumentExt, LogDiffMode};
use mtail_manifest::MinimalDiff;
use serde::Serialize;
use tracing::{info, warn};

/// Receives every change the pipeline produces.
pub trait DiffSink: Send + Sync {
    fn log(&self, diff: &Diff);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffLogger {
    #[default]
    Disabled,
    /// One line per change: `Object modified: Deployment prod/web`.
    Compact,
    /// One JSON line per change with the minimal before/after delta.
    Detailed,
}

impl From<LogDiffMode> for DiffLogger {
    fn from(mode: LogDiffMode) -> Self {
        match mode {
            LogDiffMode::Disabled => DiffLogger::Disabled,
            LogDiffMode::Compact => DiffLogger::Compact,
            LogDiffMode::Detailed => DiffLogger::Detailed,
        }
    }
}

impl DiffSink for DiffLogger {
    fn log(&self, diff: &Diff) {
        let line = match self {
            DiffLogger::Disabled => return,
            DiffLogger::Compact => render_compact(diff),
            DiffLogger::Detailed => match render_detailed(diff) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "encoding detailed diff failed");
                    return;
                }
            },
        };
        let subject = diff.subject();
        info!(
            target: "mtail::diff",
            action = diff.action().as_str(),
            k8s.kind = subject.object_kind(),
            k8s.object.name = subject.object_name(),
            k8s.namespace.name = subject.object_namespace().unwrap_or(""),
            "{}",
            line
        );
    }
}

pub fn render_compact(diff: &Diff) -> String {
    let subject = diff.subject();
    match subject.object_namespace() {
        Some(ns) => format!("Object {}: {} {}/{}", diff.action(), subject.object_kind(), ns, subject.object_name()),
        None => format!("Object {}: {} {}", diff.action(), subject.object_kind(), subject.object_name()),
    }
}

/// Payload of a detailed diff line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedDiffReport {
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<Document>,
}

impl DetailedDiffReport {
    /// Creations and deletions carry identity only; modifications carry the minimal delta.
    pub fn from_diff(diff: &Diff) -> Self {
        let subject = diff.subject();
        let (previous, current) = match diff {
            Diff::Modified { .. } => diff.minimal_difference(),
            _ => (None, None),
        };
        Self {
            kind: subject.object_kind().to_string(),
            name: subject.object_name().to_string(),
            namespace: subject.object_namespace().map(str::to_string),
            action: diff.action(),
            previous,
            current,
        }
    }
}

pub fn render_detailed(diff: &Diff) -> serde_json::Result<String> {
    serde_json::to_string(&DetailedDiffReport::from_diff(diff))
}
