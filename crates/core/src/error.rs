use std::path::PathBuf;

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by resolution, listing, watching, filtering and persistence.
#[derive(Debug, Error)]
pub enum TailError {
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed apiVersion or a kind the cluster does not serve. Never retried.
    #[error("resolve resource for {kind} ({api_version}): {reason}")]
    Resolution { api_version: String, kind: String, reason: String },

    #[error("list {kind} {scope}: {source}")]
    Fetch {
        kind: String,
        scope: String,
        #[source]
        source: BoxError,
    },

    #[error("watch {kind} {scope}: {message}")]
    Watch { kind: String, scope: String, message: String },

    #[error("filter {kind} by name: {reason}")]
    Filter { kind: String, reason: String },

    #[error("{op} manifest {}: {source}", path.display())]
    Persistence {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("{op} {kind} {namespace}/{name}: {source}")]
    Process {
        op: &'static str,
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: Box<TailError>,
    },
}

impl TailError {
    pub fn persistence(op: &'static str, path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        TailError::Persistence { op, path: path.into(), source: source.into() }
    }

    /// True for misconfiguration classes that retrying cannot fix.
    pub fn is_configuration(&self) -> bool {
        match self {
            TailError::Config(_) | TailError::Resolution { .. } | TailError::Filter { .. } => true,
            TailError::Process { source, .. } => source.is_configuration(),
            _ => false,
        }
    }
}

/// Human label for where a list/watch call was aimed, used in error messages and logs.
pub fn scope_label(namespaced: bool, namespace: Option<&str>) -> String {
    match (namespaced, namespace) {
        (false, _) => "(cluster-scoped)".to_string(),
        (true, None) => "across namespaces".to_string(),
        (true, Some(ns)) => format!("in namespace {}", ns),
    }
}
