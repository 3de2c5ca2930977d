//! manifest-tail core types: rules, resource mappings, documents and diffs.

#![forbid(unsafe_code)]

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod namespace;

pub use config::{Config, LogDiffMode, LoggingConfig, OutputConfig, OutputFormat};
pub use error::{BoxError, TailError};

/// One structured object as received from the cluster (apiVersion, kind, metadata, ...).
pub type Document = serde_json::Value;

pub mod prelude {
    pub use super::{Action, Config, Diff, Document, DocumentExt, ResourceMapping, Rule, Scope, TailError};
}

/// A user-declared selection of one resource kind plus optional namespace/name filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Rule {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_pattern: Option<String>,
}

impl Rule {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { api_version: api_version.into(), kind: kind.into(), namespaces: Vec::new(), name_pattern: None }
    }

    pub fn with_namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_name_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.name_pattern = Some(pattern.into());
        self
    }

    /// Compile `namePattern` into an anchored matcher. A blank pattern means "match everything".
    pub fn name_matcher(&self) -> Result<Option<Regex>, TailError> {
        let Some(pattern) = self.name_pattern.as_deref().map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        Regex::new(&format!("^(?:{})$", pattern))
            .map(Some)
            .map_err(|e| TailError::Filter { kind: self.kind.clone(), reason: format!("compile name pattern {:?}: {}", pattern, e) })
    }
}

/// Whether a resource lives inside namespaces or at cluster level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Namespaced,
    Cluster,
}

/// Concrete, queryable endpoint a rule resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMapping {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name, e.g. `deployments`.
    pub plural: String,
    pub scope: Scope,
}

impl ResourceMapping {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn is_namespaced(&self) -> bool {
        matches!(self.scope, Scope::Namespaced)
    }
}

/// Accessors for the identity fields every Document carries.
pub trait DocumentExt {
    fn object_kind(&self) -> &str;
    fn object_name(&self) -> &str;
    /// The object namespace; `None` for cluster-scoped objects (missing or empty).
    fn object_namespace(&self) -> Option<&str>;
}

impl DocumentExt for Document {
    fn object_kind(&self) -> &str {
        self.get("kind").and_then(|v| v.as_str()).unwrap_or("")
    }

    fn object_name(&self) -> &str {
        self.get("metadata").and_then(|m| m.get("name")).and_then(|v| v.as_str()).unwrap_or("")
    }

    fn object_namespace(&self) -> Option<&str> {
        self.get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(|v| v.as_str())
            .filter(|ns| !ns.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Modified,
    Deleted,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Created => "created",
            Action::Modified => "modified",
            Action::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Before/after pair for one Document. "Neither side present" is not representable.
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    Created { current: Document },
    Modified { previous: Document, current: Document },
    Deleted { previous: Document },
}

impl Diff {
    /// Build a diff from optional sides; returns `None` when both are absent.
    pub fn new(previous: Option<Document>, current: Option<Document>) -> Option<Self> {
        match (previous, current) {
            (None, Some(current)) => Some(Diff::Created { current }),
            (Some(previous), Some(current)) => Some(Diff::Modified { previous, current }),
            (Some(previous), None) => Some(Diff::Deleted { previous }),
            (None, None) => None,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Diff::Created { .. } => Action::Created,
            Diff::Modified { .. } => Action::Modified,
            Diff::Deleted { .. } => Action::Deleted,
        }
    }

    pub fn previous(&self) -> Option<&Document> {
        match self {
            Diff::Modified { previous, .. } | Diff::Deleted { previous } => Some(previous),
            Diff::Created { .. } => None,
        }
    }

    pub fn current(&self) -> Option<&Document> {
        match self {
            Diff::Created { current } | Diff::Modified { current, .. } => Some(current),
            Diff::Deleted { .. } => None,
        }
    }

    /// The document that identifies the change: current when present, previous for deletions.
    pub fn subject(&self) -> &Document {
        match self {
            Diff::Created { current } | Diff::Modified { current, .. } => current,
            Diff::Deleted { previous } => previous,
        }
    }
}
