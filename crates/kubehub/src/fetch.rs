//! Rule-driven listing: namespace fan-out, exclusions, name filtering and a hard deadline.

use std::sync::Arc;

use metrics::counter;
use mtail_core::{
    error::scope_label,
    namespace::{effective_namespaces, should_exclude, ExcludeSet},
    BoxError, Config, Document, DocumentExt, ResourceMapping, Rule, TailError,
};
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{resolve_mapping, ClusterApi};

/// Lists the current objects matched by a rule.
pub struct Fetcher {
    api: Arc<dyn ClusterApi>,
    namespaces: Vec<String>,
    exclude: ExcludeSet,
}

impl Fetcher {
    pub fn new(api: Arc<dyn ClusterApi>, config: &Config) -> Self {
        Self { api, namespaces: config.namespaces.clone(), exclude: ExcludeSet::new(&config.exclude_namespaces) }
    }

    /// Current objects for `rule`. Resolution and every list call must finish before `deadline`;
    /// the first failing call aborts the whole fetch.
    pub async fn fetch(&self, rule: &Rule, deadline: Instant) -> Result<Vec<Document>, TailError> {
        let mapping = match tokio::time::timeout_at(deadline, resolve_mapping(self.api.as_ref(), rule)).await {
            Ok(resolved) => resolved?,
            Err(elapsed) => {
                counter!("list_errors_total", 1u64);
                return Err(TailError::Fetch { kind: rule.kind.clone(), scope: "during resolution".into(), source: Box::new(elapsed) });
            }
        };
        let matcher = rule.name_matcher()?;
        let items = if mapping.is_namespaced() {
            self.fetch_namespaced(rule, &mapping, deadline).await?
        } else {
            self.list(&mapping, None, deadline).await?
        };
        let items = retain_matching(items, matcher.as_ref());
        info!(kind = %rule.kind, count = items.len(), "fetched objects");
        Ok(items)
    }

    async fn fetch_namespaced(&self, rule: &Rule, mapping: &ResourceMapping, deadline: Instant) -> Result<Vec<Document>, TailError> {
        let targets = effective_namespaces(rule, &self.namespaces);
        if targets.is_empty() {
            let items = self.list(mapping, None, deadline).await?;
            return Ok(items
                .into_iter()
                .filter(|obj| !should_exclude(obj.object_namespace().unwrap_or(""), &self.exclude))
                .collect());
        }
        let mut all = Vec::new();
        for ns in &targets {
            if should_exclude(ns, &self.exclude) {
                debug!(kind = %rule.kind, ns = %ns, "skipping excluded namespace");
                continue;
            }
            all.extend(self.list(mapping, Some(ns), deadline).await?);
        }
        Ok(all)
    }

    async fn list(&self, mapping: &ResourceMapping, namespace: Option<&str>, deadline: Instant) -> Result<Vec<Document>, TailError> {
        let fail = |source: BoxError| {
            counter!("list_errors_total", 1u64);
            TailError::Fetch { kind: mapping.kind.clone(), scope: scope_label(mapping.is_namespaced(), namespace), source }
        };
        match tokio::time::timeout_at(deadline, self.api.list(mapping, namespace)).await {
            Ok(Ok(items)) => {
                debug!(kind = %mapping.kind, ns = ?namespace, count = items.len(), "list ok");
                Ok(items)
            }
            Ok(Err(e)) => Err(fail(e.into())),
            Err(elapsed) => Err(fail(Box::new(elapsed))),
        }
    }
}

fn retain_matching(items: Vec<Document>, matcher: Option<&Regex>) -> Vec<Document> {
    match matcher {
        None => items,
        Some(re) => items.into_iter().filter(|obj| re.is_match(obj.object_name())).collect(),
    }
}
