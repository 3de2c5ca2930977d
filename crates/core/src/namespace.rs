//! Namespace policy: which namespaces a rule targets and which are excluded.

use std::collections::BTreeSet;

use crate::Rule;

/// Namespaces a rule should target: the rule's own list when non-empty, else the global one.
/// Empty entries are dropped and the result is deduplicated and sorted. An empty result means
/// "all namespaces".
pub fn effective_namespaces(rule: &Rule, global: &[String]) -> Vec<String> {
    let source = if rule.namespaces.is_empty() { global } else { rule.namespaces.as_slice() };
    source
        .iter()
        .filter(|ns| !ns.is_empty())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Configured namespace exclusions as a lookup set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludeSet(BTreeSet<String>);

impl ExcludeSet {
    pub fn new<S: AsRef<str>>(values: &[S]) -> Self {
        Self(values.iter().map(|v| v.as_ref()).filter(|v| !v.is_empty()).map(str::to_string).collect())
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &str> { self.0.iter().map(String::as_str) }
}

/// Whether objects in `namespace` are ignored. Cluster-scoped objects (empty namespace) never are.
pub fn should_exclude(namespace: &str, exclude: &ExcludeSet) -> bool {
    !namespace.is_empty() && exclude.0.contains(namespace)
}
