//! Watch supervision: one task per subscription under a shared cancellation token.

use ::metrics::counter;
use futures::StreamExt;
use mtail_core::{
    error::scope_label,
    namespace::{effective_namespaces, should_exclude, ExcludeSet},
    Diff, Document, DocumentExt, ResourceMapping, Rule, TailError,
};
use mtail_kubehub::{resolve_mapping, EventStream, WatchEvent};
use regex::Regex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::Tail;

/// How a watch run ended when no subscription failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchExit {
    /// Every subscription finished on its own (also: nothing to watch).
    Completed,
    /// The caller's token was cancelled.
    Cancelled,
}

/// One subscription: a rule bound to a resolved resource and a namespace (or all of them).
#[derive(Debug, Clone)]
struct WatchTarget {
    rule: Rule,
    mapping: ResourceMapping,
    namespace: Option<String>,
    matcher: Option<Regex>,
}

impl WatchTarget {
    fn scope(&self) -> String { scope_label(self.mapping.is_namespaced(), self.namespace.as_deref()) }

    fn failure(&self, message: impl Into<String>) -> TailError {
        TailError::Watch { kind: self.rule.kind.clone(), scope: self.scope(), message: message.into() }
    }
}

enum StreamEnd {
    Closed,
    Cancelled,
}

/// Subscriptions for one resolved rule. Excluded namespaces get none; an unrestricted
/// namespaced rule gets a single all-namespaces subscription.
fn plan_targets(rule: &Rule, mapping: &ResourceMapping, matcher: Option<Regex>, global: &[String], exclude: &ExcludeSet) -> Vec<WatchTarget> {
    let target = |namespace: Option<String>| WatchTarget { rule: rule.clone(), mapping: mapping.clone(), namespace, matcher: matcher.clone() };
    if !mapping.is_namespaced() {
        return vec![target(None)];
    }
    let namespaces = effective_namespaces(rule, global);
    if namespaces.is_empty() {
        return vec![target(None)];
    }
    namespaces.into_iter().filter(|ns| !should_exclude(ns, exclude)).map(|ns| target(Some(ns))).collect()
}

impl Tail {
    /// Resolve every rule, then watch all subscriptions until `cancel` fires or one fails.
    /// The first failure cancels the remaining subscriptions; all of them have stopped by the
    /// time this returns.
    pub async fn watch_resources(&self, cancel: CancellationToken) -> Result<WatchExit, TailError> {
        let mut targets = Vec::new();
        for rule in &self.config.objects {
            let mapping = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(WatchExit::Cancelled),
                res = resolve_mapping(self.api.as_ref(), rule) => res?,
            };
            let matcher = rule.name_matcher()?;
            targets.extend(plan_targets(rule, &mapping, matcher, &self.config.namespaces, &self.exclude));
        }
        if targets.is_empty() {
            info!("nothing to watch");
            return Ok(WatchExit::Completed);
        }

        let tasks = cancel.child_token();
        let mut set = JoinSet::new();
        info!(subscriptions = targets.len(), "starting watches");
        for target in targets {
            let tail = self.clone();
            let token = tasks.clone();
            set.spawn(async move { tail.run_subscription(target, token).await });
        }

        let mut first: Option<TailError> = None;
        while let Some(joined) = set.join_next().await {
            let outcome = joined.unwrap_or_else(|e| {
                Err(TailError::Watch { kind: "subscription".to_string(), scope: String::new(), message: format!("task failed: {}", e) })
            });
            if let Err(e) = outcome {
                if first.is_none() {
                    error!(error = %e, "watch failed; stopping remaining subscriptions");
                    tasks.cancel();
                    first = Some(e);
                } else {
                    debug!(error = %e, "additional watch failure after shutdown");
                }
            }
        }

        match first {
            Some(e) => Err(e),
            None if cancel.is_cancelled() => Ok(WatchExit::Cancelled),
            None => Ok(WatchExit::Completed),
        }
    }

    /// Open, consume, reopen on remote close. Returns `Ok` only on cancellation.
    async fn run_subscription(&self, target: WatchTarget, cancel: CancellationToken) -> Result<(), TailError> {
        loop {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                res = self.api.watch(&target.mapping, target.namespace.as_deref()) => res,
            };
            let stream = opened.map_err(|e| target.failure(format!("open: {:#}", e)))?;
            info!(kind = %target.rule.kind, ns = ?target.namespace, "watch opened");
            match self.consume(&target, stream, &cancel).await? {
                StreamEnd::Cancelled => {
                    debug!(kind = %target.rule.kind, ns = ?target.namespace, "watch cancelled");
                    return Ok(());
                }
                StreamEnd::Closed => {
                    counter!("watch_reconnects_total", 1u64);
                    info!(kind = %target.rule.kind, ns = ?target.namespace, "watch closed by server; reopening");
                }
            }
        }
    }

    async fn consume(&self, target: &WatchTarget, mut stream: EventStream, cancel: &CancellationToken) -> Result<StreamEnd, TailError> {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                next = stream.next() => match next {
                    Some(event) => self.handle_event(target, event)?,
                    None => return Ok(StreamEnd::Closed),
                },
            }
        }
    }

    fn handle_event(&self, target: &WatchTarget, event: WatchEvent) -> Result<(), TailError> {
        match event {
            WatchEvent::Added(doc) | WatchEvent::Modified(doc) => {
                let Some(doc) = self.admit(target, doc) else { return Ok(()) };
                if let Some(diff) = self.processor.process(&target.rule, doc)? {
                    self.emit(&diff);
                }
            }
            WatchEvent::Deleted(doc) => {
                let Some(doc) = self.admit(target, doc) else { return Ok(()) };
                let previous = self.processor.delete(&target.rule, doc)?;
                self.emit(&Diff::Deleted { previous });
            }
            WatchEvent::Error(message) => {
                warn!(kind = %target.rule.kind, ns = ?target.namespace, message = %message, "watch error event");
                return Err(target.failure(message));
            }
            WatchEvent::Malformed(reason) => {
                counter!("watch_malformed_events_total", 1u64);
                debug!(kind = %target.rule.kind, reason = %reason, "skipping undecodable event");
            }
        }
        Ok(())
    }

    /// Drop objects that are malformed, excluded, or outside the rule's name pattern.
    fn admit(&self, target: &WatchTarget, doc: Document) -> Option<Document> {
        if !doc.is_object() || doc.object_kind().is_empty() || doc.object_name().is_empty() {
            counter!("watch_malformed_events_total", 1u64);
            debug!(kind = %target.rule.kind, "skipping event without kind or name");
            return None;
        }
        if target.namespace.is_none() && should_exclude(doc.object_namespace().unwrap_or(""), &self.exclude) {
            return None;
        }
        if let Some(re) = &target.matcher {
            if !re.is_match(doc.object_name()) {
                return None;
            }
        }
        Some(doc)
    }
}
