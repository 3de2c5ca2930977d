//! manifest-tail kubehub: the cluster capability (resolve/list/watch), resource resolution
//! and rule-driven listing.

#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use kube::{
    api::{Api, ListParams, WatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject, TypeMeta, WatchEvent as RawEvent},
    discovery::{Discovery, Scope as KubeScope},
    Client,
};
use metrics::counter;
use mtail_core::{Document, ResourceMapping, Rule, Scope, TailError};
use tracing::{debug, info, warn};

mod fetch;

pub use fetch::Fetcher;

/// One change notification from a watch subscription. The stream ending means the remote closed it.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(Document),
    Modified(Document),
    Deleted(Document),
    /// Remote-reported failure (e.g. expired resource version).
    Error(String),
    /// A payload that could not be decoded into a document.
    Malformed(String),
}

pub type EventStream = BoxStream<'static, WatchEvent>;

/// What the rest of the system needs from the cluster API.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Concrete mapping for group/version/kind; `Ok(None)` when the cluster serves no such kind.
    async fn resolve(&self, group: &str, version: &str, kind: &str) -> Result<Option<ResourceMapping>>;

    /// All objects of `mapping` in `namespace`, or in every namespace when `None`.
    async fn list(&self, mapping: &ResourceMapping, namespace: Option<&str>) -> Result<Vec<Document>>;

    /// Open a change-event stream for `mapping` in `namespace` (all namespaces when `None`).
    async fn watch(&self, mapping: &ResourceMapping, namespace: Option<&str>) -> Result<EventStream>;
}

/// Split `v1` / `apps/v1` into (group, version).
pub fn parse_api_version(api_version: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = api_version.trim().split('/').collect();
    match parts.as_slice() {
        [version] if !version.is_empty() => Ok((String::new(), (*version).to_string())),
        [group, version] if !group.is_empty() && !version.is_empty() => Ok(((*group).to_string(), (*version).to_string())),
        _ => Err(format!("invalid apiVersion {:?} (expect v1 or group/v1)", api_version)),
    }
}

/// Resolve a rule to its resource mapping. Failures are configuration errors and are not retried.
pub async fn resolve_mapping(api: &dyn ClusterApi, rule: &Rule) -> Result<ResourceMapping, TailError> {
    let err = |reason: String| TailError::Resolution { api_version: rule.api_version.clone(), kind: rule.kind.clone(), reason };
    let (group, version) = parse_api_version(&rule.api_version).map_err(err)?;
    match api.resolve(&group, &version, &rule.kind).await {
        Ok(Some(mapping)) => {
            debug!(kind = %rule.kind, resource = %mapping.plural, scope = ?mapping.scope, "resolved rule");
            Ok(mapping)
        }
        Ok(None) => Err(err("no matching resource served by the cluster".to_string())),
        Err(e) => Err(err(format!("{:#}", e))),
    }
}

/// `ClusterApi` backed by a kube-rs client and dynamic objects.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self { Self { client } }

    /// Connect using an explicit kubeconfig path, or the default inference chain when `None`.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => {
                let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?;
                let cfg = kube::Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                    .await
                    .context("building client config from kubeconfig")?;
                Client::try_from(cfg).context("creating kube client")?
            }
            None => Client::try_default().await.context("creating default kube client")?,
        };
        Ok(Self { client })
    }

    fn api(&self, mapping: &ResourceMapping, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(mapping);
        match (mapping.is_namespaced(), namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn resolve(&self, group: &str, version: &str, kind: &str) -> Result<Option<ResourceMapping>> {
        let discovery = Discovery::new(self.client.clone()).filter(&[group]).run().await?;
        let Some(api_group) = discovery.get(group) else { return Ok(None) };
        for (ar, caps) in api_group.versioned_resources(version) {
            if ar.kind == kind {
                let scope = match caps.scope {
                    KubeScope::Namespaced => Scope::Namespaced,
                    KubeScope::Cluster => Scope::Cluster,
                };
                return Ok(Some(ResourceMapping { group: ar.group, version: ar.version, kind: ar.kind, plural: ar.plural, scope }));
            }
        }
        Ok(None)
    }

    async fn list(&self, mapping: &ResourceMapping, namespace: Option<&str>) -> Result<Vec<Document>> {
        let list = self.api(mapping, namespace).list(&ListParams::default()).await?;
        let types = type_meta(mapping);
        list.items
            .into_iter()
            .map(|obj| to_document(obj, &types).context("serializing DynamicObject"))
            .collect()
    }

    async fn watch(&self, mapping: &ResourceMapping, namespace: Option<&str>) -> Result<EventStream> {
        let stream = self.api(mapping, namespace).watch(&WatchParams::default(), "0").await?;
        let types = type_meta(mapping);
        let label = format!("{}/{}", mapping.plural, namespace.unwrap_or("*"));
        info!(watch = %label, "watch stream opened");
        let events = stream.filter_map(move |item| {
            let event = match item {
                Ok(RawEvent::Added(o)) => Some(decoded(o, &types, WatchEvent::Added)),
                Ok(RawEvent::Modified(o)) => Some(decoded(o, &types, WatchEvent::Modified)),
                Ok(RawEvent::Deleted(o)) => Some(decoded(o, &types, WatchEvent::Deleted)),
                Ok(RawEvent::Bookmark(_)) => None,
                Ok(RawEvent::Error(e)) => Some(WatchEvent::Error(format!("{} ({}): {}", e.reason, e.code, e.message))),
                Err(kube::Error::SerdeError(e)) => Some(WatchEvent::Malformed(e.to_string())),
                Err(e) => {
                    // the body stream ends right after a transport failure; the caller sees a close
                    warn!(watch = %label, error = %e, "watch stream error");
                    counter!("watch_stream_errors_total", 1u64);
                    None
                }
            };
            futures::future::ready(event)
        });
        Ok(events.boxed())
    }
}

fn api_resource(mapping: &ResourceMapping) -> ApiResource {
    ApiResource {
        group: mapping.group.clone(),
        version: mapping.version.clone(),
        api_version: mapping.api_version(),
        kind: mapping.kind.clone(),
        plural: mapping.plural.clone(),
    }
}

fn type_meta(mapping: &ResourceMapping) -> TypeMeta {
    TypeMeta { api_version: mapping.api_version(), kind: mapping.kind.clone() }
}

/// List items arrive without apiVersion/kind; fill them from the mapping before serializing.
fn to_document(mut obj: DynamicObject, types: &TypeMeta) -> Result<Document> {
    if obj.types.is_none() {
        obj.types = Some(types.clone());
    }
    serde_json::to_value(&obj).map_err(|e| anyhow!(e))
}

fn decoded(obj: DynamicObject, types: &TypeMeta, wrap: fn(Document) -> WatchEvent) -> WatchEvent {
    match to_document(obj, types) {
        Ok(doc) => wrap(doc),
        Err(e) => WatchEvent::Malformed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_api_version_core_and_grouped() {
        assert_eq!(parse_api_version("v1").unwrap(), (String::new(), "v1".to_string()));
        assert_eq!(parse_api_version("apps/v1").unwrap(), ("apps".to_string(), "v1".to_string()));
        assert_eq!(parse_api_version("cert-manager.io/v1").unwrap().0, "cert-manager.io");
    }

    #[test]
    fn parse_api_version_invalid_returns_err() {
        assert!(parse_api_version("").is_err());
        assert!(parse_api_version("a/b/c").is_err());
        assert!(parse_api_version("/v1").is_err());
        assert!(parse_api_version("apps/").is_err());
    }

    #[test]
    fn list_items_gain_type_meta() {
        let mapping = ResourceMapping { group: "apps".into(), version: "v1".into(), kind: "Deployment".into(), plural: "deployments".into(), scope: Scope::Namespaced };
        let obj = DynamicObject::new("web", &api_resource(&mapping)).within("prod");
        let mut bare = obj.clone();
        bare.types = None;
        let doc = to_document(bare, &type_meta(&mapping)).unwrap();
        assert_eq!(doc["apiVersion"], "apps/v1");
        assert_eq!(doc["kind"], "Deployment");
        assert_eq!(doc["metadata"]["name"], "web");
        assert_eq!(doc["metadata"]["namespace"], "prod");
    }
}
