#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{channel::mpsc as fmpsc, stream, StreamExt};
use mtail_core::{Config, Diff, Document, DocumentExt, OutputConfig, OutputFormat, ResourceMapping, Rule, Scope};
use mtail_kubehub::{ClusterApi, EventStream, WatchEvent};
use mtail_tail::{DiffSink, MetricsRecorder, Processor, Tail};
use tokio::sync::mpsc;

pub fn pod(name: &str, ns: &str) -> Document {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "namespace": ns, "resourceVersion": "1"},
        "spec": {"containers": [{"name": "app", "image": "nginx"}]},
        "status": {"phase": "Running"}
    })
}

pub fn node(name: &str) -> Document {
    serde_json::json!({"apiVersion": "v1", "kind": "Node", "metadata": {"name": name}})
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) { self.0.fetch_sub(1, Ordering::SeqCst); }
}

/// In-memory cluster serving Pods (namespaced) and Nodes (cluster-scoped).
///
/// Watch streams come from scripted channels queued per namespace key; with nothing queued a
/// watch stays open and silent until dropped.
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<Vec<Document>>,
    scripts: Mutex<HashMap<Option<String>, VecDeque<EventStream>>>,
    opens: Mutex<Vec<Option<String>>>,
    fail_open: Mutex<bool>,
    active: Arc<AtomicUsize>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn with_objects(objects: Vec<Document>) -> Arc<Self> {
        let fake = Self::default();
        *fake.objects.lock().unwrap() = objects;
        Arc::new(fake)
    }

    pub fn set_objects(&self, objects: Vec<Document>) { *self.objects.lock().unwrap() = objects; }

    /// Queue a stream for the next watch on `namespace`; dropping the sender closes it.
    pub fn script(&self, namespace: Option<&str>) -> fmpsc::UnboundedSender<WatchEvent> {
        let (tx, rx) = fmpsc::unbounded();
        self.scripts.lock().unwrap().entry(namespace.map(str::to_string)).or_default().push_back(rx.boxed());
        tx
    }

    pub fn fail_watch_open(&self) { *self.fail_open.lock().unwrap() = true; }

    pub fn opens(&self) -> Vec<Option<String>> { self.opens.lock().unwrap().clone() }

    /// Watch streams currently held by someone.
    pub fn active_streams(&self) -> usize { self.active.load(Ordering::SeqCst) }

    fn guarded(&self, inner: EventStream) -> EventStream {
        let guard = ActiveGuard::new(self.active.clone());
        Box::pin(async_stream::stream! {
            let _guard = guard;
            let mut inner = inner;
            while let Some(event) = inner.next().await {
                yield event;
            }
        })
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn resolve(&self, group: &str, version: &str, kind: &str) -> anyhow::Result<Option<ResourceMapping>> {
        if !group.is_empty() || version != "v1" {
            return Ok(None);
        }
        let (plural, scope) = match kind {
            "Pod" => ("pods", Scope::Namespaced),
            "Node" => ("nodes", Scope::Cluster),
            _ => return Ok(None),
        };
        Ok(Some(ResourceMapping { group: String::new(), version: version.into(), kind: kind.into(), plural: plural.into(), scope }))
    }

    async fn list(&self, mapping: &ResourceMapping, namespace: Option<&str>) -> anyhow::Result<Vec<Document>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.object_kind() == mapping.kind)
            .filter(|o| namespace.map_or(true, |ns| o.object_namespace() == Some(ns)))
            .cloned()
            .collect())
    }

    async fn watch(&self, _mapping: &ResourceMapping, namespace: Option<&str>) -> anyhow::Result<EventStream> {
        self.opens.lock().unwrap().push(namespace.map(str::to_string));
        if *self.fail_open.lock().unwrap() {
            anyhow::bail!("connection refused");
        }
        let scripted = self.scripts.lock().unwrap().get_mut(&namespace.map(str::to_string)).and_then(VecDeque::pop_front);
        let inner = scripted.unwrap_or_else(|| stream::pending().boxed());
        Ok(self.guarded(inner))
    }
}

/// Forwards every diff to a channel the test can await.
pub struct ChannelSink(pub mpsc::UnboundedSender<Diff>);

impl DiffSink for ChannelSink {
    fn log(&self, diff: &Diff) { let _ = self.0.send(diff.clone()); }
}

#[derive(Default)]
pub struct CountingMetrics {
    pub full_runs: Mutex<Vec<usize>>,
    pub added: AtomicUsize,
    pub changed: AtomicUsize,
    pub removed: AtomicUsize,
}

impl MetricsRecorder for CountingMetrics {
    fn record_full_run(&self, count: usize) { self.full_runs.lock().unwrap().push(count); }
    fn record_manifest_added(&self) { self.added.fetch_add(1, Ordering::SeqCst); }
    fn record_manifest_changed(&self) { self.changed.fetch_add(1, Ordering::SeqCst); }
    fn record_manifest_removed(&self) { self.removed.fetch_add(1, Ordering::SeqCst); }
}

pub struct Harness {
    pub tail: Tail,
    pub diffs: mpsc::UnboundedReceiver<Diff>,
    pub metrics: Arc<CountingMetrics>,
    pub dir: tempfile::TempDir,
}

pub fn config(rules: Vec<Rule>, namespaces: &[&str], exclude: &[&str], dir: &std::path::Path) -> Config {
    Config {
        output: OutputConfig { directory: dir.to_path_buf(), format: OutputFormat::Yaml },
        namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
        exclude_namespaces: exclude.iter().map(|s| s.to_string()).collect(),
        objects: rules,
        ..Config::default()
    }
}

pub fn harness(api: Arc<FakeCluster>, rules: Vec<Rule>, namespaces: &[&str], exclude: &[&str]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(rules, namespaces, exclude, dir.path());
    let processor = Processor::from_config(&cfg).unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let metrics = Arc::new(CountingMetrics::default());
    let tail = Tail::new(api, cfg, processor, Arc::new(ChannelSink(tx))).with_metrics(metrics.clone());
    Harness { tail, diffs: rx, metrics, dir }
}

pub async fn next_diff(rx: &mut mpsc::UnboundedReceiver<Diff>) -> Diff {
    tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.expect("timed out waiting for diff").expect("sink closed")
}

/// Poll `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
