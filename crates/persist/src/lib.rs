//! manifest-tail persistence: one manifest file per object under
//! `<root>/<Kind>/<namespace|cluster>/<name>.<ext>`.
//! The file tree is the only memory of the previous state. Synchronous on purpose; each object
//! maps to its own path so callers never contend on a file.

#![forbid(unsafe_code)]

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use metrics::{counter, histogram};
use mtail_core::{BoxError, Diff, Document, DocumentExt, OutputConfig, OutputFormat, Rule, TailError};
use serde_json::{Map, Value as Json};
use tracing::debug;

/// Where filtered manifests are kept.
pub trait Store: Send + Sync {
    /// Persist `doc` unless its stored form is canonically identical. Returns the diff on change.
    fn write(&self, rule: &Rule, doc: &Document) -> Result<Option<Diff>, TailError>;
    /// Remove the stored manifest; a missing file is not an error.
    fn delete(&self, rule: &Rule, doc: &Document) -> Result<(), TailError>;
}

/// Filesystem-backed store.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    format: OutputFormat,
}

impl FileStore {
    pub fn new(output: &OutputConfig) -> Result<Self, TailError> {
        if output.directory.as_os_str().is_empty() {
            return Err(TailError::Config("output directory must not be empty".to_string()));
        }
        Ok(Self { root: output.directory.clone(), format: output.format })
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn format(&self) -> OutputFormat { self.format }

    pub fn path_for(&self, rule: &Rule, doc: &Document) -> PathBuf {
        let ns = doc.object_namespace().unwrap_or("cluster");
        self.root
            .join(sanitize_segment(&rule.kind))
            .join(sanitize_segment(ns))
            .join(format!("{}.{}", sanitize_segment(doc.object_name()), self.format.extension()))
    }
}

impl Store for FileStore {
    fn write(&self, rule: &Rule, doc: &Document) -> Result<Option<Diff>, TailError> {
        let started = std::time::Instant::now();
        let path = self.path_for(rule, doc);
        let previous = read_existing(&path, self.format)?;

        let current = canonical_bytes(doc).map_err(|e| TailError::persistence("encode", &path, e))?;
        if let Some(prev) = &previous {
            let stored = canonical_bytes(prev).map_err(|e| TailError::persistence("encode", &path, e))?;
            if stored == current {
                counter!("manifest_writes_skipped_total", 1u64);
                return Ok(None);
            }
        }

        let body = serialize(doc, self.format).map_err(|e| TailError::persistence("encode", &path, e))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| TailError::persistence("create directory for", &path, e))?;
        }
        fs::write(&path, body).map_err(|e| TailError::persistence("write", &path, e))?;
        histogram!("manifest_write_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("manifest_writes_total", 1u64);
        debug!(path = %path.display(), created = previous.is_none(), "manifest written");
        Ok(Diff::new(previous, Some(doc.clone())))
    }

    fn delete(&self, rule: &Rule, doc: &Document) -> Result<(), TailError> {
        let path = self.path_for(rule, doc);
        match fs::remove_file(&path) {
            Ok(()) => {
                counter!("manifest_deletes_total", 1u64);
                debug!(path = %path.display(), "manifest removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TailError::persistence("delete", &path, e)),
        }
    }
}

fn read_existing(path: &Path, format: OutputFormat) -> Result<Option<Document>, TailError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TailError::persistence("read", path, e)),
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    // decode with the writer's own format; both sides are compared as values afterwards
    match format {
        OutputFormat::Json => serde_json::from_slice::<Document>(&raw).map(Some).map_err(|e| TailError::persistence("decode", path, e)),
        OutputFormat::Yaml => serde_yaml::from_slice::<Document>(&raw).map(Some).map_err(|e| TailError::persistence("decode", path, e)),
    }
}

/// Replace characters that would split or confuse a path segment. Empty becomes `unknown`.
pub fn sanitize_segment(segment: &str) -> String {
    if segment.is_empty() {
        return "unknown".to_string();
    }
    segment.chars().map(|c| if matches!(c, '/' | '\\' | ' ') { '_' } else { c }).collect()
}

/// Compact JSON with keys sorted at every level. Two documents are the same manifest iff their
/// canonical bytes are equal.
pub fn canonical_bytes(doc: &Document) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&sorted(doc))
}

fn sorted(v: &Json) -> Json {
    match v {
        Json::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for k in keys {
                out.insert(k.clone(), sorted(&map[k.as_str()]));
            }
            Json::Object(out)
        }
        Json::Array(items) => Json::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// On-disk form: YAML, or JSON pretty-printed with two-space indent. Always newline-terminated.
pub fn serialize(doc: &Document, format: OutputFormat) -> Result<Vec<u8>, BoxError> {
    let mut out = match format {
        OutputFormat::Yaml => serde_yaml::to_string(doc)?.into_bytes(),
        OutputFormat::Json => serde_json::to_vec_pretty(doc)?,
    };
    if out.last() != Some(&b'\n') {
        out.push(b'\n');
    }
    Ok(out)
}
