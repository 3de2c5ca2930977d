//! Configuration file model, loading, environment overrides and validation.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::{Rule, TailError};

pub const DEFAULT_REFRESH_INTERVAL: &str = "24h";
pub const DEFAULT_OUTPUT_DIRECTORY: &str = "output";
pub const ENV_PREFIX: &str = "MTAIL_";

/// On-disk serialization of persisted manifests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Yaml => "yaml",
            OutputFormat::Json => "json",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = TailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yaml" => Ok(OutputFormat::Yaml),
            "json" => Ok(OutputFormat::Json),
            other => Err(TailError::Config(format!("invalid output format {:?} (expected yaml or json)", other))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { directory: default_output_directory(), format: OutputFormat::default() }
    }
}

fn default_output_directory() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIRECTORY)
}

/// How diffs are reported. Accepts `disabled|compact|detailed`, or a bool (`true` = detailed).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogDiffMode {
    #[default]
    Disabled,
    Compact,
    Detailed,
}

impl FromStr for LogDiffMode {
    type Err = TailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "false" | "disabled" => Ok(LogDiffMode::Disabled),
            "compact" => Ok(LogDiffMode::Compact),
            "true" | "detailed" => Ok(LogDiffMode::Detailed),
            other => Err(TailError::Config(format!("unsupported diff logging mode {:?}", other))),
        }
    }
}

impl<'de> Deserialize<'de> for LogDiffMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Str(String),
        }
        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(LogDiffMode::Disabled),
            Some(Raw::Bool(true)) => Ok(LogDiffMode::Detailed),
            Some(Raw::Bool(false)) => Ok(LogDiffMode::Disabled),
            Some(Raw::Str(s)) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_diffs: LogDiffMode,
    /// Emit every processed manifest as a log event.
    #[serde(default)]
    pub log_manifests: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub exclude_namespaces: Vec<String>,
    #[serde(default)]
    pub objects: Vec<Rule>,
    #[serde(skip)]
    pub kubeconfig: Option<PathBuf>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TailError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| TailError::Config(format!("open config {}: {}", path.display(), e)))?;
        let cfg = Self::from_yaml(&raw)?;
        debug!(path = %path.display(), rules = cfg.objects.len(), "configuration loaded");
        Ok(cfg)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, TailError> {
        serde_yaml::from_str(raw).map_err(|e| TailError::Config(format!("decode config: {}", e)))
    }

    /// Apply `MTAIL_*` environment overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), TailError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup(key)` as the variable source.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), TailError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name)).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };
        if let Some(v) = get("OUTPUT_DIRECTORY") { self.output.directory = PathBuf::from(v); }
        if let Some(v) = get("OUTPUT_FORMAT") { self.output.format = v.parse()?; }
        if let Some(v) = get("LOGGING_LOG_DIFFS") { self.logging.log_diffs = v.parse()?; }
        if let Some(v) = get("REFRESH_INTERVAL") { self.refresh_interval = Some(v); }
        if let Some(v) = get("NAMESPACES") { self.namespaces = split_list(&v); }
        if let Some(v) = get("EXCLUDE_NAMESPACES") { self.exclude_namespaces = split_list(&v); }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), TailError> {
        if self.objects.is_empty() {
            return Err(TailError::Config("no objects found in configuration file".into()));
        }
        if self.output.directory.as_os_str().is_empty() {
            return Err(TailError::Config("output directory is required".into()));
        }
        for (i, rule) in self.objects.iter().enumerate() {
            validate_rule(rule).map_err(|e| TailError::Config(format!("validate object rule {}: {}", i + 1, e)))?;
        }
        check_for_duplicates(&self.namespaces)
            .map_err(|e| TailError::Config(format!("global inclusion namespaces has duplicate: {}", e)))?;
        check_for_duplicates(&self.exclude_namespaces)
            .map_err(|e| TailError::Config(format!("global exclusion namespaces has duplicate: {}", e)))?;
        self.refresh_interval()?;
        Ok(())
    }

    /// Interval between full-refresh passes (default 24h).
    pub fn refresh_interval(&self) -> Result<Duration, TailError> {
        let raw = self.refresh_interval.as_deref().map(str::trim).filter(|s| !s.is_empty()).unwrap_or(DEFAULT_REFRESH_INTERVAL);
        let d = humantime::parse_duration(raw).map_err(|e| TailError::Config(format!("invalid refresh interval {:?}: {}", raw, e)))?;
        if d.is_zero() {
            return Err(TailError::Config(format!("invalid refresh interval {:?}: must be positive", raw)));
        }
        Ok(d)
    }

    /// Human-readable summary of what the configuration collects.
    pub fn describe(&self) -> String {
        let mut out = String::from("This configuration will get manifests for:\n");
        for rule in &self.objects {
            out.push_str("  ");
            out.push_str(&self.describe_rule(rule));
            out.push('\n');
        }
        out
    }

    pub fn describe_rule(&self, rule: &Rule) -> String {
        let included = if rule.namespaces.is_empty() { &self.namespaces } else { &rule.namespaces };
        let mut line = format!("{} in {}", pluralize_kind(&rule.kind), describe_namespace_scope(included, &self.exclude_namespaces));
        if let Some(p) = rule.name_pattern.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            line.push_str(&format!(" named like {:?}", p));
        }
        line
    }
}

fn validate_rule(rule: &Rule) -> Result<(), String> {
    if rule.kind.trim().is_empty() {
        return Err("kind is required".into());
    }
    if rule.api_version.trim().is_empty() {
        return Err("apiVersion is required".into());
    }
    if rule.namespaces.iter().any(|ns| ns.is_empty()) {
        return Err("namespaces must not contain empty entries".into());
    }
    check_for_duplicates(&rule.namespaces)?;
    rule.name_matcher().map_err(|e| e.to_string())?;
    Ok(())
}

fn check_for_duplicates(namespaces: &[String]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for ns in namespaces.iter().filter(|ns| !ns.is_empty()) {
        if !seen.insert(ns.as_str()) {
            return Err(format!("duplicate namespace {}", ns));
        }
    }
    Ok(())
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn pluralize_kind(kind: &str) -> String {
    if kind.is_empty() {
        return "Objects".to_string();
    }
    if kind.to_ascii_lowercase().ends_with('s') {
        return kind.to_string();
    }
    format!("{}s", kind)
}

fn describe_namespace_scope(included: &[String], excluded: &[String]) -> String {
    if included.is_empty() {
        if excluded.is_empty() {
            return "all namespaces".to_string();
        }
        return format!("all namespaces except {}", format_quoted_list(excluded));
    }
    let noun = if included.len() == 1 { "namespace" } else { "namespaces" };
    let mut out = format!("the {} {}", format_quoted_list(included), noun);
    if !excluded.is_empty() {
        out.push_str(&format!(" (excluding {})", format_quoted_list(excluded)));
    }
    out
}

/// `"a"`, `"a" or "b"`, `"a", "b", or "c"`.
pub fn format_quoted_list(elements: &[String]) -> String {
    let quoted: Vec<String> = elements.iter().map(|e| format!("{:?}", e)).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{} or {}", a, b),
        [head @ .., last] => format!("{}, or {}", head.join(", "), last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
output:
  directory: /var/lib/manifests
  format: json
logging:
  logDiffs: compact
refreshInterval: 1h30m
namespaces: [team-a, team-b]
excludeNamespaces: [kube-system]
objects:
  - apiVersion: v1
    kind: Pod
  - apiVersion: apps/v1
    kind: Deployment
    namespaces: [prod]
    namePattern: "api-.*"
"#;

    #[test]
    fn parses_full_document() {
        let cfg = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(cfg.output.directory, PathBuf::from("/var/lib/manifests"));
        assert_eq!(cfg.output.format, OutputFormat::Json);
        assert_eq!(cfg.logging.log_diffs, LogDiffMode::Compact);
        assert_eq!(cfg.objects.len(), 2);
        assert_eq!(cfg.objects[1].name_pattern.as_deref(), Some("api-.*"));
        assert_eq!(cfg.refresh_interval().unwrap(), Duration::from_secs(5400));
        cfg.validate().unwrap();
    }

    #[test]
    fn defaults_apply_when_sections_missing() {
        let cfg = Config::from_yaml("objects:\n  - {apiVersion: v1, kind: ConfigMap}\n").unwrap();
        assert_eq!(cfg.output.directory, PathBuf::from("output"));
        assert_eq!(cfg.output.format, OutputFormat::Yaml);
        assert_eq!(cfg.logging.log_diffs, LogDiffMode::Disabled);
        assert_eq!(cfg.refresh_interval().unwrap(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn log_diffs_accepts_bools_and_rejects_unknown() {
        let cfg = Config::from_yaml("logging: {logDiffs: true}\n").unwrap();
        assert_eq!(cfg.logging.log_diffs, LogDiffMode::Detailed);
        let cfg = Config::from_yaml("logging: {logDiffs: false}\n").unwrap();
        assert_eq!(cfg.logging.log_diffs, LogDiffMode::Disabled);
        let cfg = Config::from_yaml("logging: {logDiffs: DETAILED}\n").unwrap();
        assert_eq!(cfg.logging.log_diffs, LogDiffMode::Detailed);
        assert!(Config::from_yaml("logging: {logDiffs: verbose}\n").is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Config::from_yaml("outputs: {}\n").unwrap_err();
        assert!(err.to_string().contains("decode config"), "err={}", err);
    }

    #[test]
    fn validate_reports_duplicates_and_bad_patterns() {
        let mut cfg = Config::from_yaml(SAMPLE).unwrap();
        cfg.namespaces.push("team-a".into());
        let e = cfg.validate().unwrap_err().to_string();
        assert!(e.contains("global inclusion namespaces has duplicate"), "e={}", e);

        let mut cfg = Config::from_yaml(SAMPLE).unwrap();
        cfg.objects[0].name_pattern = Some("(".into());
        let e = cfg.validate().unwrap_err().to_string();
        assert!(e.contains("validate object rule 1"), "e={}", e);

        let mut cfg = Config::from_yaml(SAMPLE).unwrap();
        cfg.objects[1].namespaces = vec!["prod".into(), "".into()];
        assert!(cfg.validate().is_err());

        let mut cfg = Config::from_yaml(SAMPLE).unwrap();
        cfg.refresh_interval = Some("soon".into());
        assert!(cfg.validate().unwrap_err().to_string().contains("invalid refresh interval"));

        let cfg = Config::default();
        assert!(cfg.validate().unwrap_err().to_string().contains("no objects"));
    }

    #[test]
    fn env_overrides_replace_selected_fields() {
        let vars: HashMap<&str, &str> = [
            ("MTAIL_OUTPUT_DIRECTORY", "/tmp/out"),
            ("MTAIL_OUTPUT_FORMAT", "JSON"),
            ("MTAIL_LOGGING_LOG_DIFFS", "detailed"),
            ("MTAIL_NAMESPACES", "x, y,,z"),
            ("MTAIL_EXCLUDE_NAMESPACES", "  "),
        ]
        .into_iter()
        .collect();
        let mut cfg = Config::from_yaml(SAMPLE).unwrap();
        cfg.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.output.directory, PathBuf::from("/tmp/out"));
        assert_eq!(cfg.output.format, OutputFormat::Json);
        assert_eq!(cfg.logging.log_diffs, LogDiffMode::Detailed);
        assert_eq!(cfg.namespaces, vec!["x", "y", "z"]);
        // blank values leave the file setting alone
        assert_eq!(cfg.exclude_namespaces, vec!["kube-system"]);

        let mut cfg = Config::default();
        let bad = cfg.apply_overrides_from(|k| (k == "MTAIL_OUTPUT_FORMAT").then(|| "xml".to_string()));
        assert!(bad.is_err());
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.objects[0].kind, "Pod");
        assert!(Config::load(dir.path().join("missing.yaml")).unwrap_err().to_string().contains("open config"));
    }

    #[test]
    fn describe_renders_scopes() {
        let cfg = Config::from_yaml(SAMPLE).unwrap();
        let text = cfg.describe();
        assert!(text.starts_with("This configuration will get manifests for:\n"));
        assert!(text.contains(r#"Pods in the "team-a" or "team-b" namespaces (excluding "kube-system")"#), "text={}", text);
        assert!(text.contains(r#"Deployments in the "prod" namespace (excluding "kube-system") named like "api-.*""#), "text={}", text);

        let mut cfg = Config::from_yaml("objects: [{apiVersion: v1, kind: Ingress}]\n").unwrap();
        assert!(cfg.describe().contains("Ingress in all namespaces\n"));
        cfg.exclude_namespaces = vec!["a".into(), "b".into(), "c".into()];
        assert!(cfg.describe().contains(r#"all namespaces except "a", "b", or "c""#));
    }

    #[test]
    fn quoted_list_forms() {
        let v = |s: &[&str]| s.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        assert_eq!(format_quoted_list(&v(&[])), "");
        assert_eq!(format_quoted_list(&v(&["a"])), r#""a""#);
        assert_eq!(format_quoted_list(&v(&["a", "b"])), r#""a" or "b""#);
    }
}
