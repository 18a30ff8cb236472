//! The declared shape of a cluster: `ServiceSpec` and the `Config` that
//! holds a named collection of them, plus the cluster-level settings.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;

use crate::error::Result;

fn default_namespace() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

fn default_post_ready_delay() -> String {
    "3s".to_string()
}

/// Which `Provider` handles a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Helm,
    Manifests,
}

/// A single declared service. Field names are `snake_case` keys in
/// YAML; type-specific payload fields are present (and meaningful) only
/// for the matching `ServiceType`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Not present in the YAML payload itself — filled in from the
    /// enclosing map key by `Config::load`.
    #[serde(skip)]
    pub name: String,

    #[serde(rename = "type")]
    pub service_type: ServiceType,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_true")]
    pub create_namespace: bool,

    #[serde(default)]
    pub depends_on: BTreeSet<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tri-state: `None` means "defer to the engine-level `--wait` flag".
    #[serde(default)]
    pub wait: Option<bool>,

    pub wait_timeout: Option<String>,

    #[serde(default = "default_post_ready_delay")]
    pub post_ready_delay: String,

    // HELM payload
    pub chart: Option<String>,
    pub repo: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub values: Vec<String>,
    pub values_inline: Option<String>,

    // MANIFESTS payload (`path` is shared: chart-local path for HELM,
    // single file/dir/URL for MANIFESTS)
    pub path: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

impl ServiceSpec {
    /// `dependsOn` cleared in place, so `--no-deps` ordering ignores
    /// dependencies outside the resolved subset.
    pub fn clear_deps(&mut self) {
        self.depends_on.clear();
    }
}

/// Cluster-level settings from the `cluster:` block of the config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default)]
    pub is_external: bool,
}

/// The full validated-by-an-external-collaborator config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub services: BTreeMap<String, ServiceSpec>,
}

impl Config {
    /// Parse a config document from a reader. Not a validating parser —
    /// see SPEC_FULL.md §D: this crate's job stops at producing the
    /// in-memory structure; dependency-graph validation happens
    /// separately in `DependencyGraph::validate`.
    pub fn load(path: &Path) -> Result<Config> {
        debug!("loading config from {}", path.display());
        let f = File::open(path)?;
        let mut cfg: Config = serde_yaml::from_reader(f)?;
        for (name, spec) in cfg.services.iter_mut() {
            spec.name = name.clone();
        }
        Ok(cfg)
    }

    /// Services matching a `key=value` label selector.
    pub fn label_matches(&self, key: &str, value: &str) -> BTreeSet<String> {
        self.services
            .values()
            .filter(|s| s.labels.get(key).map(|v| v.as_str()) == Some(value))
            .map(|s| s.name.clone())
            .collect()
    }
}
