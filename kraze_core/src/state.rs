//! The persisted document: `ClusterState` and its per-service
//! `ServiceRecord`s. Pure data + migration logic; the ConfigMap I/O that
//! loads/saves this document lives in `kraze::state_store`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Current on-disk (in-ConfigMap) schema version. Bump and add a branch
/// to `ClusterState::from_json` when the shape changes again.
pub const CURRENT_STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub installed: bool,
    pub updated_at: DateTime<Utc>,
    pub namespace: String,
    pub created_namespace: bool,
    #[serde(default)]
    pub image_hashes: BTreeMap<String, String>,
}

impl ServiceRecord {
    pub fn new(name: &str, namespace: &str, created_namespace: bool) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            installed: true,
            updated_at: Utc::now(),
            namespace: namespace.to_string(),
            created_namespace,
            image_hashes: BTreeMap::new(),
        }
    }
}

/// The document persisted under `data.metadata` of the `kraze-metadata`
/// ConfigMap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterState {
    #[serde(default)]
    pub version: u32,
    pub cluster_name: String,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceRecord>,
    pub last_updated: DateTime<Utc>,
}

impl ClusterState {
    pub fn new(cluster_name: &str, is_external: bool) -> ClusterState {
        ClusterState {
            version: CURRENT_STATE_VERSION,
            cluster_name: cluster_name.to_string(),
            is_external,
            services: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Parse a stored JSON document, migrating version 0 (the field was
    /// absent) forward to version 1 in memory. A stored version newer
    /// than `CURRENT_STATE_VERSION` is rejected by the caller
    /// (`StateStore::load`), not here — this just reports it.
    pub fn from_json(raw: &str) -> serde_json::Result<ClusterState> {
        let mut state: ClusterState = serde_json::from_str(raw)?;
        if state.version == 0 {
            state.version = 1;
        }
        Ok(state)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.services.get(name).map(|r| r.installed).unwrap_or(false)
    }

    /// Multiset of namespaces this engine created, one entry per owning
    /// service.
    pub fn created_namespaces(&self) -> Vec<String> {
        self.services
            .values()
            .filter(|r| r.installed && r.created_namespace)
            .map(|r| r.namespace.clone())
            .collect()
    }

    /// For each namespace touched by `subset`, how many *other* installed
    /// services (outside `subset`) still use it — used by teardown to
    /// decide whether a namespace is safe to delete once `subset` is gone.
    pub fn namespaces_owned_by(&self, subset: &[String]) -> BTreeMap<String, usize> {
        let mut namespaces: BTreeMap<String, usize> = BTreeMap::new();
        let subset_names: std::collections::BTreeSet<&str> =
            subset.iter().map(|s| s.as_str()).collect();

        // Namespaces created by any service in subset
        let candidate_namespaces: std::collections::BTreeSet<String> = self
            .services
            .values()
            .filter(|r| subset_names.contains(r.name.as_str()) && r.created_namespace)
            .map(|r| r.namespace.clone())
            .collect();

        for ns in candidate_namespaces {
            let others = self
                .services
                .values()
                .filter(|r| r.installed && r.namespace == ns && !subset_names.contains(r.name.as_str()))
                .count();
            namespaces.insert(ns, others);
        }
        namespaces
    }

    pub fn has_image_hash_changed(&self, service: &str, image: &str, current_digest: &str) -> bool {
        match self.services.get(service).and_then(|r| r.image_hashes.get(image)) {
            Some(prior) => prior != current_digest,
            None => true,
        }
    }

    pub fn changed_images(&self, service: &str, current: &BTreeMap<String, String>) -> Vec<String> {
        current
            .iter()
            .filter(|(img, digest)| self.has_image_hash_changed(service, img, digest))
            .map(|(img, _)| img.clone())
            .collect()
    }

    /// Mark a service installed, preserving prior `image_hashes`.
    pub fn mark_installed(&mut self, name: &str, namespace: &str, created_namespace: bool) {
        let prior_hashes = self
            .services
            .get(name)
            .map(|r| r.image_hashes.clone())
            .unwrap_or_default();
        let mut record = ServiceRecord::new(name, namespace, created_namespace);
        record.image_hashes = prior_hashes;
        self.services.insert(name.to_string(), record);
    }

    /// Mark a service installed, overwriting `image_hashes` with freshly
    /// observed digests.
    pub fn mark_installed_with_images(
        &mut self,
        name: &str,
        namespace: &str,
        created_namespace: bool,
        image_hashes: BTreeMap<String, String>,
    ) {
        let mut record = ServiceRecord::new(name, namespace, created_namespace);
        record.image_hashes = image_hashes;
        self.services.insert(name.to_string(), record);
    }

    pub fn mark_uninstalled(&mut self, name: &str) {
        self.services.remove(name);
    }
}
