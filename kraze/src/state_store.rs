//! `StateStore`: load/save/delete the `kraze-metadata` ConfigMap that
//! holds the persisted `ClusterState`. Uses the same client construction
//! as `cluster::ensure_reachable` (in-cluster config first, falling back
//! to the local kubeconfig), rather than introducing a second way to
//! reach the API server.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PatchParams, PostParams};
use kube::client::APIClient;

use kraze_core::{ClusterState, CURRENT_STATE_VERSION};

use crate::error::{Error, ErrorKind, Result};

/// The `kraze-metadata` ConfigMap collaborator, named the way `Provider`
/// and `ImageBackend` are: an interface the engine depends on, so tests
/// can substitute an in-memory fake instead of a live cluster.
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn load(&self) -> Result<Option<ClusterState>>;
    async fn save(&self, state: &mut ClusterState) -> Result<()>;
    async fn delete(&self) -> Result<()>;
}

pub const NAMESPACE: &str = "kube-system";
pub const NAME: &str = "kraze-metadata";
pub const DATA_KEY: &str = "metadata";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "kraze";

async fn make_client() -> Result<APIClient> {
    let config = if let Ok(cfg) = kube::config::incluster_config() {
        cfg
    } else {
        kube::config::load_kube_config()
            .await
            .map_err(|e| Error::from(ErrorKind::ClusterUnavailable(e.to_string())))?
    };
    Ok(APIClient::new(config))
}

fn not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

pub struct StateStore {
    api: Api<ConfigMap>,
}

impl StateStore {
    pub async fn new() -> Result<StateStore> {
        let client = make_client().await?;
        let api: Api<ConfigMap> = Api::namespaced(client, NAMESPACE);
        Ok(StateStore { api })
    }

    /// `NotFound` is not an error here - it means "no state yet", and the
    /// caller (the engine) creates a fresh `ClusterState`.
    pub async fn load(&self) -> Result<Option<ClusterState>> {
        match self.api.get(NAME).await {
            Ok(cm) => {
                let raw = cm
                    .data
                    .as_ref()
                    .and_then(|d| d.get(DATA_KEY))
                    .cloned()
                    .unwrap_or_default();
                let state = ClusterState::from_json(&raw)
                    .map_err(|e| ErrorKind::StateError(format!("failed to parse state: {}", e)))?;
                if state.version > CURRENT_STATE_VERSION {
                    return Err(
                        ErrorKind::IncompatibleVersion(state.version, CURRENT_STATE_VERSION).into(),
                    );
                }
                Ok(Some(state))
            }
            Err(ref e) if not_found(e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The canonical happens-before point: once this returns `Ok(())`,
    /// the ConfigMap holds the written bytes.
    pub async fn save(&self, state: &mut ClusterState) -> Result<()> {
        state.version = CURRENT_STATE_VERSION;
        state.last_updated = Utc::now();
        let body = state
            .to_json_pretty()
            .map_err(|e| ErrorKind::StateError(format!("failed to serialize state: {}", e)))?;

        let mut data = BTreeMap::new();
        data.insert(DATA_KEY.to_string(), body);

        match self.api.get(NAME).await {
            Ok(_) => {
                let patch = serde_json::json!({ "data": data });
                self.api
                    .patch(NAME, &PatchParams::default(), serde_json::to_vec(&patch)?)
                    .await?;
            }
            Err(ref e) if not_found(e) => {
                let mut labels = BTreeMap::new();
                labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
                let cm = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(NAME.to_string()),
                        namespace: Some(NAMESPACE.to_string()),
                        labels: Some(labels),
                        ..Default::default()
                    },
                    data: Some(data),
                    ..Default::default()
                };
                self.api.create(&PostParams::default(), &cm).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        match self.api.delete(NAME, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(ref e) if not_found(e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StateBackend for StateStore {
    async fn load(&self) -> Result<Option<ClusterState>> {
        StateStore::load(self).await
    }

    async fn save(&self, state: &mut ClusterState) -> Result<()> {
        StateStore::save(self, state).await
    }

    async fn delete(&self) -> Result<()> {
        StateStore::delete(self).await
    }
}
