//! Cluster availability check. Built on the same client construction as
//! `state_store::make_client` — a thin, throwaway list call against the
//! `kube-system` namespace is enough to turn a connection refusal into a
//! typed `ClusterUnavailable` before the engine commits to a run.

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams};
use kube::client::APIClient;

use crate::error::{Error, ErrorKind, Result};

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

/// Fails with `ClusterUnavailable` if the API server can't be reached at
/// all (wrong kubeconfig, cluster not up, network partition). A reachable
/// server that simply lacks `kube-system` (shouldn't happen on a real
/// cluster) still counts as available.
pub async fn ensure_reachable() -> Result<()> {
    let client = make_client().await?;
    let api: Api<Namespace> = Api::all(client);
    let lp = ListParams::default().fields("metadata.name=kube-system");
    api.list(&lp)
        .await
        .map_err(|e| ErrorKind::ClusterUnavailable(e.to_string()))?;
    Ok(())
}
