//! `Provider`: the uniform install/uninstall interface over Helm and raw
//! manifests. `helm`/`kubectl` invocations are treated as opaque
//! subprocess calls whose semantics (idempotent upgrade, wait-for-rollout)
//! this layer doesn't second-guess — it just shells out and checks the
//! exit code.

use std::time::Duration;

use async_trait::async_trait;

use kraze_core::ServiceSpec;

use crate::error::Result;

pub mod helm;
pub mod manifests;

/// Options threaded into every provider call: kubeconfig context (via
/// cluster name), wait flag, timeout, keep-CRDs, and a quiet/verbose
/// toggle.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub cluster_name: String,
    pub wait: bool,
    pub wait_timeout: Duration,
    pub keep_crds: bool,
    pub quiet: bool,
}

/// Tri-state install readiness collapsed to bool+message.
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub installed: bool,
    pub ready: bool,
    pub message: String,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Must be idempotent: re-installing at identical config completes
    /// without error.
    async fn install(&self, spec: &ServiceSpec, opts: &ProviderOptions) -> Result<()>;

    /// Removes the release/resources; honors `opts.keep_crds`.
    async fn uninstall(&self, spec: &ServiceSpec, opts: &ProviderOptions) -> Result<()>;

    /// Must not mutate the cluster.
    async fn is_installed(&self, spec: &ServiceSpec, opts: &ProviderOptions) -> Result<bool>;

    async fn status(&self, spec: &ServiceSpec, opts: &ProviderOptions) -> Result<ProviderStatus>;
}

/// Picks the concrete provider for a spec's `ServiceType`.
pub fn for_spec(spec: &ServiceSpec) -> Box<dyn Provider> {
    use kraze_core::ServiceType;
    match spec.service_type {
        ServiceType::Helm => Box::new(helm::HelmProvider),
        ServiceType::Manifests => Box::new(manifests::ManifestsProvider),
    }
}
