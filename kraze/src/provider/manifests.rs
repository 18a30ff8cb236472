//! Raw-manifest-backed `Provider`. Shells out to `kubectl apply`/`delete`
//! rather than rendering anything itself.

use async_trait::async_trait;

use kraze_core::ServiceSpec;

use crate::error::{ErrorKind, Result};
use crate::kubectl;
use crate::manifest_scan;

use super::{Provider, ProviderOptions, ProviderStatus};

pub struct ManifestsProvider;

#[async_trait]
impl Provider for ManifestsProvider {
    async fn install(&self, spec: &ServiceSpec, _opts: &ProviderOptions) -> Result<()> {
        let sources = manifest_scan::sources(spec);
        if sources.is_empty() {
            bail!("manifests service '{}' names no path or paths", spec.name);
        }
        if spec.create_namespace {
            // `kubectl apply` on a namespace is idempotent; ignore "already
            // exists" the same way `kubectl create ns` callers usually do.
            let ns_args = vec!["create".to_string(), "namespace".to_string(), spec.namespace.clone()];
            let _ = kubectl::kexec(ns_args).await;
        }
        kubectl::apply(&sources)
            .await
            .map_err(|e| ErrorKind::ProviderError(spec.name.clone(), e.to_string()).into())
    }

    async fn uninstall(&self, spec: &ServiceSpec, _opts: &ProviderOptions) -> Result<()> {
        let sources = manifest_scan::sources(spec);
        kubectl::delete(&sources)
            .await
            .map_err(|e| ErrorKind::ProviderError(spec.name.clone(), e.to_string()).into())
    }

    async fn is_installed(&self, spec: &ServiceSpec, _opts: &ProviderOptions) -> Result<bool> {
        let contents = manifest_scan::read_all(spec).await?;
        let resources = manifest_scan::scan_resources(&contents);
        if resources.is_empty() {
            // can't introspect a pure URL source locally; assume absent
            // so the engine re-applies (apply is idempotent anyway).
            return Ok(false);
        }
        for resource in &resources {
            if !kubectl::resource_exists(&resource.kind, &resource.name, &spec.namespace).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn status(&self, spec: &ServiceSpec, opts: &ProviderOptions) -> Result<ProviderStatus> {
        let installed = self.is_installed(spec, opts).await?;
        Ok(ProviderStatus {
            installed,
            ready: installed,
            message: if installed {
                "applied".to_string()
            } else {
                "not applied".to_string()
            },
        })
    }
}
