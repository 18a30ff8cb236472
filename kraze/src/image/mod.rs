//! `ImageTracker`: parse image references, extract which images a
//! service needs, and run the pull/untag/load decision policy against an
//! injected `ImageBackend`. Decision logic is pure and trivially
//! testable; the backend is the collaborator that actually touches the
//! host container engine and the cluster's node.

use std::collections::BTreeMap;

use kraze_core::{ImageReference, ServiceSpec, ServiceType};

use crate::error::Result;
use crate::manifest_scan;
use crate::provider::helm;

pub mod backend;
pub use backend::{DockerKindImageBackend, ImageBackend};

/// What the host container engine reports about an image.
#[derive(Debug, Clone, Default)]
pub struct HostInfo {
    pub present: bool,
    pub digest: String,
    pub size_bytes: u64,
}

/// The per-image action the decision policy settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageAction {
    PullThenLoad,
    Load,
    UntagThenLoad,
    Skip,
    /// Host digest has diverged from the last-pushed hash, but the
    /// cluster is external so the engine can't mutate it locally.
    DivergedNoop,
}

pub struct ImageTracker {
    pub cluster_name: String,
    pub is_external: bool,
    backend: Box<dyn ImageBackend>,
}

impl ImageTracker {
    pub fn new(cluster_name: &str, is_external: bool) -> ImageTracker {
        ImageTracker::with_backend(
            cluster_name,
            is_external,
            Box::new(DockerKindImageBackend::new(cluster_name, is_external)),
        )
    }

    pub fn with_backend(cluster_name: &str, is_external: bool, backend: Box<dyn ImageBackend>) -> ImageTracker {
        ImageTracker {
            cluster_name: cluster_name.to_string(),
            is_external,
            backend,
        }
    }

    pub fn parse(raw: &str) -> ImageReference {
        ImageReference::parse(raw)
    }

    /// Which images a service needs. HELM: merges inline values,
    /// referenced values files, and (for local charts) `values.yaml`;
    /// falls back to `helm template` against defaults for remote charts
    /// with nothing found locally. MANIFESTS: regex-scans the files.
    /// Dedupe preserves first occurrence (via `manifest_scan::scan_images`).
    pub async fn extract(&self, spec: &ServiceSpec) -> Result<Vec<String>> {
        match spec.service_type {
            ServiceType::Manifests => {
                let contents = manifest_scan::read_all(spec).await?;
                Ok(manifest_scan::scan_images(&contents))
            }
            ServiceType::Helm => self.extract_helm_images(spec).await,
        }
    }

    async fn extract_helm_images(&self, spec: &ServiceSpec) -> Result<Vec<String>> {
        let mut combined = String::new();
        if let Some(inline) = &spec.values_inline {
            combined.push_str(inline);
            combined.push('\n');
        }
        for values_path in &spec.values {
            if let Ok(c) = tokio::fs::read_to_string(values_path).await {
                combined.push_str(&c);
                combined.push('\n');
            }
        }
        if let Some(local_path) = &spec.path {
            let default_values = std::path::Path::new(local_path).join("values.yaml");
            if let Ok(c) = tokio::fs::read_to_string(&default_values).await {
                combined.push_str(&c);
                combined.push('\n');
            }
        }

        let mut images = manifest_scan::scan_images(&combined);
        if images.is_empty() && spec.repo.is_some() {
            match helm::template(spec).await {
                Ok(rendered) => images = manifest_scan::scan_images(&rendered),
                Err(e) => {
                    warn!("could not extract images for {} via helm template: {}", spec.name, e);
                }
            }
        }
        Ok(images)
    }

    pub async fn host_info(&self, raw_ref: &str) -> Result<HostInfo> {
        self.backend.host_info(raw_ref).await
    }

    pub async fn cluster_digest(&self, raw_ref: &str) -> Result<String> {
        self.backend.cluster_digest(raw_ref).await
    }

    /// Spec §4.2's decision policy, pure so it's directly testable.
    pub fn decide(&self, host: &HostInfo, prior_hash: Option<&str>, cluster_digest: &str) -> ImageAction {
        if !host.present {
            return ImageAction::PullThenLoad;
        }
        if self.is_external {
            let changed = prior_hash.map(|p| p != host.digest).unwrap_or(true);
            return if changed { ImageAction::DivergedNoop } else { ImageAction::Skip };
        }
        if cluster_digest.is_empty() {
            ImageAction::Load
        } else if cluster_digest != host.digest {
            ImageAction::UntagThenLoad
        } else {
            ImageAction::Skip
        }
    }

    /// Run the action for one image.
    pub async fn execute(&self, raw_ref: &str, action: ImageAction) -> Result<()> {
        match action {
            ImageAction::PullThenLoad => {
                self.backend.pull(raw_ref).await?;
                self.backend.load(raw_ref).await?;
            }
            ImageAction::Load => {
                self.backend.load(raw_ref).await?;
            }
            ImageAction::UntagThenLoad => {
                self.backend.untag(raw_ref).await?;
                self.backend.load(raw_ref).await?;
            }
            ImageAction::DivergedNoop => {
                warn!(
                    "{} has diverged from the last-pushed hash on an external cluster; \
                     not locally mutable, leaving as-is",
                    raw_ref
                );
            }
            ImageAction::Skip => {}
        }
        Ok(())
    }

    /// Full per-image pipeline used by the engine's install step:
    /// probe, decide, execute, return the digest to persist (empty if
    /// the image never resolved to a host digest at all).
    pub async fn sync_image(&self, raw_ref: &str, prior_hashes: &BTreeMap<String, String>) -> Result<String> {
        let mut host = self.backend.host_info(raw_ref).await?;
        let cluster_digest = self.backend.cluster_digest(raw_ref).await?;
        let prior = prior_hashes.get(raw_ref).map(|s| s.as_str());

        let action = self.decide(&host, prior, &cluster_digest);
        if let Err(e) = self.execute(raw_ref, action).await {
            warn!("image operation failed for {} (non-fatal): {}", raw_ref, e);
            return Ok(prior.unwrap_or("").to_string());
        }
        if action == ImageAction::PullThenLoad {
            // refresh digest post-pull so the persisted hash reflects
            // what was actually loaded
            host = self.backend.host_info(raw_ref).await.unwrap_or(host);
        }
        Ok(host.digest)
    }
}

/// Docker Hub refs need the `docker.io/`+`library/` prefixes re-applied
/// before asking the node's containerd-backed `crictl` about them, since
/// `docker.io/library/x` and bare `x` resolve to the same content but
/// `crictl` doesn't apply Docker Hub's implicit defaults itself.
pub(crate) fn normalize_for_cluster(raw_ref: &str) -> String {
    ImageReference::parse(raw_ref).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(is_external: bool) -> ImageTracker {
        ImageTracker::new("dev-cluster", is_external)
    }

    fn present(digest: &str) -> HostInfo {
        HostInfo { present: true, digest: digest.to_string(), size_bytes: 100 }
    }

    #[test]
    fn absent_host_image_schedules_pull_then_load() {
        let t = tracker(false);
        let action = t.decide(&HostInfo::default(), None, "");
        assert_eq!(action, ImageAction::PullThenLoad);
    }

    #[test]
    fn local_cluster_empty_cluster_digest_loads() {
        let t = tracker(false);
        let action = t.decide(&present("sha256:AA"), None, "");
        assert_eq!(action, ImageAction::Load);
    }

    #[test]
    fn local_cluster_digest_matches_is_a_skip() {
        let t = tracker(false);
        let action = t.decide(&present("sha256:AA"), None, "sha256:AA");
        assert_eq!(action, ImageAction::Skip);
    }

    #[test]
    fn local_cluster_digest_differs_untags_then_loads() {
        let t = tracker(false);
        let action = t.decide(&present("sha256:BB"), None, "sha256:AA");
        assert_eq!(action, ImageAction::UntagThenLoad);
    }

    #[test]
    fn external_cluster_unchanged_digest_is_skip() {
        let t = tracker(true);
        let action = t.decide(&present("sha256:AA"), Some("sha256:AA"), "");
        assert_eq!(action, ImageAction::Skip);
    }

    #[test]
    fn external_cluster_changed_digest_is_diverged_noop() {
        let t = tracker(true);
        let action = t.decide(&present("sha256:BB"), Some("sha256:AA"), "");
        assert_eq!(action, ImageAction::DivergedNoop);
    }

    #[test]
    fn normalize_applies_docker_hub_defaults() {
        assert_eq!(normalize_for_cluster("myapp:1.0"), "docker.io/library/myapp:1.0");
    }
}
