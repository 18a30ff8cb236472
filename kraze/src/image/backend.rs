//! `ImageBackend`: the host/in-cluster image inspection collaborator,
//! mirroring how `Provider` is the interface for install/uninstall.
//! `DockerKindImageBackend` is the real implementation, shelling out to
//! `docker`/`kind`/`crictl` rather than linking a client library. Tests
//! substitute a hand-rolled fake rather than spinning up a real
//! container engine.

use async_trait::async_trait;
use size_format::SizeFormatterBinary;
use tokio::process::Command;

use crate::error::Result;

use super::HostInfo;

#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Probe the local container engine. Absence is not an error.
    async fn host_info(&self, raw_ref: &str) -> Result<HostInfo>;

    /// Consult the in-cluster image store. Empty string (not an error)
    /// means the image isn't present there.
    async fn cluster_digest(&self, raw_ref: &str) -> Result<String>;

    async fn pull(&self, raw_ref: &str) -> Result<()>;

    /// Push a host-present image into the cluster's node.
    async fn load(&self, raw_ref: &str) -> Result<()>;

    /// Remove the node's stale copy of an image before loading the new
    /// one. Best-effort: failures are swallowed by the implementation.
    async fn untag(&self, raw_ref: &str) -> Result<()>;
}

pub struct DockerKindImageBackend {
    pub cluster_name: String,
    pub is_external: bool,
}

impl DockerKindImageBackend {
    pub fn new(cluster_name: &str, is_external: bool) -> DockerKindImageBackend {
        DockerKindImageBackend {
            cluster_name: cluster_name.to_string(),
            is_external,
        }
    }

    fn control_plane_node(&self) -> String {
        format!("{}-control-plane", self.cluster_name)
    }
}

#[async_trait]
impl ImageBackend for DockerKindImageBackend {
    async fn host_info(&self, raw_ref: &str) -> Result<HostInfo> {
        crate::require_executable("docker")?;
        let out = Command::new("docker")
            .args(["image", "inspect", raw_ref, "--format", "{{.Id}}\t{{.Size}}"])
            .output()
            .await?;
        if !out.status.success() {
            return Ok(HostInfo::default());
        }
        let text = String::from_utf8_lossy(&out.stdout);
        let mut parts = text.trim().splitn(2, '\t');
        let digest = parts.next().unwrap_or("").to_string();
        let size_bytes: u64 = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
        debug!(
            "host image {} present, {} ({})",
            raw_ref,
            digest,
            SizeFormatterBinary::new(size_bytes)
        );
        Ok(HostInfo {
            present: !digest.is_empty(),
            digest,
            size_bytes,
        })
    }

    async fn cluster_digest(&self, raw_ref: &str) -> Result<String> {
        if self.is_external {
            return Ok(String::new());
        }
        if crate::require_executable("docker").is_err() {
            return Ok(String::new());
        }
        let node = self.control_plane_node();
        let normalized = super::normalize_for_cluster(raw_ref);
        let out = Command::new("docker")
            .args([
                "exec", &node, "crictl", "inspecti", "--output", "go-template", "--template",
                "{{.status.id}}", &normalized,
            ])
            .output()
            .await;
        match out {
            Ok(o) if o.status.success() => Ok(String::from_utf8_lossy(&o.stdout).trim().to_string()),
            _ => Ok(String::new()),
        }
    }

    async fn pull(&self, raw_ref: &str) -> Result<()> {
        crate::require_executable("docker")?;
        debug!("docker pull {}", raw_ref);
        let status = Command::new("docker").args(["pull", raw_ref]).status().await?;
        if !status.success() {
            bail!("docker pull failed for {}", raw_ref);
        }
        Ok(())
    }

    async fn load(&self, raw_ref: &str) -> Result<()> {
        crate::require_executable("kind")?;
        debug!("kind load docker-image {} --name {}", raw_ref, self.cluster_name);
        let status = Command::new("kind")
            .args(["load", "docker-image", raw_ref, "--name", &self.cluster_name])
            .status()
            .await?;
        if !status.success() {
            bail!("kind load failed for {}", raw_ref);
        }
        Ok(())
    }

    async fn untag(&self, raw_ref: &str) -> Result<()> {
        if crate::require_executable("docker").is_err() {
            return Ok(());
        }
        let node = self.control_plane_node();
        let normalized = super::normalize_for_cluster(raw_ref);
        debug!("docker exec {} crictl rmi {}", node, normalized);
        let _ = Command::new("docker")
            .args(["exec", &node, "crictl", "rmi", &normalized])
            .status()
            .await;
        Ok(())
    }
}
