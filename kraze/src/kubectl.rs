//! A small CLI kubectl interface: thin wrappers around
//! `tokio::process::Command` rather than the full typed API for the
//! handful of shell-outs raw-manifest handling and CRD cleanup need.

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::Result;
use crate::require_executable;

pub async fn kexec(args: Vec<String>) -> Result<()> {
    debug!("kubectl {}", args.join(" "));
    require_executable("kubectl")?;
    let status = Command::new("kubectl").args(&args).status().await?;
    if !status.success() {
        bail!("subprocess failure from kubectl: {}", status.code().unwrap_or(1001));
    }
    Ok(())
}

pub async fn kout(args: Vec<String>) -> Result<(String, bool)> {
    debug!("kubectl {}", args.join(" "));
    require_executable("kubectl")?;
    let out = Command::new("kubectl").args(&args).output().await?;
    let stdout: String = String::from_utf8_lossy(&out.stdout).into();
    let stderr: String = String::from_utf8_lossy(&out.stderr).into();
    if !stderr.is_empty() {
        debug!("kubectl {} stderr: {}", args.join(" "), stderr.trim());
    }
    Ok((stdout, out.status.success()))
}

pub async fn apply(paths: &[String]) -> Result<()> {
    let mut args = vec!["apply".to_string()];
    for p in paths {
        args.push("-f".to_string());
        args.push(p.clone());
    }
    kexec(args).await
}

pub async fn delete(paths: &[String]) -> Result<()> {
    let mut args = vec!["delete".to_string(), "--ignore-not-found".to_string()];
    for p in paths {
        args.push("-f".to_string());
        args.push(p.clone());
    }
    kexec(args).await
}

pub async fn resource_exists(kind: &str, name: &str, namespace: &str) -> Result<bool> {
    let args = vec![
        "get".to_string(),
        kind.to_string(),
        name.to_string(),
        "-n".to_string(),
        namespace.to_string(),
    ];
    let (_, success) = kout(args).await?;
    Ok(success)
}

pub async fn namespace_exists(name: &str) -> Result<bool> {
    let args = vec!["get".to_string(), "namespace".to_string(), name.to_string()];
    let (_, success) = kout(args).await?;
    Ok(success)
}

/// `true` once `kubectl get all -n <ns>` reports no resources, i.e. safe
/// to delete. A namespace that no longer exists counts as empty.
pub async fn namespace_is_empty(name: &str) -> Result<bool> {
    let args = vec![
        "get".to_string(),
        "all".to_string(),
        "-n".to_string(),
        name.to_string(),
        "--no-headers".to_string(),
    ];
    let (out, success) = kout(args).await?;
    if !success {
        return Ok(true);
    }
    Ok(out.trim().is_empty())
}

pub async fn delete_pvcs(namespace: &str) -> Result<()> {
    let args = vec![
        "delete".to_string(),
        "pvc".to_string(),
        "--all".to_string(),
        "-n".to_string(),
        namespace.to_string(),
        "--ignore-not-found".to_string(),
    ];
    kexec(args).await
}

pub async fn delete_namespace(name: &str) -> Result<()> {
    let args = vec![
        "delete".to_string(),
        "namespace".to_string(),
        name.to_string(),
        "--ignore-not-found".to_string(),
    ];
    kexec(args).await
}

/// The namespace-lifecycle collaborator `Engine`/`Teardown` depend on,
/// named and shaped like `StateBackend`: a plain trait so tests can
/// substitute an in-memory fake instead of shelling out to a real
/// `kubectl` binary.
#[async_trait]
pub trait NamespaceBackend: Send + Sync {
    async fn namespace_exists(&self, name: &str) -> Result<bool>;
    async fn namespace_is_empty(&self, name: &str) -> Result<bool>;
    async fn delete_pvcs(&self, namespace: &str) -> Result<()>;
    async fn delete_namespace(&self, name: &str) -> Result<()>;
}

/// The real `kubectl`-backed `NamespaceBackend`.
pub struct KubectlNamespaceBackend;

#[async_trait]
impl NamespaceBackend for KubectlNamespaceBackend {
    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        namespace_exists(name).await
    }

    async fn namespace_is_empty(&self, name: &str) -> Result<bool> {
        namespace_is_empty(name).await
    }

    async fn delete_pvcs(&self, namespace: &str) -> Result<()> {
        delete_pvcs(namespace).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        delete_namespace(name).await
    }
}
