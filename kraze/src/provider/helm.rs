//! Helm-backed `Provider`. Shells out to the `helm` binary (`hexists`/
//! `hexec`/`hout` wrapping `tokio::process::Command`) rather than
//! linking a Helm SDK.

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use kraze_core::ServiceSpec;

use crate::error::{Error, ErrorKind, Result};
use super::{Provider, ProviderOptions, ProviderStatus};

fn hexists() -> Result<()> {
    if which::which("helm").is_err() {
        bail!("helm executable not found in PATH");
    }
    Ok(())
}

async fn hexec(args: Vec<String>) -> Result<()> {
    debug!("helm {}", args.join(" "));
    hexists()?;
    let status = Command::new("helm").args(&args).status().await?;
    if !status.success() {
        bail!("subprocess failure from helm: {}", status.code().unwrap_or(1001));
    }
    Ok(())
}

async fn hout(args: Vec<String>) -> Result<(String, bool)> {
    debug!("helm {}", args.join(" "));
    hexists()?;
    let out = Command::new("helm").args(&args).output().await?;
    let stdout: String = String::from_utf8_lossy(&out.stdout).into();
    let stderr: String = String::from_utf8_lossy(&out.stderr).into();
    if !stderr.is_empty() {
        debug!("helm {} stderr: {}", args.join(" "), stderr.trim());
    }
    Ok((stdout, out.status.success()))
}

fn release_name(spec: &ServiceSpec) -> String {
    spec.name.clone()
}

fn install_args(spec: &ServiceSpec, opts: &ProviderOptions, values_file: Option<&str>) -> Vec<String> {
    let chart = spec
        .chart
        .clone()
        .or_else(|| spec.path.clone())
        .unwrap_or_else(|| spec.name.clone());

    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release_name(spec),
        chart,
        "--namespace".to_string(),
        spec.namespace.clone(),
    ];
    if spec.create_namespace {
        args.push("--create-namespace".to_string());
    }
    if let Some(repo) = &spec.repo {
        args.push("--repo".to_string());
        args.push(repo.clone());
    }
    if let Some(version) = &spec.version {
        args.push("--version".to_string());
        args.push(version.clone());
    }
    for values_path in &spec.values {
        args.push("-f".to_string());
        args.push(values_path.clone());
    }
    if let Some(inline) = values_file {
        args.push("-f".to_string());
        args.push(inline.to_string());
    }
    let wait = spec.wait.unwrap_or(opts.wait);
    if wait {
        args.push("--wait".to_string());
        args.push("--timeout".to_string());
        args.push(format!("{}s", opts.wait_timeout.as_secs()));
    }
    if opts.quiet {
        args.push("--no-hooks".to_string());
    }
    args
}

/// Writes `valuesInline` to a scratch file so it can be passed to `-f`;
/// helm itself has no way to take inline YAML values on the command line.
async fn write_inline_values(spec: &ServiceSpec) -> Result<Option<String>> {
    use tokio::fs::File;
    use tokio::prelude::*;

    match &spec.values_inline {
        None => Ok(None),
        Some(inline) => {
            let path = std::env::temp_dir().join(format!("kraze-{}-inline-values.yaml", spec.name));
            let mut f = File::create(&path).await?;
            f.write_all(inline.as_bytes()).await?;
            Ok(Some(path.to_string_lossy().into_owned()))
        }
    }
}

/// `helm template` against a remote chart's default values, used by
/// `ImageTracker::extract` as a fallback when a chart's inline/referenced
/// values don't mention any images directly: render against defaults and
/// regex-scan the output instead.
pub async fn template(spec: &ServiceSpec) -> Result<String> {
    hexists()?;
    let chart = spec
        .chart
        .clone()
        .or_else(|| spec.path.clone())
        .ok_or_else(|| Error::from(format!("{} has no chart or path to template", spec.name)))?;
    let mut args = vec!["template".to_string(), spec.name.clone(), chart];
    if let Some(repo) = &spec.repo {
        args.push("--repo".to_string());
        args.push(repo.clone());
    }
    if let Some(version) = &spec.version {
        args.push("--version".to_string());
        args.push(version.clone());
    }
    let (out, success) = hout(args).await?;
    if !success {
        bail!("helm template failed for {}", spec.name);
    }
    Ok(out)
}

pub struct HelmProvider;

#[async_trait]
impl Provider for HelmProvider {
    async fn install(&self, spec: &ServiceSpec, opts: &ProviderOptions) -> Result<()> {
        let inline_path = write_inline_values(spec).await?;
        let args = install_args(spec, opts, inline_path.as_deref());
        hexec(args)
            .await
            .map_err(|e| ErrorKind::ProviderError(spec.name.clone(), e.to_string()).into())
    }

    async fn uninstall(&self, spec: &ServiceSpec, opts: &ProviderOptions) -> Result<()> {
        let args = vec![
            "uninstall".to_string(),
            release_name(spec),
            "--namespace".to_string(),
            spec.namespace.clone(),
        ];
        hexec(args)
            .await
            .map_err(|e| ErrorKind::ProviderError(spec.name.clone(), e.to_string()))?;

        if !opts.keep_crds {
            // helm never deletes CRDs on uninstall; best-effort sweep of
            // ones labeled as belonging to this release. Failure here is
            // a warning, not a provider error - the release is already gone.
            let crd_args = vec![
                "delete".to_string(),
                "crd".to_string(),
                "-l".to_string(),
                format!("app.kubernetes.io/instance={}", spec.name),
                "--ignore-not-found".to_string(),
            ];
            if let Err(e) = crate::kubectl::kexec(crd_args).await {
                warn!("CRD cleanup for {} failed (non-fatal): {}", spec.name, e);
            }
        }
        Ok(())
    }

    async fn is_installed(&self, spec: &ServiceSpec, _opts: &ProviderOptions) -> Result<bool> {
        let args = vec![
            "status".to_string(),
            release_name(spec),
            "--namespace".to_string(),
            spec.namespace.clone(),
        ];
        let (_, success) = hout(args).await?;
        Ok(success)
    }

    async fn status(&self, spec: &ServiceSpec, _opts: &ProviderOptions) -> Result<ProviderStatus> {
        let args = vec![
            "status".to_string(),
            release_name(spec),
            "--namespace".to_string(),
            spec.namespace.clone(),
            "-o".to_string(),
            "json".to_string(),
        ];
        let (out, success) = hout(args).await?;
        if !success {
            return Ok(ProviderStatus {
                installed: false,
                ready: false,
                message: "release not found".to_string(),
            });
        }
        let parsed: Value = serde_json::from_str(&out).unwrap_or(Value::Null);
        let status = parsed
            .get("info")
            .and_then(|i| i.get("status"))
            .and_then(|s| s.as_str())
            .unwrap_or("unknown")
            .to_string();
        let ready = status == "deployed";
        Ok(ProviderStatus {
            installed: true,
            ready,
            message: status,
        })
    }
}
