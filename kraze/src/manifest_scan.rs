//! Regex-scanning over raw Kubernetes manifest YAML: resource identity
//! (for `ManifestsProvider::is_installed`) and image references (for
//! `ImageTracker::extract`). Deliberately line-oriented rather than a
//! full YAML parse, the same shortcut used elsewhere in this codebase
//! when scraping `kubectl` text output instead of parsing structured
//! responses.

use std::path::Path;

use regex::Regex;
use walkdir::WalkDir;

use kraze_core::ServiceSpec;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ManifestResource {
    pub kind: String,
    pub name: String,
}

/// The local file/dir paths or URLs a MANIFESTS-type spec names. `path`
/// and `paths` are both honored; a directory is expanded to its `*.yaml`/
/// `*.yml` files via a `WalkDir`-based scan.
pub fn sources(spec: &ServiceSpec) -> Vec<String> {
    let mut raw = Vec::new();
    if let Some(p) = &spec.path {
        raw.push(p.clone());
    }
    raw.extend(spec.paths.iter().cloned());
    raw
}

/// Like `sources`, but directories are expanded to individual files and
/// URLs are dropped (they can't be scanned locally for images/kind).
fn expand_local_files(spec: &ServiceSpec) -> Vec<String> {
    let mut files = Vec::new();
    for src in sources(spec) {
        if src.starts_with("http://") || src.starts_with("https://") {
            continue;
        }
        let path = Path::new(&src);
        if path.is_dir() {
            for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
                let p = entry.path();
                if p.is_file() {
                    if let Some(ext) = p.extension().and_then(|e| e.to_str()) {
                        if ext == "yaml" || ext == "yml" {
                            files.push(p.to_string_lossy().into_owned());
                        }
                    }
                }
            }
        } else {
            files.push(src);
        }
    }
    files
}

fn kind_re() -> Regex {
    Regex::new(r"(?m)^kind:\s*(\S+)").unwrap()
}
fn name_re() -> Regex {
    Regex::new(r"(?m)^\s+name:\s*(\S+)").unwrap()
}
fn image_re() -> Regex {
    Regex::new(r#"(?m)image:\s*["']?([^\s"']+)["']?"#).unwrap()
}

/// Best-effort `kind`+`name` extraction per YAML document (`---`
/// separated). Skips a document if either field can't be found rather
/// than erroring — callers treat this as a hint, not ground truth.
pub fn scan_resources(contents: &str) -> Vec<ManifestResource> {
    let kind_re = kind_re();
    let name_re = name_re();
    let mut out = Vec::new();
    for doc in contents.split("\n---") {
        let kind = kind_re.captures(doc).map(|c| c[1].to_string());
        let name = name_re.captures(doc).and_then(|c| {
            // first indented `name:` in the doc is typically metadata.name
            Some(c[1].to_string())
        });
        if let (Some(kind), Some(name)) = (kind, name) {
            out.push(ManifestResource { kind, name });
        }
    }
    out
}

pub fn scan_images(contents: &str) -> Vec<String> {
    let re = image_re();
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for cap in re.captures_iter(contents) {
        let img = cap[1].to_string();
        if seen.insert(img.clone()) {
            out.push(img);
        }
    }
    out
}

/// Read and concatenate every local file a MANIFESTS spec names (for
/// scanning purposes only - not what's passed to `kubectl apply`, which
/// uses `sources()` verbatim so `kubectl` handles directories/URLs
/// itself).
pub async fn read_all(spec: &ServiceSpec) -> Result<String> {
    let mut combined = String::new();
    for file in expand_local_files(spec) {
        if let Ok(contents) = tokio::fs::read_to_string(&file).await {
            combined.push_str(&contents);
            combined.push_str("\n---\n");
        }
    }
    Ok(combined)
}
