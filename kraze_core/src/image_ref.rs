//! Parsing of `registry/repository:tag@digest` image references.
//!
//! Mirrors the shape Docker/containerd references take: an optional
//! registry host, a repository path, an optional tag (defaulting to
//! `latest`), and an optional content digest pinned with `@sha256:...`.

use std::fmt;

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";
pub const LIBRARY_PREFIX: &str = "library";

/// A parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a raw reference string, applying Docker Hub defaults.
    ///
    /// `localhost`, and any first path segment containing `.` or `:`, is
    /// treated as an explicit registry host rather than part of the
    /// repository path.
    pub fn parse(raw: &str) -> ImageReference {
        let (without_digest, digest) = match raw.find('@') {
            Some(idx) => (&raw[..idx], Some(raw[idx + 1..].to_string())),
            None => (raw, None),
        };

        let (before_tag, tag) = split_tag(without_digest);

        let mut parts = before_tag.splitn(2, '/');
        let first = parts.next().unwrap_or("");
        let rest = parts.next();

        let (registry, mut repository) = match rest {
            Some(rest) if is_registry_segment(first) => (first.to_string(), rest.to_string()),
            Some(_) => (DEFAULT_REGISTRY.to_string(), before_tag.to_string()),
            None => (DEFAULT_REGISTRY.to_string(), first.to_string()),
        };

        if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            repository = format!("{}/{}", LIBRARY_PREFIX, repository);
        }

        ImageReference {
            registry,
            repository,
            tag,
            digest,
        }
    }

    /// The reference without its digest, e.g. `docker.io/library/myapp:1.0`.
    pub fn name_and_tag(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name_and_tag())?;
        if let Some(d) = &self.digest {
            write!(f, "@{}", d)?;
        }
        Ok(())
    }
}

fn is_registry_segment(segment: &str) -> bool {
    segment == "localhost" || segment.contains('.') || segment.contains(':')
}

/// Split a `repo:tag`-shaped string into `(repo, tag)`, defaulting the tag.
///
/// A `:` inside a registry port (`localhost:5000/foo`) must not be mistaken
/// for the tag separator, so we only look at the final path segment.
fn split_tag(raw: &str) -> (&str, String) {
    let last_slash = raw.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (head, tail) = raw.split_at(last_slash);
    match tail.rfind(':') {
        Some(idx) => (&raw[..last_slash + idx], tail[idx + 1..].to_string()),
        None => {
            let _ = head;
            (raw, DEFAULT_TAG.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_gets_docker_hub_and_library_defaults() {
        let r = ImageReference::parse("myapp");
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/myapp");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.digest, None);
    }

    #[test]
    fn namespaced_docker_hub_repo_keeps_namespace() {
        let r = ImageReference::parse("bitnami/redis:6.2");
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "bitnami/redis");
        assert_eq!(r.tag, "6.2");
    }

    #[test]
    fn explicit_registry_with_dot_is_recognised() {
        let r = ImageReference::parse("ghcr.io/org/app:v1");
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.tag, "v1");
    }

    #[test]
    fn localhost_registry_with_port_is_recognised() {
        let r = ImageReference::parse("localhost:5000/app:dev");
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag, "dev");
    }

    #[test]
    fn digest_suffix_is_extracted() {
        let r = ImageReference::parse("myapp:1.0@sha256:deadbeef");
        assert_eq!(r.tag, "1.0");
        assert_eq!(r.digest, Some("sha256:deadbeef".to_string()));
    }

    #[test]
    fn digest_only_reference_defaults_tag() {
        let r = ImageReference::parse("ghcr.io/org/app@sha256:cafebabe");
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.tag, "latest");
        assert_eq!(r.digest, Some("sha256:cafebabe".to_string()));
    }

    #[test]
    fn display_round_trips_name_and_tag() {
        let r = ImageReference::parse("bitnami/redis:6.2");
        assert_eq!(r.to_string(), "docker.io/bitnami/redis:6.2");
    }
}
