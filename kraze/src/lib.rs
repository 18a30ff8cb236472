#![recursion_limit = "1024"]

#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;

extern crate chrono;
extern crate regex;
extern crate walkdir;
extern crate which;

#[macro_use]
extern crate log;

#[macro_use]
extern crate error_chain;

extern crate kraze_core;

pub mod error;
pub use error::{Error, ErrorKind, Result};

/// Checked before shelling out to an external binary so a missing
/// executable surfaces as a clean message instead of a raw `io::Error`
/// from `Command::status()`/`output()`. Mirrors `provider::helm::hexists`,
/// generalized since `kubectl`/`docker`/`kind` each need the same check.
pub(crate) fn require_executable(name: &str) -> Result<()> {
    if which::which(name).is_err() {
        bail!("{} executable not found in PATH", name);
    }
    Ok(())
}

/// Cluster reachability check.
pub mod cluster;

/// A small CLI kubectl interface.
pub mod kubectl;

/// Regex scanning over raw manifest YAML for resource identity and
/// image references.
pub mod manifest_scan;

/// `Provider`: the Helm/manifests install adapter.
pub mod provider;

/// `ImageTracker`: host/cluster image digest probing and sync decisions.
pub mod image;

/// `StateStore`: the `kraze-metadata` ConfigMap.
pub mod state_store;

/// `Engine`: the UP/DOWN convergence loop.
pub mod engine;

pub use engine::{Engine, EngineOptions, Filter, UpOutcome};
