#![allow(clippy::needless_return)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;

extern crate chrono;
extern crate petgraph;

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;

pub mod error;
pub use error::{Error, ErrorKind, Result};

/// The declared shape of a cluster and its services.
pub mod spec;
pub use spec::{ClusterConfig, Config, ServiceSpec, ServiceType};

/// The persisted document recording what the engine owns.
pub mod state;
pub use state::{ClusterState, ServiceRecord, CURRENT_STATE_VERSION};

/// Image reference parsing.
pub mod image_ref;
pub use image_ref::ImageReference;

/// The dependency DAG: validation and orderings over it.
pub mod graph;
pub use graph::DependencyGraph;

/// Tiny duration-string parser (`"10m"`, `"3s"`).
pub mod duration;
pub use duration::parse_duration;
