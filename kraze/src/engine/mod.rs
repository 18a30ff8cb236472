//! `Engine`: the convergence loop. Level-parallel installs over the
//! `DependencyGraph`, image work and state writes serialized behind
//! their own locks, first-error cancellation within a level. Workers are
//! spawned per level, their results collected over a stream, with only
//! the first error kept and the rest logged and discarded.
//!
//! The production entry points (`up`/`down`) build a real cluster
//! connection, `StateStore`, `ImageTracker` and `KubectlNamespaceBackend`;
//! the `_with` variants take those as arguments so tests can substitute
//! hand-rolled fakes for the `Provider`, `StateBackend`, `ImageBackend`
//! and `NamespaceBackend` collaborators without a live cluster.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Mutex;

use kraze_core::{parse_duration, ClusterState, Config, DependencyGraph, ServiceSpec};

use crate::cluster;
use crate::error::{Error, ErrorKind, Result};
use crate::image::ImageTracker;
use crate::kubectl::{KubectlNamespaceBackend, NamespaceBackend};
use crate::provider::{self, Provider, ProviderOptions};
use crate::state_store::{StateBackend, StateStore};

pub mod teardown;

/// Inter-level quiescence delay, letting service endpoints propagate
/// between levels. A constant rather than readiness-probe-derived; a
/// future revision could compute it from readiness probes instead.
pub const QUIESCENCE_DELAY: Duration = Duration::from_secs(3);

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_POST_READY_DELAY: Duration = Duration::from_secs(3);

/// Picks the concrete `Provider` for a spec. A plain fn pointer (not a
/// closure) so it's trivially `Copy` into spawned workers.
pub type ProviderFactory = fn(&ServiceSpec) -> Box<dyn Provider>;

/// Service-name or label filter, plus the `--no-deps` modifier. Exactly
/// one of `names`/`labels` may be non-empty; combining both raises a
/// `ConfigError` in `Engine::resolve_filter`.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub names: Vec<String>,
    pub labels: Vec<(String, String)>,
    pub no_deps: bool,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub dry_run: bool,
    pub wait: bool,
    pub wait_timeout: Duration,
    pub keep_crds: bool,
    pub quiet: bool,
}

impl Default for EngineOptions {
    fn default() -> EngineOptions {
        EngineOptions {
            dry_run: false,
            wait: true,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            keep_crds: false,
            quiet: false,
        }
    }
}

/// What `Engine::up` produced. A dry run never touches the cluster or
/// the state store, so it gets its own variant rather than a fake state.
#[derive(Debug)]
pub enum UpOutcome {
    DryRun { subset: Vec<String> },
    Completed(ClusterState),
}

pub struct Engine {
    pub config: Config,
    pub opts: EngineOptions,
    provider_factory: ProviderFactory,
}

impl Engine {
    pub fn new(config: Config, opts: EngineOptions) -> Engine {
        Engine {
            config,
            opts,
            provider_factory: provider::for_spec,
        }
    }

    /// For tests: substitute a fake `Provider` per service type instead
    /// of the real Helm/kubectl-backed ones.
    pub fn with_provider_factory(config: Config, opts: EngineOptions, provider_factory: ProviderFactory) -> Engine {
        Engine { config, opts, provider_factory }
    }

    /// Resolve a filter to the service subset that will actually be
    /// touched: a label filter always expands via the dependency
    /// closure, a name filter expands via closure unless `--no-deps`.
    fn resolve_filter(&self, filter: &Filter) -> Result<BTreeSet<String>> {
        if !filter.names.is_empty() && !filter.labels.is_empty() {
            return Err(ErrorKind::ConfigError(
                "cannot filter by both service names and label selectors".to_string(),
            )
            .into());
        }
        if filter.no_deps && filter.names.is_empty() {
            return Err(
                ErrorKind::ConfigError("--no-deps requires explicit service names".to_string()).into(),
            );
        }

        let seeds: BTreeSet<String> = if !filter.names.is_empty() {
            for name in &filter.names {
                if !self.config.services.contains_key(name) {
                    return Err(ErrorKind::ConfigError(format!("unknown service '{}'", name)).into());
                }
            }
            filter.names.iter().cloned().collect()
        } else if !filter.labels.is_empty() {
            let mut matched = BTreeSet::new();
            for (key, value) in &filter.labels {
                matched.extend(self.config.label_matches(key, value));
            }
            matched
        } else {
            self.config.services.keys().cloned().collect()
        };

        let graph = DependencyGraph::build(&self.config.services);
        let subset = if !filter.labels.is_empty() {
            // label filter expands via closure always, even under --no-deps
            graph.closure(&seeds)
        } else if filter.no_deps {
            DependencyGraph::closure_no_deps(&seeds)
        } else if !filter.names.is_empty() {
            graph.closure(&seeds)
        } else {
            seeds
        };
        Ok(subset)
    }

    /// Step 2: drop disabled services, and (for `--no-deps`) clear
    /// `dependsOn` so ordering ignores dependencies outside the subset.
    fn subset_specs(&self, subset: &BTreeSet<String>, clear_deps: bool) -> BTreeMap<String, ServiceSpec> {
        let mut specs: BTreeMap<String, ServiceSpec> = subset
            .iter()
            .filter_map(|name| self.config.services.get(name).cloned())
            .filter(|s| s.enabled)
            .map(|s| (s.name.clone(), s))
            .collect();
        if clear_deps {
            for spec in specs.values_mut() {
                spec.clear_deps();
            }
        }
        specs
    }

    fn dry_run_outcome(&self, specs: &BTreeMap<String, ServiceSpec>) -> UpOutcome {
        let mut names: Vec<String> = specs.keys().cloned().collect();
        names.sort();
        info!("dry run: would install {} service(s): {}", names.len(), names.join(", "));
        UpOutcome::DryRun { subset: names }
    }

    /// Production UP entry point: connects to the real cluster, loads
    /// the real `kraze-metadata` ConfigMap, and probes images via the
    /// real container engine.
    pub async fn up(&self, filter: Filter) -> Result<UpOutcome> {
        let subset = self.resolve_filter(&filter)?;
        let specs = self.subset_specs(&subset, filter.no_deps);
        if self.opts.dry_run {
            return Ok(self.dry_run_outcome(&specs));
        }

        cluster::ensure_reachable().await?;
        let backend: Arc<dyn StateBackend> = Arc::new(StateStore::new().await?);
        let namespaces: Arc<dyn NamespaceBackend> = Arc::new(KubectlNamespaceBackend);
        let image_tracker = Arc::new(ImageTracker::new(
            &self.config.cluster.name,
            self.config.cluster.is_external,
        ));
        self.run_up(specs, filter.no_deps, image_tracker, backend, namespaces).await
    }

    /// UP with injected collaborators, for tests: no cluster connection
    /// is made here.
    pub async fn up_with(
        &self,
        filter: Filter,
        image_tracker: Arc<ImageTracker>,
        backend: Arc<dyn StateBackend>,
        namespaces: Arc<dyn NamespaceBackend>,
    ) -> Result<UpOutcome> {
        let subset = self.resolve_filter(&filter)?;
        let specs = self.subset_specs(&subset, filter.no_deps);
        if self.opts.dry_run {
            return Ok(self.dry_run_outcome(&specs));
        }
        self.run_up(specs, filter.no_deps, image_tracker, backend, namespaces).await
    }

    async fn run_up(
        &self,
        specs: BTreeMap<String, ServiceSpec>,
        no_deps: bool,
        image_tracker: Arc<ImageTracker>,
        backend: Arc<dyn StateBackend>,
        namespaces: Arc<dyn NamespaceBackend>,
    ) -> Result<UpOutcome> {
        let graph = DependencyGraph::build(&specs);
        if !no_deps {
            graph.validate(&specs)?;
        }
        let levels = graph.levels();

        let initial = backend
            .load()
            .await?
            .unwrap_or_else(|| ClusterState::new(&self.config.cluster.name, self.config.cluster.is_external));
        let state_lock = Arc::new(Mutex::new(initial));

        let image_lock = Arc::new(Mutex::new(()));
        let base_opts = ProviderOptions {
            cluster_name: self.config.cluster.name.clone(),
            wait: self.opts.wait,
            wait_timeout: self.opts.wait_timeout,
            keep_crds: self.opts.keep_crds,
            quiet: self.opts.quiet,
        };
        let provider_factory = self.provider_factory;

        for (level_idx, level) in levels.iter().enumerate() {
            let cancelled = Arc::new(AtomicBool::new(false));
            let mut workers = FuturesUnordered::new();

            for name in level {
                let spec = specs[name].clone();
                let image_tracker = image_tracker.clone();
                let image_lock = image_lock.clone();
                let state_lock = state_lock.clone();
                let backend = backend.clone();
                let namespaces = namespaces.clone();
                let base_opts = base_opts.clone();
                let cancelled = cancelled.clone();
                let name = name.clone();
                workers.push(async move {
                    let result = install_one(
                        &spec,
                        provider_factory,
                        &image_tracker,
                        &image_lock,
                        &state_lock,
                        &backend,
                        &namespaces,
                        &base_opts,
                        &cancelled,
                    )
                    .await;
                    (name, result)
                });
            }

            let mut first_error: Option<(String, Error)> = None;
            while let Some((name, result)) = workers.next().await {
                if let Err(e) = result {
                    if first_error.is_none() {
                        cancelled.store(true, Ordering::SeqCst);
                        first_error = Some((name, e));
                    }
                }
            }

            if let Some((name, e)) = first_error {
                return Err(Error::from(format!(
                    "level {} failed: service '{}': {}",
                    level_idx, name, e
                )));
            }

            if level_idx + 1 < levels.len() {
                tokio::time::delay_for(QUIESCENCE_DELAY).await;
            }
        }

        let final_state = state_lock.lock().await.clone();
        Ok(UpOutcome::Completed(final_state))
    }
}

/// The full per-service UP sequence: resolve effective wait settings,
/// sync images, check namespace existence, install, then persist the
/// result. Checks `cancelled` before every suspension point expensive
/// enough to matter (image work, install) so a level-mate's failure
/// short-circuits promptly.
#[allow(clippy::too_many_arguments)]
async fn install_one(
    spec: &ServiceSpec,
    provider_factory: ProviderFactory,
    image_tracker: &Arc<ImageTracker>,
    image_lock: &Arc<Mutex<()>>,
    state_lock: &Arc<Mutex<ClusterState>>,
    backend: &Arc<dyn StateBackend>,
    namespaces: &Arc<dyn NamespaceBackend>,
    base_opts: &ProviderOptions,
    cancelled: &Arc<AtomicBool>,
) -> Result<()> {
    if cancelled.load(Ordering::SeqCst) {
        bail!("cancelled before starting");
    }

    // a. effective wait / timeout / post-ready delay: service overrides engine flag
    let wait = spec.wait.unwrap_or(base_opts.wait);
    let wait_timeout = spec
        .wait_timeout
        .as_deref()
        .and_then(parse_duration)
        .unwrap_or(base_opts.wait_timeout);
    let post_ready_delay = parse_duration(&spec.post_ready_delay).unwrap_or(DEFAULT_POST_READY_DELAY);
    let opts = ProviderOptions {
        cluster_name: base_opts.cluster_name.clone(),
        wait,
        wait_timeout,
        keep_crds: base_opts.keep_crds,
        quiet: base_opts.quiet,
    };

    // b. provider
    let provider = provider_factory(spec);

    // c. extract images, lock-free; extraction failure downgrades to an
    // empty set with a warning rather than failing the install
    let images = match image_tracker.extract(spec).await {
        Ok(images) => images,
        Err(e) => {
            warn!("image extraction failed for {} (continuing with empty image set): {}", spec.name, e);
            Vec::new()
        }
    };

    if cancelled.load(Ordering::SeqCst) {
        bail!("cancelled before image sync");
    }

    // d. acquire the image lock; sync each image; release before install
    let prior_hashes = {
        let state = state_lock.lock().await;
        state
            .services
            .get(&spec.name)
            .map(|r| r.image_hashes.clone())
            .unwrap_or_default()
    };
    let mut observed_hashes = BTreeMap::new();
    {
        let _guard = image_lock.lock().await;
        for image in &images {
            if cancelled.load(Ordering::SeqCst) {
                bail!("cancelled during image sync");
            }
            let digest = image_tracker.sync_image(image, &prior_hashes).await?;
            if !digest.is_empty() {
                observed_hashes.insert(image.clone(), digest);
            } else if let Some(prior) = prior_hashes.get(image) {
                observed_hashes.insert(image.clone(), prior.clone());
            }
        }
    }

    if cancelled.load(Ordering::SeqCst) {
        bail!("cancelled before install");
    }

    // e. namespace existence
    let exists = namespaces.namespace_exists(&spec.namespace).await.unwrap_or(true);
    let will_create = !exists && spec.create_namespace;

    // f. install
    provider
        .install(spec, &opts)
        .await
        .map_err(|e| Error::from(ErrorKind::ProviderError(spec.name.clone(), e.to_string())))?;

    // g. state lock: mark installed with the freshly observed hashes, then save.
    // a save failure here is a warning, not fatal: the install already
    // succeeded and the next run reconciles against cluster truth.
    {
        let mut state = state_lock.lock().await;
        state.mark_installed_with_images(&spec.name, &spec.namespace, will_create, observed_hashes);
        if let Err(e) = backend.save(&mut state).await {
            warn!("state save failed for {} (non-fatal, next run reconciles): {}", spec.name, e);
        }
    }

    // h. post-ready delay
    tokio::time::delay_for(post_ready_delay).await;
    Ok(())
}
