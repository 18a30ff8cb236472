//! DOWN sequence: best-effort reverse-order uninstall, then namespace
//! garbage collection. Destructive cluster operations here log and
//! continue rather than abort a multi-resource sweep over one failure.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use kraze_core::{ClusterState, DependencyGraph};

use super::{Engine, ProviderFactory};
use crate::cluster;
use crate::engine::Filter;
use crate::error::{ErrorKind, Result};
use crate::kubectl::{KubectlNamespaceBackend, NamespaceBackend};
use crate::provider::ProviderOptions;
use crate::state_store::{StateBackend, StateStore};

impl Engine {
    /// Order to uninstall in: user-given names in the order given, label
    /// matches in arbitrary (name-sorted) order, or reverse topological
    /// order over every currently-installed service when no filter is
    /// given. No dependency expansion in any case — DOWN removes exactly
    /// what's named.
    fn resolve_down_order(&self, filter: &Filter, state: &ClusterState) -> Result<Vec<String>> {
        if !filter.names.is_empty() && !filter.labels.is_empty() {
            return Err(ErrorKind::ConfigError(
                "cannot filter by both service names and label selectors".to_string(),
            )
            .into());
        }
        if !filter.names.is_empty() {
            return Ok(filter.names.clone());
        }
        if !filter.labels.is_empty() {
            let mut matched = BTreeSet::new();
            for (key, value) in &filter.labels {
                matched.extend(self.config.label_matches(key, value));
            }
            return Ok(matched.into_iter().collect());
        }
        let graph = DependencyGraph::build(&self.config.services);
        let mut order: Vec<String> = graph
            .reverse_order()
            .into_iter()
            .filter(|name| state.is_installed(name))
            .collect();
        // installed services the graph has no node for (removed from
        // config since they were installed) have no ordering info to
        // sort by; tack them on at the end rather than dropping them,
        // so a plain `kraze down` still sweeps them up.
        for name in state.services.keys() {
            if !self.config.services.contains_key(name) {
                order.push(name.clone());
            }
        }
        Ok(order)
    }

    /// Production DOWN entry point: connects to the real cluster and the
    /// real `kraze-metadata` ConfigMap.
    pub async fn down(&self, filter: Filter) -> Result<ClusterState> {
        cluster::ensure_reachable().await?;
        let backend: Arc<dyn StateBackend> = Arc::new(StateStore::new().await?);
        let namespaces: Arc<dyn NamespaceBackend> = Arc::new(KubectlNamespaceBackend);
        self.down_with(filter, backend, namespaces).await
    }

    /// DOWN with injected collaborators, for tests: no cluster connection
    /// is made here. Uses the provider factory set on this `Engine` (real
    /// by default, substitutable via `with_provider_factory`).
    pub async fn down_with(
        &self,
        filter: Filter,
        backend: Arc<dyn StateBackend>,
        namespaces: Arc<dyn NamespaceBackend>,
    ) -> Result<ClusterState> {
        let mut state = backend
            .load()
            .await?
            .unwrap_or_else(|| ClusterState::new(&self.config.cluster.name, self.config.cluster.is_external));

        let order = self.resolve_down_order(&filter, &state)?;

        // namespace candidates computed from state before any uninstall,
        // so the mutation loop below can't lose them
        let owned = state.namespaces_owned_by(&order);
        let provider_factory: ProviderFactory = self.provider_factory;

        for name in &order {
            let spec = match self.config.services.get(name) {
                Some(s) => s,
                None => {
                    warn!("'{}' is recorded as installed but no longer declared; skipping uninstall", name);
                    continue;
                }
            };
            if !state.is_installed(name) {
                continue;
            }

            let provider = provider_factory(spec);
            let opts = ProviderOptions {
                cluster_name: self.config.cluster.name.clone(),
                wait: self.opts.wait,
                wait_timeout: self.opts.wait_timeout,
                keep_crds: self.opts.keep_crds,
                quiet: self.opts.quiet,
            };
            if let Err(e) = provider.uninstall(spec, &opts).await {
                warn!("uninstall of {} failed (teardown is best-effort, continuing): {}", name, e);
            }

            state.mark_uninstalled(name);
            if let Err(e) = backend.save(&mut state).await {
                warn!("state save failed after uninstalling {} (non-fatal): {}", name, e);
            }
        }

        gc_namespaces(&owned, namespaces.as_ref()).await;
        Ok(state)
    }
}

/// For each namespace this teardown might own: delete PVCs, re-check
/// emptiness, delete only if empty and unused by any other installed
/// service. Anything else is left alone with a warning, never fatal.
async fn gc_namespaces(owned: &BTreeMap<String, usize>, namespaces: &dyn NamespaceBackend) {
    for (namespace, other_installed_count) in owned {
        if *other_installed_count > 0 {
            warn!(
                "namespace {} left alone: {} other installed service(s) still use it",
                namespace, other_installed_count
            );
            continue;
        }
        if let Err(e) = namespaces.delete_pvcs(namespace).await {
            warn!("PVC sweep failed for namespace {} (non-fatal): {}", namespace, e);
        }
        match namespaces.namespace_is_empty(namespace).await {
            Ok(true) => {
                if let Err(e) = namespaces.delete_namespace(namespace).await {
                    warn!("failed to delete namespace {} (non-fatal): {}", namespace, e);
                }
            }
            Ok(false) => warn!("namespace {} left alone: not empty after PVC sweep", namespace),
            Err(e) => warn!("could not check namespace {} emptiness (non-fatal): {}", namespace, e),
        }
    }
}
