//! `DependencyGraph`: build a DAG from `ServiceSpec`s, validate it, and
//! emit orderings over it. Built on `petgraph`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::{ErrorKind, Result};
use crate::spec::ServiceSpec;

/// A DAG of service names with `dependsOn` edges pointing from a service
/// to its dependency (so `petgraph`'s `Direction::Outgoing` from a node
/// reaches its deps, and `Incoming` reaches its dependents).
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    index_of: BTreeMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build a graph over exactly the given specs (already filtered to
    /// the subset of interest). Does not validate — call `validate()`.
    pub fn build(specs: &BTreeMap<String, ServiceSpec>) -> DependencyGraph {
        let mut graph = DiGraph::<String, ()>::new();
        let mut index_of = BTreeMap::new();

        for name in specs.keys() {
            let idx = graph.add_node(name.clone());
            index_of.insert(name.clone(), idx);
        }
        for spec in specs.values() {
            let from = index_of[&spec.name];
            for dep in &spec.depends_on {
                if let Some(&to) = index_of.get(dep) {
                    graph.add_edge(from, to, ());
                }
                // absent deps are reported by validate(), not here
            }
        }

        DependencyGraph { graph, index_of }
    }

    /// Every `dependsOn` target must be present in the
    /// graph, and the graph must be acyclic.
    pub fn validate(&self, specs: &BTreeMap<String, ServiceSpec>) -> Result<()> {
        for spec in specs.values() {
            for dep in &spec.depends_on {
                if !self.index_of.contains_key(dep) {
                    return Err(ErrorKind::MissingDependency(spec.name.clone(), dep.clone()).into());
                }
            }
        }
        if let Some(path) = self.find_cycle() {
            return Err(ErrorKind::Cycle(path.join(" -> ")).into());
        }
        Ok(())
    }

    /// DFS with a recursion stack; on a back-edge, returns the path slice
    /// from the first occurrence of the repeated node through to the
    /// repeat, e.g. `["a", "b", "c", "a"]`.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut stack: Vec<NodeIndex> = Vec::new();

        fn visit(
            node: NodeIndex,
            graph: &DiGraph<String, ()>,
            marks: &mut Vec<Mark>,
            stack: &mut Vec<NodeIndex>,
        ) -> Option<Vec<String>> {
            marks[node.index()] = Mark::InProgress;
            stack.push(node);

            for dep in graph.neighbors_directed(node, Direction::Outgoing) {
                match marks[dep.index()] {
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(dep, graph, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::InProgress => {
                        let start = stack.iter().position(|&n| n == dep).unwrap();
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|&n| graph[n].clone()).collect();
                        path.push(graph[dep].clone());
                        return Some(path);
                    }
                    Mark::Done => {}
                }
            }

            stack.pop();
            marks[node.index()] = Mark::Done;
            None
        }

        for node in self.graph.node_indices() {
            if marks[node.index()] == Mark::Unvisited {
                if let Some(cycle) = visit(node, &self.graph, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    /// Stable topological order, dependencies before dependents.
    pub fn topological_order(&self) -> Vec<String> {
        self.levels().into_iter().flatten().collect()
    }

    /// `ReverseOrder` is exactly `TopologicalOrder` reversed.
    pub fn reverse_order(&self) -> Vec<String> {
        let mut order = self.topological_order();
        order.reverse();
        order
    }

    /// Kahn-style in-degree relaxation, grouped into levels: `L0` is every
    /// node with no remaining dependencies; `Lk` is every node whose
    /// dependencies all lie in `L0..L_{k-1}`. Ties within a level are
    /// emitted in a stable (name-sorted) order for determinism, though
    /// callers shouldn't rely on any particular ordering between them.
    pub fn levels(&self) -> Vec<Vec<String>> {
        let mut remaining_deps: BTreeMap<NodeIndex, usize> = BTreeMap::new();
        for node in self.graph.node_indices() {
            remaining_deps.insert(node, self.graph.neighbors_directed(node, Direction::Outgoing).count());
        }

        let mut levels = Vec::new();
        let mut satisfied: BTreeSet<NodeIndex> = BTreeSet::new();

        while satisfied.len() < self.graph.node_count() {
            let mut this_level: Vec<(String, NodeIndex)> = remaining_deps
                .iter()
                .filter(|(node, &count)| !satisfied.contains(node) && count == 0)
                .map(|(&node, _)| (self.graph[node].clone(), node))
                .collect();

            if this_level.is_empty() {
                // Only reachable if validate() was skipped and a cycle
                // remains; stop rather than loop forever.
                break;
            }

            this_level.sort_by(|a, b| a.0.cmp(&b.0));
            let mut level_names = Vec::with_capacity(this_level.len());
            for (name, node) in &this_level {
                satisfied.insert(*node);
                level_names.push(name.clone());
            }

            // relax in-degree for dependents of this level's nodes
            for (_, node) in &this_level {
                for dependent in self.graph.neighbors_directed(*node, Direction::Incoming) {
                    if let Some(count) = remaining_deps.get_mut(&dependent) {
                        *count -= 1;
                    }
                }
            }

            levels.push(level_names);
        }

        levels
    }

    /// Transitive closure of `seeds`: every seed plus all of its
    /// transitive dependencies.
    pub fn closure(&self, seeds: &BTreeSet<String>) -> BTreeSet<String> {
        let mut result: BTreeSet<String> = seeds.clone();
        let mut queue: VecDeque<String> = seeds.iter().cloned().collect();

        while let Some(name) = queue.pop_front() {
            if let Some(&idx) = self.index_of.get(&name) {
                for dep in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                    let dep_name = self.graph[dep].clone();
                    if result.insert(dep_name.clone()) {
                        queue.push_back(dep_name);
                    }
                }
            }
        }
        result
    }

    /// `ClosureNoDeps`: just the seeds, unchanged. Exists so callers can
    /// switch expansion behavior (`--no-deps`) without branching on the
    /// call site.
    pub fn closure_no_deps(seeds: &BTreeSet<String>) -> BTreeSet<String> {
        seeds.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ServiceType;

    fn spec(name: &str, deps: &[&str]) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            service_type: ServiceType::Helm,
            namespace: "default".into(),
            create_namespace: true,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            labels: Default::default(),
            enabled: true,
            wait: None,
            wait_timeout: None,
            post_ready_delay: "3s".into(),
            chart: None,
            repo: None,
            version: None,
            values: vec![],
            values_inline: None,
            path: None,
            paths: vec![],
        }
    }

    fn specs(pairs: &[(&str, &[&str])]) -> BTreeMap<String, ServiceSpec> {
        pairs
            .iter()
            .map(|(name, deps)| (name.to_string(), spec(name, deps)))
            .collect()
    }

    #[test]
    fn linear_chain_orders_deps_before_dependents() {
        let s = specs(&[("db", &[]), ("api", &["db"]), ("web", &["api"])]);
        let g = DependencyGraph::build(&s);
        g.validate(&s).unwrap();
        let order = g.topological_order();
        assert!(order.iter().position(|n| n == "db") < order.iter().position(|n| n == "api"));
        assert!(order.iter().position(|n| n == "api") < order.iter().position(|n| n == "web"));
        assert_eq!(g.levels(), vec![vec!["db"], vec!["api"], vec!["web"]]);
    }

    #[test]
    fn every_edge_respects_index_order_property() {
        let s = specs(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["a", "b"]),
            ("d", &["c"]),
        ]);
        let g = DependencyGraph::build(&s);
        g.validate(&s).unwrap();
        let order = g.topological_order();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        for spec in s.values() {
            for dep in &spec.depends_on {
                assert!(pos(dep) < pos(&spec.name), "{} should precede {}", dep, spec.name);
            }
        }
    }

    #[test]
    fn levels_partition_respects_dependency_levels() {
        let s = specs(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]);
        let g = DependencyGraph::build(&s);
        g.validate(&s).unwrap();
        let levels = g.levels();
        assert_eq!(levels[0], vec!["a", "b"]);
        assert_eq!(levels[1], vec!["c"]);
    }

    #[test]
    fn missing_dependency_is_reported() {
        let s = specs(&[("api", &["db"])]);
        let g = DependencyGraph::build(&s);
        let err = g.validate(&s).unwrap_err();
        match err.0 {
            ErrorKind::MissingDependency(svc, missing) => {
                assert_eq!(svc, "api");
                assert_eq!(missing, "db");
            }
            other => panic!("wrong error kind: {:?}", other),
        }
    }

    #[test]
    fn cycle_is_detected_with_readable_path() {
        let s = specs(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let g = DependencyGraph::build(&s);
        let err = g.validate(&s).unwrap_err();
        match err.0 {
            ErrorKind::Cycle(path) => {
                let nodes: Vec<&str> = path.split(" -> ").collect();
                assert_eq!(nodes.first(), nodes.last());
                assert!(nodes.len() >= 2);
            }
            other => panic!("wrong error kind: {:?}", other),
        }
    }

    #[test]
    fn acyclic_graph_never_reports_a_cycle() {
        let s = specs(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        let g = DependencyGraph::build(&s);
        assert!(g.validate(&s).is_ok());
    }

    #[test]
    fn closure_contains_seeds_and_transitive_deps() {
        let s = specs(&[("db", &[]), ("cache", &[]), ("api", &["db", "cache"]), ("web", &["api"])]);
        let g = DependencyGraph::build(&s);
        let seeds: BTreeSet<String> = ["web".to_string()].into_iter().collect();
        let closure = g.closure(&seeds);
        assert!(closure.is_superset(&seeds));
        assert!(closure.contains("api"));
        assert!(closure.contains("db"));
        assert!(closure.contains("cache"));
    }

    #[test]
    fn closure_no_deps_returns_only_seeds() {
        let seeds: BTreeSet<String> = ["web".to_string()].into_iter().collect();
        assert_eq!(DependencyGraph::closure_no_deps(&seeds), seeds);
    }

    #[test]
    fn reverse_order_is_exact_reverse_of_topological_order() {
        let s = specs(&[("db", &[]), ("api", &["db"]), ("web", &["api"])]);
        let g = DependencyGraph::build(&s);
        let mut fwd = g.topological_order();
        let rev = g.reverse_order();
        fwd.reverse();
        assert_eq!(fwd, rev);
    }
}
