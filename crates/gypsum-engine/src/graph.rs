//! The cross-target dependency graph.
//!
//! Edges point from a dependent to each of its dependencies. Every target that declares no
//! dependencies gets an edge to a single root sentinel, so walking the root's dependents yields
//! exactly the targets that can be built first.

use std::collections::VecDeque;

use fxhash::{FxHashMap, FxHashSet};
use gypsum_syntax::{Mapping, Value};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::errors::{EngineError, EngineResult};
use crate::target::{QualifiedName, dependency_list, flag_value};

/// Target types whose output is a finished link product.
pub const LINKABLE_TYPES: &[&str] = &["executable", "shared_library", "loadable_module"];

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum GraphNode {
    Root,
    Target(QualifiedName),
}

impl GraphNode {
    pub fn target(&self) -> Option<&QualifiedName> {
        match self {
            GraphNode::Root => None,
            GraphNode::Target(name) => Some(name),
        }
    }
}

pub type Targets = IndexMap<QualifiedName, Mapping>;

/// The `type` of `name`, which every target must have.
pub fn target_type<'t>(targets: &'t Targets, name: &QualifiedName) -> EngineResult<&'t str> {
    targets
        .get(name)
        .and_then(|t| t.get("type"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            EngineError::InvalidTarget {
                target: name.to_string(),
                message: String::from("missing 'type' field"),
            }
            .into()
        })
}

pub struct DependencyGraph {
    graph: DiGraph<GraphNode, ()>,
    root: NodeIndex,
    nodes: FxHashMap<QualifiedName, NodeIndex>,
}

impl DependencyGraph {
    /// Build the graph from qualified `dependencies` lists.
    pub fn build(targets: &Targets) -> EngineResult<Self> {
        let mut graph = DiGraph::new();
        let root = graph.add_node(GraphNode::Root);

        let nodes: FxHashMap<QualifiedName, NodeIndex> = targets
            .keys()
            .map(|name| (name.clone(), graph.add_node(GraphNode::Target(name.clone()))))
            .collect();

        for (name, target) in targets {
            let index = nodes[name];
            let dependencies = dependency_list(target, "dependencies");
            if dependencies.is_empty() {
                graph.add_edge(index, root, ());
            }
            for dependency in dependencies {
                let Some(&dep_index) = nodes.get(&dependency) else {
                    return Err(EngineError::MissingDependencyTarget {
                        dependency: dependency.to_string(),
                        target: name.to_string(),
                    }
                    .into());
                };
                graph.add_edge(index, dep_index, ());
            }
        }

        Ok(DependencyGraph { graph, root, nodes })
    }

    fn index(&self, name: &QualifiedName) -> EngineResult<NodeIndex> {
        self.nodes.get(name).copied().ok_or_else(|| {
            anyhow::anyhow!("{name} is not part of the dependency graph")
        })
    }

    /// Neighbors in the order their edges were added. petgraph walks adjacency lists newest
    /// first.
    fn neighbors(&self, index: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors = self.graph.neighbors_directed(index, direction).collect_vec();
        neighbors.reverse();
        neighbors
    }

    fn dependency_indices(&self, index: NodeIndex) -> Vec<NodeIndex> {
        self.neighbors(index, Direction::Outgoing)
            .into_iter()
            .filter(|i| *i != self.root)
            .collect()
    }

    fn name(&self, index: NodeIndex) -> Option<&QualifiedName> {
        self.graph[index].target()
    }

    /// Order every target so that each appears after all of its dependencies.
    ///
    /// Starts from the targets without dependencies, in declaration order, and releases a
    /// dependent as soon as the last of its dependencies has been placed.
    pub fn flatten(&self) -> EngineResult<Vec<QualifiedName>> {
        let mut flat: IndexSet<NodeIndex> = IndexSet::new();
        let mut queued: FxHashSet<NodeIndex> = FxHashSet::default();
        let mut ready: VecDeque<NodeIndex> = VecDeque::new();

        for dependent in self.neighbors(self.root, Direction::Incoming) {
            if queued.insert(dependent) {
                ready.push_back(dependent);
            }
        }

        while let Some(index) = ready.pop_front() {
            flat.insert(index);

            for dependent in self.neighbors(index, Direction::Incoming) {
                if queued.contains(&dependent) {
                    continue;
                }
                let satisfied = self
                    .dependency_indices(dependent)
                    .iter()
                    .all(|d| flat.contains(d));
                if satisfied {
                    queued.insert(dependent);
                    ready.push_back(dependent);
                }
            }
        }

        if flat.len() != self.nodes.len() {
            let unreached = self
                .nodes
                .iter()
                .filter(|(_, index)| !flat.contains(*index))
                .map(|(name, _)| name.to_string())
                .sorted()
                .collect_vec();
            return Err(EngineError::Cycle { unreached }.into());
        }

        let order = flat
            .into_iter()
            .filter_map(|index| self.name(index).cloned())
            .collect_vec();
        debug!(order = %order.iter().join(" "), "flattened dependency graph");
        Ok(order)
    }

    /// Declared dependencies of `name`, in declaration order.
    pub fn direct_dependencies(&self, name: &QualifiedName) -> EngineResult<Vec<QualifiedName>> {
        let index = self.index(name)?;
        Ok(self
            .dependency_indices(index)
            .into_iter()
            .filter_map(|i| self.name(i).cloned())
            .collect())
    }

    /// Direct dependencies plus what they re-export through `export_dependent_settings`. A
    /// re-exported target is inserted right after the target exporting it, and its own exports
    /// are considered in turn.
    pub fn direct_and_imported_dependencies(
        &self,
        name: &QualifiedName,
        targets: &Targets,
    ) -> EngineResult<Vec<QualifiedName>> {
        let mut dependencies = self.direct_dependencies(name)?;

        let mut index = 0;
        while index < dependencies.len() {
            let exports = targets
                .get(&dependencies[index])
                .map(|t| dependency_list(t, "export_dependent_settings"))
                .unwrap_or_default();

            let mut insert_at = index + 1;
            for exported in exports {
                if !dependencies.contains(&exported) {
                    dependencies.insert(insert_at, exported);
                    insert_at += 1;
                }
            }
            index += 1;
        }

        Ok(dependencies)
    }

    /// Every transitive dependency of `name`, each placed after its own dependencies.
    pub fn deep_dependencies(&self, name: &QualifiedName) -> EngineResult<Vec<QualifiedName>> {
        fn visit(graph: &DependencyGraph, index: NodeIndex, out: &mut IndexSet<NodeIndex>) {
            for dependency in graph.dependency_indices(index) {
                if !out.contains(&dependency) {
                    visit(graph, dependency, out);
                    out.insert(dependency);
                }
            }
        }

        let mut out = IndexSet::new();
        visit(self, self.index(name)?, &mut out);
        Ok(out
            .into_iter()
            .filter_map(|i| self.name(i).cloned())
            .collect())
    }

    /// The targets whose output ends up in the link of `name`, including `name` itself.
    ///
    /// Empty when `name` is not linkable. Static libraries and other intermediate targets are
    /// walked through; linkable dependencies are included but not walked, since they are linked
    /// already. Executables and loadable modules are never link inputs. Shared libraries are
    /// skipped unless `include_shared_libraries` is set. A `none` target with
    /// `dependencies_traverse: 0` is included but not walked.
    pub fn link_dependencies(
        &self,
        name: &QualifiedName,
        targets: &Targets,
        include_shared_libraries: bool,
    ) -> EngineResult<Vec<QualifiedName>> {
        let mut out = IndexSet::new();
        self.collect_link_dependencies(name, targets, include_shared_libraries, true, &mut out)?;
        Ok(out.into_iter().collect())
    }

    fn collect_link_dependencies(
        &self,
        name: &QualifiedName,
        targets: &Targets,
        include_shared_libraries: bool,
        initial: bool,
        out: &mut IndexSet<QualifiedName>,
    ) -> EngineResult<()> {
        let target_type = target_type(targets, name)?;
        let linkable = LINKABLE_TYPES.contains(&target_type);

        if initial && !linkable {
            return Ok(());
        }

        if target_type == "none"
            && !flag_value(targets[name].get("dependencies_traverse")).unwrap_or(true)
        {
            out.insert(name.clone());
            return Ok(());
        }

        if !initial && matches!(target_type, "executable" | "loadable_module") {
            return Ok(());
        }

        if !initial && target_type == "shared_library" && !include_shared_libraries {
            return Ok(());
        }

        if out.insert(name.clone()) && (initial || !linkable) {
            for dependency in self.direct_dependencies(name)? {
                self.collect_link_dependencies(
                    &dependency,
                    targets,
                    include_shared_libraries,
                    false,
                    out,
                )?;
            }
        }

        Ok(())
    }
}

/// Reject cycles between units: unit A holding a target that depends on a target in unit B, and
/// B (transitively) depending back on A. References within one unit are ignored.
pub fn check_unit_cycles(targets: &Targets) -> EngineResult<()> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut units: FxHashMap<&str, NodeIndex> = FxHashMap::default();
    for name in targets.keys() {
        units
            .entry(name.unit.as_str())
            .or_insert_with(|| graph.add_node(name.unit.as_str()));
    }

    for (name, target) in targets {
        let from = units[name.unit.as_str()];
        for dependency in dependency_list(target, "dependencies") {
            if dependency.unit == name.unit {
                continue;
            }
            let Some(&to) = units.get(dependency.unit.as_str()) else {
                return Err(EngineError::MissingDependencyTarget {
                    dependency: dependency.to_string(),
                    target: name.to_string(),
                }
                .into());
            };
            if !graph.contains_edge(from, to) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let cyclic = tarjan_scc(&graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .flatten()
        .map(|index| graph[index].to_string())
        .sorted()
        .collect_vec();

    if !cyclic.is_empty() {
        return Err(EngineError::UnitCycle { units: cyclic }.into());
    }
    Ok(())
}
