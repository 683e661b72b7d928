//! Dependency graph types and operations

use kiln_errors::{Error, ResolveError};
use kiln_recipe::Recipe;
use kiln_types::{NodeContext, Options, PackageRef, RequirementKind, Settings, Version};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Graph node identity: one recipe version built for one context
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId {
    pub name: String,
    pub version: Version,
    pub context: NodeContext,
}

impl NodeId {
    pub fn new(name: impl Into<String>, version: Version, context: NodeContext) -> Self {
        Self {
            name: name.into(),
            version,
            context,
        }
    }

    #[must_use]
    pub fn package_ref(&self) -> PackageRef {
        PackageRef::new(self.name.clone(), self.version.clone())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.context {
            NodeContext::Target => write!(f, "{}/{}", self.name, self.version),
            NodeContext::Tool => write!(f, "{}/{} (tool)", self.name, self.version),
        }
    }
}

/// Resolved dependency node
#[derive(Clone, Debug)]
pub struct ResolvedNode {
    pub id: NodeId,
    pub recipe: Arc<Recipe>,
    pub settings: Settings,
    /// Effective options (declared defaults plus requested overrides)
    pub options: Options,
    /// Direct link requirements, in declaration order
    pub links: Vec<NodeId>,
    /// Direct tool requirements, in declaration order
    pub tools: Vec<NodeId>,
}

impl ResolvedNode {
    /// Direct dependencies of one kind
    #[must_use]
    pub fn deps(&self, kind: RequirementKind) -> &[NodeId] {
        match kind {
            RequirementKind::Link => &self.links,
            RequirementKind::Tool => &self.tools,
        }
    }

    /// All direct dependencies, links first
    pub fn all_deps(&self) -> impl Iterator<Item = &NodeId> {
        self.links.iter().chain(&self.tools)
    }
}

/// Dependency graph
#[derive(Clone, Debug, Default)]
pub struct DependencyGraph {
    /// Resolved nodes indexed by node id
    pub nodes: BTreeMap<NodeId, ResolvedNode>,
    /// Nodes requested directly by the root requirement set
    pub roots: Vec<NodeId>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: ResolvedNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Add an edge from `from` to its dependency `to`
    pub fn add_edge(&mut self, from: &NodeId, to: &NodeId, kind: RequirementKind) {
        if let Some(node) = self.nodes.get_mut(from) {
            let deps = match kind {
                RequirementKind::Link => &mut node.links,
                RequirementKind::Tool => &mut node.tools,
            };
            if !deps.contains(to) {
                deps.push(to.clone());
            }
        }
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&ResolvedNode> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of edges of one kind
    #[must_use]
    pub fn edge_count(&self, kind: RequirementKind) -> usize {
        self.nodes.values().map(|node| node.deps(kind).len()).sum()
    }

    /// Find a directed cycle following the given edge kinds
    ///
    /// The returned path starts and ends with the same node. Nodes and
    /// edges are visited in a fixed order, so the reported cycle is stable.
    #[must_use]
    pub fn find_cycle(&self, kinds: &[RequirementKind]) -> Option<Vec<NodeId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Active,
            Done,
        }

        fn visit(
            graph: &DependencyGraph,
            id: &NodeId,
            kinds: &[RequirementKind],
            marks: &mut BTreeMap<NodeId, Mark>,
            stack: &mut Vec<NodeId>,
        ) -> Option<Vec<NodeId>> {
            marks.insert(id.clone(), Mark::Active);
            stack.push(id.clone());

            if let Some(node) = graph.nodes.get(id) {
                for kind in kinds {
                    for dep in node.deps(*kind) {
                        match marks.get(dep) {
                            Some(Mark::Active) => {
                                let start = stack.iter().position(|n| n == dep).unwrap_or(0);
                                let mut cycle = stack[start..].to_vec();
                                cycle.push(dep.clone());
                                return Some(cycle);
                            }
                            Some(Mark::Done) => {}
                            None => {
                                if let Some(cycle) = visit(graph, dep, kinds, marks, stack) {
                                    return Some(cycle);
                                }
                            }
                        }
                    }
                }
            }

            stack.pop();
            marks.insert(id.clone(), Mark::Done);
            None
        }

        let mut marks = BTreeMap::new();
        let mut stack = Vec::new();
        // Roots first so the cycle reads from the requester's side
        let starts = self.roots.iter().chain(self.nodes.keys());
        for id in starts {
            if marks.contains_key(id) {
                continue;
            }
            if let Some(cycle) = visit(self, id, kinds, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    /// Check for link cycles, then for cycles that go through tool edges
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::CyclicDependency` or `ResolveError::ToolCycle`
    /// with the full cycle path.
    pub fn check_acyclic(&self) -> Result<(), Error> {
        if let Some(cycle) = self.find_cycle(&[RequirementKind::Link]) {
            return Err(ResolveError::CyclicDependency {
                path: cycle.into_iter().map(|id| id.name).collect(),
            }
            .into());
        }
        if let Some(cycle) = self.find_cycle(&[RequirementKind::Link, RequirementKind::Tool]) {
            return Err(ResolveError::ToolCycle {
                path: cycle.iter().map(ToString::to_string).collect(),
            }
            .into());
        }
        Ok(())
    }

    /// Perform topological sort using Kahn's algorithm; dependencies come
    /// before their dependents and ties break by node id
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::CyclicDependency` if the graph has a cycle.
    pub fn topological_sort(&self) -> Result<Vec<NodeId>, Error> {
        let mut remaining: BTreeMap<&NodeId, usize> = self
            .nodes
            .values()
            .map(|node| (&node.id, node.all_deps().filter(|d| self.nodes.contains_key(*d)).count()))
            .collect();
        let dependents = self.dependents_map();

        let mut queue: VecDeque<&NodeId> = remaining
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            result.push(id.clone());
            let mut unlocked = BTreeSet::new();
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = remaining.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        unlocked.insert(*dependent);
                    }
                }
            }
            queue.extend(unlocked);
        }

        if result.len() != self.nodes.len() {
            let path = self
                .find_cycle(&[RequirementKind::Link, RequirementKind::Tool])
                .map(|cycle| cycle.into_iter().map(|id| id.name).collect())
                .unwrap_or_default();
            return Err(ResolveError::CyclicDependency { path }.into());
        }
        Ok(result)
    }

    /// Map of node to the nodes that depend on it (either edge kind)
    #[must_use]
    pub fn dependents_map(&self) -> BTreeMap<&NodeId, Vec<&NodeId>> {
        let mut map: BTreeMap<&NodeId, Vec<&NodeId>> = BTreeMap::new();
        for node in self.nodes.values() {
            for dep in node.all_deps() {
                let entry = map.entry(dep).or_default();
                if !entry.contains(&&node.id) {
                    entry.push(&node.id);
                }
            }
        }
        map
    }

    /// Transitive link dependencies of `id`, dependencies first
    ///
    /// This is the set whose exported metadata a node consumes.
    #[must_use]
    pub fn link_closure(&self, id: &NodeId) -> Vec<NodeId> {
        fn visit(graph: &DependencyGraph, id: &NodeId, seen: &mut BTreeSet<NodeId>, out: &mut Vec<NodeId>) {
            let Some(node) = graph.nodes.get(id) else {
                return;
            };
            for dep in &node.links {
                if seen.insert(dep.clone()) {
                    visit(graph, dep, seen, out);
                    out.push(dep.clone());
                }
            }
        }

        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        visit(self, id, &mut seen, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_recipe::parse_recipe_str;
    use std::path::Path;

    fn node(name: &str) -> ResolvedNode {
        let yaml = format!("metadata: {{ name: {name}, version: '1.0' }}\n");
        let recipe = parse_recipe_str(&yaml, Path::new("/r")).unwrap().remove(0);
        ResolvedNode {
            id: id(name),
            recipe: Arc::new(recipe),
            settings: Settings::host(),
            options: Options::new(),
            links: Vec::new(),
            tools: Vec::new(),
        }
    }

    fn id(name: &str) -> NodeId {
        NodeId::new(name, Version::parse("1.0").unwrap(), NodeContext::Target)
    }

    fn graph(edges: &[(&str, &str, RequirementKind)], names: &[&str]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for name in names {
            graph.add_node(node(name));
        }
        for (from, to, kind) in edges {
            graph.add_edge(&id(from), &id(to), *kind);
        }
        graph.roots.push(id(names[0]));
        graph
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(id("zlib").to_string(), "zlib/1.0");
        let tool = NodeId::new("cmake", Version::parse("3.30").unwrap(), NodeContext::Tool);
        assert_eq!(tool.to_string(), "cmake/3.30 (tool)");
    }

    #[test]
    fn test_graph_cycle_detection() {
        use RequirementKind::Link;
        let acyclic = graph(&[("a", "b", Link)], &["a", "b"]);
        assert!(acyclic.find_cycle(&[Link]).is_none());

        let cyclic = graph(&[("a", "b", Link), ("b", "a", Link)], &["a", "b"]);
        let cycle = cyclic.find_cycle(&[Link]).unwrap();
        let names: Vec<&str> = cycle.iter().map(|id| id.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_tool_cycle_reported_separately() {
        use RequirementKind::{Link, Tool};
        let graph = graph(&[("a", "b", Tool), ("b", "a", Link)], &["a", "b"]);
        let err = graph.check_acyclic().unwrap_err();
        assert!(matches!(err, Error::Resolve(ResolveError::ToolCycle { .. })));
    }

    #[test]
    fn test_topological_sort() {
        use RequirementKind::{Link, Tool};
        let graph = graph(
            &[("a", "b", Link), ("b", "c", Link), ("a", "t", Tool)],
            &["a", "b", "c", "t"],
        );
        let sorted = graph.topological_sort().unwrap();
        let pos = |name: &str| sorted.iter().position(|n| n.name == name).unwrap();
        assert!(pos("c") < pos("b"));
        assert!(pos("b") < pos("a"));
        assert!(pos("t") < pos("a"));
    }

    #[test]
    fn test_link_closure_skips_tools() {
        use RequirementKind::{Link, Tool};
        let graph = graph(
            &[("a", "b", Link), ("b", "c", Link), ("a", "t", Tool), ("a", "c", Link)],
            &["a", "b", "c", "t"],
        );
        let closure: Vec<String> = graph.link_closure(&id("a")).into_iter().map(|n| n.name).collect();
        assert_eq!(closure, vec!["c", "b"]);
    }
}
