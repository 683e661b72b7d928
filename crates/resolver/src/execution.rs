//! Execution plan for parallel node dispatch
//!
//! A node becomes dispatchable once all of its link requirements have
//! completed. Tool requirements do not delay dispatch: they only gate the
//! phases that run the tool, which the scheduler waits on per node.

use crate::graph::{DependencyGraph, NodeId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Metadata for parallel execution
#[derive(Debug)]
pub struct NodeMeta {
    /// Number of link requirements not yet completed
    pub in_degree: AtomicUsize,
    /// Nodes that link against this one
    pub parents: Vec<NodeId>,
}

impl NodeMeta {
    #[must_use]
    pub fn new(in_degree: usize) -> Self {
        Self {
            in_degree: AtomicUsize::new(in_degree),
            parents: Vec::new(),
        }
    }

    /// Decrement in-degree and return new value
    pub fn decrement_in_degree(&self) -> usize {
        self.in_degree
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1)
    }

    #[must_use]
    pub fn in_degree(&self) -> usize {
        self.in_degree.load(Ordering::SeqCst)
    }
}

/// Execution plan with batched parallel operations
#[derive(Clone, Debug)]
pub struct ExecutionPlan {
    /// Topological order, dependencies first
    order: Vec<NodeId>,
    /// Dispatch waves; nodes within one wave are independent
    batches: Vec<Vec<NodeId>>,
    metadata: BTreeMap<NodeId, Arc<NodeMeta>>,
}

impl ExecutionPlan {
    /// Create execution plan from topologically sorted nodes
    #[must_use]
    pub fn from_sorted_nodes(sorted: Vec<NodeId>, graph: &DependencyGraph) -> Self {
        let mut metas: BTreeMap<NodeId, NodeMeta> = sorted
            .iter()
            .filter_map(|id| graph.node(id))
            .map(|node| (node.id.clone(), NodeMeta::new(node.links.len())))
            .collect();

        for node in graph.nodes.values() {
            for dep in &node.links {
                if let Some(meta) = metas.get_mut(dep) {
                    meta.parents.push(node.id.clone());
                }
            }
        }

        let mut batches = Vec::new();
        let mut remaining: BTreeSet<&NodeId> = sorted.iter().collect();
        while !remaining.is_empty() {
            let batch: Vec<NodeId> = remaining
                .iter()
                .filter(|id| {
                    graph
                        .node(id)
                        .is_none_or(|node| node.links.iter().all(|dep| !remaining.contains(dep)))
                })
                .map(|id| (*id).clone())
                .collect();

            if batch.is_empty() {
                // Only reachable with a cyclic graph, which resolution rejects
                break;
            }
            for id in &batch {
                remaining.remove(id);
            }
            batches.push(batch);
        }

        Self {
            order: sorted,
            batches,
            metadata: metas
                .into_iter()
                .map(|(id, meta)| (id, Arc::new(meta)))
                .collect(),
        }
    }

    /// Topological order, dependencies first
    #[must_use]
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    #[must_use]
    pub fn batches(&self) -> &[Vec<NodeId>] {
        &self.batches
    }

    #[must_use]
    pub fn metadata(&self, id: &NodeId) -> Option<&Arc<NodeMeta>> {
        self.metadata.get(id)
    }

    /// Nodes with no outstanding link requirements
    #[must_use]
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        self.order
            .iter()
            .filter(|id| self.metadata.get(*id).is_some_and(|meta| meta.in_degree() == 0))
            .cloned()
            .collect()
    }

    /// Mark node as completed and get newly ready nodes
    #[must_use]
    pub fn complete_node(&self, id: &NodeId) -> Vec<NodeId> {
        let Some(meta) = self.metadata.get(id) else {
            return Vec::new();
        };

        meta.parents
            .iter()
            .filter(|parent| {
                self.metadata
                    .get(*parent)
                    .is_some_and(|parent_meta| parent_meta.decrement_in_degree() == 0)
            })
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.metadata.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResolvedNode;
    use kiln_recipe::parse_recipe_str;
    use kiln_types::{NodeContext, Options, RequirementKind, Settings, Version};
    use std::path::Path;

    fn id(name: &str) -> NodeId {
        NodeId::new(name, Version::parse("1.0").unwrap(), NodeContext::Target)
    }

    fn add(graph: &mut DependencyGraph, name: &str) {
        let yaml = format!("metadata: {{ name: {name}, version: '1.0' }}\n");
        let recipe = parse_recipe_str(&yaml, Path::new("/r")).unwrap().remove(0);
        graph.add_node(ResolvedNode {
            id: id(name),
            recipe: Arc::new(recipe),
            settings: Settings::host(),
            options: Options::new(),
            links: Vec::new(),
            tools: Vec::new(),
        });
    }

    #[test]
    fn test_node_meta() {
        let meta = NodeMeta::new(2);
        assert_eq!(meta.decrement_in_degree(), 1);
        assert_eq!(meta.decrement_in_degree(), 0);
        assert_eq!(meta.in_degree(), 0);
    }

    #[test]
    fn test_execution_plan() {
        // a -> b -> c, a -tool-> t
        let mut graph = DependencyGraph::new();
        for name in ["a", "b", "c", "t"] {
            add(&mut graph, name);
        }
        graph.add_edge(&id("a"), &id("b"), RequirementKind::Link);
        graph.add_edge(&id("b"), &id("c"), RequirementKind::Link);
        graph.add_edge(&id("a"), &id("t"), RequirementKind::Tool);

        let sorted = graph.topological_sort().unwrap();
        let plan = ExecutionPlan::from_sorted_nodes(sorted, &graph);

        assert_eq!(plan.batches().len(), 3);
        assert_eq!(plan.batches()[0], vec![id("c"), id("t")]);
        assert_eq!(plan.batches()[2], vec![id("a")]);

        let ready = plan.ready_nodes();
        assert!(ready.contains(&id("c")));
        assert!(ready.contains(&id("t")));
        assert!(!ready.contains(&id("a")));

        assert_eq!(plan.complete_node(&id("c")), vec![id("b")]);
        assert_eq!(plan.complete_node(&id("b")), vec![id("a")]);
        assert!(plan.complete_node(&id("t")).is_empty());
    }
}
