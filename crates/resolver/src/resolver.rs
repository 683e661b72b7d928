//! Main dependency resolver implementation

use crate::components::check_components;
use crate::execution::ExecutionPlan;
use crate::fingerprint::compute_fingerprints;
use crate::graph::{DependencyGraph, NodeId, ResolvedNode};
use kiln_errors::{Error, ResolveError};
use kiln_events::{AppEvent, EventEmitter, EventSender, FailureContext, ResolverEvent};
use kiln_hash::Fingerprint;
use kiln_recipe::RecipeRegistry;
use kiln_types::{NodeContext, Options, Requirement, RequirementKind, Settings, Version};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Expansion rounds before resolution is declared non-convergent
const MAX_ROUNDS: usize = 64;

/// Root requirements plus the settings every target node is built for
#[derive(Clone, Debug)]
pub struct ResolutionRequest {
    pub requirements: Vec<Requirement>,
    pub settings: Settings,
}

impl ResolutionRequest {
    #[must_use]
    pub fn new(requirements: Vec<Requirement>, settings: Settings) -> Self {
        Self {
            requirements,
            settings,
        }
    }
}

/// Validated graph, its execution plan and a fingerprint per node
#[derive(Clone, Debug)]
pub struct ResolutionResult {
    pub graph: DependencyGraph,
    pub execution_plan: ExecutionPlan,
    pub fingerprints: BTreeMap<NodeId, Fingerprint>,
}

impl ResolutionResult {
    /// Nodes in dependency order
    pub fn nodes_in_order(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.execution_plan
            .order()
            .iter()
            .filter_map(|id| self.graph.node(id))
    }

    #[must_use]
    pub fn fingerprint(&self, id: &NodeId) -> Option<&Fingerprint> {
        self.fingerprints.get(id)
    }
}

/// A version pin and where it came from
#[derive(Clone, Debug, PartialEq, Eq)]
struct Pin {
    version: Version,
    /// Distance from the root; root overrides are at depth zero
    depth: usize,
    declared_by: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Pins(BTreeMap<String, Pin>);

impl Pins {
    /// Record an override; the pin closest to the root wins
    fn add(&mut self, name: &str, pin: Pin) -> Result<(), Error> {
        match self.0.get(name) {
            None => {
                self.0.insert(name.to_string(), pin);
            }
            Some(existing) if pin.depth < existing.depth => {
                self.0.insert(name.to_string(), pin);
            }
            Some(existing) if pin.depth == existing.depth && pin.version != existing.version => {
                let mut versions = vec![existing.version.to_string(), pin.version.to_string()];
                versions.sort();
                return Err(ResolveError::VersionConflict {
                    name: name.to_string(),
                    versions,
                }
                .into());
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&Pin> {
        self.0.get(name)
    }
}

type NodeKey = (String, NodeContext);

/// Edge waiting to be followed during expansion
struct PendingEdge {
    requirement: Requirement,
    parent: Option<NodeId>,
    context: NodeContext,
    /// Depth of the node this edge leads to
    depth: usize,
}

/// Outcome of one breadth-first expansion
#[derive(Default)]
struct Expansion {
    graph: DependencyGraph,
    /// Overrides declared by recipes reached in this round
    declared: Vec<(String, Pin)>,
    /// Explicit option requests per node, merged across edges
    option_requests: BTreeMap<NodeKey, Options>,
    /// Every version requested per node after pins were applied
    versions: BTreeMap<NodeKey, BTreeSet<Version>>,
    /// Edges that a pin rewrote: (package, pinned version, declared by)
    applied: BTreeSet<(String, String, String)>,
}

impl Expansion {
    fn check_versions(&self) -> Result<(), Error> {
        for ((name, _), versions) in &self.versions {
            if versions.len() > 1 {
                return Err(ResolveError::VersionConflict {
                    name: name.clone(),
                    versions: versions.iter().map(ToString::to_string).collect(),
                }
                .into());
            }
        }
        Ok(())
    }
}

/// Dependency resolver
#[derive(Clone)]
pub struct Resolver {
    registry: Arc<RecipeRegistry>,
    event_sender: Option<EventSender>,
}

impl EventEmitter for Resolver {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl Resolver {
    /// Create new resolver over a loaded recipe registry
    #[must_use]
    pub fn new(registry: Arc<RecipeRegistry>) -> Self {
        Self {
            registry,
            event_sender: None,
        }
    }

    #[must_use]
    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RecipeRegistry> {
        &self.registry
    }

    /// Resolve root requirements into a validated, fingerprinted graph
    ///
    /// # Errors
    ///
    /// Returns a resolution error for missing recipes, version or option
    /// conflicts, cycles (link, tool or component) and unknown component
    /// references. Nothing is built when resolution fails.
    pub async fn resolve(&self, request: &ResolutionRequest) -> Result<ResolutionResult, Error> {
        let start = Instant::now();
        self.emit(AppEvent::Resolver(ResolverEvent::ResolutionStarted {
            roots: request
                .requirements
                .iter()
                .filter(|req| !req.is_override)
                .map(ToString::to_string)
                .collect(),
            overrides: request.requirements.iter().filter(|req| req.is_override).count(),
        }));

        match self.resolve_inner(request).await {
            Ok(result) => {
                self.emit(AppEvent::Resolver(ResolverEvent::ResolutionCompleted {
                    nodes: result.graph.len(),
                    link_edges: result.graph.edge_count(RequirementKind::Link),
                    tool_edges: result.graph.edge_count(RequirementKind::Tool),
                    duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                }));
                Ok(result)
            }
            Err(e) => {
                self.emit(AppEvent::Resolver(ResolverEvent::ResolutionFailed {
                    failure: FailureContext::from_error(&e),
                }));
                Err(e)
            }
        }
    }

    async fn resolve_inner(&self, request: &ResolutionRequest) -> Result<ResolutionResult, Error> {
        let graph = self.build_graph(request)?;

        graph.check_acyclic()?;
        check_components(&graph)?;

        let sorted = graph.topological_sort()?;
        let fingerprints = compute_fingerprints(&graph, &sorted).await?;
        let execution_plan = ExecutionPlan::from_sorted_nodes(sorted, &graph);

        Ok(ResolutionResult {
            graph,
            execution_plan,
            fingerprints,
        })
    }

    /// Expand until the discovered overrides and option requests stop changing
    ///
    /// Overrides and option requests are only known after the nodes that
    /// declare them have been visited, and applying them can change which
    /// nodes are visited. Each round starts from the previous round's view.
    fn build_graph(&self, request: &ResolutionRequest) -> Result<DependencyGraph, Error> {
        let mut root_pins = Pins::default();
        for req in request.requirements.iter().filter(|req| req.is_override) {
            root_pins.add(
                req.name(),
                Pin {
                    version: req.reference.version.clone(),
                    depth: 0,
                    declared_by: "root".to_string(),
                },
            )?;
        }

        let mut pins = root_pins.clone();
        let mut option_requests: BTreeMap<NodeKey, Options> = BTreeMap::new();

        for round in 0..MAX_ROUNDS {
            let expansion = self.expand(request, &pins, &option_requests)?;

            let mut next_pins = root_pins.clone();
            for (name, pin) in &expansion.declared {
                next_pins.add(name, pin.clone())?;
            }

            if next_pins == pins && expansion.option_requests == option_requests {
                expansion.check_versions()?;
                for (package, version, declared_by) in &expansion.applied {
                    self.emit(AppEvent::Resolver(ResolverEvent::OverrideApplied {
                        package: package.clone(),
                        version: version.clone(),
                        declared_by: declared_by.clone(),
                    }));
                }
                tracing::debug!(rounds = round + 1, nodes = expansion.graph.len(), "resolution converged");
                return Ok(expansion.graph);
            }

            pins = next_pins;
            option_requests = expansion.option_requests;
        }

        Err(Error::internal(format!(
            "dependency resolution did not converge after {MAX_ROUNDS} rounds"
        )))
    }

    /// One breadth-first walk from the roots under a fixed set of pins and
    /// option requests
    fn expand(
        &self,
        request: &ResolutionRequest,
        pins: &Pins,
        option_requests: &BTreeMap<NodeKey, Options>,
    ) -> Result<Expansion, Error> {
        let mut expansion = Expansion::default();
        let mut queue: VecDeque<PendingEdge> = request
            .requirements
            .iter()
            .filter(|req| !req.is_override)
            .map(|req| PendingEdge {
                requirement: req.clone(),
                parent: None,
                context: match req.kind {
                    RequirementKind::Link => NodeContext::Target,
                    RequirementKind::Tool => NodeContext::Tool,
                },
                depth: 1,
            })
            .collect();

        while let Some(edge) = queue.pop_front() {
            let requirement = &edge.requirement;
            let name = requirement.name().to_string();
            let key: NodeKey = (name.clone(), edge.context);
            let requester = edge
                .parent
                .as_ref()
                .map_or_else(|| "root".to_string(), ToString::to_string);

            merge_option_request(
                expansion.option_requests.entry(key.clone()).or_default(),
                requirement,
                &requester,
            )?;

            let version = match pins.get(&name) {
                Some(pin) => {
                    if pin.version != requirement.reference.version {
                        expansion.applied.insert((
                            name.clone(),
                            pin.version.to_string(),
                            pin.declared_by.clone(),
                        ));
                    }
                    pin.version.clone()
                }
                None => requirement.reference.version.clone(),
            };

            let versions = expansion.versions.entry(key.clone()).or_default();
            let conflicting = !versions.is_empty() && !versions.contains(&version);
            versions.insert(version.clone());
            if conflicting {
                // Reported once the round is known to be final
                continue;
            }

            let id = NodeId::new(name, version, edge.context);
            match &edge.parent {
                Some(parent) => expansion.graph.add_edge(parent, &id, requirement.kind),
                None => {
                    if !expansion.graph.roots.contains(&id) {
                        expansion.graph.roots.push(id.clone());
                    }
                }
            }
            if expansion.graph.node(&id).is_some() {
                continue;
            }

            let recipe = self.registry.get(&id.package_ref())?;
            let settings = match edge.context {
                NodeContext::Target => request.settings.clone(),
                NodeContext::Tool => request.settings.for_tools(),
            };
            let requested = option_requests.get(&key).cloned().unwrap_or_default();
            let options = recipe.effective_options(&requested)?;
            let children = recipe.requirements(&settings, &options)?;

            for child in children {
                if child.is_override {
                    expansion.declared.push((
                        child.name().to_string(),
                        Pin {
                            version: child.reference.version.clone(),
                            depth: edge.depth,
                            declared_by: id.to_string(),
                        },
                    ));
                    continue;
                }
                let context = match child.kind {
                    RequirementKind::Tool => NodeContext::Tool,
                    RequirementKind::Link => edge.context,
                };
                queue.push_back(PendingEdge {
                    requirement: child,
                    parent: Some(id.clone()),
                    context,
                    depth: edge.depth + 1,
                });
            }

            expansion.graph.add_node(ResolvedNode {
                id,
                recipe,
                settings,
                options,
                links: Vec::new(),
                tools: Vec::new(),
            });
        }

        Ok(expansion)
    }
}

/// Merge the options one edge requests into what earlier edges requested
fn merge_option_request(merged: &mut Options, requirement: &Requirement, requester: &str) -> Result<(), Error> {
    for (option, value) in &requirement.options {
        match merged.get(option) {
            Some(existing) if existing != value => {
                return Err(ResolveError::OptionConflict {
                    package: requirement.name().to_string(),
                    message: format!(
                        "option '{option}' requested as '{existing}' and as '{value}' (by {requester})"
                    ),
                }
                .into());
            }
            Some(_) => {}
            None => {
                merged.insert(option.clone(), value.clone());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_recipe::parse_recipe_str;
    use kiln_types::PackageRef;
    use std::path::Path;

    fn registry(recipes: &[&str]) -> Arc<RecipeRegistry> {
        let mut registry = RecipeRegistry::new();
        for yaml in recipes {
            for recipe in parse_recipe_str(yaml, Path::new("/recipes")).unwrap() {
                registry.insert(recipe).unwrap();
            }
        }
        Arc::new(registry)
    }

    fn link(reference: &str) -> Requirement {
        Requirement::link(PackageRef::parse(reference).unwrap())
    }

    #[test]
    fn test_pins_closest_wins() {
        let mut pins = Pins::default();
        let pin = |version: &str, depth| Pin {
            version: Version::parse(version).unwrap(),
            depth,
            declared_by: "x".to_string(),
        };
        pins.add("zlib", pin("1.2.13", 2)).unwrap();
        pins.add("zlib", pin("1.3.1", 1)).unwrap();
        pins.add("zlib", pin("1.3.0", 3)).unwrap();
        assert_eq!(pins.get("zlib").unwrap().version.as_str(), "1.3.1");

        let err = pins.add("zlib", pin("1.3.0", 1)).unwrap_err();
        assert!(matches!(err, Error::Resolve(ResolveError::VersionConflict { .. })));
    }

    #[test]
    fn test_recipe_override_pins_transitive_version() {
        let registry = registry(&[
            "metadata: { name: app, version: '1.0' }\nrequires:\n  - a/1.0\n  - { ref: zlib/1.3.1, override: true }\n",
            "metadata: { name: a, version: '1.0' }\nrequires: [zlib/1.2.13]\n",
            "metadata: { name: zlib }\nsources:\n  '1.2.13': { local: { path: src } }\n  '1.3.1': { local: { path: src } }\n",
        ]);
        let resolver = Resolver::new(registry);
        let graph = resolver
            .build_graph(&ResolutionRequest::new(vec![link("app/1.0")], Settings::host()))
            .unwrap();

        let zlib: Vec<&NodeId> = graph.nodes.keys().filter(|id| id.name == "zlib").collect();
        assert_eq!(zlib.len(), 1);
        assert_eq!(zlib[0].version.as_str(), "1.3.1");
    }

    #[test]
    fn test_option_request_reaches_node() {
        let registry = registry(&[
            "metadata: { name: app, version: '1.0' }\nrequires:\n  - { ref: glfw/3.4, options: { shared: 'true' } }\n",
            "metadata: { name: glfw, version: '3.4' }\noptions:\n  shared: { default: 'false', values: ['true', 'false'] }\n",
        ]);
        let resolver = Resolver::new(registry);
        let graph = resolver
            .build_graph(&ResolutionRequest::new(vec![link("app/1.0")], Settings::host()))
            .unwrap();

        let glfw = graph
            .nodes
            .values()
            .find(|node| node.id.name == "glfw")
            .unwrap();
        assert_eq!(glfw.options.get("shared").map(String::as_str), Some("true"));
    }
}
