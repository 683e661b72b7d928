//! Graph execution
//!
//! A node becomes eligible once all of its link requirements reached a
//! successful terminal state. Eligible nodes run on a bounded pool; tool
//! requirements are waited for inside the lifecycle through a [`ToolGate`].
//! A failing node takes every node that depends on it down with it, while
//! unrelated parts of the graph keep going.

use crate::context::UpstreamPackage;
use crate::gate::{ToolGate, ToolState};
use crate::lifecycle::{BuiltNode, NodeExecutor, NodeJob};
use chrono::Utc;
use kiln_cache::{CacheEntry, EntryMetadata, PackageCache};
use kiln_config::{acquire_semaphore_permit, create_semaphore, Config};
use kiln_errors::{BuildError, Error, UserFacingError};
use kiln_events::{AppEvent, BuildEvent, CacheEvent, EventEmitter, EventSender, FailureContext};
use kiln_hash::Fingerprint;
use kiln_resolver::{DependencyGraph, ExecutionPlan, NodeId, ResolutionResult, ResolvedNode};
use kiln_types::{
    BuildReport, NodeReport, NodeState, PackageRef, Phase, Settings, SkipReason, TestOutcome,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Nodes executing at once
    pub jobs: usize,
    /// Fail a node whose tests fail instead of only reporting it
    pub strict_tests: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            jobs: kiln_config::calculate_build_jobs(0),
            strict_tests: false,
        }
    }
}

impl SchedulerOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            jobs: config.build_jobs(),
            strict_tests: config.build.strict_tests,
        }
    }
}

/// Walks a resolved graph and drives every node to a terminal state
pub struct BuildScheduler {
    cache: PackageCache,
    executor: Arc<dyn NodeExecutor>,
    options: SchedulerOptions,
    event_sender: Option<EventSender>,
}

impl EventEmitter for BuildScheduler {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

/// How a finished node left the pool
struct Finished {
    state: NodeState,
    test: TestOutcome,
    upstream: UpstreamPackage,
}

struct NodeTask {
    node: ResolvedNode,
    fingerprint: Fingerprint,
    upstream: Vec<UpstreamPackage>,
    tools: Vec<(NodeId, watch::Receiver<ToolState>)>,
    cache: PackageCache,
    executor: Arc<dyn NodeExecutor>,
    semaphore: Arc<Semaphore>,
    strict_tests: bool,
    cancel: CancellationToken,
    event_sender: Option<EventSender>,
}

impl EventEmitter for NodeTask {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }

    fn correlation_id(&self) -> Option<String> {
        Some(self.node.id.package_ref().to_string())
    }
}

/// Mutable bookkeeping of one run
struct RunState {
    terminal: BTreeMap<NodeId, (NodeState, TestOutcome, u64)>,
    running: BTreeSet<NodeId>,
    started: BTreeMap<NodeId, Instant>,
    available: BTreeMap<NodeId, UpstreamPackage>,
    tool_states: BTreeMap<NodeId, watch::Sender<ToolState>>,
}

impl BuildScheduler {
    #[must_use]
    pub fn new(cache: PackageCache, executor: Arc<dyn NodeExecutor>, options: SchedulerOptions) -> Self {
        Self {
            cache,
            executor,
            options,
            event_sender: None,
        }
    }

    #[must_use]
    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    /// Execute every node of `resolution`
    ///
    /// Node failures never abort the run; they end up in the report. The
    /// report lists every node in topological order.
    ///
    /// # Errors
    ///
    /// Returns an error only when the scheduler itself breaks, e.g. a node
    /// task panicked.
    pub async fn run(&self, resolution: &ResolutionResult, cancel: CancellationToken) -> Result<BuildReport, Error> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_start = Instant::now();
        let graph = &resolution.graph;
        // Fresh in-degree counters; the resolver's plan may be reused
        let plan = ExecutionPlan::from_sorted_nodes(resolution.execution_plan.order().to_vec(), graph);
        let dependents = dependents(graph);
        let semaphore = create_semaphore(self.options.jobs);

        self.emit(AppEvent::Build(BuildEvent::RunStarted {
            run_id: run_id.to_string(),
            nodes: plan.node_count(),
            jobs: self.options.jobs,
        }));

        let mut state = RunState {
            terminal: BTreeMap::new(),
            running: BTreeSet::new(),
            started: BTreeMap::new(),
            available: BTreeMap::new(),
            tool_states: plan
                .order()
                .iter()
                .map(|id| (id.clone(), watch::channel(ToolState::Pending).0))
                .collect(),
        };

        let mut ready: VecDeque<NodeId> = plan.ready_nodes().into();
        let mut tasks: JoinSet<(NodeId, Result<Finished, Error>)> = JoinSet::new();

        loop {
            while let Some(id) = ready.pop_front() {
                if state.terminal.contains_key(&id) || state.running.contains(&id) {
                    continue;
                }
                if cancel.is_cancelled() {
                    self.finish_unsuccessful(&mut state, &dependents, &id, Error::Cancelled);
                    continue;
                }
                let Some(task) = self.node_task(resolution, &id, &state, &semaphore, &cancel) else {
                    return Err(Error::internal(format!("{id} is missing from the graph or fingerprints")));
                };
                state.running.insert(id.clone());
                state.started.insert(id.clone(), Instant::now());
                tasks.spawn(async move {
                    let id = task.node.id.clone();
                    (id, task.run().await)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (id, outcome) = joined.map_err(|e| Error::internal(format!("node task failed: {e}")))?;
            state.running.remove(&id);

            match outcome {
                Ok(finished) => {
                    let duration = state.started.get(&id).map_or(0, |start| elapsed_ms(*start));
                    if let Some(sender) = state.tool_states.get(&id) {
                        sender.send_replace(ToolState::Available(finished.upstream.clone()));
                    }
                    state.available.insert(id.clone(), finished.upstream);
                    state.terminal.insert(id.clone(), (finished.state, finished.test, duration));
                    ready.extend(plan.complete_node(&id));
                }
                Err(e) => self.finish_unsuccessful(&mut state, &dependents, &id, e),
            }
        }

        // Only nodes behind a cancelled or failed dependency can be left over
        for id in plan.order() {
            if !state.terminal.contains_key(id) {
                let reason = if cancel.is_cancelled() {
                    SkipReason::Cancelled
                } else {
                    return Err(Error::internal(format!("{id} never reached a terminal state")));
                };
                state
                    .terminal
                    .insert(id.clone(), (NodeState::Skipped(reason), TestOutcome::NotRun, 0));
            }
        }

        let nodes: Vec<NodeReport> = plan
            .order()
            .iter()
            .filter_map(|id| {
                let (node_state, test, duration_ms) = state.terminal.remove(id)?;
                Some(NodeReport {
                    package: id.package_ref(),
                    context: id.context,
                    fingerprint: resolution.fingerprint(id).map(Fingerprint::to_hex),
                    state: node_state,
                    test,
                    duration_ms,
                })
            })
            .collect();

        let report = BuildReport {
            run_id,
            started_at,
            nodes,
            duration_ms: elapsed_ms(run_start),
        };
        let summary = report.summary();
        self.emit(AppEvent::Build(BuildEvent::RunCompleted {
            run_id: run_id.to_string(),
            built: summary.built,
            cached: summary.cached,
            failed: summary.failed,
            skipped: summary.skipped,
            duration_ms: report.duration_ms,
        }));
        Ok(report)
    }

    fn node_task(
        &self,
        resolution: &ResolutionResult,
        id: &NodeId,
        state: &RunState,
        semaphore: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> Option<NodeTask> {
        let node = resolution.graph.node(id)?.clone();
        let fingerprint = *resolution.fingerprint(id)?;

        let upstream = resolution
            .graph
            .link_closure(id)
            .iter()
            .filter_map(|dep| {
                let mut upstream = state.available.get(dep)?.clone();
                upstream.direct = node.links.contains(dep);
                Some(upstream)
            })
            .collect();
        let tools = node
            .tools
            .iter()
            .filter_map(|tool| Some((tool.clone(), state.tool_states.get(tool)?.subscribe())))
            .collect();

        Some(NodeTask {
            node,
            fingerprint,
            upstream,
            tools,
            cache: self.cache.clone(),
            executor: Arc::clone(&self.executor),
            semaphore: Arc::clone(semaphore),
            strict_tests: self.options.strict_tests,
            cancel: cancel.clone(),
            event_sender: self.event_sender.clone(),
        })
    }

    /// Record a failed, skipped or cancelled node and skip what depends on it
    fn finish_unsuccessful(
        &self,
        state: &mut RunState,
        dependents: &BTreeMap<NodeId, Vec<NodeId>>,
        id: &NodeId,
        error: Error,
    ) {
        let package = id.package_ref();
        let duration = state.started.get(id).map_or(0, |start| elapsed_ms(*start));

        let (node_state, root_cause) = match error {
            Error::Cancelled => (NodeState::Skipped(SkipReason::Cancelled), package.to_string()),
            Error::Build(BuildError::UpstreamFailed { dependency, .. }) => {
                self.emit(AppEvent::Build(BuildEvent::NodeSkipped {
                    package: package.clone(),
                    root_cause: Some(dependency.clone()),
                }));
                (
                    NodeState::Skipped(SkipReason::UpstreamFailure {
                        root_cause: dependency.clone(),
                    }),
                    dependency,
                )
            }
            error => {
                tracing::error!(package = %package, error = %error, "node failed");
                self.emit(AppEvent::Build(BuildEvent::NodeFailed {
                    package: package.clone(),
                    phase: failed_phase(&error),
                    failure: FailureContext::from_error(&error),
                }));
                (
                    NodeState::Failed {
                        code: error.user_code().unwrap_or("error").to_string(),
                        message: error.user_message().into_owned(),
                    },
                    package.to_string(),
                )
            }
        };

        let cancelled = matches!(node_state, NodeState::Skipped(SkipReason::Cancelled));
        state
            .terminal
            .insert(id.clone(), (node_state, TestOutcome::NotRun, duration));
        if let Some(sender) = state.tool_states.get(id) {
            sender.send_replace(ToolState::Failed {
                root_cause: root_cause.clone(),
            });
        }
        if cancelled {
            return;
        }

        // Running dependents learn about the failure through their tool gate
        let mut queue: VecDeque<&NodeId> = dependents.get(id).into_iter().flatten().collect();
        while let Some(dependent) = queue.pop_front() {
            if state.terminal.contains_key(dependent) || state.running.contains(dependent) {
                continue;
            }
            self.emit(AppEvent::Build(BuildEvent::NodeSkipped {
                package: dependent.package_ref(),
                root_cause: Some(root_cause.clone()),
            }));
            state.terminal.insert(
                dependent.clone(),
                (
                    NodeState::Skipped(SkipReason::UpstreamFailure {
                        root_cause: root_cause.clone(),
                    }),
                    TestOutcome::NotRun,
                    0,
                ),
            );
            if let Some(sender) = state.tool_states.get(dependent) {
                sender.send_replace(ToolState::Failed {
                    root_cause: root_cause.clone(),
                });
            }
            queue.extend(dependents.get(dependent).into_iter().flatten());
        }
    }
}

impl NodeTask {
    async fn run(self) -> Result<Finished, Error> {
        let package = self.node.id.package_ref();

        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            permit = acquire_semaphore_permit(Arc::clone(&self.semaphore), "node execution") => permit?,
        };
        let mut gate = ToolGate::new(package.clone(), self.tools.clone(), self.cancel.clone())
            .with_permit(Arc::clone(&self.semaphore), permit);
        if let Some(sender) = &self.event_sender {
            gate = gate.with_event_sender(sender.clone());
        }

        self.emit(AppEvent::Build(BuildEvent::NodeStarted {
            package: package.clone(),
            context: self.node.id.context,
            fingerprint: self.fingerprint.short(),
        }));

        if let Some(entry) = self.cache_hit(&package).await? {
            return Ok(self.cached(entry));
        }
        if let Some(root_cause) = gate.failed_tool() {
            return Err(BuildError::UpstreamFailed {
                package: package.to_string(),
                dependency: root_cause,
            }
            .into());
        }

        // Single flight: whoever holds the key builds, everyone else finds the entry
        let guard = self.cache.lock(&package, &self.fingerprint).await;
        if let Some(entry) = self.cache_hit(&package).await? {
            drop(guard);
            return Ok(self.cached(entry));
        }
        self.emit(AppEvent::Cache(CacheEvent::Miss {
            package: package.clone(),
            fingerprint: self.fingerprint.short(),
        }));

        let start = Instant::now();
        let job = NodeJob {
            node: self.node.clone(),
            fingerprint: self.fingerprint,
            upstream: self.upstream.clone(),
            cancel: self.cancel.clone(),
        };
        let built = self.executor.execute(job, &gate).await?;

        if self.cancel.is_cancelled() {
            remove_build_dirs(&package, &built).await;
            return Err(Error::Cancelled);
        }
        if let (true, TestOutcome::Failed { message }) = (self.strict_tests, &built.test) {
            remove_build_dirs(&package, &built).await;
            return Err(BuildError::TestFailed {
                package: package.to_string(),
                message: message.clone(),
            }
            .into());
        }

        let duration_ms = elapsed_ms(start);
        let metadata = EntryMetadata {
            package: package.clone(),
            fingerprint: self.fingerprint,
            context: self.node.id.context,
            kind: self.node.recipe.kind(),
            settings: settings_map(&self.node.settings),
            options: self.node.options.clone(),
            package_info: built.package_info.clone(),
            created_at: Utc::now(),
            build_duration_ms: duration_ms,
        };
        let published = self.cache.publish(metadata, &built.dirs.package).await;
        remove_build_dirs(&package, &built).await;
        let entry = published?;
        drop(guard);

        self.emit(AppEvent::Build(BuildEvent::NodeCompleted {
            package: package.clone(),
            fingerprint: self.fingerprint.short(),
            duration_ms,
        }));
        Ok(Finished {
            state: NodeState::Built,
            test: built.test,
            upstream: self.upstream_view(&entry),
        })
    }

    async fn cache_hit(&self, package: &PackageRef) -> Result<Option<CacheEntry>, Error> {
        let entry = self.cache.lookup(&self.fingerprint).await?;
        if entry.is_some() {
            self.emit(AppEvent::Cache(CacheEvent::Hit {
                package: package.clone(),
                fingerprint: self.fingerprint.short(),
            }));
        }
        Ok(entry)
    }

    fn cached(&self, entry: CacheEntry) -> Finished {
        Finished {
            state: NodeState::Cached,
            test: TestOutcome::NotRun,
            upstream: self.upstream_view(&entry),
        }
    }

    fn upstream_view(&self, entry: &CacheEntry) -> UpstreamPackage {
        UpstreamPackage {
            package: self.node.id.package_ref(),
            info: entry.package_info(),
            package_folder: entry.package_folder(),
            direct: false,
        }
    }
}

async fn remove_build_dirs(package: &PackageRef, built: &BuiltNode) {
    if let Err(e) = built.dirs.remove().await {
        tracing::warn!(package = %package, error = %e, "failed to remove build folder");
    }
}

/// Every node that depends on a node through either edge kind
fn dependents(graph: &DependencyGraph) -> BTreeMap<NodeId, Vec<NodeId>> {
    graph
        .dependents_map()
        .into_iter()
        .map(|(id, dependents)| (id.clone(), dependents.into_iter().cloned().collect()))
        .collect()
}

/// Phase an error belongs to, when it names one
#[must_use]
pub fn failed_phase(error: &Error) -> Option<Phase> {
    let Error::Build(error) = error else {
        return None;
    };
    let named = |name: &str| Phase::ALL.into_iter().find(|phase| phase.as_str() == name);
    match error {
        BuildError::Validation { .. } => Some(Phase::Validate),
        BuildError::SourceFetch { .. } | BuildError::PatchApply { .. } => Some(Phase::Source),
        BuildError::Packaging { .. } => Some(Phase::Package),
        BuildError::TestFailed { .. } => Some(Phase::Test),
        BuildError::Failed { phase, .. }
        | BuildError::CommandFailed { phase, .. }
        | BuildError::UnsupportedPlatform { phase, .. }
        | BuildError::Timeout { phase, .. } => named(phase),
        _ => None,
    }
}

/// Settings as recorded in cache metadata
#[must_use]
pub fn settings_map(settings: &Settings) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("os".to_string(), settings.os.to_string()),
        ("arch".to_string(), settings.arch.to_string()),
        ("compiler".to_string(), settings.compiler.to_string()),
        ("build_type".to_string(), settings.build_type.to_string()),
    ])
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_phase_from_error() {
        let err: Error = BuildError::CommandFailed {
            package: "glslang/1.3.290".into(),
            phase: "build".into(),
            command: "cmake --build".into(),
            exit_code: Some(2),
            stderr: String::new(),
        }
        .into();
        assert_eq!(failed_phase(&err), Some(Phase::Build));

        let err: Error = BuildError::UnsupportedPlatform {
            package: "dxc/1.8".into(),
            phase: "package_info".into(),
            os: "android".into(),
        }
        .into();
        assert_eq!(failed_phase(&err), Some(Phase::PackageInfo));

        let err: Error = BuildError::PatchApply {
            package: "spirv-tools/1.3.290".into(),
            patch: "0001.patch".into(),
            message: "hunk 2 failed".into(),
        }
        .into();
        assert_eq!(failed_phase(&err), Some(Phase::Source));
        assert_eq!(failed_phase(&Error::Cancelled), None);
    }

    #[test]
    fn test_settings_map_keys() {
        let map = settings_map(&Settings::host());
        assert_eq!(
            map.keys().map(String::as_str).collect::<Vec<_>>(),
            ["arch", "build_type", "compiler", "os"]
        );
    }
}
