//! Command implementations and their results

use crate::cli::{CacheCommands, TargetArgs};
use crate::error::CliError;
use crate::setup::{resolution_request, SystemSetup};
use chrono::{DateTime, Utc};
use kiln_builder::{BuildScheduler, ExecutorOptions, LifecycleExecutor, SchedulerOptions};
use kiln_cache::{CacheStatistics, CleanOptions, CleanReport};
use kiln_events::EventSender;
use kiln_resolver::{ResolutionResult, Resolver};
use kiln_types::{BuildReport, NodeContext, Options, PackageKind};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of a command, rendered as a table or as JSON
#[derive(Debug)]
pub enum OperationResult {
    BuildReport(BuildReport),
    Resolution(Vec<PlannedNode>),
    CacheList(Vec<CachedPackage>),
    CacheStats(CacheStatistics),
    CacheCleaned(CleanReport),
}

impl OperationResult {
    /// Serialize the payload as pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::BuildReport(report) => serde_json::to_string_pretty(report),
            Self::Resolution(nodes) => serde_json::to_string_pretty(nodes),
            Self::CacheList(entries) => serde_json::to_string_pretty(entries),
            Self::CacheStats(stats) => serde_json::to_string_pretty(stats),
            Self::CacheCleaned(report) => serde_json::to_string_pretty(report),
        }
    }
}

/// One node of a resolved graph, in execution order
#[derive(Debug, Clone, Serialize)]
pub struct PlannedNode {
    pub package: String,
    pub context: NodeContext,
    pub kind: PackageKind,
    pub fingerprint: String,
    pub options: Options,
    pub links: Vec<String>,
    pub tools: Vec<String>,
    /// Whether the fingerprint is already in the cache
    pub cached: bool,
}

/// One published cache entry
#[derive(Debug, Clone, Serialize)]
pub struct CachedPackage {
    pub package: String,
    pub context: NodeContext,
    pub kind: PackageKind,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Resolve `target` and describe the execution plan
pub async fn resolve(
    setup: &SystemSetup,
    target: &TargetArgs,
    event_sender: EventSender,
) -> Result<OperationResult, CliError> {
    let resolution = resolve_target(setup, target, event_sender).await?;
    let mut planned = Vec::with_capacity(resolution.graph.len());
    for node in resolution.nodes_in_order() {
        let fingerprint = resolution
            .fingerprint(&node.id)
            .ok_or_else(|| kiln_errors::Error::internal(format!("no fingerprint for {}", node.id)))?;
        planned.push(PlannedNode {
            package: node.id.package_ref().to_string(),
            context: node.id.context,
            kind: node.recipe.kind(),
            fingerprint: fingerprint.short(),
            options: node.options.clone(),
            links: node.links.iter().map(ToString::to_string).collect(),
            tools: node.tools.iter().map(ToString::to_string).collect(),
            cached: setup.cache().contains(fingerprint).await,
        });
    }
    Ok(OperationResult::Resolution(planned))
}

/// Resolve `target` and build every node of the graph
///
/// A failed node does not make this return an error; the report records
/// it and the caller derives the exit code from the report.
pub async fn build(
    setup: &SystemSetup,
    target: &TargetArgs,
    event_sender: EventSender,
    cancel: CancellationToken,
) -> Result<OperationResult, CliError> {
    let resolution = resolve_target(setup, target, event_sender.clone()).await?;
    let config = setup.config();

    let executor = LifecycleExecutor::new(setup.cache().clone(), ExecutorOptions::from_config(config))
        .with_event_sender(event_sender.clone());
    let scheduler = BuildScheduler::new(
        setup.cache().clone(),
        Arc::new(executor),
        SchedulerOptions::from_config(config),
    )
    .with_event_sender(event_sender);

    let report = scheduler.run(&resolution, cancel).await?;
    Ok(OperationResult::BuildReport(report))
}

/// Cache maintenance commands
pub async fn cache(setup: &SystemSetup, command: CacheCommands) -> Result<OperationResult, CliError> {
    let cache = setup.cache();
    match command {
        CacheCommands::List => {
            let mut packages = Vec::new();
            for entry in cache.list().await? {
                let metadata = entry.metadata();
                packages.push(CachedPackage {
                    package: metadata.package.to_string(),
                    context: metadata.context,
                    kind: metadata.kind,
                    fingerprint: metadata.fingerprint.short(),
                    created_at: metadata.created_at,
                    size_bytes: entry.size().await?,
                });
            }
            Ok(OperationResult::CacheList(packages))
        }
        CacheCommands::Stats => Ok(OperationResult::CacheStats(cache.statistics().await?)),
        CacheCommands::Clean {
            all,
            package,
            older_than,
        } => {
            let options = CleanOptions {
                all,
                package,
                older_than: older_than.map(|days| Duration::from_secs(days * 24 * 60 * 60)),
            };
            Ok(OperationResult::CacheCleaned(cache.clean(&options).await?))
        }
    }
}

async fn resolve_target(
    setup: &SystemSetup,
    target: &TargetArgs,
    event_sender: EventSender,
) -> Result<ResolutionResult, CliError> {
    let request = resolution_request(target).await?;
    let registry = setup.registry(&target.recipe_dirs).await?;
    let resolver = Resolver::new(registry).with_event_sender(event_sender);
    Ok(resolver.resolve(&request).await?)
}
