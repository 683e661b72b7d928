//! Phase sequencing for one graph node
//!
//! `validate → source → generate → build → package → package_info → test`.
//! Validation only looks at the resolved node, so a rejected node never
//! touches the filesystem. Everything after it works inside the node's own
//! build folders, which are removed again when the node fails.

use crate::cmake::{self, CmakeSetup};
use crate::context::{BuildContext, ContextSeed, UpstreamPackage};
use crate::environment::{BuildEnvironment, PATH_VAR};
use crate::gate::ToolGate;
use crate::packaging;
use crate::source::{self, DefaultSourceFetcher, SourceFetcher};
use crate::steps::run_steps;
use async_trait::async_trait;
use kiln_cache::{BuildDirs, PackageCache};
use kiln_config::Config;
use kiln_errors::{BuildError, Error};
use kiln_events::{AppEvent, BuildEvent, EventEmitter, EventSender, FailureContext};
use kiln_hash::Fingerprint;
use kiln_recipe::Generate;
use kiln_resolver::ResolvedNode;
use kiln_types::{Os, PackageInfo, Phase, TestOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Everything a node needs once its link requirements are done
#[derive(Debug, Clone)]
pub struct NodeJob {
    pub node: ResolvedNode,
    pub fingerprint: Fingerprint,
    /// Link closure, dependencies first
    pub upstream: Vec<UpstreamPackage>,
    pub cancel: CancellationToken,
}

/// Result of a successful lifecycle, ready to be published
#[derive(Debug, Clone)]
pub struct BuiltNode {
    pub dirs: BuildDirs,
    /// Declared metadata, relative to the package folder
    pub package_info: PackageInfo,
    pub test: TestOutcome,
}

/// Runs the lifecycle of a node that missed the cache
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, job: NodeJob, gate: &ToolGate) -> Result<BuiltNode, Error>;
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Additional attempts after a transient source failure
    pub fetch_retries: u32,
    pub retry_delay: Duration,
    pub command_timeout: Option<Duration>,
    /// Parallelism handed to external build tools
    pub jobs: usize,
    pub keep_failed_builds: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            fetch_retries: 2,
            retry_delay: Duration::from_secs(2),
            command_timeout: None,
            jobs: kiln_config::calculate_build_jobs(0),
            keep_failed_builds: false,
        }
    }
}

impl ExecutorOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            fetch_retries: config.build.fetch_retries,
            retry_delay: config.retry_delay(),
            command_timeout: config.command_timeout(),
            jobs: config.build_jobs(),
            keep_failed_builds: config.build.keep_failed_builds,
        }
    }
}

/// Default [`NodeExecutor`] driving recipe phases
pub struct LifecycleExecutor {
    cache: PackageCache,
    fetcher: Arc<dyn SourceFetcher>,
    options: ExecutorOptions,
    base_env: BuildEnvironment,
    event_sender: Option<EventSender>,
}

impl EventEmitter for LifecycleExecutor {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl LifecycleExecutor {
    /// Executor building inside `cache`, starting every node from a
    /// snapshot of the current process environment
    #[must_use]
    pub fn new(cache: PackageCache, options: ExecutorOptions) -> Self {
        Self {
            cache,
            fetcher: Arc::new(DefaultSourceFetcher::new()),
            options,
            base_env: BuildEnvironment::inherited(),
            event_sender: None,
        }
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    #[must_use]
    pub fn with_environment(mut self, env: BuildEnvironment) -> Self {
        self.base_env = env;
        self
    }

    #[must_use]
    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    async fn run_phases(&self, ctx: &mut BuildContext, gate: &ToolGate) -> Result<BuiltNode, Error> {
        let recipe = Arc::clone(&ctx.recipe);
        let definition = &recipe.definition;
        let os = ctx.settings.os.clone();

        timed(ctx, Phase::Source, self.source(ctx)).await?;

        ctx.tools = gate.wait().await?;
        prepare_environment(ctx)?;

        let generate = definition.generate.resolve(&ctx.package, Phase::Generate, &os)?.clone();
        let variables = ctx.variables();
        ctx.env.extend_expanded(&generate.env, &variables);
        let cmake = timed(ctx, Phase::Generate, generate_files(ctx, &generate)).await?;

        let build = definition.build.resolve(&ctx.package, Phase::Build, &os)?;
        timed(ctx, Phase::Build, run_steps(ctx, Phase::Build, build, &cmake)).await?;

        let package = definition.package.resolve(&ctx.package, Phase::Package, &os)?;
        timed(ctx, Phase::Package, run_steps(ctx, Phase::Package, package, &cmake)).await?;

        let info = definition
            .package_info
            .resolve(&ctx.package, Phase::PackageInfo, &os)?
            .clone();
        timed(
            ctx,
            Phase::PackageInfo,
            packaging::check_contract(&ctx.package, recipe.kind(), &info, &ctx.dirs.package),
        )
        .await?;

        let own = info.rooted(&ctx.dirs.package).aggregated();
        ctx.env.prepend_paths(runtime_library_var(), &own.libdirs)?;
        ctx.env.prepend_paths(PATH_VAR, &own.bindirs)?;
        let test = self.test(ctx, &os, &cmake).await?;

        Ok(BuiltNode {
            dirs: ctx.dirs.clone(),
            package_info: info,
            test,
        })
    }

    async fn source(&self, ctx: &BuildContext) -> Result<(), Error> {
        let Some(source) = &ctx.recipe.source else {
            return Ok(());
        };

        let max_attempts = usize::try_from(self.options.fetch_retries)
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.fetcher.fetch(ctx, &source.method).await {
                Ok(()) => break,
                Err(e) if attempt < max_attempts && source::is_transient(&e) => {
                    tracing::warn!(package = %ctx.package, attempt, error = %e, "source fetch failed, retrying");
                    ctx.emit(AppEvent::Build(BuildEvent::SourceRetrying {
                        package: ctx.package.clone(),
                        attempt,
                        max_attempts,
                        reason: e.to_string(),
                    }));
                    kiln_fs::ensure_empty_dir(&ctx.dirs.source).await?;
                    tokio::select! {
                        () = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                        () = tokio::time::sleep(self.options.retry_delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }

        source::apply_patches(ctx, &ctx.recipe.patch_paths()).await
    }

    async fn test(&self, ctx: &BuildContext, os: &Os, cmake: &CmakeSetup) -> Result<TestOutcome, Error> {
        let Some(test) = &ctx.recipe.definition.test else {
            self.skip_phase(ctx, Phase::Test, "no test declared");
            return Ok(TestOutcome::NotRun);
        };
        if !ctx.settings.can_run() {
            self.skip_phase(
                ctx,
                Phase::Test,
                format!("{}/{} binaries cannot run on this machine", ctx.settings.os, ctx.settings.arch),
            );
            return Ok(TestOutcome::NotRun);
        }
        let steps = test.resolve(&ctx.package, Phase::Test, os)?;

        match timed(ctx, Phase::Test, run_steps(ctx, Phase::Test, steps, cmake)).await {
            Ok(()) => Ok(TestOutcome::Passed),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                let failure = BuildError::TestFailed {
                    package: ctx.package.to_string(),
                    message: e.to_string(),
                };
                ctx.emit(AppEvent::Build(BuildEvent::TestFailed {
                    package: ctx.package.clone(),
                    failure: FailureContext::from_error(&failure),
                }));
                Ok(TestOutcome::Failed {
                    message: e.to_string(),
                })
            }
        }
    }

    fn skip_phase(&self, ctx: &BuildContext, phase: Phase, reason: impl Into<String>) {
        ctx.emit(AppEvent::Build(BuildEvent::PhaseSkipped {
            package: ctx.package.clone(),
            phase,
            reason: reason.into(),
        }));
    }
}

#[async_trait]
impl NodeExecutor for LifecycleExecutor {
    async fn execute(&self, job: NodeJob, gate: &ToolGate) -> Result<BuiltNode, Error> {
        let package = job.node.id.package_ref();

        self.emit_phase_started(&package, Phase::Validate);
        let start = Instant::now();
        validate(&job.node)?;
        self.emit_phase_completed(&package, Phase::Validate, elapsed_ms(start));

        let dirs = self.cache.create_build_dirs(&package, &job.fingerprint).await?;
        let seed = ContextSeed {
            node: job.node.id.clone(),
            recipe: Arc::clone(&job.node.recipe),
            settings: job.node.settings.clone(),
            options: job.node.options.clone(),
            fingerprint: job.fingerprint,
            upstream: job.upstream,
        };
        let mut ctx = BuildContext::new(
            seed,
            dirs.clone(),
            self.base_env.clone(),
            self.options.jobs,
            self.options.command_timeout,
            job.cancel,
            self.event_sender.clone(),
        );

        let result = self.run_phases(&mut ctx, gate).await;
        if result.is_err() {
            if self.options.keep_failed_builds {
                self.emit_warning_with_context(
                    format!("kept build folder of failed {package}"),
                    dirs.root.display().to_string(),
                );
            } else if let Err(e) = dirs.remove().await {
                tracing::warn!(package = %package, error = %e, "failed to remove build folder");
            }
        }
        result
    }
}

/// Emit start and completion events around one phase
async fn timed<T>(ctx: &BuildContext, phase: Phase, work: impl Future<Output = Result<T, Error>>) -> Result<T, Error> {
    ctx.emit_phase_started(&ctx.package, phase);
    let start = Instant::now();
    let out = work.await?;
    ctx.emit_phase_completed(&ctx.package, phase, elapsed_ms(start));
    Ok(out)
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Check the node's settings and options against the recipe's requirements
///
/// # Errors
///
/// Returns `BuildError::Validation` describing the first unmet requirement.
pub fn validate(node: &ResolvedNode) -> Result<(), BuildError> {
    let validation = &node.recipe.definition.validate;
    let failed = |message: String| BuildError::Validation {
        package: node.id.package_ref().to_string(),
        message,
    };

    if let Some(min) = validation.min_cppstd {
        let cppstd = node.settings.compiler.cppstd;
        if cppstd < min {
            return Err(failed(format!("requires at least C++{min}, settings select C++{cppstd}")));
        }
    }

    if !validation.os.is_empty()
        && !validation
            .os
            .iter()
            .any(|name| Os::parse_known(name).is_ok_and(|os| os == node.settings.os))
    {
        return Err(failed(format!(
            "{} is not supported (supported: {})",
            node.settings.os,
            validation.os.join(", ")
        )));
    }

    for (name, required) in &validation.require_options {
        match node.options.get(name) {
            Some(value) if value == required => {}
            Some(value) => return Err(failed(format!("option {name}={value}, requires {name}={required}"))),
            None => return Err(failed(format!("requires option {name}={required}"))),
        }
    }
    Ok(())
}

/// Variable the dynamic loader searches for shared libraries
#[must_use]
pub fn runtime_library_var() -> &'static str {
    if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else if cfg!(windows) {
        PATH_VAR
    } else {
        "LD_LIBRARY_PATH"
    }
}

/// Tools on `PATH`, upstream runtimes on the loader path, recipe `env` last
fn prepare_environment(ctx: &mut BuildContext) -> Result<(), Error> {
    let tool_bindirs = ctx.tool_bindirs();
    let merged = ctx.merged_upstream();

    ctx.env.prepend_paths(PATH_VAR, &merged.bindirs)?;
    ctx.env.prepend_paths(PATH_VAR, &tool_bindirs)?;
    ctx.env.prepend_paths(runtime_library_var(), &merged.libdirs)?;

    let recipe = Arc::clone(&ctx.recipe);
    let variables = ctx.variables();
    ctx.env.extend_expanded(&recipe.definition.env, &variables);
    Ok(())
}

async fn generate_files(ctx: &BuildContext, generate: &Generate) -> Result<CmakeSetup, Error> {
    kiln_fs::create_dir_all(&ctx.dirs.generators).await?;

    let setup = match &generate.cmake_toolchain {
        Some(toolchain) => cmake::write_toolchain(ctx, toolchain).await?,
        None => CmakeSetup::default(),
    };
    if generate.cmake_deps {
        let written = cmake::write_deps(ctx).await?;
        tracing::debug!(package = %ctx.package, files = written.len(), "wrote cmake package configs");
    }
    Ok(setup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_recipe::parse_recipe_str;
    use kiln_resolver::NodeId;
    use kiln_types::{NodeContext, Options, Settings};
    use std::path::Path;

    fn node(yaml: &str, settings: Settings, options: Options) -> ResolvedNode {
        let recipe = parse_recipe_str(yaml, Path::new("/recipes/vulkan"))
            .unwrap()
            .remove(0);
        ResolvedNode {
            id: NodeId::new(
                recipe.name(),
                recipe.version().clone(),
                NodeContext::Target,
            ),
            recipe: Arc::new(recipe),
            settings,
            options,
            links: Vec::new(),
            tools: Vec::new(),
        }
    }

    const RECIPE: &str = r"
metadata:
  name: vulkan-validationlayers
  version: 1.3.290
options:
  shared:
    default: 'True'
validate:
  min_cppstd: 17
  os: [linux, windows, macos]
  require_options:
    shared: 'True'
";

    #[test]
    fn test_validate_accepts_matching_settings() {
        let settings = Settings::host().with_cppstd(20);
        let options = Options::from([("shared".to_string(), "True".to_string())]);
        validate(&node(RECIPE, settings, options)).unwrap();
    }

    #[test]
    fn test_validate_rejects_old_cppstd() {
        let settings = Settings::host().with_cppstd(14);
        let options = Options::from([("shared".to_string(), "True".to_string())]);
        let err = validate(&node(RECIPE, settings, options)).unwrap_err();
        assert!(matches!(err, BuildError::Validation { .. }));
        assert!(err.to_string().contains("C++17"));
    }

    #[test]
    fn test_validate_rejects_unsupported_os_and_options() {
        let options = Options::from([("shared".to_string(), "True".to_string())]);
        let android = Settings::host().with_cppstd(17).with_os(Os::Android);
        let err = validate(&node(RECIPE, android, options)).unwrap_err();
        assert!(err.to_string().contains("not supported"));

        let static_build = Options::from([("shared".to_string(), "False".to_string())]);
        let err = validate(&node(RECIPE, Settings::host().with_cppstd(17), static_build)).unwrap_err();
        assert!(err.to_string().contains("shared=True"));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.build.fetch_retries = 4;
        config.build.command_timeout = 0;
        let options = ExecutorOptions::from_config(&config);
        assert_eq!(options.fetch_retries, 4);
        assert!(options.command_timeout.is_none());
        assert!(options.jobs >= 1);
    }
}
