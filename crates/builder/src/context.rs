//! Scoped state of one node's lifecycle

use crate::environment::BuildEnvironment;
use crate::process::{self, CommandOutput, Invocation};
use kiln_cache::BuildDirs;
use kiln_errors::Error;
use kiln_events::{EventEmitter, EventSender};
use kiln_hash::Fingerprint;
use kiln_recipe::{Recipe, Variables};
use kiln_resolver::NodeId;
use kiln_types::{Options, PackageInfo, PackageRef, Phase, Settings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A completed dependency as seen by its consumers
#[derive(Debug, Clone)]
pub struct UpstreamPackage {
    pub package: PackageRef,
    /// Exported metadata with absolute directories
    pub info: PackageInfo,
    pub package_folder: PathBuf,
    /// Declared directly by the consuming recipe
    pub direct: bool,
}

impl UpstreamPackage {
    /// Name used for generated build-system files
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.info
            .properties
            .get("cmake_file_name")
            .map_or(self.package.name.as_str(), String::as_str)
    }
}

/// Per-node state threaded through every phase
///
/// Lives exactly as long as one lifecycle run. Nothing in here is shared
/// with other nodes except the read-only recipe.
#[derive(Debug)]
pub struct BuildContext {
    pub node: NodeId,
    pub package: PackageRef,
    pub recipe: Arc<Recipe>,
    pub settings: Settings,
    pub options: Options,
    pub fingerprint: Fingerprint,
    pub dirs: BuildDirs,
    pub env: BuildEnvironment,
    /// Link closure, dependencies first
    pub upstream: Vec<UpstreamPackage>,
    /// Tool requirements, available once the tool gate opened
    pub tools: Vec<UpstreamPackage>,
    pub jobs: usize,
    pub command_timeout: Option<Duration>,
    pub cancel: CancellationToken,
    event_sender: Option<EventSender>,
}

impl EventEmitter for BuildContext {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }

    fn correlation_id(&self) -> Option<String> {
        Some(self.package.to_string())
    }
}

/// Everything needed to open a context besides the folders
#[derive(Debug, Clone)]
pub struct ContextSeed {
    pub node: NodeId,
    pub recipe: Arc<Recipe>,
    pub settings: Settings,
    pub options: Options,
    pub fingerprint: Fingerprint,
    pub upstream: Vec<UpstreamPackage>,
}

impl BuildContext {
    #[must_use]
    pub fn new(
        seed: ContextSeed,
        dirs: BuildDirs,
        env: BuildEnvironment,
        jobs: usize,
        command_timeout: Option<Duration>,
        cancel: CancellationToken,
        event_sender: Option<EventSender>,
    ) -> Self {
        Self {
            package: seed.node.package_ref(),
            node: seed.node,
            recipe: seed.recipe,
            settings: seed.settings,
            options: seed.options,
            fingerprint: seed.fingerprint,
            dirs,
            env,
            upstream: seed.upstream,
            tools: Vec::new(),
            jobs,
            command_timeout,
            cancel,
            event_sender,
        }
    }

    /// Aggregated metadata of every link requirement in the closure
    #[must_use]
    pub fn merged_upstream(&self) -> PackageInfo {
        let mut merged = PackageInfo::default();
        for upstream in &self.upstream {
            merged.merge(&upstream.info);
        }
        merged
    }

    /// Binary directories of every tool requirement
    #[must_use]
    pub fn tool_bindirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for tool in &self.tools {
            for dir in &tool.info.aggregated().bindirs {
                if !dirs.contains(dir) {
                    dirs.push(dir.clone());
                }
            }
        }
        dirs
    }

    /// Substitution table reflecting the current environment
    #[must_use]
    pub fn variables(&self) -> Variables {
        let mut variables = Variables::new()
            .with("source_folder", path_string(&self.dirs.source))
            .with("build_folder", path_string(&self.dirs.build))
            .with("package_folder", path_string(&self.dirs.package))
            .with("generators_folder", path_string(&self.dirs.generators))
            .with("recipe_folder", path_string(&self.recipe.recipe_dir))
            .with("name", self.package.name.clone())
            .with("version", self.package.version.to_string())
            .with("jobs", self.jobs.to_string())
            .with("os", self.settings.os.to_string())
            .with("arch", self.settings.arch.to_string())
            .with("build_type", self.settings.build_type.to_string())
            .with("cppstd", self.settings.compiler.cppstd.to_string());
        variables.set_options(&self.options);
        variables.set_env(self.env.vars());
        variables
    }

    /// Resolve a recipe path against `base` unless it is absolute
    #[must_use]
    pub fn resolve_path(&self, base: &Path, path: &str) -> PathBuf {
        let expanded = self.variables().expand(path);
        let expanded = Path::new(&expanded);
        if expanded.is_absolute() {
            expanded.to_path_buf()
        } else {
            base.join(expanded)
        }
    }

    /// Run a program with the node's environment, failing on non-zero exit
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`process::run`].
    pub async fn run(
        &self,
        phase: Phase,
        program: &str,
        args: &[String],
        working_dir: &Path,
    ) -> Result<CommandOutput, Error> {
        process::run(self, self.invocation(phase, program, args, working_dir)).await
    }

    /// Like [`BuildContext::run`] but returns the exit code instead of failing
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`process::run_unchecked`].
    pub async fn run_unchecked(
        &self,
        phase: Phase,
        program: &str,
        args: &[String],
        working_dir: &Path,
    ) -> Result<CommandOutput, Error> {
        process::run_unchecked(self, self.invocation(phase, program, args, working_dir)).await
    }

    fn invocation<'a>(
        &'a self,
        phase: Phase,
        program: &'a str,
        args: &'a [String],
        working_dir: &'a Path,
    ) -> Invocation<'a> {
        Invocation {
            package: &self.package,
            phase,
            program,
            args,
            working_dir,
            env: &self.env,
            timeout: self.command_timeout,
            cancel: &self.cancel,
        }
    }
}

pub(crate) fn path_string(path: &Path) -> String {
    path.display().to_string()
}
