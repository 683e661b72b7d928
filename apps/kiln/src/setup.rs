//! Run setup: configuration, recipe registry, cache and root requirements

use crate::cli::TargetArgs;
use crate::error::CliError;
use kiln_cache::PackageCache;
use kiln_config::Config;
use kiln_events::EventSender;
use kiln_recipe::{Manifest, RecipeRegistry, SettingsOverrides, MANIFEST_FILE};
use kiln_resolver::ResolutionRequest;
use kiln_types::{PackageRef, Requirement, Settings};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Components shared by every command
pub struct SystemSetup {
    config: Config,
    cache: PackageCache,
}

impl SystemSetup {
    /// Create the cache handle; nothing touches the filesystem yet
    pub fn new(config: Config, event_sender: EventSender) -> Self {
        let cache = PackageCache::new(config.cache_dir()).with_event_sender(event_sender);
        Self { config, cache }
    }

    /// Make sure the cache root exists
    pub async fn initialize(&self) -> Result<(), CliError> {
        let root = self.cache.root();
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| kiln_errors::Error::io_with_path(&e, root))?;
        debug!(cache = %root.display(), "cache directory ready");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &PackageCache {
        &self.cache
    }

    /// Load every recipe visible to this run
    ///
    /// Directories given on the command line come first, then the ones
    /// from configuration and the environment. The `./recipes` fallback
    /// only applies when no directory was named anywhere.
    pub async fn registry(&self, extra_dirs: &[PathBuf]) -> Result<Arc<RecipeRegistry>, CliError> {
        let mut dirs = extra_dirs.to_vec();
        if dirs.is_empty() || !self.config.paths.recipe_dirs.is_empty() {
            dirs.extend(self.config.recipe_dirs());
        }
        let registry = RecipeRegistry::load_dirs(&dirs).await?;
        info!(recipes = registry.len(), dirs = dirs.len(), "recipe registry loaded");
        Ok(Arc::new(registry))
    }
}

/// Build the resolution request for `target`
///
/// Settings start from the host, then the manifest, then command line
/// flags. Root requirements from the manifest come before those given on
/// the command line.
pub async fn resolution_request(target: &TargetArgs) -> Result<ResolutionRequest, CliError> {
    let manifest = load_manifest(target).await?;

    let mut settings = Settings::host();
    if let Some(manifest) = &manifest {
        settings = manifest.settings.apply(settings)?;
    }
    settings = cli_settings(target).apply(settings)?;

    let mut requirements = match &manifest {
        Some(manifest) => manifest.root_requirements(&settings)?,
        None => Vec::new(),
    };
    for reference in &target.requires {
        requirements.push(Requirement::link(parse_reference(reference)?));
    }
    for reference in &target.tool_requires {
        requirements.push(Requirement::tool(parse_reference(reference)?));
    }

    if requirements.iter().all(|r| r.is_override) {
        return Err(CliError::InvalidArguments(format!(
            "no root requirements given and no {MANIFEST_FILE} found"
        )));
    }

    for option in &target.options {
        apply_option(&mut requirements, option)?;
    }

    Ok(ResolutionRequest::new(requirements, settings))
}

async fn load_manifest(target: &TargetArgs) -> Result<Option<Manifest>, CliError> {
    if let Some(path) = &target.manifest {
        return Ok(Some(Manifest::load(path).await?));
    }
    if !target.requires.is_empty() || !target.tool_requires.is_empty() {
        return Ok(None);
    }
    let default = Path::new(MANIFEST_FILE);
    if tokio::fs::try_exists(default).await.unwrap_or(false) {
        debug!(manifest = %default.display(), "using manifest from current directory");
        return Ok(Some(Manifest::load(default).await?));
    }
    Ok(None)
}

fn cli_settings(target: &TargetArgs) -> SettingsOverrides {
    SettingsOverrides {
        os: target.os.clone(),
        arch: target.arch.clone(),
        build_type: target.build_type.clone(),
        compiler: target.compiler.clone(),
        compiler_version: target.compiler_version.clone(),
        cppstd: target.cppstd,
    }
}

fn parse_reference(input: &str) -> Result<PackageRef, CliError> {
    PackageRef::parse(input).map_err(|e| CliError::Ops(e.into()))
}

/// Apply a `name:key=value` option to every root requirement on `name`
fn apply_option(requirements: &mut [Requirement], spec: &str) -> Result<(), CliError> {
    let invalid = || CliError::InvalidArguments(format!("option '{spec}' must look like name:key=value"));
    let (name, assignment) = spec.split_once(':').ok_or_else(invalid)?;
    let (key, value) = assignment.split_once('=').ok_or_else(invalid)?;
    if name.is_empty() || key.is_empty() {
        return Err(invalid());
    }

    let mut matched = false;
    for requirement in requirements
        .iter_mut()
        .filter(|r| !r.is_override && r.reference.name == name)
    {
        requirement.options.insert(key.to_string(), value.to_string());
        matched = true;
    }
    if matched {
        Ok(())
    } else {
        Err(CliError::InvalidArguments(format!(
            "option '{spec}' names '{name}', which is not a root requirement"
        )))
    }
}
