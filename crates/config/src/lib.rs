#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration for kiln
//!
//! Precedence, lowest first: built-in defaults, `~/.config/kiln/config.toml`
//! (or `--config`), `KILN_*` environment variables, command-line flags. The
//! last layer is applied by the CLI.

pub mod jobs;

pub use jobs::{acquire_semaphore_permit, calculate_build_jobs, create_semaphore};

use kiln_errors::{ConfigError, Error};
use kiln_types::{ColorChoice, OutputFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[cfg(windows)]
const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: char = ':';

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub build: BuildConfig,
    pub paths: PathConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub default_output: OutputFormat,
    pub color: ColorChoice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Concurrent nodes; 0 picks from the CPU count
    pub jobs: usize,
    /// Treat test failures as build failures
    pub strict_tests: bool,
    pub fetch_retries: u32,
    /// Seconds before the first fetch retry, doubled for each further one
    pub retry_delay: u64,
    /// Seconds a single recipe command may run; 0 is unlimited
    pub command_timeout: u64,
    pub keep_failed_builds: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            jobs: 0,
            strict_tests: false,
            fetch_retries: 3,
            retry_delay: 1,
            command_timeout: 0,
            keep_failed_builds: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub cache_dir: Option<PathBuf>,
    pub recipe_dirs: Vec<PathBuf>,
}

impl Config {
    /// `<config dir>/kiln/config.toml`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoConfigDir` if the platform has no config directory.
    pub fn default_path() -> Result<PathBuf, Error> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("kiln").join("config.toml"))
    }

    /// Read one TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Unreadable` or `ConfigError::Parse`, both naming the file.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let shown = || path.display().to_string();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Unreadable {
                path: shown(),
                message: e.to_string(),
            })?;
        let config = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: shown(),
            message: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load an explicit file, or the default file when it exists
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the chosen file cannot be read or parsed.
    pub async fn load(explicit: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = explicit {
            return Self::load_from_file(path).await;
        }
        let path = Self::default_path()?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            Self::load_from_file(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `KILN_*` environment variables on top of the loaded file
    ///
    /// `KILN_RECIPE_PATH` entries are searched before configured directories.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first malformed variable.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        if let Some(output) = env_parsed("KILN_OUTPUT")? {
            self.general.default_output = output;
        }
        if let Some(color) = env_parsed("KILN_COLOR")? {
            self.general.color = color;
        }
        if let Some(jobs) = env_parsed("KILN_JOBS")? {
            self.build.jobs = jobs;
        }
        if let Some(retries) = env_parsed("KILN_FETCH_RETRIES")? {
            self.build.fetch_retries = retries;
        }
        if let Ok(strict) = std::env::var("KILN_STRICT_TESTS") {
            self.build.strict_tests = match strict.as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => return Err(invalid("KILN_STRICT_TESTS", strict)),
            };
        }
        if let Ok(dir) = std::env::var("KILN_CACHE_DIR") {
            if dir.is_empty() {
                return Err(invalid("KILN_CACHE_DIR", dir));
            }
            self.paths.cache_dir = Some(PathBuf::from(dir));
        }
        if let Ok(list) = std::env::var("KILN_RECIPE_PATH") {
            let mut dirs: Vec<PathBuf> = list
                .split(PATH_LIST_SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
            dirs.append(&mut self.paths.recipe_dirs);
            self.paths.recipe_dirs = dirs;
        }
        Ok(())
    }

    /// Cache root: configured, else the platform cache dir, else `.kiln-cache`
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.paths.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir().map_or_else(|| PathBuf::from(".kiln-cache"), |dir| dir.join("kiln"))
        })
    }

    /// Recipe search directories, falling back to `./recipes`
    #[must_use]
    pub fn recipe_dirs(&self) -> Vec<PathBuf> {
        if self.paths.recipe_dirs.is_empty() {
            vec![PathBuf::from("recipes")]
        } else {
            self.paths.recipe_dirs.clone()
        }
    }

    #[must_use]
    pub fn build_jobs(&self) -> usize {
        calculate_build_jobs(self.build.jobs)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.build.retry_delay)
    }

    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.build.command_timeout > 0).then(|| Duration::from_secs(self.build.command_timeout))
    }
}

fn env_parsed<T: FromStr>(name: &str) -> Result<Option<T>, Error> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| invalid(name, raw)),
        Err(_) => Ok(None),
    }
}

fn invalid(field: &str, value: String) -> Error {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value,
    }
    .into()
}
