//! Per-node process environment
//!
//! Every node starts from a snapshot of the orchestrator's environment and
//! only ever mutates its own copy. Commands are spawned with a cleared
//! environment and this map applied, so nothing a recipe sets can leak into
//! another node or back into kiln itself.

use kiln_errors::Error;
use kiln_recipe::Variables;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[cfg(windows)]
pub const PATH_VAR: &str = "Path";
#[cfg(not(windows))]
pub const PATH_VAR: &str = "PATH";

/// Isolated environment of one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnvironment {
    vars: BTreeMap<String, String>,
}

impl BuildEnvironment {
    /// Snapshot of the current process environment
    ///
    /// Variables that are not valid UTF-8 are dropped.
    #[must_use]
    pub fn inherited() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
                .collect(),
        }
    }

    #[must_use]
    pub fn from_vars(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Set every variable after `${...}` expansion
    pub fn extend_expanded(&mut self, vars: &BTreeMap<String, String>, variables: &Variables) {
        for (key, value) in vars {
            self.set(key.clone(), variables.expand(value));
        }
    }

    /// Put `dirs` in front of the search list held in `var`
    ///
    /// # Errors
    ///
    /// Returns an error if a directory contains the platform's list separator.
    pub fn prepend_paths(&mut self, var: &str, dirs: &[PathBuf]) -> Result<(), Error> {
        if dirs.is_empty() {
            return Ok(());
        }
        let mut entries: Vec<PathBuf> = dirs.to_vec();
        if let Some(current) = self.get(var) {
            entries.extend(std::env::split_paths(current));
        }
        let joined: OsString = std::env::join_paths(&entries)
            .map_err(|e| Error::internal(format!("cannot extend {var}: {e}")))?;
        self.set(var, joined.to_string_lossy().into_owned());
        Ok(())
    }

    /// Directories searched for programs
    #[must_use]
    pub fn search_path(&self) -> Option<&str> {
        self.get(PATH_VAR)
    }

    /// Locate `program` on this environment's `PATH`
    #[must_use]
    pub fn find_program(&self, program: &str, cwd: &Path) -> Option<PathBuf> {
        which::which_in(program, self.search_path(), cwd).ok()
    }

    /// Replace a command's environment with this one
    pub fn apply(&self, command: &mut tokio::process::Command) {
        command.env_clear();
        command.envs(&self.vars);
    }
}
