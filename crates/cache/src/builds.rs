//! Per-node build directories

use kiln_errors::Error;
use std::path::{Path, PathBuf};

/// Folders owned by one node for the duration of its lifecycle
#[derive(Debug, Clone)]
pub struct BuildDirs {
    pub root: PathBuf,
    pub source: PathBuf,
    pub build: PathBuf,
    pub generators: PathBuf,
    pub package: PathBuf,
}

impl BuildDirs {
    /// Create the folder set below `root`
    ///
    /// # Errors
    ///
    /// Returns an error if any folder cannot be created.
    pub async fn create(root: PathBuf) -> Result<Self, Error> {
        let dirs = Self {
            source: root.join("src"),
            build: root.join("build"),
            generators: root.join("build").join("generators"),
            package: root.join("package"),
            root,
        };
        for dir in [&dirs.source, &dirs.build, &dirs.generators, &dirs.package] {
            kiln_fs::create_dir_all(dir).await?;
        }
        Ok(dirs)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Delete everything, including a package folder that was never published
    ///
    /// # Errors
    ///
    /// Returns an error if the tree cannot be removed.
    pub async fn remove(&self) -> Result<(), Error> {
        kiln_fs::remove_dir_all(&self.root).await
    }
}
