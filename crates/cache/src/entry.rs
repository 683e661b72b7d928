//! Cache entry representation

use chrono::{DateTime, Utc};
use kiln_errors::{CacheError, Error};
use kiln_hash::Fingerprint;
use kiln_types::{NodeContext, Options, PackageInfo, PackageKind, PackageRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Name of the metadata file inside every entry
pub const ENTRY_METADATA_FILE: &str = "info.json";

/// Name of the directory holding the packaged files
pub const ENTRY_PACKAGE_DIR: &str = "package";

/// Everything recorded about a published package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub package: PackageRef,
    pub fingerprint: Fingerprint,
    pub context: NodeContext,
    pub kind: PackageKind,
    /// Settings values the fingerprint covered
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub options: Options,
    /// Exported metadata with directories relative to the package folder
    pub package_info: PackageInfo,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub build_duration_ms: u64,
}

/// A package published in the cache
#[derive(Debug, Clone)]
pub struct CacheEntry {
    path: PathBuf,
    metadata: EntryMetadata,
}

impl CacheEntry {
    /// Load the entry rooted at `path`
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Corrupted` if the metadata file is missing or
    /// unreadable, or the package directory is missing.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let metadata_path = path.join(ENTRY_METADATA_FILE);
        let corrupted = |message: String| -> Error {
            CacheError::Corrupted {
                path: path.display().to_string(),
                message,
            }
            .into()
        };

        let content = fs::read(&metadata_path)
            .await
            .map_err(|e| corrupted(format!("cannot read {ENTRY_METADATA_FILE}: {e}")))?;
        let metadata: EntryMetadata = serde_json::from_slice(&content)
            .map_err(|e| corrupted(format!("invalid {ENTRY_METADATA_FILE}: {e}")))?;

        if !kiln_fs::exists(&path.join(ENTRY_PACKAGE_DIR)).await {
            return Err(corrupted(format!("missing {ENTRY_PACKAGE_DIR} directory")));
        }

        Ok(Self {
            path: path.to_path_buf(),
            metadata,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn metadata(&self) -> &EntryMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.metadata.fingerprint
    }

    #[must_use]
    pub fn package(&self) -> &PackageRef {
        &self.metadata.package
    }

    /// Folder dependents consume
    #[must_use]
    pub fn package_folder(&self) -> PathBuf {
        self.path.join(ENTRY_PACKAGE_DIR)
    }

    /// Exported metadata with absolute directories
    #[must_use]
    pub fn package_info(&self) -> PackageInfo {
        self.metadata.package_info.rooted(&self.package_folder())
    }

    /// Size of the entry on disk
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be walked.
    pub async fn size(&self) -> Result<u64, Error> {
        kiln_fs::size(&self.path).await
    }

    /// Files shipped in the package folder, relative to it
    ///
    /// # Errors
    ///
    /// Returns an error if the package folder cannot be walked.
    pub async fn list_files(&self) -> Result<Vec<PathBuf>, Error> {
        kiln_fs::list_files(&self.package_folder()).await
    }
}
