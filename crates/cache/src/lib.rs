#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Fingerprint-addressed package cache for kiln
//!
//! Completed packages live under `<root>/packages/<ab>/<rest-of-hex>/`,
//! addressed by their fingerprint and never by name and version. Each entry
//! holds the packaged files and an `info.json` with the exported metadata.
//!
//! Entries are staged under `<root>/tmp/` and moved into place with a single
//! rename, so a half-written entry is never visible. Builds run in their own
//! directory under `<root>/builds/`. Concurrent requests for one fingerprint
//! are serialized with [`PackageCache::lock`], which coordinates per key and
//! never takes a cache-wide lock.

mod builds;
mod entry;
mod lock;

pub use builds::BuildDirs;
pub use entry::{CacheEntry, EntryMetadata, ENTRY_METADATA_FILE, ENTRY_PACKAGE_DIR};
pub use lock::KeyGuard;

use kiln_errors::{CacheError, Error};
use kiln_events::{AppEvent, CacheEvent, EventEmitter, EventSender};
use kiln_hash::{content_path, Fingerprint};
use kiln_types::PackageRef;
use lock::KeyLocks;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const PACKAGES_DIR: &str = "packages";
const BUILDS_DIR: &str = "builds";
const STAGING_DIR: &str = "tmp";

/// Which entries `clean` removes
#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    /// Remove every entry
    pub all: bool,
    /// Remove entries of this package name
    pub package: Option<String>,
    /// Remove entries older than this
    pub older_than: Option<Duration>,
}

/// What `clean` removed
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanReport {
    pub entries_removed: usize,
    pub build_dirs_removed: usize,
    pub bytes_freed: u64,
}

/// Cache size and content summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStatistics {
    pub entries: usize,
    pub packages: usize,
    pub total_bytes: u64,
    /// Build directories left behind (kept failures or interrupted runs)
    pub build_dirs: usize,
}

/// Package cache rooted at one directory
#[derive(Clone)]
pub struct PackageCache {
    root: PathBuf,
    locks: KeyLocks,
    event_sender: Option<EventSender>,
}

impl EventEmitter for PackageCache {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl PackageCache {
    /// Create a new cache instance; directories are created lazily
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            locks: KeyLocks::default(),
            event_sender: None,
        }
    }

    #[must_use]
    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the entry for `fingerprint`
    #[must_use]
    pub fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(PACKAGES_DIR)
            .join(content_path(fingerprint.hash()))
    }

    /// Check if an entry exists
    pub async fn contains(&self, fingerprint: &Fingerprint) -> bool {
        kiln_fs::exists(&self.entry_path(fingerprint)).await
    }

    /// Find a published entry
    ///
    /// A damaged entry is removed and reported as a miss so that the
    /// package is rebuilt.
    ///
    /// # Errors
    ///
    /// Returns an error if a damaged entry cannot be removed.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, Error> {
        let path = self.entry_path(fingerprint);
        if !kiln_fs::exists(&path).await {
            return Ok(None);
        }
        match CacheEntry::load(&path).await {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint.short(), error = %e, "evicting damaged cache entry");
                self.emit_warning_with_context("evicting damaged cache entry", e.to_string());
                kiln_fs::remove_dir_all(&path).await?;
                Ok(None)
            }
        }
    }

    /// Take exclusive ownership of building `fingerprint`
    ///
    /// Callers look the fingerprint up again after acquiring the guard: if a
    /// concurrent holder published it in the meantime, nothing is built.
    pub async fn lock(&self, package: &PackageRef, fingerprint: &Fingerprint) -> KeyGuard {
        self.locks
            .acquire(*fingerprint, || {
                self.emit(AppEvent::Cache(CacheEvent::WaitingForInFlight {
                    package: package.clone(),
                    fingerprint: fingerprint.short(),
                }));
            })
            .await
    }

    /// Fresh, exclusive build directories for one node
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub async fn create_build_dirs(&self, package: &PackageRef, fingerprint: &Fingerprint) -> Result<BuildDirs, Error> {
        let name = format!("{}-{}-{}", package.name, fingerprint.short(), Uuid::new_v4().simple());
        BuildDirs::create(self.root.join(BUILDS_DIR).join(name)).await
    }

    /// Move a completed package folder into the cache
    ///
    /// The folder is moved, not copied, when it lives on the same
    /// filesystem. If the fingerprint was published concurrently, the
    /// existing entry is kept and returned.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::PublishFailed` if staging or the final rename
    /// fails.
    pub async fn publish(&self, metadata: EntryMetadata, package_folder: &Path) -> Result<CacheEntry, Error> {
        let fingerprint = metadata.fingerprint;
        let failed = |message: String| -> Error {
            CacheError::PublishFailed {
                fingerprint: fingerprint.to_hex(),
                message,
            }
            .into()
        };

        let staged = self.root.join(STAGING_DIR).join(Uuid::new_v4().simple().to_string());
        kiln_fs::create_dir_all(&staged).await?;

        let result: Result<bool, Error> = async {
            let staged_package = staged.join(ENTRY_PACKAGE_DIR);
            if kiln_fs::rename(package_folder, &staged_package).await.is_err() {
                kiln_fs::copy_directory(package_folder, &staged_package).await?;
            }
            let json = serde_json::to_vec_pretty(&metadata)?;
            tokio::fs::write(staged.join(ENTRY_METADATA_FILE), json)
                .await
                .map_err(|e| Error::io_with_path(&e, &staged))?;
            kiln_fs::publish_directory(&staged, &self.entry_path(&fingerprint)).await
        }
        .await;

        let fresh = match result {
            Ok(fresh) => fresh,
            Err(e) => {
                let _ = kiln_fs::remove_dir_all(&staged).await;
                return Err(failed(e.to_string()));
            }
        };

        let path = self.entry_path(&fingerprint);
        if fresh {
            self.emit(AppEvent::Cache(CacheEvent::Published {
                package: metadata.package.clone(),
                fingerprint: fingerprint.short(),
                path: path.clone(),
            }));
        } else {
            tracing::debug!(package = %metadata.package, "entry already published by another build");
        }
        CacheEntry::load(&path).await
    }

    /// All readable entries, ordered by package then creation time
    ///
    /// # Errors
    ///
    /// Returns an error if the packages directory cannot be walked.
    pub async fn list(&self) -> Result<Vec<CacheEntry>, Error> {
        let mut out = Vec::new();
        for path in self.entry_dirs().await? {
            match CacheEntry::load(&path).await {
                Ok(entry) => out.push(entry),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping damaged cache entry"),
            }
        }
        out.sort_by(|a, b| {
            a.package()
                .cmp(b.package())
                .then(a.metadata().created_at.cmp(&b.metadata().created_at))
        });
        Ok(out)
    }

    /// Remove one entry
    ///
    /// # Errors
    ///
    /// Returns `CacheError::NotFound` if there is no such entry.
    pub async fn remove(&self, fingerprint: &Fingerprint) -> Result<(), Error> {
        let path = self.entry_path(fingerprint);
        if !kiln_fs::exists(&path).await {
            return Err(CacheError::NotFound {
                fingerprint: fingerprint.to_hex(),
            }
            .into());
        }
        kiln_fs::remove_dir_all(&path).await
    }

    /// Remove entries matching `options` plus every leftover build and
    /// staging directory
    ///
    /// Do not run while a build is using this cache.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be walked or removed.
    pub async fn clean(&self, options: &CleanOptions) -> Result<CleanReport, Error> {
        let mut report = CleanReport::default();
        let now = chrono::Utc::now();

        for path in self.entry_dirs().await? {
            let remove = match CacheEntry::load(&path).await {
                // Damaged entries are always dropped
                Err(_) => true,
                Ok(entry) => {
                    let metadata = entry.metadata();
                    let by_name = options
                        .package
                        .as_ref()
                        .is_some_and(|name| *name == metadata.package.name);
                    let by_age = options.older_than.is_some_and(|age| {
                        chrono::Duration::from_std(age)
                            .is_ok_and(|age| now.signed_duration_since(metadata.created_at) > age)
                    });
                    options.all || by_name || by_age
                }
            };
            if remove {
                report.bytes_freed += kiln_fs::size(&path).await.unwrap_or(0);
                kiln_fs::remove_dir_all(&path).await?;
                report.entries_removed += 1;
            }
        }

        for dir in [BUILDS_DIR, STAGING_DIR] {
            for path in child_dirs(&self.root.join(dir)).await? {
                report.bytes_freed += kiln_fs::size(&path).await.unwrap_or(0);
                kiln_fs::remove_dir_all(&path).await?;
                if dir == BUILDS_DIR {
                    report.build_dirs_removed += 1;
                }
            }
        }

        self.emit(AppEvent::Cache(CacheEvent::Cleaned {
            removed: report.entries_removed,
        }));
        Ok(report)
    }

    /// Summarize the cache contents
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directories cannot be walked.
    pub async fn statistics(&self) -> Result<CacheStatistics, Error> {
        let entries = self.list().await?;
        let mut stats = CacheStatistics {
            entries: entries.len(),
            ..CacheStatistics::default()
        };

        let mut names: Vec<&str> = entries.iter().map(|e| e.package().name.as_str()).collect();
        names.dedup();
        stats.packages = names.len();

        for entry in &entries {
            stats.total_bytes += entry.size().await?;
        }
        stats.build_dirs = child_dirs(&self.root.join(BUILDS_DIR)).await?.len();
        Ok(stats)
    }

    /// Entry directories: two levels below `packages/`
    async fn entry_dirs(&self) -> Result<Vec<PathBuf>, Error> {
        let mut out = Vec::new();
        for prefix in child_dirs(&self.root.join(PACKAGES_DIR)).await? {
            let is_prefix = prefix
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.len() == 2);
            if !is_prefix {
                continue;
            }
            out.extend(child_dirs(&prefix).await?);
        }
        Ok(out)
    }
}

/// Direct subdirectories of `dir`; a missing directory has none
async fn child_dirs(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut out = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(Error::io_with_path(&e, dir)),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}
