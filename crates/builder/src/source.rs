//! Source acquisition and patching
//!
//! Transport is a seam: the lifecycle talks to a [`SourceFetcher`], and the
//! default implementation shells out to `git`, downloads with `reqwest`, or
//! copies a local tree. Fetch failures are reported as
//! `BuildError::SourceFetch` and retried by the lifecycle; patch failures
//! are never retried.

use crate::archive::{self, ArchiveFormat};
use crate::context::BuildContext;
use async_trait::async_trait;
use kiln_errors::{BuildError, Error};
use kiln_hash::{verify_file, Hash};
use kiln_recipe::{FetchSource, GitSource, LocalSource, SourceMethod};
use kiln_types::Phase;
use std::path::{Path, PathBuf};

/// Fills `ctx.dirs.source` from a recipe's source declaration
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Populate the (empty) source folder
    async fn fetch(&self, ctx: &BuildContext, method: &SourceMethod) -> Result<(), Error>;
}

/// `git` CLI, HTTP downloads and local copies
#[derive(Debug, Clone, Default)]
pub struct DefaultSourceFetcher {
    client: reqwest::Client,
}

impl DefaultSourceFetcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn git(&self, ctx: &BuildContext, git: &GitSource) -> Result<(), Error> {
        let dir = &ctx.dirs.source;
        let mut steps: Vec<Vec<String>> = vec![
            vec!["init".into(), "-q".into()],
            vec!["remote".into(), "add".into(), "origin".into(), git.url.clone()],
            vec![
                "fetch".into(),
                "--depth".into(),
                "1".into(),
                "origin".into(),
                git.git_ref.clone(),
            ],
            vec!["checkout".into(), "-q".into(), "FETCH_HEAD".into()],
        ];
        if git.submodules {
            steps.push(vec![
                "submodule".into(),
                "update".into(),
                "--init".into(),
                "--recursive".into(),
                "--depth".into(),
                "1".into(),
            ]);
        }

        for args in &steps {
            ctx.run(Phase::Source, "git", args, dir)
                .await
                .map_err(|e| as_fetch_error(ctx, &git.url, e))?;
        }
        Ok(())
    }

    async fn download(&self, ctx: &BuildContext, fetch: &FetchSource) -> Result<(), Error> {
        let file_name = fetch
            .url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| BuildError::SourceFetch {
                package: ctx.package.to_string(),
                url: fetch.url.clone(),
                message: "URL does not name a file".to_string(),
            })?
            .to_string();

        let downloads = ctx.dirs.root.join("downloads");
        kiln_fs::create_dir_all(&downloads).await?;

        let file = match local_url(&fetch.url, &ctx.recipe.recipe_dir) {
            Some(path) => path,
            None => {
                let target = downloads.join(&file_name);
                self.download_to(ctx, &fetch.url, &target).await?;
                target
            }
        };

        if let Some(expected) = &fetch.blake3 {
            verify_blake3(ctx, &file, expected).await?;
        }

        match ArchiveFormat::detect(&file_name) {
            Some(format) => archive::extract(&file, format, &ctx.dirs.source, fetch.strip_root).await,
            None => archive::place_file(&file, &ctx.dirs.source).await,
        }
    }

    async fn download_to(&self, ctx: &BuildContext, url: &str, target: &Path) -> Result<(), Error> {
        let fetch_failed = |message: String| -> Error {
            BuildError::SourceFetch {
                package: ctx.package.to_string(),
                url: url.to_string(),
                message,
            }
            .into()
        };

        let response = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            response = self.client.get(url).send() => response.map_err(|e| fetch_failed(e.to_string()))?,
        };
        let response = response
            .error_for_status()
            .map_err(|e| fetch_failed(e.to_string()))?;
        let bytes = response.bytes().await.map_err(|e| fetch_failed(e.to_string()))?;
        tokio::fs::write(target, &bytes)
            .await
            .map_err(|e| Error::io_with_path(&e, target))?;
        tracing::debug!(package = %ctx.package, url, bytes = bytes.len(), "downloaded source");
        Ok(())
    }

    async fn local(&self, ctx: &BuildContext, local: &LocalSource) -> Result<(), Error> {
        let path = Path::new(&local.path);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            ctx.recipe.recipe_dir.join(path)
        };
        if !kiln_fs::exists(&path).await {
            return Err(BuildError::Failed {
                package: ctx.package.to_string(),
                phase: Phase::Source.to_string(),
                message: format!("local source {} does not exist", path.display()),
            }
            .into());
        }
        kiln_fs::copy_directory(&path, &ctx.dirs.source).await
    }
}

#[async_trait]
impl SourceFetcher for DefaultSourceFetcher {
    async fn fetch(&self, ctx: &BuildContext, method: &SourceMethod) -> Result<(), Error> {
        match method {
            SourceMethod::Git { git } => self.git(ctx, git).await,
            SourceMethod::Fetch { fetch } => self.download(ctx, fetch).await,
            SourceMethod::Local { local } => self.local(ctx, local).await,
        }
    }
}

/// `file://` URLs and plain paths resolve to the filesystem
fn local_url(url: &str, recipe_dir: &Path) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if url.contains("://") {
        return None;
    }
    let path = Path::new(url);
    Some(if path.is_absolute() {
        path.to_path_buf()
    } else {
        recipe_dir.join(path)
    })
}

async fn verify_blake3(ctx: &BuildContext, file: &Path, expected: &str) -> Result<(), Error> {
    let expected = Hash::from_hex(expected)?;
    verify_file(file, &expected).await?.map_err(|actual| {
        BuildError::Failed {
            package: ctx.package.to_string(),
            phase: Phase::Source.to_string(),
            message: format!(
                "checksum mismatch for {}: expected {expected}, got {actual}",
                file.display()
            ),
        }
        .into()
    })
}

/// Treat a failed transport command as a retryable fetch failure
fn as_fetch_error(ctx: &BuildContext, url: &str, err: Error) -> Error {
    match err {
        Error::Build(BuildError::CommandFailed { command, stderr, .. }) => BuildError::SourceFetch {
            package: ctx.package.to_string(),
            url: url.to_string(),
            message: if stderr.is_empty() {
                format!("`{command}` failed")
            } else {
                format!("`{command}` failed: {stderr}")
            },
        }
        .into(),
        other => other,
    }
}

/// Whether a source failure is worth another attempt
#[must_use]
pub fn is_transient(err: &Error) -> bool {
    matches!(err, Error::Build(BuildError::SourceFetch { .. }))
}

/// Apply every patch in order with `patch -p1`
///
/// # Errors
///
/// Returns `BuildError::PatchApply` for a missing patch or one that does not
/// apply cleanly.
pub async fn apply_patches(ctx: &BuildContext, patches: &[PathBuf]) -> Result<(), Error> {
    for patch in patches {
        let patch_failed = |message: String| -> Error {
            BuildError::PatchApply {
                package: ctx.package.to_string(),
                patch: patch.display().to_string(),
                message,
            }
            .into()
        };

        if !kiln_fs::exists(patch).await {
            return Err(patch_failed("patch file does not exist".to_string()));
        }

        let args = vec![
            "-p1".to_string(),
            "--forward".to_string(),
            "-i".to_string(),
            patch.display().to_string(),
        ];
        let output = match ctx
            .run_unchecked(Phase::Source, "patch", &args, &ctx.dirs.source)
            .await
        {
            Ok(output) => output,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => return Err(patch_failed(e.to_string())),
        };

        if output.exit_code != Some(0) {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            return Err(patch_failed(detail));
        }
        tracing::debug!(package = %ctx.package, patch = %patch.display(), "applied patch");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_url_resolution() {
        let dir = Path::new("/recipes/zlib");
        assert_eq!(
            local_url("file:///srv/zlib.tar.gz", dir),
            Some(PathBuf::from("/srv/zlib.tar.gz"))
        );
        assert_eq!(
            local_url("archives/zlib.tar.gz", dir),
            Some(PathBuf::from("/recipes/zlib/archives/zlib.tar.gz"))
        );
        assert_eq!(local_url("https://zlib.net/zlib-1.3.1.tar.gz", dir), None);
    }

    #[test]
    fn test_only_fetch_errors_are_transient() {
        let fetch: Error = BuildError::SourceFetch {
            package: "zlib/1.3.1".into(),
            url: "https://zlib.net".into(),
            message: "connection reset".into(),
        }
        .into();
        let patch: Error = BuildError::PatchApply {
            package: "zlib/1.3.1".into(),
            patch: "fix.patch".into(),
            message: "hunk failed".into(),
        }
        .into();
        assert!(is_transient(&fetch));
        assert!(!is_transient(&patch));
        assert!(!is_transient(&Error::Cancelled));
    }
}
