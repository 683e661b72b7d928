#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Filesystem operations for kiln
//!
//! Thin async wrappers over `tokio::fs` that attach the offending path to
//! every error, plus the recursive helpers the cache and the builder share:
//! directory copies that keep symlinks, size accounting and publishing a
//! staged directory by rename.

use kiln_errors::Error;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Result type for filesystem operations
type Result<T> = std::result::Result<T, Error>;

/// Recursively copy a directory, recreating symlinks instead of following them
///
/// # Errors
///
/// Returns an error if:
/// - Creating the destination directory fails
/// - Reading the source directory fails
/// - Copying any file or subdirectory fails
pub async fn copy_directory(src: &Path, dst: &Path) -> Result<()> {
    create_dir_all(dst).await?;

    let mut entries = fs::read_dir(src)
        .await
        .map_err(|e| Error::io_with_path(&e, src))?;
    while let Some(entry) = entries.next_entry().await? {
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        let file_type = entry.file_type().await?;
        if file_type.is_symlink() {
            copy_symlink(&src_path, &dst_path).await?;
        } else if file_type.is_dir() {
            Box::pin(copy_directory(&src_path, &dst_path)).await?;
        } else {
            copy_file(&src_path, &dst_path).await?;
        }
    }

    Ok(())
}

/// Copy one file, creating the parent directory of `dst`
///
/// # Errors
///
/// Returns an error if the parent cannot be created or the copy fails.
pub async fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        create_dir_all(parent).await?;
    }
    fs::copy(src, dst)
        .await
        .map_err(|e| Error::io_with_path(&e, src))?;
    Ok(())
}

/// Recreate the symlink at `src` as `dst`
///
/// # Errors
///
/// Returns an error if the link cannot be read or created.
pub async fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let target = fs::read_link(src)
        .await
        .map_err(|e| Error::io_with_path(&e, src))?;
    if let Some(parent) = dst.parent() {
        create_dir_all(parent).await?;
    }
    if exists(dst).await {
        remove_file(dst).await?;
    }

    #[cfg(unix)]
    {
        fs::symlink(&target, dst)
            .await
            .map_err(|e| Error::io_with_path(&e, dst))?;
    }
    #[cfg(windows)]
    {
        let resolved = src.parent().map_or_else(|| target.clone(), |p| p.join(&target));
        let result = if fs::metadata(&resolved).await.is_ok_and(|m| m.is_dir()) {
            fs::symlink_dir(&target, dst).await
        } else {
            fs::symlink_file(&target, dst).await
        };
        result.map_err(|e| Error::io_with_path(&e, dst))?;
    }
    Ok(())
}

/// Create a directory with all parent directories
///
/// # Errors
///
/// Returns an error if permission is denied or any I/O operation fails.
pub async fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))
}

/// Remove a directory and all its contents; a missing directory is not an error
///
/// # Errors
///
/// Returns an error if the removal fails for any other reason.
pub async fn remove_dir_all(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io_with_path(&e, path)),
    }
}

/// Remove a single file or symlink
///
/// # Errors
///
/// Returns an error if the file removal operation fails.
pub async fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))
}

/// Rename a file or directory
///
/// # Errors
///
/// Returns an error if the rename operation fails (permissions, cross-device, etc.)
pub async fn rename(src: &Path, dst: &Path) -> Result<()> {
    fs::rename(src, dst)
        .await
        .map_err(|e| Error::io_with_path(&e, src))
}

/// Check if a path exists, without following a final symlink
pub async fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).await.is_ok()
}

/// Get the total size of a file or directory tree
///
/// # Errors
///
/// Returns an error if reading metadata or directory contents fails.
pub async fn size(path: &Path) -> Result<u64> {
    let metadata = fs::symlink_metadata(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }

    let mut total = 0;
    let mut entries = fs::read_dir(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    while let Some(entry) = entries.next_entry().await? {
        total += Box::pin(size(&entry.path())).await?;
    }
    Ok(total)
}

/// Ensure a directory exists and is empty
///
/// # Errors
///
/// Returns an error if directory removal or creation fails.
pub async fn ensure_empty_dir(path: &Path) -> Result<()> {
    remove_dir_all(path).await?;
    create_dir_all(path).await
}

/// Every regular file and symlink under `root`, relative to it and sorted
///
/// # Errors
///
/// Returns an error if a directory cannot be read.
pub async fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| Error::io_with_path(&e, &dir))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if let Ok(relative) = path.strip_prefix(root) {
                files.push(relative.to_path_buf());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Move a fully staged directory to `dst`
///
/// Returns `false` when `dst` already exists, in which case the staged copy
/// is removed and the existing directory is kept.
///
/// # Errors
///
/// Returns an error if the parent of `dst` cannot be created or the rename
/// fails for a reason other than the destination existing.
pub async fn publish_directory(staged: &Path, dst: &Path) -> Result<bool> {
    if let Some(parent) = dst.parent() {
        create_dir_all(parent).await?;
    }
    if exists(dst).await {
        remove_dir_all(staged).await?;
        return Ok(false);
    }
    match fs::rename(staged, dst).await {
        Ok(()) => Ok(true),
        // Another process published the same directory first
        Err(_) if exists(dst).await => {
            remove_dir_all(staged).await?;
            Ok(false)
        }
        Err(e) => Err(Error::io_with_path(&e, staged)),
    }
}
