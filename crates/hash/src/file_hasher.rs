//! Digests over sets of files
//!
//! Used to fold patch sets and local source trees into build fingerprints.
//! Entries are sorted by relative path so the digest does not depend on
//! directory iteration order.

use crate::Hash;
use blake3::Hasher;
use kiln_errors::Error;
use std::path::{Path, PathBuf};

/// Digest of an ordered list of files, keyed by their display path
///
/// # Errors
/// Returns an error if any file cannot be read.
pub async fn hash_files<P: AsRef<Path>>(files: &[P]) -> Result<Hash, Error> {
    let mut hasher = Hasher::new();
    for file in files {
        let file = file.as_ref();
        let hash = Hash::hash_file(file).await?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(hash.as_bytes());
    }
    Ok(Hash::from_bytes(*hasher.finalize().as_bytes()))
}

/// Digest of every regular file and symlink below `root`
///
/// # Errors
/// Returns an error if the tree cannot be walked or a file cannot be read.
pub async fn hash_directory(root: &Path) -> Result<Hash, Error> {
    let mut entries = Vec::new();
    collect(root, root, &mut entries).await?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Hasher::new();
    for (relative, hash) in entries {
        hasher.update(relative.as_bytes());
        hasher.update(&[0]);
        hasher.update(hash.as_bytes());
    }
    Ok(Hash::from_bytes(*hasher.finalize().as_bytes()))
}

async fn collect(root: &Path, dir: &Path, out: &mut Vec<(String, Hash)>) -> Result<(), Error> {
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut reader = tokio::fs::read_dir(&current)
            .await
            .map_err(|e| Error::io_with_path(&e, &current))?;
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");

            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_symlink() {
                let target = tokio::fs::read_link(&path).await?;
                out.push((relative, Hash::from_data(target.to_string_lossy().as_bytes())));
            } else {
                out.push((relative, Hash::hash_file(&path).await?));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    #[tokio::test]
    async fn test_directory_digest_tracks_content() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src/nested")).await.unwrap();
        fs::write(temp.path().join("src/a.c"), b"int a;").await.unwrap();
        fs::write(temp.path().join("src/nested/b.c"), b"int b;")
            .await
            .unwrap();

        let first = hash_directory(temp.path()).await.unwrap();
        let again = hash_directory(temp.path()).await.unwrap();
        assert_eq!(first, again);

        fs::write(temp.path().join("src/nested/b.c"), b"int c;")
            .await
            .unwrap();
        let changed = hash_directory(temp.path()).await.unwrap();
        assert_ne!(first, changed);
    }

    #[tokio::test]
    async fn test_file_list_digest_is_order_sensitive() {
        let temp = TempDir::new().unwrap();
        let one = temp.path().join("0001-fix.patch");
        let two = temp.path().join("0002-port.patch");
        fs::write(&one, b"--- a\n+++ b\n").await.unwrap();
        fs::write(&two, b"--- c\n+++ d\n").await.unwrap();

        let forward = hash_files(&[&one, &two]).await.unwrap();
        let backward = hash_files(&[&two, &one]).await.unwrap();
        assert_ne!(forward, backward);
        assert_eq!(forward, hash_files(&[&one, &two]).await.unwrap());
    }
}
