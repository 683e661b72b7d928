//! Source archive extraction

use kiln_errors::{BuildError, Error};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufReader};

/// Archive layouts kiln can unpack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarXz,
    TarBz2,
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from a file name
    #[must_use]
    pub fn detect(file_name: &str) -> Option<Self> {
        let name = file_name.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

fn extraction_failed(archive: &Path, message: impl std::fmt::Display) -> Error {
    Error::internal(format!("cannot extract {}: {message}", archive.display()))
}

/// Unpack `archive` into `dest`
///
/// With `strip_root`, an archive whose entries all live under a single
/// top-level directory is unpacked without that directory.
///
/// # Errors
///
/// Returns an error if the archive is unreadable or a file cannot be written.
pub async fn extract(archive: &Path, format: ArchiveFormat, dest: &Path, strip_root: bool) -> Result<(), Error> {
    let staging = dest.with_extension("extracting");
    kiln_fs::ensure_empty_dir(&staging).await?;

    let result: Result<(), Error> = async {
        match format {
            ArchiveFormat::Zip => unpack_zip(archive, &staging).await?,
            ArchiveFormat::Tar => unpack_tar(archive, &staging).await?,
            compressed => {
                let tar_path = staging.with_extension("tar");
                decompress(archive, compressed, &tar_path).await?;
                let unpacked = unpack_tar(&tar_path, &staging).await;
                kiln_fs::remove_file(&tar_path).await?;
                unpacked?;
            }
        }

        let root = if strip_root {
            single_root(&staging).await?.unwrap_or_else(|| staging.clone())
        } else {
            staging.clone()
        };
        move_children(&root, dest).await
    }
    .await;

    kiln_fs::remove_dir_all(&staging).await?;
    result
}

async fn decompress(archive: &Path, format: ArchiveFormat, output: &Path) -> Result<(), Error> {
    use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder};

    let input = fs::File::open(archive)
        .await
        .map_err(|e| Error::io_with_path(&e, archive))?;
    let mut out = fs::File::create(output)
        .await
        .map_err(|e| Error::io_with_path(&e, output))?;
    let reader = BufReader::new(input);

    let copied = match format {
        ArchiveFormat::TarGz => tokio::io::copy(&mut GzipDecoder::new(reader), &mut out).await,
        ArchiveFormat::TarXz => tokio::io::copy(&mut XzDecoder::new(reader), &mut out).await,
        ArchiveFormat::TarBz2 => tokio::io::copy(&mut BzDecoder::new(reader), &mut out).await,
        ArchiveFormat::Tar | ArchiveFormat::Zip => {
            return Err(Error::internal("archive format is not compressed"));
        }
    };
    copied.map_err(|e| extraction_failed(archive, e))?;
    out.flush().await?;
    Ok(())
}

async fn unpack_tar(archive: &Path, dest: &Path) -> Result<(), Error> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive).map_err(|e| Error::io_with_path(&e, &archive))?;
        let mut tar = tar::Archive::new(file);
        tar.set_preserve_permissions(true);
        tar.unpack(&dest).map_err(|e| extraction_failed(&archive, e))
    })
    .await
    .map_err(|e| Error::internal(format!("extraction task failed: {e}")))?
}

async fn unpack_zip(archive: &Path, dest: &Path) -> Result<(), Error> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&archive).map_err(|e| Error::io_with_path(&e, &archive))?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| extraction_failed(&archive, e))?;
        zip.extract(&dest).map_err(|e| extraction_failed(&archive, e))
    })
    .await
    .map_err(|e| Error::internal(format!("extraction task failed: {e}")))?
}

/// The only entry of `dir` when that entry is a directory
async fn single_root(dir: &Path) -> Result<Option<PathBuf>, Error> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| Error::io_with_path(&e, dir))?;
    let mut found = None;
    while let Some(entry) = entries.next_entry().await? {
        if found.is_some() {
            return Ok(None);
        }
        found = Some(entry);
    }
    match found {
        Some(entry) if entry.file_type().await?.is_dir() => Ok(Some(entry.path())),
        _ => Ok(None),
    }
}

async fn move_children(from: &Path, to: &Path) -> Result<(), Error> {
    kiln_fs::create_dir_all(to).await?;
    let mut entries = fs::read_dir(from).await.map_err(|e| Error::io_with_path(&e, from))?;
    while let Some(entry) = entries.next_entry().await? {
        kiln_fs::rename(&entry.path(), &to.join(entry.file_name())).await?;
    }
    Ok(())
}

/// Copy a downloaded file that is not an archive into the source folder
///
/// # Errors
///
/// Returns an error if the copy fails or the file has no name.
pub async fn place_file(file: &Path, dest: &Path) -> Result<(), Error> {
    let name = file.file_name().ok_or_else(|| BuildError::Failed {
        package: String::new(),
        phase: "source".to_string(),
        message: format!("{} has no file name", file.display()),
    })?;
    kiln_fs::copy_file(file, &dest.join(name)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tar(path: &Path, root: Option<&str>) {
        let file = std::fs::File::create(path).unwrap();
        let mut builder = tar::Builder::new(file);
        for (name, body) in [("CMakeLists.txt", "project(z)"), ("src/zlib.c", "int z;")] {
            let name = match root {
                Some(root) => format!("{root}/{name}"),
                None => name.to_string(),
            };
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, body.as_bytes()).unwrap();
        }
        builder.finish().unwrap();
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(ArchiveFormat::detect("zlib-1.3.1.tar.gz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("glfw-3.4.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect("x.tar.xz"), Some(ArchiveFormat::TarXz));
        assert_eq!(ArchiveFormat::detect("stb_image.h"), None);
    }

    #[tokio::test]
    async fn test_extract_strips_single_root() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("zlib.tar");
        write_tar(&archive, Some("zlib-1.3.1"));
        let dest = temp.path().join("src");

        extract(&archive, ArchiveFormat::Tar, &dest, true).await.unwrap();

        assert!(dest.join("CMakeLists.txt").exists());
        assert!(dest.join("src/zlib.c").exists());
        assert!(!dest.join("zlib-1.3.1").exists());
    }

    #[tokio::test]
    async fn test_extract_keeps_flat_archives() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("flat.tar");
        write_tar(&archive, None);
        let dest = temp.path().join("src");

        extract(&archive, ArchiveFormat::Tar, &dest, true).await.unwrap();

        assert!(dest.join("CMakeLists.txt").exists());
        assert!(dest.join("src/zlib.c").exists());
    }

    #[tokio::test]
    async fn test_extract_without_strip_keeps_root() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("zlib.tar");
        write_tar(&archive, Some("zlib-1.3.1"));
        let dest = temp.path().join("src");

        extract(&archive, ArchiveFormat::Tar, &dest, false).await.unwrap();

        assert!(dest.join("zlib-1.3.1/CMakeLists.txt").exists());
    }
}
