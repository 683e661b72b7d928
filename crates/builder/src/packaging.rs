//! File operations for the package phase and the package output contract

use globset::{GlobBuilder, GlobMatcher};
use ignore::WalkBuilder;
use kiln_errors::{BuildError, Error};
use kiln_types::{PackageInfo, PackageKind, PackageRef};
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;

fn packaging_error(package: &PackageRef, message: impl Into<String>) -> Error {
    BuildError::Packaging {
        package: package.to_string(),
        message: message.into(),
    }
    .into()
}

fn matcher(package: &PackageRef, pattern: &str) -> Result<GlobMatcher, Error> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| packaging_error(package, format!("invalid pattern '{pattern}': {e}")))
}

/// Files below `from` whose relative path matches `pattern`
///
/// Hidden and git-ignored files are included; build trees routinely
/// contain both.
///
/// # Errors
///
/// Returns an error for an invalid pattern or an unreadable tree.
pub fn matching_files(package: &PackageRef, from: &Path, pattern: &str) -> Result<Vec<PathBuf>, Error> {
    let matcher = matcher(package, pattern)?;
    let mut matches = Vec::new();
    if !from.exists() {
        return Ok(matches);
    }

    let walker = WalkBuilder::new(from)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();
    for entry in walker {
        let entry = entry.map_err(|e| packaging_error(package, format!("cannot walk {}: {e}", from.display())))?;
        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        if matcher.is_match(relative) {
            matches.push(relative.to_path_buf());
        }
    }
    Ok(matches)
}

/// Copy files matching `pattern` from `from` into `to`
///
/// Returns the number of files copied.
///
/// # Errors
///
/// Returns `BuildError::Packaging` if a file cannot be copied.
pub async fn copy_matching(
    package: &PackageRef,
    from: &Path,
    pattern: &str,
    to: &Path,
    flatten: bool,
) -> Result<usize, Error> {
    let files = {
        let package = package.clone();
        let from = from.to_path_buf();
        let pattern = pattern.to_string();
        tokio::task::spawn_blocking(move || matching_files(&package, &from, &pattern))
            .await
            .map_err(|e| Error::internal(format!("walk task failed: {e}")))??
    };

    for relative in &files {
        let source = from.join(relative);
        let target = if flatten {
            match relative.file_name() {
                Some(name) => to.join(name),
                None => continue,
            }
        } else {
            to.join(relative)
        };
        if let Some(parent) = target.parent() {
            kiln_fs::create_dir_all(parent).await?;
        }
        let metadata = fs::symlink_metadata(&source)
            .await
            .map_err(|e| Error::io_with_path(&e, &source))?;
        let copied = if metadata.file_type().is_symlink() {
            kiln_fs::copy_symlink(&source, &target).await
        } else {
            kiln_fs::copy_file(&source, &target).await
        };
        copied.map_err(|e| packaging_error(package, format!("cannot copy {}: {e}", source.display())))?;
    }
    Ok(files.len())
}

/// Regex substitution over one file, in place or into `output`
///
/// # Errors
///
/// Returns `BuildError::Packaging` when the pattern is invalid, the file is
/// not UTF-8, or nothing matched.
pub async fn replace_in_file(
    package: &PackageRef,
    file: &Path,
    search: &str,
    replacement: &str,
    output: Option<&Path>,
) -> Result<usize, Error> {
    let regex = Regex::new(search)
        .map_err(|e| packaging_error(package, format!("invalid pattern '{search}': {e}")))?;
    let content = fs::read_to_string(file)
        .await
        .map_err(|e| packaging_error(package, format!("cannot read {}: {e}", file.display())))?;

    let count = regex.find_iter(&content).count();
    if count == 0 {
        return Err(packaging_error(
            package,
            format!("pattern '{search}' not found in {}", file.display()),
        ));
    }

    let replaced = regex.replace_all(&content, replacement);
    let target = output.unwrap_or(file);
    if let Some(parent) = target.parent() {
        kiln_fs::create_dir_all(parent).await?;
    }
    fs::write(target, replaced.as_bytes())
        .await
        .map_err(|e| Error::io_with_path(&e, target))?;
    Ok(count)
}

/// Remove a file or directory; a missing path is fine
///
/// # Errors
///
/// Returns an error if the path exists and cannot be removed.
pub async fn remove_path(path: &Path) -> Result<(), Error> {
    match fs::symlink_metadata(path).await {
        Ok(metadata) if metadata.is_dir() => kiln_fs::remove_dir_all(path).await,
        Ok(_) => kiln_fs::remove_file(path).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io_with_path(&e, path)),
    }
}

/// Check that the package folder honors what `package_info` declares
///
/// Every declared directory must exist, and a header-only package must
/// not declare libraries.
///
/// # Errors
///
/// Returns `BuildError::Packaging` describing the first violation.
pub async fn check_contract(
    package: &PackageRef,
    kind: PackageKind,
    info: &PackageInfo,
    package_folder: &Path,
) -> Result<(), Error> {
    if kind == PackageKind::HeaderOnly {
        let aggregated = info.aggregated();
        if !aggregated.libs.is_empty() {
            return Err(packaging_error(
                package,
                format!(
                    "header-only package declares libraries: {}",
                    aggregated.libs.join(", ")
                ),
            ));
        }
    }

    for dir in info.declared_dirs() {
        let path = if dir.is_absolute() {
            dir.clone()
        } else {
            package_folder.join(dir)
        };
        if !kiln_fs::exists(&path).await {
            return Err(packaging_error(
                package,
                format!("declared directory '{}' is missing from the package", dir.display()),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_types::Component;
    use tempfile::tempdir;

    fn package() -> PackageRef {
        PackageRef::parse("dxc/1.8").unwrap()
    }

    async fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn test_copy_matching_keeps_layout() {
        let temp = tempdir().unwrap();
        let from = temp.path().join("installed");
        touch(&from.join("include/dxc/dxcapi.h"), "api").await;
        touch(&from.join("include/dxc/.hidden.h"), "h").await;
        touch(&from.join("lib/libdxcompiler.so"), "so").await;
        let to = temp.path().join("package/include");

        let copied = copy_matching(&package(), &from.join("include"), "*.h", &to, false)
            .await
            .unwrap();

        assert_eq!(copied, 2);
        assert!(to.join("dxc/dxcapi.h").exists());
        assert!(!to.join("libdxcompiler.so").exists());
    }

    #[tokio::test]
    async fn test_copy_matching_flatten() {
        let temp = tempdir().unwrap();
        let from = temp.path().join("build");
        touch(&from.join("bin/Release/dxil.dll"), "dll").await;
        let to = temp.path().join("package/bin");

        let copied = copy_matching(&package(), &from, "**/dxil.dll", &to, true)
            .await
            .unwrap();

        assert_eq!(copied, 1);
        assert!(to.join("dxil.dll").exists());
    }

    #[tokio::test]
    async fn test_copy_from_missing_folder_copies_nothing() {
        let temp = tempdir().unwrap();
        let copied = copy_matching(
            &package(),
            &temp.path().join("absent"),
            "*",
            &temp.path().join("out"),
            false,
        )
        .await
        .unwrap();
        assert_eq!(copied, 0);
    }

    #[tokio::test]
    async fn test_replace_in_file() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("layer.json");
        touch(&file, r#"{"library_path": "/build/out/libVkLayer.so"}"#).await;

        let count = replace_in_file(&package(), &file, r"/build/out/", "./", None)
            .await
            .unwrap();

        assert_eq!(count, 1);
        let content = fs::read_to_string(&file).await.unwrap();
        assert_eq!(content, r#"{"library_path": "./libVkLayer.so"}"#);

        let err = replace_in_file(&package(), &file, "absent", "x", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Build(BuildError::Packaging { .. })));
    }

    #[tokio::test]
    async fn test_contract_requires_declared_dirs() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("include")).await.unwrap();
        let info = PackageInfo {
            includedirs: vec![PathBuf::from("include")],
            libdirs: vec![PathBuf::from("lib")],
            libs: vec!["dxcompiler".to_string()],
            ..PackageInfo::default()
        };

        let err = check_contract(&package(), PackageKind::SharedLibrary, &info, temp.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'lib'"));

        fs::create_dir_all(temp.path().join("lib")).await.unwrap();
        check_contract(&package(), PackageKind::SharedLibrary, &info, temp.path())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_contract_rejects_header_only_libs() {
        let temp = tempdir().unwrap();
        let mut info = PackageInfo::default();
        info.components.insert(
            "core".to_string(),
            Component {
                libs: vec!["core".to_string()],
                ..Component::default()
            },
        );

        let err = check_contract(&package(), PackageKind::HeaderOnly, &info, temp.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("header-only"));
    }
}
