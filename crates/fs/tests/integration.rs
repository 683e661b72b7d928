//! Integration tests for fs crate

use kiln_fs::*;
use tempfile::tempdir;
use tokio::fs;

#[tokio::test]
async fn test_ensure_empty_dir() {
    let temp = tempdir().unwrap();
    let test_dir = temp.path().join("ensure_test");

    fs::create_dir(&test_dir).await.unwrap();
    fs::write(test_dir.join("file.txt"), b"content").await.unwrap();

    ensure_empty_dir(&test_dir).await.unwrap();
    assert!(test_dir.exists());
    assert!(list_files(&test_dir).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_copy_directory() {
    let temp = tempdir().unwrap();
    let src = temp.path().join("src");
    let dst = temp.path().join("dst");

    fs::create_dir_all(src.join("include/zlib")).await.unwrap();
    fs::write(src.join("include/zlib/zlib.h"), b"#pragma once").await.unwrap();
    fs::write(src.join("README"), b"readme").await.unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink("README", src.join("README.md")).unwrap();

    copy_directory(&src, &dst).await.unwrap();

    let header = fs::read_to_string(dst.join("include/zlib/zlib.h")).await.unwrap();
    assert_eq!(header, "#pragma once");

    #[cfg(unix)]
    {
        let link = fs::read_link(dst.join("README.md")).await.unwrap();
        assert_eq!(link, std::path::PathBuf::from("README"));
    }

    let files = list_files(&dst).await.unwrap();
    assert!(files.contains(&std::path::PathBuf::from("include/zlib/zlib.h")));
}

#[tokio::test]
async fn test_publish_directory_keeps_first() {
    let temp = tempdir().unwrap();
    let dst = temp.path().join("published");

    let first = temp.path().join("first");
    fs::create_dir_all(&first).await.unwrap();
    fs::write(first.join("marker"), b"first").await.unwrap();
    assert!(publish_directory(&first, &dst).await.unwrap());

    let second = temp.path().join("second");
    fs::create_dir_all(&second).await.unwrap();
    fs::write(second.join("marker"), b"second").await.unwrap();
    assert!(!publish_directory(&second, &dst).await.unwrap());

    assert_eq!(fs::read_to_string(dst.join("marker")).await.unwrap(), "first");
    assert!(!second.exists());
}
