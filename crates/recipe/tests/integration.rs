//! Integration tests for recipe loading

use kiln_errors::{Error, RecipeError};
use kiln_recipe::{RecipeRegistry, RECIPE_FILE};
use kiln_types::PackageRef;
use std::path::Path;
use tempfile::TempDir;

fn write_recipe(root: &Path, folder: &str, yaml: &str) {
    let dir = root.join(folder);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(RECIPE_FILE), yaml).unwrap();
}

#[tokio::test]
async fn test_load_dirs_with_shadowing() {
    let local = TempDir::new().unwrap();
    let shared = TempDir::new().unwrap();

    write_recipe(
        local.path(),
        "zlib",
        "metadata: { name: zlib, version: '1.3.1', description: patched }\n",
    );
    write_recipe(
        shared.path(),
        "zlib",
        r"
metadata: { name: zlib, description: upstream }
sources:
  '1.3.1': { local: { path: src } }
  '1.2.13': { local: { path: src } }
",
    );
    write_recipe(
        shared.path(),
        "rapidjson",
        "metadata: { name: rapidjson, version: '1.1.0', kind: header-only }\n",
    );
    std::fs::create_dir_all(shared.path().join("not-a-recipe")).unwrap();

    let registry = RecipeRegistry::load_dirs(&[local.path().to_path_buf(), shared.path().to_path_buf()])
        .await
        .unwrap();
    assert_eq!(registry.len(), 3);

    let zlib = registry
        .get(&PackageRef::parse("zlib/1.3.1").unwrap())
        .unwrap();
    assert_eq!(zlib.definition.metadata.description, "patched");
    assert_eq!(zlib.recipe_dir, local.path().join("zlib"));

    let old = registry
        .get(&PackageRef::parse("zlib/1.2.13").unwrap())
        .unwrap();
    assert_eq!(old.definition.metadata.description, "upstream");
    assert_eq!(
        old.local_source_dir(),
        Some(shared.path().join("zlib").join("src"))
    );
}

#[tokio::test]
async fn test_duplicate_version_in_one_directory() {
    let dir = TempDir::new().unwrap();
    write_recipe(dir.path(), "a", "metadata: { name: glfw, version: '3.4' }\n");
    write_recipe(dir.path(), "b", "metadata: { name: glfw, version: '3.4' }\n");

    let err = RecipeRegistry::load_dirs(&[dir.path().to_path_buf()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Recipe(RecipeError::Duplicate { .. })));
}

#[tokio::test]
async fn test_parse_error_names_file() {
    let dir = TempDir::new().unwrap();
    write_recipe(dir.path(), "broken", "metadata: [");

    let err = RecipeRegistry::load_dirs(&[dir.path().to_path_buf()])
        .await
        .unwrap_err();
    match err {
        Error::Recipe(RecipeError::Parse { path, .. }) => assert!(path.ends_with(RECIPE_FILE)),
        other => panic!("unexpected error: {other}"),
    }
}
