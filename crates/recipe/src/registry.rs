//! Registry of loaded recipes
//!
//! Recipe directories are laid out as `<dir>/<name>/recipe.yml`. When
//! several directories are searched, the first one providing a given
//! `name/version` wins, so a local checkout can shadow a shared
//! collection. The same version declared twice inside one directory is an
//! error.

use crate::model::Recipe;
use crate::parser::parse_recipe_file;
use kiln_errors::{Error, RecipeError, ResolveError};
use kiln_types::{PackageRef, Version};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name looked up inside each recipe folder
pub const RECIPE_FILE: &str = "recipe.yml";

/// Immutable set of known recipes keyed by `name/version`
#[derive(Debug, Clone, Default)]
pub struct RecipeRegistry {
    recipes: BTreeMap<PackageRef, Arc<Recipe>>,
}

impl RecipeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every recipe below `dirs`, earlier directories taking priority
    ///
    /// # Errors
    ///
    /// Returns an error if a directory is missing, a recipe fails to parse
    /// or one directory declares the same version twice.
    pub async fn load_dirs(dirs: &[PathBuf]) -> Result<Self, Error> {
        let mut registry = Self::new();
        for dir in dirs {
            let found = Self::scan_dir(dir).await?;
            let mut added = 0usize;
            for recipe in found {
                if registry.recipes.contains_key(&recipe.reference) {
                    tracing::debug!(
                        recipe = %recipe.reference,
                        dir = %dir.display(),
                        "recipe shadowed by earlier directory"
                    );
                    continue;
                }
                registry.recipes.insert(recipe.reference.clone(), Arc::new(recipe));
                added += 1;
            }
            tracing::debug!(dir = %dir.display(), recipes = added, "loaded recipe directory");
        }
        Ok(registry)
    }

    async fn scan_dir(dir: &Path) -> Result<Vec<Recipe>, Error> {
        if !dir.is_dir() {
            return Err(RecipeError::DirectoryNotFound {
                path: dir.display().to_string(),
            }
            .into());
        }

        let mut folders = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| Error::io_with_path(&e, dir))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::io_with_path(&e, dir))?
        {
            let recipe_file = entry.path().join(RECIPE_FILE);
            if recipe_file.is_file() {
                folders.push(recipe_file);
            }
        }
        // read_dir order is platform dependent
        folders.sort();

        let mut scoped: BTreeMap<PackageRef, Recipe> = BTreeMap::new();
        for file in folders {
            for recipe in parse_recipe_file(&file).await? {
                if scoped.contains_key(&recipe.reference) {
                    return Err(duplicate(&recipe.reference));
                }
                scoped.insert(recipe.reference.clone(), recipe);
            }
        }
        Ok(scoped.into_values().collect())
    }

    /// Load one recipe file
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails or a version is already present.
    pub async fn load_file(&mut self, path: &Path) -> Result<usize, Error> {
        let recipes = parse_recipe_file(path).await?;
        let count = recipes.len();
        for recipe in recipes {
            self.insert(recipe)?;
        }
        Ok(count)
    }

    /// Add a recipe
    ///
    /// # Errors
    ///
    /// Returns `RecipeError::Duplicate` when the version is already known.
    pub fn insert(&mut self, recipe: Recipe) -> Result<(), Error> {
        if self.recipes.contains_key(&recipe.reference) {
            return Err(duplicate(&recipe.reference));
        }
        self.recipes.insert(recipe.reference.clone(), Arc::new(recipe));
        Ok(())
    }

    /// Look up an exact `name/version`
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::RecipeNotFound` when no such recipe exists.
    pub fn get(&self, reference: &PackageRef) -> Result<Arc<Recipe>, Error> {
        self.recipes.get(reference).cloned().ok_or_else(|| {
            ResolveError::RecipeNotFound {
                name: reference.name.clone(),
                version: reference.version.to_string(),
            }
            .into()
        })
    }

    #[must_use]
    pub fn contains(&self, reference: &PackageRef) -> bool {
        self.recipes.contains_key(reference)
    }

    /// Known versions of `name`, oldest first
    #[must_use]
    pub fn versions(&self, name: &str) -> Vec<Version> {
        let mut versions: Vec<Version> = self
            .recipes
            .keys()
            .filter(|reference| reference.name == name)
            .map(|reference| reference.version.clone())
            .collect();
        versions.sort();
        versions
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Recipe>> {
        self.recipes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

fn duplicate(reference: &PackageRef) -> Error {
    RecipeError::Duplicate {
        name: reference.name.clone(),
        version: reference.version.to_string(),
    }
    .into()
}
