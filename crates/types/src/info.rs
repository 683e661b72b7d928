//! Exported package metadata
//!
//! A `PackageInfo` is declared by the recipe author in `package_info`; kiln
//! never infers it from the files a build produced. Directories are stored
//! relative to the package folder and made absolute with [`PackageInfo::rooted`]
//! once the package has a permanent home in the cache.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Consumable metadata of a built package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageInfo {
    #[serde(default)]
    pub includedirs: Vec<PathBuf>,
    #[serde(default)]
    pub libdirs: Vec<PathBuf>,
    #[serde(default)]
    pub bindirs: Vec<PathBuf>,
    /// Directories holding build-system integration files (e.g. `lib/cmake`)
    #[serde(default)]
    pub builddirs: Vec<PathBuf>,
    #[serde(default)]
    pub libs: Vec<String>,
    #[serde(default)]
    pub defines: Vec<String>,
    /// Free-form properties such as `cmake_file_name`
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub components: BTreeMap<String, Component>,
}

/// A named sub-unit of a package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Component {
    #[serde(default)]
    pub includedirs: Vec<PathBuf>,
    #[serde(default)]
    pub libdirs: Vec<PathBuf>,
    #[serde(default)]
    pub bindirs: Vec<PathBuf>,
    #[serde(default)]
    pub libs: Vec<String>,
    #[serde(default)]
    pub defines: Vec<String>,
    /// Sibling components (`name`) or components of a link requirement
    /// (`package::component`)
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Parsed entry of `Component::requires`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentRef {
    /// Another component of the same package
    Local(String),
    /// A component exported by a link requirement
    External { package: String, component: String },
}

impl ComponentRef {
    #[must_use]
    pub fn parse(input: &str) -> Self {
        match input.split_once("::") {
            Some((package, component)) => Self::External {
                package: package.to_string(),
                component: component.to_string(),
            },
            None => Self::Local(input.to_string()),
        }
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(name) => f.write_str(name),
            Self::External { package, component } => write!(f, "{package}::{component}"),
        }
    }
}

fn push_unique<T: PartialEq + Clone>(target: &mut Vec<T>, items: &[T]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

fn rooted_dirs(root: &Path, dirs: &[PathBuf]) -> Vec<PathBuf> {
    dirs.iter()
        .map(|dir| if dir.is_absolute() { dir.clone() } else { root.join(dir) })
        .collect()
}

impl PackageInfo {
    /// Whether the package exports anything at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.includedirs.is_empty()
            && self.libdirs.is_empty()
            && self.bindirs.is_empty()
            && self.builddirs.is_empty()
            && self.libs.is_empty()
            && self.components.is_empty()
    }

    /// Copy with every relative directory resolved against `root`
    #[must_use]
    pub fn rooted(&self, root: &Path) -> Self {
        let components = self
            .components
            .iter()
            .map(|(name, component)| {
                let mut component = component.clone();
                component.includedirs = rooted_dirs(root, &component.includedirs);
                component.libdirs = rooted_dirs(root, &component.libdirs);
                component.bindirs = rooted_dirs(root, &component.bindirs);
                (name.clone(), component)
            })
            .collect();

        Self {
            includedirs: rooted_dirs(root, &self.includedirs),
            libdirs: rooted_dirs(root, &self.libdirs),
            bindirs: rooted_dirs(root, &self.bindirs),
            builddirs: rooted_dirs(root, &self.builddirs),
            components,
            ..self.clone()
        }
    }

    /// Package-level view with every component folded in
    #[must_use]
    pub fn aggregated(&self) -> Self {
        let mut out = Self {
            components: BTreeMap::new(),
            ..self.clone()
        };
        for component in self.components.values() {
            push_unique(&mut out.includedirs, &component.includedirs);
            push_unique(&mut out.libdirs, &component.libdirs);
            push_unique(&mut out.bindirs, &component.bindirs);
            push_unique(&mut out.libs, &component.libs);
            push_unique(&mut out.defines, &component.defines);
        }
        out
    }

    /// Append `other`'s aggregated metadata, keeping first occurrences
    pub fn merge(&mut self, other: &Self) {
        let other = other.aggregated();
        push_unique(&mut self.includedirs, &other.includedirs);
        push_unique(&mut self.libdirs, &other.libdirs);
        push_unique(&mut self.bindirs, &other.bindirs);
        push_unique(&mut self.builddirs, &other.builddirs);
        push_unique(&mut self.libs, &other.libs);
        push_unique(&mut self.defines, &other.defines);
    }

    /// Every directory declared anywhere in the package
    pub fn declared_dirs(&self) -> impl Iterator<Item = &PathBuf> {
        self.includedirs
            .iter()
            .chain(&self.libdirs)
            .chain(&self.bindirs)
            .chain(&self.builddirs)
            .chain(self.components.values().flat_map(|c| {
                c.includedirs.iter().chain(&c.libdirs).chain(&c.bindirs)
            }))
    }
}
