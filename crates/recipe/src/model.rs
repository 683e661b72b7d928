//! YAML recipe format
//!
//! A recipe file describes one package and one or more of its versions.
//! Lifecycle phases are closed sets of declarative steps; there is no
//! scripting escape hatch besides `command` and `shell` steps.

use crate::branch::Branched;
use kiln_hash::Hash;
use kiln_types::{PackageInfo, PackageKind, PackageRef, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Complete YAML recipe document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeDefinition {
    /// Package metadata (required)
    pub metadata: Metadata,

    /// Settings axes that influence the produced binaries
    #[serde(default = "all_axes")]
    pub settings: Vec<SettingAxis>,

    /// Declared options and their defaults
    #[serde(default)]
    pub options: BTreeMap<String, OptionDecl>,

    #[serde(default)]
    pub requires: Vec<RequirementDecl>,

    #[serde(default)]
    pub tool_requires: Vec<RequirementDecl>,

    #[serde(default)]
    pub validate: Validation,

    /// Source for a recipe that declares `metadata.version`
    #[serde(default)]
    pub source: Option<Source>,

    /// Sources keyed by version for multi-version recipes
    #[serde(default)]
    pub sources: BTreeMap<String, Source>,

    /// Variables exported into every phase's environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub generate: Branched<Generate>,

    #[serde(default)]
    pub build: Branched<Vec<Step>>,

    #[serde(default)]
    pub package: Branched<Vec<Step>>,

    #[serde(default)]
    pub package_info: Branched<PackageInfo>,

    #[serde(default)]
    pub test: Option<Branched<Vec<Step>>>,
}

/// Package metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    pub name: String,

    /// Single version; mutually exclusive with `sources`
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub license: String,

    #[serde(default)]
    pub homepage: Option<String>,

    #[serde(default)]
    pub topics: Vec<String>,

    #[serde(default)]
    pub kind: PackageKind,

    /// Semver requirement on the kiln release able to load this recipe
    #[serde(default)]
    pub required_kiln_version: Option<String>,
}

/// Settings axis names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingAxis {
    Os,
    Arch,
    Compiler,
    BuildType,
}

fn all_axes() -> Vec<SettingAxis> {
    vec![
        SettingAxis::Os,
        SettingAxis::Arch,
        SettingAxis::Compiler,
        SettingAxis::BuildType,
    ]
}

/// A declared option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptionDecl {
    pub default: String,
    /// Allowed values; empty means any value
    #[serde(default)]
    pub values: Vec<String>,
}

/// Requirement as written in a recipe or manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequirementDecl {
    /// `name/version`
    Short(String),
    Full(RequirementSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequirementSpec {
    #[serde(rename = "ref")]
    pub reference: String,

    /// Option overrides for the target node; values may forward the
    /// declaring recipe's options with `${options.NAME}`
    #[serde(default)]
    pub options: BTreeMap<String, String>,

    #[serde(default, rename = "override")]
    pub is_override: bool,

    #[serde(default)]
    pub when: Condition,
}

/// Settings/options predicate; every non-empty field must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default)]
    pub arch: Vec<String>,
    #[serde(default)]
    pub build_type: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl RequirementDecl {
    #[must_use]
    pub fn reference(&self) -> &str {
        match self {
            Self::Short(reference) => reference,
            Self::Full(spec) => &spec.reference,
        }
    }
}

/// Toolchain prerequisites checked before any filesystem mutation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Validation {
    #[serde(default)]
    pub min_cppstd: Option<u32>,

    /// Operating systems the package supports; empty means all
    #[serde(default)]
    pub os: Vec<String>,

    /// Options that must hold for the configuration to be valid
    #[serde(default)]
    pub require_options: BTreeMap<String, String>,
}

/// Source acquisition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    #[serde(flatten)]
    pub method: SourceMethod,

    /// Patch files relative to the recipe directory, applied in order
    #[serde(default)]
    pub patches: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceMethod {
    Git { git: GitSource },
    Fetch { fetch: FetchSource },
    Local { local: LocalSource },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitSource {
    pub url: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub submodules: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchSource {
    pub url: String,
    #[serde(default)]
    pub blake3: Option<String>,
    /// Drop the single top-level directory most archives carry
    #[serde(default = "default_strip_root")]
    pub strip_root: bool,
}

fn default_strip_root() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalSource {
    /// Relative to the recipe directory unless absolute
    pub path: String,
}

/// Generated build-system integration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Generate {
    #[serde(default)]
    pub cmake_toolchain: Option<CmakeToolchain>,

    /// Write dependency metadata for `find_package` style consumption
    #[serde(default)]
    pub cmake_deps: bool,

    /// Extra environment for the remaining phases
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CmakeToolchain {
    #[serde(default)]
    pub generator: Option<String>,
    #[serde(default)]
    pub cache_variables: BTreeMap<String, String>,
}

/// One step of the build, package or test phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    /// Program and arguments split on whitespace; no shell features
    Command { command: String },
    /// Passed to `sh -c` (`cmd /C` on Windows)
    Shell { shell: String },
    CmakeConfigure { cmake_configure: Vec<String> },
    CmakeBuild { cmake_build: CmakeBuild },
    CmakeInstall { cmake_install: CmakeInstall },
    Copy { copy: CopySpec },
    Replace { replace: ReplaceSpec },
    Rename { rename: RenameSpec },
    Mkdir { mkdir: String },
    Remove { remove: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CmakeBuild {
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CmakeInstall {
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Copy files matching a glob from one folder into another
///
/// Relative `to` paths land in the package folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopySpec {
    pub pattern: String,
    pub from: String,
    pub to: String,
    /// Drop the directory part of matched files
    #[serde(default)]
    pub flatten: bool,
}

/// Regex substitution inside one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplaceSpec {
    pub file: String,
    pub search: String,
    #[serde(rename = "with")]
    pub replacement: String,
    /// Write the result here instead of editing in place
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameSpec {
    pub from: String,
    pub to: String,
}

/// A loaded recipe for exactly one version
///
/// Immutable once loaded; the registry hands out `Arc<Recipe>`.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub reference: PackageRef,
    pub definition: RecipeDefinition,
    /// Source for this version, if any
    pub source: Option<Source>,
    /// Directory holding the recipe file; patches and local sources are
    /// relative to it
    pub recipe_dir: PathBuf,
    /// Digest of the recipe file contents
    pub digest: Hash,
}

impl Recipe {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.reference.name
    }

    #[must_use]
    pub fn version(&self) -> &Version {
        &self.reference.version
    }

    #[must_use]
    pub fn kind(&self) -> PackageKind {
        self.definition.metadata.kind
    }

    /// Absolute patch paths in application order
    #[must_use]
    pub fn patch_paths(&self) -> Vec<PathBuf> {
        self.source
            .as_ref()
            .map(|source| {
                source
                    .patches
                    .iter()
                    .map(|patch| self.relative_to_recipe(patch))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Local source tree, if the source method is `local`
    #[must_use]
    pub fn local_source_dir(&self) -> Option<PathBuf> {
        match &self.source.as_ref()?.method {
            SourceMethod::Local { local } => Some(self.relative_to_recipe(&local.path)),
            _ => None,
        }
    }

    fn relative_to_recipe(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.recipe_dir.join(path)
        }
    }
}
