#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Recipe registry for kiln
//!
//! Recipes are declarative YAML documents. Loading one yields an immutable
//! [`Recipe`] per declared version; the [`RecipeRegistry`] indexes them by
//! `name/version`. Requirement declarations are evaluated per node by
//! [`Recipe::requirements`], which sees the node's settings and effective
//! options.

pub mod branch;
pub mod expand;
pub mod manifest;
pub mod model;
pub mod parser;
pub mod registry;
pub mod requirements;

pub use branch::Branched;
pub use expand::Variables;
pub use manifest::{Manifest, SettingsOverrides, MANIFEST_FILE};
pub use model::{
    CmakeBuild, CmakeInstall, CmakeToolchain, Condition, CopySpec, FetchSource, Generate,
    GitSource, LocalSource, Metadata, OptionDecl, Recipe, RecipeDefinition, RenameSpec,
    ReplaceSpec, RequirementDecl, RequirementSpec, SettingAxis, Source, SourceMethod, Step,
    Validation,
};
pub use parser::{parse_recipe_file, parse_recipe_str, KILN_VERSION};
pub use registry::{RecipeRegistry, RECIPE_FILE};
pub use requirements::evaluate_decl;
