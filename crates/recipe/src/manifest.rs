//! Project manifest (`kiln.yml`): the root requirement set of a run

use crate::model::RequirementDecl;
use crate::requirements::evaluate_decl;
use kiln_errors::{Error, RecipeError};
use kiln_types::{Arch, BuildType, Options, Os, PackageRef, Requirement, RequirementKind, Settings};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default manifest file name
pub const MANIFEST_FILE: &str = "kiln.yml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub requires: Vec<RequirementDecl>,

    #[serde(default)]
    pub tool_requires: Vec<RequirementDecl>,

    /// Versions pinned for every edge to the same package name
    #[serde(default)]
    pub overrides: Vec<String>,

    #[serde(default)]
    pub settings: SettingsOverrides,
}

/// Partial settings; unset axes keep the caller's values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsOverrides {
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub build_type: Option<String>,
    #[serde(default)]
    pub compiler: Option<String>,
    #[serde(default)]
    pub compiler_version: Option<String>,
    #[serde(default)]
    pub cppstd: Option<u32>,
}

impl SettingsOverrides {
    /// Apply to `base`
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown build type.
    pub fn apply(&self, mut base: Settings) -> Result<Settings, Error> {
        if let Some(os) = &self.os {
            let os = Os::from(os.clone());
            if os != base.os && self.compiler.is_none() {
                base.compiler = kiln_types::Compiler {
                    cppstd: base.compiler.cppstd,
                    ..kiln_types::Compiler::default_for(&os)
                };
            }
            base.os = os;
        }
        if let Some(arch) = &self.arch {
            base.arch = Arch::from(arch.clone());
        }
        if let Some(build_type) = &self.build_type {
            base.build_type = build_type.parse::<BuildType>()?;
        }
        if let Some(compiler) = &self.compiler {
            base.compiler.name.clone_from(compiler);
        }
        if let Some(version) = &self.compiler_version {
            base.compiler.version = Some(version.clone());
        }
        if let Some(cppstd) = self.cppstd {
            base.compiler.cppstd = cppstd;
        }
        Ok(base)
    }
}

impl Manifest {
    /// Read a manifest file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path))?;
        serde_yml::from_str(&content).map_err(|e| {
            RecipeError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Root requirements for a run with `settings`, overrides included
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidRequirement` for malformed entries.
    pub fn root_requirements(&self, settings: &Settings) -> Result<Vec<Requirement>, Error> {
        let no_options = Options::new();
        let mut out = Vec::new();

        let decls = self
            .requires
            .iter()
            .map(|decl| (decl, RequirementKind::Link))
            .chain(self.tool_requires.iter().map(|decl| (decl, RequirementKind::Tool)));
        for (decl, kind) in decls {
            if let Some(requirement) = evaluate_decl(decl, kind, settings, &no_options)? {
                out.push(requirement);
            }
        }

        for pin in &self.overrides {
            out.push(Requirement::link(PackageRef::parse(pin)?).as_override());
        }
        Ok(out)
    }
}
