//! Evaluation of a recipe's declared requirements and options
//!
//! Requirements are evaluated per node: `when` conditions see the node's
//! settings and effective options, and option values on an edge may forward
//! the declaring node's options. Nothing propagates further unless a recipe
//! forwards it explicitly.

use crate::expand::{references, Variables};
use crate::model::{Condition, Recipe, RequirementDecl, SettingAxis};
use kiln_errors::{Error, ResolveError};
use kiln_types::{Arch, BuildType, Options, Os, PackageRef, Requirement, RequirementKind, Settings};
use std::collections::BTreeMap;

impl Condition {
    /// Whether the condition holds for a node
    #[must_use]
    pub fn matches(&self, settings: &Settings, options: &Options) -> bool {
        let os_ok = self.os.is_empty() || self.os.iter().any(|os| Os::from(os.clone()) == settings.os);
        let arch_ok = self.arch.is_empty()
            || self
                .arch
                .iter()
                .any(|arch| Arch::from(arch.clone()) == settings.arch);
        let build_type_ok = self.build_type.is_empty()
            || self
                .build_type
                .iter()
                .any(|bt| bt.parse::<BuildType>().is_ok_and(|bt| bt == settings.build_type));
        let options_ok = self
            .options
            .iter()
            .all(|(name, value)| options.get(name) == Some(value));

        os_ok && arch_ok && build_type_ok && options_ok
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.os.is_empty() && self.arch.is_empty() && self.build_type.is_empty() && self.options.is_empty()
    }
}

/// Turn one declaration into a requirement, or `None` when its condition
/// does not hold
///
/// `parent_options` are used for `${options.NAME}` forwarding; pass an
/// empty map for root declarations.
///
/// # Errors
///
/// Returns `ResolveError::InvalidRequirement` for malformed references or
/// option values that reference unknown options.
pub fn evaluate_decl(
    decl: &RequirementDecl,
    kind: RequirementKind,
    settings: &Settings,
    parent_options: &Options,
) -> Result<Option<Requirement>, Error> {
    let spec = match decl {
        RequirementDecl::Short(reference) => {
            let reference = PackageRef::parse(reference)?;
            return Ok(Some(Requirement {
                kind,
                ..Requirement::link(reference)
            }));
        }
        RequirementDecl::Full(spec) => spec,
    };

    if !spec.when.matches(settings, parent_options) {
        return Ok(None);
    }

    let reference = PackageRef::parse(&spec.reference)?;
    let mut vars = Variables::new();
    vars.set_options(parent_options);

    let mut options = Options::new();
    for (name, raw) in &spec.options {
        let value = vars.expand(raw);
        if let Some(unbound) = references(&value).first() {
            return Err(ResolveError::InvalidRequirement {
                reference: spec.reference.clone(),
                reason: format!("option {name} references unknown variable ${{{unbound}}}"),
            }
            .into());
        }
        options.insert(name.clone(), value);
    }

    Ok(Some(Requirement {
        reference,
        kind,
        options,
        is_override: spec.is_override,
    }))
}

impl Recipe {
    /// Declared defaults overlaid with `requested`
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidRequirement` when `requested` names an
    /// undeclared option or a value outside the declared set.
    pub fn effective_options(&self, requested: &Options) -> Result<Options, Error> {
        let declared = &self.definition.options;
        let mut options: Options = declared
            .iter()
            .map(|(name, decl)| (name.clone(), decl.default.clone()))
            .collect();

        for (name, value) in requested {
            let Some(decl) = declared.get(name) else {
                return Err(ResolveError::InvalidRequirement {
                    reference: self.reference.to_string(),
                    reason: format!("unknown option '{name}'"),
                }
                .into());
            };
            if !decl.values.is_empty() && !decl.values.contains(value) {
                return Err(ResolveError::InvalidRequirement {
                    reference: self.reference.to_string(),
                    reason: format!(
                        "option '{name}' must be one of {}, got '{value}'",
                        decl.values.join(", ")
                    ),
                }
                .into());
            }
            options.insert(name.clone(), value.clone());
        }
        Ok(options)
    }

    /// Link and tool requirements of a node built with `settings` and the
    /// effective `options`
    ///
    /// # Errors
    ///
    /// Propagates [`evaluate_decl`] failures.
    pub fn requirements(&self, settings: &Settings, options: &Options) -> Result<Vec<Requirement>, Error> {
        let links = self
            .definition
            .requires
            .iter()
            .map(|decl| (decl, RequirementKind::Link));
        let tools = self
            .definition
            .tool_requires
            .iter()
            .map(|decl| (decl, RequirementKind::Tool));

        let mut out = Vec::new();
        for (decl, kind) in links.chain(tools) {
            if let Some(requirement) = evaluate_decl(decl, kind, settings, options)? {
                out.push(requirement);
            }
        }
        Ok(out)
    }

    /// Settings values the recipe declared as relevant to its binaries
    #[must_use]
    pub fn relevant_settings(&self, settings: &Settings) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for axis in &self.definition.settings {
            match axis {
                SettingAxis::Os => {
                    out.insert("os".to_string(), settings.os.to_string());
                }
                SettingAxis::Arch => {
                    out.insert("arch".to_string(), settings.arch.to_string());
                }
                SettingAxis::Compiler => {
                    out.insert("compiler".to_string(), settings.compiler.name.clone());
                    if let Some(version) = &settings.compiler.version {
                        out.insert("compiler.version".to_string(), version.clone());
                    }
                    out.insert("compiler.cppstd".to_string(), settings.compiler.cppstd.to_string());
                }
                SettingAxis::BuildType => {
                    out.insert("build_type".to_string(), settings.build_type.to_string());
                }
            }
        }
        out
    }
}
