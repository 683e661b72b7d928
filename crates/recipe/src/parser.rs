//! YAML recipe parser with validation
//!
//! Everything that can be checked without a target configuration is
//! checked here so that a broken recipe fails at load time rather than
//! halfway through a build.

use crate::expand::{is_known_variable, references};
use crate::model::{Recipe, RecipeDefinition, RequirementDecl, Source, SourceMethod, Step};
use globset::Glob;
use kiln_errors::{Error, RecipeError, VersionError};
use kiln_hash::Hash;
use kiln_types::{is_valid_name, Os, PackageRef, Version};
use std::path::Path;

/// Version of kiln checked against `required_kiln_version`
pub const KILN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parse a recipe file into one recipe per declared version
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid YAML or fails
/// validation.
pub async fn parse_recipe_file(path: &Path) -> Result<Vec<Recipe>, Error> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    let recipe_dir = path.parent().unwrap_or_else(|| Path::new("."));

    parse_recipe_str(&content, recipe_dir).map_err(|err| match err {
        Error::Recipe(RecipeError::Parse { message, .. }) => RecipeError::Parse {
            path: path.display().to_string(),
            message,
        }
        .into(),
        other => other,
    })
}

/// Parse recipe text; `recipe_dir` anchors patches and local sources
///
/// # Errors
///
/// Returns an error if the YAML is invalid or validation fails.
pub fn parse_recipe_str(content: &str, recipe_dir: &Path) -> Result<Vec<Recipe>, Error> {
    let definition: RecipeDefinition = serde_yml::from_str(content)?;
    validate_definition(&definition)?;

    let digest = Hash::from_data(content.as_bytes());
    let name = definition.metadata.name.clone();

    let versions: Vec<(String, Option<Source>)> = match &definition.metadata.version {
        Some(version) => vec![(version.clone(), definition.source.clone())],
        None => definition
            .sources
            .iter()
            .map(|(version, source)| (version.clone(), Some(source.clone())))
            .collect(),
    };

    versions
        .into_iter()
        .map(|(version, source)| -> Result<Recipe, Error> {
            let version = Version::parse(&version).map_err(|e| invalid(&name, e.to_string()))?;
            Ok(Recipe {
                reference: PackageRef::new(name.clone(), version),
                definition: definition.clone(),
                source,
                recipe_dir: recipe_dir.to_path_buf(),
                digest,
            })
        })
        .collect()
}

fn invalid(name: &str, message: impl Into<String>) -> Error {
    RecipeError::Invalid {
        name: name.to_string(),
        message: message.into(),
    }
    .into()
}

/// Validate a parsed recipe definition
///
/// # Errors
///
/// Returns `RecipeError::Invalid` describing the first problem found, or
/// `RecipeError::UnsupportedKilnVersion`.
pub fn validate_definition(def: &RecipeDefinition) -> Result<(), Error> {
    let name = def.metadata.name.as_str();
    if !is_valid_name(name) {
        return Err(invalid(name, "metadata.name is not a valid package name"));
    }

    check_kiln_version(def)?;

    match (&def.metadata.version, def.sources.is_empty()) {
        (Some(_), false) => {
            return Err(invalid(name, "metadata.version and sources are mutually exclusive"));
        }
        (None, true) => {
            return Err(invalid(name, "declare metadata.version or a sources map"));
        }
        _ => {}
    }
    if def.metadata.version.is_none() && def.source.is_some() {
        return Err(invalid(name, "source requires metadata.version; use sources instead"));
    }

    for (option, decl) in &def.options {
        if !decl.values.is_empty() && !decl.values.contains(&decl.default) {
            return Err(invalid(
                name,
                format!("default '{}' of option '{option}' is not an allowed value", decl.default),
            ));
        }
    }

    for decl in def.requires.iter().chain(&def.tool_requires) {
        check_requirement(def, decl)?;
    }

    for source in def.source.iter().chain(def.sources.values()) {
        if let SourceMethod::Fetch { fetch } = &source.method {
            if let Some(checksum) = &fetch.blake3 {
                Hash::from_hex(checksum)
                    .map_err(|_| invalid(name, format!("blake3 of {} is not 64 hex digits", fetch.url)))?;
            }
        }
    }

    for os in &def.validate.os {
        Os::parse_known(os).map_err(|unknown| invalid(name, format!("validate.os names unknown platform '{unknown}'")))?;
    }

    let mut keys = vec![
        ("generate", def.generate.check_keys()),
        ("build", def.build.check_keys()),
        ("package", def.package.check_keys()),
        ("package_info", def.package_info.check_keys()),
    ];
    if let Some(test) = &def.test {
        keys.push(("test", test.check_keys()));
    }
    for (phase, result) in keys {
        result.map_err(|message| invalid(name, format!("{phase}: {message}")))?;
    }

    let phases = def
        .build
        .bodies()
        .chain(def.package.bodies())
        .chain(def.test.iter().flat_map(|test| test.bodies()));
    for steps in phases {
        for step in steps {
            check_step(def, step)?;
        }
    }

    for generate in def.generate.bodies() {
        let toolchain_values = generate
            .cmake_toolchain
            .iter()
            .flat_map(|t| t.cache_variables.values());
        for value in toolchain_values.chain(generate.env.values()) {
            check_variables(def, value)?;
        }
    }
    for value in def.env.values() {
        check_variables(def, value)?;
    }

    Ok(())
}

fn check_kiln_version(def: &RecipeDefinition) -> Result<(), Error> {
    let Some(required) = &def.metadata.required_kiln_version else {
        return Ok(());
    };
    let requirement =
        semver::VersionReq::parse(required).map_err(|e| VersionError::InvalidKilnRequirement {
            input: required.clone(),
            message: e.to_string(),
        })?;
    let current = semver::Version::parse(KILN_VERSION)?;
    if requirement.matches(&current) {
        Ok(())
    } else {
        Err(RecipeError::UnsupportedKilnVersion {
            name: def.metadata.name.clone(),
            required: required.clone(),
            current: KILN_VERSION.to_string(),
        }
        .into())
    }
}

fn check_requirement(def: &RecipeDefinition, decl: &RequirementDecl) -> Result<(), Error> {
    let name = def.metadata.name.as_str();
    let reference = PackageRef::parse(decl.reference())
        .map_err(|e| invalid(name, e.to_string()))?;
    if reference.name == name {
        return Err(invalid(name, "a recipe cannot require itself"));
    }

    if let RequirementDecl::Full(spec) = decl {
        for os in &spec.when.os {
            Os::parse_known(os)
                .map_err(|unknown| invalid(name, format!("when.os names unknown platform '{unknown}'")))?;
        }
        for option in spec.when.options.keys() {
            if !def.options.contains_key(option) {
                return Err(invalid(name, format!("when.options names undeclared option '{option}'")));
            }
        }
        for value in spec.options.values() {
            for var in references(value) {
                let forwarded = var
                    .strip_prefix(crate::expand::OPTIONS_PREFIX)
                    .is_some_and(|option| def.options.contains_key(option));
                if !forwarded {
                    return Err(invalid(
                        name,
                        format!("requirement {} can only forward declared options, found ${{{var}}}", spec.reference),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn check_variables(def: &RecipeDefinition, value: &str) -> Result<(), Error> {
    for var in references(value) {
        if !is_known_variable(var, &def.options) {
            return Err(invalid(&def.metadata.name, format!("unknown variable ${{{var}}}")));
        }
    }
    Ok(())
}

fn check_step(def: &RecipeDefinition, step: &Step) -> Result<(), Error> {
    let name = def.metadata.name.as_str();
    match step {
        Step::Command { command } | Step::Shell { shell: command } => {
            if command.trim().is_empty() {
                return Err(invalid(name, "empty command step"));
            }
            check_variables(def, command)
        }
        Step::CmakeConfigure { cmake_configure } => cmake_configure
            .iter()
            .try_for_each(|arg| check_variables(def, arg)),
        Step::CmakeBuild { cmake_build } => cmake_build
            .target
            .iter()
            .chain(&cmake_build.args)
            .try_for_each(|arg| check_variables(def, arg)),
        Step::CmakeInstall { cmake_install } => cmake_install
            .prefix
            .iter()
            .try_for_each(|prefix| check_variables(def, prefix)),
        Step::Copy { copy } => {
            Glob::new(&copy.pattern)
                .map_err(|e| invalid(name, format!("copy pattern '{}': {e}", copy.pattern)))?;
            check_variables(def, &copy.from)?;
            check_variables(def, &copy.to)
        }
        Step::Replace { replace } => {
            regex::Regex::new(&replace.search)
                .map_err(|e| invalid(name, format!("replace search '{}': {e}", replace.search)))?;
            check_variables(def, &replace.file)?;
            check_variables(def, &replace.replacement)?;
            replace
                .output
                .iter()
                .try_for_each(|output| check_variables(def, output))
        }
        Step::Rename { rename } => {
            check_variables(def, &rename.from)?;
            check_variables(def, &rename.to)
        }
        Step::Mkdir { mkdir: path } | Step::Remove { remove: path } => check_variables(def, path),
    }
}
