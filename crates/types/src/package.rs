//! Package references and requirement edges

use crate::Version;
use kiln_errors::ResolveError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Option values keyed by option name; ordered so that hashing is stable
pub type Options = BTreeMap<String, String>;

/// Identity of a recipe: `name/version`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageRef {
    pub name: String,
    pub version: Version,
}

impl PackageRef {
    /// Create a new package reference
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Parse a `name/version` reference
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidRequirement` when the separator is
    /// missing, the name is not a valid package name or the version is
    /// not an exact version.
    pub fn parse(input: &str) -> Result<Self, ResolveError> {
        let invalid = |reason: &str| ResolveError::InvalidRequirement {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        let (name, version) = input
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("expected name/version"))?;

        if !is_valid_name(name) {
            return Err(invalid(
                "package names use lowercase letters, digits, '-', '_' and '.'",
            ));
        }

        if version.starts_with('[') {
            return Err(invalid("version ranges are not supported, pin an exact version"));
        }

        let version = Version::parse(version).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self::new(name, version))
    }
}

/// Whether a string is an acceptable package name
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.' | '+')
        })
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

impl FromStr for PackageRef {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PackageRef {
    type Error = ResolveError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PackageRef> for String {
    fn from(value: PackageRef) -> Self {
        value.to_string()
    }
}

/// What a recipe produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageKind {
    HeaderOnly,
    #[default]
    StaticLibrary,
    SharedLibrary,
    Tool,
}

impl PackageKind {
    /// Whether consumers link against this package
    #[must_use]
    pub fn links(self) -> bool {
        matches!(self, Self::StaticLibrary | Self::SharedLibrary)
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::HeaderOnly => "header-only",
            Self::StaticLibrary => "static-library",
            Self::SharedLibrary => "shared-library",
            Self::Tool => "tool",
        };
        f.write_str(label)
    }
}

/// Kind of requirement edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementKind {
    /// Build and runtime dependency whose metadata propagates to consumers
    Link,
    /// Host executable needed while building; produces no linked metadata
    Tool,
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link => write!(f, "link"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Which machine a graph node is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeContext {
    /// Built with the requested target settings
    #[default]
    Target,
    /// Built to run on this machine as a tool requirement
    Tool,
}

impl fmt::Display for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target => write!(f, "target"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A pinned edge to another recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub reference: PackageRef,
    pub kind: RequirementKind,
    /// Option overrides applied to the target node only
    #[serde(default)]
    pub options: Options,
    /// Pins this version for every edge to the same package name
    #[serde(default, rename = "override")]
    pub is_override: bool,
}

impl Requirement {
    /// Link requirement on `reference`
    #[must_use]
    pub fn link(reference: PackageRef) -> Self {
        Self {
            reference,
            kind: RequirementKind::Link,
            options: Options::new(),
            is_override: false,
        }
    }

    /// Tool requirement on `reference`
    #[must_use]
    pub fn tool(reference: PackageRef) -> Self {
        Self {
            kind: RequirementKind::Tool,
            ..Self::link(reference)
        }
    }

    #[must_use]
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn as_override(mut self) -> Self {
        self.is_override = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.reference.name
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)?;
        if !self.options.is_empty() {
            let opts: Vec<String> = self
                .options
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, " [{}]", opts.join(", "))?;
        }
        Ok(())
    }
}
