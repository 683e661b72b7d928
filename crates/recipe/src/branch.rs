//! Per-OS branching for recipe phases
//!
//! Any phase body may be written either directly or as a `platforms`
//! mapping whose keys name one or more operating systems separated by `|`:
//!
//! ```yaml
//! package:
//!   platforms:
//!     windows:
//!       - copy: { pattern: "dxil.dll", from: "${build_folder}/bin", to: "bin" }
//!     macos|linux:
//!       - copy: { pattern: "*", from: "${build_folder}/installed/lib", to: "lib" }
//! ```
//!
//! Exactly one key must match the target OS. A target OS that no key names
//! is an `UnsupportedPlatform` error, never a silent no-op. A mapping with a
//! `platforms` key is always read as a branch table, so a malformed branch is
//! a parse error rather than an empty default body.

use kiln_errors::BuildError;
use kiln_types::{Os, PackageRef, Phase};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A phase body that may differ per target OS
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Branched<T> {
    PerOs { platforms: BTreeMap<String, T> },
    Always(T),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BranchTable<T> {
    platforms: BTreeMap<String, T>,
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Branched<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_yml::Value::deserialize(deserializer)?;
        let is_table = value.as_mapping().is_some_and(|map| {
            map.iter()
                .any(|(key, _)| key.as_str() == Some("platforms"))
        });
        if is_table {
            let table: BranchTable<T> = serde_yml::from_value(value)
                .map_err(|e| D::Error::custom(format!("platforms: {e}")))?;
            Ok(Self::PerOs {
                platforms: table.platforms,
            })
        } else {
            serde_yml::from_value(value)
                .map(Self::Always)
                .map_err(D::Error::custom)
        }
    }
}

impl<T: Default> Default for Branched<T> {
    fn default() -> Self {
        Self::Always(T::default())
    }
}

fn key_matches(key: &str, os: &Os) -> bool {
    key.split('|')
        .map(str::trim)
        .filter_map(|name| Os::parse_known(name).ok())
        .any(|known| &known == os)
}

impl<T> Branched<T> {
    /// Whether the body is split by OS
    #[must_use]
    pub fn is_branched(&self) -> bool {
        matches!(self, Self::PerOs { .. })
    }

    /// Body for `os`, or `None` when no branch names it
    #[must_use]
    pub fn select(&self, os: &Os) -> Option<&T> {
        match self {
            Self::Always(body) => Some(body),
            Self::PerOs { platforms } => platforms
                .iter()
                .find(|(key, _)| key_matches(key, os))
                .map(|(_, body)| body),
        }
    }

    /// Body for `os`, failing the phase when no branch matches
    ///
    /// # Errors
    ///
    /// Returns `BuildError::UnsupportedPlatform` when the body is branched
    /// and no key names `os`.
    pub fn resolve(&self, package: &PackageRef, phase: Phase, os: &Os) -> Result<&T, BuildError> {
        self.select(os)
            .ok_or_else(|| BuildError::UnsupportedPlatform {
                package: package.to_string(),
                phase: phase.to_string(),
                os: os.to_string(),
            })
    }

    /// Every body regardless of platform
    pub fn bodies(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            Self::Always(body) => Box::new(std::iter::once(body)),
            Self::PerOs { platforms } => Box::new(platforms.values()),
        }
    }

    /// Check that every key names known operating systems and that no OS
    /// appears in more than one branch
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending key.
    pub fn check_keys(&self) -> Result<(), String> {
        let Self::PerOs { platforms } = self else {
            return Ok(());
        };
        if platforms.is_empty() {
            return Err("platforms must declare at least one branch".to_string());
        }

        let mut seen = BTreeSet::new();
        for key in platforms.keys() {
            for name in key.split('|').map(str::trim) {
                let os = Os::parse_known(name)
                    .map_err(|unknown| format!("unknown platform '{unknown}' in key '{key}'"))?;
                if !seen.insert(os.clone()) {
                    return Err(format!("platform '{os}' is matched by more than one branch"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_types::Version;

    fn branched() -> Branched<Vec<String>> {
        serde_yml::from_str(
            r"
platforms:
  windows: [a]
  macos|ios: [b]
",
        )
        .unwrap()
    }

    fn pkg() -> PackageRef {
        PackageRef::new("dxc", Version::parse("1.8.2407").unwrap())
    }

    #[test]
    fn test_plain_body_always_matches() {
        let body: Branched<Vec<String>> = serde_yml::from_str("[x, y]").unwrap();
        assert!(!body.is_branched());
        assert_eq!(body.select(&Os::Linux).unwrap().len(), 2);
    }

    #[test]
    fn test_each_os_selects_one_branch() {
        let body = branched();
        assert_eq!(body.select(&Os::Windows).unwrap(), &vec!["a".to_string()]);
        assert_eq!(body.select(&Os::Macos).unwrap(), &vec!["b".to_string()]);
        assert_eq!(body.select(&Os::Ios).unwrap(), &vec!["b".to_string()]);
        assert!(body.check_keys().is_ok());
    }

    #[test]
    fn test_unmatched_os_is_unsupported() {
        let err = branched()
            .resolve(&pkg(), Phase::Package, &Os::Linux)
            .unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedPlatform { ref os, .. } if os == "linux"));

        let err = branched()
            .resolve(&pkg(), Phase::Build, &Os::Other("haiku".to_string()))
            .unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedPlatform { .. }));
    }

    #[test]
    fn test_overlapping_keys_rejected() {
        let body: Branched<Vec<String>> = serde_yml::from_str(
            r"
platforms:
  linux: [a]
  macos|linux: [b]
",
        )
        .unwrap();
        assert!(body.check_keys().unwrap_err().contains("linux"));
    }

    #[test]
    fn test_malformed_branch_is_a_parse_error() {
        let result: Result<Branched<kiln_types::PackageInfo>, _> = serde_yml::from_str(
            r"
platforms:
  windows: { includedirs: 5 }
  linux: { libs: [z] }
",
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("platforms"), "{err}");
    }

    #[test]
    fn test_platforms_beside_body_keys_rejected() {
        let result: Result<Branched<kiln_types::PackageInfo>, _> =
            serde_yml::from_str("platforms: { linux: {} }\nlibs: [z]\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_misspelled_platforms_key_rejected() {
        let result: Result<Branched<kiln_types::PackageInfo>, _> =
            serde_yml::from_str("platform:\n  linux: { libs: [z] }\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let body: Branched<Vec<String>> =
            serde_yml::from_str("platforms:\n  windoze: [a]\n").unwrap();
        assert!(body.check_keys().unwrap_err().contains("windoze"));
    }
}
