//! Exact recipe versions
//!
//! Native libraries use every versioning scheme imaginable (`1.3.1`,
//! `1.4.304.0`, `2.5.25`, `1.8.2502`, `1.4.304-exp`), so recipe versions are
//! opaque labels compared for equality. Ordering is only used to keep output
//! deterministic and compares dotted numeric segments where possible.

use kiln_errors::VersionError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A pinned recipe version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    /// Parse a version label
    ///
    /// # Errors
    ///
    /// Returns `VersionError::InvalidVersion` if the label is empty or contains
    /// whitespace or reference separators (`/`, `@`, `:`).
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        let invalid = trimmed.is_empty()
            || trimmed
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '/' | '@' | ':' | '[' | ']'));
        if invalid {
            return Err(VersionError::InvalidVersion {
                input: input.to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Version label as written in the recipe
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(['.', '-', '+'])
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.0
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = self.segments();
        let mut right = other.segments();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return self.0.cmp(&other.0),
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(a), Some(b)) => {
                    let ord = match (a.parse::<u64>(), b.parse::<u64>()) {
                        (Ok(x), Ok(y)) => x.cmp(&y),
                        _ => a.cmp(b),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
