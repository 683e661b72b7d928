//! Lifecycle phases of a graph node

use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a node's lifecycle, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Validate,
    Source,
    Generate,
    Build,
    Package,
    PackageInfo,
    Test,
}

impl Phase {
    /// Every phase in the order the executor runs them
    pub const ALL: [Phase; 7] = [
        Phase::Validate,
        Phase::Source,
        Phase::Generate,
        Phase::Build,
        Phase::Package,
        Phase::PackageInfo,
        Phase::Test,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Source => "source",
            Self::Generate => "generate",
            Self::Build => "build",
            Self::Package => "package",
            Self::PackageInfo => "package_info",
            Self::Test => "test",
        }
    }

    /// Phases that need tool requirements on the host before they start
    #[must_use]
    pub fn needs_tools(self) -> bool {
        matches!(self, Self::Generate | Self::Build | Self::Test)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
