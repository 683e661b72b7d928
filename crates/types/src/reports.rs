//! Report type definitions for build runs

use crate::{NodeContext, PackageRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why a node never ran
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// A dependency failed; `root_cause` is the node that actually failed
    UpstreamFailure { root_cause: String },
    /// The run was cancelled before the node finished
    Cancelled,
}

/// Terminal state of a graph node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NodeState {
    /// Lifecycle ran and the artifact was published to the cache
    Built,
    /// Satisfied from the cache without running any build phase
    Cached,
    Failed {
        /// Stable error code, e.g. `build.command_failed`
        code: String,
        message: String,
    },
    Skipped(SkipReason),
}

impl NodeState {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Built | Self::Cached)
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Built => "built",
            Self::Cached => "cached",
            Self::Failed { .. } => "failed",
            Self::Skipped(_) => "skipped",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { message, .. } => write!(f, "failed: {message}"),
            Self::Skipped(SkipReason::UpstreamFailure { root_cause }) => {
                write!(f, "skipped due to upstream failure of {root_cause}")
            }
            Self::Skipped(SkipReason::Cancelled) => write!(f, "skipped (cancelled)"),
            other => f.write_str(other.label()),
        }
    }
}

/// Result of the optional test phase
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Failed {
        message: String,
    },
    /// Recipe declares no test, the node came from cache, or the artifact
    /// cannot execute here (cross build)
    #[default]
    NotRun,
}

/// Terminal report for one graph node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeReport {
    pub package: PackageRef,
    pub context: NodeContext,
    /// Hex fingerprint; absent when the node was skipped before hashing
    pub fingerprint: Option<String>,
    #[serde(flatten)]
    pub state: NodeState,
    #[serde(default)]
    pub test: TestOutcome,
    pub duration_ms: u64,
}

/// Counts per terminal state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub built: usize,
    pub cached: usize,
    pub failed: usize,
    pub skipped: usize,
    pub tests_failed: usize,
}

/// Report of a whole orchestration run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Nodes in topological order
    pub nodes: Vec<NodeReport>,
    pub duration_ms: u64,
}

impl BuildReport {
    #[must_use]
    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary::default();
        for node in &self.nodes {
            match node.state {
                NodeState::Built => summary.built += 1,
                NodeState::Cached => summary.cached += 1,
                NodeState::Failed { .. } => summary.failed += 1,
                NodeState::Skipped(_) => summary.skipped += 1,
            }
            if matches!(node.test, TestOutcome::Failed { .. }) {
                summary.tests_failed += 1;
            }
        }
        summary
    }

    /// Whether every node reached built or cached
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.nodes.iter().all(|node| node.state.is_success())
    }

    /// Look up the report of a package by name
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|node| node.package.name == name)
    }
}
