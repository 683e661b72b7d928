use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::FailureContext;
use kiln_types::{NodeContext, PackageRef, Phase};

/// Scheduling and lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuildEvent {
    /// Scheduler accepted a graph
    RunStarted {
        run_id: String,
        nodes: usize,
        jobs: usize,
    },

    /// Every node reached a terminal state
    RunCompleted {
        run_id: String,
        built: usize,
        cached: usize,
        failed: usize,
        skipped: usize,
        duration_ms: u64,
    },

    /// Node dependencies satisfied, lifecycle starting
    NodeStarted {
        package: PackageRef,
        context: NodeContext,
        fingerprint: String,
    },

    /// Source prepared; node is blocked on its tool requirements
    WaitingForTools {
        package: PackageRef,
        tools: Vec<String>,
    },

    PhaseStarted {
        package: PackageRef,
        phase: Phase,
    },

    PhaseCompleted {
        package: PackageRef,
        phase: Phase,
        duration_ms: u64,
    },

    /// Phase intentionally not executed (cross build test, undeclared hook)
    PhaseSkipped {
        package: PackageRef,
        phase: Phase,
        reason: String,
    },

    CommandStarted {
        package: PackageRef,
        phase: Phase,
        command: String,
        working_dir: PathBuf,
    },

    /// One line of external process output
    CommandOutput {
        package: PackageRef,
        line: String,
        is_stderr: bool,
    },

    CommandCompleted {
        package: PackageRef,
        command: String,
        exit_code: Option<i32>,
        duration_ms: u64,
    },

    /// Transient source fetch failure; the fetch will be attempted again
    SourceRetrying {
        package: PackageRef,
        attempt: usize,
        max_attempts: usize,
        reason: String,
    },

    /// Node built and published
    NodeCompleted {
        package: PackageRef,
        fingerprint: String,
        duration_ms: u64,
    },

    NodeFailed {
        package: PackageRef,
        phase: Option<Phase>,
        failure: FailureContext,
    },

    /// Node not attempted because a dependency did not complete
    NodeSkipped {
        package: PackageRef,
        root_cause: Option<String>,
    },

    /// Test phase failed; non-fatal unless tests are strict
    TestFailed {
        package: PackageRef,
        failure: FailureContext,
    },
}
