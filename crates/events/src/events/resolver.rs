use serde::{Deserialize, Serialize};

use super::FailureContext;

/// Resolver domain events for dependency resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResolverEvent {
    /// Resolution of a root requirement set started
    ResolutionStarted { roots: Vec<String>, overrides: usize },

    /// A root-level or recipe-level override rewrote requirement edges
    OverrideApplied {
        package: String,
        version: String,
        declared_by: String,
    },

    /// Resolution produced a validated graph
    ResolutionCompleted {
        nodes: usize,
        link_edges: usize,
        tool_edges: usize,
        duration_ms: u64,
    },

    /// Conflict, cycle or missing recipe
    ResolutionFailed { failure: FailureContext },
}
