#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Dependency resolution for kiln
//!
//! Expands root requirements through the recipe registry into a graph of
//! nodes, one per (package, version, context). Versions are pinned exactly;
//! the only way to reconcile two requests for different versions of the
//! same package is an override. Resolution also rejects cycles (link, tool
//! and component) and conflicting option requests, then fingerprints every
//! node and derives an execution plan for the scheduler.

mod components;
mod execution;
mod fingerprint;
mod graph;
mod resolver;

pub use components::{check_components, component_order, find_component_cycle};
pub use execution::{ExecutionPlan, NodeMeta};
pub use fingerprint::{compute_fingerprints, node_fingerprint, FingerprintInputs};
pub use graph::{DependencyGraph, NodeId, ResolvedNode};
pub use resolver::{ResolutionRequest, ResolutionResult, Resolver};
