#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the kiln build orchestrator
//!
//! This crate provides the vocabulary shared by every other crate: package
//! references and requirements, build settings, exported package metadata
//! and the per-node build report.

pub mod info;
pub mod package;
pub mod phase;
pub mod reports;
pub mod settings;
pub mod version;

// Re-export commonly used types
pub use info::{Component, ComponentRef, PackageInfo};
pub use package::{
    is_valid_name, NodeContext, Options, PackageKind, PackageRef, Requirement, RequirementKind,
};
pub use phase::Phase;
pub use reports::{BuildReport, NodeReport, NodeState, ReportSummary, SkipReason, TestOutcome};
pub use settings::{Arch, BuildType, Compiler, Os, Settings};
pub use uuid::Uuid;
pub use version::Version;

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How command results are written to stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Tables without color
    Plain,
    #[default]
    Tty,
    Json,
}

/// When to color terminal output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    Always,
    #[default]
    Auto,
    Never,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as clap::ValueEnum>::from_str(s, true)
    }
}

impl FromStr for ColorChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as clap::ValueEnum>::from_str(s, true)
    }
}
