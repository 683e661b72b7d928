#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]
//! Node lifecycle execution and graph scheduling for kiln
//!
//! [`BuildScheduler`] walks a resolved graph on a bounded pool, consults the
//! fingerprint cache, and hands every miss to a [`NodeExecutor`]. The
//! default executor, [`LifecycleExecutor`], runs the recipe phases inside
//! an isolated [`BuildContext`] and shells out to external tools for
//! everything that actually compiles.

mod archive;
pub mod cmake;
mod context;
mod environment;
mod gate;
mod lifecycle;
pub mod packaging;
mod process;
mod scheduler;
pub mod source;
mod steps;

pub use archive::ArchiveFormat;
pub use cmake::CmakeSetup;
pub use context::{BuildContext, ContextSeed, UpstreamPackage};
pub use environment::{BuildEnvironment, PATH_VAR};
pub use gate::{ToolGate, ToolState};
pub use lifecycle::{
    runtime_library_var, validate, BuiltNode, ExecutorOptions, LifecycleExecutor, NodeExecutor,
    NodeJob,
};
pub use process::{shell_invocation, split_command, CommandOutput};
pub use scheduler::{failed_phase, settings_map, BuildScheduler, SchedulerOptions};
pub use source::{DefaultSourceFetcher, SourceFetcher};
pub use steps::{describe as describe_step, run_steps};
