//! Command line interface definition

use clap::{Args, Parser, Subcommand};
use kiln_types::ColorChoice;
use std::path::PathBuf;

/// kiln - recipe-driven native package build orchestrator
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Recipe-driven native package build orchestrator")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Write structured debug logs to a file in the cache directory
    #[arg(long, global = true)]
    pub debug: bool,

    /// Color output control
    #[arg(long, global = true, value_enum)]
    pub color: Option<ColorChoice>,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the cache directory
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Resolve and build a root requirement set
    #[command(alias = "b")]
    Build {
        #[command(flatten)]
        target: TargetArgs,

        /// Number of nodes built concurrently (0=auto)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Treat failing test phases as node failures
        #[arg(long)]
        strict_tests: bool,

        /// Keep build directories of failed nodes for inspection
        #[arg(long)]
        keep_failed: bool,
    },

    /// Resolve a root requirement set and print the execution plan
    Resolve {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Inspect and prune the package cache
    #[command(subcommand)]
    Cache(CacheCommands),
}

/// What to resolve and the settings to resolve it for
#[derive(Args, Clone, Debug, Default)]
pub struct TargetArgs {
    /// Root requirements (name/version); defaults to the manifest in the
    /// current directory
    pub requires: Vec<String>,

    /// Root tool requirements (name/version)
    #[arg(long = "tool", value_name = "REF")]
    pub tool_requires: Vec<String>,

    /// Project manifest declaring the root requirement set
    #[arg(short, long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Additional recipe directory, searched before configured ones
    #[arg(short = 'r', long = "recipes", value_name = "DIR")]
    pub recipe_dirs: Vec<PathBuf>,

    /// Option for a root requirement (name:option=value)
    #[arg(short = 'o', long = "option", value_name = "NAME:KEY=VALUE")]
    pub options: Vec<String>,

    /// Target operating system
    #[arg(long)]
    pub os: Option<String>,

    /// Target architecture
    #[arg(long)]
    pub arch: Option<String>,

    /// Build type (release, debug, relwithdebinfo, minsizerel)
    #[arg(long)]
    pub build_type: Option<String>,

    /// Compiler name
    #[arg(long)]
    pub compiler: Option<String>,

    /// Compiler version
    #[arg(long)]
    pub compiler_version: Option<String>,

    /// C++ standard (e.g. 17)
    #[arg(long)]
    pub cppstd: Option<u32>,
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// List cached packages
    #[command(alias = "ls")]
    List,

    /// Show cache size and content summary
    Stats,

    /// Remove cache entries and leftover build directories
    Clean {
        /// Remove every entry
        #[arg(long)]
        all: bool,

        /// Remove entries of one package
        #[arg(long, value_name = "NAME")]
        package: Option<String>,

        /// Remove entries older than this many days
        #[arg(long, value_name = "DAYS")]
        older_than: Option<u64>,
    },
}
