//! kiln - recipe-driven native package build orchestrator
//!
//! This is the CLI front end. It loads configuration, resolves the root
//! requirement set and hands the graph to the build scheduler, rendering
//! events while the run is in progress.

mod cli;
mod commands;
mod display;
mod error;
mod events;
mod logging;
mod setup;

use crate::cli::{Cli, Commands};
use crate::commands::OperationResult;
use crate::display::OutputRenderer;
use crate::error::{exit_code, CliError};
use crate::events::EventHandler;
use crate::setup::SystemSetup;
use clap::Parser;
use kiln_config::Config;
use kiln_events::EventReceiver;
use kiln_types::{ColorChoice, OutputFormat};
use std::future::Future;
use std::path::Path;
use std::process;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments first to check for JSON mode
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Application error: {}", e);
            if !json_mode {
                eprintln!("Error: {e}");
            }
            e.exit_code()
        }
    };
    process::exit(code);
}

/// Main application logic; returns the process exit code
async fn run(cli: Cli) -> Result<i32, CliError> {
    // Load configuration with proper precedence:
    // 1. Start with file config (or defaults)
    let mut config = Config::load(cli.global.config.as_deref()).await?;

    // 2. Merge environment variables
    config.merge_env()?;

    // 3. Apply CLI flags (highest precedence)
    apply_cli_config(&mut config, &cli.global, &cli.command);

    // An explicit --json wins; otherwise the configured default output applies
    let json_mode = cli.global.json || config.general.default_output == OutputFormat::Json;
    if config.general.default_output == OutputFormat::Plain && cli.global.color.is_none() {
        config.general.color = ColorChoice::Never;
    }

    init_tracing(json_mode, cli.global.debug, &config.cache_dir());
    info!("Starting kiln v{}", env!("CARGO_PKG_VERSION"));

    let (event_sender, event_receiver) = kiln_events::channel();
    let setup = SystemSetup::new(config.clone(), event_sender.clone());
    setup.initialize().await?;

    let renderer = OutputRenderer::new(json_mode, config.general.color);
    let colors_enabled = match config.general.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => console::Term::stderr().features().colors_supported(),
    };
    let mut event_handler = EventHandler::new(colors_enabled, cli.global.debug, json_mode);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let command = execute_command(cli.command, &setup, event_sender, cancel);
    let result = with_events(command, event_receiver, &mut event_handler).await?;

    renderer.render_result(&result)?;

    let code = match &result {
        OperationResult::BuildReport(report) => exit_code::for_report(report),
        _ => exit_code::SUCCESS,
    };
    info!(exit_code = code, "Command completed");
    Ok(code)
}

/// Drive `command` while rendering the events it emits
async fn with_events<F>(
    command: F,
    mut event_receiver: EventReceiver,
    event_handler: &mut EventHandler,
) -> Result<OperationResult, CliError>
where
    F: Future<Output = Result<OperationResult, CliError>>,
{
    let mut command = Box::pin(command);

    loop {
        select! {
            result = &mut command => {
                // Drain any remaining events
                while let Ok(event) = event_receiver.try_recv() {
                    event_handler.handle_event(event);
                }
                return result;
            }

            event = event_receiver.recv() => {
                if let Some(event) = event {
                    event_handler.handle_event(event);
                }
            }
        }
    }
}

/// Execute the specified command
async fn execute_command(
    command: Commands,
    setup: &SystemSetup,
    event_sender: kiln_events::EventSender,
    cancel: CancellationToken,
) -> Result<OperationResult, CliError> {
    match command {
        Commands::Build { target, .. } => commands::build(setup, &target, event_sender, cancel).await,
        Commands::Resolve { target } => commands::resolve(setup, &target, event_sender).await,
        Commands::Cache(cache_cmd) => commands::cache(setup, cache_cmd).await,
    }
}

/// First Ctrl-C cancels the run gracefully; a second one exits at once
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, cancelling run");
        eprintln!("Interrupted: finishing running commands, press Ctrl-C again to abort");
        cancel.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            process::exit(exit_code::INTERRUPTED);
        }
    });
}

/// Apply CLI configuration overrides (highest precedence)
fn apply_cli_config(config: &mut Config, global: &cli::GlobalArgs, command: &Commands) {
    if let Some(color) = global.color {
        config.general.color = color;
    }
    if let Some(dir) = &global.cache_dir {
        config.paths.cache_dir = Some(dir.clone());
    }

    if let Commands::Build {
        jobs,
        strict_tests,
        keep_failed,
        ..
    } = command
    {
        if let Some(jobs) = jobs {
            config.build.jobs = *jobs;
        }
        if *strict_tests {
            config.build.strict_tests = true;
        }
        if *keep_failed {
            config.build.keep_failed_builds = true;
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(json_mode: bool, debug_enabled_flag: bool, cache_dir: &Path) {
    let debug_enabled = std::env::var("RUST_LOG").is_ok() || debug_enabled_flag;
    let filter = |default: &str| {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default))
    };

    if debug_enabled {
        // Debug mode: structured JSON logs to file, never to the terminal
        let log_dir = cache_dir.join("logs");
        let log_file = log_dir.join(format!(
            "kiln-{}.log",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        ));
        let file = std::fs::create_dir_all(&log_dir).and_then(|()| std::fs::File::create(&log_file));
        match file {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .json()
                    .with_writer(file)
                    .with_env_filter(filter("info,kiln=debug,kiln_builder=debug"))
                    .init();
                if !json_mode {
                    eprintln!("Debug logging enabled: {}", log_file.display());
                }
                return;
            }
            Err(e) if !json_mode => {
                eprintln!("Warning: Failed to create log file: {e}");
            }
            Err(_) => {}
        }
    }

    if json_mode {
        // JSON mode: keep stdout and stderr free of log lines
        tracing_subscriber::fmt()
            .with_writer(std::io::sink)
            .with_env_filter("off")
            .init();
    } else {
        // Normal mode: minimal logging to stderr; events are already rendered
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter("warn,kiln::logging=off"))
            .init();
    }
}
