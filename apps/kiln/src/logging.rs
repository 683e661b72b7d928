//! Structured logging integration for events
//!
//! Every event that reaches the CLI is also forwarded to `tracing` with
//! structured fields, so the debug log file carries the full run history
//! even when the terminal only shows a summary.

use kiln_events::{AppEvent, BuildEvent, CacheEvent, EventMessage, GeneralEvent, ResolverEvent};
use tracing::{debug, error, info, trace, warn};

/// Log an event at the level recorded in its metadata
pub fn log_event_with_tracing(message: &EventMessage) {
    let event = &message.event;
    let meta = &message.meta;
    let source = meta.source.as_str();
    let correlation = meta.correlation_id.as_deref().unwrap_or("-");

    match event {
        AppEvent::Build(build_event) => match build_event {
            BuildEvent::RunStarted { run_id, nodes, jobs } => {
                info!(source, correlation, run_id = %run_id, nodes, jobs, "Build run started");
            }
            BuildEvent::RunCompleted {
                run_id,
                built,
                cached,
                failed,
                skipped,
                duration_ms,
            } => {
                info!(
                    source,
                    correlation,
                    run_id = %run_id,
                    built,
                    cached,
                    failed,
                    skipped,
                    duration_ms,
                    "Build run completed"
                );
            }
            BuildEvent::CommandStarted {
                package,
                phase,
                command,
                working_dir,
            } => {
                debug!(
                    source,
                    correlation,
                    package = %package,
                    phase = phase.as_str(),
                    command = %command,
                    working_dir = %working_dir.display(),
                    "Command started"
                );
            }
            BuildEvent::CommandOutput {
                package,
                line,
                is_stderr,
            } => {
                trace!(source, package = %package, stderr = is_stderr, line = %line, "Command output");
            }
            BuildEvent::CommandCompleted {
                package,
                command,
                exit_code,
                duration_ms,
            } => {
                debug!(
                    source,
                    correlation,
                    package = %package,
                    command = %command,
                    exit_code = ?exit_code,
                    duration_ms,
                    "Command completed"
                );
            }
            BuildEvent::NodeFailed {
                package,
                phase,
                failure,
            } => {
                error!(
                    source,
                    correlation,
                    package = %package,
                    phase = phase.as_ref().map(|p| p.as_str()),
                    code = ?failure.code,
                    message = %failure.message,
                    hint = ?failure.hint,
                    retryable = failure.retryable,
                    "Node failed"
                );
            }
            BuildEvent::TestFailed { package, failure } => {
                warn!(
                    source,
                    correlation,
                    package = %package,
                    code = ?failure.code,
                    message = %failure.message,
                    "Test phase failed"
                );
            }
            other => log_at_level(meta.tracing_level(), source, correlation, other),
        },

        AppEvent::Resolver(resolver_event) => match resolver_event {
            ResolverEvent::ResolutionFailed { failure } => {
                error!(
                    source,
                    correlation,
                    code = ?failure.code,
                    message = %failure.message,
                    hint = ?failure.hint,
                    "Resolution failed"
                );
            }
            other => log_at_level(meta.tracing_level(), source, correlation, other),
        },

        AppEvent::Cache(CacheEvent::Published {
            package,
            fingerprint,
            path,
        }) => {
            info!(
                source,
                correlation,
                package = %package,
                fingerprint = %fingerprint,
                path = %path.display(),
                "Package published to cache"
            );
        }
        AppEvent::Cache(other) => log_at_level(meta.tracing_level(), source, correlation, other),

        AppEvent::General(general_event) => match general_event {
            GeneralEvent::Warning { message, context } => {
                warn!(source, correlation, message = %message, context = ?context, "Warning");
            }
            GeneralEvent::Error { message, details } => {
                error!(source, correlation, message = %message, details = ?details, "Error");
            }
            GeneralEvent::DebugLog { message } => {
                debug!(source, correlation, message = %message, "Debug log");
            }
        },
    }
}

fn log_at_level(level: tracing::Level, source: &str, correlation: &str, event: &dyn std::fmt::Debug) {
    match level {
        tracing::Level::ERROR => error!(source, correlation, event = ?event, "Application event"),
        tracing::Level::WARN => warn!(source, correlation, event = ?event, "Application event"),
        tracing::Level::INFO => info!(source, correlation, event = ?event, "Application event"),
        tracing::Level::DEBUG => debug!(source, correlation, event = ?event, "Application event"),
        tracing::Level::TRACE => trace!(source, correlation, event = ?event, "Application event"),
    }
}
