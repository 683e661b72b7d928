//! Event handling and progress display

use crate::logging::log_event_with_tracing;
use console::{style, Term};
use kiln_events::{AppEvent, BuildEvent, CacheEvent, EventMessage, GeneralEvent, ResolverEvent};

/// Renders progress lines on stderr while a command runs
pub struct EventHandler {
    term: Term,
    colors_enabled: bool,
    /// Show phase and command level events
    verbose: bool,
    /// Suppress all terminal output (JSON mode)
    quiet: bool,
}

impl EventHandler {
    pub fn new(colors_enabled: bool, verbose: bool, quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            colors_enabled,
            verbose,
            quiet,
        }
    }

    /// Handle incoming event
    pub fn handle_event(&mut self, message: EventMessage) {
        log_event_with_tracing(&message);
        if self.quiet {
            return;
        }
        if let Some(line) = self.format_event(&message.event) {
            self.term.write_line(&line).unwrap_or(());
        }
    }

    /// Terminal line for an event, `None` when it is not shown
    fn format_event(&self, event: &AppEvent) -> Option<String> {
        match event {
            AppEvent::Resolver(resolver_event) => match resolver_event {
                ResolverEvent::ResolutionStarted { roots, .. } => {
                    Some(format!("Resolving {}", roots.join(", ")))
                }
                ResolverEvent::OverrideApplied {
                    package,
                    version,
                    declared_by,
                } => Some(format!("Override {package}/{version} (declared by {declared_by})")),
                ResolverEvent::ResolutionCompleted {
                    nodes,
                    link_edges,
                    tool_edges,
                    ..
                } => Some(format!(
                    "Resolved {nodes} packages ({link_edges} link, {tool_edges} tool edges)"
                )),
                ResolverEvent::ResolutionFailed { failure } => {
                    Some(self.error(&format!("Resolution failed: {}", failure.message)))
                }
            },

            AppEvent::Build(build_event) => self.format_build_event(build_event),

            AppEvent::Cache(cache_event) => match cache_event {
                CacheEvent::Hit {
                    package,
                    fingerprint,
                } => Some(format!("{} {package} [{fingerprint}]", self.accent("cached"))),
                CacheEvent::WaitingForInFlight { package, .. } => {
                    Some(format!("Waiting for in-flight build of {package}"))
                }
                CacheEvent::Miss { package, fingerprint } if self.verbose => {
                    Some(format!("Cache miss for {package} [{fingerprint}]"))
                }
                CacheEvent::Published { package, path, .. } if self.verbose => {
                    Some(format!("Published {package} to {}", path.display()))
                }
                CacheEvent::Cleaned { removed } => Some(format!("Removed {removed} cache entries")),
                _ => None,
            },

            AppEvent::General(general_event) => match general_event {
                GeneralEvent::Warning { message, context } => Some(match context {
                    Some(context) => self.warning(&format!("{message}: {context}")),
                    None => self.warning(message),
                }),
                GeneralEvent::Error { message, details } => Some(match details {
                    Some(details) => self.error(&format!("{message}: {details}")),
                    None => self.error(message),
                }),
                GeneralEvent::DebugLog { message, .. } if self.verbose => Some(message.clone()),
                _ => None,
            },
        }
    }

    fn format_build_event(&self, event: &BuildEvent) -> Option<String> {
        match event {
            BuildEvent::RunStarted { nodes, jobs, .. } => {
                Some(format!("Building {nodes} packages with {jobs} jobs"))
            }
            BuildEvent::NodeStarted { package, context, .. } => {
                Some(format!("{} {package} ({context})", self.accent("start")))
            }
            BuildEvent::WaitingForTools { package, tools } => {
                Some(format!("{package} waiting for tools: {}", tools.join(", ")))
            }
            BuildEvent::SourceRetrying {
                package,
                attempt,
                max_attempts,
                reason,
            } => Some(self.warning(&format!(
                "{package}: source fetch attempt {attempt}/{max_attempts} failed, retrying ({reason})"
            ))),
            BuildEvent::NodeCompleted {
                package,
                duration_ms,
                ..
            } => Some(format!(
                "{} {package} in {}",
                self.success("built"),
                format_duration(*duration_ms)
            )),
            BuildEvent::NodeFailed {
                package,
                phase,
                failure,
            } => {
                let phase = phase.map_or_else(String::new, |phase| format!(" during {phase}"));
                Some(self.error(&format!("{package} failed{phase}: {}", failure.message)))
            }
            BuildEvent::NodeSkipped { package, root_cause } => Some(self.warning(&match root_cause {
                Some(cause) => format!("{package} skipped due to upstream failure of {cause}"),
                None => format!("{package} skipped"),
            })),
            BuildEvent::TestFailed { package, failure } => {
                Some(self.warning(&format!("{package} tests failed: {}", failure.message)))
            }
            BuildEvent::PhaseStarted { package, phase } if self.verbose => {
                Some(format!("  {package} > {phase}"))
            }
            BuildEvent::PhaseSkipped {
                package,
                phase,
                reason,
            } if self.verbose => Some(format!("  {package} > {phase} skipped ({reason})")),
            BuildEvent::CommandStarted { package, command, .. } if self.verbose => {
                Some(format!("  {package} $ {command}"))
            }
            BuildEvent::CommandOutput { package, line, .. } if self.verbose => {
                Some(format!("  {package} | {line}"))
            }
            _ => None,
        }
    }

    fn accent(&self, text: &str) -> String {
        if self.colors_enabled {
            style(text).cyan().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn success(&self, text: &str) -> String {
        if self.colors_enabled {
            style(text).green().bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn warning(&self, text: &str) -> String {
        if self.colors_enabled {
            style(format!("warning: {text}")).yellow().to_string()
        } else {
            format!("warning: {text}")
        }
    }

    fn error(&self, text: &str) -> String {
        if self.colors_enabled {
            style(format!("error: {text}")).red().to_string()
        } else {
            format!("error: {text}")
        }
    }
}

/// Human readable duration from milliseconds
pub fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{}.{}s", ms / 1_000, (ms % 1_000) / 100)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}
