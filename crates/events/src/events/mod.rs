use serde::{Deserialize, Serialize};

use crate::EventSource;

pub mod build;
pub mod cache;
pub mod failure;
pub mod general;
pub mod resolver;

pub use build::*;
pub use cache::*;
pub use failure::FailureContext;
pub use general::*;
pub use resolver::*;

/// Every event kiln emits, tagged by the subsystem it came from
///
/// Serialized as `{"domain": "build", "event": {"type": "NodeStarted", ...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    General(GeneralEvent),
    Resolver(ResolverEvent),
    /// Scheduler and lifecycle executor
    Build(BuildEvent),
    Cache(CacheEvent),
}

impl AppEvent {
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::General(_) => EventSource::General,
            Self::Resolver(_) => EventSource::Resolver,
            Self::Build(_) => EventSource::Build,
            Self::Cache(_) => EventSource::Cache,
        }
    }

    /// Failures are errors, skips and retries are warnings, per-command chatter
    /// is debug and raw process output is trace
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::General(GeneralEvent::Error { .. })
            | Self::Build(BuildEvent::NodeFailed { .. })
            | Self::Resolver(ResolverEvent::ResolutionFailed { .. }) => Level::ERROR,

            Self::General(GeneralEvent::Warning { .. })
            | Self::Build(
                BuildEvent::NodeSkipped { .. }
                | BuildEvent::TestFailed { .. }
                | BuildEvent::SourceRetrying { .. },
            ) => Level::WARN,

            Self::General(GeneralEvent::DebugLog { .. })
            | Self::Build(
                BuildEvent::CommandStarted { .. }
                | BuildEvent::CommandCompleted { .. }
                | BuildEvent::PhaseStarted { .. }
                | BuildEvent::PhaseCompleted { .. }
                | BuildEvent::PhaseSkipped { .. },
            )
            | Self::Cache(CacheEvent::Miss { .. } | CacheEvent::WaitingForInFlight { .. }) => {
                Level::DEBUG
            }

            Self::Build(BuildEvent::CommandOutput { .. }) => Level::TRACE,

            _ => Level::INFO,
        }
    }

    /// `tracing` target, so `RUST_LOG=kiln::events::cache=debug` works
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self.event_source() {
            EventSource::General => "kiln::events::general",
            EventSource::Resolver => "kiln::events::resolver",
            EventSource::Build => "kiln::events::build",
            EventSource::Cache => "kiln::events::cache",
        }
    }
}
