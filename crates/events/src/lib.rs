#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Event system for async communication in kiln
//!
//! Library crates never print. They report what they are doing through
//! events sent over an unbounded channel; the CLI decides how to render
//! them and forwards each one to `tracing` with structured fields.
//!
//! ## Architecture
//!
//! - **Domain-driven events**: grouped by functional domain (Build, Cache, Resolver)
//! - **Unified `EventEmitter` trait**: one API whether you hold a raw sender or a context
//! - **Metadata envelope**: every event travels with an [`EventMeta`]

pub mod meta;
pub use meta::{EventLevel, EventMeta, EventSource};

pub mod events;
pub use events::{
    AppEvent, BuildEvent, CacheEvent, FailureContext, GeneralEvent, ResolverEvent,
};

use kiln_types::{PackageRef, Phase};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Event plus the metadata captured when it was emitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub meta: EventMeta,
    pub event: AppEvent,
}

impl EventMessage {
    /// Wrap an event, deriving level and source from the event itself
    #[must_use]
    pub fn from_event(event: AppEvent) -> Self {
        let meta = EventMeta::new(event.log_level(), event.event_source());
        Self { meta, event }
    }

    /// Wrap an event and tag it with a correlation id (usually the package)
    #[must_use]
    pub fn correlated(event: AppEvent, correlation_id: impl Into<String>) -> Self {
        let mut message = Self::from_event(event);
        message.meta = message.meta.with_correlation_id(correlation_id);
        message
    }
}

/// Type alias for event sender
pub type EventSender = UnboundedSender<EventMessage>;

/// Type alias for event receiver
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<EventMessage>;

/// Create a new event channel
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// The unified trait for emitting events throughout kiln
///
/// This trait provides a single, consistent API for emitting events regardless of
/// whether you have a raw `EventSender` or a struct that contains one.
pub trait EventEmitter {
    /// Get the event sender for this emitter
    fn event_sender(&self) -> Option<&EventSender>;

    /// Correlation id attached to every emitted event
    fn correlation_id(&self) -> Option<String> {
        None
    }

    /// Emit an event through this emitter
    fn emit(&self, event: AppEvent) {
        if let Some(sender) = self.event_sender() {
            let message = match self.correlation_id() {
                Some(id) => EventMessage::correlated(event, id),
                None => EventMessage::from_event(event),
            };
            // Ignore send errors - if receiver is dropped, we just continue
            let _ = sender.send(message);
        }
    }

    /// Emit a debug log event
    fn emit_debug(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::debug(message)));
    }

    /// Emit a warning event
    fn emit_warning(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning(message, None)));
    }

    /// Emit a warning that carries the error which caused it
    fn emit_warning_with_context(&self, message: impl Into<String>, context: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::warning(
            message,
            Some(context.into()),
        )));
    }

    /// Emit an error event
    fn emit_error(&self, message: impl Into<String>) {
        self.emit(AppEvent::General(GeneralEvent::error(message)));
    }

    /// Emit a lifecycle phase started event
    fn emit_phase_started(&self, package: &PackageRef, phase: Phase) {
        self.emit(AppEvent::Build(BuildEvent::PhaseStarted {
            package: package.clone(),
            phase,
        }));
    }

    /// Emit a lifecycle phase completed event
    fn emit_phase_completed(&self, package: &PackageRef, phase: Phase, duration_ms: u64) {
        self.emit(AppEvent::Build(BuildEvent::PhaseCompleted {
            package: package.clone(),
            phase,
            duration_ms,
        }));
    }
}

/// Implementation of `EventEmitter` for the raw `EventSender`
/// This allows `EventSender` to be used directly where `EventEmitter` is expected
impl EventEmitter for EventSender {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(self)
    }
}
