//! Tool availability gate
//!
//! Tool requirements only have to exist once a node reaches `generate`, so a
//! node starts its lifecycle as soon as its link requirements are done and
//! parks here before the first tool-gated phase. While parked it gives its
//! worker slot back; otherwise a full pool of waiting nodes could starve
//! the very tools they wait for.

use crate::context::UpstreamPackage;
use kiln_config::acquire_semaphore_permit;
use kiln_errors::{BuildError, Error};
use kiln_events::{AppEvent, BuildEvent, EventEmitter, EventSender};
use kiln_resolver::NodeId;
use kiln_types::PackageRef;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Published state of a node that others use as a tool
#[derive(Debug, Clone)]
pub enum ToolState {
    Pending,
    Available(UpstreamPackage),
    /// The tool will never become available
    Failed { root_cause: String },
}

/// Blocks a node until every tool requirement is available
#[derive(Debug)]
pub struct ToolGate {
    package: PackageRef,
    tools: Vec<(NodeId, watch::Receiver<ToolState>)>,
    slot: Option<WorkerSlot>,
    cancel: CancellationToken,
    event_sender: Option<EventSender>,
}

#[derive(Debug)]
struct WorkerSlot {
    semaphore: Arc<Semaphore>,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl EventEmitter for ToolGate {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl ToolGate {
    #[must_use]
    pub fn new(
        package: PackageRef,
        tools: Vec<(NodeId, watch::Receiver<ToolState>)>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            package,
            tools,
            slot: None,
            cancel,
            event_sender: None,
        }
    }

    /// A gate for a node without tool requirements
    #[must_use]
    pub fn open(package: PackageRef) -> Self {
        Self::new(package, Vec::new(), CancellationToken::new())
    }

    /// Hold a worker permit that is released while waiting
    #[must_use]
    pub fn with_permit(mut self, semaphore: Arc<Semaphore>, permit: OwnedSemaphorePermit) -> Self {
        self.slot = Some(WorkerSlot {
            semaphore,
            permit: Mutex::new(Some(permit)),
        });
        self
    }

    #[must_use]
    pub fn with_event_sender(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    /// Root cause of the first tool already known to have failed
    #[must_use]
    pub fn failed_tool(&self) -> Option<String> {
        self.tools.iter().find_map(|(_, rx)| match &*rx.borrow() {
            ToolState::Failed { root_cause } => Some(root_cause.clone()),
            _ => None,
        })
    }

    fn ready_tools(&self) -> Option<Vec<UpstreamPackage>> {
        self.tools
            .iter()
            .map(|(_, rx)| match &*rx.borrow() {
                ToolState::Available(tool) => Some(tool.clone()),
                _ => None,
            })
            .collect()
    }

    /// Wait until every tool is available and return them in declaration order
    ///
    /// # Errors
    ///
    /// Returns `BuildError::UpstreamFailed` naming the root cause when a tool
    /// fails, and `Error::Cancelled` when the run is cancelled while waiting.
    pub async fn wait(&self) -> Result<Vec<UpstreamPackage>, Error> {
        if let Some(root_cause) = self.failed_tool() {
            return Err(self.upstream_failed(root_cause));
        }
        if let Some(tools) = self.ready_tools() {
            return Ok(tools);
        }

        self.emit(AppEvent::Build(BuildEvent::WaitingForTools {
            package: self.package.clone(),
            tools: self.tools.iter().map(|(id, _)| id.to_string()).collect(),
        }));
        self.release_slot().await;

        let mut available = Vec::with_capacity(self.tools.len());
        for (id, rx) in &self.tools {
            let mut rx = rx.clone();
            let state = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                state = rx.wait_for(|state| !matches!(state, ToolState::Pending)) => {
                    state.map(|state| state.clone()).map_err(|_| self.upstream_failed(id.to_string()))?
                }
            };
            match state {
                ToolState::Available(tool) => available.push(tool),
                ToolState::Failed { root_cause } => return Err(self.upstream_failed(root_cause)),
                ToolState::Pending => return Err(self.upstream_failed(id.to_string())),
            }
        }

        self.reacquire_slot().await?;
        Ok(available)
    }

    fn upstream_failed(&self, root_cause: String) -> Error {
        BuildError::UpstreamFailed {
            package: self.package.to_string(),
            dependency: root_cause,
        }
        .into()
    }

    async fn release_slot(&self) {
        if let Some(slot) = &self.slot {
            drop(slot.permit.lock().await.take());
        }
    }

    async fn reacquire_slot(&self) -> Result<(), Error> {
        let Some(slot) = &self.slot else {
            return Ok(());
        };
        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
            permit = acquire_semaphore_permit(Arc::clone(&slot.semaphore), "tool-gated phases") => permit?,
        };
        *slot.permit.lock().await = Some(permit);
        Ok(())
    }
}
