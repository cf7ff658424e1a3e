use serde::Serialize;
use tokio::sync::broadcast;

use tfrun_types::{RunPhase, RunStatus};

/// Progress notifications published while a run is driven.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunCreated {
        run_id: String,
        workspace: String,
        is_destroy: bool,
        attempt: u32,
    },
    PhaseStarted {
        run_id: String,
        phase: RunPhase,
    },
    Waiting {
        run_id: String,
        phase: RunPhase,
        status: RunStatus,
    },
    WorkspaceLocked {
        run_id: String,
        workspace: String,
        current_run_id: String,
    },
    QueuedInOrganization {
        run_id: String,
        organization: String,
        ahead: u32,
    },
    QueuedInWorkspace {
        run_id: String,
        workspace: String,
        ahead: u32,
    },
    ApplyConfirmed {
        run_id: String,
    },
    RetryScheduled {
        failed_run_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    Completed {
        run_id: String,
        status: RunStatus,
    },
    Failed {
        run_id: Option<String>,
        reason: String,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> Option<&str> {
        match self {
            RunEvent::RunCreated { run_id, .. }
            | RunEvent::PhaseStarted { run_id, .. }
            | RunEvent::Waiting { run_id, .. }
            | RunEvent::WorkspaceLocked { run_id, .. }
            | RunEvent::QueuedInOrganization { run_id, .. }
            | RunEvent::QueuedInWorkspace { run_id, .. }
            | RunEvent::ApplyConfirmed { run_id }
            | RunEvent::Completed { run_id, .. } => Some(run_id),
            RunEvent::RetryScheduled { failed_run_id, .. } => Some(failed_run_id),
            RunEvent::Failed { run_id, .. } => run_id.as_deref(),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: RunEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
