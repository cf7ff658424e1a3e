use std::path::PathBuf;

use thiserror::Error;
use tfrun_client::ServiceError;
use tfrun_types::{RunPhase, RunStatus};

#[derive(Error, Debug)]
pub enum RunError {
    /// Transport or lookup failure. Never retried at this layer.
    #[error("{context}: {source}")]
    Service {
        context: String,
        #[source]
        source: ServiceError,
    },

    #[error(
        "run {run_id} ended `{status}` during {phase} after {attempts} attempt(s), use the run ID {run_id} to debug the failure"
    )]
    RunFailed {
        run_id: String,
        phase: RunPhase,
        status: RunStatus,
        attempts: u32,
    },

    #[error("run {run_id} reached unexpected status `{status}` during {phase}")]
    UnexpectedStatus {
        run_id: String,
        phase: RunPhase,
        status: RunStatus,
    },

    /// The caller's token fired. When a run was being watched, it keeps going
    /// remotely and is named here.
    #[error("{}", cancelled_message(.run_id, .phase))]
    Cancelled {
        run_id: Option<String>,
        phase: Option<RunPhase>,
    },
}

fn cancelled_message(run_id: &Option<String>, phase: &Option<RunPhase>) -> String {
    match (run_id, phase) {
        (Some(run_id), Some(phase)) => format!(
            "cancelled while waiting on run {run_id} during {phase}, the run continues remotely"
        ),
        (Some(run_id), None) => {
            format!("cancelled while waiting on run {run_id}, the run continues remotely")
        }
        (None, _) => "run wait cancelled".to_string(),
    }
}

impl RunError {
    /// Adapter for `map_err` that attaches a human-readable context.
    pub fn service(context: impl Into<String>) -> impl FnOnce(ServiceError) -> RunError {
        let context = context.into();
        move |source| RunError::Service { context, source }
    }

    /// Cancellation before any run is known.
    pub fn cancelled() -> RunError {
        RunError::Cancelled {
            run_id: None,
            phase: None,
        }
    }

    /// Name the watched run on a cancellation that does not carry one yet.
    /// Other errors pass through unchanged.
    pub fn during(self, run_id: &str, phase: RunPhase) -> RunError {
        match self {
            RunError::Cancelled { run_id: None, .. } => RunError::Cancelled {
                run_id: Some(run_id.to_string()),
                phase: Some(phase),
            },
            other => other,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RunError::Service { .. } => "SERVICE_ERROR",
            RunError::RunFailed { .. } => "RUN_FAILED",
            RunError::UnexpectedStatus { .. } => "UNEXPECTED_STATUS",
            RunError::Cancelled { .. } => "CANCELLED",
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        match self {
            RunError::RunFailed { run_id, .. } | RunError::UnexpectedStatus { run_id, .. } => {
                Some(run_id)
            }
            RunError::Cancelled { run_id, .. } => run_id.as_deref(),
            RunError::Service { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read request file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse request: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid request: {0}")]
    Invalid(String),
}
