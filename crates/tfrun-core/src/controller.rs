use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use tfrun_client::RunService;
use tfrun_observability::{emit_event, ObservabilityEvent};
use tfrun_types::{Run, RunPhase, RunStatus};

use crate::backoff::sleep_or_cancel;
use crate::error::RunError;
use crate::event_bus::{EventBus, RunEvent};
use crate::poller::{RunTarget, StatusPoller};
use crate::request::{RunOptions, RunRequest};
use crate::status::{PollOutcome, StatusSet};

pub const APPLY_COMMENT: &str = "Run confirmed by tfrun";

const COMPONENT: &str = "run.controller";

pub fn default_run_message(workspace: &str) -> String {
    format!("Triggered by tfrun on {workspace}")
}

/// How a single attempt ended when it did not end in an error.
enum Attempt {
    Finished(String),
    Failed {
        run: Run,
        phase: RunPhase,
    },
}

/// Drives a workspace run from creation to a final status, retrying failed
/// runs with a fresh run each time.
#[derive(Clone)]
pub struct RunController {
    service: Arc<dyn RunService>,
    events: EventBus,
}

impl RunController {
    pub fn new(service: Arc<dyn RunService>) -> Self {
        Self::with_events(service, EventBus::new())
    }

    pub fn with_events(service: Arc<dyn RunService>, events: EventBus) -> Self {
        Self { service, events }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run the apply (or destroy) block of `request`.
    ///
    /// Returns `Ok(None)` without touching the service when the selected block
    /// is absent. Otherwise returns the id of the run that finished, or of the
    /// run just created when `wait_for_run` is off.
    pub async fn execute_run(
        &self,
        request: &RunRequest,
        is_destroy: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, RunError> {
        self.execute_run_from(request, is_destroy, 0, cancel).await
    }

    /// Same as [`execute_run`](Self::execute_run) with the attempt counter
    /// starting at `attempt`. A non-zero start waits one retry interval first.
    pub async fn execute_run_from(
        &self,
        request: &RunRequest,
        is_destroy: bool,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, RunError> {
        let Some(options) = request.options(is_destroy) else {
            info!(
                "no {} block configured for workspace {}, nothing to do",
                kind(is_destroy),
                request.workspace
            );
            return Ok(None);
        };

        match self
            .retry_loop(request, options, is_destroy, attempt, cancel)
            .await
        {
            Ok(run_id) => Ok(Some(run_id)),
            Err(err) => {
                self.report_failure(request, &err);
                Err(err)
            }
        }
    }

    async fn retry_loop(
        &self,
        request: &RunRequest,
        options: &RunOptions,
        is_destroy: bool,
        mut attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<String, RunError> {
        loop {
            if attempt > 0 {
                sleep_or_cancel(options.retry_delay(attempt), cancel).await?;
            }

            let (run, phase) = match self
                .drive_attempt(request, options, is_destroy, attempt, cancel)
                .await?
            {
                Attempt::Finished(run_id) => return Ok(run_id),
                Attempt::Failed { run, phase } => (run, phase),
            };

            if !options.retry || attempt >= options.retry_attempts {
                return Err(RunError::RunFailed {
                    run_id: run.id,
                    phase,
                    status: run.status,
                    attempts: attempt + 1,
                });
            }

            attempt += 1;
            let delay = options.retry_delay(attempt);
            warn!(
                "run {} ended {} during {phase}, retrying ({attempt}/{}) in {}ms",
                run.id,
                run.status,
                options.retry_attempts,
                delay.as_millis()
            );
            emit_event(
                Level::WARN,
                ObservabilityEvent {
                    event: "run.retry",
                    component: COMPONENT,
                    run_id: Some(&run.id),
                    workspace: Some(&request.workspace),
                    organization: Some(&request.organization),
                    phase: Some(phase.as_str()),
                    status: Some(run.status.as_str()),
                    attempt: Some(attempt),
                    ..ObservabilityEvent::default()
                },
            );
            self.events.publish(RunEvent::RetryScheduled {
                failed_run_id: run.id,
                attempt,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            });
        }
    }

    async fn drive_attempt(
        &self,
        request: &RunRequest,
        options: &RunOptions,
        is_destroy: bool,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<Attempt, RunError> {
        let workspace = self
            .service
            .read_workspace(&request.organization, &request.workspace)
            .await
            .map_err(RunError::service(format!(
                "could not read workspace {}/{}",
                request.organization, request.workspace
            )))?;

        let message = options
            .message
            .clone()
            .unwrap_or_else(|| default_run_message(&request.workspace));
        let run = self
            .service
            .create_run(&workspace.id, is_destroy, !options.wait_for_run, &message)
            .await
            .map_err(RunError::service(format!(
                "could not create {} run in workspace {}",
                kind(is_destroy),
                workspace.name
            )))?;

        info!(
            "created {} run {} in workspace {} (attempt {})",
            kind(is_destroy),
            run.id,
            workspace.name,
            attempt + 1
        );
        emit_event(
            Level::INFO,
            ObservabilityEvent {
                event: "run.created",
                component: COMPONENT,
                run_id: Some(&run.id),
                workspace: Some(&workspace.name),
                organization: Some(&request.organization),
                status: Some(run.status.as_str()),
                attempt: Some(attempt),
                detail: Some(kind(is_destroy)),
                ..ObservabilityEvent::default()
            },
        );
        self.events.publish(RunEvent::RunCreated {
            run_id: run.id.clone(),
            workspace: workspace.name.clone(),
            is_destroy,
            attempt,
        });

        if !options.wait_for_run {
            return Ok(Attempt::Finished(run.id));
        }

        let target = RunTarget {
            run_id: run.id,
            organization: workspace
                .organization
                .unwrap_or_else(|| request.organization.clone()),
            workspace_id: workspace.id,
            workspace_name: workspace.name,
        };
        let poller = StatusPoller::new(self.service.clone(), self.events.clone(), request.polling);

        self.phase_started(&target, RunPhase::Plan);
        let mut run = match poller
            .await_run(
                &target,
                RunPhase::Plan,
                &StatusSet::PlanPending,
                &StatusSet::PlanTerminal,
                cancel,
            )
            .await?
        {
            PollOutcome::Terminal(run) => run,
            PollOutcome::Unclassified(run) if confirmed_elsewhere(&run.status) => {
                info!("run {} was confirmed outside tfrun ({})", run.id, run.status);
                return self.await_apply(&poller, &target, cancel).await;
            }
            PollOutcome::Unclassified(run) => return Err(unexpected(RunPhase::Plan, run)),
        };

        match run.status {
            RunStatus::Errored | RunStatus::PolicySoftFailed => {
                return Ok(Attempt::Failed {
                    run,
                    phase: RunPhase::Plan,
                })
            }
            RunStatus::PlannedAndFinished => {
                info!("run {} finished planning with nothing to apply", run.id);
                self.completed(&target, &run);
                return Ok(Attempt::Finished(run.id));
            }
            RunStatus::PolicyOverride => {
                info!("run {} needs a policy override", run.id);
                self.phase_started(&target, RunPhase::PolicyOverride);
                run = match poller
                    .await_run(
                        &target,
                        RunPhase::PolicyOverride,
                        &StatusSet::Only(RunStatus::PolicyOverride),
                        &StatusSet::ConfirmationDone,
                        cancel,
                    )
                    .await?
                {
                    PollOutcome::Terminal(run) => run,
                    PollOutcome::Unclassified(run) if run.status == RunStatus::PolicyChecked => run,
                    PollOutcome::Unclassified(run) if run.status == RunStatus::Applied => {
                        return self.await_apply(&poller, &target, cancel).await;
                    }
                    PollOutcome::Unclassified(run) => {
                        return Err(unexpected(RunPhase::PolicyOverride, run))
                    }
                };
            }
            _ => {}
        }

        if StatusSet::ConfirmationDone.contains(&run.status) {
            info!("run {} is already confirmed ({})", run.id, run.status);
        } else if options.manual_confirm {
            info!("waiting for run {} to be confirmed manually", run.id);
            self.phase_started(&target, RunPhase::Confirmation);
            match poller
                .await_run(
                    &target,
                    RunPhase::Confirmation,
                    &StatusSet::Only(run.status.clone()),
                    &StatusSet::ConfirmationDone,
                    cancel,
                )
                .await?
            {
                PollOutcome::Terminal(_) => {}
                PollOutcome::Unclassified(run) if run.status == RunStatus::Applied => {}
                PollOutcome::Unclassified(run) => {
                    return Err(unexpected(RunPhase::Confirmation, run))
                }
            }
        } else {
            self.service
                .apply_run(&run.id, APPLY_COMMENT)
                .await
                .map_err(RunError::service(format!("could not apply run {}", run.id)))?;
            info!("confirmed run {}", run.id);
            self.events.publish(RunEvent::ApplyConfirmed {
                run_id: run.id.clone(),
            });
        }

        self.await_apply(&poller, &target, cancel).await
    }

    async fn await_apply(
        &self,
        poller: &StatusPoller,
        target: &RunTarget,
        cancel: &CancellationToken,
    ) -> Result<Attempt, RunError> {
        self.phase_started(target, RunPhase::Apply);
        match poller
            .await_run(
                target,
                RunPhase::Apply,
                &StatusSet::ApplyPending,
                &StatusSet::ApplyDone,
                cancel,
            )
            .await?
        {
            PollOutcome::Terminal(run) if run.status == RunStatus::Applied => {
                self.completed(target, &run);
                Ok(Attempt::Finished(run.id))
            }
            PollOutcome::Terminal(run) => Ok(Attempt::Failed {
                run,
                phase: RunPhase::Apply,
            }),
            PollOutcome::Unclassified(run) => Err(unexpected(RunPhase::Apply, run)),
        }
    }

    fn phase_started(&self, target: &RunTarget, phase: RunPhase) {
        info!("run {}: {phase} phase started", target.run_id);
        emit_event(
            Level::INFO,
            ObservabilityEvent {
                event: "run.phase",
                component: COMPONENT,
                run_id: Some(&target.run_id),
                workspace: Some(&target.workspace_name),
                organization: Some(&target.organization),
                phase: Some(phase.as_str()),
                ..ObservabilityEvent::default()
            },
        );
        self.events.publish(RunEvent::PhaseStarted {
            run_id: target.run_id.clone(),
            phase,
        });
    }

    fn completed(&self, target: &RunTarget, run: &Run) {
        info!("run {} completed with status {}", run.id, run.status);
        emit_event(
            Level::INFO,
            ObservabilityEvent {
                event: "run.completed",
                component: COMPONENT,
                run_id: Some(&run.id),
                workspace: Some(&target.workspace_name),
                organization: Some(&target.organization),
                status: Some(run.status.as_str()),
                ..ObservabilityEvent::default()
            },
        );
        self.events.publish(RunEvent::Completed {
            run_id: run.id.clone(),
            status: run.status.clone(),
        });
    }

    fn report_failure(&self, request: &RunRequest, err: &RunError) {
        let reason = err.to_string();
        let (phase, status) = match err {
            RunError::RunFailed { phase, status, .. }
            | RunError::UnexpectedStatus { phase, status, .. } => {
                (Some(phase.as_str()), Some(status.as_str()))
            }
            RunError::Cancelled { phase, .. } => (phase.map(RunPhase::as_str), None),
            RunError::Service { .. } => (None, None),
        };
        warn!("{reason}");
        emit_event(
            Level::WARN,
            ObservabilityEvent {
                event: "run.failed",
                component: COMPONENT,
                run_id: err.run_id(),
                workspace: Some(&request.workspace),
                organization: Some(&request.organization),
                phase,
                status,
                error_code: Some(err.code()),
                detail: Some(&reason),
                ..ObservabilityEvent::default()
            },
        );
        self.events.publish(RunEvent::Failed {
            run_id: err.run_id().map(str::to_string),
            reason,
        });
    }
}

fn kind(is_destroy: bool) -> &'static str {
    if is_destroy {
        "destroy"
    } else {
        "apply"
    }
}

/// A status outside the plan tables that shows someone already confirmed (or
/// finished) the run.
fn confirmed_elsewhere(status: &RunStatus) -> bool {
    StatusSet::ConfirmationDone.contains(status) || *status == RunStatus::Applied
}

fn unexpected(phase: RunPhase, run: Run) -> RunError {
    RunError::UnexpectedStatus {
        run_id: run.id,
        phase,
        status: run.status,
    }
}
