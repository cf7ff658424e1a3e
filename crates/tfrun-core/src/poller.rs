use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tfrun_client::RunService;
use tfrun_types::{Run, RunPhase};

use crate::backoff::{backoff, sleep_or_cancel};
use crate::error::RunError;
use crate::event_bus::{EventBus, RunEvent};
use crate::queue::{org_queue_position, workspace_queue_position};
use crate::status::{PollOutcome, StatusSet};

pub const DEFAULT_POLL_BACKOFF_MIN_MS: u64 = 1_000;
pub const DEFAULT_POLL_BACKOFF_MAX_MS: u64 = 3_000;

/// Pacing for status polls, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollSettings {
    #[serde(default = "default_poll_min")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_poll_max")]
    pub backoff_max_ms: u64,
}

fn default_poll_min() -> u64 {
    DEFAULT_POLL_BACKOFF_MIN_MS
}

fn default_poll_max() -> u64 {
    DEFAULT_POLL_BACKOFF_MAX_MS
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            backoff_min_ms: DEFAULT_POLL_BACKOFF_MIN_MS,
            backoff_max_ms: DEFAULT_POLL_BACKOFF_MAX_MS,
        }
    }
}

/// Identifies the run being watched and where it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    pub run_id: String,
    pub workspace_id: String,
    pub workspace_name: String,
    pub organization: String,
}

#[derive(Clone)]
pub struct StatusPoller {
    service: Arc<dyn RunService>,
    events: EventBus,
    settings: PollSettings,
}

impl StatusPoller {
    pub fn new(service: Arc<dyn RunService>, events: EventBus, settings: PollSettings) -> Self {
        Self {
            service,
            events,
            settings,
        }
    }

    /// Poll `target` until its status leaves `pending`.
    ///
    /// Every iteration waits first, so even an already-terminal run costs one
    /// backoff interval. Read failures end the loop immediately. A cancellation
    /// names the run and phase that were being watched.
    pub async fn await_run(
        &self,
        target: &RunTarget,
        phase: RunPhase,
        pending: &StatusSet,
        terminal: &StatusSet,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, RunError> {
        self.poll_until_settled(target, phase, pending, terminal, cancel)
            .await
            .map_err(|err| err.during(&target.run_id, phase))
    }

    async fn poll_until_settled(
        &self,
        target: &RunTarget,
        phase: RunPhase,
        pending: &StatusSet,
        terminal: &StatusSet,
        cancel: &CancellationToken,
    ) -> Result<PollOutcome, RunError> {
        let mut iteration: u32 = 0;
        loop {
            let delay = backoff(
                self.settings.backoff_min_ms,
                self.settings.backoff_max_ms,
                iteration,
            );
            sleep_or_cancel(delay, cancel).await?;

            debug!("polling run {} ({phase}, iteration {iteration})", target.run_id);
            let run = self
                .service
                .read_run(&target.run_id)
                .await
                .map_err(RunError::service(format!("could not read run {}", target.run_id)))?;

            if terminal.contains(&run.status) {
                debug!("run {} reached {} status {}", run.id, terminal, run.status);
                return Ok(PollOutcome::Terminal(run));
            }
            if !pending.contains(&run.status) {
                debug!(
                    "run {} left {} with unclassified status {}",
                    run.id, pending, run.status
                );
                return Ok(PollOutcome::Unclassified(run));
            }

            self.report_pending(target, phase, pending, &run, cancel)
                .await?;
            iteration = iteration.saturating_add(1);
        }
    }

    async fn report_pending(
        &self,
        target: &RunTarget,
        phase: RunPhase,
        pending: &StatusSet,
        run: &Run,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        let workspace = self
            .service
            .read_workspace_by_id(&target.workspace_id)
            .await
            .map_err(RunError::service(format!(
                "could not read workspace {}",
                target.workspace_id
            )))?;

        if workspace.locked {
            if let Some(current_id) = workspace
                .current_run_id
                .as_deref()
                .filter(|id| *id != run.id)
            {
                let current = self
                    .service
                    .read_run(current_id)
                    .await
                    .map_err(RunError::service(format!("could not read run {current_id}")))?;
                if pending.contains(&current.status) {
                    info!(
                        "waiting for locked workspace {} to be unlocked (current run {})",
                        workspace.name, current.id
                    );
                    self.events.publish(RunEvent::WorkspaceLocked {
                        run_id: run.id.clone(),
                        workspace: workspace.name.clone(),
                        current_run_id: current.id,
                    });
                    return Ok(());
                }
            }
        }

        if workspace.current_run_id.as_deref() == Some(run.id.as_str()) {
            let position =
                org_queue_position(self.service.as_ref(), &target.organization, &run.id, cancel)
                    .await?;
            if position > 0 {
                let capacity = self
                    .service
                    .read_organization_capacity(&target.organization)
                    .await
                    .map_err(RunError::service(format!(
                        "could not read capacity of organization {}",
                        target.organization
                    )))?;
                let ahead = position.saturating_sub(capacity.running);
                info!("waiting for {ahead} queued run(s) before starting run {}", run.id);
                self.events.publish(RunEvent::QueuedInOrganization {
                    run_id: run.id.clone(),
                    organization: target.organization.clone(),
                    ahead,
                });
                return Ok(());
            }
        } else {
            let position = workspace_queue_position(
                self.service.as_ref(),
                &workspace.id,
                &run.id,
                workspace.current_run_id.as_deref(),
                phase.is_plan_side(),
                cancel,
            )
            .await?;
            if position > 0 {
                info!(
                    "waiting for {position} run(s) to finish in workspace {} before run {} is queued",
                    workspace.name, run.id
                );
                self.events.publish(RunEvent::QueuedInWorkspace {
                    run_id: run.id.clone(),
                    workspace: workspace.name.clone(),
                    ahead: position,
                });
                return Ok(());
            }
        }

        info!("waiting for run {}, status is {}", run.id, run.status);
        self.events.publish(RunEvent::Waiting {
            run_id: run.id.clone(),
            phase,
            status: run.status.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run, workspace, FakeRunService};
    use std::time::Duration;
    use tfrun_types::RunStatus;
    use tokio::sync::broadcast::Receiver;

    fn target(run_id: &str) -> RunTarget {
        RunTarget {
            run_id: run_id.to_string(),
            workspace_id: "ws-1".to_string(),
            workspace_name: "prod".to_string(),
            organization: "acme".to_string(),
        }
    }

    fn poller(service: Arc<FakeRunService>) -> (StatusPoller, Receiver<RunEvent>) {
        let events = EventBus::new();
        let rx = events.subscribe();
        (
            StatusPoller::new(service, events, PollSettings::default()),
            rx,
        )
    }

    fn drain(rx: &mut Receiver<RunEvent>) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn returns_terminal_run_after_pending_polls() {
        let service = Arc::new(FakeRunService::new());
        service.seed_run(
            "run-1",
            &[RunStatus::Pending, RunStatus::Planning, RunStatus::Planned],
        );
        let (poller, mut rx) = poller(service.clone());

        let outcome = poller
            .await_run(
                &target("run-1"),
                RunPhase::Plan,
                &StatusSet::PlanPending,
                &StatusSet::PlanTerminal,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Terminal(run("run-1", RunStatus::Planned)));
        assert_eq!(service.count_calls("read_run:run-1"), 3);
        let waiting = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, RunEvent::Waiting { .. }))
            .count();
        assert_eq!(waiting, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_status_is_returned_unclassified() {
        let service = Arc::new(FakeRunService::new());
        service.seed_run("run-1", &[RunStatus::Applying, RunStatus::Discarded]);
        let (poller, _rx) = poller(service.clone());

        let outcome = poller
            .await_run(
                &target("run-1"),
                RunPhase::Apply,
                &StatusSet::ApplyPending,
                &StatusSet::ApplyDone,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!outcome.is_terminal());
        assert_eq!(outcome.run().status, RunStatus::Discarded);
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_waits_one_minimum_interval() {
        let service = Arc::new(FakeRunService::new());
        service.seed_run("run-1", &[RunStatus::Applied]);
        let (poller, _rx) = poller(service.clone());

        let started = tokio::time::Instant::now();
        poller
            .await_run(
                &target("run-1"),
                RunPhase::Apply,
                &StatusSet::ApplyPending,
                &StatusSet::ApplyDone,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1_000));
        assert!(elapsed < Duration::from_millis(1_100));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_poll_makes_no_remote_calls() {
        let service = Arc::new(FakeRunService::new());
        service.seed_run("run-1", &[RunStatus::Planning]);
        let (poller, _rx) = poller(service.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = poller
            .await_run(
                &target("run-1"),
                RunPhase::Plan,
                &StatusSet::PlanPending,
                &StatusSet::PlanTerminal,
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Cancelled { .. }));
        assert!(service.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_loop_stops_within_one_interval() {
        let service = Arc::new(FakeRunService::new());
        service.seed_run("run-1", &[RunStatus::Planning]);
        let (poller, _rx) = poller(service.clone());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(4_500)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = poller
            .await_run(
                &target("run-1"),
                RunPhase::Plan,
                &StatusSet::PlanPending,
                &StatusSet::PlanTerminal,
                &cancel,
            )
            .await
            .unwrap_err();

        assert_eq!(err.run_id(), Some("run-1"));
        assert!(matches!(
            err,
            RunError::Cancelled {
                phase: Some(RunPhase::Plan),
                ..
            }
        ));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(4_500));
        assert!(elapsed < Duration::from_millis(4_982));
        let reads = service.count_calls("read_run:");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(service.count_calls("read_run:"), reads);
    }

    #[tokio::test(start_paused = true)]
    async fn locked_workspace_with_other_pending_run_is_reported() {
        let mut ws = workspace("ws-1", "prod");
        ws.locked = true;
        ws.current_run_id = Some("run-other".to_string());
        let service = Arc::new(
            FakeRunService::new()
                .with_workspace(ws)
                .with_other_run(run("run-other", RunStatus::Planning)),
        );
        service.seed_run("run-1", &[RunStatus::Pending, RunStatus::Planned]);
        let (poller, mut rx) = poller(service.clone());

        poller
            .await_run(
                &target("run-1"),
                RunPhase::Plan,
                &StatusSet::PlanPending,
                &StatusSet::PlanTerminal,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::WorkspaceLocked { current_run_id, .. } if current_run_id == "run-other"
        )));
        assert_eq!(service.count_calls("list_runs:"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn current_run_reports_org_queue_minus_running() {
        let mut ws = workspace("ws-1", "prod");
        ws.current_run_id = Some("run-1".to_string());
        let mut queued = run("run-1", RunStatus::PlanQueued);
        queued.position_in_queue = Some(5);
        let service = Arc::new(
            FakeRunService::new()
                .with_workspace(ws)
                .with_queue_pages(vec![vec![queued]])
                .with_capacity(0, 2),
        );
        service.seed_run("run-1", &[RunStatus::PlanQueued, RunStatus::Planned]);
        let (poller, mut rx) = poller(service.clone());

        poller
            .await_run(
                &target("run-1"),
                RunPhase::Plan,
                &StatusSet::PlanPending,
                &StatusSet::PlanTerminal,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::QueuedInOrganization { ahead: 3, .. })));
        assert_eq!(service.count_calls("read_capacity:acme"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_current_run_reports_workspace_queue() {
        let mut ws = workspace("ws-1", "prod");
        ws.current_run_id = Some("run-old".to_string());
        let service = Arc::new(
            FakeRunService::new()
                .with_workspace(ws)
                .with_workspace_pages(vec![vec![
                    run("run-1", RunStatus::Pending),
                    run("run-old", RunStatus::Applying),
                ]]),
        );
        service.seed_run("run-1", &[RunStatus::Pending, RunStatus::Planned]);
        let (poller, mut rx) = poller(service.clone());

        poller
            .await_run(
                &target("run-1"),
                RunPhase::Plan,
                &StatusSet::PlanPending,
                &StatusSet::PlanTerminal,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, RunEvent::QueuedInWorkspace { ahead: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn read_failure_is_fatal() {
        let service = Arc::new(FakeRunService::new());
        let (poller, _rx) = poller(service.clone());

        let err = poller
            .await_run(
                &target("run-unknown"),
                RunPhase::Plan,
                &StatusSet::PlanPending,
                &StatusSet::PlanTerminal,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Service { .. }));
        assert_eq!(service.count_calls("read_run:"), 1);
    }
}
