//! Queue position lookups used for progress reporting while a run is pending.
//!
//! Both searches walk the paginated listings from page 1 and stop on the last
//! page. A result of 0 means the run holds no blocking position.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use tfrun_client::RunService;

use crate::error::RunError;
use crate::status::is_queue_ignored;

/// Position the organization run queue assigns to `run_id`, or 0 when the run
/// is not queued at the organization level.
pub async fn org_queue_position(
    service: &dyn RunService,
    organization: &str,
    run_id: &str,
    cancel: &CancellationToken,
) -> Result<u32, RunError> {
    let mut page = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(RunError::cancelled());
        }
        let queue = service
            .list_organization_run_queue(organization, page)
            .await
            .map_err(RunError::service(format!(
                "could not read run queue of organization {organization}"
            )))?;

        if let Some(entry) = queue.items.iter().find(|entry| entry.id == run_id) {
            let position = entry.position_in_queue.unwrap_or(0);
            debug!("run {run_id} is at position {position} of the {organization} queue");
            return Ok(position);
        }

        match queue.next() {
            Some(next) if next > page => page = next,
            _ => return Ok(0),
        }
    }
}

/// Number of unfinished runs that must clear the workspace before `run_id`.
///
/// Workspace listings are newest first, so everything after the target is
/// ahead of it. Counting stops at the workspace's current run.
pub async fn workspace_queue_position(
    service: &dyn RunService,
    workspace_id: &str,
    run_id: &str,
    current_run_id: Option<&str>,
    plan_side: bool,
    cancel: &CancellationToken,
) -> Result<u32, RunError> {
    let mut position = 0;
    let mut found = false;
    let mut page = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(RunError::cancelled());
        }
        let runs = service
            .list_runs(workspace_id, page)
            .await
            .map_err(RunError::service(format!(
                "could not list runs of workspace {workspace_id}"
            )))?;

        for run in &runs.items {
            if !found {
                found = run.id == run_id;
                continue;
            }
            if is_queue_ignored(&run.status, plan_side) {
                continue;
            }
            position += 1;
            if current_run_id == Some(run.id.as_str()) {
                return Ok(position);
            }
        }

        match runs.next() {
            Some(next) if next > page => page = next,
            _ => return Ok(position),
        }
    }
}
