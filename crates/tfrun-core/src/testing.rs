//! Scripted in-memory `RunService` for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tfrun_client::{Result, RunService, ServiceError};
use tfrun_types::{OrganizationCapacity, Page, Pagination, Run, RunStatus, Workspace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCall {
    pub workspace_id: String,
    pub is_destroy: bool,
    pub auto_apply: bool,
    pub message: String,
}

#[derive(Default)]
struct FakeState {
    workspace: Option<Workspace>,
    scripts: VecDeque<Vec<RunStatus>>,
    runs: HashMap<String, VecDeque<RunStatus>>,
    other_runs: HashMap<String, Run>,
    workspace_pages: Vec<Vec<Run>>,
    queue_pages: Vec<Vec<Run>>,
    capacity: OrganizationCapacity,
    fail_create: bool,
    created: Vec<CreateCall>,
    applied: Vec<String>,
    calls: Vec<String>,
}

/// Each `create_run` takes the next status script; reads of that run walk the
/// script and then keep returning its last entry.
pub struct FakeRunService {
    state: Mutex<FakeState>,
}

pub fn workspace(id: &str, name: &str) -> Workspace {
    Workspace {
        id: id.to_string(),
        name: name.to_string(),
        organization: Some("acme".to_string()),
        locked: false,
        current_run_id: None,
    }
}

pub fn run(id: &str, status: RunStatus) -> Run {
    Run::new(id, status)
}

impl FakeRunService {
    pub fn new() -> Self {
        let state = FakeState {
            workspace: Some(workspace("ws-1", "prod")),
            ..FakeState::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn with_script(self, statuses: &[RunStatus]) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .push_back(statuses.to_vec());
        self
    }

    pub fn with_workspace(self, workspace: Workspace) -> Self {
        self.state.lock().unwrap().workspace = Some(workspace);
        self
    }

    pub fn without_workspace(self) -> Self {
        self.state.lock().unwrap().workspace = None;
        self
    }

    pub fn with_other_run(self, run: Run) -> Self {
        self.state
            .lock()
            .unwrap()
            .other_runs
            .insert(run.id.clone(), run);
        self
    }

    pub fn with_workspace_pages(self, pages: Vec<Vec<Run>>) -> Self {
        self.state.lock().unwrap().workspace_pages = pages;
        self
    }

    pub fn with_queue_pages(self, pages: Vec<Vec<Run>>) -> Self {
        self.state.lock().unwrap().queue_pages = pages;
        self
    }

    pub fn with_capacity(self, pending: u32, running: u32) -> Self {
        self.state.lock().unwrap().capacity = OrganizationCapacity { pending, running };
        self
    }

    pub fn failing_create(self) -> Self {
        self.state.lock().unwrap().fail_create = true;
        self
    }

    /// Seed a run directly, as if it had been created earlier.
    pub fn seed_run(&self, run_id: &str, statuses: &[RunStatus]) {
        self.state
            .lock()
            .unwrap()
            .runs
            .insert(run_id.to_string(), statuses.iter().cloned().collect());
    }

    pub fn created(&self) -> Vec<CreateCall> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn applied(&self) -> Vec<String> {
        self.state.lock().unwrap().applied.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn page(pages: &[Vec<Run>], page: u32) -> Page<Run> {
        let total_pages = pages.len().max(1) as u32;
        let current_page = page.max(1);
        let items = pages
            .get(current_page as usize - 1)
            .cloned()
            .unwrap_or_default();
        let next_page = (current_page < total_pages).then_some(current_page + 1);
        Page {
            items,
            pagination: Pagination {
                current_page,
                total_pages,
                next_page,
                total_count: pages.iter().map(Vec::len).sum::<usize>() as u32,
            },
        }
    }
}

#[async_trait]
impl RunService for FakeRunService {
    async fn create_run(
        &self,
        workspace_id: &str,
        is_destroy: bool,
        auto_apply: bool,
        message: &str,
    ) -> Result<Run> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("create_run".to_string());
        if state.fail_create {
            return Err(ServiceError::Status {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        state.created.push(CreateCall {
            workspace_id: workspace_id.to_string(),
            is_destroy,
            auto_apply,
            message: message.to_string(),
        });
        let run_id = format!("run-{}", state.created.len());
        let script = state
            .scripts
            .pop_front()
            .unwrap_or_else(|| vec![RunStatus::Pending]);
        let first = script.first().cloned().unwrap_or(RunStatus::Pending);
        state.runs.insert(run_id.clone(), script.into_iter().collect());
        let mut created = Run::new(run_id, first);
        created.workspace_id = Some(workspace_id.to_string());
        created.is_destroy = is_destroy;
        created.auto_apply = auto_apply;
        created.message = Some(message.to_string());
        Ok(created)
    }

    async fn read_run(&self, run_id: &str) -> Result<Run> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("read_run:{run_id}"));
        if let Some(script) = state.runs.get_mut(run_id) {
            let status = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            let status =
                status.ok_or_else(|| ServiceError::NotFound(format!("run {run_id}")))?;
            return Ok(Run::new(run_id, status));
        }
        state
            .other_runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("run {run_id}")))
    }

    async fn apply_run(&self, run_id: &str, _comment: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("apply_run:{run_id}"));
        state.applied.push(run_id.to_string());
        Ok(())
    }

    async fn list_runs(&self, workspace_id: &str, page: u32) -> Result<Page<Run>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("list_runs:{workspace_id}:{page}"));
        Ok(Self::page(&state.workspace_pages, page))
    }

    async fn read_workspace(&self, organization: &str, name: &str) -> Result<Workspace> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("read_workspace:{organization}/{name}"));
        state
            .workspace
            .clone()
            .filter(|ws| ws.name == name)
            .ok_or_else(|| ServiceError::NotFound(format!("workspace {organization}/{name}")))
    }

    async fn read_workspace_by_id(&self, workspace_id: &str) -> Result<Workspace> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("read_workspace_by_id:{workspace_id}"));
        state
            .workspace
            .clone()
            .filter(|ws| ws.id == workspace_id)
            .ok_or_else(|| ServiceError::NotFound(format!("workspace {workspace_id}")))
    }

    async fn list_organization_run_queue(
        &self,
        organization: &str,
        page: u32,
    ) -> Result<Page<Run>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("list_queue:{organization}:{page}"));
        Ok(Self::page(&state.queue_pages, page))
    }

    async fn read_organization_capacity(
        &self,
        organization: &str,
    ) -> Result<OrganizationCapacity> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("read_capacity:{organization}"));
        Ok(state.capacity)
    }
}
