use async_trait::async_trait;
use tfrun_types::{OrganizationCapacity, Page, Run, Workspace};

use crate::error::Result;

/// The control-plane operations the run driver consumes.
///
/// Every call is an independent network request; implementations hold no
/// per-run state so one instance can serve any number of concurrent drives.
/// Page numbers start at 1.
#[async_trait]
pub trait RunService: Send + Sync {
    async fn create_run(
        &self,
        workspace_id: &str,
        is_destroy: bool,
        auto_apply: bool,
        message: &str,
    ) -> Result<Run>;

    async fn read_run(&self, run_id: &str) -> Result<Run>;

    async fn apply_run(&self, run_id: &str, comment: &str) -> Result<()>;

    async fn list_runs(&self, workspace_id: &str, page: u32) -> Result<Page<Run>>;

    async fn read_workspace(&self, organization: &str, name: &str) -> Result<Workspace>;

    async fn read_workspace_by_id(&self, workspace_id: &str) -> Result<Workspace>;

    async fn list_organization_run_queue(&self, organization: &str, page: u32)
        -> Result<Page<Run>>;

    async fn read_organization_capacity(&self, organization: &str)
        -> Result<OrganizationCapacity>;
}
