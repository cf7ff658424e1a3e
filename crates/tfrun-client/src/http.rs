use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use tfrun_types::{OrganizationCapacity, Page, Run, Workspace};
use tfrun_wire::{
    into_page, run_create_document, ApplyRequest, CapacityDocument, ErrorDocument,
    RunDocument, RunListDocument, WorkspaceDocument,
};

use crate::config::ClientConfig;
use crate::error::{Result, ServiceError};
use crate::service::RunService;

const USER_AGENT: &str = concat!("tfrun/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 320;

/// `RunService` over the control plane's JSON:API.
#[derive(Clone)]
pub struct TfeClient {
    base_url: Url,
    token: String,
    client: Client,
}

impl TfeClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.ssl_skip_verify)
            .user_agent(USER_AGENT)
            .build()?;
        Self::with_client(&config.base_url(), &config.token, client)
    }

    pub fn with_base_url(base_url: &str, token: &str) -> Result<Self> {
        Self::with_client(base_url, token, Client::new())
    }

    fn with_client(base_url: &str, token: &str, client: Client) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ServiceError::InvalidConfig(format!("base url `{base_url}`: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ServiceError::InvalidConfig(format!(
                "base url `{base_url}` cannot carry a path"
            )));
        }
        Ok(Self {
            base_url,
            token: token.to_string(),
            client,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ServiceError::InvalidConfig(format!("base url `{}`", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.bearer_auth(&self.token)
            .header(ACCEPT, HeaderValue::from_static(tfrun_wire::CONTENT_TYPE))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, what: &str) -> Result<T> {
        debug!("GET {url}");
        let resp = self.authorize(self.client.get(url)).send().await?;
        decode(resp, what).await
    }

    async fn post<B: Serialize>(&self, url: Url, body: &B) -> Result<Response> {
        debug!("POST {url}");
        let payload = serde_json::to_vec(body)?;
        let resp = self
            .authorize(self.client.post(url))
            .header(CONTENT_TYPE, HeaderValue::from_static(tfrun_wire::CONTENT_TYPE))
            .body(payload)
            .send()
            .await?;
        Ok(resp)
    }

    fn paged(&self, segments: &[&str], page: u32) -> Result<Url> {
        let mut url = self.endpoint(segments)?;
        url.query_pairs_mut()
            .append_pair("page[number]", &page.max(1).to_string());
        Ok(url)
    }
}

async fn decode<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ServiceError::NotFound(what.to_string()));
    }
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    Ok(serde_json::from_str(&body)?)
}

async fn expect_success(resp: Response, what: &str) -> Result<()> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ServiceError::NotFound(what.to_string()));
    }
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> ServiceError {
    let body = serde_json::from_str::<ErrorDocument>(body)
        .ok()
        .and_then(|doc| doc.summary())
        .unwrap_or_else(|| {
            if body.chars().count() > MAX_ERROR_BODY {
                let truncated: String = body.chars().take(MAX_ERROR_BODY).collect();
                format!("{truncated}...")
            } else {
                body.to_string()
            }
        });
    ServiceError::Status {
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl RunService for TfeClient {
    async fn create_run(
        &self,
        workspace_id: &str,
        is_destroy: bool,
        auto_apply: bool,
        message: &str,
    ) -> Result<Run> {
        let url = self.endpoint(&["runs"])?;
        let body = run_create_document(workspace_id, is_destroy, auto_apply, message);
        let resp = self.post(url, &body).await?;
        let doc: RunDocument = decode(resp, &format!("workspace {workspace_id}")).await?;
        Ok(Run::from(doc.data))
    }

    async fn read_run(&self, run_id: &str) -> Result<Run> {
        let url = self.endpoint(&["runs", run_id])?;
        let doc: RunDocument = self.get(url, &format!("run {run_id}")).await?;
        Ok(Run::from(doc.data))
    }

    async fn apply_run(&self, run_id: &str, comment: &str) -> Result<()> {
        let url = self.endpoint(&["runs", run_id, "actions", "apply"])?;
        let body = ApplyRequest {
            comment: comment.to_string(),
        };
        let resp = self.post(url, &body).await?;
        expect_success(resp, &format!("run {run_id}")).await
    }

    async fn list_runs(&self, workspace_id: &str, page: u32) -> Result<Page<Run>> {
        let url = self.paged(&["workspaces", workspace_id, "runs"], page)?;
        let doc: RunListDocument = self
            .get(url, &format!("runs of workspace {workspace_id}"))
            .await?;
        Ok(into_page(doc))
    }

    async fn read_workspace(&self, organization: &str, name: &str) -> Result<Workspace> {
        let url = self.endpoint(&["organizations", organization, "workspaces", name])?;
        let doc: WorkspaceDocument = self
            .get(url, &format!("workspace {organization}/{name}"))
            .await?;
        Ok(Workspace::from(doc.data))
    }

    async fn read_workspace_by_id(&self, workspace_id: &str) -> Result<Workspace> {
        let url = self.endpoint(&["workspaces", workspace_id])?;
        let doc: WorkspaceDocument = self
            .get(url, &format!("workspace {workspace_id}"))
            .await?;
        Ok(Workspace::from(doc.data))
    }

    async fn list_organization_run_queue(
        &self,
        organization: &str,
        page: u32,
    ) -> Result<Page<Run>> {
        let url = self.paged(&["organizations", organization, "runs", "queue"], page)?;
        let doc: RunListDocument = self
            .get(url, &format!("run queue of organization {organization}"))
            .await?;
        Ok(into_page(doc))
    }

    async fn read_organization_capacity(
        &self,
        organization: &str,
    ) -> Result<OrganizationCapacity> {
        let url = self.endpoint(&["organizations", organization, "capacity"])?;
        let doc: CapacityDocument = self
            .get(url, &format!("capacity of organization {organization}"))
            .await?;
        Ok(OrganizationCapacity::from(doc.data))
    }
}
