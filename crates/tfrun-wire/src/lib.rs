//! JSON:API documents exchanged with the control plane's `/api/v2` surface.
//!
//! Only the attributes the run driver reads are modelled; everything else in
//! the payloads is ignored on decode.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tfrun_types::{OrganizationCapacity, Page, Pagination, Run, RunStatus, Workspace};

pub const CONTENT_TYPE: &str = "application/vnd.api+json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document<T> {
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PaginationMeta {
    pub current_page: u32,
    pub total_pages: u32,
    #[serde(default)]
    pub next_page: Option<u32>,
    #[serde(default)]
    pub prev_page: Option<u32>,
    #[serde(default)]
    pub total_count: u32,
}

impl From<PaginationMeta> for Pagination {
    fn from(meta: PaginationMeta) -> Self {
        Pagination {
            current_page: meta.current_page,
            total_pages: meta.total_pages,
            next_page: meta.next_page,
            total_count: meta.total_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationshipData {
    One(ResourceIdentifier),
    Many(Vec<ResourceIdentifier>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RelationshipData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource<A> {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: A,
    #[serde(default)]
    pub relationships: HashMap<String, Relationship>,
}

impl<A> Resource<A> {
    /// Id of a to-one relationship, if present and non-null.
    pub fn related_id(&self, name: &str) -> Option<String> {
        match self.relationships.get(name)?.data.as_ref()? {
            RelationshipData::One(identifier) => Some(identifier.id.clone()),
            RelationshipData::Many(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunAttributes {
    pub status: String,
    #[serde(default)]
    pub is_destroy: bool,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub position_in_queue: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkspaceAttributes {
    pub name: String,
    #[serde(default)]
    pub locked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityAttributes {
    #[serde(default)]
    pub pending: u32,
    #[serde(default)]
    pub running: u32,
}

impl From<Resource<RunAttributes>> for Run {
    fn from(resource: Resource<RunAttributes>) -> Self {
        let workspace_id = resource.related_id("workspace");
        Run {
            id: resource.id,
            status: RunStatus::from(resource.attributes.status),
            workspace_id,
            is_destroy: resource.attributes.is_destroy,
            auto_apply: resource.attributes.auto_apply,
            message: resource.attributes.message,
            position_in_queue: resource.attributes.position_in_queue,
        }
    }
}

impl From<Resource<WorkspaceAttributes>> for Workspace {
    fn from(resource: Resource<WorkspaceAttributes>) -> Self {
        let organization = resource.related_id("organization");
        let current_run_id = resource.related_id("current-run");
        Workspace {
            id: resource.id,
            name: resource.attributes.name,
            organization,
            locked: resource.attributes.locked,
            current_run_id,
        }
    }
}

impl From<Resource<CapacityAttributes>> for OrganizationCapacity {
    fn from(resource: Resource<CapacityAttributes>) -> Self {
        OrganizationCapacity {
            pending: resource.attributes.pending,
            running: resource.attributes.running,
        }
    }
}

pub type RunDocument = Document<Resource<RunAttributes>>;
pub type RunListDocument = Document<Vec<Resource<RunAttributes>>>;
pub type WorkspaceDocument = Document<Resource<WorkspaceAttributes>>;
pub type CapacityDocument = Document<Resource<CapacityAttributes>>;

/// Convert a list document into a page, treating a missing pagination block as
/// a single page.
pub fn into_page<A, T>(document: Document<Vec<Resource<A>>>) -> Page<T>
where
    T: From<Resource<A>>,
{
    let pagination = document
        .meta
        .and_then(|meta| meta.pagination)
        .map(Pagination::from)
        .unwrap_or_else(Pagination::single);
    Page {
        items: document.data.into_iter().map(T::from).collect(),
        pagination,
    }
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunCreateAttributes {
    pub is_destroy: bool,
    pub auto_apply: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCreateRelationships {
    pub workspace: Relationship,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCreateData {
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: RunCreateAttributes,
    pub relationships: RunCreateRelationships,
}

pub type RunCreateDocument = Document<RunCreateData>;

pub fn run_create_document(
    workspace_id: &str,
    is_destroy: bool,
    auto_apply: bool,
    message: &str,
) -> RunCreateDocument {
    Document {
        data: RunCreateData {
            kind: "runs".to_string(),
            attributes: RunCreateAttributes {
                is_destroy,
                auto_apply,
                message: message.to_string(),
            },
            relationships: RunCreateRelationships {
                workspace: Relationship {
                    data: Some(RelationshipData::One(ResourceIdentifier {
                        kind: "workspaces".to_string(),
                        id: workspace_id.to_string(),
                    })),
                },
            },
        },
        meta: None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub comment: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDocument {
    #[serde(default)]
    pub errors: Vec<ErrorObject>,
}

impl ErrorDocument {
    /// Joined `title: detail` lines, or `None` when the body carried nothing usable.
    pub fn summary(&self) -> Option<String> {
        let parts = self
            .errors
            .iter()
            .filter_map(|err| match (&err.title, &err.detail) {
                (Some(title), Some(detail)) => Some(format!("{title}: {detail}")),
                (Some(title), None) => Some(title.clone()),
                (None, Some(detail)) => Some(detail.clone()),
                (None, None) => None,
            })
            .collect::<Vec<_>>();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}
