use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status reported by the control plane for a run.
///
/// The wire value is the snake_case string; anything this client does not
/// know about is kept verbatim in [`RunStatus::Other`] so it can be reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Pending,
    PlanQueued,
    Planning,
    CostEstimating,
    PolicyChecking,
    Queuing,
    Fetching,
    Planned,
    PlannedAndFinished,
    Errored,
    CostEstimated,
    PolicyChecked,
    PolicySoftFailed,
    PolicyOverride,
    Confirmed,
    ApplyQueued,
    Applying,
    Applied,
    Canceled,
    Discarded,
    Other(String),
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::PlanQueued => "plan_queued",
            RunStatus::Planning => "planning",
            RunStatus::CostEstimating => "cost_estimating",
            RunStatus::PolicyChecking => "policy_checking",
            RunStatus::Queuing => "queuing",
            RunStatus::Fetching => "fetching",
            RunStatus::Planned => "planned",
            RunStatus::PlannedAndFinished => "planned_and_finished",
            RunStatus::Errored => "errored",
            RunStatus::CostEstimated => "cost_estimated",
            RunStatus::PolicyChecked => "policy_checked",
            RunStatus::PolicySoftFailed => "policy_soft_failed",
            RunStatus::PolicyOverride => "policy_override",
            RunStatus::Confirmed => "confirmed",
            RunStatus::ApplyQueued => "apply_queued",
            RunStatus::Applying => "applying",
            RunStatus::Applied => "applied",
            RunStatus::Canceled => "canceled",
            RunStatus::Discarded => "discarded",
            RunStatus::Other(raw) => raw.as_str(),
        }
    }
}

impl From<&str> for RunStatus {
    fn from(raw: &str) -> Self {
        match raw.trim() {
            "pending" => RunStatus::Pending,
            "plan_queued" => RunStatus::PlanQueued,
            "planning" => RunStatus::Planning,
            "cost_estimating" => RunStatus::CostEstimating,
            "policy_checking" => RunStatus::PolicyChecking,
            "queuing" => RunStatus::Queuing,
            "fetching" => RunStatus::Fetching,
            "planned" => RunStatus::Planned,
            "planned_and_finished" => RunStatus::PlannedAndFinished,
            "errored" => RunStatus::Errored,
            "cost_estimated" => RunStatus::CostEstimated,
            "policy_checked" => RunStatus::PolicyChecked,
            "policy_soft_failed" => RunStatus::PolicySoftFailed,
            "policy_override" => RunStatus::PolicyOverride,
            "confirmed" => RunStatus::Confirmed,
            "apply_queued" => RunStatus::ApplyQueued,
            "applying" => RunStatus::Applying,
            "applied" => RunStatus::Applied,
            "canceled" => RunStatus::Canceled,
            "discarded" => RunStatus::Discarded,
            other => RunStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for RunStatus {
    fn from(raw: String) -> Self {
        RunStatus::from(raw.as_str())
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which part of the lifecycle a wait belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Plan,
    PolicyOverride,
    Confirmation,
    Apply,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Plan => "plan",
            RunPhase::PolicyOverride => "policy_override",
            RunPhase::Confirmation => "confirmation",
            RunPhase::Apply => "apply",
        }
    }

    /// Every wait before the apply phase counts as plan-side for queue math.
    pub fn is_plan_side(self) -> bool {
        !matches!(self, RunPhase::Apply)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a remote run. The client never mutates one locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub is_destroy: bool,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Only populated on organization run queue entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_in_queue: Option<u32>,
}

impl Run {
    pub fn new(id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            id: id.into(),
            status,
            workspace_id: None,
            is_destroy: false,
            auto_apply: false,
            message: None,
            position_in_queue: None,
        }
    }
}
