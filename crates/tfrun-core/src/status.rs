//! Fixed status tables used to classify what the poller observes.

use std::fmt;

use tfrun_types::{Run, RunStatus};

/// Named, immutable sets of run statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusSet {
    PlanPending,
    PlanTerminal,
    ApplyPending,
    ApplyDone,
    ConfirmationDone,
    /// A single status, used when waiting for a run to leave where it is.
    Only(RunStatus),
}

#[derive(Debug, Clone, Copy, Default)]
struct Membership {
    plan_pending: bool,
    plan_terminal: bool,
    apply_in_flight: bool,
    apply_done: bool,
}

fn membership(status: &RunStatus) -> Membership {
    match status {
        RunStatus::Pending
        | RunStatus::PlanQueued
        | RunStatus::Planning
        | RunStatus::CostEstimating
        | RunStatus::PolicyChecking
        | RunStatus::Queuing
        | RunStatus::Fetching => Membership {
            plan_pending: true,
            ..Membership::default()
        },
        RunStatus::Planned
        | RunStatus::PlannedAndFinished
        | RunStatus::CostEstimated
        | RunStatus::PolicyChecked
        | RunStatus::PolicySoftFailed
        | RunStatus::PolicyOverride => Membership {
            plan_terminal: true,
            ..Membership::default()
        },
        RunStatus::Errored => Membership {
            plan_terminal: true,
            apply_done: true,
            ..Membership::default()
        },
        RunStatus::Confirmed | RunStatus::ApplyQueued | RunStatus::Applying => Membership {
            apply_in_flight: true,
            ..Membership::default()
        },
        RunStatus::Applied => Membership {
            apply_done: true,
            ..Membership::default()
        },
        RunStatus::Canceled | RunStatus::Discarded | RunStatus::Other(_) => Membership::default(),
    }
}

impl StatusSet {
    pub fn contains(&self, status: &RunStatus) -> bool {
        let member = membership(status);
        match self {
            StatusSet::PlanPending => member.plan_pending,
            StatusSet::PlanTerminal => member.plan_terminal,
            StatusSet::ApplyPending | StatusSet::ConfirmationDone => member.apply_in_flight,
            StatusSet::ApplyDone => member.apply_done,
            StatusSet::Only(only) => only == status,
        }
    }

    pub fn name(&self) -> String {
        match self {
            StatusSet::PlanPending => "plan_pending".to_string(),
            StatusSet::PlanTerminal => "plan_terminal".to_string(),
            StatusSet::ApplyPending => "apply_pending".to_string(),
            StatusSet::ApplyDone => "apply_done".to_string(),
            StatusSet::ConfirmationDone => "confirmation_done".to_string(),
            StatusSet::Only(status) => format!("only({status})"),
        }
    }
}

impl fmt::Display for StatusSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Finished runs that never hold a place in a workspace queue. A `planned` run
/// only stops blocking plan-side waits.
pub fn is_queue_ignored(status: &RunStatus, plan_side: bool) -> bool {
    match status {
        RunStatus::Applied
        | RunStatus::Canceled
        | RunStatus::Discarded
        | RunStatus::Errored
        | RunStatus::PlannedAndFinished => true,
        RunStatus::Planned => plan_side,
        _ => false,
    }
}

/// What a polling loop ended on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The status was in the phase's terminal set.
    Terminal(Run),
    /// The status was in neither set; the caller decides what it means.
    Unclassified(Run),
}

impl PollOutcome {
    pub fn run(&self) -> &Run {
        match self {
            PollOutcome::Terminal(run) | PollOutcome::Unclassified(run) => run,
        }
    }

    pub fn into_run(self) -> Run {
        match self {
            PollOutcome::Terminal(run) | PollOutcome::Unclassified(run) => run,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PollOutcome::Terminal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses(raw: &[&str]) -> Vec<RunStatus> {
        raw.iter().map(|s| RunStatus::from(*s)).collect()
    }

    #[test]
    fn plan_tables_match_the_wire_names() {
        for status in statuses(&[
            "pending",
            "plan_queued",
            "planning",
            "cost_estimating",
            "policy_checking",
            "queuing",
            "fetching",
        ]) {
            assert!(StatusSet::PlanPending.contains(&status), "{status}");
            assert!(!StatusSet::PlanTerminal.contains(&status), "{status}");
        }
        for status in statuses(&[
            "planned",
            "planned_and_finished",
            "errored",
            "cost_estimated",
            "policy_checked",
            "policy_soft_failed",
            "policy_override",
        ]) {
            assert!(StatusSet::PlanTerminal.contains(&status), "{status}");
            assert!(!StatusSet::PlanPending.contains(&status), "{status}");
        }
    }

    #[test]
    fn apply_tables_overlap_with_confirmation_done() {
        for status in statuses(&["confirmed", "apply_queued", "applying"]) {
            assert!(StatusSet::ApplyPending.contains(&status));
            assert!(StatusSet::ConfirmationDone.contains(&status));
            assert!(!StatusSet::ApplyDone.contains(&status));
        }
        assert!(StatusSet::ApplyDone.contains(&RunStatus::Applied));
        assert!(StatusSet::ApplyDone.contains(&RunStatus::Errored));
    }

    #[test]
    fn canceled_discarded_and_unknown_belong_nowhere() {
        let sets = [
            StatusSet::PlanPending,
            StatusSet::PlanTerminal,
            StatusSet::ApplyPending,
            StatusSet::ApplyDone,
            StatusSet::ConfirmationDone,
        ];
        for status in statuses(&["canceled", "discarded", "force_canceled"]) {
            assert!(sets.iter().all(|set| !set.contains(&status)), "{status}");
        }
    }

    #[test]
    fn only_matches_a_single_status() {
        let set = StatusSet::Only(RunStatus::PolicyOverride);
        assert!(set.contains(&RunStatus::PolicyOverride));
        assert!(!set.contains(&RunStatus::PolicyChecked));
        assert_eq!(set.to_string(), "only(policy_override)");
    }

    #[test]
    fn planned_only_ignored_for_plan_side_waits() {
        assert!(is_queue_ignored(&RunStatus::Planned, true));
        assert!(!is_queue_ignored(&RunStatus::Planned, false));
        assert!(is_queue_ignored(&RunStatus::Discarded, false));
        assert!(!is_queue_ignored(&RunStatus::Applying, true));
    }
}
