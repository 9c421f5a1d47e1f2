//! Convergence plans and reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::instance::InstanceState;

use super::diff::AttributeChange;

/// Outcome of one triggered action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// The action body succeeded.
    Executed,
    /// The action failed with a permission error that policy downgraded.
    Warned,
    /// The action body failed.
    Failed,
}

/// Result of running one triggered action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    /// Action name.
    pub action: String,
    /// How it ended.
    pub status: ActionStatus,
    /// Failure or warning message.
    pub message: Option<String>,
}

/// What converging an instance would do, without doing it.
#[derive(Debug, Clone, Serialize)]
pub struct ConvergencePlan {
    /// Display name of the resource.
    pub resource: String,
    /// Whether the entity currently exists.
    pub exists: bool,
    /// Attributes that differ.
    pub changes: Vec<AttributeChange>,
    /// Actions that would run, in execution order.
    pub triggered: Vec<String>,
}

/// Result of converging one instance.
#[derive(Debug, Clone, Serialize)]
pub struct ConvergenceReport {
    /// Run this report belongs to.
    pub run_id: Uuid,
    /// Display name of the resource.
    pub resource: String,
    /// Fully qualified resource type name.
    pub resource_type: String,
    /// State after convergence.
    pub state: InstanceState,
    /// Whether the entity existed before convergence.
    pub existed: bool,
    /// Attributes that differed.
    pub changes: Vec<AttributeChange>,
    /// Triggered actions in execution order.
    pub actions: Vec<ActionOutcome>,
    /// Actions not run because an earlier one failed.
    pub skipped: Vec<String>,
    /// Warnings raised by action bodies or policy downgrades.
    pub warnings: Vec<String>,
    /// When convergence started.
    pub started_at: DateTime<Utc>,
    /// When convergence finished.
    pub finished_at: DateTime<Utc>,
}

/// Result of converging every instance of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Per-instance reports, in convergence order.
    pub reports: Vec<ConvergenceReport>,
    /// Errors for instances that failed to load or converge.
    pub failures: Vec<String>,
    /// Instances not attempted because the run stopped early.
    pub not_attempted: Vec<String>,
    /// Whether every instance converged.
    pub success: bool,
}

impl ConvergencePlan {
    /// Returns true if no action would run.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.triggered.is_empty()
    }
}

impl ConvergenceReport {
    /// Number of actions whose body succeeded.
    #[must_use]
    pub fn executed_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.status == ActionStatus::Executed)
            .count()
    }

    /// Returns true if nothing was triggered.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }

    /// Names of actions that ran, in order.
    #[must_use]
    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.action.as_str()).collect()
    }
}

impl RunReport {
    /// Total number of executed actions.
    #[must_use]
    pub fn executed_count(&self) -> usize {
        self.reports.iter().map(ConvergenceReport::executed_count).sum()
    }

    /// Number of instances that changed.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.reports.iter().filter(|r| !r.is_noop()).count()
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Executed => "executed",
            Self::Warned => "warned",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ConvergencePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_noop() {
            return write!(f, "{}: up to date", self.resource);
        }
        let verb = if self.exists { "update" } else { "create" };
        writeln!(f, "{} ({verb}):", self.resource)?;
        for change in &self.changes {
            writeln!(f, "  ~ {change}")?;
        }
        write!(f, "  actions: {}", self.triggered.join(", "))
    }
}

impl fmt::Display for ConvergenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.resource, self.state)?;
        if self.is_noop() {
            return write!(f, " no changes");
        }
        for outcome in &self.actions {
            write!(f, "\n  {} {}", outcome.status, outcome.action)?;
            if let Some(message) = &outcome.message {
                write!(f, ": {message}")?;
            }
        }
        for skipped in &self.skipped {
            write!(f, "\n  skipped {skipped}")?;
        }
        Ok(())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {}", self.run_id)?;
        writeln!(f, "  Success: {}", self.success)?;
        writeln!(f, "  Instances: {}", self.reports.len())?;
        writeln!(f, "  Changed: {}", self.changed_count())?;
        writeln!(f, "  Actions executed: {}", self.executed_count())?;

        if !self.failures.is_empty() {
            writeln!(f, "  Failures:")?;
            for failure in &self.failures {
                writeln!(f, "    - {failure}")?;
            }
        }
        if !self.not_attempted.is_empty() {
            writeln!(f, "  Not attempted: {}", self.not_attempted.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Value;

    fn report(actions: Vec<ActionOutcome>) -> ConvergenceReport {
        let now = Utc::now();
        ConvergenceReport {
            run_id: Uuid::new_v4(),
            resource: String::from("file[/tmp/a]"),
            resource_type: String::from("file"),
            state: InstanceState::Converged,
            existed: true,
            changes: vec![AttributeChange {
                attribute: String::from("content"),
                desired: Value::from("new"),
                observed: Value::from("old"),
            }],
            actions,
            skipped: vec![],
            warnings: vec![],
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_executed_count_ignores_warned() {
        let r = report(vec![
            ActionOutcome {
                action: String::from("content"),
                status: ActionStatus::Executed,
                message: None,
            },
            ActionOutcome {
                action: String::from("mode"),
                status: ActionStatus::Warned,
                message: Some(String::from("permission denied")),
            },
        ]);
        assert_eq!(r.executed_count(), 1);
        assert_eq!(r.action_names(), ["content", "mode"]);
        assert!(r.to_string().contains("warned mode: permission denied"));
    }

    #[test]
    fn test_run_report_summary() {
        let run = RunReport {
            run_id: Uuid::new_v4(),
            reports: vec![report(vec![]), report(vec![ActionOutcome {
                action: String::from("content"),
                status: ActionStatus::Executed,
                message: None,
            }])],
            failures: vec![],
            not_attempted: vec![],
            success: true,
        };
        assert_eq!(run.changed_count(), 1);
        assert_eq!(run.executed_count(), 1);
        assert!(run.to_string().contains("Actions executed: 1"));
    }

    #[test]
    fn test_plan_display() {
        let plan = ConvergencePlan {
            resource: String::from("file[/tmp/a]"),
            exists: false,
            changes: vec![],
            triggered: vec![String::from("content")],
        };
        assert!(plan.to_string().starts_with("file[/tmp/a] (create):"));
    }
}
