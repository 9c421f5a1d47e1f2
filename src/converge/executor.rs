//! Convergence executor.
//!
//! Loads the observed state of an instance, diffs it against the desired
//! state and runs the triggered actions in declaration order. A failing
//! action aborts the remaining ones unless the failure is a permission
//! error and the instance's policy accepts those. Actions that suppress
//! their effect are reported as warned and their attributes stay pending.

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ConvergenceError, Result};
use crate::instance::{InstanceState, ResourceInstance};

use super::action::{ActionContext, ConvergenceAction};
use super::diff::{AttributeChange, DiffEngine};
use super::report::{ActionOutcome, ActionStatus, ConvergencePlan, ConvergenceReport};

/// Executor for converging resource instances.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceExecutor {
    /// Run the reports are stamped with.
    run_id: Uuid,
    /// Diff engine.
    diff_engine: DiffEngine,
}

impl ConvergenceExecutor {
    /// Creates a new executor for a run.
    #[must_use]
    pub const fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            diff_engine: DiffEngine::new(),
        }
    }

    /// Computes what converging the instance would do without running anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the observed state cannot be loaded or diffed.
    pub fn plan(&self, instance: &ResourceInstance) -> Result<ConvergencePlan> {
        let observed = instance.observed()?;
        let diff = self.diff_engine.diff(instance, &observed)?;
        let triggered = triggered_actions(instance, &diff.changes)
            .map(|a| a.name().to_string())
            .collect();

        Ok(ConvergencePlan {
            resource: instance.display_name(),
            exists: observed.exists(),
            changes: diff.changes,
            triggered,
        })
    }

    /// Converges an instance.
    ///
    /// # Errors
    ///
    /// Returns a `LoadError` if the observed state cannot be loaded and a
    /// `ConvergenceError` if an action fails without being downgraded.
    pub fn converge(&self, instance: &ResourceInstance) -> Result<ConvergenceReport> {
        let started_at = Utc::now();
        let resource = instance.display_name();

        let observed = instance.observed()?;
        let existed = observed.exists();
        let diff = self.diff_engine.diff(instance, &observed)?;

        let mut report = ConvergenceReport {
            run_id: self.run_id,
            resource: resource.clone(),
            resource_type: instance.resource_type().name().to_string(),
            state: InstanceState::Converging,
            existed,
            changes: diff.changes.clone(),
            actions: Vec::new(),
            skipped: Vec::new(),
            warnings: Vec::new(),
            started_at,
            finished_at: started_at,
        };

        if diff.is_empty() {
            debug!("{resource} is up to date");
            instance.set_state(InstanceState::Converged);
            report.state = InstanceState::Converged;
            report.finished_at = Utc::now();
            return Ok(report);
        }

        info!(
            "Converging {resource}: {} attribute(s) differ",
            diff.changes.len()
        );
        instance.set_state(InstanceState::Converging);

        let policy = instance.policy();
        let triggered: Vec<&ConvergenceAction> = triggered_actions(instance, &diff.changes).collect();
        let mut completed: Vec<String> = Vec::new();
        let mut refreshed: Vec<&str> = Vec::new();
        let mut removed = false;
        let mut failure = None;

        for (idx, action) in triggered.iter().enumerate() {
            debug!("Running action '{}' for {resource}", action.name());
            let mut ctx = ActionContext::new(instance, &observed, &diff.changes);
            let outcome = action.run(&mut ctx);
            let suppressed = ctx.is_suppressed();
            let removal = ctx.is_removal();
            let warnings = ctx.take_warnings();

            match outcome {
                Ok(()) if suppressed => {
                    let message = warnings.join("; ");
                    warn!("Action '{}' for {resource} skipped its effect: {message}", action.name());
                    report.warnings.extend(warnings);
                    completed.push(action.name().to_string());
                    report.actions.push(ActionOutcome {
                        action: action.name().to_string(),
                        status: ActionStatus::Warned,
                        message: Some(message),
                    });
                }
                Ok(()) => {
                    report.warnings.extend(warnings);
                    removed |= removal;
                    completed.push(action.name().to_string());
                    refreshed.extend(action.owns().iter().map(String::as_str));
                    report.actions.push(ActionOutcome {
                        action: action.name().to_string(),
                        status: ActionStatus::Executed,
                        message: None,
                    });
                }
                Err(err) if err.is_permission() && policy.permission_error_acceptable => {
                    report.warnings.extend(warnings);
                    warn!(
                        "Action '{}' for {resource} was not permitted, continuing: {err}",
                        action.name()
                    );
                    report
                        .warnings
                        .push(format!("{}: {err}", action.name()));
                    report.actions.push(ActionOutcome {
                        action: action.name().to_string(),
                        status: ActionStatus::Warned,
                        message: Some(err.to_string()),
                    });
                }
                Err(err) => {
                    report.warnings.extend(warnings);
                    error!("Action '{}' failed for {resource}: {err}", action.name());
                    report.actions.push(ActionOutcome {
                        action: action.name().to_string(),
                        status: ActionStatus::Failed,
                        message: Some(err.to_string()),
                    });
                    report.skipped = triggered[idx + 1..]
                        .iter()
                        .map(|a| a.name().to_string())
                        .collect();
                    failure = Some((action.name().to_string(), err));
                    break;
                }
            }
        }

        if !refreshed.is_empty() {
            if removed {
                debug!("{resource} was removed");
            }
            observed.refresh(
                !removed,
                diff.changes
                    .iter()
                    .filter(|c| refreshed.contains(&c.attribute.as_str()))
                    .map(|c| (c.attribute.clone(), c.desired.clone())),
            );
        }

        report.finished_at = Utc::now();

        if let Some((action, source)) = failure {
            instance.set_state(InstanceState::ConvergeFailed);
            return Err(ConvergenceError::ActionFailed {
                resource,
                action,
                completed,
                source,
            }
            .into());
        }

        report.state = if report.actions.iter().any(|a| a.status == ActionStatus::Warned) {
            InstanceState::ConvergedWithWarnings
        } else {
            InstanceState::Converged
        };
        instance.set_state(report.state);

        info!(
            "Converged {resource}: {} action(s) executed, {} warning(s)",
            report.executed_count(),
            report.warnings.len()
        );
        Ok(report)
    }
}

fn triggered_actions<'a>(
    instance: &'a ResourceInstance,
    changes: &'a [AttributeChange],
) -> impl Iterator<Item = &'a ConvergenceAction> {
    instance
        .resource_type()
        .actions()
        .iter()
        .filter(move |action| action.is_triggered_by(changes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converge::InstancePolicy;
    use crate::error::{AdapterError, ReconcileError};
    use crate::schema::{AttributeDescriptor, ResourceType, TypeConstraint, Value, ValueKind};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    fn service_type(log: &Log, fail_config: Option<AdapterError>) -> Rc<ResourceType> {
        let config_log = Rc::clone(log);
        let enabled_log = Rc::clone(log);
        ResourceType::builder("service")
            .attribute(AttributeDescriptor::new("name", TypeConstraint::kind(ValueKind::Str)).identity())
            .attribute(AttributeDescriptor::new("config", TypeConstraint::kind(ValueKind::Str)))
            .attribute(AttributeDescriptor::new("enabled", TypeConstraint::kind(ValueKind::Bool)))
            .load_with(|_, record| {
                record.set("config", "old");
                record.set("enabled", false);
                Ok(())
            })
            .action("config", &["config"], move |_| {
                config_log.borrow_mut().push(String::from("config"));
                match &fail_config {
                    Some(err) => Err(err.clone()),
                    None => Ok(()),
                }
            })
            .action("enabled", &["enabled"], move |_| {
                enabled_log.borrow_mut().push(String::from("enabled"));
                Ok(())
            })
            .build()
            .unwrap()
    }

    fn instance(ty: Rc<ResourceType>, policy: InstancePolicy) -> ResourceInstance {
        let identity = BTreeMap::from([(String::from("name"), Value::from("web"))]);
        ResourceInstance::new(ty, identity, None, policy)
    }

    #[test]
    fn test_converge_runs_only_triggered_actions() {
        let log: Log = Rc::default();
        let svc = instance(service_type(&log, None), InstancePolicy::default());
        svc.set("config", "new").unwrap();
        svc.set("enabled", false).unwrap();

        let executor = ConvergenceExecutor::new(Uuid::new_v4());
        let report = executor.converge(&svc).unwrap();
        assert_eq!(report.action_names(), ["config"]);
        assert_eq!(*log.borrow(), ["config"]);
        assert_eq!(svc.state(), InstanceState::Converged);

        let again = executor.converge(&svc).unwrap();
        assert!(again.is_noop());
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_failure_aborts_remaining_actions() {
        let log: Log = Rc::default();
        let svc = instance(
            service_type(&log, Some(AdapterError::other("disk full"))),
            InstancePolicy::default(),
        );
        svc.set("config", "new").unwrap();
        svc.set("enabled", true).unwrap();

        let err = ConvergenceExecutor::new(Uuid::new_v4()).converge(&svc).unwrap_err();
        match err {
            ReconcileError::Convergence(ConvergenceError::ActionFailed { action, completed, .. }) => {
                assert_eq!(action, "config");
                assert!(completed.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*log.borrow(), ["config"]);
        assert_eq!(svc.state(), InstanceState::ConvergeFailed);
    }

    #[test]
    fn test_permission_failure_downgraded_by_policy() {
        let log: Log = Rc::default();
        let policy = InstancePolicy::default().with_permission_error_acceptable(true);
        let svc = instance(
            service_type(&log, Some(AdapterError::permission_denied("not root"))),
            policy,
        );
        svc.set("config", "new").unwrap();
        svc.set("enabled", true).unwrap();

        let executor = ConvergenceExecutor::new(Uuid::new_v4());
        let report = executor.converge(&svc).unwrap();
        assert_eq!(report.state, InstanceState::ConvergedWithWarnings);
        assert_eq!(report.executed_count(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(*log.borrow(), ["config", "enabled"]);

        // The downgraded attribute was not refreshed, so it is still pending.
        let plan = executor.plan(&svc).unwrap();
        assert_eq!(plan.triggered, ["config"]);
    }

    #[test]
    fn test_permission_failure_without_policy_fails() {
        let log: Log = Rc::default();
        let svc = instance(
            service_type(&log, Some(AdapterError::permission_denied("not root"))),
            InstancePolicy::default(),
        );
        svc.set("config", "new").unwrap();

        assert!(ConvergenceExecutor::new(Uuid::new_v4()).converge(&svc).is_err());
        assert_eq!(svc.state(), InstanceState::ConvergeFailed);
    }

    fn package_type() -> Rc<ResourceType> {
        ResourceType::builder("package")
            .attribute(AttributeDescriptor::new("name", TypeConstraint::kind(ValueKind::Str)).identity())
            .attribute(AttributeDescriptor::new("version", TypeConstraint::kind(ValueKind::Str)))
            .load_with(|_, record| {
                record.set("version", "1.0");
                Ok(())
            })
            .action("install", &["version"], |ctx| {
                if ctx.desired("version")?.is_absent() {
                    if ctx.policy().never_remove {
                        ctx.suppress("uninstall skipped");
                        return Ok(());
                    }
                    ctx.mark_removed();
                }
                Ok(())
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_removal_marks_entity_gone() {
        let pkg = instance(package_type(), InstancePolicy::default());
        pkg.set("version", Value::Absent).unwrap();

        let executor = ConvergenceExecutor::new(Uuid::new_v4());
        let report = executor.converge(&pkg).unwrap();
        assert!(report.existed);
        assert_eq!(report.executed_count(), 1);

        let plan = executor.plan(&pkg).unwrap();
        assert!(!plan.exists);
        assert!(plan.is_noop());
        assert_eq!(pkg.observed().unwrap().identity("name"), Value::from("web"));
    }

    #[test]
    fn test_suppressed_action_stays_pending() {
        let pkg = instance(package_type(), InstancePolicy::default().with_never_remove(true));
        pkg.set("version", Value::Absent).unwrap();

        let executor = ConvergenceExecutor::new(Uuid::new_v4());
        let report = executor.converge(&pkg).unwrap();
        assert_eq!(report.state, InstanceState::ConvergedWithWarnings);
        assert_eq!(report.actions[0].status, ActionStatus::Warned);
        assert_eq!(report.warnings, ["uninstall skipped"]);

        let plan = executor.plan(&pkg).unwrap();
        assert!(plan.exists);
        assert_eq!(plan.triggered, ["install"]);
    }

    #[test]
    fn test_plan_does_not_run_actions() {
        let log: Log = Rc::default();
        let svc = instance(service_type(&log, None), InstancePolicy::default());
        svc.set("enabled", true).unwrap();

        let plan = ConvergenceExecutor::new(Uuid::new_v4()).plan(&svc).unwrap();
        assert_eq!(plan.triggered, ["enabled"]);
        assert!(plan.exists);
        assert!(log.borrow().is_empty());
    }
}
