//! Convergence actions and the context their bodies run in.

use std::fmt;
use std::rc::Rc;

use crate::error::AdapterError;
use crate::instance::{ObservedInstance, ResourceInstance};
use crate::schema::Value;

use super::diff::{AttributeChange, SetDelta};
use super::policy::InstancePolicy;

/// Body of a convergence action.
pub type ActionBody = Rc<dyn Fn(&mut ActionContext<'_>) -> Result<(), AdapterError>>;

/// A named unit of change that owns a subset of a type's attributes.
///
/// The action is triggered when at least one owned attribute differs
/// between desired and observed state.
#[derive(Clone)]
pub struct ConvergenceAction {
    name: String,
    owns: Vec<String>,
    body: ActionBody,
}

impl ConvergenceAction {
    /// Creates an action.
    pub fn new(name: impl Into<String>, owns: &[&str], body: ActionBody) -> Self {
        Self {
            name: name.into(),
            owns: owns.iter().map(|s| (*s).to_string()).collect(),
            body,
        }
    }

    /// Action name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attributes owned by this action.
    #[must_use]
    pub fn owns(&self) -> &[String] {
        &self.owns
    }

    /// Returns true if any of the changes touches an owned attribute.
    #[must_use]
    pub fn is_triggered_by(&self, changes: &[AttributeChange]) -> bool {
        changes.iter().any(|c| self.owns.contains(&c.attribute))
    }

    /// Runs the body.
    ///
    /// # Errors
    ///
    /// Returns whatever the body reports.
    pub fn run(&self, ctx: &mut ActionContext<'_>) -> Result<(), AdapterError> {
        (self.body)(ctx)
    }
}

impl fmt::Debug for ConvergenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvergenceAction")
            .field("name", &self.name)
            .field("owns", &self.owns)
            .finish_non_exhaustive()
    }
}

/// What an action body sees: desired and observed state, the changes that
/// triggered it and the instance's policy.
pub struct ActionContext<'a> {
    desired: &'a ResourceInstance,
    observed: &'a ObservedInstance,
    changes: &'a [AttributeChange],
    policy: InstancePolicy,
    warnings: Vec<String>,
    removed: bool,
    suppressed: bool,
}

impl<'a> ActionContext<'a> {
    /// Creates a context.
    #[must_use]
    pub fn new(
        desired: &'a ResourceInstance,
        observed: &'a ObservedInstance,
        changes: &'a [AttributeChange],
    ) -> Self {
        Self {
            desired,
            observed,
            changes,
            policy: desired.policy(),
            warnings: Vec::new(),
            removed: false,
            suppressed: false,
        }
    }

    /// The desired instance.
    #[must_use]
    pub const fn instance(&self) -> &ResourceInstance {
        self.desired
    }

    /// The observed instance.
    #[must_use]
    pub const fn observed(&self) -> &ObservedInstance {
        self.observed
    }

    /// Display name of the resource being converged.
    #[must_use]
    pub fn resource(&self) -> String {
        self.desired.display_name()
    }

    /// Desired value of an attribute.
    ///
    /// # Errors
    ///
    /// Returns an adapter error if the attribute is unknown or its default fails.
    pub fn desired(&self, name: &str) -> Result<Value, AdapterError> {
        self.desired
            .get(name)
            .map_err(|err| AdapterError::other(err.to_string()))
    }

    /// Current value of an attribute.
    ///
    /// # Errors
    ///
    /// Returns an adapter error if the attribute is unknown or its lazy
    /// loader fails.
    pub fn current(&self, name: &str) -> Result<Value, AdapterError> {
        self.observed
            .get(name)
            .map_err(|err| AdapterError::other(err.to_string()))
    }

    /// The change recorded for an attribute, if it differs.
    #[must_use]
    pub fn change(&self, name: &str) -> Option<&AttributeChange> {
        self.changes.iter().find(|c| c.attribute == name)
    }

    /// Returns true if the attribute differs.
    #[must_use]
    pub fn changed(&self, name: &str) -> bool {
        self.change(name).is_some()
    }

    /// Element additions and removals for a collection attribute.
    ///
    /// # Errors
    ///
    /// Returns an adapter error if either side cannot be read.
    pub fn delta(&self, name: &str) -> Result<SetDelta, AdapterError> {
        let desired = self.desired(name)?;
        let current = self.current(name)?;
        Ok(SetDelta::between(&desired, &current))
    }

    /// Policy in effect for this instance.
    #[must_use]
    pub const fn policy(&self) -> InstancePolicy {
        self.policy
    }

    /// Whether the entity existed before convergence.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.observed.exists()
    }

    /// Records a warning on the convergence report.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Reports that the action removed the entity.
    ///
    /// Once the action completes, the observed state records the entity as
    /// no longer existing.
    pub fn mark_removed(&mut self) {
        self.removed = true;
    }

    /// Reports that the action skipped its effect, usually because the
    /// instance's policy forbids it.
    ///
    /// The action is reported as warned and the attributes it owns keep
    /// their observed values, so they remain pending.
    pub fn suppress(&mut self, message: impl Into<String>) {
        self.suppressed = true;
        self.warn(message);
    }

    pub(crate) const fn is_removal(&self) -> bool {
        self.removed
    }

    pub(crate) const fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }
}
