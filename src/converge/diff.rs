//! Diff engine for comparing desired vs observed attribute values.
//!
//! Only explicitly set, non-identity attributes take part in the diff.
//! Defaults describe what an instance would look like, but an attribute the
//! caller never set is not something to converge.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::instance::{ObservedInstance, ResourceInstance};
use crate::schema::{CollectionSemantics, Value};

/// Engine for computing diffs between desired and observed states.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

/// One attribute whose desired value differs from its observed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeChange {
    /// Attribute name.
    pub attribute: String,
    /// Desired value.
    pub desired: Value,
    /// Observed value.
    pub observed: Value,
}

/// Diff result for one instance.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstanceDiff {
    /// Changed attributes in declaration order.
    pub changes: Vec<AttributeChange>,
}

/// Element-level difference between two collection values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetDelta {
    /// Elements desired but not observed.
    pub additions: BTreeSet<Value>,
    /// Elements observed but not desired.
    pub removals: BTreeSet<Value>,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the changed attributes of an instance.
    ///
    /// # Errors
    ///
    /// Returns an error if a desired value cannot be read or an observed
    /// attribute's lazy loader fails.
    pub fn diff(&self, instance: &ResourceInstance, observed: &ObservedInstance) -> Result<InstanceDiff> {
        let mut changes = Vec::new();

        for name in instance.dirty_attributes() {
            let Some(descriptor) = instance.resource_type().descriptor(&name) else {
                continue;
            };
            if descriptor.is_identity() {
                continue;
            }

            let desired = instance.get(&name)?;
            let current = observed.get(&name)?;
            if values_equal(descriptor.collection(), &desired, &current) {
                continue;
            }

            debug!("{}: {} differs ({} -> {})", instance, name, current, desired);
            changes.push(AttributeChange {
                attribute: name,
                desired,
                observed: current,
            });
        }

        Ok(InstanceDiff { changes })
    }
}

impl InstanceDiff {
    /// Returns true if nothing differs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Names of the changed attributes.
    #[must_use]
    pub fn changed(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.attribute.as_str()).collect()
    }
}

/// Structural equality under the attribute's collection semantics.
///
/// Sets always compare as sets. Lists compare element-wise when ordered and
/// by element set when unordered.
#[must_use]
pub fn values_equal(semantics: CollectionSemantics, a: &Value, b: &Value) -> bool {
    match (semantics, a, b) {
        (CollectionSemantics::Unordered, Value::List(_) | Value::Set(_), Value::List(_) | Value::Set(_)) => {
            element_set(a) == element_set(b)
        }
        _ => a == b,
    }
}

fn element_set(value: &Value) -> BTreeSet<&Value> {
    value.elements().unwrap_or_default().into_iter().collect()
}

impl SetDelta {
    /// Computes additions and removals from `observed` to `desired`.
    ///
    /// Scalars count as one-element collections and `Absent` as empty.
    #[must_use]
    pub fn between(desired: &Value, observed: &Value) -> Self {
        let desired = owned_elements(desired);
        let observed = owned_elements(observed);
        Self {
            additions: desired.difference(&observed).cloned().collect(),
            removals: observed.difference(&desired).cloned().collect(),
        }
    }

    /// Returns true if there is nothing to add or remove.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

fn owned_elements(value: &Value) -> BTreeSet<Value> {
    match value {
        Value::Absent => BTreeSet::new(),
        Value::List(_) | Value::Set(_) => value
            .elements()
            .unwrap_or_default()
            .into_iter()
            .cloned()
            .collect(),
        scalar => BTreeSet::from([scalar.clone()]),
    }
}

impl fmt::Display for AttributeChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.attribute, self.observed, self.desired)
    }
}

impl fmt::Display for SetDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_set = |set: &BTreeSet<Value>| {
            set.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        };
        write!(f, "+{{{}}} -{{{}}}", fmt_set(&self.additions), fmt_set(&self.removals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converge::InstancePolicy;
    use crate::instance::ObservedRecord;
    use crate::schema::{AttributeDescriptor, ResourceType, TypeConstraint, ValueKind};
    use std::collections::BTreeMap;
    use std::rc::Rc;

    fn file_type() -> Rc<ResourceType> {
        ResourceType::builder("file")
            .attribute(AttributeDescriptor::new("path", TypeConstraint::kind(ValueKind::Str)).identity())
            .attribute(AttributeDescriptor::new("content", TypeConstraint::kind(ValueKind::Str)))
            .attribute(AttributeDescriptor::new("mode", TypeConstraint::kind(ValueKind::Int)).default_value(0o644))
            .attribute(AttributeDescriptor::new("tags", TypeConstraint::kind(ValueKind::List)).unordered())
            .load_with(|_, record: &mut ObservedRecord| {
                record.set("content", "hello");
                record.set("mode", 0o600);
                record.set("tags", Value::list_of(["a", "b"]));
                Ok(())
            })
            .build()
            .unwrap()
    }

    fn instance(ty: Rc<ResourceType>) -> ResourceInstance {
        let identity = BTreeMap::from([(String::from("path"), Value::from("/tmp/x"))]);
        ResourceInstance::new(ty, identity, None, InstancePolicy::default())
    }

    #[test]
    fn test_only_set_attributes_are_compared() {
        let file = instance(file_type());
        file.set("content", "hello").unwrap();
        let observed = file.observed().unwrap();

        // mode defaults to 0o644 but was never set, so it is not a change.
        let diff = DiffEngine::new().diff(&file, &observed).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_changed_attribute_reported() {
        let file = instance(file_type());
        file.set("content", "bye").unwrap();
        file.set("mode", 0o600).unwrap();
        let observed = file.observed().unwrap();

        let diff = DiffEngine::new().diff(&file, &observed).unwrap();
        assert_eq!(diff.changed(), ["content"]);
        assert_eq!(diff.changes[0].observed, Value::from("hello"));
    }

    #[test]
    fn test_unordered_list_ignores_order() {
        let file = instance(file_type());
        file.set("tags", Value::list_of(["b", "a"])).unwrap();
        let observed = file.observed().unwrap();

        let diff = DiffEngine::new().diff(&file, &observed).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_values_equal_ordered_lists() {
        let a = Value::list_of([1, 2]);
        let b = Value::list_of([2, 1]);
        assert!(!values_equal(CollectionSemantics::Ordered, &a, &b));
        assert!(values_equal(CollectionSemantics::Unordered, &a, &b));
    }

    #[test]
    fn test_set_delta() {
        let delta = SetDelta::between(
            &Value::set_of(["a@x.com", "b@x.com"]),
            &Value::set_of(["a@x.com"]),
        );
        assert_eq!(delta.additions, BTreeSet::from([Value::from("b@x.com")]));
        assert!(delta.removals.is_empty());

        let delta = SetDelta::between(&Value::Absent, &Value::set_of(["a"]));
        assert_eq!(delta.removals.len(), 1);
        assert!(!delta.is_empty());
    }
}
