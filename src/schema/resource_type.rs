//! Resource types.
//!
//! A resource type is a named schema (ordered attribute descriptors), an
//! optional observed-state loader, an ordered list of convergence actions and
//! any nested resource types. Types are assembled with [`ResourceTypeBuilder`]
//! and are immutable afterwards.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::converge::{ActionBody, ActionContext, ConvergenceAction};
use crate::error::{AdapterError, Result, SchemaError};
use crate::instance::{FnLoader, ObservedRecord, ResourceInstance, StateLoader};

use super::descriptor::{merge_descriptor, AttributeDescriptor, AttributeSet};

/// Separator between a parent type name and a nested type name.
pub const NESTED_SEPARATOR: &str = "::";

/// A compiled resource type.
#[derive(Clone)]
pub struct ResourceType {
    name: String,
    short_name: String,
    descriptors: Vec<AttributeDescriptor>,
    actions: Vec<ConvergenceAction>,
    nested: Vec<Rc<ResourceType>>,
    loader: Option<Rc<dyn StateLoader>>,
}

/// Builder for [`ResourceType`].
pub struct ResourceTypeBuilder {
    name: String,
    descriptors: Vec<AttributeDescriptor>,
    actions: Vec<ConvergenceAction>,
    nested: Vec<Rc<ResourceType>>,
    loader: Option<Rc<dyn StateLoader>>,
}

impl ResourceType {
    /// Starts building a resource type.
    pub fn builder(name: impl Into<String>) -> ResourceTypeBuilder {
        ResourceTypeBuilder {
            name: name.into(),
            descriptors: Vec::new(),
            actions: Vec::new(),
            nested: Vec::new(),
            loader: None,
        }
    }

    /// Fully qualified name (`parent::child` for nested types).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name as declared, without parent qualification.
    #[must_use]
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// All descriptors in declaration order.
    #[must_use]
    pub fn descriptors(&self) -> &[AttributeDescriptor] {
        &self.descriptors
    }

    /// Looks up a descriptor by name.
    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.descriptors.iter().find(|d| d.name() == name)
    }

    /// Identity descriptors in declaration order.
    pub fn identity_descriptors(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.descriptors.iter().filter(|d| d.is_identity())
    }

    /// Convergence actions in declaration (and execution) order.
    #[must_use]
    pub fn actions(&self) -> &[ConvergenceAction] {
        &self.actions
    }

    /// Nested types.
    #[must_use]
    pub fn nested_types(&self) -> &[Rc<Self>] {
        &self.nested
    }

    /// Looks up a nested type by its short name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNested` if the type declares no such nested type.
    pub fn nested_type(&self, short_name: &str) -> std::result::Result<&Rc<Self>, SchemaError> {
        self.nested
            .iter()
            .find(|t| t.short_name == short_name)
            .ok_or_else(|| SchemaError::UnknownNested {
                resource_type: self.name.clone(),
                nested: short_name.to_string(),
            })
    }

    /// Observed-state loader, if the type has one.
    #[must_use]
    pub fn loader(&self) -> Option<&Rc<dyn StateLoader>> {
        self.loader.as_ref()
    }

    /// Copies this type under a parent, prefixing its name and those of its own nested types.
    fn qualified_under(&self, parent: &str) -> Self {
        let name = format!("{parent}{NESTED_SEPARATOR}{}", self.short_name);
        let nested = self
            .nested
            .iter()
            .map(|child| Rc::new(child.qualified_under(&name)))
            .collect();
        Self {
            name,
            short_name: self.short_name.clone(),
            descriptors: self.descriptors.clone(),
            actions: self.actions.clone(),
            nested,
            loader: self.loader.clone(),
        }
    }
}

impl ResourceTypeBuilder {
    /// Composes a descriptor set. Same-named descriptors from later sets win.
    #[must_use]
    pub fn include(mut self, set: &AttributeSet) -> Self {
        debug!("Composing attribute set '{}' into '{}'", set.name(), self.name);
        for descriptor in set.descriptors() {
            merge_descriptor(&mut self.descriptors, descriptor.clone());
        }
        self
    }

    /// Declares an attribute. Replaces any earlier same-named descriptor.
    #[must_use]
    pub fn attribute(mut self, descriptor: AttributeDescriptor) -> Self {
        merge_descriptor(&mut self.descriptors, descriptor);
        self
    }

    /// Sets the observed-state loader.
    #[must_use]
    pub fn loader(mut self, loader: impl StateLoader + 'static) -> Self {
        self.loader = Some(Rc::new(loader));
        self
    }

    /// Sets the observed-state loader from a closure.
    #[must_use]
    pub fn load_with<F>(self, load: F) -> Self
    where
        F: Fn(&ResourceInstance, &mut ObservedRecord) -> std::result::Result<(), AdapterError> + 'static,
    {
        self.loader(FnLoader(load))
    }

    /// Declares a convergence action owning the given attributes.
    ///
    /// Actions run in declaration order.
    #[must_use]
    pub fn action<F>(mut self, name: impl Into<String>, owns: &[&str], body: F) -> Self
    where
        F: Fn(&mut ActionContext<'_>) -> std::result::Result<(), AdapterError> + 'static,
    {
        let body: ActionBody = Rc::new(body);
        self.actions.push(ConvergenceAction::new(name, owns, body));
        self
    }

    /// Declares a nested resource type.
    #[must_use]
    pub fn nested(mut self, child: &ResourceType) -> Self {
        self.nested.push(Rc::new(child.clone()));
        self
    }

    /// Follows `relative_to` links from `start`. Returns the visited chain if
    /// it comes back to `start`.
    fn relative_cycle<'a>(&'a self, start: &'a str) -> Option<Vec<&'a str>> {
        let mut chain = vec![start];
        let mut current = start;
        while let Some(target) = self
            .descriptors
            .iter()
            .find(|d| d.name() == current)
            .and_then(AttributeDescriptor::relative_target)
        {
            chain.push(target);
            if target == start {
                return Some(chain);
            }
            if chain.len() > self.descriptors.len() {
                return None;
            }
            current = target;
        }
        None
    }

    /// Validates and compiles the type.
    ///
    /// # Errors
    ///
    /// Returns a `SchemaError` if the type has no identity attribute, an
    /// action owns an undeclared or identity attribute, names collide, or a
    /// `relative_to` target is undeclared or leads back to its attribute.
    pub fn build(self) -> Result<Rc<ResourceType>> {
        let type_name = self.name.clone();

        if !self.descriptors.iter().any(AttributeDescriptor::is_identity) {
            return Err(SchemaError::NoIdentity {
                resource_type: type_name,
            }
            .into());
        }

        for descriptor in &self.descriptors {
            if let Some(target) = descriptor.relative_target()
                && !self.descriptors.iter().any(|d| d.name() == target)
            {
                return Err(SchemaError::UnknownRelativeTarget {
                    resource_type: type_name,
                    attribute: descriptor.name().to_string(),
                    target: target.to_string(),
                }
                .into());
            }
        }

        for descriptor in &self.descriptors {
            if let Some(chain) = self.relative_cycle(descriptor.name()) {
                return Err(SchemaError::RelativeCycle {
                    resource_type: type_name,
                    attribute: descriptor.name().to_string(),
                    chain: chain.join(" -> "),
                }
                .into());
            }
        }

        let mut action_names = HashSet::new();
        for action in &self.actions {
            if !action_names.insert(action.name()) {
                return Err(SchemaError::DuplicateAction {
                    resource_type: type_name,
                    action: action.name().to_string(),
                }
                .into());
            }
            for owned in action.owns() {
                match self.descriptors.iter().find(|d| d.name() == owned) {
                    None => {
                        return Err(SchemaError::UnknownOwnedAttribute {
                            resource_type: type_name,
                            action: action.name().to_string(),
                            attribute: owned.clone(),
                        }
                        .into());
                    }
                    Some(d) if d.is_identity() => {
                        return Err(SchemaError::OwnsIdentity {
                            resource_type: type_name,
                            action: action.name().to_string(),
                            attribute: owned.clone(),
                        }
                        .into());
                    }
                    Some(_) => {}
                }
            }
        }

        let mut nested_names = HashSet::new();
        for child in &self.nested {
            if !nested_names.insert(child.short_name.as_str()) {
                return Err(SchemaError::DuplicateNested {
                    resource_type: type_name,
                    nested: child.short_name.clone(),
                }
                .into());
            }
        }

        let nested = self
            .nested
            .iter()
            .map(|child| Rc::new(child.qualified_under(&type_name)))
            .collect();

        debug!(
            "Built resource type '{}' ({} attributes, {} actions)",
            type_name,
            self.descriptors.len(),
            self.actions.len()
        );

        Ok(Rc::new(ResourceType {
            short_name: type_name.clone(),
            name: type_name,
            descriptors: self.descriptors,
            actions: self.actions,
            nested,
            loader: self.loader,
        }))
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("name", &self.name)
            .field("descriptors", &self.descriptors)
            .field("actions", &self.actions)
            .field("nested", &self.nested)
            .field("has_loader", &self.loader.is_some())
            .finish()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReconcileError;
    use crate::schema::{TypeConstraint, Value, ValueKind};

    fn noop(_: &mut ActionContext<'_>) -> std::result::Result<(), AdapterError> {
        Ok(())
    }

    fn name_attr() -> AttributeDescriptor {
        AttributeDescriptor::new("name", TypeConstraint::kind(ValueKind::Str)).identity()
    }

    #[test]
    fn test_build_requires_identity() {
        let err = ResourceType::builder("thing")
            .attribute(AttributeDescriptor::new("label", TypeConstraint::Any))
            .build()
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Schema(SchemaError::NoIdentity { .. })));
    }

    #[test]
    fn test_action_cannot_own_unknown_attribute() {
        let err = ResourceType::builder("thing")
            .attribute(name_attr())
            .action("sync", &["missing"], noop)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Schema(SchemaError::UnknownOwnedAttribute { .. })
        ));
    }

    #[test]
    fn test_action_cannot_own_identity() {
        let err = ResourceType::builder("thing")
            .attribute(name_attr())
            .action("rename", &["name"], noop)
            .build()
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Schema(SchemaError::OwnsIdentity { .. })));
    }

    #[test]
    fn test_duplicate_action_rejected() {
        let err = ResourceType::builder("thing")
            .attribute(name_attr())
            .attribute(AttributeDescriptor::new("label", TypeConstraint::Any))
            .action("sync", &["label"], noop)
            .action("sync", &["label"], noop)
            .build()
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Schema(SchemaError::DuplicateAction { .. })));
    }

    #[test]
    fn test_relative_target_must_exist() {
        let err = ResourceType::builder("thing")
            .attribute(name_attr())
            .attribute(AttributeDescriptor::new("path", TypeConstraint::Any).relative_to("root"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Schema(SchemaError::UnknownRelativeTarget { .. })
        ));
    }

    #[test]
    fn test_relative_cycle_rejected() {
        let err = ResourceType::builder("thing")
            .attribute(name_attr())
            .attribute(AttributeDescriptor::new("a", TypeConstraint::Any).relative_to("b"))
            .attribute(AttributeDescriptor::new("b", TypeConstraint::Any).relative_to("a"))
            .build()
            .unwrap_err();
        match err {
            ReconcileError::Schema(SchemaError::RelativeCycle { attribute, chain, .. }) => {
                assert_eq!(attribute, "a");
                assert_eq!(chain, "a -> b -> a");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_relative_to_self_rejected() {
        let err = ResourceType::builder("thing")
            .attribute(name_attr())
            .attribute(AttributeDescriptor::new("dir", TypeConstraint::Any).relative_to("dir"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Schema(SchemaError::RelativeCycle { .. })));
    }

    #[test]
    fn test_relative_chain_without_cycle_accepted() {
        ResourceType::builder("thing")
            .attribute(name_attr())
            .attribute(AttributeDescriptor::new("root", TypeConstraint::Any))
            .attribute(AttributeDescriptor::new("home", TypeConstraint::Any).relative_to("root"))
            .attribute(AttributeDescriptor::new("profile", TypeConstraint::Any).relative_to("home"))
            .build()
            .unwrap();
    }

    #[test]
    fn test_later_composition_overrides_entirely() {
        let base = AttributeSet::new("base")
            .attribute(name_attr())
            .attribute(AttributeDescriptor::new("size", TypeConstraint::kind(ValueKind::Int)).default_value(1))
            .attribute(AttributeDescriptor::new("label", TypeConstraint::Any));
        let overlay = AttributeSet::new("overlay")
            .attribute(AttributeDescriptor::new("size", TypeConstraint::kind(ValueKind::Str)));

        let ty = ResourceType::builder("thing")
            .include(&base)
            .include(&overlay)
            .build()
            .unwrap();

        let names: Vec<&str> = ty.descriptors().iter().map(AttributeDescriptor::name).collect();
        assert_eq!(names, ["name", "size", "label"]);

        let size = ty.descriptor("size").unwrap();
        assert!(size.constraint().accepts(&Value::from("large")));
        assert!(!size.constraint().accepts(&Value::Int(3)));
        // No field-level merge: the earlier default is gone.
        assert!(size.default_rule().is_none());
    }

    #[test]
    fn test_nested_types_are_qualified() {
        let account = ResourceType::builder("account")
            .attribute(name_attr())
            .build()
            .unwrap();
        let registry = ResourceType::builder("registry")
            .attribute(AttributeDescriptor::new("host", TypeConstraint::kind(ValueKind::Str)).identity())
            .nested(&account)
            .build()
            .unwrap();

        let child = registry.nested_type("account").unwrap();
        assert_eq!(child.name(), "registry::account");
        assert_eq!(child.short_name(), "account");
        assert!(registry.nested_type("missing").is_err());
    }

    #[test]
    fn test_duplicate_nested_rejected() {
        let account = ResourceType::builder("account").attribute(name_attr()).build().unwrap();
        let err = ResourceType::builder("registry")
            .attribute(name_attr())
            .nested(&account)
            .nested(&account)
            .build()
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Schema(SchemaError::DuplicateNested { .. })));
    }
}
