//! Resource instances.
//!
//! An instance holds the desired attribute values for one identity of one
//! resource type. Identity values are frozen when the instance is created;
//! other attributes can be set freely until convergence. Defaults are
//! evaluated on first read and memoized, and the observed instance is loaded
//! on first request and memoized, including a failed load.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::converge::InstancePolicy;
use crate::error::{AttributeError, LoadError, ReconcileError, Result};
use crate::schema::{normalize_path, DefaultRule, ResourceType, Value};

use super::cache::IdentityKey;
use super::observed::{ObservedInstance, ObservedRecord};

/// Lifecycle state of a resource instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Resolved, nothing set yet.
    Created,
    /// At least one desired value was set.
    DesiredSet,
    /// The loader is running.
    Loading,
    /// Current state was loaded and the entity exists.
    Loaded,
    /// Current state was loaded and the entity does not exist.
    NotExists,
    /// The loader failed.
    LoadFailed,
    /// Convergence actions are running.
    Converging,
    /// All triggered actions succeeded (or nothing was triggered).
    Converged,
    /// Converged, but a permission failure was downgraded to a warning.
    ConvergedWithWarnings,
    /// An action failed and the remaining actions were not run.
    ConvergeFailed,
}

/// Desired state for one identity of one resource type.
pub struct ResourceInstance {
    resource_type: Rc<ResourceType>,
    identity: RefCell<BTreeMap<String, Value>>,
    desired: RefCell<BTreeMap<String, Value>>,
    defaults: RefCell<BTreeMap<String, Value>>,
    evaluating: RefCell<BTreeSet<String>>,
    parent: Option<Rc<ResourceInstance>>,
    observed: RefCell<Option<std::result::Result<Rc<ObservedInstance>, LoadError>>>,
    state: Cell<InstanceState>,
    policy: Cell<InstancePolicy>,
}

/// Read access to an instance while one of its defaults is evaluated.
pub struct DefaultScope<'a> {
    instance: &'a ResourceInstance,
}

impl ResourceInstance {
    /// Creates an instance with already-normalized identity values.
    pub(crate) fn new(
        resource_type: Rc<ResourceType>,
        identity: BTreeMap<String, Value>,
        parent: Option<Rc<Self>>,
        policy: InstancePolicy,
    ) -> Self {
        Self {
            resource_type,
            identity: RefCell::new(identity),
            desired: RefCell::new(BTreeMap::new()),
            defaults: RefCell::new(BTreeMap::new()),
            evaluating: RefCell::new(BTreeSet::new()),
            parent,
            observed: RefCell::new(None),
            state: Cell::new(InstanceState::Created),
            policy: Cell::new(policy),
        }
    }

    /// Evaluates defaults of unsupplied identity attributes and freezes them.
    pub(crate) fn freeze_identity(&self) -> Result<()> {
        let pending: Vec<String> = self
            .resource_type
            .identity_descriptors()
            .map(|d| d.name().to_string())
            .filter(|name| !self.identity.borrow().contains_key(name))
            .collect();

        for name in pending {
            let value = self.get(&name)?;
            self.identity.borrow_mut().insert(name, value);
        }
        Ok(())
    }

    /// The instance's resource type.
    #[must_use]
    pub const fn resource_type(&self) -> &Rc<ResourceType> {
        &self.resource_type
    }

    /// The enclosing instance, for nested types.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: InstanceState) {
        self.state.set(state);
    }

    /// Policy applied to this instance's convergence actions.
    #[must_use]
    pub fn policy(&self) -> InstancePolicy {
        self.policy.get()
    }

    /// Replaces the instance's policy.
    pub fn configure(&self, policy: InstancePolicy) {
        self.policy.set(policy);
    }

    /// Frozen identity values in declaration order.
    #[must_use]
    pub fn identity_values(&self) -> Vec<(String, Value)> {
        let identity = self.identity.borrow();
        self.resource_type
            .identity_descriptors()
            .map(|d| {
                let value = identity.get(d.name()).cloned().unwrap_or_default();
                (d.name().to_string(), value)
            })
            .collect()
    }

    /// Cache key of this instance.
    #[must_use]
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(
            self.resource_type.name(),
            self.identity_values().into_iter().map(|(_, v)| v).collect(),
        )
    }

    /// Human-readable name, e.g. `file[/etc/motd]`.
    #[must_use]
    pub fn display_name(&self) -> String {
        let parts: Vec<String> = self
            .identity_values()
            .into_iter()
            .filter(|(_, v)| !v.is_absent())
            .map(|(_, v)| match v {
                Value::Str(s) => s,
                other => other.to_string(),
            })
            .collect();
        format!("{}[{}]", self.resource_type.name(), parts.join(", "))
    }

    /// Reads the desired value of an attribute.
    ///
    /// Explicitly set values win, then the memoized or freshly evaluated
    /// default, then [`Value::Absent`]. Values declared `relative_to`
    /// another attribute are anchored to it when they are relative paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is unknown or a default fails.
    pub fn get(&self, name: &str) -> Result<Value> {
        let descriptor = self.descriptor(name)?;
        let value = self.raw_get(name)?;

        if let Some(target) = descriptor.relative_target()
            && let Value::Str(path) = &value
            && !path.starts_with('/')
            && let Value::Str(base) = self.get(target)?
        {
            return Ok(Value::Str(normalize_path(&format!("{base}/{path}"))));
        }

        Ok(value)
    }

    fn raw_get(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.identity.borrow().get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.desired.borrow().get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.defaults.borrow().get(name) {
            return Ok(value.clone());
        }

        let descriptor = self.descriptor(name)?;
        let raw = match descriptor.default_rule() {
            None => return Ok(Value::Absent),
            Some(DefaultRule::Literal(value)) => value.clone(),
            Some(DefaultRule::Thunk(thunk)) => {
                if !self.evaluating.borrow_mut().insert(name.to_string()) {
                    return Err(AttributeError::DefaultCycle {
                        resource_type: self.resource_type.name().to_string(),
                        attribute: name.to_string(),
                    }
                    .into());
                }
                debug!("Evaluating default for {}.{}", self.display_name_partial(), name);
                let outcome = thunk(&DefaultScope { instance: self });
                self.evaluating.borrow_mut().remove(name);
                outcome.map_err(|err| match err {
                    ReconcileError::Attribute(inner) => ReconcileError::Attribute(inner),
                    other => AttributeError::DefaultFailed {
                        resource_type: self.resource_type.name().to_string(),
                        attribute: name.to_string(),
                        reason: other.to_string(),
                    }
                    .into(),
                })?
            }
        };

        let value = descriptor.normalize(self.resource_type.name(), raw)?;
        self.defaults
            .borrow_mut()
            .insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Sets the desired value of an attribute.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttribute`, `Coercion` or `TypeMismatch` for invalid
    /// input, and `IdentityImmutable` when an identity attribute would change.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let descriptor = self.descriptor(name)?;
        let value = descriptor.normalize(self.resource_type.name(), value.into())?;

        if descriptor.is_identity() {
            let current = self.get(name)?;
            if current != value {
                return Err(AttributeError::IdentityImmutable {
                    resource_type: self.resource_type.name().to_string(),
                    attribute: name.to_string(),
                    current: current.to_string(),
                    requested: value.to_string(),
                }
                .into());
            }
            return Ok(());
        }

        debug!("{}: desired {} = {}", self.display_name(), name, value);
        self.desired.borrow_mut().insert(name.to_string(), value);
        if self.state.get() == InstanceState::Created {
            self.state.set(InstanceState::DesiredSet);
        }
        Ok(())
    }

    /// Clears an explicitly set desired value.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttribute` for undeclared names and
    /// `IdentityImmutable` for identity attributes.
    pub fn unset(&self, name: &str) -> Result<()> {
        let descriptor = self.descriptor(name)?;
        if descriptor.is_identity() {
            return Err(AttributeError::IdentityImmutable {
                resource_type: self.resource_type.name().to_string(),
                attribute: name.to_string(),
                current: self.get(name)?.to_string(),
                requested: Value::Absent.to_string(),
            }
            .into());
        }
        self.desired.borrow_mut().remove(name);
        Ok(())
    }

    /// Returns true if the attribute was explicitly set.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.desired.borrow().contains_key(name)
    }

    /// Names of explicitly set attributes in declaration order.
    #[must_use]
    pub fn dirty_attributes(&self) -> Vec<String> {
        let desired = self.desired.borrow();
        self.resource_type
            .descriptors()
            .iter()
            .filter(|d| desired.contains_key(d.name()))
            .map(|d| d.name().to_string())
            .collect()
    }

    /// Returns the observed instance, loading it on first call.
    ///
    /// The loader runs at most once per instance. A failure is memoized
    /// as well; resolve a fresh instance after evicting this one to retry.
    ///
    /// # Errors
    ///
    /// Returns a `LoadError` if the loader failed or reported invalid values.
    pub fn observed(&self) -> std::result::Result<Rc<ObservedInstance>, LoadError> {
        if let Some(memo) = self.observed.borrow().as_ref() {
            return memo.clone();
        }

        let outcome = self.load();
        *self.observed.borrow_mut() = Some(outcome.clone());
        outcome
    }

    /// Returns true once the observed instance has been requested.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.observed.borrow().is_some()
    }

    fn load(&self) -> std::result::Result<Rc<ObservedInstance>, LoadError> {
        let resource = self.display_name();
        let previous = self.state.get();
        self.state.set(InstanceState::Loading);

        let mut record = ObservedRecord::new();
        match self.resource_type.loader() {
            Some(loader) => {
                debug!("Loading current state of {resource}");
                if let Err(source) = loader.load(self, &mut record) {
                    warn!("Failed to load current state of {resource}: {source}");
                    self.state.set(InstanceState::LoadFailed);
                    return Err(LoadError::Adapter { resource, source });
                }
            }
            None => record.mark_not_exists(),
        }

        let mut values = BTreeMap::new();
        for (name, raw) in record.take_values() {
            let Some(descriptor) = self.resource_type.descriptor(&name) else {
                self.state.set(InstanceState::LoadFailed);
                return Err(LoadError::InvalidValue {
                    resource,
                    attribute: name,
                    reason: String::from("attribute is not declared"),
                });
            };
            if descriptor.is_identity() {
                continue;
            }
            match descriptor.normalize(self.resource_type.name(), raw) {
                Ok(value) => {
                    values.insert(name, value);
                }
                Err(err) => {
                    self.state.set(InstanceState::LoadFailed);
                    return Err(LoadError::InvalidValue {
                        resource,
                        attribute: name,
                        reason: err.to_string(),
                    });
                }
            }
        }
        values.extend(self.identity_values());

        let exists = record.exists();
        let next = if exists {
            InstanceState::Loaded
        } else {
            InstanceState::NotExists
        };
        // Loading never moves a converged instance backwards.
        self.state.set(match previous {
            InstanceState::Created | InstanceState::DesiredSet => next,
            other => other,
        });
        debug!(
            "Loaded {resource}: {}",
            if exists { "exists" } else { "does not exist" }
        );

        Ok(Rc::new(ObservedInstance::new(
            Rc::clone(&self.resource_type),
            resource,
            exists,
            values,
        )))
    }

    fn descriptor(&self, name: &str) -> Result<&crate::schema::AttributeDescriptor> {
        self.resource_type.descriptor(name).ok_or_else(|| {
            AttributeError::UnknownAttribute {
                resource_type: self.resource_type.name().to_string(),
                attribute: name.to_string(),
            }
            .into()
        })
    }

    /// Display name usable while identity defaults are still being evaluated.
    fn display_name_partial(&self) -> String {
        let identity = self.identity.borrow();
        let parts: Vec<String> = identity
            .values()
            .filter(|v| !v.is_absent())
            .map(ToString::to_string)
            .collect();
        format!("{}[{}]", self.resource_type.name(), parts.join(", "))
    }
}

impl fmt::Debug for ResourceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceInstance")
            .field("resource", &self.display_name())
            .field("desired", &self.desired.borrow())
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ResourceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl DefaultScope<'_> {
    /// Reads another attribute of the instance being defaulted.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is unknown, its default fails, or it
    /// is the attribute currently being defaulted.
    pub fn get(&self, name: &str) -> Result<Value> {
        self.instance.get(name)
    }

    /// The enclosing instance, for nested types.
    #[must_use]
    pub fn parent(&self) -> Option<&ResourceInstance> {
        self.instance.parent()
    }

    /// The instance's resource type.
    #[must_use]
    pub fn resource_type(&self) -> &ResourceType {
        self.instance.resource_type()
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::DesiredSet => "desired set",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::NotExists => "not exists",
            Self::LoadFailed => "load failed",
            Self::Converging => "converging",
            Self::Converged => "converged",
            Self::ConvergedWithWarnings => "converged with warnings",
            Self::ConvergeFailed => "converge failed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AdapterError, ReconcileError};
    use crate::schema::{coerce, AttributeDescriptor, TypeConstraint, ValueKind};

    fn instance_of(ty: Rc<ResourceType>, identity: &[(&str, Value)]) -> ResourceInstance {
        let identity = identity
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        let instance = ResourceInstance::new(ty, identity, None, InstancePolicy::default());
        instance.freeze_identity().unwrap();
        instance
    }

    fn user_type(default_calls: Rc<Cell<usize>>) -> Rc<ResourceType> {
        ResourceType::builder("user")
            .attribute(AttributeDescriptor::new("name", TypeConstraint::kind(ValueKind::Str)).identity())
            .attribute(
                AttributeDescriptor::new("home", TypeConstraint::kind(ValueKind::Str)).default_with(move |scope| {
                    default_calls.set(default_calls.get() + 1);
                    let name = scope.get("name")?;
                    Ok(Value::from(format!("/home/{}", name.as_str().unwrap_or_default())))
                }),
            )
            .attribute(AttributeDescriptor::new("shell", TypeConstraint::kind(ValueKind::Str)).default_value("/bin/sh"))
            .attribute(
                AttributeDescriptor::new("profile", TypeConstraint::kind(ValueKind::Str))
                    .relative_to("home")
                    .coerce_with(coerce::normalized_path()),
            )
            .attribute(
                AttributeDescriptor::new("uid", TypeConstraint::kind(ValueKind::Int)).coerce_with(coerce::integer()),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_thunk_memoized() {
        let calls = Rc::new(Cell::new(0));
        let user = instance_of(user_type(Rc::clone(&calls)), &[("name", Value::from("alice"))]);

        assert_eq!(user.get("home").unwrap(), Value::from("/home/alice"));
        assert_eq!(user.get("home").unwrap(), Value::from("/home/alice"));
        assert_eq!(calls.get(), 1);
        assert_eq!(user.get("shell").unwrap(), Value::from("/bin/sh"));
        assert!(!user.is_set("home"));
    }

    #[test]
    fn test_explicit_value_wins_over_default() {
        let calls = Rc::new(Cell::new(0));
        let user = instance_of(user_type(Rc::clone(&calls)), &[("name", Value::from("alice"))]);
        user.set("home", "/srv/alice").unwrap();

        assert_eq!(user.get("home").unwrap(), Value::from("/srv/alice"));
        assert_eq!(calls.get(), 0);
        assert_eq!(user.state(), InstanceState::DesiredSet);
        assert_eq!(user.dirty_attributes(), ["home"]);
    }

    #[test]
    fn test_relative_to_anchors_path() {
        let user = instance_of(user_type(Rc::new(Cell::new(0))), &[("name", Value::from("bob"))]);
        user.set("profile", ".profile").unwrap();
        assert_eq!(user.get("profile").unwrap(), Value::from("/home/bob/.profile"));

        user.set("profile", "/etc/profile").unwrap();
        assert_eq!(user.get("profile").unwrap(), Value::from("/etc/profile"));
    }

    #[test]
    fn test_set_validates() {
        let user = instance_of(user_type(Rc::new(Cell::new(0))), &[("name", Value::from("bob"))]);

        user.set("uid", "1001").unwrap();
        assert_eq!(user.get("uid").unwrap(), Value::Int(1001));

        let err = user.set("uid", "many").unwrap_err();
        assert!(matches!(err, ReconcileError::Attribute(AttributeError::Coercion { .. })));

        let err = user.set("shell", 7).unwrap_err();
        assert!(matches!(err, ReconcileError::Attribute(AttributeError::TypeMismatch { .. })));

        let err = user.set("missing", 7).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Attribute(AttributeError::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_identity_is_write_once() {
        let user = instance_of(user_type(Rc::new(Cell::new(0))), &[("name", Value::from("bob"))]);

        user.set("name", "bob").unwrap();
        let err = user.set("name", "carol").unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Attribute(AttributeError::IdentityImmutable { .. })
        ));
        assert!(user.unset("name").is_err());
        assert_eq!(user.display_name(), "user[bob]");
    }

    #[test]
    fn test_default_cycle_detected() {
        let ty = ResourceType::builder("loop")
            .attribute(AttributeDescriptor::new("id", TypeConstraint::Any).identity())
            .attribute(AttributeDescriptor::new("a", TypeConstraint::Any).default_with(|scope| scope.get("a")))
            .build()
            .unwrap();
        let instance = instance_of(ty, &[("id", Value::Int(1))]);

        let err = instance.get("a").unwrap_err();
        assert!(matches!(err, ReconcileError::Attribute(AttributeError::DefaultCycle { .. })));
    }

    #[test]
    fn test_failing_default_names_attribute() {
        let ty = ResourceType::builder("host")
            .attribute(AttributeDescriptor::new("id", TypeConstraint::Any).identity())
            .attribute(
                AttributeDescriptor::new("fqdn", TypeConstraint::Any)
                    .default_with(|_| Err(ReconcileError::internal("resolver unavailable"))),
            )
            .build()
            .unwrap();
        let instance = instance_of(ty, &[("id", Value::Int(1))]);

        let err = instance.get("fqdn").unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Attribute(AttributeError::DefaultFailed { ref attribute, .. }) if attribute == "fqdn"
        ));
    }

    #[test]
    fn test_observed_without_loader_does_not_exist() {
        let user = instance_of(user_type(Rc::new(Cell::new(0))), &[("name", Value::from("bob"))]);
        let observed = user.observed().unwrap();
        assert!(!observed.exists());
        assert_eq!(observed.get("shell").unwrap(), Value::Absent);
        assert_eq!(observed.get("name").unwrap(), Value::from("bob"));
        assert_eq!(user.state(), InstanceState::NotExists);
    }

    #[test]
    fn test_load_failure_is_memoized() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let ty = ResourceType::builder("remote")
            .attribute(AttributeDescriptor::new("id", TypeConstraint::Any).identity())
            .load_with(move |_, _| {
                counter.set(counter.get() + 1);
                Err(AdapterError::network("connection reset"))
            })
            .build()
            .unwrap();
        let instance = instance_of(ty, &[("id", Value::Int(1))]);

        assert!(matches!(instance.observed(), Err(LoadError::Adapter { .. })));
        assert!(matches!(instance.observed(), Err(LoadError::Adapter { .. })));
        assert_eq!(calls.get(), 1);
        assert_eq!(instance.state(), InstanceState::LoadFailed);
    }

    #[test]
    fn test_loader_values_are_validated() {
        let ty = ResourceType::builder("remote")
            .attribute(AttributeDescriptor::new("id", TypeConstraint::Any).identity())
            .attribute(AttributeDescriptor::new("size", TypeConstraint::kind(ValueKind::Int)))
            .load_with(|_, record| {
                record.set("size", "big");
                Ok(())
            })
            .build()
            .unwrap();
        let instance = instance_of(ty, &[("id", Value::Int(1))]);

        assert!(matches!(instance.observed(), Err(LoadError::InvalidValue { .. })));
    }
}
