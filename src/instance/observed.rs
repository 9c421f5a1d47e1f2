//! Observed (current) state.
//!
//! The observed instance records what is currently true in the external
//! system for one resource instance. It is produced once by the type's
//! [`StateLoader`]; attributes with their own loader are filled in lazily,
//! the first time they are read.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{AdapterError, AttributeError, LoadError, Result};
use crate::schema::{ResourceType, Value};

use super::resource::ResourceInstance;

/// Adapter that determines the current state of an entity.
///
/// Implementations read the identity from `instance` and either fill
/// `record` or mark it as not existing. Errors are reserved for failures to
/// find out; a missing entity is not an error.
pub trait StateLoader {
    /// Loads the current state.
    ///
    /// # Errors
    ///
    /// Returns an `AdapterError` if the current state cannot be determined.
    fn load(&self, instance: &ResourceInstance, record: &mut ObservedRecord) -> std::result::Result<(), AdapterError>;
}

/// [`StateLoader`] backed by a closure.
pub struct FnLoader<F>(pub F);

impl<F> StateLoader for FnLoader<F>
where
    F: Fn(&ResourceInstance, &mut ObservedRecord) -> std::result::Result<(), AdapterError>,
{
    fn load(&self, instance: &ResourceInstance, record: &mut ObservedRecord) -> std::result::Result<(), AdapterError> {
        (self.0)(instance, record)
    }
}

/// Scratch record a loader writes into.
#[derive(Debug)]
pub struct ObservedRecord {
    exists: bool,
    values: BTreeMap<String, Value>,
}

impl ObservedRecord {
    /// Creates a record for an existing entity with no values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            exists: true,
            values: BTreeMap::new(),
        }
    }

    /// Records a current attribute value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Marks the entity as not existing.
    pub fn mark_not_exists(&mut self) {
        self.exists = false;
    }

    /// Whether the entity exists.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.exists
    }

    pub(crate) fn take_values(&mut self) -> BTreeMap<String, Value> {
        if self.exists {
            std::mem::take(&mut self.values)
        } else {
            BTreeMap::new()
        }
    }
}

impl Default for ObservedRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Current state of one resource instance.
pub struct ObservedInstance {
    resource_type: Rc<ResourceType>,
    resource: String,
    exists: Cell<bool>,
    values: RefCell<BTreeMap<String, Value>>,
    attempted: RefCell<BTreeSet<String>>,
    failures: RefCell<BTreeMap<String, LoadError>>,
}

impl ObservedInstance {
    pub(crate) fn new(
        resource_type: Rc<ResourceType>,
        resource: String,
        exists: bool,
        values: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            resource_type,
            resource,
            exists: Cell::new(exists),
            values: RefCell::new(values),
            attempted: RefCell::new(BTreeSet::new()),
            failures: RefCell::new(BTreeMap::new()),
        }
    }

    /// Whether the entity exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.exists.get()
    }

    /// Display name of the resource instance this state belongs to.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The resource type.
    #[must_use]
    pub const fn resource_type(&self) -> &Rc<ResourceType> {
        &self.resource_type
    }

    /// Reads a current attribute value.
    ///
    /// Non-existent entities yield [`Value::Absent`] for everything but
    /// identity attributes. Attributes with their own loader are loaded on
    /// the first read only.
    ///
    /// # Errors
    ///
    /// Returns `UnknownAttribute` for undeclared names and a `LoadError` if
    /// the attribute's loader fails.
    pub fn get(&self, name: &str) -> Result<Value> {
        let Some(descriptor) = self.resource_type.descriptor(name) else {
            return Err(AttributeError::UnknownAttribute {
                resource_type: self.resource_type.name().to_string(),
                attribute: name.to_string(),
            }
            .into());
        };

        if let Some(value) = self.values.borrow().get(name) {
            return Ok(value.clone());
        }
        if let Some(failure) = self.failures.borrow().get(name) {
            return Err(failure.clone().into());
        }
        if !self.exists.get() {
            return Ok(Value::Absent);
        }
        let Some(loader) = descriptor.loader() else {
            return Ok(Value::Absent);
        };
        if !self.attempted.borrow_mut().insert(name.to_string()) {
            return Ok(Value::Absent);
        }

        debug!("Lazily loading {}.{}", self.resource, name);
        let loaded = loader(self).map_err(|source| LoadError::Attribute {
            resource: self.resource.clone(),
            attribute: name.to_string(),
            source,
        });
        let value = loaded.and_then(|raw| {
            descriptor
                .normalize(self.resource_type.name(), raw)
                .map_err(|err| LoadError::InvalidValue {
                    resource: self.resource.clone(),
                    attribute: name.to_string(),
                    reason: err.to_string(),
                })
        });

        match value {
            Ok(value) => {
                self.values
                    .borrow_mut()
                    .insert(name.to_string(), value.clone());
                Ok(value)
            }
            Err(err) => {
                self.failures
                    .borrow_mut()
                    .insert(name.to_string(), err.clone());
                Err(err.into())
            }
        }
    }

    /// Reads an identity value. Identity values are always present.
    #[must_use]
    pub fn identity(&self, name: &str) -> Value {
        self.values.borrow().get(name).cloned().unwrap_or_default()
    }

    /// Records converged values as the new current state.
    ///
    /// When `exists` is false the entity was removed: only identity values
    /// are kept and every other attribute reads as [`Value::Absent`].
    pub(crate) fn refresh(&self, exists: bool, values: impl IntoIterator<Item = (String, Value)>) {
        let mut current = self.values.borrow_mut();
        let mut attempted = self.attempted.borrow_mut();
        let mut failures = self.failures.borrow_mut();
        if !exists {
            let resource_type = &self.resource_type;
            current.retain(|name, _| resource_type.descriptor(name).is_some_and(|d| d.is_identity()));
            failures.clear();
        }
        for (name, value) in values {
            attempted.insert(name.clone());
            failures.remove(&name);
            current.insert(name, value);
        }
        self.exists.set(exists);
    }
}

impl fmt::Debug for ObservedInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedInstance")
            .field("resource", &self.resource)
            .field("exists", &self.exists.get())
            .field("values", &self.values.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeDescriptor, TypeConstraint, ValueKind};

    fn owners_type(calls: Rc<Cell<usize>>) -> Rc<ResourceType> {
        ResourceType::builder("person")
            .attribute(AttributeDescriptor::new("name", TypeConstraint::kind(ValueKind::Str)).identity())
            .attribute(AttributeDescriptor::new("email", TypeConstraint::kind(ValueKind::Str)))
            .attribute(
                AttributeDescriptor::new("gems", TypeConstraint::kind(ValueKind::Set)).load_with(move |observed| {
                    calls.set(calls.get() + 1);
                    let name = observed.identity("name");
                    Ok(Value::set_of([format!("{}-gem", name.as_str().unwrap_or_default())]))
                }),
            )
            .build()
            .unwrap()
    }

    fn observed(ty: Rc<ResourceType>, exists: bool) -> ObservedInstance {
        let values = BTreeMap::from([(String::from("name"), Value::from("alice"))]);
        ObservedInstance::new(ty, String::from("person[alice]"), exists, values)
    }

    #[test]
    fn test_lazy_attribute_loaded_once() {
        let calls = Rc::new(Cell::new(0));
        let obs = observed(owners_type(Rc::clone(&calls)), true);

        assert_eq!(calls.get(), 0);
        assert_eq!(obs.get("gems").unwrap(), Value::set_of(["alice-gem"]));
        assert_eq!(obs.get("gems").unwrap(), Value::set_of(["alice-gem"]));
        assert_eq!(calls.get(), 1);
        assert_eq!(obs.get("email").unwrap(), Value::Absent);
    }

    #[test]
    fn test_not_exists_never_runs_attribute_loader() {
        let calls = Rc::new(Cell::new(0));
        let obs = observed(owners_type(Rc::clone(&calls)), false);

        assert_eq!(obs.get("gems").unwrap(), Value::Absent);
        assert_eq!(calls.get(), 0);
        assert_eq!(obs.get("name").unwrap(), Value::from("alice"));
    }

    #[test]
    fn test_refresh_marks_existing() {
        let calls = Rc::new(Cell::new(0));
        let obs = observed(owners_type(Rc::clone(&calls)), false);

        obs.refresh(true, [(String::from("gems"), Value::set_of(["x"]))]);
        assert!(obs.exists());
        assert_eq!(obs.get("gems").unwrap(), Value::set_of(["x"]));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_refresh_after_removal_keeps_identity_only() {
        let calls = Rc::new(Cell::new(0));
        let obs = observed(owners_type(Rc::clone(&calls)), true);
        assert_eq!(obs.get("gems").unwrap(), Value::set_of(["alice-gem"]));

        obs.refresh(false, [(String::from("email"), Value::Absent)]);
        assert!(!obs.exists());
        assert_eq!(obs.get("gems").unwrap(), Value::Absent);
        assert_eq!(obs.get("name").unwrap(), Value::from("alice"));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_attribute_loader_failure_is_memoized() {
        let ty = ResourceType::builder("person")
            .attribute(AttributeDescriptor::new("name", TypeConstraint::Any).identity())
            .attribute(
                AttributeDescriptor::new("gems", TypeConstraint::Any)
                    .load_with(|_| Err(AdapterError::network("registry unreachable"))),
            )
            .build()
            .unwrap();
        let obs = observed(ty, true);

        assert!(obs.get("gems").is_err());
        assert!(obs.get("gems").is_err());
    }

    #[test]
    fn test_record_not_exists_drops_values() {
        let mut record = ObservedRecord::new();
        record.set("email", "a@x.com");
        record.mark_not_exists();
        assert!(!record.exists());
        assert!(record.take_values().is_empty());
    }
}
