//! Identity cache.
//!
//! Maps identity keys to the single live instance for that identity within
//! one run. Insertion order is kept so a run can converge instances in the
//! order they were first resolved.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::schema::Value;

use super::resource::ResourceInstance;

/// Cache key: fully qualified type name plus identity values in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    resource_type: String,
    values: Vec<Value>,
}

impl IdentityKey {
    /// Creates a key.
    pub fn new(resource_type: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            resource_type: resource_type.into(),
            values,
        }
    }

    /// Type part of the key.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Identity values part of the key.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.values.iter().map(ToString::to_string).collect();
        write!(f, "{}({})", self.resource_type, parts.join(", "))
    }
}

/// Per-run map from identity key to instance.
#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: HashMap<IdentityKey, Rc<ResourceInstance>>,
    order: Vec<IdentityKey>,
}

impl IdentityCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up an instance.
    #[must_use]
    pub fn get(&self, key: &IdentityKey) -> Option<&Rc<ResourceInstance>> {
        self.entries.get(key)
    }

    /// Returns the cached instance for the key, inserting `candidate` if
    /// there is none. The returned flag is true when `candidate` was inserted.
    pub fn get_or_insert(&mut self, key: IdentityKey, candidate: Rc<ResourceInstance>) -> (Rc<ResourceInstance>, bool) {
        if let Some(existing) = self.entries.get(&key) {
            return (Rc::clone(existing), false);
        }
        self.order.push(key.clone());
        self.entries.insert(key, Rc::clone(&candidate));
        (candidate, true)
    }

    /// Removes an instance. Returns true if it was cached.
    pub fn remove(&mut self, key: &IdentityKey) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Instances in first-resolution order.
    #[must_use]
    pub fn instances(&self) -> Vec<Rc<ResourceInstance>> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key).cloned())
            .collect()
    }

    /// Number of cached instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
