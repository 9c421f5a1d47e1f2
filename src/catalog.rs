//! Record catalogs.
//!
//! A catalog is a set of named collections of records, e.g. people or
//! package metadata, used to feed identity values and defaults:
//!
//! ```yaml
//! people:
//!   alice:
//!     email: alice@example.com
//!     shell: /bin/zsh
//! ```
//!
//! The engine never reads catalogs itself; callers pass catalog values to
//! [`Context::resolve`](crate::Context::resolve) and `set`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CatalogError, Result};
use crate::schema::Value;

/// One catalog record.
pub type Record = BTreeMap<String, Value>;

/// Named collections of keyed records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    collections: BTreeMap<String, BTreeMap<String, Record>>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a catalog from YAML.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the text is not a map of collections of records.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let catalog: Self = serde_yaml::from_str(content).map_err(|e| CatalogError::ParseError {
            message: format!("YAML parse error: {e}"),
        })?;
        debug!("Parsed catalog with {} collection(s)", catalog.collections.len());
        Ok(catalog)
    }

    /// Parses a catalog from JSON.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the text is not a map of collections of records.
    pub fn from_json(content: &str) -> Result<Self> {
        let catalog: Self = serde_json::from_str(content).map_err(|e| CatalogError::ParseError {
            message: format!("JSON parse error: {e}"),
        })?;
        debug!("Parsed catalog with {} collection(s)", catalog.collections.len());
        Ok(catalog)
    }

    /// Loads a catalog file; `.json` files are read as JSON, anything else as YAML.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be read and `ParseError` if it
    /// cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading catalog from: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    /// Adds or replaces a record.
    pub fn insert(&mut self, collection: impl Into<String>, key: impl Into<String>, record: Record) {
        self.collections
            .entry(collection.into())
            .or_default()
            .insert(key.into(), record);
    }

    /// Collection names.
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Record keys of a collection.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` if the collection is missing.
    pub fn keys(&self, collection: &str) -> Result<Vec<&str>> {
        Ok(self.collection(collection)?.keys().map(String::as_str).collect())
    }

    /// Looks up a record.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` or `UnknownRecord`.
    pub fn record(&self, collection: &str, key: &str) -> Result<&Record> {
        self.collection(collection)?.get(key).ok_or_else(|| {
            CatalogError::UnknownRecord {
                collection: collection.to_string(),
                key: key.to_string(),
            }
            .into()
        })
    }

    /// Reads one field of a record, or [`Value::Absent`] if the record lacks it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` or `UnknownRecord`.
    pub fn field(&self, collection: &str, key: &str, field: &str) -> Result<Value> {
        Ok(self
            .record(collection, key)?
            .get(field)
            .cloned()
            .unwrap_or_default())
    }

    /// Returns an identity pair `(field, value)` ready for `resolve`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCollection` or `UnknownRecord`.
    pub fn identity_for(&self, collection: &str, key: &str, field: &str) -> Result<(String, Value)> {
        Ok((field.to_string(), self.field(collection, key, field)?))
    }

    fn collection(&self, collection: &str) -> Result<&BTreeMap<String, Record>> {
        self.collections.get(collection).ok_or_else(|| {
            CatalogError::UnknownCollection {
                collection: collection.to_string(),
            }
            .into()
        })
    }
}
