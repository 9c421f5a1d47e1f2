//! Error types for the reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a run:
//! schema construction, attribute assignment, observed-state loading,
//! convergence, configuration and catalog loading.
//!
//! "Does not exist" and "nothing to change" are never errors; they are
//! ordinary success values reported by the loader and the executor.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the reconciliation engine.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Schema construction errors.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Attribute assignment and identity errors.
    #[error("Attribute error: {0}")]
    Attribute(#[from] AttributeError),

    /// Observed-state loading errors.
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// Convergence action errors.
    #[error("Convergence error: {0}")]
    Convergence(#[from] ConvergenceError),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Catalog errors.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while building a resource type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// The type declares no identity attribute.
    #[error("Resource type '{resource_type}' declares no identity attribute")]
    NoIdentity {
        /// Name of the resource type.
        resource_type: String,
    },

    /// An action owns an attribute that is not declared.
    #[error("Action '{action}' of '{resource_type}' owns undeclared attribute '{attribute}'")]
    UnknownOwnedAttribute {
        /// Name of the resource type.
        resource_type: String,
        /// Name of the action.
        action: String,
        /// The undeclared attribute.
        attribute: String,
    },

    /// An action owns an identity attribute.
    #[error("Action '{action}' of '{resource_type}' cannot own identity attribute '{attribute}'")]
    OwnsIdentity {
        /// Name of the resource type.
        resource_type: String,
        /// Name of the action.
        action: String,
        /// The identity attribute.
        attribute: String,
    },

    /// Two actions share a name.
    #[error("Duplicate action '{action}' in '{resource_type}'")]
    DuplicateAction {
        /// Name of the resource type.
        resource_type: String,
        /// The duplicated action name.
        action: String,
    },

    /// Two nested types share a name.
    #[error("Duplicate nested type '{nested}' in '{resource_type}'")]
    DuplicateNested {
        /// Name of the parent resource type.
        resource_type: String,
        /// The duplicated nested type name.
        nested: String,
    },

    /// A `relative_to` option names an undeclared attribute.
    #[error("Attribute '{attribute}' of '{resource_type}' is relative to undeclared '{target}'")]
    UnknownRelativeTarget {
        /// Name of the resource type.
        resource_type: String,
        /// The attribute carrying the option.
        attribute: String,
        /// The missing target attribute.
        target: String,
    },

    /// A chain of `relative_to` options leads back to its start.
    #[error("Attribute '{attribute}' of '{resource_type}' is relative to itself through {chain}")]
    RelativeCycle {
        /// Name of the resource type.
        resource_type: String,
        /// The attribute the cycle starts from.
        attribute: String,
        /// The attributes in the cycle, joined with ` -> `.
        chain: String,
    },

    /// A nested type was requested that the parent does not declare.
    #[error("Resource type '{resource_type}' has no nested type '{nested}'")]
    UnknownNested {
        /// Name of the parent resource type.
        resource_type: String,
        /// The requested nested type name.
        nested: String,
    },
}

/// Errors raised at attribute assignment or identity resolution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttributeError {
    /// The value does not satisfy the attribute's type constraint.
    #[error("{resource_type}.{attribute}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Name of the resource type.
        resource_type: String,
        /// Name of the attribute.
        attribute: String,
        /// Description of the accepted kinds.
        expected: String,
        /// Rendering of the rejected value.
        actual: String,
    },

    /// The value could not be normalized to its canonical form.
    #[error("{resource_type}.{attribute}: cannot coerce {actual}: {reason}")]
    Coercion {
        /// Name of the resource type.
        resource_type: String,
        /// Name of the attribute.
        attribute: String,
        /// Rendering of the rejected value.
        actual: String,
        /// Why coercion failed.
        reason: String,
    },

    /// An identity attribute was changed after creation.
    #[error("{resource_type}.{attribute} is an identity attribute and cannot change from {current} to {requested}")]
    IdentityImmutable {
        /// Name of the resource type.
        resource_type: String,
        /// Name of the attribute.
        attribute: String,
        /// The frozen value.
        current: String,
        /// The value that was requested.
        requested: String,
    },

    /// The attribute is not declared on the type.
    #[error("{resource_type} has no attribute '{attribute}'")]
    UnknownAttribute {
        /// Name of the resource type.
        resource_type: String,
        /// Name of the attribute.
        attribute: String,
    },

    /// A non-identity attribute was passed where identity values were expected.
    #[error("{resource_type}.{attribute} is not an identity attribute")]
    NotIdentity {
        /// Name of the resource type.
        resource_type: String,
        /// Name of the attribute.
        attribute: String,
    },

    /// No identity value was supplied or defaulted.
    #[error("{resource_type}: no identity value supplied")]
    MissingIdentity {
        /// Name of the resource type.
        resource_type: String,
    },

    /// A scalar matched none of the identity attributes.
    #[error("{resource_type}: {actual} matches no identity attribute")]
    NoIdentityMatch {
        /// Name of the resource type.
        resource_type: String,
        /// Rendering of the scalar.
        actual: String,
    },

    /// A default thunk read its own attribute while being evaluated.
    #[error("{resource_type}.{attribute}: default depends on itself")]
    DefaultCycle {
        /// Name of the resource type.
        resource_type: String,
        /// Name of the attribute.
        attribute: String,
    },

    /// A default thunk failed.
    #[error("{resource_type}.{attribute}: default evaluation failed: {reason}")]
    DefaultFailed {
        /// Name of the resource type.
        resource_type: String,
        /// Name of the attribute.
        attribute: String,
        /// Why evaluation failed.
        reason: String,
    },
}

/// Failure reported by an external-system adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct AdapterError {
    /// Classification of the failure.
    pub kind: AdapterErrorKind,
    /// Description of the failure.
    pub message: String,
}

/// Classification of adapter failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// Authorization or permission failure.
    PermissionDenied,
    /// Network fault.
    Network,
    /// Local IO failure.
    Io,
    /// The adapter timed out.
    Timeout,
    /// Anything else.
    Other,
}

/// Errors raised while determining current state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// The loader failed for a reason other than non-existence.
    #[error("Failed to load current state of {resource}: {source}")]
    Adapter {
        /// Display name of the resource instance.
        resource: String,
        /// Underlying adapter failure.
        source: AdapterError,
    },

    /// A per-attribute loader failed.
    #[error("Failed to load {resource}.{attribute}: {source}")]
    Attribute {
        /// Display name of the resource instance.
        resource: String,
        /// Name of the attribute.
        attribute: String,
        /// Underlying adapter failure.
        source: AdapterError,
    },

    /// The loader reported a value that violates the attribute's constraint.
    #[error("Loader for {resource} reported invalid {attribute}: {reason}")]
    InvalidValue {
        /// Display name of the resource instance.
        resource: String,
        /// Name of the attribute.
        attribute: String,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Errors raised while running convergence actions.
#[derive(Debug, Error)]
pub enum ConvergenceError {
    /// An action body failed; remaining actions were not run.
    #[error("Action '{action}' failed for {resource}: {source}")]
    ActionFailed {
        /// Display name of the resource instance.
        resource: String,
        /// Name of the failed action.
        action: String,
        /// Actions that completed before the failure.
        completed: Vec<String>,
        /// Underlying adapter failure.
        source: AdapterError,
    },
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// An option key is not recognized.
    #[error("Unknown option: {name}")]
    UnknownOption {
        /// The unrecognized key.
        name: String,
    },

    /// An option has a value of the wrong kind.
    #[error("Option {name} expects {expected}")]
    InvalidOption {
        /// The option key.
        name: String,
        /// Description of the expected value.
        expected: String,
    },
}

/// Catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog source could not be parsed.
    #[error("Failed to parse catalog: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
    },

    /// A collection is not present.
    #[error("Catalog has no collection '{collection}'")]
    UnknownCollection {
        /// The missing collection.
        collection: String,
    },

    /// A record is not present.
    #[error("Collection '{collection}' has no record '{key}'")]
    UnknownRecord {
        /// The collection searched.
        collection: String,
        /// The missing key.
        key: String,
    },
}

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

impl ReconcileError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if retrying with a fresh instance may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Load(LoadError::Adapter { source, .. } | LoadError::Attribute { source, .. }) => {
                source.is_transient()
            }
            Self::Convergence(ConvergenceError::ActionFailed { source, .. }) => {
                source.is_transient()
            }
            _ => false,
        }
    }
}

impl AdapterError {
    /// Creates an adapter error of the given kind.
    #[must_use]
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a permission failure.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::PermissionDenied, message)
    }

    /// Creates a network failure.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Network, message)
    }

    /// Creates an unclassified failure.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Other, message)
    }

    /// Returns true if this is a permission or authorization failure.
    #[must_use]
    pub const fn is_permission(&self) -> bool {
        matches!(self.kind, AdapterErrorKind::PermissionDenied)
    }

    /// Returns true if the failure may clear up on its own.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            AdapterErrorKind::Network | AdapterErrorKind::Timeout
        )
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => AdapterErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut => AdapterErrorKind::Timeout,
            _ => AdapterErrorKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

impl std::fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PermissionDenied => "permission denied",
            Self::Network => "network error",
            Self::Io => "io error",
            Self::Timeout => "timeout",
            Self::Other => "adapter error",
        };
        write!(f, "{s}")
    }
}

impl ConfigError {
    /// Creates an invalid-option error.
    #[must_use]
    pub fn invalid_option(name: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidOption {
            name: name.into(),
            expected: expected.into(),
        }
    }
}
