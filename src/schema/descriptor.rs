//! Attribute descriptors and descriptor sets.
//!
//! A descriptor is the compiled declaration of one attribute: its name, type
//! constraint, identity flag, coercion, default, per-attribute loader and
//! path anchoring. Descriptors are immutable once a resource type is built.

use std::fmt;
use std::rc::Rc;

use crate::error::{AdapterError, AttributeError, Result};
use crate::instance::{DefaultScope, ObservedInstance};

use super::coerce::Coercer;
use super::constraint::{TypeConstraint, ValuePredicate};
use super::value::Value;

/// Lazily evaluated default, run at most once per instance.
pub type DefaultThunk = Rc<dyn Fn(&DefaultScope<'_>) -> Result<Value>>;

/// Loader for a single attribute of an observed instance.
pub type AttributeLoader = Rc<dyn Fn(&ObservedInstance) -> std::result::Result<Value, AdapterError>>;

/// Default rule for an attribute.
#[derive(Clone)]
pub enum DefaultRule {
    /// A fixed value.
    Literal(Value),
    /// A thunk evaluated in instance context.
    Thunk(DefaultThunk),
}

/// How collection values of an attribute are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionSemantics {
    /// Lists are equal when their element sequences are equal.
    #[default]
    Ordered,
    /// Lists are equal when their element sets are equal.
    Unordered,
}

/// Explicit shape test used to pick an identity attribute for a bare scalar.
#[derive(Clone)]
pub struct IdentityMatcher {
    /// Description of the accepted shape.
    pub description: String,
    /// The shape test.
    pub check: ValuePredicate,
}

/// Declaration of a single attribute.
#[derive(Clone)]
pub struct AttributeDescriptor {
    name: String,
    constraint: TypeConstraint,
    identity: bool,
    coerce: Option<Coercer>,
    default: Option<DefaultRule>,
    load_value: Option<AttributeLoader>,
    relative_to: Option<String>,
    collection: CollectionSemantics,
    matcher: Option<IdentityMatcher>,
}

impl AttributeDescriptor {
    /// Declares an attribute with a type constraint and no options.
    pub fn new(name: impl Into<String>, constraint: TypeConstraint) -> Self {
        Self {
            name: name.into(),
            constraint,
            identity: false,
            coerce: None,
            default: None,
            load_value: None,
            relative_to: None,
            collection: CollectionSemantics::Ordered,
            matcher: None,
        }
    }

    /// Marks the attribute as part of the identity key.
    #[must_use]
    pub const fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    /// Sets a literal default.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultRule::Literal(value.into()));
        self
    }

    /// Sets a lazily evaluated default.
    #[must_use]
    pub fn default_with(mut self, thunk: impl Fn(&DefaultScope<'_>) -> Result<Value> + 'static) -> Self {
        self.default = Some(DefaultRule::Thunk(Rc::new(thunk)));
        self
    }

    /// Sets the coercion applied before the constraint check.
    #[must_use]
    pub fn coerce_with(mut self, coerce: Coercer) -> Self {
        self.coerce = Some(coerce);
        self
    }

    /// Sets the per-attribute loader used on observed instances.
    #[must_use]
    pub fn load_with(
        mut self,
        loader: impl Fn(&ObservedInstance) -> std::result::Result<Value, AdapterError> + 'static,
    ) -> Self {
        self.load_value = Some(Rc::new(loader));
        self
    }

    /// Resolves relative path values against another attribute.
    #[must_use]
    pub fn relative_to(mut self, attribute: impl Into<String>) -> Self {
        self.relative_to = Some(attribute.into());
        self
    }

    /// Compares list values as sets.
    #[must_use]
    pub const fn unordered(mut self) -> Self {
        self.collection = CollectionSemantics::Unordered;
        self
    }

    /// Declares the shape a bare scalar must have to target this identity attribute.
    #[must_use]
    pub fn identity_matcher(
        mut self,
        description: impl Into<String>,
        check: impl Fn(&Value) -> bool + 'static,
    ) -> Self {
        self.matcher = Some(IdentityMatcher {
            description: description.into(),
            check: Rc::new(check),
        });
        self
    }

    /// Attribute name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type constraint.
    #[must_use]
    pub const fn constraint(&self) -> &TypeConstraint {
        &self.constraint
    }

    /// Whether this attribute is part of the identity key.
    #[must_use]
    pub const fn is_identity(&self) -> bool {
        self.identity
    }

    /// Default rule, if any.
    #[must_use]
    pub const fn default_rule(&self) -> Option<&DefaultRule> {
        self.default.as_ref()
    }

    /// Per-attribute loader, if any.
    #[must_use]
    pub const fn loader(&self) -> Option<&AttributeLoader> {
        self.load_value.as_ref()
    }

    /// Attribute this one is anchored to, if any.
    #[must_use]
    pub fn relative_target(&self) -> Option<&str> {
        self.relative_to.as_deref()
    }

    /// Collection comparison semantics.
    #[must_use]
    pub const fn collection(&self) -> CollectionSemantics {
        self.collection
    }

    /// Identity shape matcher, if any.
    #[must_use]
    pub const fn matcher(&self) -> Option<&IdentityMatcher> {
        self.matcher.as_ref()
    }

    /// Coerces a raw value and checks it against the constraint.
    ///
    /// # Errors
    ///
    /// Returns `Coercion` if the coercion rejects the value and
    /// `TypeMismatch` if the coerced value violates the constraint.
    pub fn normalize(&self, resource_type: &str, raw: Value) -> std::result::Result<Value, AttributeError> {
        if raw.is_absent() {
            return Ok(raw);
        }

        let value = match &self.coerce {
            Some(coerce) => {
                let rendered = raw.to_string();
                coerce(raw).map_err(|reason| AttributeError::Coercion {
                    resource_type: resource_type.to_string(),
                    attribute: self.name.clone(),
                    actual: rendered,
                    reason,
                })?
            }
            None => raw,
        };

        if !self.constraint.accepts(&value) {
            return Err(AttributeError::TypeMismatch {
                resource_type: resource_type.to_string(),
                attribute: self.name.clone(),
                expected: self.constraint.describe(),
                actual: value.to_string(),
            });
        }

        Ok(value)
    }

    /// Returns true if a bare scalar should be taken as this identity attribute.
    ///
    /// An explicit matcher decides on its own; otherwise the value must
    /// survive coercion and the constraint.
    #[must_use]
    pub fn claims_scalar(&self, resource_type: &str, raw: &Value) -> bool {
        if !self.identity || raw.is_absent() {
            return false;
        }
        match &self.matcher {
            Some(matcher) => (matcher.check)(raw),
            None => self.normalize(resource_type, raw.clone()).is_ok(),
        }
    }
}

impl fmt::Debug for AttributeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttributeDescriptor")
            .field("name", &self.name)
            .field("constraint", &self.constraint)
            .field("identity", &self.identity)
            .field("has_coerce", &self.coerce.is_some())
            .field("has_default", &self.default.is_some())
            .field("has_loader", &self.load_value.is_some())
            .field("relative_to", &self.relative_to)
            .field("collection", &self.collection)
            .finish()
    }
}

/// A named, ordered table of descriptors that can be composed into types.
#[derive(Debug, Clone, Default)]
pub struct AttributeSet {
    name: String,
    descriptors: Vec<AttributeDescriptor>,
}

impl AttributeSet {
    /// Creates an empty set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptors: Vec::new(),
        }
    }

    /// Adds a descriptor. A same-named descriptor already in the set is replaced.
    #[must_use]
    pub fn attribute(mut self, descriptor: AttributeDescriptor) -> Self {
        merge_descriptor(&mut self.descriptors, descriptor);
        self
    }

    /// Set name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Descriptors in declaration order.
    #[must_use]
    pub fn descriptors(&self) -> &[AttributeDescriptor] {
        &self.descriptors
    }
}

/// Merges a descriptor into an ordered table: a same-named entry is replaced
/// wholesale in its original position, otherwise the descriptor is appended.
pub(crate) fn merge_descriptor(table: &mut Vec<AttributeDescriptor>, descriptor: AttributeDescriptor) {
    if let Some(existing) = table.iter_mut().find(|d| d.name == descriptor.name) {
        *existing = descriptor;
    } else {
        table.push(descriptor);
    }
}
