//! Type constraints on attribute values.

use std::fmt;
use std::rc::Rc;

use super::value::{Value, ValueKind};

/// Predicate over a value.
pub type ValuePredicate = Rc<dyn Fn(&Value) -> bool>;

/// Constraint an attribute value must satisfy after coercion.
///
/// [`Value::Absent`] is accepted by every constraint: assigning it means
/// "no value" (or "should not exist" for attributes whose actions remove).
#[derive(Clone, Default)]
pub enum TypeConstraint {
    /// Any value.
    #[default]
    Any,
    /// The value must be one of these kinds.
    Kinds(Vec<ValueKind>),
    /// The value must satisfy a named predicate.
    Predicate {
        /// Description used in error messages.
        description: String,
        /// The check itself.
        check: ValuePredicate,
    },
}

impl TypeConstraint {
    /// Accepts exactly one kind.
    #[must_use]
    pub fn kind(kind: ValueKind) -> Self {
        Self::Kinds(vec![kind])
    }

    /// Accepts any of the given kinds.
    #[must_use]
    pub fn one_of(kinds: &[ValueKind]) -> Self {
        Self::Kinds(kinds.to_vec())
    }

    /// Accepts values satisfying a predicate.
    pub fn predicate(description: impl Into<String>, check: impl Fn(&Value) -> bool + 'static) -> Self {
        Self::Predicate {
            description: description.into(),
            check: Rc::new(check),
        }
    }

    /// Returns true if the value satisfies this constraint.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_absent() {
            return true;
        }
        match self {
            Self::Any => true,
            Self::Kinds(kinds) => kinds.contains(&value.kind()),
            Self::Predicate { check, .. } => check(value),
        }
    }

    /// Describes the accepted values for error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Any => String::from("any value"),
            Self::Kinds(kinds) => {
                let names: Vec<String> = kinds.iter().map(ToString::to_string).collect();
                format!("one of {{{}}}", names.join(", "))
            }
            Self::Predicate { description, .. } => description.clone(),
        }
    }
}

impl fmt::Debug for TypeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeConstraint({})", self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let c = TypeConstraint::one_of(&[ValueKind::Str, ValueKind::Int]);
        assert!(c.accepts(&Value::from("x")));
        assert!(c.accepts(&Value::Int(3)));
        assert!(!c.accepts(&Value::Bool(true)));
        assert!(c.accepts(&Value::Absent));
        assert_eq!(c.describe(), "one of {string, int}");
    }

    #[test]
    fn test_predicate() {
        let email = TypeConstraint::predicate("an email address", |v| {
            v.as_str().is_some_and(|s| s.contains('@'))
        });
        assert!(email.accepts(&Value::from("a@x.com")));
        assert!(!email.accepts(&Value::from("alice")));
        assert_eq!(email.describe(), "an email address");
    }
}
