//! Schema declaration for resource types.
//!
//! This module compiles attribute declarations into immutable descriptor
//! tables and assembles them, together with convergence actions and nested
//! types, into resource types:
//! - Values and value kinds
//! - Type constraints and coercions
//! - Attribute descriptors and composable descriptor sets
//! - Resource types and their builder

pub mod coerce;
mod constraint;
mod descriptor;
mod resource_type;
mod value;

pub use coerce::{normalize_path, Coercer};
pub use constraint::{TypeConstraint, ValuePredicate};
pub use descriptor::{
    AttributeDescriptor, AttributeLoader, AttributeSet, CollectionSemantics, DefaultRule,
    DefaultThunk, IdentityMatcher,
};
pub use resource_type::{ResourceType, ResourceTypeBuilder, NESTED_SEPARATOR};
pub use value::{Value, ValueKind};
