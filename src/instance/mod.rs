//! Resource instances and their observed state.
//!
//! This module holds the per-identity desired state, the lazily loaded
//! observed state and the identity cache that keeps one instance per
//! identity within a run.

mod cache;
mod observed;
mod resource;

pub use cache::{IdentityCache, IdentityKey};
pub use observed::{FnLoader, ObservedInstance, ObservedRecord, StateLoader};
pub use resource::{DefaultScope, InstanceState, ResourceInstance};
