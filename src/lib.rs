// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Halldyll Reconcile
//!
//! A declarative, idempotent resource reconciliation engine.
//!
//! ## Overview
//!
//! Callers describe typed resources, say what each should look like, and let
//! the engine make reality match:
//!
//! - Declare resource types as ordered, composable attribute schemas
//! - Resolve one shared instance per identity within a run
//! - Load current state lazily, at most once, treating "does not exist" as
//!   an ordinary outcome
//! - Run only the convergence actions whose owned attributes changed
//!
//! ## Architecture
//!
//! 1. **Desired State**: attribute values set on a [`ResourceInstance`]
//! 2. **Observed State**: an [`ObservedInstance`] filled by the type's loader
//! 3. **Executor**: diffs the two and runs triggered actions in order
//!
//! Re-running convergence against an unchanged environment runs nothing.
//!
//! ## Modules
//!
//! - [`schema`]: Values, constraints, coercions, descriptors and resource types
//! - [`instance`]: Resource instances, observed state and the identity cache
//! - [`converge`]: Diff engine, actions, policy, executor and reports
//! - [`context`]: The per-run context tying it all together
//! - [`config`]: Engine settings and manifests
//! - [`catalog`]: Record catalogs feeding identities and defaults
//! - [`resources`]: Concrete resource types (local files)
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```
//! use halldyll_reconcile::schema::{AttributeDescriptor, ResourceType, TypeConstraint, Value, ValueKind};
//! use halldyll_reconcile::Context;
//!
//! # fn main() -> halldyll_reconcile::Result<()> {
//! let service = ResourceType::builder("service")
//!     .attribute(AttributeDescriptor::new("name", TypeConstraint::kind(ValueKind::Str)).identity())
//!     .attribute(AttributeDescriptor::new("enabled", TypeConstraint::kind(ValueKind::Bool)))
//!     .action("enable", &["enabled"], |_ctx| Ok(()))
//!     .build()?;
//!
//! let ctx = Context::default();
//! let web = ctx.resolve(&service, [("name", "web")])?;
//! web.set("enabled", true)?;
//!
//! assert_eq!(ctx.converge(&web)?.executed_count(), 1);
//! assert_eq!(ctx.converge(&web)?.executed_count(), 0);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod catalog;
pub mod cli;
pub mod config;
pub mod context;
pub mod converge;
pub mod error;
pub mod instance;
pub mod resources;
pub mod schema;

// ============================================================================
// Re-exports
// ============================================================================

pub use catalog::Catalog;
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, EngineConfig, Manifest};
pub use context::Context;
pub use converge::{
    ActionContext, ConvergencePlan, ConvergenceReport, DiffEngine, InstancePolicy, RunReport,
};
pub use error::{ReconcileError, Result};
pub use instance::{InstanceState, ObservedInstance, ResourceInstance};
pub use schema::{AttributeDescriptor, AttributeSet, ResourceType, TypeConstraint, Value, ValueKind};
