//! Diff and convergence.
//!
//! This module compares desired against observed state and runs the
//! convergence actions whose owned attributes changed:
//! - Diff engine and set deltas
//! - Convergence actions and the context their bodies see
//! - Per-instance policy
//! - Executor, plans and reports

mod action;
mod diff;
mod executor;
mod policy;
mod report;

pub use action::{ActionBody, ActionContext, ConvergenceAction};
pub use diff::{values_equal, AttributeChange, DiffEngine, InstanceDiff, SetDelta};
pub use executor::ConvergenceExecutor;
pub use policy::InstancePolicy;
pub use report::{ActionOutcome, ActionStatus, ConvergencePlan, ConvergenceReport, RunReport};
