//! Engine settings.
//!
//! These settings are loaded from `halldyll.reconcile.yaml` and control how a
//! run treats failures and which policy new instances start with.

use serde::{Deserialize, Serialize};

use crate::converge::InstancePolicy;

/// Run-wide engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Keep converging other instances after one fails.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Policy applied to every instance when it is created.
    #[serde(default)]
    pub default_policy: InstancePolicy,

    /// Log level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    String::from("info")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            default_policy: InstancePolicy::default(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Sets whether to continue on errors.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Sets the default instance policy.
    #[must_use]
    pub const fn with_default_policy(mut self, policy: InstancePolicy) -> Self {
        self.default_policy = policy;
        self
    }
}
