//! Per-instance convergence policy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::schema::Value;

/// Options that soften an instance's convergence actions.
///
/// The engine itself only consults `permission_error_acceptable`; action
/// bodies consult `never_remove` when they compute removals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstancePolicy {
    /// Suppress removal-type sub-actions.
    #[serde(default, alias = "neverRemove")]
    pub never_remove: bool,
    /// Downgrade permission failures to warnings.
    #[serde(default, alias = "permissionErrorAcceptable")]
    pub permission_error_acceptable: bool,
}

impl InstancePolicy {
    /// Suppresses removals.
    #[must_use]
    pub const fn with_never_remove(mut self, never_remove: bool) -> Self {
        self.never_remove = never_remove;
        self
    }

    /// Downgrades permission failures to warnings.
    #[must_use]
    pub const fn with_permission_error_acceptable(mut self, acceptable: bool) -> Self {
        self.permission_error_acceptable = acceptable;
        self
    }

    /// Builds a policy from a configuration map, starting from `self`.
    ///
    /// Keys may be written in `snake_case` or `camelCase`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOption` for unrecognized keys and `InvalidOption` for
    /// non-boolean values.
    pub fn with_options(mut self, options: &BTreeMap<String, Value>) -> Result<Self, ConfigError> {
        for (key, value) in options {
            let slot = match key.as_str() {
                "never_remove" | "neverRemove" => &mut self.never_remove,
                "permission_error_acceptable" | "permissionErrorAcceptable" => {
                    &mut self.permission_error_acceptable
                }
                _ => {
                    return Err(ConfigError::UnknownOption { name: key.clone() });
                }
            };
            *slot = value
                .as_bool()
                .ok_or_else(|| ConfigError::invalid_option(key.clone(), "a boolean"))?;
        }
        Ok(self)
    }

    /// Builds a policy from a configuration map.
    ///
    /// # Errors
    ///
    /// See [`InstancePolicy::with_options`].
    pub fn from_options(options: &BTreeMap<String, Value>) -> Result<Self, ConfigError> {
        Self::default().with_options(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_from_options_accepts_both_spellings() {
        let policy = InstancePolicy::from_options(&options(&[
            ("neverRemove", Value::Bool(true)),
            ("permission_error_acceptable", Value::Bool(true)),
        ]))
        .unwrap();
        assert!(policy.never_remove);
        assert!(policy.permission_error_acceptable);
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = InstancePolicy::from_options(&options(&[("force", Value::Bool(true))])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownOption { .. }));
    }

    #[test]
    fn test_non_boolean_rejected() {
        let err = InstancePolicy::from_options(&options(&[("never_remove", Value::from("yes"))])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { .. }));
    }

    #[test]
    fn test_with_options_keeps_base() {
        let base = InstancePolicy::default().with_never_remove(true);
        let policy = base
            .with_options(&options(&[("permissionErrorAcceptable", Value::Bool(true))]))
            .unwrap();
        assert!(policy.never_remove);
        assert!(policy.permission_error_acceptable);
    }
}
