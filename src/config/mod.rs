//! Configuration module for the reconciliation engine.
//!
//! This module handles all configuration-related functionality:
//! - Engine settings from `halldyll.reconcile.yaml`
//! - Environment overrides and `.env` loading
//! - Manifests of desired file resources

mod manifest;
mod parser;
mod settings;

pub use manifest::{Ensure, FileEntry, Manifest};
pub use parser::{find_config_file, ConfigParser, DEFAULT_CONFIG_FILES, ENV_PREFIX};
pub use settings::EngineConfig;
