//! Configuration parser for engine settings and manifests.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::manifest::Manifest;
use super::settings::EngineConfig;

/// Prefix of environment variables that override engine settings.
pub const ENV_PREFIX: &str = "HALLDYLL_RECONCILE_";

/// Configuration parser for loading engine settings and manifests.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads engine settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());
        let content = read_file(path)?;
        self.parse_yaml(&content, Some(path))
    }

    /// Parses engine settings from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<EngineConfig> {
        debug!("Parsing YAML configuration");
        // An empty file means all defaults.
        if content.trim().is_empty() {
            return Ok(EngineConfig::default());
        }
        let config = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: source.map(|p| p.display().to_string()),
        })?;
        Ok(config)
    }

    /// Loads engine settings with environment variable overrides.
    ///
    /// Without a path the defaults are used. Environment variables are
    /// checked in the format `HALLDYLL_RECONCILE_<KEY>` (e.g.
    /// `HALLDYLL_RECONCILE_CONTINUE_ON_ERROR`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// override has an invalid value.
    pub fn load_with_env(&self, path: Option<&Path>) -> Result<EngineConfig> {
        let mut config = match path {
            Some(path) => self.load_file(path)?,
            None => EngineConfig::default(),
        };
        apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_manifest(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());
        let content = read_file(path)?;
        self.parse_manifest(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_manifest(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: source.map(|p| p.display().to_string()),
        })?;
        debug!("Manifest declares {} resource(s)", manifest.len());
        Ok(manifest)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    std::fs::read_to_string(path).map_err(|e| {
        ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        }
        .into()
    })
}

/// Applies `HALLDYLL_RECONCILE_*` overrides read through `lookup`.
fn apply_overrides(config: &mut EngineConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
    let flag = |key: &str| -> Result<Option<bool>> {
        let name = format!("{ENV_PREFIX}{key}");
        match lookup(name.as_str()).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None => Ok(None),
            Some("1" | "true" | "yes") => Ok(Some(true)),
            Some("0" | "false" | "no") => Ok(Some(false)),
            Some(_) => Err(ConfigError::invalid_option(name, "a boolean").into()),
        }
    };

    if let Some(value) = flag("CONTINUE_ON_ERROR")? {
        debug!("Overriding continue_on_error from environment");
        config.continue_on_error = value;
    }
    if let Some(value) = flag("NEVER_REMOVE")? {
        debug!("Overriding default_policy.never_remove from environment");
        config.default_policy.never_remove = value;
    }
    if let Some(value) = flag("PERMISSION_ERROR_ACCEPTABLE")? {
        debug!("Overriding default_policy.permission_error_acceptable from environment");
        config.default_policy.permission_error_acceptable = value;
    }
    if let Some(level) = lookup(format!("{ENV_PREFIX}LOG_LEVEL").as_str()) {
        debug!("Overriding log_level from environment");
        config.log_level = level;
    }
    Ok(())
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["halldyll.reconcile.yaml", "halldyll.reconcile.yml"];

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}
