//! Manifest of desired file resources.
//!
//! The binary reads a YAML manifest listing the files it should manage:
//!
//! ```yaml
//! files:
//!   - path: /etc/motd
//!     content: "Welcome\n"
//!     mode: "0644"
//!     options:
//!       never_remove: true
//!   - path: /tmp/stale.lock
//!     ensure: absent
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::debug;

use crate::context::Context;
use crate::converge::InstancePolicy;
use crate::error::Result;
use crate::instance::ResourceInstance;
use crate::resources::file;
use crate::schema::{ResourceType, Value};

/// Desired resources declared by a manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Files to manage.
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// Whether a file should exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    /// The file exists with the declared attributes.
    #[default]
    Present,
    /// The file is removed.
    Absent,
}

/// One managed file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// File path.
    pub path: String,

    /// Whether the file should exist.
    #[serde(default)]
    pub ensure: Ensure,

    /// Desired content.
    #[serde(default)]
    pub content: Option<String>,

    /// Desired permission bits, as an integer or an octal string.
    #[serde(default)]
    pub mode: Option<Value>,

    /// Instance policy options.
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl Manifest {
    /// Resolves and configures one file instance per entry.
    ///
    /// Entries naming the same path after normalization share an instance;
    /// later entries overwrite the desired values of earlier ones.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry has an invalid value or option.
    pub fn declare(&self, ctx: &Context) -> Result<Vec<Rc<ResourceInstance>>> {
        let file_type = file::file_type()?;
        self.files
            .iter()
            .map(|entry| entry.declare(ctx, &file_type))
            .collect()
    }

    /// Number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileEntry {
    fn declare(&self, ctx: &Context, file_type: &Rc<ResourceType>) -> Result<Rc<ResourceInstance>> {
        let instance = ctx.resolve(file_type, [("path", self.path.as_str())])?;

        let policy = InstancePolicy::with_options(ctx.config().default_policy, &self.options)?;
        instance.configure(policy);

        match self.ensure {
            Ensure::Absent => instance.set("content", Value::Absent)?,
            Ensure::Present => {
                if let Some(content) = &self.content {
                    instance.set("content", content.as_str())?;
                }
                if let Some(mode) = &self.mode {
                    instance.set("mode", mode.clone())?;
                }
            }
        }

        debug!("Declared {instance} ({:?})", self.ensure);
        Ok(instance)
    }
}
