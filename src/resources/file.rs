//! Local file resource.
//!
//! Identity is the normalized `path`. The loader only stats the file;
//! `content` is read lazily, the first time a diff needs it.

use std::fs;
use std::io::ErrorKind;
use std::rc::Rc;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::converge::ActionContext;
use crate::error::{AdapterError, Result};
use crate::instance::{ObservedInstance, ObservedRecord, ResourceInstance};
use crate::schema::{coerce, AttributeDescriptor, ResourceType, TypeConstraint, Value, ValueKind};

/// Name of the file resource type.
pub const FILE_TYPE: &str = "file";

/// Builds the `file` resource type.
///
/// # Errors
///
/// Returns a `SchemaError` only if the declaration itself is inconsistent.
pub fn file_type() -> Result<Rc<ResourceType>> {
    ResourceType::builder(FILE_TYPE)
        .attribute(
            AttributeDescriptor::new("path", TypeConstraint::kind(ValueKind::Str))
                .identity()
                .coerce_with(coerce::normalized_path()),
        )
        .attribute(AttributeDescriptor::new("content", TypeConstraint::kind(ValueKind::Str)).load_with(read_content))
        .attribute(AttributeDescriptor::new("mode", TypeConstraint::kind(ValueKind::Int)).coerce_with(coerce::octal_mode()))
        .load_with(stat)
        .action("content", &["content"], write_content)
        .action("mode", &["mode"], set_mode)
        .build()
}

/// Hex SHA-256 of file content, used in logs instead of the content itself.
#[must_use]
pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn stat(instance: &ResourceInstance, record: &mut ObservedRecord) -> std::result::Result<(), AdapterError> {
    let path = instance
        .get("path")
        .map_err(|e| AdapterError::other(e.to_string()))?;
    let path = path.as_str().unwrap_or_default();

    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{path} does not exist");
            record.mark_not_exists();
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if metadata.is_dir() {
        return Err(AdapterError::other(format!("{path} is a directory")));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        record.set("mode", i64::from(metadata.permissions().mode() & 0o7777));
    }

    Ok(())
}

fn read_content(observed: &ObservedInstance) -> std::result::Result<Value, AdapterError> {
    let path = observed.identity("path");
    let content = fs::read_to_string(path.as_str().unwrap_or_default())?;
    debug!("Read {} ({} bytes)", path, content.len());
    Ok(Value::Str(content))
}

fn target_path(ctx: &ActionContext<'_>) -> std::result::Result<String, AdapterError> {
    ctx.desired("path")?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AdapterError::other("path is not set"))
}

fn write_content(ctx: &mut ActionContext<'_>) -> std::result::Result<(), AdapterError> {
    let path = target_path(ctx)?;

    match ctx.desired("content")? {
        Value::Absent => {
            if ctx.policy().never_remove {
                ctx.suppress(format!("{path}: removal suppressed by never_remove"));
                return Ok(());
            }
            if ctx.exists() {
                fs::remove_file(&path)?;
                info!("Removed {path}");
            }
            ctx.mark_removed();
        }
        Value::Str(content) => {
            fs::write(&path, &content)?;
            info!(
                "Wrote {path} ({} bytes, sha256 {})",
                content.len(),
                content_digest(&content)
            );
        }
        other => {
            return Err(AdapterError::other(format!("cannot write {other} to {path}")));
        }
    }
    Ok(())
}

fn set_mode(ctx: &mut ActionContext<'_>) -> std::result::Result<(), AdapterError> {
    let path = target_path(ctx)?;
    let Some(mode) = ctx.desired("mode")?.as_int() else {
        return Ok(());
    };

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let bits = u32::try_from(mode).map_err(|_| AdapterError::other(format!("invalid mode {mode}")))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(bits))?;
        info!("Set mode of {path} to {mode:o}");
    }

    #[cfg(not(unix))]
    {
        ctx.suppress(format!("{path}: mode {mode:o} not applied on this platform"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::converge::InstancePolicy;
    use crate::instance::InstanceState;

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motd");
        let ctx = Context::default();
        let ty = file_type().unwrap();

        let file = ctx.resolve(&ty, [("path", path.to_str().unwrap())]).unwrap();
        let observed = file.observed().unwrap();
        assert!(!observed.exists());
        assert_eq!(observed.get("content").unwrap(), Value::Absent);
        assert_eq!(file.state(), InstanceState::NotExists);

        file.set("content", "hello\n").unwrap();
        let report = ctx.converge(&file).unwrap();
        assert_eq!(report.action_names(), ["content"]);
        assert!(!report.existed);
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");

        assert!(ctx.converge(&file).unwrap().is_noop());
    }

    #[test]
    fn test_matching_file_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motd");
        fs::write(&path, "same").unwrap();

        let ctx = Context::default();
        let file = ctx.resolve(&file_type().unwrap(), [("path", path.to_str().unwrap())]).unwrap();
        file.set("content", "same").unwrap();

        let report = ctx.converge(&file).unwrap();
        assert!(report.is_noop());
        assert!(report.existed);
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_change_runs_only_mode_action() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.sh");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        let ctx = Context::default();
        let file = ctx.resolve(&file_type().unwrap(), [("path", path.to_str().unwrap())]).unwrap();
        file.set("content", "#!/bin/sh\n").unwrap();
        file.set("mode", "0755").unwrap();

        let report = ctx.converge(&file).unwrap();
        assert_eq!(report.action_names(), ["mode"]);
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn test_absent_content_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.lock");
        fs::write(&path, "pid").unwrap();

        let ctx = Context::default();
        let file = ctx.resolve(&file_type().unwrap(), [("path", path.to_str().unwrap())]).unwrap();
        file.set("content", Value::Absent).unwrap();

        let report = ctx.converge(&file).unwrap();
        assert_eq!(report.action_names(), ["content"]);
        assert!(!path.exists());

        assert!(!file.observed().unwrap().exists());
        let plan = ctx.plan(&file).unwrap();
        assert!(!plan.exists);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_never_remove_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.me");
        fs::write(&path, "data").unwrap();

        let ctx = Context::default();
        let file = ctx.resolve(&file_type().unwrap(), [("path", path.to_str().unwrap())]).unwrap();
        file.configure(InstancePolicy::default().with_never_remove(true));
        file.set("content", Value::Absent).unwrap();

        let report = ctx.converge(&file).unwrap();
        assert!(path.exists());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.state, InstanceState::ConvergedWithWarnings);
        assert_eq!(report.executed_count(), 0);

        assert!(file.observed().unwrap().exists());
        assert_eq!(file.observed().unwrap().get("content").unwrap(), Value::from("data"));
        assert_eq!(ctx.plan(&file).unwrap().triggered, ["content"]);
    }

    #[test]
    fn test_negative_mode_rejected_at_assignment() {
        let ctx = Context::default();
        let file = ctx.resolve(&file_type().unwrap(), [("path", "/tmp/any")]).unwrap();
        let err = file.set("mode", "-1").unwrap_err();
        assert!(matches!(
            err,
            crate::error::ReconcileError::Attribute(crate::error::AttributeError::Coercion { .. })
        ));
        assert_eq!(file.get("mode").unwrap(), Value::Absent);
    }

    #[test]
    fn test_directory_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::default();
        let file = ctx.resolve(&file_type().unwrap(), [("path", dir.path().to_str().unwrap())]).unwrap();
        assert!(file.observed().is_err());
        assert_eq!(file.state(), InstanceState::LoadFailed);
    }

    #[test]
    fn test_content_digest() {
        assert_eq!(
            content_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
