use crate::errors::{ConstellationError, FsResult};
use std::path::PathBuf;

/// Workspace name used when the caller does not supply one.
pub const DEFAULT_WORKSPACE: &str = "default";

/// Shared identifier rules for user ids, workspace names, and the app id:
/// non-empty, `[A-Za-z0-9._-]` only, no path separators, no `..`.
pub fn validate_identifier(value: &str, what: &str) -> FsResult<()> {
    if value.trim().is_empty() {
        return Err(ConstellationError::InvalidConfiguration(format!(
            "{what} must not be empty"
        )));
    }
    if value.contains('/') || value.contains('\\') {
        return Err(ConstellationError::InvalidConfiguration(format!(
            "{what} must not contain path separators: '{value}'"
        )));
    }
    if value.contains("..") {
        return Err(ConstellationError::InvalidConfiguration(format!(
            "{what} must not contain '..': '{value}'"
        )));
    }
    if let Some(ch) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(ConstellationError::InvalidConfiguration(format!(
            "{what} contains invalid character '{}': '{value}'",
            ch.escape_default()
        )));
    }
    Ok(())
}

pub fn validate_user_id(user_id: &str) -> FsResult<()> {
    validate_identifier(user_id, "user id")
}

pub fn validate_workspace_name(name: &str) -> FsResult<()> {
    validate_identifier(name, "workspace name")
}

/// Canonical workspace path: `<workspace_root>/<app_id>/<user_id>/<name>`.
/// Forward slashes on every site; the remote peer is POSIX.
pub fn user_workspace_path(user_id: &str, workspace_name: &str) -> FsResult<PathBuf> {
    validate_user_id(user_id)?;
    validate_workspace_name(workspace_name)?;
    let settings = crate::config::get_settings()?;
    Ok(settings
        .workspace_root
        .join(&settings.app_id)
        .join(user_id)
        .join(workspace_name))
}
