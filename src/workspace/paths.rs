use crate::errors::{ConstellationError, FsResult};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Normalize a path lexically (without touching the filesystem). Resolves
/// `.` and `..` components so that `/workspace/../etc/passwd` normalizes to
/// `/etc/passwd` rather than passing through as if it starts with
/// `/workspace`.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                // Pop the last normal component (but never pop past root)
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

/// True iff normalizing `target` against `workspace` lands outside the
/// workspace. Absolute targets escape by definition.
pub fn is_escaping(workspace: &Path, target: &str) -> bool {
    let target_path = Path::new(target);
    if target_path.is_absolute() {
        return true;
    }
    let resolved = lexical_normalize(&workspace.join(target_path));
    !resolved.starts_with(workspace)
}

/// Resolve `target` against `workspace`, failing with an error that carries
/// both inputs when the result would leave the workspace.
pub fn resolve_safely(workspace: &Path, target: &str) -> FsResult<PathBuf> {
    if target.is_empty() {
        return Err(ConstellationError::EmptyPath);
    }
    let target_path = Path::new(target);
    if target_path.is_absolute() {
        return Err(ConstellationError::AbsolutePathRejected {
            path: target.to_string(),
        });
    }
    let resolved = lexical_normalize(&workspace.join(target_path));
    if !resolved.starts_with(workspace) {
        return Err(ConstellationError::PathEscapeAttempt {
            path: target.to_string(),
            reason: format!("resolves outside workspace {}", workspace.display()),
        });
    }
    Ok(resolved)
}

/// Walk every existing segment of `target` under `workspace` and reject if
/// any symlink points outside the workspace.
///
/// Nonexistent trailing segments terminate the walk as safe: writes may
/// create them. Unexpected I/O errors are treated as unsafe.
pub fn symlink_safety(workspace: &Path, target: &Path) -> FsResult<()> {
    let relative = target.strip_prefix(workspace).unwrap_or(target);
    let mut current = workspace.to_path_buf();

    for component in relative.components() {
        let Component::Normal(segment) = component else {
            continue;
        };
        current.push(segment);

        let meta = match std::fs::symlink_metadata(&current) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(ConstellationError::PathEscapeAttempt {
                    path: target.display().to_string(),
                    reason: format!("cannot inspect segment '{}': {e}", current.display()),
                });
            }
        };

        if meta.file_type().is_symlink() {
            let link_target = std::fs::read_link(&current).map_err(|e| {
                ConstellationError::PathEscapeAttempt {
                    path: target.display().to_string(),
                    reason: format!("cannot read symlink '{}': {e}", current.display()),
                }
            })?;
            let resolved = if link_target.is_absolute() {
                lexical_normalize(&link_target)
            } else {
                let parent = current.parent().unwrap_or(workspace);
                lexical_normalize(&parent.join(&link_target))
            };
            if !resolved.starts_with(workspace) {
                debug!(
                    segment = %current.display(),
                    destination = %resolved.display(),
                    "symlink leaves workspace"
                );
                return Err(ConstellationError::PathEscapeAttempt {
                    path: target.display().to_string(),
                    reason: format!(
                        "symlink '{}' points outside the workspace",
                        segment.to_string_lossy()
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Result of a batch validation: each offender with its reason, plus a final
/// flag for the whole set.
#[derive(Debug, Clone)]
pub struct PathReport {
    pub offenders: Vec<(String, String)>,
    pub valid: bool,
}

pub fn validate_many(workspace: &Path, paths: &[&str]) -> PathReport {
    let mut offenders = Vec::new();
    for &path in paths {
        if let Err(e) = resolve_safely(workspace, path)
            .and_then(|resolved| symlink_safety(workspace, &resolved))
        {
            offenders.push((path.to_string(), e.to_string()));
        }
    }
    PathReport {
        valid: offenders.is_empty(),
        offenders,
    }
}
