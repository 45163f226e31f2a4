use crate::errors::{ConstellationError, FsResult};
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::info;

/// Process-wide one-shot configuration. Must be set exactly once before the
/// first `FileSystem` is constructed; reads before the set fail with
/// `INVALID_CONFIGURATION`.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub app_id: String,
    pub workspace_root: PathBuf,
}

static SETTINGS: RwLock<Option<AppSettings>> = RwLock::new(None);

fn default_workspace_root() -> PathBuf {
    std::env::var("CONSTELLATION_WORKSPACE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("constellation-fs"))
}

/// Establish the process-wide `app_id` and workspace root.
///
/// `workspace_root` falls back to `CONSTELLATION_WORKSPACE_ROOT`, then the
/// system temp dir + `constellation-fs`. Calling twice is a configuration
/// error: routers constructed under the first value must not observe a second.
pub fn init_settings(app_id: &str, workspace_root: Option<PathBuf>) -> FsResult<()> {
    crate::workspace::identity::validate_identifier(app_id, "app id")?;

    let mut guard = SETTINGS.write().unwrap_or_else(std::sync::PoisonError::into_inner);
    if guard.is_some() {
        return Err(ConstellationError::InvalidConfiguration(
            "application settings are already initialized".to_string(),
        ));
    }
    let root = workspace_root.unwrap_or_else(default_workspace_root);
    info!(app_id, root = %root.display(), "application settings initialized");
    *guard = Some(AppSettings {
        app_id: app_id.to_string(),
        workspace_root: root,
    });
    Ok(())
}

/// Read the one-shot settings. Fails if `init_settings` has not run.
pub fn get_settings() -> FsResult<AppSettings> {
    SETTINGS
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone()
        .ok_or_else(|| {
            ConstellationError::InvalidConfiguration(
                "application settings not initialized; call init_settings first".to_string(),
            )
        })
}

/// Testing hook: clear the one-shot so each test can establish its own root.
/// Not for production use.
#[doc(hidden)]
pub fn reset_settings() {
    *SETTINGS
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
}

/// Whether verbose channel/exec tracing was requested via
/// `CONSTELLATION_DEBUG_LOGGING=true`.
pub fn debug_logging_enabled() -> bool {
    std::env::var("CONSTELLATION_DEBUG_LOGGING")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// The one-shot is process-global; unit tests that touch it serialize here.
#[cfg(test)]
pub(crate) fn test_guard() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_before_init_fails() {
        let _guard = test_guard();
        reset_settings();
        let err = get_settings().unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn init_is_one_shot() {
        let _guard = test_guard();
        reset_settings();
        init_settings("app-one", Some(PathBuf::from("/tmp/cfs-test"))).unwrap();
        let settings = get_settings().unwrap();
        assert_eq!(settings.app_id, "app-one");
        assert_eq!(settings.workspace_root, PathBuf::from("/tmp/cfs-test"));

        let err = init_settings("app-two", None).unwrap_err();
        assert_eq!(err.code(), crate::errors::ErrorCode::InvalidConfiguration);
        // First value still visible
        assert_eq!(get_settings().unwrap().app_id, "app-one");
        reset_settings();
    }

    #[test]
    fn init_rejects_invalid_app_id() {
        let _guard = test_guard();
        reset_settings();
        assert!(init_settings("bad/app", None).is_err());
        assert!(get_settings().is_err());
    }
}
