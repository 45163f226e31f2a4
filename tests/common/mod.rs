use std::path::Path;
use std::sync::OnceLock;
use tempfile::TempDir;

static ROOT: OnceLock<TempDir> = OnceLock::new();

/// Initialize the process-wide settings once per test binary and return the
/// workspace root. Tests isolate through distinct user ids.
pub fn setup_root() -> &'static Path {
    ROOT.get_or_init(|| {
        let tmp = TempDir::new().expect("create workspace root");
        constellation_fs::config::init_settings("cfs-it", Some(tmp.path().to_path_buf()))
            .expect("initialize settings");
        tmp
    })
    .path()
}
