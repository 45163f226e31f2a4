pub mod schema;
pub mod settings;

pub use schema::{
    BackendConfig, FileSystemConfig, LocalBackendConfig, RemoteAuth, RemoteBackendConfig,
    WorkspaceOptions, parse_remote_vm_host,
};
pub use settings::{AppSettings, debug_logging_enabled, get_settings, init_settings};
