pub mod identity;
pub mod paths;

pub use identity::{
    DEFAULT_WORKSPACE, user_workspace_path, validate_user_id, validate_workspace_name,
};
pub use paths::{PathReport, is_escaping, lexical_normalize, resolve_safely, symlink_safety, validate_many};
