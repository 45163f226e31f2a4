#![warn(clippy::pedantic)]
// Noisy doc/signature lints — would require annotating most pub functions
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Style preference — keeping format!("{}", x) over format!("{x}") for complex exprs
#![allow(clippy::uninlined_format_args)]
// Intentional casts in size/timestamp handling
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
// Module structure — fs::FileSystem, workspace::Workspace by design
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cli;
pub mod config;
pub mod errors;
pub mod fs;
pub mod safety;
pub mod server;
pub mod workspace;

pub use errors::{ConstellationError, ErrorCode, FsResult};
pub use fs::{FileSystem, Workspace};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
