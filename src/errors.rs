use serde::Serialize;
use thiserror::Error;

/// Typed error hierarchy for constellation-fs.
///
/// Use at module boundaries (executors, router, facade, tool server). Internal
/// leaf functions may use `anyhow::Result` in binary glue only — every public
/// operation surfaces a `ConstellationError` with a stable code.
#[derive(Debug, Error)]
pub enum ConstellationError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Backend not implemented: {0}")]
    BackendNotImplemented(String),

    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("Missing required utilities: {0}")]
    MissingUtilities(String),

    #[error("Absolute paths are not allowed: {path}")]
    AbsolutePathRejected { path: String },

    #[error("Path escapes the workspace: {path} ({reason})")]
    PathEscapeAttempt { path: String, reason: String },

    #[error("Command execution failed: {message}")]
    ExecFailed {
        message: String,
        command: Option<String>,
    },

    #[error("Command could not be started: {message}")]
    ExecError {
        message: String,
        command: Option<String>,
    },

    #[error("Read failed: {message}")]
    ReadFailed { message: String, path: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String, path: String },

    #[error("Listing failed: {message}")]
    LsFailed { message: String, path: String },

    #[error("Command must not be empty")]
    EmptyCommand,

    #[error("Path must not be empty")]
    EmptyPath,

    #[error("Dangerous operation blocked: {reason}")]
    DangerousOperation { command: String, reason: String },
}

/// Convenience alias for results using `ConstellationError`.
pub type FsResult<T> = std::result::Result<T, ConstellationError>;

/// The closed set of stable error codes surfaced to callers and over the
/// tool protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "BACKEND_NOT_IMPLEMENTED")]
    BackendNotImplemented,
    #[serde(rename = "UNSUPPORTED_BACKEND")]
    UnsupportedBackend,
    #[serde(rename = "MISSING_UTILITIES")]
    MissingUtilities,
    #[serde(rename = "ABSOLUTE_PATH_REJECTED")]
    AbsolutePathRejected,
    #[serde(rename = "PATH_ESCAPE_ATTEMPT")]
    PathEscapeAttempt,
    #[serde(rename = "EXEC_FAILED")]
    ExecFailed,
    #[serde(rename = "EXEC_ERROR")]
    ExecError,
    #[serde(rename = "READ_FAILED")]
    ReadFailed,
    #[serde(rename = "WRITE_FAILED")]
    WriteFailed,
    #[serde(rename = "LS_FAILED")]
    LsFailed,
    #[serde(rename = "EMPTY_COMMAND")]
    EmptyCommand,
    #[serde(rename = "EMPTY_PATH")]
    EmptyPath,
    #[serde(rename = "DANGEROUS_OPERATION")]
    DangerousOperation,
    #[serde(rename = "INVALID_CONFIGURATION")]
    InvalidConfiguration,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BackendNotImplemented => "BACKEND_NOT_IMPLEMENTED",
            ErrorCode::UnsupportedBackend => "UNSUPPORTED_BACKEND",
            ErrorCode::MissingUtilities => "MISSING_UTILITIES",
            ErrorCode::AbsolutePathRejected => "ABSOLUTE_PATH_REJECTED",
            ErrorCode::PathEscapeAttempt => "PATH_ESCAPE_ATTEMPT",
            ErrorCode::ExecFailed => "EXEC_FAILED",
            ErrorCode::ExecError => "EXEC_ERROR",
            ErrorCode::ReadFailed => "READ_FAILED",
            ErrorCode::WriteFailed => "WRITE_FAILED",
            ErrorCode::LsFailed => "LS_FAILED",
            ErrorCode::EmptyCommand => "EMPTY_COMMAND",
            ErrorCode::EmptyPath => "EMPTY_PATH",
            ErrorCode::DangerousOperation => "DANGEROUS_OPERATION",
            ErrorCode::InvalidConfiguration => "INVALID_CONFIGURATION",
        }
    }
}

/// Wire shape of an error as surfaced by the tool server:
/// `{code, message, command?, path?}`.
#[derive(Debug, Clone, Serialize)]
pub struct WireError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ConstellationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConstellationError::InvalidConfiguration(_) => ErrorCode::InvalidConfiguration,
            ConstellationError::BackendNotImplemented(_) => ErrorCode::BackendNotImplemented,
            ConstellationError::UnsupportedBackend(_) => ErrorCode::UnsupportedBackend,
            ConstellationError::MissingUtilities(_) => ErrorCode::MissingUtilities,
            ConstellationError::AbsolutePathRejected { .. } => ErrorCode::AbsolutePathRejected,
            ConstellationError::PathEscapeAttempt { .. } => ErrorCode::PathEscapeAttempt,
            ConstellationError::ExecFailed { .. } => ErrorCode::ExecFailed,
            ConstellationError::ExecError { .. } => ErrorCode::ExecError,
            ConstellationError::ReadFailed { .. } => ErrorCode::ReadFailed,
            ConstellationError::WriteFailed { .. } => ErrorCode::WriteFailed,
            ConstellationError::LsFailed { .. } => ErrorCode::LsFailed,
            ConstellationError::EmptyCommand => ErrorCode::EmptyCommand,
            ConstellationError::EmptyPath => ErrorCode::EmptyPath,
            ConstellationError::DangerousOperation { .. } => ErrorCode::DangerousOperation,
        }
    }

    /// The offending command, when the error is command-scoped.
    pub fn command(&self) -> Option<&str> {
        match self {
            ConstellationError::ExecFailed { command, .. }
            | ConstellationError::ExecError { command, .. } => command.as_deref(),
            ConstellationError::DangerousOperation { command, .. } => Some(command),
            _ => None,
        }
    }

    /// The offending path, when the error is path-scoped.
    pub fn path(&self) -> Option<&str> {
        match self {
            ConstellationError::AbsolutePathRejected { path }
            | ConstellationError::PathEscapeAttempt { path, .. }
            | ConstellationError::ReadFailed { path, .. }
            | ConstellationError::WriteFailed { path, .. }
            | ConstellationError::LsFailed { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn to_wire(&self) -> WireError {
        WireError {
            code: self.code().as_str(),
            message: self.to_string(),
            command: self.command().map(str::to_string),
            path: self.path().map(str::to_string),
        }
    }

    /// Shared rejection used when the channel drains pending operations.
    pub fn connection_lost(description: &str, why: &str) -> Self {
        ConstellationError::ExecFailed {
            message: format!("Connection lost: {why}"),
            command: Some(description.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_failed_carries_command() {
        let err = ConstellationError::ExecFailed {
            message: "exit code 2".into(),
            command: Some("ls /nope".into()),
        };
        assert_eq!(err.code(), ErrorCode::ExecFailed);
        assert_eq!(err.command(), Some("ls /nope"));
        assert_eq!(err.path(), None);
    }

    #[test]
    fn absolute_path_carries_path() {
        let err = ConstellationError::AbsolutePathRejected {
            path: "/etc/passwd".into(),
        };
        assert_eq!(err.code(), ErrorCode::AbsolutePathRejected);
        assert_eq!(err.path(), Some("/etc/passwd"));
    }

    #[test]
    fn wire_shape_skips_empty_context() {
        let err = ConstellationError::EmptyCommand;
        let wire = serde_json::to_value(err.to_wire()).unwrap();
        assert_eq!(wire["code"], "EMPTY_COMMAND");
        assert!(wire.get("command").is_none());
        assert!(wire.get("path").is_none());
    }

    #[test]
    fn connection_lost_message_is_shared_shape() {
        let err = ConstellationError::connection_lost("exec: sleep 60", "peer closed");
        assert_eq!(err.code(), ErrorCode::ExecFailed);
        assert!(err.to_string().contains("Connection lost: peer closed"));
    }

    #[test]
    fn code_strings_are_stable() {
        assert_eq!(ErrorCode::DangerousOperation.as_str(), "DANGEROUS_OPERATION");
        assert_eq!(ErrorCode::PathEscapeAttempt.as_str(), "PATH_ESCAPE_ATTEMPT");
        assert_eq!(
            serde_json::to_value(ErrorCode::BackendNotImplemented).unwrap(),
            "BACKEND_NOT_IMPLEMENTED"
        );
    }
}
