pub mod heredoc;
pub mod patterns;

use crate::errors::{ConstellationError, FsResult};
use crate::workspace::paths::resolve_safely;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

pub use heredoc::mask_heredocs;

/// Why a command was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictKind {
    Dangerous,
    Escape,
    InvalidPath,
    NetworkCommand,
    PrivilegedCommand,
}

/// The analyzer's result for one command line.
#[derive(Debug, Clone)]
pub enum SafetyVerdict {
    Safe,
    Unsafe { reason: String, kind: VerdictKind },
}

impl SafetyVerdict {
    pub fn is_safe(&self) -> bool {
        matches!(self, SafetyVerdict::Safe)
    }

    fn unsafe_because(kind: VerdictKind, reason: impl Into<String>) -> Self {
        SafetyVerdict::Unsafe {
            reason: reason.into(),
            kind,
        }
    }
}

/// Token-level breakdown of a command line, produced alongside the verdict.
#[derive(Debug, Clone, Default)]
pub struct ParsedCommand {
    /// First executable token, basename'd, env assignments skipped.
    pub base: String,
    /// Remaining tokens.
    pub args: Vec<String>,
    /// Deduplicated candidate file-path arguments.
    pub file_paths: Vec<String>,
    pub has_absolute_path: bool,
    pub has_dangerous_pattern: bool,
    /// Human-readable findings, one per matched pattern class.
    pub issues: Vec<String>,
}

static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://").expect("scheme regex"));
static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]*)"|'([^']*)'"#).expect("quoted regex"));

/// Analyze one command line against a workspace. Pure: no filesystem access
/// beyond the lexical path checks, no side effects.
pub fn analyze(command: &str, workspace: &Path) -> (SafetyVerdict, ParsedCommand) {
    let masked = mask_heredocs(command);
    let tokens = shlex::split(&masked)
        .unwrap_or_else(|| masked.split_whitespace().map(String::from).collect());

    let mut parsed = parse_tokens(&masked, &tokens);
    let verdict = classify(&masked, &tokens, &mut parsed, workspace);
    (verdict, parsed)
}

/// Convenience wrapper when only the verdict matters.
pub fn is_command_safe(command: &str, workspace: &Path) -> SafetyVerdict {
    analyze(command, workspace).0
}

/// Convert an unsafe verdict into the typed error surfaced to callers.
/// `InvalidPath` re-runs the validator so the error names the offending path.
pub fn verdict_to_error(
    command: &str,
    verdict: &SafetyVerdict,
    parsed: &ParsedCommand,
    workspace: &Path,
) -> ConstellationError {
    let SafetyVerdict::Unsafe { reason, kind } = verdict else {
        return ConstellationError::ExecError {
            message: "internal: safe verdict has no error".to_string(),
            command: Some(command.to_string()),
        };
    };
    match kind {
        VerdictKind::Dangerous | VerdictKind::NetworkCommand | VerdictKind::PrivilegedCommand => {
            ConstellationError::DangerousOperation {
                command: command.to_string(),
                reason: reason.clone(),
            }
        }
        VerdictKind::Escape => ConstellationError::PathEscapeAttempt {
            path: command.to_string(),
            reason: reason.clone(),
        },
        VerdictKind::InvalidPath => parsed
            .file_paths
            .iter()
            .find_map(|p| resolve_safely(workspace, p).err())
            .unwrap_or_else(|| ConstellationError::PathEscapeAttempt {
                path: command.to_string(),
                reason: reason.clone(),
            }),
    }
}

/// Validate every extracted path; used by the batch entry point and tests.
pub fn validate_paths(parsed: &ParsedCommand, workspace: &Path) -> FsResult<()> {
    for path in &parsed.file_paths {
        resolve_safely(workspace, path)?;
    }
    Ok(())
}

fn parse_tokens(masked: &str, tokens: &[String]) -> ParsedCommand {
    let mut base = String::new();
    let mut base_index = None;
    for (i, token) in tokens.iter().enumerate() {
        // KEY=value prefixes are environment assignments, not the command
        if token.contains('=') && !token.starts_with('-') && base.is_empty() {
            let name = token.split('=').next().unwrap_or("");
            if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                continue;
            }
        }
        base = token.rsplit('/').next().unwrap_or(token).to_string();
        base_index = Some(i);
        break;
    }

    let args = base_index
        .map(|i| tokens[i + 1..].to_vec())
        .unwrap_or_default();

    let mut file_paths: Vec<String> = Vec::new();
    let mut push_path = |candidate: &str| {
        if candidate.is_empty() || SCHEME_RE.is_match(candidate) {
            return;
        }
        if !file_paths.iter().any(|p| p == candidate) {
            file_paths.push(candidate.to_string());
        }
    };

    let file_verb = patterns::FILE_VERBS.contains(&base.as_str());
    for token in &args {
        if token.starts_with('-') {
            continue;
        }
        if token.starts_with('/') || token.starts_with("./") || token.starts_with("../") {
            push_path(token);
        } else if file_verb && !token.contains('=') {
            push_path(token);
        }
    }
    // Quoted strings that look like paths are candidates too; shlex has
    // already stripped the quotes from `args`, so scan the raw line.
    for caps in QUOTED_RE.captures_iter(masked) {
        let inner = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
        if inner.contains('/') {
            push_path(inner);
        }
    }

    let has_absolute_path = file_paths.iter().any(|p| p.starts_with('/'));

    ParsedCommand {
        base,
        args,
        file_paths,
        has_absolute_path,
        has_dangerous_pattern: false,
        issues: Vec::new(),
    }
}

fn classify(
    masked: &str,
    tokens: &[String],
    parsed: &mut ParsedCommand,
    workspace: &Path,
) -> SafetyVerdict {
    if tokens.is_empty() {
        return SafetyVerdict::Safe;
    }

    let mut verdict: Option<SafetyVerdict> = None;
    let mut note = |parsed: &mut ParsedCommand, issue: String| {
        if !parsed.issues.contains(&issue) {
            parsed.issues.push(issue);
        }
    };

    if patterns::NETWORK_COMMANDS.contains(&parsed.base.as_str()) {
        let reason = format!("network command '{}' is not allowed", parsed.base);
        note(parsed, reason.clone());
        verdict = Some(SafetyVerdict::unsafe_because(
            VerdictKind::NetworkCommand,
            reason,
        ));
    }

    if patterns::PRIVILEGED_COMMANDS.contains(&parsed.base.as_str()) {
        let reason = format!("privileged command '{}' is not allowed", parsed.base);
        note(parsed, reason.clone());
        parsed.has_dangerous_pattern = true;
        verdict.get_or_insert(SafetyVerdict::unsafe_because(
            VerdictKind::PrivilegedCommand,
            reason,
        ));
    }

    for pattern in patterns::dangerous_patterns() {
        if pattern.regex.is_match(masked) {
            parsed.has_dangerous_pattern = true;
            note(parsed, pattern.reason.to_string());
            verdict.get_or_insert(SafetyVerdict::unsafe_because(
                VerdictKind::Dangerous,
                pattern.reason,
            ));
        }
    }
    for body in patterns::substitution_bodies(masked) {
        for pattern in patterns::dangerous_patterns() {
            if pattern.regex.is_match(&body) {
                parsed.has_dangerous_pattern = true;
                let reason = format!("command substitution invokes blocked operation: {}", pattern.reason);
                note(parsed, reason.clone());
                verdict.get_or_insert(SafetyVerdict::unsafe_because(
                    VerdictKind::Dangerous,
                    reason,
                ));
            }
        }
    }

    for pattern in patterns::escape_patterns() {
        if pattern.regex.is_match(masked) {
            note(parsed, pattern.reason.to_string());
            verdict.get_or_insert(SafetyVerdict::unsafe_because(
                VerdictKind::Escape,
                pattern.reason,
            ));
        }
    }
    for token in tokens {
        if SCHEME_RE.is_match(token) {
            continue;
        }
        if token.starts_with('/') {
            let reason = format!("absolute path argument '{token}'");
            note(parsed, reason.clone());
            verdict.get_or_insert(SafetyVerdict::unsafe_because(VerdictKind::Escape, reason));
        } else if token.contains("~/") || token == "~" {
            let reason = format!("home-relative argument '{token}'");
            note(parsed, reason.clone());
            verdict.get_or_insert(SafetyVerdict::unsafe_because(VerdictKind::Escape, reason));
        }
    }

    let path_error = parsed
        .file_paths
        .iter()
        .find_map(|p| resolve_safely(workspace, p).err());
    if let Some(err) = path_error {
        let reason = err.to_string();
        note(parsed, reason.clone());
        verdict.get_or_insert(SafetyVerdict::unsafe_because(
            VerdictKind::InvalidPath,
            reason,
        ));
    }

    verdict.unwrap_or(SafetyVerdict::Safe)
}
