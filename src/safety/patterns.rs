use regex::Regex;
use std::sync::LazyLock;

/// A compiled pattern with the human-readable reason reported on match.
pub struct ClassifiedPattern {
    pub regex: Regex,
    pub reason: &'static str,
}

fn compile(patterns: &[(&'static str, &'static str)]) -> Vec<ClassifiedPattern> {
    patterns
        .iter()
        .map(|(pattern, reason)| ClassifiedPattern {
            regex: Regex::new(pattern).expect("security pattern must compile"),
            reason,
        })
        .collect()
}

/// Base commands rejected outright as network clients.
pub const NETWORK_COMMANDS: &[&str] = &["wget", "curl", "nc", "ncat", "ssh", "scp", "rsync"];

/// Privilege-escalation commands. Reported as their own verdict kind so the
/// dangerous-operation handler sees them distinctly.
pub const PRIVILEGED_COMMANDS: &[&str] = &["sudo", "su"];

/// Verbs whose positional arguments are treated as candidate file paths.
pub const FILE_VERBS: &[&str] = &[
    "cat", "less", "grep", "find", "ls", "rm", "cp", "mv", "touch", "mkdir", "head", "tail",
];

/// Dangerous-operation patterns. Matched against the heredoc-masked command;
/// any hit produces a `Dangerous` verdict (or the caller's handler).
pub fn dangerous_patterns() -> &'static [ClassifiedPattern] {
    static PATTERNS: LazyLock<Vec<ClassifiedPattern>> = LazyLock::new(|| {
        compile(&[
            (
                r#"\brm\s+(?:-[A-Za-z]+\s+|--recursive\s+|--force\s+)*-[A-Za-z]*[rf][A-Za-z]*\s+(?:-[A-Za-z]+\s+|--\w+\s+)*["']?(?:/|~/?|\*|/\*)["']?\s*(?:$|[;&|])"#,
                "recursive removal rooted at /, ~, or *",
            ),
            (
                r#"\brm\s+--(?:recursive|force)\s+(?:--\w+\s+)*["']?(?:/|~/?|\*|/\*)["']?\s*(?:$|[;&|])"#,
                "recursive removal rooted at /, ~, or *",
            ),
            (
                r"(?:^|[;&|(`\n]\s*)(?:sudo|su)\b",
                "privilege escalation",
            ),
            (
                r"\bchmod\s+(?:-[A-Za-z]+\s+)*(?:[0-7]*777|[0-7]*666|a\+w|o\+w)\b",
                "permission change granting world write",
            ),
            (
                r"\bchown\s+(?:-[A-Za-z]+\s+)*root\b",
                "ownership change to root",
            ),
            (
                r"\b(?:curl|wget)\b[^|;&]*\|\s*(?:sh|bash|zsh|python[23]?)\b",
                "network fetch piped into a shell interpreter",
            ),
            (
                r"(?:^|[;&|(`\n]\s*)(?:nc|ncat|telnet|ftp)\b",
                "direct network client",
            ),
            (
                r"(?:[;&|(`\n]\s*)ssh\b",
                "direct network client",
            ),
            (r"\bkill\s+-9\b", "forced process kill"),
            (r"(?:^|[;&|(`\n]\s*)(?:killall|pkill)\b", "mass process kill"),
            (
                r"\b(?:shutdown|reboot|halt|poweroff)\b",
                "system power control",
            ),
            (r"\binit\s+[06]\b", "system runlevel change"),
            (
                r"(?:^|[;&|(`\n]\s*)(?:mount|umount|fdisk|mkfs(?:\.\w+)?|fsck)\b",
                "filesystem management",
            ),
            (
                r#"\b(?:cp|mv|ln)\b[^|;&]*(?:\s|=|['"])\.\./"#,
                "path traversal argument to copy/move/link",
            ),
            (
                r"\b(?:cp|mv|ln)\s+\.\./",
                "path traversal argument to copy/move/link",
            ),
        ])
    });
    &PATTERNS
}

/// Workspace-escape patterns. Applied only after heredoc bodies are masked.
pub fn escape_patterns() -> &'static [ClassifiedPattern] {
    static PATTERNS: LazyLock<Vec<ClassifiedPattern>> = LazyLock::new(|| {
        compile(&[
            (
                r"(?:^|[;&|(`\n]\s*)(?:cd|pushd|popd)\b",
                "directory change",
            ),
            (
                r"\bexport\s+(?:PATH|HOME|PWD)=",
                "environment rebinding via export",
            ),
            (r"\$HOME\b", "HOME expansion"),
            (
                r"\$\{(?:HOME|PATH|PWD)(?:[:=#%/].*)?\}",
                "state-rebinding variable expansion",
            ),
        ])
    });
    &PATTERNS
}

/// Extract the bodies of `$(...)` and backtick substitutions so they can be
/// re-scanned against the dangerous set.
pub fn substitution_bodies(command: &str) -> Vec<String> {
    static DOLLAR: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\$\(([^)]*)\)").expect("substitution regex"));
    static BACKTICK: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"`([^`]*)`").expect("backtick regex"));

    let mut bodies = Vec::new();
    for caps in DOLLAR.captures_iter(command) {
        bodies.push(caps[1].to_string());
    }
    for caps in BACKTICK.captures_iter(command) {
        bodies.push(caps[1].to_string());
    }
    bodies
}
