use crate::errors::{ConstellationError, FsResult};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Variables never forwarded to the execution site. Dropped silently from
/// caller-supplied environments and explicitly absent from the base env.
pub const ENV_BLOCKLIST: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "IFS",
    "BASH_ENV",
    "ENV",
];

/// Variables callers may override, but only with a warning: they reshape how
/// the workspace shell resolves everything else.
pub const ENV_PROTECTED: &[&str] = &["PATH", "HOME", "PWD", "TMPDIR", "TMP", "SHELL", "USER"];

/// System PATH handed to workspace shells. No caller-controlled entries.
pub const SYSTEM_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Validate a caller-supplied environment and return the entries to apply,
/// in deterministic (sorted) order.
///
/// Blocklisted names are silently dropped; protected names pass with a warn;
/// values containing NUL, newline, or `;` fail the call.
pub fn validate_custom_env(env: &HashMap<String, String>) -> FsResult<Vec<(String, String)>> {
    let mut entries: Vec<(String, String)> = Vec::with_capacity(env.len());
    for (name, value) in env {
        if ENV_BLOCKLIST.contains(&name.as_str()) {
            debug!(name = %name, "dropping blocklisted environment variable");
            continue;
        }
        if let Some(bad) = ['\0', '\n', ';'].iter().find(|c| value.contains(**c)) {
            return Err(ConstellationError::InvalidConfiguration(format!(
                "environment variable '{name}' contains forbidden character '{}'",
                bad.escape_default()
            )));
        }
        if ENV_PROTECTED.contains(&name.as_str()) {
            warn!(name = %name, "overriding protected environment variable");
        }
        entries.push((name.clone(), value.clone()));
    }
    entries.sort();
    Ok(entries)
}

/// The scrubbed base environment for a workspace shell. Everything the child
/// sees is listed here; the blocklist is absent because the child env starts
/// empty.
pub fn base_env(workspace: &Path, shell: &str) -> Vec<(String, String)> {
    let workspace_str = workspace.to_string_lossy().into_owned();
    vec![
        ("PATH".to_string(), SYSTEM_PATH.to_string()),
        (
            "USER".to_string(),
            std::env::var("USER").unwrap_or_else(|_| "nobody".to_string()),
        ),
        ("SHELL".to_string(), shell.to_string()),
        ("PWD".to_string(), workspace_str.clone()),
        ("HOME".to_string(), workspace_str.clone()),
        (
            "TMPDIR".to_string(),
            workspace.join(".tmp").to_string_lossy().into_owned(),
        ),
        ("LANG".to_string(), "C".to_string()),
        ("LC_ALL".to_string(), "C".to_string()),
    ]
}

/// Serialize env entries as a `K='v'` shell prefix for the remote site.
/// Inner single quotes use the `'\''` trick; values were validated before.
pub fn shell_env_prefix(entries: &[(String, String)]) -> String {
    let mut prefix = String::new();
    for (name, value) in entries {
        let quoted = value.replace('\'', r"'\''");
        prefix.push_str(name);
        prefix.push_str("='");
        prefix.push_str(&quoted);
        prefix.push_str("' ");
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn blocklisted_names_are_dropped_silently() {
        let env = env_of(&[("LD_PRELOAD", "/tmp/evil.so"), ("FOO", "bar")]);
        let entries = validate_custom_env(&env).unwrap();
        assert_eq!(entries, vec![("FOO".to_string(), "bar".to_string())]);
    }

    #[test]
    fn forbidden_value_characters_fail() {
        for bad in ["nul\0here", "line\nbreak", "a;b"] {
            let env = env_of(&[("FOO", bad)]);
            assert!(validate_custom_env(&env).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn protected_names_pass_through() {
        let env = env_of(&[("PATH", "/custom/bin"), ("TMP", "/scratch")]);
        let entries = validate_custom_env(&env).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn entries_are_sorted_for_determinism() {
        let env = env_of(&[("ZED", "1"), ("ALPHA", "2"), ("MID", "3")]);
        let names: Vec<_> = validate_custom_env(&env)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(names, vec!["ALPHA", "MID", "ZED"]);
    }

    #[test]
    fn base_env_pins_workspace_dirs() {
        let ws = Path::new("/ws/app/alice/default");
        let env = base_env(ws, "bash");
        let get = |name: &str| {
            env.iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(get("HOME"), "/ws/app/alice/default");
        assert_eq!(get("PWD"), "/ws/app/alice/default");
        assert_eq!(get("TMPDIR"), "/ws/app/alice/default/.tmp");
        assert_eq!(get("LC_ALL"), "C");
        assert!(env.iter().all(|(k, _)| !ENV_BLOCKLIST.contains(&k.as_str())));
    }

    #[test]
    fn shell_prefix_quotes_single_quotes() {
        let entries = vec![("MSG".to_string(), "it's here".to_string())];
        assert_eq!(shell_env_prefix(&entries), r"MSG='it'\''s here' ");
    }
}
