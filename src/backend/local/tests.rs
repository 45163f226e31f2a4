use super::*;
use crate::backend::{Encoding, Executor, Output};
use crate::config::LocalBackendConfig;
use crate::errors::ErrorCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn executor() -> LocalExecutor {
    LocalExecutor::new(&LocalBackendConfig::default(), None, None).unwrap()
}

fn executor_with_cap(cap: usize) -> LocalExecutor {
    LocalExecutor::new(&LocalBackendConfig::default(), Some(cap), None).unwrap()
}

#[tokio::test]
async fn exec_echo_trims_trailing_newline() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    let out = exec
        .exec(tmp.path(), "echo hello", Encoding::Utf8, None)
        .await
        .unwrap();
    assert_eq!(out, Output::Text("hello".to_string()));
}

#[tokio::test]
async fn exec_runs_in_workspace_cwd() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    exec.write_file(tmp.path(), "probe.txt", b"here").await.unwrap();
    let out = exec
        .exec(tmp.path(), "cat probe.txt", Encoding::Utf8, None)
        .await
        .unwrap();
    assert_eq!(out.into_text(), "here");
}

#[tokio::test]
async fn exec_env_is_scrubbed() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    // HOME is pinned to the workspace, not the host home.
    let out = exec
        .exec(tmp.path(), "printenv HOME", Encoding::Utf8, None)
        .await
        .unwrap();
    assert_eq!(out.into_text(), tmp.path().to_string_lossy());
    // Blocklisted names never reach the child even when set on the host.
    let out = exec
        .exec(
            tmp.path(),
            "printenv LD_PRELOAD || echo unset",
            Encoding::Utf8,
            None,
        )
        .await
        .unwrap();
    assert_eq!(out.into_text(), "unset");
}

#[tokio::test]
async fn exec_applies_custom_env() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    let env = std::collections::HashMap::from([("GREETING".to_string(), "hi there".to_string())]);
    let out = exec
        .exec(tmp.path(), "printenv GREETING", Encoding::Utf8, Some(&env))
        .await
        .unwrap();
    assert_eq!(out.into_text(), "hi there");
}

#[tokio::test]
async fn exec_drops_blocklisted_custom_env_silently() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    let env = std::collections::HashMap::from([
        ("LD_PRELOAD".to_string(), "/tmp/evil.so".to_string()),
        ("KEPT".to_string(), "yes".to_string()),
    ]);
    let out = exec
        .exec(
            tmp.path(),
            "printenv LD_PRELOAD || printenv KEPT",
            Encoding::Utf8,
            Some(&env),
        )
        .await
        .unwrap();
    assert_eq!(out.into_text(), "yes");
}

#[tokio::test]
async fn exec_rejects_nul_in_custom_env() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    let env = std::collections::HashMap::from([("BAD".to_string(), "nul\0value".to_string())]);
    let err = exec
        .exec(tmp.path(), "echo hi", Encoding::Utf8, Some(&env))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
}

#[tokio::test]
async fn exec_nonzero_exit_is_exec_failed() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    let err = exec
        .exec(tmp.path(), "ls does-not-exist-here", Encoding::Utf8, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExecFailed);
    assert!(err.to_string().contains("exit code"));
    assert_eq!(err.command(), Some("ls does-not-exist-here"));
}

#[tokio::test]
async fn exec_empty_command_rejected() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    let err = exec
        .exec(tmp.path(), "   ", Encoding::Utf8, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::EmptyCommand);
}

#[tokio::test]
async fn dangerous_without_handler_fails() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    let err = exec
        .exec(tmp.path(), "rm -rf /", Encoding::Utf8, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DangerousOperation);
    assert_eq!(err.command(), Some("rm -rf /"));
}

#[tokio::test]
async fn dangerous_with_handler_returns_empty() {
    let tmp = TempDir::new().unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_clone = seen.clone();
    let handler: crate::backend::DangerHandler = Arc::new(move |cmd: &str| {
        assert_eq!(cmd, "rm -rf /");
        seen_clone.fetch_add(1, Ordering::SeqCst);
    });
    let exec = LocalExecutor::new(&LocalBackendConfig::default(), None, Some(handler)).unwrap();
    let out = exec
        .exec(tmp.path(), "rm -rf /", Encoding::Utf8, None)
        .await
        .unwrap();
    assert_eq!(out.into_text(), "");
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn escape_verdicts_are_not_suppressed_by_handler() {
    let tmp = TempDir::new().unwrap();
    let handler: crate::backend::DangerHandler = Arc::new(|_| panic!("handler must not run"));
    let exec = LocalExecutor::new(&LocalBackendConfig::default(), None, Some(handler)).unwrap();
    let err = exec
        .exec(tmp.path(), "cd /tmp", Encoding::Utf8, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PathEscapeAttempt);
}

#[tokio::test]
async fn output_cap_applies_to_utf8_only() {
    let tmp = TempDir::new().unwrap();
    let exec = executor_with_cap(100);
    let out = exec
        .exec(
            tmp.path(),
            "printf 'A%.0s' $(seq 1 500)",
            Encoding::Utf8,
            None,
        )
        .await
        .unwrap();
    let text = out.into_text();
    assert!(text.starts_with(&"A".repeat(50)));
    assert!(text.ends_with("Full output was 500 characters, showing first 50]"));
}

#[tokio::test]
async fn buffer_encoding_returns_raw_bytes() {
    let tmp = TempDir::new().unwrap();
    let exec = executor_with_cap(10);
    let payload: Vec<u8> = (0u8..=255).collect();
    exec.write_file(tmp.path(), "blob.bin", &payload).await.unwrap();
    let out = exec
        .exec(tmp.path(), "cat blob.bin", Encoding::Buffer, None)
        .await
        .unwrap();
    // Raw bytes: no trim, no cap.
    assert_eq!(out.into_bytes(), payload);
}

#[tokio::test]
async fn write_creates_parent_directories() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    exec.write_file(tmp.path(), "deep/nested/file.txt", b"data")
        .await
        .unwrap();
    let out = exec
        .read_file(tmp.path(), "deep/nested/file.txt", Some(Encoding::Utf8))
        .await
        .unwrap();
    assert_eq!(out.into_text(), "data");
}

#[tokio::test]
async fn read_write_round_trip_preserves_content() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    let content = "line one\nline two\n";
    exec.write_file(tmp.path(), "notes.txt", content.as_bytes())
        .await
        .unwrap();
    let out = exec
        .read_file(tmp.path(), "notes.txt", Some(Encoding::Utf8))
        .await
        .unwrap();
    // File reads are not right-trimmed.
    assert_eq!(out.into_text(), content);
}

#[tokio::test]
async fn absolute_paths_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    let err = exec
        .read_file(tmp.path(), "/etc/passwd", Some(Encoding::Utf8))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AbsolutePathRejected);
    assert_eq!(err.path(), Some("/etc/passwd"));
}

#[tokio::test]
async fn traversal_paths_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    let err = exec
        .write_file(tmp.path(), "../outside.txt", b"x")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PathEscapeAttempt);
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_escape_blocks_reads() {
    let outside = TempDir::new().unwrap();
    std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
    let tmp = TempDir::new().unwrap();
    std::os::unix::fs::symlink(outside.path(), tmp.path().join("leak")).unwrap();

    let exec = executor();
    let err = exec
        .read_file(tmp.path(), "leak/secret.txt", Some(Encoding::Utf8))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::PathEscapeAttempt);
}

#[tokio::test]
async fn touch_is_idempotent_and_preserves_content() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    exec.write_file(tmp.path(), "kept.txt", b"original").await.unwrap();
    exec.touch(tmp.path(), "kept.txt").await.unwrap();
    let out = exec
        .read_file(tmp.path(), "kept.txt", Some(Encoding::Utf8))
        .await
        .unwrap();
    assert_eq!(out.into_text(), "original");
}

#[tokio::test]
async fn mkdir_recursive_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    exec.mkdir(tmp.path(), "a/b/c", true).await.unwrap();
    exec.mkdir(tmp.path(), "a/b/c", true).await.unwrap();
    assert!(exec.exists(tmp.path(), "a/b/c").await.unwrap());
}

#[tokio::test]
async fn mkdir_non_recursive_requires_parent() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    let err = exec.mkdir(tmp.path(), "no/parent", false).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::WriteFailed);
}

#[tokio::test]
async fn stat_reports_kind_and_size() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    exec.write_file(tmp.path(), "sized.bin", &[0u8; 42]).await.unwrap();
    let stat = exec.stat(tmp.path(), "sized.bin").await.unwrap();
    assert_eq!(stat.kind, FileKind::File);
    assert_eq!(stat.size, 42);
    assert!(stat.mtime > 0);

    exec.mkdir(tmp.path(), "subdir", true).await.unwrap();
    let stat = exec.stat(tmp.path(), "subdir").await.unwrap();
    assert_eq!(stat.kind, FileKind::Directory);
}

#[tokio::test]
async fn list_dir_is_sorted_with_kinds() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    exec.write_file(tmp.path(), "b.txt", b"").await.unwrap();
    exec.mkdir(tmp.path(), "a-dir", true).await.unwrap();
    let entries = exec.list_dir(tmp.path(), ".").await.unwrap();
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a-dir", "b.txt"]);
    assert_eq!(entries[0].kind, FileKind::Directory);
    assert_eq!(entries[1].kind, FileKind::File);
}

#[tokio::test]
async fn delete_tree_removes_everything() {
    let tmp = TempDir::new().unwrap();
    let ws = tmp.path().join("ws");
    let exec = executor();
    exec.ensure_workspace(&ws).await.unwrap();
    exec.write_file(&ws, "a/b.txt", b"x").await.unwrap();
    exec.delete_tree(&ws).await.unwrap();
    assert!(!ws.exists());
    // Deleting again is fine.
    exec.delete_tree(&ws).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn ensure_workspace_sets_restrictive_permissions() {
    use std::os::unix::fs::PermissionsExt;
    let tmp = TempDir::new().unwrap();
    let ws = tmp.path().join("private");
    executor().ensure_workspace(&ws).await.unwrap();
    let mode = std::fs::metadata(&ws).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o700);
}

#[tokio::test]
async fn list_workspaces_names_directories_only() {
    let tmp = TempDir::new().unwrap();
    let exec = executor();
    exec.ensure_workspace(&tmp.path().join("alpha")).await.unwrap();
    exec.ensure_workspace(&tmp.path().join("beta")).await.unwrap();
    std::fs::write(tmp.path().join("stray.txt"), "x").unwrap();
    let names = exec.list_workspaces(tmp.path()).await.unwrap();
    assert_eq!(names, vec!["alpha", "beta"]);
}
