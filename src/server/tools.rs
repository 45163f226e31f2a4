//! The fixed tool set exposed over the protocol, dispatched against one
//! workspace facade. Tool results are the facade's return values rendered as
//! JSON; failures surface the typed error record.

use crate::backend::FileKind;
use crate::errors::{ConstellationError, FsResult};
use crate::fs::{LsResult, Workspace};
use crate::server::protocol::ToolDef;
use serde_json::{Value, json};

pub fn tool_definitions() -> Vec<ToolDef> {
    let tool = |name: &str, description: &str, schema: Value| ToolDef {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: schema,
    };
    vec![
        tool(
            "read_text_file",
            "Read a workspace file as UTF-8 text.",
            json!({
                "type": "object",
                "properties": {"path": {"type": "string", "description": "Workspace-relative path"}},
                "required": ["path"]
            }),
        ),
        tool(
            "read_multiple_files",
            "Read several workspace files; per-file failures are reported inline.",
            json!({
                "type": "object",
                "properties": {"paths": {"type": "array", "items": {"type": "string"}}},
                "required": ["paths"]
            }),
        ),
        tool(
            "write_file",
            "Write text to a workspace file, creating parent directories.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        ),
        tool(
            "edit_file",
            "Apply exact old/new text replacements to a workspace file.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "edits": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "old": {"type": "string"},
                                "new": {"type": "string"}
                            },
                            "required": ["old", "new"]
                        }
                    }
                },
                "required": ["path", "edits"]
            }),
        ),
        tool(
            "create_directory",
            "Create a workspace directory (recursive).",
            json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        ),
        tool(
            "list_directory",
            "List a workspace directory with entry kinds.",
            json!({
                "type": "object",
                "properties": {"path": {"type": "string", "description": "Defaults to the workspace root"}}
            }),
        ),
        tool(
            "directory_tree",
            "Nested listing of a workspace directory, depth-limited.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "depth": {"type": "integer", "minimum": 1}
                }
            }),
        ),
        tool(
            "move_file",
            "Move or rename a file inside the workspace.",
            json!({
                "type": "object",
                "properties": {
                    "from": {"type": "string"},
                    "to": {"type": "string"}
                },
                "required": ["from", "to"]
            }),
        ),
        tool(
            "search_files",
            "Find workspace files whose names contain a pattern.",
            json!({
                "type": "object",
                "properties": {
                    "root": {"type": "string", "description": "Defaults to the workspace root"},
                    "pattern": {"type": "string"}
                },
                "required": ["pattern"]
            }),
        ),
        tool(
            "get_file_info",
            "Stat a workspace path: kind, size, mtime.",
            json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        ),
        tool(
            "exec",
            "Run a shell command inside the workspace.",
            json!({
                "type": "object",
                "properties": {"command": {"type": "string"}},
                "required": ["command"]
            }),
        ),
    ]
}

fn require_str<'a>(args: &'a Value, key: &str) -> FsResult<&'a str> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| {
        ConstellationError::InvalidConfiguration(format!("missing required argument '{key}'"))
    })
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

/// Dispatch one tool call against the facade.
pub async fn call_tool(facade: &Workspace, name: &str, args: &Value) -> FsResult<Value> {
    match name {
        "read_text_file" => {
            let path = require_str(args, "path")?;
            let content = facade.read(path).await?;
            Ok(json!({"content": content}))
        }
        "read_multiple_files" => {
            let paths = args
                .get("paths")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    ConstellationError::InvalidConfiguration(
                        "missing required argument 'paths'".to_string(),
                    )
                })?;
            let mut files = Vec::with_capacity(paths.len());
            for path in paths.iter().filter_map(Value::as_str) {
                match facade.read(path).await {
                    Ok(content) => files.push(json!({"path": path, "content": content})),
                    Err(e) => files.push(json!({"path": path, "error": e.to_wire()})),
                }
            }
            Ok(json!({"files": files}))
        }
        "write_file" => {
            let path = require_str(args, "path")?;
            let content = require_str(args, "content")?;
            facade.write(path, content).await?;
            Ok(json!({"written": path}))
        }
        "edit_file" => {
            let path = require_str(args, "path")?;
            let edits = args.get("edits").and_then(Value::as_array).ok_or_else(|| {
                ConstellationError::InvalidConfiguration(
                    "missing required argument 'edits'".to_string(),
                )
            })?;
            let mut content = facade.read(path).await?;
            for (i, edit) in edits.iter().enumerate() {
                let old = edit.get("old").and_then(Value::as_str).unwrap_or_default();
                let new = edit.get("new").and_then(Value::as_str).unwrap_or_default();
                if old.is_empty() {
                    return Err(ConstellationError::InvalidConfiguration(format!(
                        "edit #{i} has an empty 'old' text"
                    )));
                }
                match content.matches(old).count() {
                    0 => {
                        return Err(ConstellationError::WriteFailed {
                            message: format!("edit #{i}: old text not found"),
                            path: path.to_string(),
                        });
                    }
                    1 => content = content.replacen(old, new, 1),
                    n => {
                        return Err(ConstellationError::WriteFailed {
                            message: format!(
                                "edit #{i}: old text appears {n} times, provide more context"
                            ),
                            path: path.to_string(),
                        });
                    }
                }
            }
            facade.write(path, &content).await?;
            Ok(json!({"edited": path, "edits": edits.len()}))
        }
        "create_directory" => {
            let path = require_str(args, "path")?;
            facade.mkdir(path, true).await?;
            Ok(json!({"created": path}))
        }
        "list_directory" => {
            let path = optional_str(args, "path").unwrap_or(".");
            let entries = facade.list_dir(path).await?;
            Ok(json!({"entries": entries}))
        }
        "directory_tree" => {
            let path = optional_str(args, "path").unwrap_or(".");
            let depth = args
                .get("depth")
                .and_then(Value::as_u64)
                .map_or(3, |d| d.clamp(1, 16) as usize);
            let tree = directory_tree(facade, path, depth).await?;
            Ok(json!({"tree": tree}))
        }
        "move_file" => {
            let from = require_str(args, "from")?;
            let to = require_str(args, "to")?;
            // Moves ride the exec surface so they work identically on both
            // sites; the command still passes through the safety analyzer.
            facade
                .exec(&format!("mv -- {} {}", shell_word(from)?, shell_word(to)?))
                .await?;
            Ok(json!({"moved": {"from": from, "to": to}}))
        }
        "search_files" => {
            let root = optional_str(args, "root").unwrap_or(".");
            let pattern = require_str(args, "pattern")?;
            let mut matches = Vec::new();
            search_files(facade, root, &pattern.to_lowercase(), 16, &mut matches).await?;
            Ok(json!({"matches": matches}))
        }
        "get_file_info" => {
            let path = require_str(args, "path")?;
            let stat = facade.stat(path).await?;
            Ok(serde_json::to_value(stat).unwrap_or(Value::Null))
        }
        "exec" => {
            let command = require_str(args, "command")?;
            let output = facade.exec(command).await?;
            Ok(json!({"output": output}))
        }
        other => Err(ConstellationError::InvalidConfiguration(format!(
            "unknown tool '{other}'"
        ))),
    }
}

/// Single-quote a path argument for the exec surface. The quoted command
/// still passes through the safety analyzer, which validates the path
/// arguments themselves.
fn shell_word(path: &str) -> FsResult<String> {
    if path.is_empty() {
        return Err(ConstellationError::EmptyPath);
    }
    if path.contains('\0') || path.contains('\n') {
        return Err(ConstellationError::InvalidConfiguration(format!(
            "path '{}' contains characters unsafe for the shell",
            path.escape_default()
        )));
    }
    Ok(format!("'{}'", path.replace('\'', r"'\''")))
}

/// Depth-limited recursive listing through the facade, so it works on both
/// execution sites.
async fn directory_tree(facade: &Workspace, path: &str, depth: usize) -> FsResult<Value> {
    let entries = facade.list_dir(path).await?;
    let mut nodes = Vec::with_capacity(entries.len());
    for entry in entries {
        let child_path = if path == "." {
            entry.name.clone()
        } else {
            format!("{path}/{}", entry.name)
        };
        let mut node = json!({"name": entry.name, "kind": entry.kind});
        if entry.kind == FileKind::Directory && depth > 1 {
            node["children"] = Box::pin(directory_tree(facade, &child_path, depth - 1)).await?;
        }
        nodes.push(node);
    }
    Ok(Value::Array(nodes))
}

/// Case-insensitive name search under `root`, depth-bounded.
async fn search_files(
    facade: &Workspace,
    root: &str,
    pattern: &str,
    depth: usize,
    matches: &mut Vec<String>,
) -> FsResult<()> {
    if depth == 0 {
        return Ok(());
    }
    let entries = facade.list_dir(root).await?;
    for entry in entries {
        let child_path = if root == "." {
            entry.name.clone()
        } else {
            format!("{root}/{}", entry.name)
        };
        if entry.name.to_lowercase().contains(pattern) {
            matches.push(child_path.clone());
        }
        if entry.kind == FileKind::Directory {
            Box::pin(search_files(facade, &child_path, pattern, depth - 1, matches)).await?;
        }
    }
    Ok(())
}
