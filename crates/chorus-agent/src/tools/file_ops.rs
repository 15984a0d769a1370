//! File tools — create, str_replace, view — inside the workspace jail.
//!
//! Every path resolves against the workspace root with symlinks followed
//! *before* the containment check, so a symlink cannot smuggle a path out.
//! `create_file` overwrites atomically (temp file + rename); `str_replace`
//! demands exactly one occurrence and preserves the file mode; `view` lists
//! directories, refuses binaries, and windows long files.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use chorus_core::error::{ChorusError, Result};
use chorus_core::permissions::format_action;
use chorus_core::utils::short_id;

use super::base::{optional_i64, require_string, Tool};

/// How many bytes to inspect for the binary check.
const BINARY_CHECK_SIZE: usize = 8192;

/// Context lines shown around a replacement.
const CONTEXT_LINES: usize = 3;

// ─────────────────────────────────────────────
// Path jail
// ─────────────────────────────────────────────

/// Resolve `relative` inside `workspace`, erroring on escape.
///
/// Symlinks in every existing prefix are resolved before containment is
/// checked; `..` applies after resolution.
pub fn resolve_in_workspace(workspace: &Path, relative: &str) -> Result<PathBuf> {
    let ws = workspace
        .canonicalize()
        .map_err(|_| ChorusError::FileNotFound(workspace.display().to_string()))?;

    let rel = Path::new(relative);
    let mut current = if rel.is_absolute() {
        PathBuf::new()
    } else {
        ws.clone()
    };

    for component in rel.components() {
        match component {
            Component::Prefix(p) => current.push(p.as_os_str()),
            Component::RootDir => current.push(std::path::MAIN_SEPARATOR_STR),
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
            }
            Component::Normal(part) => {
                current.push(part);
                if let Ok(canonical) = current.canonicalize() {
                    current = canonical;
                }
            }
        }
    }

    if current == ws || current.starts_with(&ws) {
        Ok(current)
    } else {
        Err(ChorusError::PathTraversal(relative.to_string()))
    }
}

// ─────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────

/// Create (or atomically overwrite) a file inside the workspace.
pub fn create_file(workspace: &Path, path: &str, content: &str) -> Result<()> {
    let resolved = resolve_in_workspace(workspace, path)?;
    if let Some(parent) = resolved.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write-then-rename so readers never see a half-written file.
    let tmp = resolved.with_file_name(format!(
        ".{}.tmp-{}",
        resolved
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        short_id()
    ));
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, &resolved)?;
    Ok(())
}

/// Replace exactly one occurrence of `old_str` with `new_str`.
pub fn str_replace(workspace: &Path, path: &str, old_str: &str, new_str: &str) -> Result<String> {
    let resolved = resolve_in_workspace(workspace, path)?;
    if !resolved.exists() {
        return Err(ChorusError::FileNotFound(path.to_string()));
    }

    let content = std::fs::read_to_string(&resolved)?;
    let count = content.matches(old_str).count();
    if count == 0 {
        return Err(ChorusError::StringNotFound(path.to_string()));
    }
    if count > 1 {
        return Err(ChorusError::AmbiguousMatch {
            path: path.to_string(),
            count,
        });
    }

    let permissions = std::fs::metadata(&resolved)?.permissions();
    let updated = content.replacen(old_str, new_str, 1);
    std::fs::write(&resolved, &updated)?;
    std::fs::set_permissions(&resolved, permissions)?;

    Ok(context_around(&updated, new_str))
}

/// View a file (line-numbered, windowed) or directory (listing).
pub fn view(
    workspace: &Path,
    path: &str,
    offset: Option<usize>,
    limit: Option<usize>,
) -> Result<String> {
    let resolved = resolve_in_workspace(workspace, path)?;
    if !resolved.exists() {
        return Err(ChorusError::FileNotFound(path.to_string()));
    }

    if resolved.is_dir() {
        let mut entries: Vec<String> = std::fs::read_dir(&resolved)?
            .flatten()
            .map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                if e.path().is_dir() {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        entries.sort();
        let listing = if entries.is_empty() {
            "(empty directory)".to_string()
        } else {
            entries.join("\n")
        };
        return Ok(format!("Directory listing of {path}/:\n{listing}"));
    }

    let raw = std::fs::read(&resolved)?;
    let check = &raw[..raw.len().min(BINARY_CHECK_SIZE)];
    if check.contains(&0u8) {
        return Err(ChorusError::BinaryFile(path.to_string()));
    }

    let content = String::from_utf8_lossy(&raw);
    let lines: Vec<&str> = content.lines().collect();

    // offset is a 1-based line number
    let start = offset.map(|o| o.saturating_sub(1)).unwrap_or(0).min(lines.len());
    let end = limit.map(|l| (start + l).min(lines.len())).unwrap_or(lines.len());

    let numbered: Vec<String> = lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{}\t{}", start + i + 1, line))
        .collect();
    Ok(numbered.join("\n"))
}

/// Numbered lines around the first line containing `target`.
fn context_around(content: &str, target: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let hit = lines.iter().position(|line| line.contains(target));

    let (start, end) = match hit {
        Some(idx) => (
            idx.saturating_sub(CONTEXT_LINES),
            (idx + CONTEXT_LINES + 1).min(lines.len()),
        ),
        // Target spans lines or is empty; show the head of the file.
        None => (0, (CONTEXT_LINES * 2 + 1).min(lines.len())),
    };

    lines[start..end]
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{}\t{}", start + i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ─────────────────────────────────────────────
// Tool impls
// ─────────────────────────────────────────────

/// Creates or overwrites a file in the workspace.
pub struct CreateFileTool {
    workspace: PathBuf,
}

impl CreateFileTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite a file in the workspace. Parent directories are created \
         automatically."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn action(&self, params: &HashMap<String, Value>) -> String {
        let path = params.get("path").and_then(|v| v.as_str()).unwrap_or("");
        format_action("file", &format!("create:{path}"))
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = require_string(&params, "path")?;
        let content = require_string(&params, "content")?;
        create_file(&self.workspace, &path, &content)?;
        Ok(format!("Created {path} ({} bytes)", content.len()))
    }
}

/// Replaces exactly one occurrence of a string in a file.
pub struct StrReplaceTool {
    workspace: PathBuf,
}

impl StrReplaceTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for StrReplaceTool {
    fn name(&self) -> &str {
        "str_replace"
    }

    fn description(&self) -> &str {
        "Replace one occurrence of old_str with new_str in a file. old_str must appear \
         exactly once; include surrounding context to disambiguate."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "old_str": {
                    "type": "string",
                    "description": "Exact text to replace (must be unique in the file)"
                },
                "new_str": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_str", "new_str"]
        })
    }

    fn action(&self, params: &HashMap<String, Value>) -> String {
        let path = params.get("path").and_then(|v| v.as_str()).unwrap_or("");
        format_action("file", &format!("str_replace:{path}"))
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = require_string(&params, "path")?;
        let old_str = require_string(&params, "old_str")?;
        let new_str = require_string(&params, "new_str")?;
        let snippet = str_replace(&self.workspace, &path, &old_str, &new_str)?;
        Ok(format!("Edited {path}:\n{snippet}"))
    }
}

/// Views files (with windowing) and directories (as listings).
pub struct ViewTool {
    workspace: PathBuf,
}

impl ViewTool {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ViewTool {
    fn name(&self) -> &str {
        "view"
    }

    fn description(&self) -> &str {
        "View a file with line numbers, or list a directory. Use offset/limit to window \
         long files."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line number to start from"
                },
                "limit": {
                    "type": "integer",
                    "description": "Number of lines to return"
                }
            },
            "required": ["path"]
        })
    }

    fn action(&self, params: &HashMap<String, Value>) -> String {
        let path = params.get("path").and_then(|v| v.as_str()).unwrap_or("");
        format_action("file", &format!("view:{path}"))
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = require_string(&params, "path")?;
        let offset = optional_i64(&params, "offset").map(|v| v.max(0) as usize);
        let limit = optional_i64(&params, "limit").map(|v| v.max(0) as usize);
        Ok(view(&self.workspace, &path, offset, limit)?)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    // ── Path jail ──

    #[test]
    fn test_resolve_inside() {
        let ws = workspace();
        let resolved = resolve_in_workspace(ws.path(), "a/b.txt").unwrap();
        assert!(resolved.starts_with(ws.path().canonicalize().unwrap()));
    }

    #[test]
    fn test_resolve_root_itself() {
        let ws = workspace();
        let resolved = resolve_in_workspace(ws.path(), ".").unwrap();
        assert_eq!(resolved, ws.path().canonicalize().unwrap());
    }

    #[test]
    fn test_dotdot_escape_rejected() {
        let ws = workspace();
        let err = resolve_in_workspace(ws.path(), "../../etc/passwd").unwrap_err();
        assert!(matches!(err, ChorusError::PathTraversal(_)));
    }

    #[test]
    fn test_absolute_path_outside_rejected() {
        let ws = workspace();
        let err = resolve_in_workspace(ws.path(), "/etc/passwd").unwrap_err();
        assert!(matches!(err, ChorusError::PathTraversal(_)));
    }

    #[test]
    fn test_dotdot_within_bounds_ok() {
        let ws = workspace();
        std::fs::create_dir(ws.path().join("sub")).unwrap();
        let resolved = resolve_in_workspace(ws.path(), "sub/../file.txt").unwrap();
        assert_eq!(
            resolved,
            ws.path().canonicalize().unwrap().join("file.txt")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let ws = workspace();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), ws.path().join("link")).unwrap();

        let err = resolve_in_workspace(ws.path(), "link/secret.txt").unwrap_err();
        assert!(matches!(err, ChorusError::PathTraversal(_)));
    }

    // ── create_file ──

    #[test]
    fn test_create_and_overwrite() {
        let ws = workspace();
        create_file(ws.path(), "notes.txt", "first").unwrap();
        assert_eq!(
            std::fs::read_to_string(ws.path().join("notes.txt")).unwrap(),
            "first"
        );

        create_file(ws.path(), "notes.txt", "second").unwrap();
        assert_eq!(
            std::fs::read_to_string(ws.path().join("notes.txt")).unwrap(),
            "second"
        );
    }

    #[test]
    fn test_create_makes_parents() {
        let ws = workspace();
        create_file(ws.path(), "deep/nested/file.txt", "x").unwrap();
        assert!(ws.path().join("deep/nested/file.txt").exists());
    }

    #[test]
    fn test_create_leaves_no_temp_files() {
        let ws = workspace();
        create_file(ws.path(), "a.txt", "content").unwrap();
        let names: Vec<String> = std::fs::read_dir(ws.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt"]);
    }

    // ── str_replace ──

    #[test]
    fn test_str_replace_success() {
        let ws = workspace();
        create_file(ws.path(), "f.txt", "a b").unwrap();
        str_replace(ws.path(), "f.txt", "a", "A").unwrap();
        assert_eq!(
            std::fs::read_to_string(ws.path().join("f.txt")).unwrap(),
            "A b"
        );
    }

    #[test]
    fn test_str_replace_ambiguous() {
        let ws = workspace();
        create_file(ws.path(), "f.txt", "a b a").unwrap();
        let err = str_replace(ws.path(), "f.txt", "a", "A").unwrap_err();
        assert!(matches!(err, ChorusError::AmbiguousMatch { count: 2, .. }));
    }

    #[test]
    fn test_str_replace_not_found() {
        let ws = workspace();
        create_file(ws.path(), "f.txt", "a b").unwrap();
        let err = str_replace(ws.path(), "f.txt", "z", "Z").unwrap_err();
        assert!(matches!(err, ChorusError::StringNotFound(_)));
    }

    #[test]
    fn test_str_replace_missing_file() {
        let ws = workspace();
        let err = str_replace(ws.path(), "nope.txt", "a", "b").unwrap_err();
        assert!(matches!(err, ChorusError::FileNotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_str_replace_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let ws = workspace();
        create_file(ws.path(), "script.sh", "echo a b").unwrap();
        let path = ws.path().join("script.sh");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        str_replace(ws.path(), "script.sh", "echo a", "echo A").unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_str_replace_returns_context_snippet() {
        let ws = workspace();
        let content = (1..=10)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        create_file(ws.path(), "f.txt", &content).unwrap();

        let snippet = str_replace(ws.path(), "f.txt", "line 5", "LINE FIVE").unwrap();
        assert!(snippet.contains("5\tLINE FIVE"));
        assert!(snippet.contains("2\tline 2"));
        assert!(snippet.contains("8\tline 8"));
        assert!(!snippet.contains("line 10"));
    }

    // ── view ──

    #[test]
    fn test_view_file_with_line_numbers() {
        let ws = workspace();
        create_file(ws.path(), "f.txt", "alpha\nbeta\ngamma").unwrap();
        let out = view(ws.path(), "f.txt", None, None).unwrap();
        assert_eq!(out, "1\talpha\n2\tbeta\n3\tgamma");
    }

    #[test]
    fn test_view_offset_and_limit() {
        let ws = workspace();
        let content = (1..=20)
            .map(|i| format!("l{i}"))
            .collect::<Vec<_>>()
            .join("\n");
        create_file(ws.path(), "f.txt", &content).unwrap();

        let out = view(ws.path(), "f.txt", Some(5), Some(3)).unwrap();
        assert_eq!(out, "5\tl5\n6\tl6\n7\tl7");
    }

    #[test]
    fn test_view_directory_listing() {
        let ws = workspace();
        create_file(ws.path(), "b.txt", "").unwrap();
        std::fs::create_dir(ws.path().join("adir")).unwrap();

        let out = view(ws.path(), ".", None, None).unwrap();
        assert!(out.contains("adir/"));
        assert!(out.contains("b.txt"));
        // Subdirectory first thanks to the trailing slash not affecting sort of names
        let listing_lines: Vec<&str> = out.lines().skip(1).collect();
        assert_eq!(listing_lines, vec!["adir/", "b.txt"]);
    }

    #[test]
    fn test_view_empty_directory() {
        let ws = workspace();
        std::fs::create_dir(ws.path().join("empty")).unwrap();
        let out = view(ws.path(), "empty", None, None).unwrap();
        assert!(out.contains("(empty directory)"));
    }

    #[test]
    fn test_view_binary_rejected() {
        let ws = workspace();
        std::fs::write(ws.path().join("blob.bin"), [0x41, 0x00, 0x42]).unwrap();
        let err = view(ws.path(), "blob.bin", None, None).unwrap_err();
        assert!(matches!(err, ChorusError::BinaryFile(_)));
    }

    #[test]
    fn test_view_missing_file() {
        let ws = workspace();
        let err = view(ws.path(), "ghost.txt", None, None).unwrap_err();
        assert!(matches!(err, ChorusError::FileNotFound(_)));
    }

    // ── Tool wrappers ──

    #[tokio::test]
    async fn test_tool_action_strings() {
        let ws = workspace();
        let mut params = HashMap::new();
        params.insert("path".to_string(), json!("foo.txt"));

        assert_eq!(
            ViewTool::new(ws.path().to_path_buf()).action(&params),
            "tool:file:view:foo.txt"
        );
        assert_eq!(
            CreateFileTool::new(ws.path().to_path_buf()).action(&params),
            "tool:file:create:foo.txt"
        );
        assert_eq!(
            StrReplaceTool::new(ws.path().to_path_buf()).action(&params),
            "tool:file:str_replace:foo.txt"
        );
    }

    #[tokio::test]
    async fn test_tools_execute_end_to_end() {
        let ws = workspace();
        let create = CreateFileTool::new(ws.path().to_path_buf());
        let replace = StrReplaceTool::new(ws.path().to_path_buf());
        let viewer = ViewTool::new(ws.path().to_path_buf());

        let mut params = HashMap::new();
        params.insert("path".to_string(), json!("doc.md"));
        params.insert("content".to_string(), json!("hello world"));
        let out = create.execute(params).await.unwrap();
        assert!(out.contains("Created doc.md"));

        let mut params = HashMap::new();
        params.insert("path".to_string(), json!("doc.md"));
        params.insert("old_str".to_string(), json!("world"));
        params.insert("new_str".to_string(), json!("chorus"));
        replace.execute(params).await.unwrap();

        let mut params = HashMap::new();
        params.insert("path".to_string(), json!("doc.md"));
        let out = viewer.execute(params).await.unwrap();
        assert_eq!(out, "1\thello chorus");
    }
}
