//! Hook input types.
//!
//! These types represent the JSON a hosting tool passes to `grind hook`
//! when a file changes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::storage::DEFAULT_SESSION_ID;

/// Tools whose successful use means a file on disk changed.
pub const FILE_EDIT_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "NotebookEdit"];

/// Common input fields shared by all hooks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HookInput {
    /// Editing session identifier; scopes persisted counters.
    #[serde(default = "default_session_id")]
    pub session_id: String,
    /// Project directory. Falls back to the process working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_session_id() -> String {
    DEFAULT_SESSION_ID.to_string()
}

impl HookInput {
    /// Create a new hook input.
    pub fn new(session_id: impl Into<String>, cwd: Option<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            cwd,
        }
    }
}

/// The changed file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRef {
    /// Path as reported by the host, absolute or project-relative.
    pub path: PathBuf,
}

/// Input for the on-save hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OnSaveInput {
    /// Common hook input fields.
    #[serde(flatten)]
    pub common: HookInput,
    /// The file that was saved.
    pub file: FileRef,
}

/// Input for the post-tool-use hook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostToolUseInput {
    /// Common hook input fields.
    #[serde(flatten)]
    pub common: HookInput,
    /// The name of the tool that was invoked.
    pub tool_name: String,
    /// The tool input (as JSON value).
    #[serde(default)]
    pub tool_input: serde_json::Value,
}

impl PostToolUseInput {
    /// The file this tool call changed, if it was a file edit.
    pub fn edited_path(&self) -> Option<PathBuf> {
        if !FILE_EDIT_TOOLS.contains(&self.tool_name.as_str()) {
            return None;
        }
        ["file_path", "notebook_path"]
            .iter()
            .find_map(|field| self.tool_input.get(*field).and_then(|v| v.as_str()))
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

/// Parse hook input from JSON.
pub fn parse_input<T: for<'de> Deserialize<'de>>(json: &str) -> crate::error::Result<T> {
    serde_json::from_str(json)
        .map_err(|e| crate::error::GrindError::invalid_input(format!("Failed to parse hook input: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_on_save_input_from_json() {
        let json = r#"{
            "session_id": "s-1",
            "cwd": "/work/project",
            "file": {"path": "src/string-utils.ts"}
        }"#;

        let input: OnSaveInput = parse_input(json).unwrap();
        assert_eq!(input.common.session_id, "s-1");
        assert_eq!(input.common.cwd, Some(PathBuf::from("/work/project")));
        assert_eq!(input.file.path, PathBuf::from("src/string-utils.ts"));
    }

    #[test]
    fn test_on_save_input_defaults() {
        let input: OnSaveInput = parse_input(r#"{"file": {"path": "src/a.ts"}}"#).unwrap();
        assert_eq!(input.common.session_id, DEFAULT_SESSION_ID);
        assert!(input.common.cwd.is_none());
    }

    #[test]
    fn test_on_save_input_missing_file() {
        let result: crate::error::Result<OnSaveInput> = parse_input(r#"{"session_id": "s"}"#);
        assert!(matches!(
            result,
            Err(crate::error::GrindError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_post_tool_use_edited_path() {
        let input = PostToolUseInput {
            common: HookInput::new("s", None),
            tool_name: "Edit".to_string(),
            tool_input: json!({"file_path": "/p/src/a.ts", "old_string": "x"}),
        };
        assert_eq!(input.edited_path(), Some(PathBuf::from("/p/src/a.ts")));
    }

    #[test]
    fn test_post_tool_use_notebook_path() {
        let input = PostToolUseInput {
            common: HookInput::new("s", None),
            tool_name: "NotebookEdit".to_string(),
            tool_input: json!({"notebook_path": "src/n.ipynb"}),
        };
        assert_eq!(input.edited_path(), Some(PathBuf::from("src/n.ipynb")));
    }

    #[test]
    fn test_post_tool_use_non_edit_tool() {
        let input = PostToolUseInput {
            common: HookInput::new("s", None),
            tool_name: "Bash".to_string(),
            tool_input: json!({"command": "ls", "file_path": "src/a.ts"}),
        };
        assert!(input.edited_path().is_none());
    }

    #[test]
    fn test_post_tool_use_flattened() {
        let json = r#"{
            "session_id": "s-2",
            "cwd": "/p",
            "tool_name": "Write",
            "tool_input": {"file_path": "tests/a.test.ts", "content": ""}
        }"#;
        let input: PostToolUseInput = parse_input(json).unwrap();
        assert_eq!(input.common.session_id, "s-2");
        assert_eq!(input.edited_path(), Some(PathBuf::from("tests/a.test.ts")));
    }
}
