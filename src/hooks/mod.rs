//! Hook integration for hosting tools.
//!
//! A host invokes a hook once per file-change event:
//!
//! - **on-save**: an editor saved `file.path`
//! - **post-tool-use**: an agent tool call finished; file edits start a cycle

pub mod input;
pub mod output;
pub mod runner;

pub use input::{parse_input, FileRef, HookInput, OnSaveInput, PostToolUseInput, FILE_EDIT_TOOLS};
pub use output::{to_json, to_json_pretty, to_text};
pub use runner::{resource_key, HookRunner, HookType};
