//! Hook output serialization.
//!
//! The hook's stdout is the serialized `Decision`; the process exit code
//! is `Action::exit_code`.

use serde::Serialize;

use crate::core::{Action, Decision};
use crate::error::{GrindError, Result};

/// Serialize output to JSON.
pub fn to_json<T: Serialize>(output: &T) -> Result<String> {
    serde_json::to_string(output)
        .map_err(|e| GrindError::serde(format!("Failed to serialize output: {}", e)))
}

/// Serialize output to pretty JSON.
pub fn to_json_pretty<T: Serialize>(output: &T) -> Result<String> {
    serde_json::to_string_pretty(output)
        .map_err(|e| GrindError::serde(format!("Failed to serialize output: {}", e)))
}

/// Plain-text rendering of a decision for terminal use.
pub fn to_text(decision: &Decision) -> String {
    let mut out = match (&decision.action, &decision.message) {
        (_, Some(message)) => format!("{}: {}\n", decision.action, message),
        (Action::Continue, None) => "continue: all checks passed\n".to_string(),
        (action, None) => format!("{}\n", action),
    };

    if let Some(payload) = &decision.payload {
        for (key, diagnostic) in &payload.errors {
            let Some(text) = diagnostic else {
                continue;
            };
            let name = key.strip_suffix("_errors").unwrap_or(key);
            out.push_str(&format!("\n--- {} ---\n{}", name, text.trim_end()));
            out.push('\n');
        }
    }

    out
}
