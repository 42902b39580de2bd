//! Hook runner for Grind.
//!
//! Turns a host's file-change event into one escalation controller cycle.
//! The runner resolves the changed path against the project directory,
//! filters it through the trigger patterns, opens the session's state
//! store, and builds a controller from configuration.

use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use crate::checks::checks_from_config;
use crate::config::Config;
use crate::core::{Decision, EscalationController};
use crate::error::{GrindError, Result};
use crate::hooks::input::{parse_input, OnSaveInput, PostToolUseInput};
use crate::hooks::output::to_json;
use crate::storage::StateStore;

/// Hook type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    /// Editor save event carrying `file.path`.
    OnSave,
    /// Agent tool-call event; file edits start a cycle.
    PostToolUse,
}

impl HookType {
    /// Parse hook type from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "on-save" | "onsave" | "on_save" => Some(Self::OnSave),
            "post-tool-use" | "posttooluse" | "post_tool_use" => Some(Self::PostToolUse),
            _ => None,
        }
    }
}

/// Hook runner context.
///
/// `open_store` opens the state store for an editing session id.
pub struct HookRunner<S, F>
where
    S: StateStore,
    F: Fn(&str) -> Result<S>,
{
    config: Config,
    open_store: F,
    default_cwd: PathBuf,
}

impl<S, F> HookRunner<S, F>
where
    S: StateStore,
    F: Fn(&str) -> Result<S>,
{
    /// Create a new hook runner.
    ///
    /// `default_cwd` is used when the hook input carries no `cwd`.
    pub fn new(config: Config, open_store: F, default_cwd: impl Into<PathBuf>) -> Self {
        Self {
            config,
            open_store,
            default_cwd: default_cwd.into(),
        }
    }

    /// Run a hook with input from stdin.
    pub fn run(&self, hook_type: HookType) -> Result<Decision> {
        let input = read_stdin()?;
        self.decide(hook_type, &input)
    }

    /// Run a hook with provided input, returning the decision JSON.
    pub fn run_with_input(&self, hook_type: HookType, input: &str) -> Result<String> {
        to_json(&self.decide(hook_type, input)?)
    }

    /// Run a hook with provided input.
    pub fn decide(&self, hook_type: HookType, input: &str) -> Result<Decision> {
        match hook_type {
            HookType::OnSave => self.handle_on_save(input),
            HookType::PostToolUse => self.handle_post_tool_use(input),
        }
    }

    fn handle_on_save(&self, input: &str) -> Result<Decision> {
        let hook_input: OnSaveInput = parse_input(input)?;
        let cwd = self.cwd_for(hook_input.common.cwd.as_deref());
        self.evaluate_path(&hook_input.common.session_id, &hook_input.file.path, &cwd)
    }

    fn handle_post_tool_use(&self, input: &str) -> Result<Decision> {
        let hook_input: PostToolUseInput = parse_input(input)?;

        let Some(path) = hook_input.edited_path() else {
            tracing::debug!(tool = %hook_input.tool_name, "tool call did not edit a file");
            return Ok(Decision::proceed());
        };

        let cwd = self.cwd_for(hook_input.common.cwd.as_deref());
        self.evaluate_path(&hook_input.common.session_id, &path, &cwd)
    }

    /// Run one cycle for `path`, if it matches the trigger patterns.
    ///
    /// Paths outside the patterns yield `continue` without touching state.
    pub fn evaluate_path(&self, session_id: &str, path: &Path, cwd: &Path) -> Result<Decision> {
        let resource = resource_key(path, cwd)?;

        if !self.config.trigger.matches(Path::new(&resource)) {
            tracing::debug!(resource = %resource, "path outside trigger patterns");
            return Ok(Decision::proceed());
        }

        let controller = self.controller(session_id, cwd)?;
        controller.evaluate(&resource)
    }

    /// Build a controller over the session's store with the configured
    /// checks running from `cwd`.
    pub fn controller(&self, session_id: &str, cwd: &Path) -> Result<EscalationController<S>> {
        self.config.validate()?;
        let store = (self.open_store)(session_id)?;
        let checks = checks_from_config(&self.config.checks, cwd);
        EscalationController::new(store, checks, self.config.controller.settings())
    }

    fn cwd_for(&self, cwd: Option<&Path>) -> PathBuf {
        cwd.map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_cwd.clone())
    }
}

/// Project-relative, `/`-separated resource key for `path`.
///
/// Absolute paths under `cwd` are made relative; `.` components are
/// dropped. Absolute paths elsewhere are kept as-is.
pub fn resource_key(path: &Path, cwd: &Path) -> Result<String> {
    let relative = if path.is_absolute() {
        path.strip_prefix(cwd).unwrap_or(path)
    } else {
        path
    };

    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;
    for component in relative.components() {
        match component {
            Component::CurDir => {}
            Component::RootDir => absolute = true,
            Component::Prefix(p) => parts.push(p.as_os_str().to_string_lossy().into_owned()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
        }
    }

    if parts.is_empty() {
        return Err(GrindError::invalid_input(format!(
            "'{}' does not name a file",
            path.display()
        )));
    }

    let joined = parts.join("/");
    Ok(if absolute { format!("/{}", joined) } else { joined })
}

fn read_stdin() -> Result<String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| GrindError::storage("stdin", e))?;
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckConfig;
    use crate::core::{iteration_key, Action};
    use crate::storage::MemoryStateStore;
    use serde_json::json;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Project dir with one passing and one toggleable check.
    ///
    /// The `test` check fails while `<project>/.fail` exists.
    fn project() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.ts"), "export {}").unwrap();

        let mut config = Config::default();
        config.controller.threshold = 3;
        config.checks = vec![
            CheckConfig::new("lint", "test -f {file}"),
            CheckConfig::new("test", "if [ -f .fail ]; then echo 'expected 1 got 2'; exit 1; fi"),
        ];
        (dir, config)
    }

    fn runner(
        config: Config,
        store: &Arc<MemoryStateStore>,
        cwd: &Path,
    ) -> HookRunner<Arc<MemoryStateStore>, impl Fn(&str) -> Result<Arc<MemoryStateStore>>> {
        let store = Arc::clone(store);
        HookRunner::new(config, move |_: &str| Ok(Arc::clone(&store)), cwd)
    }

    #[test]
    fn test_hook_type_parse() {
        assert_eq!(HookType::parse("on-save"), Some(HookType::OnSave));
        assert_eq!(HookType::parse("onSave"), Some(HookType::OnSave));
        assert_eq!(HookType::parse("post_tool_use"), Some(HookType::PostToolUse));
        assert_eq!(HookType::parse("stop"), None);
    }

    #[test]
    fn test_resource_key_normalization() {
        let cwd = Path::new("/work/project");
        assert_eq!(
            resource_key(Path::new("/work/project/src/a.ts"), cwd).unwrap(),
            "src/a.ts"
        );
        assert_eq!(
            resource_key(Path::new("./src/./a.ts"), cwd).unwrap(),
            "src/a.ts"
        );
        assert_eq!(
            resource_key(Path::new("/elsewhere/a.ts"), cwd).unwrap(),
            "/elsewhere/a.ts"
        );
        assert!(resource_key(Path::new("."), cwd).is_err());
    }

    #[test]
    fn test_on_save_retry_then_escalate() {
        let (dir, config) = project();
        fs::write(dir.path().join(".fail"), "").unwrap();
        let store = Arc::new(MemoryStateStore::new());
        let runner = runner(config, &store, dir.path());
        let input = r#"{"session_id": "s", "file": {"path": "src/a.ts"}}"#;

        for expected in 1..=2 {
            let decision = runner.decide(HookType::OnSave, input).unwrap();
            assert_eq!(decision.action, Action::Retry);
            assert_eq!(decision.iteration, Some(expected));
            let payload = decision.payload.unwrap();
            assert_eq!(payload.diagnostic("test"), Some("expected 1 got 2\n"));
            assert_eq!(payload.diagnostic("lint"), None);
        }

        let decision = runner.decide(HookType::OnSave, input).unwrap();
        assert_eq!(decision.action, Action::Escalate);
        assert_eq!(decision.payload.unwrap().iteration_count, Some(3));
        assert_eq!(
            store.get(&iteration_key("grind", "src/a.ts")).unwrap(),
            Some(json!(0))
        );
    }

    #[test]
    fn test_on_save_pass_continues() {
        let (dir, config) = project();
        let store = Arc::new(MemoryStateStore::new());
        let runner = runner(config, &store, dir.path());

        let json = runner
            .run_with_input(HookType::OnSave, r#"{"file": {"path": "src/a.ts"}}"#)
            .unwrap();
        assert_eq!(json, r#"{"action":"continue"}"#);
    }

    #[test]
    fn test_absolute_path_under_cwd_shares_counter() {
        let (dir, config) = project();
        fs::write(dir.path().join(".fail"), "").unwrap();
        let store = Arc::new(MemoryStateStore::new());
        let runner = runner(config, &store, dir.path());

        runner
            .evaluate_path("s", Path::new("src/a.ts"), dir.path())
            .unwrap();
        let decision = runner
            .evaluate_path("s", &dir.path().join("src/a.ts"), dir.path())
            .unwrap();
        assert_eq!(decision.iteration, Some(2));
    }

    #[test]
    fn test_untriggered_path_leaves_state_alone() {
        let (dir, config) = project();
        fs::write(dir.path().join(".fail"), "").unwrap();
        let store = Arc::new(MemoryStateStore::new());
        let runner = runner(config, &store, dir.path());

        let decision = runner
            .decide(HookType::OnSave, r#"{"file": {"path": "README.md"}}"#)
            .unwrap();
        assert_eq!(decision.action, Action::Continue);
        assert!(store.is_empty());
    }

    #[test]
    fn test_post_tool_use_non_edit_continues() {
        let (dir, config) = project();
        let store = Arc::new(MemoryStateStore::new());
        let runner = runner(config, &store, dir.path());

        let input = r#"{"session_id": "s", "tool_name": "Read", "tool_input": {"file_path": "src/a.ts"}}"#;
        let decision = runner.decide(HookType::PostToolUse, input).unwrap();
        assert_eq!(decision.action, Action::Continue);
        assert!(store.is_empty());
    }

    #[test]
    fn test_post_tool_use_edit_runs_cycle() {
        let (dir, config) = project();
        fs::write(dir.path().join(".fail"), "").unwrap();
        let store = Arc::new(MemoryStateStore::new());
        let runner = runner(config, &store, Path::new("/unused"));

        let input = json!({
            "session_id": "s",
            "cwd": dir.path(),
            "tool_name": "Edit",
            "tool_input": {"file_path": dir.path().join("src/a.ts")}
        })
        .to_string();
        let decision = runner.decide(HookType::PostToolUse, &input).unwrap();
        assert_eq!(decision.action, Action::Retry);
        assert_eq!(
            store.get(&iteration_key("grind", "src/a.ts")).unwrap(),
            Some(json!(1))
        );
    }

    #[test]
    fn test_store_open_failure_propagates() {
        let (dir, config) = project();
        let runner: HookRunner<MemoryStateStore, _> = HookRunner::new(
            config,
            |_: &str| -> Result<MemoryStateStore> {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked").into())
            },
            dir.path(),
        );

        let err = runner
            .decide(HookType::OnSave, r#"{"file": {"path": "src/a.ts"}}"#)
            .unwrap_err();
        assert!(err.is_bookkeeping_fault());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (dir, mut config) = project();
        config.controller.threshold = 0;
        let store = Arc::new(MemoryStateStore::new());
        let runner = runner(config, &store, dir.path());

        let err = runner
            .decide(HookType::OnSave, r#"{"file": {"path": "src/a.ts"}}"#)
            .unwrap_err();
        assert!(matches!(err, GrindError::Config { .. }));
    }

    #[test]
    fn test_malformed_input_rejected() {
        let (dir, config) = project();
        let store = Arc::new(MemoryStateStore::new());
        let runner = runner(config, &store, dir.path());

        let err = runner.decide(HookType::OnSave, "not json").unwrap_err();
        assert!(matches!(err, GrindError::InvalidInput { .. }));
    }
}
