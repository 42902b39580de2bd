//! Configuration loading for Grind.
//!
//! Configuration follows a precedence chain:
//! 1. Environment variables (highest priority)
//! 2. Project config (`.grind/config.toml`)
//! 3. User config (`~/.grind/config.toml`)
//! 4. Defaults (lowest priority)
//!
//! The threshold and the check list are read once, when the controller is
//! built; there is no runtime reconfiguration.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::{ControllerSettings, DEFAULT_NAMESPACE, DEFAULT_THRESHOLD};
use crate::error::{FailOpen, GrindError, Result};

/// Default per-check timeout.
pub const DEFAULT_CHECK_TIMEOUT_SECONDS: u64 = 300;

/// Default maximum diagnostic length, in characters.
pub const DEFAULT_DIAGNOSTIC_LIMIT: usize = 10_000;

/// Main configuration struct for Grind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Escalation controller settings.
    pub controller: ControllerConfig,
    /// Which file changes start a cycle.
    pub trigger: TriggerConfig,
    /// Checks run every cycle, in order.
    pub checks: Vec<CheckConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            trigger: TriggerConfig::default(),
            checks: default_checks(),
        }
    }
}

/// Escalation controller settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    /// Consecutive failing cycles before escalating to the Supervisor.
    pub threshold: u32,
    /// Keyspace prefix for iteration counters.
    pub namespace: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl ControllerConfig {
    /// Check if a threshold value is valid (must be >= 1).
    pub fn is_valid_threshold(value: u32) -> bool {
        value >= 1
    }

    /// Settings for constructing a controller.
    pub fn settings(&self) -> ControllerSettings {
        ControllerSettings {
            threshold: self.threshold,
            namespace: self.namespace.clone(),
        }
    }
}

/// Trigger configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriggerConfig {
    /// Glob patterns, relative to the project directory.
    pub patterns: Vec<String>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            patterns: vec!["src/**/*".to_string(), "tests/**/*".to_string()],
        }
    }
}

impl TriggerConfig {
    /// Whether a project-relative path should start a cycle.
    ///
    /// Unparsable patterns never match (`Config::validate` reports them).
    pub fn matches(&self, relative_path: &Path) -> bool {
        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        self.patterns.iter().any(|p| {
            glob::Pattern::new(p)
                .map(|pattern| pattern.matches_path_with(relative_path, options))
                .unwrap_or(false)
        })
    }
}

/// One configured check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckConfig {
    /// Check name; its diagnostics appear under `<name>_errors`.
    pub name: String,
    /// Shell command; `{file}` is replaced by the changed file's path.
    pub command: String,
    /// Kill the command after this many seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Truncate diagnostics to this many characters (0 = unlimited).
    #[serde(default = "default_diagnostic_limit")]
    pub diagnostic_limit: usize,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_CHECK_TIMEOUT_SECONDS
}

fn default_diagnostic_limit() -> usize {
    DEFAULT_DIAGNOSTIC_LIMIT
}

impl CheckConfig {
    /// Create a check entry with default timeout and limit.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            timeout_seconds: DEFAULT_CHECK_TIMEOUT_SECONDS,
            diagnostic_limit: DEFAULT_DIAGNOSTIC_LIMIT,
        }
    }
}

fn default_checks() -> Vec<CheckConfig> {
    vec![
        CheckConfig::new("lint", "npx eslint {file} --format json"),
        CheckConfig::new("test", "npx vitest run --reporter=json"),
    ]
}

impl Config {
    /// Load configuration with full precedence chain from the current
    /// directory.
    pub fn load() -> Self {
        match env::current_dir() {
            Ok(cwd) => Self::load_from_cwd(&cwd),
            Err(e) => {
                tracing::warn!("current directory unavailable: {} (skipping project config)", e);
                let mut config = Config::default();
                if let Some(user_config) = Self::load_user_config() {
                    config = config.merge(user_config);
                }
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Load configuration for a specific project directory.
    pub fn load_from_cwd(cwd: &Path) -> Self {
        let mut config = Config::default();

        if let Some(user_config) = Self::load_user_config() {
            config = config.merge(user_config);
        }

        if let Some(project_config) = Self::load_project_config(cwd) {
            config = config.merge(project_config);
        }

        config.apply_env_overrides();

        config
    }

    fn load_user_config() -> Option<Config> {
        let path = grind_home()?.join("config.toml");
        Self::load_layer(&path)
    }

    fn load_project_config(cwd: &Path) -> Option<Config> {
        Self::load_layer(&project_config_path(cwd))
    }

    /// A missing layer is silently skipped; a broken one is logged and
    /// skipped.
    fn load_layer(path: &Path) -> Option<Config> {
        if !path.exists() {
            return None;
        }
        Self::load_from_file(path)
            .map(Some)
            .fail_open_with(&format!("loading {}", path.display()), None)
    }

    /// Load config from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| GrindError::storage(path, e))?;
        toml::from_str(&content).map_err(|e| GrindError::config(e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        // GRIND_THRESHOLD
        if let Ok(val) = env::var("GRIND_THRESHOLD") {
            match val.parse::<u32>() {
                Ok(n) if ControllerConfig::is_valid_threshold(n) => {
                    self.controller.threshold = n;
                }
                _ => tracing::warn!(
                    "Invalid GRIND_THRESHOLD value '{}'. Expected a positive integer. Using '{}'.",
                    val,
                    self.controller.threshold
                ),
            }
        }

        // GRIND_NAMESPACE
        if let Ok(val) = env::var("GRIND_NAMESPACE") {
            if val.is_empty() {
                tracing::warn!(
                    "GRIND_NAMESPACE is empty. Using '{}'.",
                    self.controller.namespace
                );
            } else {
                self.controller.namespace = val;
            }
        }
    }

    /// Merge another config into this one.
    ///
    /// Non-default fields from `other` win. A layer cannot set a value back
    /// to its default over a non-default lower layer.
    fn merge(mut self, other: Config) -> Self {
        let default_controller = ControllerConfig::default();
        if other.controller.threshold != default_controller.threshold {
            self.controller.threshold = other.controller.threshold;
        }
        if other.controller.namespace != default_controller.namespace {
            self.controller.namespace = other.controller.namespace;
        }

        if other.trigger.patterns != TriggerConfig::default().patterns {
            self.trigger.patterns = other.trigger.patterns;
        }

        // The check list is replaced as a whole, never merged by name
        if other.checks != default_checks() {
            self.checks = other.checks;
        }

        self
    }

    /// Report every problem that would stop a controller from being built.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if !ControllerConfig::is_valid_threshold(self.controller.threshold) {
            problems.push("controller.threshold must be at least 1".to_string());
        }
        if self.controller.namespace.is_empty() {
            problems.push("controller.namespace must not be empty".to_string());
        }

        for pattern in &self.trigger.patterns {
            if let Err(e) = glob::Pattern::new(pattern) {
                problems.push(format!("trigger pattern '{}' is invalid: {}", pattern, e));
            }
        }

        let mut names = HashSet::new();
        for check in &self.checks {
            if check.name.is_empty() {
                problems.push("check names must not be empty".to_string());
            } else if !names.insert(check.name.as_str()) {
                problems.push(format!("duplicate check name '{}'", check.name));
            }
            if check.command.trim().is_empty() {
                problems.push(format!("check '{}' has an empty command", check.name));
            }
            if check.timeout_seconds == 0 {
                problems.push(format!("check '{}' has a zero timeout", check.name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(GrindError::config(problems.join("; ")))
        }
    }

    /// Write this configuration to `.grind/config.toml` under `cwd`.
    ///
    /// Uses atomic write (temp file, then rename).
    pub fn save_project(&self, cwd: &Path) -> Result<PathBuf> {
        let grind_dir = cwd.join(".grind");

        if !grind_dir.exists() {
            fs::create_dir_all(&grind_dir).map_err(|e| GrindError::storage(&grind_dir, e))?;
        }

        let config_path = grind_dir.join("config.toml");
        let content =
            toml::to_string_pretty(self).map_err(|e| GrindError::config(e.to_string()))?;

        let temp_path = grind_dir.join(".config.toml.tmp");
        fs::write(&temp_path, &content).map_err(|e| GrindError::storage(&temp_path, e))?;

        let file = fs::File::open(&temp_path).map_err(|e| GrindError::storage(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| GrindError::storage(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &config_path).map_err(|e| GrindError::storage(&config_path, e))?;

        Ok(config_path)
    }
}

/// Get the Grind home directory.
///
/// `GRIND_HOME` wins when set to a non-empty value, then `~/.grind`, then a
/// per-user temp directory for environments without `HOME`.
pub fn grind_home() -> Option<PathBuf> {
    if let Ok(home) = env::var("GRIND_HOME") {
        if home.is_empty() {
            tracing::warn!("GRIND_HOME is empty, using default");
        } else {
            let path = PathBuf::from(&home);
            if path.is_absolute() {
                return Some(path);
            }
            if let Ok(canonical) = path.canonicalize() {
                return Some(canonical);
            }
            tracing::warn!("GRIND_HOME is relative and doesn't exist, using as-is");
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        return Some(home.join(".grind"));
    }

    let fallback_path = fallback_grind_home();
    tracing::warn!(
        "HOME not set, using fallback location: {}",
        fallback_path.display()
    );
    Some(fallback_path)
}

#[cfg(unix)]
fn fallback_grind_home() -> PathBuf {
    use std::os::unix::fs::MetadataExt;
    let uid = std::fs::metadata("/").map(|m| m.uid()).unwrap_or(0);
    PathBuf::from(format!("/tmp/grind-{}", uid))
}

#[cfg(not(unix))]
fn fallback_grind_home() -> PathBuf {
    std::env::temp_dir().join("grind")
}

/// Get the state directory (`<grind_home>/state/`).
pub fn state_dir() -> Option<PathBuf> {
    grind_home().map(|h| h.join("state"))
}

/// Get the crash log path (`<grind_home>/crash.log`).
pub fn crash_log_path() -> Option<PathBuf> {
    grind_home().map(|h| h.join("crash.log"))
}

/// Get the project config path (`<cwd>/.grind/config.toml`).
pub fn project_config_path(cwd: &Path) -> PathBuf {
    cwd.join(".grind").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.controller.threshold, 5);
        assert_eq!(config.controller.namespace, "grind");
        assert_eq!(config.trigger.patterns, vec!["src/**/*", "tests/**/*"]);
        assert_eq!(config.checks.len(), 2);
        assert_eq!(config.checks[0].name, "lint");
        assert_eq!(config.checks[0].command, "npx eslint {file} --format json");
        assert_eq!(config.checks[1].name, "test");
        assert_eq!(config.checks[1].timeout_seconds, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");

        let toml_content = r#"
[controller]
threshold = 3

[[checks]]
name = "clippy"
command = "cargo clippy -- -D warnings"
timeout_seconds = 600

[[checks]]
name = "test"
command = "cargo test"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();

        assert_eq!(config.controller.threshold, 3);
        assert_eq!(config.controller.namespace, "grind");
        assert_eq!(config.checks.len(), 2);
        assert_eq!(config.checks[0].name, "clippy");
        assert_eq!(config.checks[0].timeout_seconds, 600);
        assert_eq!(config.checks[1].timeout_seconds, 300);
        assert_eq!(config.checks[1].diagnostic_limit, DEFAULT_DIAGNOSTIC_LIMIT);
        // Unspecified sections keep defaults
        assert_eq!(config.trigger.patterns, vec!["src/**/*", "tests/**/*"]);
    }

    #[test]
    fn test_load_from_file_missing() {
        let result = Config::load_from_file(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "this is not valid toml [[[").unwrap();

        assert!(Config::load_from_file(&config_path).is_err());
    }

    #[test]
    #[serial]
    fn test_project_config_precedence() {
        let home = TempDir::new().unwrap();
        env::set_var("GRIND_HOME", home.path());

        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".grind")).unwrap();
        fs::write(
            project_config_path(dir.path()),
            "[controller]\nthreshold = 7\n",
        )
        .unwrap();

        let config = Config::load_from_cwd(dir.path());
        assert_eq!(config.controller.threshold, 7);
        assert_eq!(config.checks, default_checks());

        env::remove_var("GRIND_HOME");
    }

    #[test]
    #[serial]
    fn test_user_config_under_project_config() {
        let home = TempDir::new().unwrap();
        env::set_var("GRIND_HOME", home.path());
        fs::write(
            home.path().join("config.toml"),
            "[controller]\nthreshold = 9\nnamespace = \"user\"\n",
        )
        .unwrap();

        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".grind")).unwrap();
        fs::write(
            project_config_path(dir.path()),
            "[controller]\nthreshold = 2\n",
        )
        .unwrap();

        let config = Config::load_from_cwd(dir.path());
        assert_eq!(config.controller.threshold, 2);
        assert_eq!(config.controller.namespace, "user");

        env::remove_var("GRIND_HOME");
    }

    #[test]
    #[serial]
    fn test_broken_project_config_is_skipped() {
        let home = TempDir::new().unwrap();
        env::set_var("GRIND_HOME", home.path());

        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".grind")).unwrap();
        fs::write(project_config_path(dir.path()), "[[[").unwrap();

        assert_eq!(Config::load_from_cwd(dir.path()), Config::default());

        env::remove_var("GRIND_HOME");
    }

    #[test]
    #[serial]
    fn test_env_var_precedence() {
        let home = TempDir::new().unwrap();
        env::set_var("GRIND_HOME", home.path());

        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(".grind")).unwrap();
        fs::write(
            project_config_path(dir.path()),
            "[controller]\nthreshold = 7\n",
        )
        .unwrap();

        env::set_var("GRIND_THRESHOLD", "10");
        env::set_var("GRIND_NAMESPACE", "ci");
        let config = Config::load_from_cwd(dir.path());
        assert_eq!(config.controller.threshold, 10);
        assert_eq!(config.controller.namespace, "ci");

        env::remove_var("GRIND_THRESHOLD");
        env::remove_var("GRIND_NAMESPACE");
        env::remove_var("GRIND_HOME");
    }

    #[test]
    #[serial]
    fn test_invalid_env_threshold_ignored() {
        let home = TempDir::new().unwrap();
        env::set_var("GRIND_HOME", home.path());
        let dir = TempDir::new().unwrap();

        for bad in ["0", "-1", "many"] {
            env::set_var("GRIND_THRESHOLD", bad);
            let config = Config::load_from_cwd(dir.path());
            assert_eq!(config.controller.threshold, 5, "value {:?}", bad);
        }

        env::remove_var("GRIND_THRESHOLD");
        env::remove_var("GRIND_HOME");
    }

    #[test]
    fn test_merge_replaces_check_list() {
        let other = Config {
            checks: vec![CheckConfig::new("typecheck", "tsc --noEmit")],
            ..Default::default()
        };
        let merged = Config::default().merge(other);
        assert_eq!(merged.checks.len(), 1);
        assert_eq!(merged.checks[0].name, "typecheck");
    }

    #[test]
    fn test_merge_keeps_lower_layer_when_upper_is_default() {
        let mut lower = Config::default();
        lower.controller.threshold = 10;
        let merged = lower.merge(Config::default());
        assert_eq!(merged.controller.threshold, 10);
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let mut config = Config::default();
        config.controller.threshold = 0;
        config.trigger.patterns.push("src/[".to_string());
        config.checks.push(CheckConfig::new("lint", " "));

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("threshold"));
        assert!(message.contains("src/["));
        assert!(message.contains("duplicate check name 'lint'"));
        assert!(message.contains("empty command"));
    }

    #[test]
    fn test_trigger_matches() {
        let trigger = TriggerConfig::default();
        assert!(trigger.matches(Path::new("src/string-utils.ts")));
        assert!(trigger.matches(Path::new("src/nested/deep/file.ts")));
        assert!(trigger.matches(Path::new("tests/array-utils.test.ts")));
        assert!(!trigger.matches(Path::new("README.md")));
        assert!(!trigger.matches(Path::new("docs/src/file.md")));
    }

    #[test]
    fn test_save_project_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.controller.threshold = 4;

        let path = config.save_project(dir.path()).unwrap();
        assert_eq!(path, project_config_path(dir.path()));
        assert!(!dir.path().join(".grind/.config.toml.tmp").exists());

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    #[serial]
    fn test_grind_home_env_override() {
        let dir = TempDir::new().unwrap();
        env::set_var("GRIND_HOME", dir.path());
        assert_eq!(grind_home(), Some(dir.path().to_path_buf()));
        assert_eq!(state_dir(), Some(dir.path().join("state")));
        env::remove_var("GRIND_HOME");
    }
}
