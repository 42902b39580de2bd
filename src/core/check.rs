//! Check types consumed by the escalation controller.

use serde::{Deserialize, Serialize};

/// Outcome of one check in one cycle.
///
/// A failing result always carries diagnostic text; a passing one never does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResult {
    /// Whether the check passed.
    pub passed: bool,
    /// Diagnostic output, present only on failure.
    pub diagnostic: Option<String>,
}

impl CheckResult {
    /// A passing result.
    pub fn pass() -> Self {
        Self {
            passed: true,
            diagnostic: None,
        }
    }

    /// A failing result with diagnostic text.
    pub fn fail(diagnostic: impl Into<String>) -> Self {
        Self {
            passed: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// A named verification step.
///
/// `run` must not fail: an implementation that cannot execute (missing
/// binary, timeout, crash) reports `CheckResult::fail` with the error text.
pub trait Check: Send + Sync {
    /// Stable name, used as the `<name>_errors` payload key.
    fn name(&self) -> &str;

    /// Verify `resource` (usually a file path).
    fn run(&self, resource: &str) -> CheckResult;
}

/// A `Check` backed by a closure.
pub struct FnCheck<F> {
    name: String,
    f: F,
}

impl<F> FnCheck<F>
where
    F: Fn(&str) -> CheckResult + Send + Sync,
{
    /// Wrap a closure as a named check.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Check for FnCheck<F>
where
    F: Fn(&str) -> CheckResult + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, resource: &str) -> CheckResult {
        (self.f)(resource)
    }
}

impl<F> std::fmt::Debug for FnCheck<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCheck").field("name", &self.name).finish()
    }
}
