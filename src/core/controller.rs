//! Escalation controller for Grind.
//!
//! Per resource key the controller is a two-state machine:
//!
//! - `Idle(0)` --fail--> `Failing(1)`
//! - `Failing(k)` --fail--> `Failing(k+1)` while `k+1 < threshold` (retry)
//! - `Failing(threshold-1)` --fail--> `Idle(0)` (escalate, counter reset)
//! - any --pass--> `Idle(0)` (continue)
//!
//! Escalation is edge-triggered: the counter resets when it fires, so one
//! unresolved failure streak escalates exactly once.

use std::collections::{BTreeMap, HashSet};
use std::thread;

use serde_json::Value;

use crate::core::check::{Check, CheckResult};
use crate::core::decision::{Decision, Payload};
use crate::error::{GrindError, Result};
use crate::storage::StateStore;

/// Default number of consecutive failures that triggers escalation.
pub const DEFAULT_THRESHOLD: u32 = 5;

/// Default keyspace prefix for iteration counters.
pub const DEFAULT_NAMESPACE: &str = "grind";

const ITERATIONS_SUFFIX: &str = ":iterations";

/// Fixed per-controller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Consecutive failures before escalation. Must be at least 1.
    pub threshold: u32,
    /// Prefix of every state key this controller writes.
    pub namespace: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// State key holding the iteration counter for `resource`.
pub fn iteration_key(namespace: &str, resource: &str) -> String {
    format!("{}:{}{}", namespace, resource, ITERATIONS_SUFFIX)
}

/// The retry/escalate state machine.
///
/// Owns the iteration counters in its store; nothing else should read or
/// write keys under its namespace. Callers must not run two cycles for the
/// same resource key concurrently (the read-modify-write is unsynchronized).
/// Different keys are independent.
pub struct EscalationController<S: StateStore> {
    store: S,
    checks: Vec<Box<dyn Check>>,
    settings: ControllerSettings,
}

impl<S: StateStore> EscalationController<S> {
    /// Create a controller.
    ///
    /// Fails if the threshold is 0, the namespace is empty, or check names
    /// are empty or repeated.
    pub fn new(
        store: S,
        checks: Vec<Box<dyn Check>>,
        settings: ControllerSettings,
    ) -> Result<Self> {
        if settings.threshold == 0 {
            return Err(GrindError::config("threshold must be at least 1"));
        }
        if settings.namespace.is_empty() {
            return Err(GrindError::config("namespace must not be empty"));
        }

        let mut seen = HashSet::new();
        for check in &checks {
            let name = check.name();
            if name.is_empty() {
                return Err(GrindError::config("check names must not be empty"));
            }
            if !seen.insert(name.to_string()) {
                return Err(GrindError::config(format!("duplicate check name '{}'", name)));
            }
        }

        Ok(Self {
            store,
            checks,
            settings,
        })
    }

    /// The configured threshold.
    pub fn threshold(&self) -> u32 {
        self.settings.threshold
    }

    /// Names of the configured checks, in order.
    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run one verification cycle for `resource_key`.
    ///
    /// Every check runs, concurrently, and the controller waits for all of
    /// them before deciding. Check failures never surface as errors; state
    /// store failures always do.
    pub fn evaluate(&self, resource_key: &str) -> Result<Decision> {
        validate_resource(resource_key)?;

        // Load first: without the prior count there is nothing to decide.
        let prior = self.load_count(resource_key)?;
        let results = self.run_checks(resource_key);
        self.decide(resource_key, prior, &results)
    }

    /// Record a cycle whose checks the caller already ran.
    ///
    /// `results` pairs each check name with its outcome.
    pub fn record_cycle(
        &self,
        resource_key: &str,
        results: &[(String, CheckResult)],
    ) -> Result<Decision> {
        validate_resource(resource_key)?;
        let prior = self.load_count(resource_key)?;
        self.decide(resource_key, prior, results)
    }

    /// Current iteration count for `resource_key` (0 if never evaluated).
    pub fn iteration_count(&self, resource_key: &str) -> Result<u32> {
        validate_resource(resource_key)?;
        self.load_count(resource_key)
    }

    /// Clear the failure streak for `resource_key`.
    pub fn reset(&self, resource_key: &str) -> Result<()> {
        validate_resource(resource_key)?;
        tracing::debug!(resource = resource_key, "resetting iteration counter");
        self.store_count(resource_key, 0)
    }

    /// Every resource this controller has seen, with its counter, sorted
    /// by resource key.
    pub fn counters(&self) -> Result<Vec<(String, u32)>> {
        let prefix = format!("{}:", self.settings.namespace);
        let mut counters = Vec::new();

        for (key, value) in self.store.entries()? {
            let Some(resource) = key
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(ITERATIONS_SUFFIX))
            else {
                continue;
            };
            counters.push((resource.to_string(), parse_count(&key, &value)?));
        }

        counters.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(counters)
    }

    fn decide(
        &self,
        resource_key: &str,
        prior: u32,
        results: &[(String, CheckResult)],
    ) -> Result<Decision> {
        let threshold = self.settings.threshold;

        if results.iter().all(|(_, r)| r.passed) {
            self.store_count(resource_key, 0)?;
            tracing::debug!(resource = resource_key, prior, "all checks passed");
            return Ok(Decision::proceed());
        }

        let next = prior.saturating_add(1);
        let escalating = next >= threshold;
        self.store_count(resource_key, if escalating { 0 } else { next })?;

        let errors: BTreeMap<String, Option<String>> = results
            .iter()
            .map(|(name, r)| {
                let diagnostic = if r.passed {
                    None
                } else {
                    // A failure with no text still has to be visible to the agent
                    Some(
                        r.diagnostic
                            .clone()
                            .unwrap_or_else(|| format!("{} failed without output", name)),
                    )
                };
                (Payload::errors_key(name), diagnostic)
            })
            .collect();

        let failing: Vec<&str> = results
            .iter()
            .filter(|(_, r)| !r.passed)
            .map(|(n, _)| n.as_str())
            .collect();

        if escalating {
            tracing::info!(
                resource = resource_key,
                iteration = next,
                threshold,
                failing = ?failing,
                "clarification threshold reached, escalating"
            );
            return Ok(Decision::escalate(next, threshold, errors));
        }

        tracing::debug!(
            resource = resource_key,
            iteration = next,
            threshold,
            failing = ?failing,
            "checks failed, asking worker to retry"
        );
        Ok(Decision::retry(next, threshold, errors))
    }

    /// Each check runs on its own scoped thread, even when there is only
    /// one, so a panic is always contained to that check's result.
    fn run_checks(&self, resource_key: &str) -> Vec<(String, CheckResult)> {
        thread::scope(|s| {
            let handles: Vec<_> = self
                .checks
                .iter()
                .map(|check| (check.name(), s.spawn(move || check.run(resource_key))))
                .collect();

            handles
                .into_iter()
                .map(|(name, handle)| {
                    let result = handle.join().unwrap_or_else(|_| {
                        tracing::warn!(check = name, "check panicked");
                        CheckResult::fail(format!("check '{}' panicked", name))
                    });
                    (name.to_string(), result)
                })
                .collect()
        })
    }

    fn load_count(&self, resource_key: &str) -> Result<u32> {
        let key = iteration_key(&self.settings.namespace, resource_key);
        match self.store.get(&key)? {
            None => Ok(0),
            Some(value) => parse_count(&key, &value),
        }
    }

    fn store_count(&self, resource_key: &str, count: u32) -> Result<()> {
        let key = iteration_key(&self.settings.namespace, resource_key);
        self.store.set(&key, Value::from(count))
    }
}

impl<S: StateStore> std::fmt::Debug for EscalationController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalationController")
            .field("checks", &self.check_names())
            .field("settings", &self.settings)
            .finish()
    }
}

fn validate_resource(resource_key: &str) -> Result<()> {
    if resource_key.is_empty() {
        return Err(GrindError::invalid_input("resource key must not be empty"));
    }
    Ok(())
}

fn parse_count(key: &str, value: &Value) -> Result<u32> {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| {
            GrindError::invalid_state(format!(
                "iteration counter '{}' holds {}, expected a non-negative integer",
                key, value
            ))
        })
}
