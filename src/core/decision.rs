//! Decision records emitted by the escalation controller.
//!
//! These serialize to the JSON the hosting tool relays to the Worker or
//! the Supervisor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What the hosting tool should do after a cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Every check passed; nothing to relay.
    Continue,
    /// Feed the diagnostics back to the Worker.
    Retry,
    /// Forward the diagnostics to the Supervisor.
    Escalate,
}

impl Action {
    /// Exit code the `grind` binary uses for this action.
    pub fn exit_code(&self) -> i32 {
        use crate::error::exit_codes;
        match self {
            Self::Continue => exit_codes::CONTINUE,
            Self::Retry => exit_codes::RETRY,
            Self::Escalate => exit_codes::ESCALATE,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Retry => write!(f, "retry"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// Marker carried by escalation payloads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Signal {
    #[serde(rename = "ESCALATE")]
    Escalate,
}

/// Diagnostic payload for `retry` and `escalate`.
///
/// Every check of the cycle has a `<name>_errors` entry: its diagnostic if
/// it failed, `null` if it passed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    /// Present on escalation only.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub signal: Option<Signal>,
    /// Present on escalation only.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub iteration_count: Option<u32>,
    /// `<name>_errors` → diagnostic or null.
    #[serde(flatten)]
    pub errors: BTreeMap<String, Option<String>>,
}

impl Payload {
    /// Payload key for a check's diagnostics.
    pub fn errors_key(check_name: &str) -> String {
        format!("{}_errors", check_name)
    }

    /// Diagnostic recorded for a check, if it failed.
    pub fn diagnostic(&self, check_name: &str) -> Option<&str> {
        self.errors
            .get(&Self::errors_key(check_name))
            .and_then(|d| d.as_deref())
    }
}

/// Output of one controller cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    /// The action to take.
    pub action: Action,
    /// Human-readable message for the receiving agent.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    /// Post-increment failure count, for `retry` and `escalate`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub iteration: Option<u32>,
    /// Diagnostics, for `retry` and `escalate`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<Payload>,
}

impl Decision {
    /// A `continue` decision: no message, no payload.
    pub fn proceed() -> Self {
        Self {
            action: Action::Continue,
            message: None,
            iteration: None,
            payload: None,
        }
    }

    /// A `retry` decision for failure number `iteration` of `threshold`.
    pub fn retry(iteration: u32, threshold: u32, errors: BTreeMap<String, Option<String>>) -> Self {
        Self {
            action: Action::Retry,
            message: Some(format!(
                "Iteration {}/{}. Fix the following errors before proceeding.",
                iteration, threshold
            )),
            iteration: Some(iteration),
            payload: Some(Payload {
                signal: None,
                iteration_count: None,
                errors,
            }),
        }
    }

    /// An `escalate` decision at `iteration` failures.
    pub fn escalate(
        iteration: u32,
        threshold: u32,
        errors: BTreeMap<String, Option<String>>,
    ) -> Self {
        Self {
            action: Action::Escalate,
            message: Some(format!(
                "Clarification Threshold reached ({} iterations). Escalating to Supervisor.",
                threshold
            )),
            iteration: Some(iteration),
            payload: Some(Payload {
                signal: Some(Signal::Escalate),
                iteration_count: Some(iteration),
                errors,
            }),
        }
    }
}
