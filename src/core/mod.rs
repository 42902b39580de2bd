//! Core types and logic for Grind.
//!
//! This module contains the escalation controller state machine, the check
//! interface it drives, and the decision records it emits.

pub mod check;
pub mod controller;
pub mod decision;

pub use check::{Check, CheckResult, FnCheck};
pub use controller::{
    iteration_key, ControllerSettings, EscalationController, DEFAULT_NAMESPACE, DEFAULT_THRESHOLD,
};
pub use decision::{Action, Decision, Payload, Signal};
