//! Grind - iteration escalation controller for agent-driven editing
//!
//! Grind runs a configured set of verification checks every time a file
//! changes, feeds failures back to the Worker agent, and escalates to a
//! Supervisor once a file has failed verification for `threshold`
//! consecutive cycles.

pub mod checks;
pub mod config;
pub mod core;
pub mod error;
pub mod hooks;
pub mod storage;

pub use checks::{checks_from_config, CommandCheck};
pub use config::Config;
pub use core::{
    iteration_key, Action, Check, CheckResult, ControllerSettings, Decision, EscalationController,
    FnCheck, Payload, Signal,
};
pub use error::{GrindError, Result};
pub use hooks::{HookRunner, HookType};
pub use storage::{FileStateStore, MemoryStateStore, StateStore};
