//! Check runners.
//!
//! Checks are modeled uniformly: any number of heterogeneous verification
//! steps compose through the `Check` trait. The configured checks are
//! shell commands.

pub mod command;

use std::path::Path;

pub use command::{shell_quote, CommandCheck, FILE_PLACEHOLDER};

use crate::config::CheckConfig;
use crate::core::Check;

/// Build the configured checks, in order, running from `cwd`.
pub fn checks_from_config(configs: &[CheckConfig], cwd: &Path) -> Vec<Box<dyn Check>> {
    configs
        .iter()
        .map(|c| Box::new(CommandCheck::from_config(c, cwd)) as Box<dyn Check>)
        .collect()
}
