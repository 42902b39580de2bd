//! Grind - iteration escalation controller
//!
//! CLI entry point with global panic handler.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use grind::config::{crash_log_path, project_config_path, Config};
use grind::core::Decision;
use grind::error::exit_codes;
use grind::hooks::{resource_key, to_json, to_json_pretty, to_text, HookRunner, HookType};
use grind::storage::{FileStateStore, DEFAULT_SESSION_ID};

// =============================================================================
// CLI Definition
// =============================================================================

/// Grind - iteration escalation controller for agent-driven editing
#[derive(Parser)]
#[command(name = "grind")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// [Internal] Run a hook (JSON stdin/stdout). Called by the hosting tool
    Hook {
        /// The hook event type
        #[arg(value_enum)]
        event: HookEvent,
    },

    /// Run one verification cycle for a file
    Evaluate {
        /// File to verify, absolute or relative to --cwd
        path: PathBuf,
        /// Session ID to use
        #[arg(long, default_value = DEFAULT_SESSION_ID)]
        session_id: String,
        /// Project directory (defaults to the current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
    },

    /// Show iteration counters for a session
    Status {
        /// Session ID to use
        #[arg(long, default_value = DEFAULT_SESSION_ID)]
        session_id: String,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
    },

    /// Clear a file's iteration counter
    Reset {
        /// File whose counter to clear
        path: PathBuf,
        /// Session ID to use
        #[arg(long, default_value = DEFAULT_SESSION_ID)]
        session_id: String,
    },

    /// Write the default project configuration
    Init {
        /// Overwrite an existing .grind/config.toml
        #[arg(long, short)]
        force: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum HookEvent {
    OnSave,
    PostToolUse,
}

impl From<HookEvent> for HookType {
    fn from(event: HookEvent) -> Self {
        match event {
            HookEvent::OnSave => HookType::OnSave,
            HookEvent::PostToolUse => HookType::PostToolUse,
        }
    }
}

type CliResult = Result<ExitCode, Box<dyn std::error::Error>>;

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> ExitCode {
    setup_panic_handler();
    init_logging();

    match run() {
        Ok(code) => code,
        Err(e) => {
            // Not fail-open: the host must not read this cycle as a pass.
            eprintln!("grind error: {}", e);
            ExitCode::from(exit_codes::ERROR as u8)
        }
    }
}

/// Log to stderr so stdout stays reserved for decisions.
fn init_logging() {
    let filter = EnvFilter::try_from_env("GRIND_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Set up the global panic handler.
///
/// On a main-thread panic, logs to ~/.grind/crash.log and exits with code 3.
/// Panics on check threads are reported by the controller as failing checks.
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("grind panic: {}", info);

        if std::thread::current().name() != Some("main") {
            return;
        }

        if let Some(crash_log) = crash_log_path() {
            if let Some(parent) = crash_log.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&crash_log)
            {
                let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
                let _ = writeln!(file, "[{}] {}", timestamp, info);
            }
        }

        std::process::exit(exit_codes::CRASH);
    }));
}

/// Run the CLI and return the exit code.
fn run() -> CliResult {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Hook { event } => run_hook(event.into(), &cwd),
        Commands::Evaluate {
            path,
            session_id,
            cwd: project,
            json,
        } => run_evaluate(&path, &session_id, project.as_deref().unwrap_or(&cwd), json),
        Commands::Status { session_id, json } => run_status(&session_id, json, &cwd),
        Commands::Reset { path, session_id } => run_reset(&path, &session_id, &cwd),
        Commands::Init { force } => run_init(force, &cwd),
    }
}

// =============================================================================
// Command Implementations
// =============================================================================

fn runner(
    cwd: &Path,
) -> HookRunner<FileStateStore, impl Fn(&str) -> grind::Result<FileStateStore>> {
    HookRunner::new(Config::load_from_cwd(cwd), FileStateStore::for_session, cwd)
}

fn decision_exit_code(decision: &Decision) -> ExitCode {
    ExitCode::from(decision.action.exit_code() as u8)
}

fn run_hook(hook_type: HookType, cwd: &Path) -> CliResult {
    let decision = runner(cwd).run(hook_type)?;

    println!("{}", to_json(&decision)?);
    Ok(decision_exit_code(&decision))
}

/// An explicit evaluation bypasses the trigger patterns.
fn run_evaluate(path: &Path, session_id: &str, cwd: &Path, json: bool) -> CliResult {
    let runner = runner(cwd);
    let resource = resource_key(path, cwd)?;
    let decision = runner.controller(session_id, cwd)?.evaluate(&resource)?;

    if json {
        println!("{}", to_json_pretty(&decision)?);
    } else {
        print!("{}", to_text(&decision));
    }
    Ok(decision_exit_code(&decision))
}

fn run_status(session_id: &str, json: bool, cwd: &Path) -> CliResult {
    let controller = runner(cwd).controller(session_id, cwd)?;
    let counters = controller.counters()?;

    if json {
        let entries: Vec<_> = counters
            .iter()
            .map(|(resource, count)| serde_json::json!({"resource": resource, "iterations": count}))
            .collect();
        let output = serde_json::json!({
            "session_id": session_id,
            "threshold": controller.threshold(),
            "counters": entries,
        });
        println!("{}", to_json_pretty(&output)?);
    } else if counters.is_empty() {
        println!("No iteration counters for session '{}'", session_id);
    } else {
        for (resource, count) in &counters {
            println!("{:>3}/{}  {}", count, controller.threshold(), resource);
        }
    }

    Ok(ExitCode::from(exit_codes::CONTINUE as u8))
}

fn run_reset(path: &Path, session_id: &str, cwd: &Path) -> CliResult {
    let resource = resource_key(path, cwd)?;
    runner(cwd).controller(session_id, cwd)?.reset(&resource)?;

    println!("Reset iteration counter for {}", resource);
    Ok(ExitCode::from(exit_codes::CONTINUE as u8))
}

fn run_init(force: bool, cwd: &Path) -> CliResult {
    let path = project_config_path(cwd);
    if path.exists() && !force {
        eprintln!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
        return Ok(ExitCode::from(exit_codes::ERROR as u8));
    }

    let written = Config::default().save_project(cwd)?;
    println!("Wrote {}", written.display());
    Ok(ExitCode::from(exit_codes::CONTINUE as u8))
}
