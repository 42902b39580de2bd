//! Shell-command checks.
//!
//! A `CommandCheck` runs `sh -c <command>` in the project directory and
//! passes when the command exits 0. `{file}` in the command is replaced by
//! the shell-quoted resource path. Every execution fault (spawn failure,
//! timeout, wait error) becomes a failing result with the fault as the
//! diagnostic, so the controller counts it like any other failure.
//!
//! On unix the command runs in its own process group, which is killed when
//! the shell exits or times out: background jobs never outlive the check.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::CheckConfig;
use crate::core::{Check, CheckResult};

/// Placeholder replaced by the resource path.
pub const FILE_PLACEHOLDER: &str = "{file}";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to wait for output after the shell exits past its deadline.
const READER_GRACE: Duration = Duration::from_millis(500);

/// A check backed by a shell command.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    name: String,
    command: String,
    cwd: PathBuf,
    timeout: Duration,
    diagnostic_limit: usize,
}

enum Outcome {
    Exited {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    TimedOut,
}

impl CommandCheck {
    /// Create a check that runs `command` in the current directory.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            cwd: PathBuf::from("."),
            timeout: Duration::from_secs(crate::config::DEFAULT_CHECK_TIMEOUT_SECONDS),
            diagnostic_limit: crate::config::DEFAULT_DIAGNOSTIC_LIMIT,
        }
    }

    /// Build a check from its config entry.
    pub fn from_config(config: &CheckConfig, cwd: &Path) -> Self {
        Self::new(&config.name, &config.command)
            .with_cwd(cwd)
            .with_timeout(Duration::from_secs(config.timeout_seconds))
            .with_diagnostic_limit(config.diagnostic_limit)
    }

    /// Run the command from `cwd`.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Kill the command after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Truncate diagnostics to `limit` characters (0 disables truncation).
    pub fn with_diagnostic_limit(mut self, limit: usize) -> Self {
        self.diagnostic_limit = limit;
        self
    }

    /// The command line that would run for `resource`.
    pub fn render(&self, resource: &str) -> String {
        self.command
            .replace(FILE_PLACEHOLDER, &shell_quote(resource))
    }

    fn execute(&self, command: &str) -> std::io::Result<Outcome> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so descendants (npx -> node workers) can be
        // killed with the shell
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn()?;

        // Drain both pipes while waiting so a chatty command cannot block
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);
        let deadline = Instant::now() + self.timeout;

        loop {
            if let Some(status) = child.try_wait()? {
                // Leftover background jobs would hold the pipes open
                kill_tree(&mut child);
                let grace = Instant::now() + READER_GRACE;
                let bound = deadline.max(grace);
                return Ok(Outcome::Exited {
                    status,
                    stdout: collect(stdout, bound),
                    stderr: collect(stderr, bound),
                });
            }

            if Instant::now() >= deadline {
                kill_tree(&mut child);
                let _ = child.wait();
                return Ok(Outcome::TimedOut);
            }

            thread::sleep(POLL_INTERVAL);
        }
    }

    fn diagnostic(&self, status: ExitStatus, stdout: &str, stderr: &str) -> String {
        let text = if !stdout.trim().is_empty() {
            stdout.to_string()
        } else if !stderr.trim().is_empty() {
            stderr.to_string()
        } else {
            match status.code() {
                Some(code) => format!("`{}` exited with status {}", self.command, code),
                None => format!("`{}` was terminated by a signal", self.command),
            }
        };
        truncate(&text, self.diagnostic_limit)
    }
}

impl Check for CommandCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, resource: &str) -> CheckResult {
        let command = self.render(resource);
        tracing::debug!(check = %self.name, command = %command, "running check");

        match self.execute(&command) {
            Ok(Outcome::Exited { status, .. }) if status.success() => CheckResult::pass(),
            Ok(Outcome::Exited {
                status,
                stdout,
                stderr,
            }) => CheckResult::fail(self.diagnostic(status, &stdout, &stderr)),
            Ok(Outcome::TimedOut) => {
                tracing::warn!(check = %self.name, timeout = ?self.timeout, "check timed out");
                CheckResult::fail(format!(
                    "`{}` timed out after {}s",
                    command,
                    self.timeout.as_secs_f64()
                ))
            }
            Err(e) => {
                tracing::warn!(check = %self.name, error = %e, "check could not run");
                CheckResult::fail(format!("failed to run `{}`: {}", command, e))
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// Output read before `deadline`; empty if the pipe is still held open.
fn collect(reader: Option<Receiver<String>>, deadline: Instant) -> String {
    reader
        .and_then(|rx| {
            rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
                .ok()
        })
        .unwrap_or_default()
}

/// Kill the shell and everything in its process group.
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // ESRCH just means the group is already gone
    let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

/// Quote `value` as a single POSIX shell word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Keep the first `limit` characters, marking what was cut.
fn truncate(text: &str, limit: usize) -> String {
    if limit == 0 {
        return text.to_string();
    }
    match text.char_indices().nth(limit) {
        None => text.to_string(),
        Some((idx, _)) => {
            let dropped = text[idx..].chars().count();
            format!("{}\n... [truncated {} chars]", &text[..idx], dropped)
        }
    }
}
