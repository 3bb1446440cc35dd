// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External process invocation.
//!
//! Every collaborator devstrap talks to (package managers, the version
//! manager, the git binary) is reached through one of three calls here:
//! interactive, captured, or bounded by a timeout. Only exit codes and output
//! text cross this boundary.

use std::{
    io::Read,
    process::{Command, Stdio},
    thread,
    time::Duration,
};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Result of a command run under a timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bounded {
    /// Command exited on its own.
    Finished { success: bool, stderr: String },

    /// Command was killed after exceeding its bound.
    TimedOut,
}

impl Bounded {
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Finished { success: true, .. })
    }
}

/// Run command with inherited stdio, blocking until it exits.
///
/// # Errors
///
/// - Return [`ShellError::Spawn`] if the program cannot be started.
/// - Return [`ShellError::Failed`] if it exits non-zero.
pub fn run_interactive(mut cmd: Command) -> Result<()> {
    let program = program_name(&cmd);
    debug!("run {program} {:?}", cmd.get_args().collect::<Vec<_>>());
    let status = cmd
        .spawn()
        .map_err(|source| ShellError::Spawn {
            program: program.clone(),
            source,
        })?
        .wait()
        .map_err(ShellError::Wait)?;

    if !status.success() {
        return Err(ShellError::Failed {
            program,
            message: format!("exited with {status}"),
        });
    }

    Ok(())
}

/// Run command and capture its output.
///
/// Returns stdout with trailing newlines chomped.
///
/// # Errors
///
/// - Return [`ShellError::Spawn`] if the program cannot be started.
/// - Return [`ShellError::Failed`] with stderr if it exits non-zero.
pub fn run_captured(mut cmd: Command) -> Result<String> {
    let program = program_name(&cmd);
    debug!("run {program} {:?}", cmd.get_args().collect::<Vec<_>>());
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|source| ShellError::Spawn {
            program: program.clone(),
            source,
        })?;
    let stdout = chomp(String::from_utf8_lossy(&output.stdout).into_owned());
    let stderr = chomp(String::from_utf8_lossy(&output.stderr).into_owned());

    if !output.status.success() {
        return Err(ShellError::Failed {
            program,
            message: if stderr.is_empty() { stdout } else { stderr },
        });
    }

    Ok(stdout)
}

/// Run command, killing it if it exceeds `timeout`.
///
/// Stdout is discarded and stderr is collected for diagnostics.
///
/// # Errors
///
/// - Return [`ShellError::Spawn`] if the program cannot be started.
/// - Return [`ShellError::Wait`] if the child cannot be waited on or killed.
pub fn run_bounded(mut cmd: Command, timeout: Duration) -> Result<Bounded> {
    let program = program_name(&cmd);
    debug!(
        timeout_secs = timeout.as_secs(),
        "run {program} {:?}",
        cmd.get_args().collect::<Vec<_>>()
    );
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ShellError::Spawn {
            program: program.clone(),
            source,
        })?;

    let mut pipe = child.stderr.take();
    let reader = thread::spawn(move || {
        let mut buffer = String::new();
        if let Some(pipe) = pipe.as_mut() {
            let _ = pipe.read_to_string(&mut buffer);
        }
        buffer
    });

    let status = match child.wait_timeout(timeout).map_err(ShellError::Wait)? {
        Some(status) => status,
        None => {
            warn!("{program} exceeded {}s, killing", timeout.as_secs());
            child.kill().map_err(ShellError::Wait)?;
            child.wait().map_err(ShellError::Wait)?;
            // Helpers spawned by the child may still hold the pipe open.
            drop(reader);
            return Ok(Bounded::TimedOut);
        }
    };

    let stderr = chomp(reader.join().unwrap_or_default());
    Ok(Bounded::Finished {
        success: status.success(),
        stderr,
    })
}

fn program_name(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: String) -> String {
    message.trim_end_matches(['\r', '\n']).to_string()
}

/// Process invocation error types.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// Program could not be started at all.
    #[error("failed to start {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Program ran but reported failure.
    #[error("command {program:?} failed: {message}")]
    Failed { program: String, message: String },

    /// Child process could not be waited on or killed.
    #[error(transparent)]
    Wait(std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = ShellError> = std::result::Result<T, E>;

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn captured_output_is_chomped() -> anyhow::Result<()> {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 'v20.11.1\\n\\n'"]);
        assert_eq!(run_captured(cmd)?, "v20.11.1");
        Ok(())
    }

    #[test]
    fn captured_failure_carries_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo nope >&2; exit 3"]);
        match run_captured(cmd) {
            Err(ShellError::Failed { message, .. }) => assert_eq!(message, "nope"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn bounded_command_is_killed_after_timeout() -> anyhow::Result<()> {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let result = run_bounded(cmd, Duration::from_millis(100))?;
        assert_eq!(result, Bounded::TimedOut);
        Ok(())
    }

    #[test]
    fn bounded_command_reports_exit_status() -> anyhow::Result<()> {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo gone >&2; exit 1"]);
        let result = run_bounded(cmd, Duration::from_secs(5))?;
        assert_eq!(
            result,
            Bounded::Finished {
                success: false,
                stderr: "gone".into()
            }
        );
        Ok(())
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let cmd = Command::new("devstrap-no-such-program");
        assert!(matches!(run_interactive(cmd), Err(ShellError::Spawn { .. })));
    }
}
