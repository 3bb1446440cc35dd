// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dependency installation and development server launch.
//!
//! Launching is the terminal phase of a run. Dependencies are installed as an
//! ordinary pipeline step gated by the freshness probe, then [`serve`] hands
//! the foreground to the development server until it exits or a signal
//! arrives.

use crate::{
    config::{PackageManagerSettings, ProjectSettings},
    pipeline::{Step, StepResult},
    probe::{dependencies_fresh, Probe},
    shell,
    toolchain::ToolchainContext,
};

use nix::{
    sys::signal::{kill, Signal as NixSignal},
    unistd::Pid,
};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    io,
    process::ExitStatus,
    time::Duration,
};
use tokio::{
    process::{Child, Command},
    signal::unix::{signal, SignalKind},
    time::timeout,
};
use tracing::{debug, error, info, instrument, warn};

/// Time a signalled development server gets to exit before it is killed.
const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Install project dependencies when the manifest is newer than them.
#[derive(Debug, Clone)]
pub struct DependenciesStep {
    project: ProjectSettings,
    manager: PackageManagerSettings,
    network_timeout: Duration,
}

impl DependenciesStep {
    pub fn new(
        project: ProjectSettings,
        manager: PackageManagerSettings,
        network_timeout: Duration,
    ) -> Self {
        Self {
            project,
            manager,
            network_timeout,
        }
    }
}

impl Step for DependenciesStep {
    fn name(&self) -> &str {
        "dependencies"
    }

    fn probe(&self, _ctx: &ToolchainContext) -> Probe {
        dependencies_fresh(&self.project)
    }

    /// Install dependencies without a wall-clock bound.
    ///
    /// Only the package manager's own network timeout applies.
    #[instrument(skip(self, ctx), level = "debug")]
    fn act(&self, ctx: &mut ToolchainContext) -> StepResult {
        let manifest = self.project.dir.join(&self.project.manifest);
        if !manifest.is_file() {
            info!("no {} in {}", self.project.manifest.display(), self.project.dir.display());
            return StepResult::Skipped;
        }

        let mut cmd = ctx.command(&self.manager.name);
        cmd.args(&self.manager.install)
            .arg("--network-timeout")
            .arg(self.network_timeout.as_millis().to_string())
            .current_dir(&self.project.dir);
        info!("installing dependencies with {}", self.manager.name);
        if let Err(err) = shell::run_interactive(cmd) {
            warn!("dependency install failed, development server may not start: {err}");
            return StepResult::FailedSoft;
        }

        if !dependencies_fresh(&self.project).is_satisfied() {
            warn!(
                "{} still older than {} after install",
                self.project.install_dir.display(),
                self.project.lock_file.display()
            );
            return StepResult::FailedSoft;
        }

        StepResult::Acted
    }
}

/// Termination signal received by devstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl Signal {
    fn to_nix(self) -> NixSignal {
        match self {
            Self::Interrupt => NixSignal::SIGINT,
            Self::Terminate => NixSignal::SIGTERM,
        }
    }
}

impl Display for Signal {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Interrupt => fmt.write_str("SIGINT"),
            Self::Terminate => fmt.write_str("SIGTERM"),
        }
    }
}

/// Wait for SIGINT or SIGTERM, whichever comes first.
///
/// # Errors
///
/// - Return [`io::Error`] if signal handlers cannot be installed.
pub async fn wait_for_signal() -> io::Result<Signal> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok(Signal::Interrupt)
        }
        _ = terminate.recv() => Ok(Signal::Terminate),
    }
}

/// How the development server ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    /// Server exited on its own.
    Exited(ExitStatus),

    /// Devstrap was signalled and stopped the server.
    Interrupted(Signal),
}

impl Served {
    /// Process exit code devstrap should report.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Exited(status) if status.success() => 0,
            Self::Exited(_) | Self::Interrupted(_) => 1,
        }
    }
}

enum Event {
    Exited(io::Result<ExitStatus>),
    Signalled(io::Result<Signal>),
}

/// Run the development server in the project directory until it ends.
///
/// The server sees the resolved toolchain through the context `PATH`. A
/// signal received by devstrap is forwarded to the server, which then gets
/// a grace period before being killed.
///
/// # Errors
///
/// - Return [`LaunchError::Spawn`] if the server cannot be started.
/// - Return [`LaunchError::Wait`] if the server cannot be waited on or killed.
/// - Return [`LaunchError::Signal`] if signal handlers cannot be installed.
#[instrument(skip_all, level = "debug")]
pub async fn serve(
    ctx: &ToolchainContext,
    project: &ProjectSettings,
    manager: &PackageManagerSettings,
) -> Result<Served> {
    let mut cmd = ctx.command(&manager.name);
    cmd.args(&manager.serve).current_dir(&project.dir);
    let mut cmd = Command::from(cmd);
    cmd.kill_on_drop(true);

    info!(
        "starting {} {} in {}",
        manager.name,
        manager.serve.join(" "),
        project.dir.display()
    );
    let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        program: manager.name.clone(),
        source,
    })?;

    let event = tokio::select! {
        status = child.wait() => Event::Exited(status),
        signal = wait_for_signal() => Event::Signalled(signal),
    };

    match event {
        Event::Exited(status) => {
            let status = status.map_err(LaunchError::Wait)?;
            if status.success() {
                info!("development server exited");
            } else {
                error!("development server exited with {status}");
            }
            Ok(Served::Exited(status))
        }
        Event::Signalled(signal) => {
            let signal = signal.map_err(LaunchError::Signal)?;
            warn!("interrupted by {signal}, stopping development server");
            stop(&mut child, signal).await?;
            Ok(Served::Interrupted(signal))
        }
    }
}

async fn stop(child: &mut Child, signal: Signal) -> Result<()> {
    if let Some(pid) = child.id() {
        if let Err(errno) = kill(Pid::from_raw(pid as i32), signal.to_nix()) {
            warn!("cannot forward {signal} to {pid}: {errno}");
        }
    }

    match timeout(GRACE_PERIOD, child.wait()).await {
        Ok(status) => {
            let status = status.map_err(LaunchError::Wait)?;
            debug!("development server stopped with {status}");
        }
        Err(_) => {
            warn!("development server ignored {signal} for {}s, killing", GRACE_PERIOD.as_secs());
            child.kill().await.map_err(LaunchError::Wait)?;
        }
    }

    Ok(())
}

/// Launch error types.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Development server cannot be started.
    #[error("failed to start {program:?}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Development server cannot be waited on or killed.
    #[error(transparent)]
    Wait(io::Error),

    /// Signal handlers cannot be installed.
    #[error("failed to install signal handlers")]
    Signal(#[source] io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = LaunchError> = std::result::Result<T, E>;
