// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Toolchain provisioning.
//!
//! The toolchain is everything the collaborator repository needs before it can
//! be installed and served: base OS packages, the version manager, a pinned
//! runtime, and the project package manager.
//!
//! # Toolchain Context
//!
//! The version manager normally works by mutating the environment of an
//! interactive shell. Devstrap never sources anything into its own process.
//! Instead, facts about the toolchain (where the version manager lives, which
//! runtime bin directory is active) are recorded in a [`ToolchainContext`]
//! value that is threaded through every probe and actor. Commands built from
//! the context see the resolved runtime first on their `PATH`.

pub mod nvm;
pub mod packages;

use crate::{
    config::PackageManagerSettings,
    path::{find_program, prepend_search_path},
    pipeline::{Step, StepResult},
    probe::Probe,
    shell,
};

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, error, info, instrument, warn};

pub use nvm::Nvm;
pub use packages::{BasePackagesStep, DistroFamily};

/// Resolved toolchain facts shared between steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolchainContext {
    /// Version manager installation directory.
    pub nvm_dir: PathBuf,

    /// Bin directory of the active runtime, once resolved.
    pub runtime_bin: Option<PathBuf>,

    /// Version string reported by the active runtime, once resolved.
    pub active_version: Option<String>,
}

impl ToolchainContext {
    /// Construct new context with nothing resolved yet.
    pub fn new(nvm_dir: impl Into<PathBuf>) -> Self {
        Self {
            nvm_dir: nvm_dir.into(),
            runtime_bin: None,
            active_version: None,
        }
    }

    /// Search list with the active runtime placed first.
    pub fn search_path(&self) -> OsString {
        prepend_search_path(self.runtime_bin.as_deref())
    }

    /// Resolve program on the context search path.
    pub fn find_program(&self, name: impl AsRef<Path>) -> Option<PathBuf> {
        find_program(name, self.search_path())
    }

    /// Build command that sees the resolved toolchain.
    pub fn command(&self, program: impl AsRef<OsStr>) -> Command {
        let resolved = self
            .find_program(program.as_ref())
            .map(PathBuf::into_os_string)
            .unwrap_or_else(|| program.as_ref().to_os_string());
        let mut cmd = Command::new(resolved);
        cmd.env("PATH", self.search_path())
            .env("NVM_DIR", &self.nvm_dir);
        cmd
    }

    /// Record the runtime the rest of the pipeline should use.
    pub fn activate_runtime(&mut self, node: &Path, version: Option<String>) {
        self.runtime_bin = node.parent().map(Path::to_path_buf);
        self.active_version = version;
    }
}

/// Observed state of one externally managed tool.
///
/// Computed fresh by each probe, never cached across steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolchainState {
    pub binary_present: bool,
    pub version: Option<String>,
    pub is_default: bool,
}

impl ToolchainState {
    /// Check that the tool is present, pinned to `major`, and the default.
    pub fn matches_major(&self, major: u32) -> bool {
        self.binary_present
            && self.is_default
            && self
                .version
                .as_deref()
                .is_some_and(|version| version_has_major(version, major))
    }
}

/// Check that a reported version string such as `v20.11.1` has major `major`.
pub fn version_has_major(version: &str, major: u32) -> bool {
    version
        .trim()
        .trim_start_matches('v')
        .split('.')
        .next()
        .and_then(|head| head.parse::<u32>().ok())
        == Some(major)
}

/// Runtime version manager contract.
///
/// Mirrors the subcommands devstrap relies on. Each call is independent; no
/// call may rely on state left behind by a previous call other than what the
/// version manager persists on disk.
pub trait VersionManager {
    /// Check that the version manager itself is installed.
    fn is_installed(&self, ctx: &ToolchainContext) -> bool;

    /// Install the version manager itself.
    fn install_self(&self, ctx: &ToolchainContext) -> Result<()>;

    /// Check that some version of `major` is installed (`ls <major>`).
    fn ls(&self, ctx: &ToolchainContext, major: u32) -> bool;

    /// Install latest release of `major` (`install <major>`).
    fn install(&self, ctx: &ToolchainContext, major: u32) -> Result<()>;

    /// Make `major` the default (`alias default <major>`).
    fn alias_default(&self, ctx: &ToolchainContext, major: u32) -> Result<()>;

    /// Activate `major` and return the version the runtime reports (`use <major>`).
    fn use_version(&self, ctx: &ToolchainContext, major: u32) -> Result<String>;

    /// Version the default alias resolves to.
    fn default_version(&self, ctx: &ToolchainContext) -> Option<String>;

    /// Path of the runtime binary for `major`.
    fn which(&self, ctx: &ToolchainContext, major: u32) -> Option<PathBuf>;
}

/// Install the version manager.
#[derive(Debug, Clone)]
pub struct VersionManagerStep<V> {
    manager: V,
}

impl<V> VersionManagerStep<V>
where
    V: VersionManager,
{
    pub fn new(manager: V) -> Self {
        Self { manager }
    }
}

impl<V> Step for VersionManagerStep<V>
where
    V: VersionManager,
{
    fn name(&self) -> &str {
        "version-manager"
    }

    fn probe(&self, ctx: &ToolchainContext) -> Probe {
        Probe::from_check(self.manager.is_installed(ctx))
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn act(&self, ctx: &mut ToolchainContext) -> StepResult {
        if let Err(err) = self.manager.install_self(ctx) {
            error!("version manager install failed: {err}");
            return StepResult::FailedFatal;
        }

        if !self.manager.is_installed(ctx) {
            error!("version manager still missing from {}", ctx.nvm_dir.display());
            return StepResult::FailedFatal;
        }

        info!("installed version manager into {}", ctx.nvm_dir.display());
        StepResult::Acted
    }
}

/// Pin the runtime to a major version.
#[derive(Debug, Clone)]
pub struct RuntimeStep<V> {
    manager: V,
    major: u32,
}

impl<V> RuntimeStep<V>
where
    V: VersionManager,
{
    pub fn new(manager: V, major: u32) -> Self {
        Self { manager, major }
    }

    /// Observe the runtime as the version manager reports it.
    pub fn state(&self, ctx: &ToolchainContext) -> ToolchainState {
        if !self.manager.is_installed(ctx) {
            return ToolchainState::default();
        }

        let version = self.manager.default_version(ctx);
        let is_default = version
            .as_deref()
            .is_some_and(|version| version_has_major(version, self.major));
        ToolchainState {
            binary_present: self.manager.ls(ctx, self.major),
            version,
            is_default,
        }
    }
}

impl<V> Step for RuntimeStep<V>
where
    V: VersionManager,
{
    fn name(&self) -> &str {
        "runtime"
    }

    fn probe(&self, ctx: &ToolchainContext) -> Probe {
        let state = self.state(ctx);
        debug!("runtime state: {state:?}");
        Probe::from_check(state.matches_major(self.major))
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn act(&self, ctx: &mut ToolchainContext) -> StepResult {
        let major = self.major;
        if !self.manager.ls(ctx, major) {
            info!("installing runtime v{major}");
            if let Err(err) = self.manager.install(ctx, major) {
                error!("runtime v{major} install failed: {err}");
                return StepResult::FailedFatal;
            }
        }

        if let Err(err) = self.manager.alias_default(ctx, major) {
            error!("cannot make runtime v{major} the default: {err}");
            return StepResult::FailedFatal;
        }

        // INVARIANT: Active runtime must report the pinned major after use.
        match self.manager.use_version(ctx, major) {
            Ok(version) if version_has_major(&version, major) => {
                info!("runtime {version} active and default");
                ctx.active_version = Some(version);
                StepResult::Acted
            }
            Ok(version) => {
                error!("runtime version verification failed: expected v{major}.x, found {version}");
                StepResult::FailedFatal
            }
            Err(err) => {
                error!("runtime version verification failed: {err}");
                StepResult::FailedFatal
            }
        }
    }

    fn export(&self, ctx: &mut ToolchainContext) {
        match self.manager.which(ctx, self.major) {
            Some(node) => {
                let version = ctx
                    .active_version
                    .take()
                    .or_else(|| self.manager.default_version(ctx));
                debug!("runtime resolved to {}", node.display());
                ctx.activate_runtime(&node, version);
            }
            None => warn!("cannot resolve runtime v{} binary", self.major),
        }
    }
}

/// Install the project package manager through the runtime.
#[derive(Debug, Clone)]
pub struct PackageManagerStep {
    settings: PackageManagerSettings,
}

impl PackageManagerStep {
    pub fn new(settings: PackageManagerSettings) -> Self {
        Self { settings }
    }
}

impl Step for PackageManagerStep {
    fn name(&self) -> &str {
        "package-manager"
    }

    fn probe(&self, ctx: &ToolchainContext) -> Probe {
        Probe::from_check(ctx.find_program(&self.settings.name).is_some())
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn act(&self, ctx: &mut ToolchainContext) -> StepResult {
        let Some((program, args)) = self.settings.bootstrap.split_first() else {
            error!("no bootstrap command for {}", self.settings.name);
            return StepResult::FailedFatal;
        };

        let mut cmd = ctx.command(program);
        cmd.args(args);
        if let Err(err) = shell::run_interactive(cmd) {
            error!("{} install failed: {err}", self.settings.name);
            return StepResult::FailedFatal;
        }

        match ctx.find_program(&self.settings.name) {
            Some(path) => {
                info!("installed {} at {}", self.settings.name, path.display());
                StepResult::Acted
            }
            None => {
                error!("{} still not on PATH after install", self.settings.name);
                StepResult::FailedFatal
            }
        }
    }
}

/// Toolchain error types.
#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    /// External tool invocation fails.
    #[error(transparent)]
    Shell(#[from] shell::ShellError),

    /// Filesystem preparation fails.
    #[error("failed to prepare {:?}", path.display())]
    Prepare {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ToolchainError> = std::result::Result<T, E>;
