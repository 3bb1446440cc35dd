// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provision plan layout.
//!
//! The __provision plan__ is the configuration data that tells devstrap what
//! the desired state of a machine looks like: which packages to install, which
//! runtime version to pin, which repository to reconcile, and which files to
//! patch. Behavior lives in the engine, the plan only supplies values.
//!
//! A default plan is embedded in the binary and parsed at startup. There is no
//! user-facing configuration file; swapping the plan means swapping the data.

use crate::{
    patch::{BackupPolicy, ContainsAll, PatchTarget},
    path::home_dir,
};

use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

/// Built-in provision plan source.
const BUILTIN_PLAN: &str = include_str!("../plan/default.toml");

/// Provision plan layout.
///
/// # General Layout
///
/// A plan is split into one table per provisioning concern, plus an array of
/// `[[patch]]` tables that describe each file override to apply to the
/// collaborator repository.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Plan {
    /// Project checkout and dependency layout.
    pub project: ProjectSettings,

    /// OS packages required before anything else can run.
    pub base_packages: BasePackages,

    /// Pinned runtime managed through the version manager.
    pub runtime: RuntimeSettings,

    /// Project package manager.
    pub package_manager: PackageManagerSettings,

    /// Upstream repository to reconcile the project checkout against.
    pub repository: RepositorySettings,

    /// Bounds for network-facing operations.
    #[serde(default)]
    pub timeouts: Timeouts,

    /// File overrides applied to the project checkout, in order.
    #[serde(rename = "patch", default)]
    pub patches: Vec<PatchSettings>,
}

impl Plan {
    /// Parse the plan embedded in the binary.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Deserialize`] if the embedded plan is malformed.
    /// - Return [`ConfigError::ShellExpansion`] if a path field references an
    ///   unset variable.
    pub fn builtin() -> Result<Self> {
        BUILTIN_PLAN.parse()
    }

    /// Look up patch settings by name.
    pub fn patch(&self, name: impl AsRef<str>) -> Option<&PatchSettings> {
        self.patches.iter().find(|patch| patch.name == name.as_ref())
    }
}

impl FromStr for Plan {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut plan: Plan = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on path fields.
        plan.project.dir = expand(&plan.project.dir)?;
        plan.runtime.nvm_dir = expand(&plan.runtime.nvm_dir)?;

        Ok(plan)
    }
}

// INVARIANT: Expand `~` and `$VAR`, rejecting unset variables.
fn expand(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full_with_context(
        raw.as_ref(),
        || home_dir().ok().map(|home| home.to_string_lossy().into_owned()),
        |var| env::var(var).map(Some),
    )
    .map_err(ConfigError::ShellExpansion)?;

    Ok(PathBuf::from(expanded.into_owned()))
}

/// Project checkout and dependency layout.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ProjectSettings {
    /// Directory the collaborator repository is checked out into.
    pub dir: PathBuf,

    /// Dependency manifest, relative to the project directory.
    pub manifest: PathBuf,

    /// Dependency lock file, relative to the project directory.
    pub lock_file: PathBuf,

    /// Dependency install directory, relative to the project directory.
    pub install_dir: PathBuf,
}

/// OS packages needed by later steps.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct BasePackages {
    /// Binaries whose presence proves the packages are installed.
    pub binaries: Vec<String>,

    pub apt: Vec<String>,
    pub dnf: Vec<String>,
    pub yum: Vec<String>,
    pub pacman: Vec<String>,
    pub zypper: Vec<String>,
}

/// Runtime pinned through the version manager.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RuntimeSettings {
    /// Major version the runtime is pinned to.
    pub major: u32,

    /// Version manager installation directory.
    pub nvm_dir: PathBuf,

    /// Install script for the version manager itself.
    pub nvm_install_url: String,
}

/// Project package manager commands.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PackageManagerSettings {
    /// Binary name of the package manager.
    pub name: String,

    /// Command that installs the package manager through the runtime.
    pub bootstrap: Vec<String>,

    /// Arguments for dependency installation.
    pub install: Vec<String>,

    /// Arguments that start the development server.
    pub serve: Vec<String>,
}

/// Upstream repository to reconcile against.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RepositorySettings {
    /// URL to clone from.
    pub url: String,

    /// Substring any acceptable remote URL must contain.
    pub upstream_match: String,

    /// Pinned working branch.
    pub branch: String,

    /// Remote name used for fetch and pull.
    #[serde(default = "default_remote")]
    pub remote: String,
}

fn default_remote() -> String {
    "origin".into()
}

/// Bounds for network-facing operations, in seconds.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Timeouts {
    pub fetch_secs: u64,
    pub pull_secs: u64,
    pub install_network_secs: u64,
}

impl Timeouts {
    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn pull(&self) -> Duration {
        Duration::from_secs(self.pull_secs)
    }

    pub fn install_network(&self) -> Duration {
        Duration::from_secs(self.install_network_secs)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            fetch_secs: 10,
            pull_secs: 15,
            install_network_secs: 100,
        }
    }
}

/// One file override applied to the project checkout.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PatchSettings {
    /// Name used in logs and the summary.
    pub name: String,

    /// Ordered glob patterns relative to the project directory.
    pub candidates: Vec<String>,

    /// File name used for the recursive fallback search.
    pub search_name: String,

    /// Substrings that together fingerprint an applied patch.
    pub markers: Vec<String>,

    /// How the original is preserved before overwrite.
    pub backup: BackupPolicy,

    /// Replacement content.
    pub payload: String,
}

impl PatchSettings {
    /// Turn settings into a patch target matched by all configured markers.
    pub fn to_target(&self) -> PatchTarget<ContainsAll> {
        PatchTarget {
            name: self.name.clone(),
            candidates: self.candidates.clone(),
            search_name: self.search_name.clone(),
            marker: ContainsAll::new(self.markers.iter().cloned()),
            payload: self.payload.clone(),
            backup: self.backup,
        }
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
