// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Read-only environment probes.
//!
//! A __probe__ inspects current machine state and reports whether the desired
//! state already holds. Probes never mutate anything, and never fail on missing
//! optional state: absence is a valid answer, reported as
//! [`Probe::NeedsAction`] or [`Probe::Indeterminate`].
//!
//! Toolchain probes live next to their actors in [`toolchain`], and the
//! repository probe lives in [`repo`], because each needs the same resolution
//! logic its actor uses.
//!
//! [`toolchain`]: crate::toolchain
//! [`repo`]: crate::repo

use crate::{
    config::ProjectSettings,
    patch::{Marker, PatchTarget},
    toolchain::ToolchainContext,
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{metadata, read},
    path::Path,
};
use tracing::debug;

/// Answer of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Desired state already holds.
    Satisfied,

    /// Desired state does not hold, and the step knows what to do about it.
    NeedsAction,

    /// No evidence either way. Treated as "no evidence of prior success".
    Indeterminate,
}

impl Probe {
    pub fn is_satisfied(self) -> bool {
        matches!(self, Self::Satisfied)
    }

    /// Map a boolean check onto satisfied or needs-action.
    pub fn from_check(holds: bool) -> Self {
        if holds {
            Self::Satisfied
        } else {
            Self::NeedsAction
        }
    }
}

impl Display for Probe {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Satisfied => fmt.write_str("ok"),
            Self::NeedsAction => fmt.write_str("needs action"),
            Self::Indeterminate => fmt.write_str("unknown"),
        }
    }
}

/// Check that every listed program resolves on the context search path.
pub fn programs_present(ctx: &ToolchainContext, programs: &[String]) -> Probe {
    let missing = programs
        .iter()
        .filter(|program| ctx.find_program(program.as_str()).is_none())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        debug!("missing programs: {missing:?}");
    }

    Probe::from_check(missing.is_empty())
}

/// Check whether a patch target already carries its marker.
///
/// Resolves the first existing candidate under `root`. Returns
/// [`Probe::Indeterminate`] when no candidate exists at all.
pub fn file_marked<M: Marker>(root: &Path, target: &PatchTarget<M>) -> Probe {
    let Some(path) = target.resolve(root) else {
        return Probe::Indeterminate;
    };

    match read(&path) {
        Ok(bytes) => Probe::from_check(target.marker.is_marked(&String::from_utf8_lossy(&bytes))),
        Err(error) => {
            debug!("cannot read {}: {error}", path.display());
            Probe::Indeterminate
        }
    }
}

/// Check whether installed dependencies are at least as new as the manifest.
///
/// Satisfied if and only if the lock file exists, the install directory
/// exists, and the manifest was not modified after the install directory.
pub fn dependencies_fresh(project: &ProjectSettings) -> Probe {
    let manifest = project.dir.join(&project.manifest);
    let lock_file = project.dir.join(&project.lock_file);
    let install_dir = project.dir.join(&project.install_dir);

    if !lock_file.is_file() || !install_dir.is_dir() {
        debug!(
            "missing {} or {}",
            lock_file.display(),
            install_dir.display()
        );
        return Probe::NeedsAction;
    }

    let modified = |path: &Path| metadata(path).and_then(|meta| meta.modified()).ok();
    let (Some(manifest_time), Some(install_time)) = (modified(&manifest), modified(&install_dir))
    else {
        debug!("no modification time for {}", manifest.display());
        return Probe::NeedsAction;
    };

    Probe::from_check(manifest_time <= install_time)
}
