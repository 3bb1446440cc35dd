// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent file overrides.
//!
//! The patch engine replaces a file in the collaborator repository with a
//! fixed payload, but only when the file does not already carry the payload's
//! __marker__.
//!
//! # Markers
//!
//! A marker is a content fingerprint that proves a patch was already applied.
//! It is checked as a predicate over file content rather than as a byte-for-byte
//! comparison, so upstream edits around the marked content never trigger a
//! re-patch. See [`Marker`].
//!
//! # Backups
//!
//! Before any overwrite, the original is copied next to itself. Backups are
//! append-only: an existing backup is never overwritten, a fresh timestamped
//! name is picked instead. Backups are never deleted by devstrap.

use crate::{
    pipeline::{Step, StepResult},
    probe::{file_marked, Probe},
    toolchain::ToolchainContext,
};

use chrono::{DateTime, Local};
use glob::{glob, Pattern};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fs::{metadata, read, File, OpenOptions},
    io::{copy, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument, warn};

/// Content fingerprint of an applied patch.
pub trait Marker {
    /// Check if content already carries the patch.
    fn is_marked(&self, content: &str) -> bool;
}

impl<F> Marker for F
where
    F: Fn(&str) -> bool,
{
    fn is_marked(&self, content: &str) -> bool {
        self(content)
    }
}

/// Marker that holds when every listed substring is present.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ContainsAll {
    needles: Vec<String>,
}

impl ContainsAll {
    /// Construct new substring marker.
    pub fn new(needles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            needles: needles.into_iter().map(Into::into).collect(),
        }
    }
}

impl Marker for ContainsAll {
    fn is_marked(&self, content: &str) -> bool {
        !self.needles.is_empty() && self.needles.iter().all(|needle| content.contains(needle))
    }
}

/// Naming scheme for backups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupPolicy {
    /// `<path>.backup`, falling back to a timestamped name once taken.
    Single,

    /// `<path>.backup.<timestamp>`.
    Timestamped,
}

/// A file to override under marker control.
#[derive(Debug, Clone)]
pub struct PatchTarget<M>
where
    M: Marker,
{
    /// Name used in logs.
    pub name: String,

    /// Ordered glob patterns relative to the project root.
    pub candidates: Vec<String>,

    /// File name for the recursive fallback search.
    pub search_name: String,

    /// Fingerprint of an applied patch.
    pub marker: M,

    /// Replacement content.
    pub payload: String,

    /// How the original is preserved.
    pub backup: BackupPolicy,
}

impl<M> PatchTarget<M>
where
    M: Marker,
{
    /// Locate the file to patch under `root`.
    ///
    /// Tries each candidate pattern in declared order, then walks the whole
    /// tree for a file named [`search_name`](Self::search_name). The walk
    /// enters hidden and ignored directories too, skipping only dependency
    /// install directories.
    pub fn resolve(&self, root: &Path) -> Option<PathBuf> {
        let base = Pattern::escape(root.to_string_lossy().as_ref());
        for pattern in &self.candidates {
            let pattern = format!("{base}/{pattern}");
            let Ok(paths) = glob(&pattern) else {
                debug!("skip malformed candidate pattern {pattern}");
                continue;
            };

            if let Some(path) = paths.flatten().find(|path| path.is_file()) {
                return Some(path);
            }
        }

        if !root.is_dir() {
            return None;
        }

        debug!("no candidate for {} matched, searching {}", self.name, root.display());
        WalkBuilder::new(root)
            .standard_filters(false)
            .filter_entry(|entry| entry.file_name() != "node_modules")
            .sort_by_file_name(|a, b| a.cmp(b))
            .build()
            .flatten()
            .filter(|entry| entry.file_type().is_some_and(|kind| kind.is_file()))
            .find(|entry| entry.file_name() == self.search_name.as_str())
            .map(|entry| entry.into_path())
    }
}

/// Proof that an original was preserved before overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub original: PathBuf,
    pub backup: PathBuf,
    pub timestamp: DateTime<Local>,
}

/// What the engine did to a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// No candidate file exists.
    NotFound,

    /// File already carries the marker.
    AlreadyMarked(PathBuf),

    /// Payload written after backing up the original.
    Applied(BackupRecord),
}

/// Apply patch targets to files under a project root.
#[derive(Debug, Clone)]
pub struct PatchEngine {
    root: PathBuf,
}

impl PatchEngine {
    /// Construct new patch engine rooted at project directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Apply target and report the step result.
    ///
    /// Missing files and failures that leave the original untouched are soft.
    /// A payload that fails its own marker after being written is fatal, even
    /// after the original was restored.
    pub fn apply<M: Marker>(&self, target: &PatchTarget<M>) -> StepResult {
        match self.try_apply(target) {
            Ok(PatchOutcome::NotFound) => {
                warn!("{}: no target file found under {}", target.name, self.root.display());
                StepResult::FailedSoft
            }
            Ok(PatchOutcome::AlreadyMarked(path)) => {
                info!("{}: {} already patched", target.name, path.display());
                StepResult::Satisfied
            }
            Ok(PatchOutcome::Applied(record)) => {
                info!(
                    "{}: patched {} (backup at {})",
                    target.name,
                    record.original.display(),
                    record.backup.display()
                );
                StepResult::Acted
            }
            Err(err @ (PatchError::Verification { .. } | PatchError::Restore { .. })) => {
                error!("{}: {err}", target.name);
                StepResult::FailedFatal
            }
            Err(err) => {
                error!("{}: {err}", target.name);
                StepResult::FailedSoft
            }
        }
    }

    /// Apply target, returning what was done.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::Read`] if the resolved file cannot be read.
    /// - Return [`PatchError::Backup`] if the backup cannot be created.
    /// - Return [`PatchError::Write`] if the payload cannot be written.
    /// - Return [`PatchError::Verification`] if the written file lacks the
    ///   marker. The original has been restored in this case.
    /// - Return [`PatchError::Restore`] if restoring after a failed
    ///   verification fails too.
    #[instrument(skip(self, target), fields(patch = %target.name), level = "debug")]
    pub fn try_apply<M: Marker>(&self, target: &PatchTarget<M>) -> Result<PatchOutcome> {
        let Some(path) = target.resolve(&self.root) else {
            return Ok(PatchOutcome::NotFound);
        };

        let original = read(&path).map_err(|source| PatchError::Read {
            source,
            path: path.clone(),
        })?;
        if target.marker.is_marked(&String::from_utf8_lossy(&original)) {
            return Ok(PatchOutcome::AlreadyMarked(path));
        }

        let record = backup(&path, target.backup)?;
        debug!("backed up {} to {}", path.display(), record.backup.display());

        write_atomic(&path, target.payload.as_bytes()).map_err(|source| PatchError::Write {
            source,
            path: path.clone(),
        })?;

        // INVARIANT: Written content must satisfy its own marker, else restore.
        let written = read(&path).unwrap_or_default();
        if !target.marker.is_marked(&String::from_utf8_lossy(&written)) {
            read(&record.backup)
                .and_then(|saved| write_atomic(&path, &saved))
                .map_err(|source| PatchError::Restore {
                    source,
                    path: path.clone(),
                    backup: record.backup.clone(),
                })?;
            return Err(PatchError::Verification {
                path,
                backup: record.backup,
            });
        }

        Ok(PatchOutcome::Applied(record))
    }
}

/// Copy `original` to a backup path that does not exist yet.
///
/// # Errors
///
/// - Return [`PatchError::Backup`] if the copy fails.
pub fn backup(original: &Path, policy: BackupPolicy) -> Result<BackupRecord> {
    let timestamp = Local::now();
    let path = backup_path(original, policy, &timestamp);
    let to_error = |source| PatchError::Backup {
        source,
        path: path.clone(),
    };

    // INVARIANT: Never overwrite an existing backup.
    let mut source = File::open(original).map_err(to_error)?;
    let mut sink = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(to_error)?;
    copy(&mut source, &mut sink).map_err(to_error)?;
    sink.sync_all().map_err(to_error)?;

    Ok(BackupRecord {
        original: original.to_path_buf(),
        backup: path,
        timestamp,
    })
}

/// Pick the first free backup name for `original` under `policy`.
pub fn backup_path(original: &Path, policy: BackupPolicy, timestamp: &DateTime<Local>) -> PathBuf {
    let single = with_suffix(original, ".backup");
    if policy == BackupPolicy::Single && !single.exists() {
        return single;
    }

    let stamp = timestamp.format("%Y%m%d_%H%M%S").to_string();
    let stamped = with_suffix(original, &format!(".backup.{stamp}"));
    if !stamped.exists() {
        return stamped;
    }

    (1..)
        .map(|count| with_suffix(original, &format!(".backup.{stamp}-{count}")))
        .find(|path| !path.exists())
        .unwrap_or(stamped)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Replace file content through a temporary file in the same directory.
fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    if let Ok(meta) = metadata(path) {
        temp.as_file().set_permissions(meta.permissions())?;
    }
    temp.persist(path).map_err(|err| err.error)?;

    Ok(())
}

/// Pipeline step applying one patch target to the project checkout.
#[derive(Debug, Clone)]
pub struct PatchStep<M>
where
    M: Marker,
{
    engine: PatchEngine,
    target: PatchTarget<M>,
}

impl<M> PatchStep<M>
where
    M: Marker,
{
    pub fn new(root: impl Into<PathBuf>, target: PatchTarget<M>) -> Self {
        Self {
            engine: PatchEngine::new(root),
            target,
        }
    }
}

impl<M> Step for PatchStep<M>
where
    M: Marker,
{
    fn name(&self) -> &str {
        &self.target.name
    }

    fn probe(&self, _ctx: &ToolchainContext) -> Probe {
        file_marked(&self.engine.root, &self.target)
    }

    fn act(&self, _ctx: &mut ToolchainContext) -> StepResult {
        self.engine.apply(&self.target)
    }
}

/// Patch engine error types.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Target file cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Backup copy cannot be created.
    #[error("failed to create backup {:?}", path.display())]
    Backup {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Payload cannot be written. The original is untouched.
    #[error("failed to write payload to {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Payload written but does not carry its own marker.
    #[error(
        "payload written to {:?} does not carry its marker, original restored from {:?}",
        path.display(),
        backup.display()
    )]
    Verification { path: PathBuf, backup: PathBuf },

    /// Original cannot be restored after failed verification.
    #[error("failed to restore {:?}, original kept at {:?}", path.display(), backup.display())]
    Restore {
        #[source]
        source: std::io::Error,
        path: PathBuf,
        backup: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = PatchError> = std::result::Result<T, E>;
