// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevant path information for binaries and files that provisioning
//! needs to inspect, without touching any of them.

use std::{
    env,
    ffi::OsString,
    path::{Path, PathBuf},
};

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Resolve a program name against a `PATH`-style search list.
///
/// Names containing a path separator are checked as-is. Otherwise each
/// directory of `search` is tried in order and the first regular file wins.
pub fn find_program(name: impl AsRef<Path>, search: impl AsRef<std::ffi::OsStr>) -> Option<PathBuf> {
    let name = name.as_ref();
    if name.components().count() > 1 {
        return name.is_file().then(|| name.to_path_buf());
    }

    env::split_paths(search.as_ref())
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Build a search list with `front` placed ahead of the current `PATH`.
pub fn prepend_search_path(front: Option<&Path>) -> OsString {
    let current = env::var_os("PATH").unwrap_or_default();
    let Some(front) = front else {
        return current;
    };

    let mut dirs = vec![front.to_path_buf()];
    dirs.extend(env::split_paths(&current).filter(|dir| dir != front));
    env::join_paths(dirs).unwrap_or(current)
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
