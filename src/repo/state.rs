// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Repository state probing.
//!
//! Local facts (remote URL, current branch, commits) are read straight from
//! the repository through libgit2. The only network call is a fetch bounded by
//! a short timeout, made after the cheaper local checks have passed.

use crate::{
    config::RepositorySettings,
    repo::transport::{GitTransport, NetworkOutcome},
};

use git2::Repository;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
    time::Duration,
};
use tracing::{debug, warn};

/// Observed state of the project checkout.
///
/// # Invariant
///
/// - When `exists` is false, every other field is false or absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoState {
    pub exists: bool,
    pub is_git_repo: bool,
    pub remote_url: Option<String>,
    pub current_branch: Option<String>,
    pub local_commit: Option<String>,
    pub remote_commit: Option<String>,
    pub fetch_reachable: bool,
}

/// Classification that drives the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoClass {
    /// No usable checkout at the target path.
    Absent,

    /// Checkout tracks some other project.
    WrongRemote,

    /// Checkout is on the wrong branch or behind its remote.
    NeedsUpdate,

    /// Checkout matches the pinned branch, or the remote cannot be reached.
    UpToDate,
}

impl Display for RepoClass {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Absent => fmt.write_str("absent"),
            Self::WrongRemote => fmt.write_str("wrong remote"),
            Self::NeedsUpdate => fmt.write_str("needs update"),
            Self::UpToDate => fmt.write_str("up to date"),
        }
    }
}

impl RepoState {
    /// Classify state against the desired repository settings.
    ///
    /// Branch identity is checked before commit identity. An unreachable
    /// remote counts as up to date, so whatever is on disk gets used.
    pub fn classify(&self, settings: &RepositorySettings) -> RepoClass {
        if !self.exists || !self.is_git_repo {
            return RepoClass::Absent;
        }

        let right_remote = self
            .remote_url
            .as_deref()
            .is_some_and(|url| url.contains(settings.upstream_match.as_str()));
        if !right_remote {
            return RepoClass::WrongRemote;
        }

        if self.current_branch.as_deref() != Some(settings.branch.as_str()) {
            return RepoClass::NeedsUpdate;
        }

        if !self.fetch_reachable {
            return RepoClass::UpToDate;
        }

        if self.remote_commit.is_some() && self.local_commit != self.remote_commit {
            return RepoClass::NeedsUpdate;
        }

        RepoClass::UpToDate
    }

    /// Check that the checkout can be trusted as the right project on the
    /// pinned branch, regardless of freshness.
    pub fn is_pinned(&self, settings: &RepositorySettings) -> bool {
        !matches!(self.classify(settings), RepoClass::Absent | RepoClass::WrongRemote)
            && self.current_branch.as_deref() == Some(settings.branch.as_str())
    }
}

/// Read local repository facts without touching the network.
pub fn inspect(workdir: &Path, settings: &RepositorySettings) -> RepoState {
    if !workdir.exists() {
        return RepoState::default();
    }

    let Ok(repository) = Repository::open(workdir) else {
        debug!("{} is not a git repository", workdir.display());
        return RepoState {
            exists: true,
            ..RepoState::default()
        };
    };

    let remote_url = repository
        .find_remote(&settings.remote)
        .ok()
        .and_then(|remote| remote.url().map(str::to_owned));
    let head = repository.head().ok();
    let current_branch = head
        .as_ref()
        .filter(|head| head.is_branch())
        .and_then(|head| head.shorthand().map(str::to_owned));
    let local_commit = head
        .as_ref()
        .and_then(|head| head.target())
        .map(|oid| oid.to_string());

    RepoState {
        exists: true,
        is_git_repo: true,
        remote_url,
        current_branch,
        local_commit,
        remote_commit: remote_commit(&repository, settings),
        fetch_reachable: false,
    }
}

fn remote_commit(repository: &Repository, settings: &RepositorySettings) -> Option<String> {
    repository
        .find_reference(&format!("refs/remotes/{}/{}", settings.remote, settings.branch))
        .ok()
        .and_then(|reference| reference.target())
        .map(|oid| oid.to_string())
}

/// Probe full repository state, fetching from the remote when it matters.
///
/// The fetch only happens for a checkout that is already on the right remote
/// and branch. A fetch that fails or exceeds `fetch_timeout` leaves
/// `fetch_reachable` false, which classifies as up to date.
pub fn repo_state(
    workdir: &Path,
    settings: &RepositorySettings,
    transport: &impl GitTransport,
    fetch_timeout: Duration,
) -> RepoState {
    let mut state = inspect(workdir, settings);
    if state.classify(settings) != RepoClass::UpToDate {
        return state;
    }

    match transport.fetch(workdir, &settings.remote, fetch_timeout) {
        NetworkOutcome::Done => {
            state.fetch_reachable = true;
            state.remote_commit = Repository::open(workdir)
                .ok()
                .and_then(|repository| remote_commit(&repository, settings));
        }
        NetworkOutcome::TimedOut => {
            warn!(
                "fetch from {} timed out after {}s, using local checkout",
                settings.remote,
                fetch_timeout.as_secs()
            );
        }
        NetworkOutcome::Failed(reason) => {
            warn!("fetch from {} failed, using local checkout: {reason}", settings.remote);
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settings() -> RepositorySettings {
        RepositorySettings {
            url: "https://github.com/storefront-labs/storefront.git".into(),
            upstream_match: "storefront-labs/storefront".into(),
            branch: "develop".into(),
            remote: "origin".into(),
        }
    }

    fn pinned() -> RepoState {
        RepoState {
            exists: true,
            is_git_repo: true,
            remote_url: Some("git@github.com:storefront-labs/storefront.git".into()),
            current_branch: Some("develop".into()),
            local_commit: Some("aaaa".into()),
            remote_commit: Some("aaaa".into()),
            fetch_reachable: true,
        }
    }

    #[test]
    fn classify_missing_and_non_git_as_absent() {
        assert_eq!(RepoState::default().classify(&settings()), RepoClass::Absent);

        let plain_dir = RepoState {
            exists: true,
            ..RepoState::default()
        };
        assert_eq!(plain_dir.classify(&settings()), RepoClass::Absent);
    }

    #[test]
    fn classify_remote_by_substring() {
        let state = RepoState {
            remote_url: Some("https://gitlab.com/someone/fork.git".into()),
            ..pinned()
        };
        assert_eq!(state.classify(&settings()), RepoClass::WrongRemote);

        let state = RepoState {
            remote_url: None,
            ..pinned()
        };
        assert_eq!(state.classify(&settings()), RepoClass::WrongRemote);
    }

    #[test]
    fn wrong_branch_wins_over_matching_commits() {
        let state = RepoState {
            current_branch: Some("main".into()),
            ..pinned()
        };
        assert_eq!(state.classify(&settings()), RepoClass::NeedsUpdate);

        let detached = RepoState {
            current_branch: None,
            ..pinned()
        };
        assert_eq!(detached.classify(&settings()), RepoClass::NeedsUpdate);
    }

    #[test]
    fn classify_commit_identity() {
        assert_eq!(pinned().classify(&settings()), RepoClass::UpToDate);

        let behind = RepoState {
            remote_commit: Some("bbbb".into()),
            ..pinned()
        };
        assert_eq!(behind.classify(&settings()), RepoClass::NeedsUpdate);

        let unreachable = RepoState {
            fetch_reachable: false,
            ..behind
        };
        assert_eq!(unreachable.classify(&settings()), RepoClass::UpToDate);
    }
}
