// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Collaborator repository reconciliation.
//!
//! The project checkout is driven toward one desired state: a git checkout of
//! the upstream repository, on the pinned branch, at the remote's latest
//! commit. The reconciler classifies the current checkout and picks the
//! smallest action that gets there.
//!
//! | State         | Action                                          |
//! |---------------|-------------------------------------------------|
//! | `Absent`      | remove stale directory, clone pinned branch      |
//! | `WrongRemote` | same as `Absent`                                |
//! | `NeedsUpdate` | checkout pinned branch, pull with one retry      |
//! | `UpToDate`    | nothing                                         |
//!
//! A failed clone is fatal since nothing usable is on disk. A failed update is
//! not: a stale checkout still beats no run at all.

pub mod state;
pub mod transport;

pub use state::{inspect, repo_state, RepoClass, RepoState};
pub use transport::{GitTransport, NetworkOutcome, SystemGit};

use crate::{
    config::{RepositorySettings, Timeouts},
    pipeline::{Step, StepResult},
    probe::Probe,
    toolchain::ToolchainContext,
};

use std::{
    cell::RefCell,
    fs::{create_dir_all, remove_dir_all},
    path::PathBuf,
};
use tracing::{debug, error, info, instrument, warn};

/// Drive the project checkout toward the pinned upstream branch.
#[derive(Debug, Clone)]
pub struct Reconciler<T = SystemGit>
where
    T: GitTransport,
{
    settings: RepositorySettings,
    workdir: PathBuf,
    timeouts: Timeouts,
    transport: T,
}

impl<T> Reconciler<T>
where
    T: GitTransport,
{
    /// Construct new reconciler for checkout at `workdir`.
    pub fn new(
        settings: RepositorySettings,
        workdir: impl Into<PathBuf>,
        timeouts: Timeouts,
        transport: T,
    ) -> Self {
        Self {
            settings,
            workdir: workdir.into(),
            timeouts,
            transport,
        }
    }

    /// Borrow underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Probe current checkout state, fetching under the configured bound.
    pub fn state(&self) -> RepoState {
        repo_state(
            &self.workdir,
            &self.settings,
            &self.transport,
            self.timeouts.fetch(),
        )
    }

    /// Probe state, classify it, and act on the classification.
    pub fn reconcile(&self) -> StepResult {
        self.reconcile_from(self.state())
    }

    /// Act on an already observed state without fetching again.
    #[instrument(skip(self, state), level = "debug")]
    pub fn reconcile_from(&self, state: RepoState) -> StepResult {
        let class = state.classify(&self.settings);
        debug!("repository state {state:?} classified as {class}");

        match class {
            RepoClass::UpToDate => {
                info!("{} is up to date on {}", self.workdir.display(), self.settings.branch);
                StepResult::Satisfied
            }
            RepoClass::Absent => {
                info!("no checkout at {}, cloning", self.workdir.display());
                self.fresh_clone()
            }
            RepoClass::WrongRemote => {
                warn!(
                    "{} tracks {:?}, not {}, re-cloning",
                    self.workdir.display(),
                    state.remote_url.as_deref().unwrap_or("nothing"),
                    self.settings.upstream_match
                );
                self.fresh_clone()
            }
            RepoClass::NeedsUpdate => {
                info!(
                    "updating {} to {}/{}",
                    self.workdir.display(),
                    self.settings.remote,
                    self.settings.branch
                );
                self.update()
            }
        }
    }

    fn fresh_clone(&self) -> StepResult {
        if self.workdir.exists() {
            debug!("removing stale directory {}", self.workdir.display());
            if let Err(err) = remove_dir_all(&self.workdir) {
                error!("cannot remove {}: {err}", self.workdir.display());
                return StepResult::FailedFatal;
            }
        }

        if let Some(parent) = self.workdir.parent() {
            if let Err(err) = create_dir_all(parent) {
                error!("cannot create {}: {err}", parent.display());
                return StepResult::FailedFatal;
            }
        }

        if let Err(err) =
            self.transport
                .clone_branch(&self.settings.url, &self.workdir, &self.settings.branch)
        {
            error!("clone of {} failed: {err}", self.settings.url);
            return StepResult::FailedFatal;
        }

        // INVARIANT: Fresh clone must be the right project on the pinned branch.
        if !inspect(&self.workdir, &self.settings).is_pinned(&self.settings) {
            error!(
                "clone at {} is not on {}",
                self.workdir.display(),
                self.settings.branch
            );
            return StepResult::FailedFatal;
        }

        StepResult::Acted
    }

    fn update(&self) -> StepResult {
        let RepositorySettings { remote, branch, .. } = &self.settings;
        if let Err(err) = self.transport.checkout(&self.workdir, remote, branch) {
            warn!("checkout of {branch} failed, continuing with current checkout: {err}");
            return StepResult::FailedSoft;
        }

        let timeout = self.timeouts.pull();
        match self.transport.pull(&self.workdir, remote, branch, timeout) {
            NetworkOutcome::Done => {
                info!("pulled {remote}/{branch}");
                return self.verify_update();
            }
            outcome => debug!("first pull attempt: {outcome:?}"),
        }

        if let Err(err) = self.transport.reset_hard(&self.workdir) {
            warn!("hard reset before retry failed: {err}");
        }

        match self.transport.pull(&self.workdir, remote, branch, timeout) {
            NetworkOutcome::Done => {
                info!("pulled {remote}/{branch} after reset");
                self.verify_update()
            }
            outcome => {
                warn!("pull of {remote}/{branch} failed twice ({outcome:?}), using checkout on disk");
                StepResult::FailedSoft
            }
        }
    }

    // INVARIANT: Updated checkout must be pinned and at the remote commit.
    fn verify_update(&self) -> StepResult {
        let state = inspect(&self.workdir, &self.settings);
        let at_remote = state.local_commit.is_some() && state.local_commit == state.remote_commit;
        if state.is_pinned(&self.settings) && at_remote {
            return StepResult::Acted;
        }

        warn!(
            "{} still not at {}/{} after pull (local {:?}, remote {:?}), using checkout on disk",
            self.workdir.display(),
            self.settings.remote,
            self.settings.branch,
            state.local_commit,
            state.remote_commit
        );
        StepResult::FailedSoft
    }
}

/// Pipeline step wrapping the reconciler.
///
/// The state observed by [`probe`](Step::probe) is kept for the following
/// [`act`](Step::act), so one run fetches from the remote once.
#[derive(Debug, Clone)]
pub struct RepositoryStep<T = SystemGit>
where
    T: GitTransport,
{
    reconciler: Reconciler<T>,
    observed: RefCell<Option<RepoState>>,
}

impl<T> RepositoryStep<T>
where
    T: GitTransport,
{
    pub fn new(reconciler: Reconciler<T>) -> Self {
        Self {
            reconciler,
            observed: RefCell::new(None),
        }
    }

    /// Borrow wrapped reconciler.
    pub fn reconciler(&self) -> &Reconciler<T> {
        &self.reconciler
    }
}

impl<T> Step for RepositoryStep<T>
where
    T: GitTransport,
{
    fn name(&self) -> &str {
        "repository"
    }

    fn probe(&self, _ctx: &ToolchainContext) -> Probe {
        let state = self.reconciler.state();
        let probe = Probe::from_check(state.classify(&self.reconciler.settings) == RepoClass::UpToDate);
        self.observed.replace(Some(state));
        probe
    }

    fn act(&self, _ctx: &mut ToolchainContext) -> StepResult {
        match self.observed.take() {
            Some(state) => self.reconciler.reconcile_from(state),
            None => self.reconciler.reconcile(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::transport::Result as TransportResult;
    use pretty_assertions::assert_eq;
    use git2::{Repository, RepositoryInitOptions, Signature};
    use std::{collections::VecDeque, path::Path, time::Duration};

    /// Transport double with scripted outcomes and a call log.
    #[derive(Debug, Default)]
    struct ScriptedGit {
        pulls: RefCell<VecDeque<NetworkOutcome>>,
        fail_checkout: bool,
        reachable: bool,
        calls: RefCell<Vec<String>>,
    }

    impl ScriptedGit {
        fn with_pulls(pulls: impl IntoIterator<Item = NetworkOutcome>) -> Self {
            Self {
                pulls: RefCell::new(pulls.into_iter().collect()),
                ..Self::default()
            }
        }

        fn log(&self, call: impl Into<String>) {
            self.calls.borrow_mut().push(call.into());
        }
    }

    impl GitTransport for ScriptedGit {
        fn fetch(&self, _workdir: &Path, _remote: &str, _timeout: Duration) -> NetworkOutcome {
            self.log("fetch");
            if self.reachable {
                NetworkOutcome::Done
            } else {
                NetworkOutcome::TimedOut
            }
        }

        fn pull(&self, _: &Path, remote: &str, branch: &str, _: Duration) -> NetworkOutcome {
            self.log(format!("pull {remote} {branch}"));
            self.pulls
                .borrow_mut()
                .pop_front()
                .unwrap_or(NetworkOutcome::Failed("exhausted".into()))
        }

        fn clone_branch(&self, _url: &str, _workdir: &Path, branch: &str) -> TransportResult<()> {
            self.log(format!("clone {branch}"));
            Err(git2::Error::from_str("network unreachable").into())
        }

        fn checkout(&self, _workdir: &Path, _remote: &str, branch: &str) -> TransportResult<()> {
            self.log(format!("checkout {branch}"));
            if self.fail_checkout {
                return Err(git2::Error::from_str("pathspec did not match").into());
            }
            Ok(())
        }

        fn reset_hard(&self, _workdir: &Path) -> TransportResult<()> {
            self.log("reset");
            Ok(())
        }
    }

    fn settings() -> RepositorySettings {
        RepositorySettings {
            url: "https://github.com/storefront-labs/storefront.git".into(),
            upstream_match: "storefront-labs/storefront".into(),
            branch: "develop".into(),
            remote: "origin".into(),
        }
    }

    fn reconciler(workdir: &Path, git: ScriptedGit) -> Reconciler<ScriptedGit> {
        Reconciler::new(settings(), workdir, Timeouts::default(), git)
    }

    /// Initialize checkout on the pinned branch whose remote-tracking ref sits
    /// `behind` commits ahead of HEAD.
    fn pinned_checkout(root: &Path, behind: usize) -> anyhow::Result<PathBuf> {
        let workdir = root.join("storefront");
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("develop");
        let repository = Repository::init_opts(&workdir, &opts)?;
        let signature = Signature::now("devstrap", "devstrap@localhost")?;
        let tree = repository.find_tree(repository.index()?.write_tree()?)?;

        let mut tip = repository.commit(Some("HEAD"), &signature, &signature, "initial", &tree, &[])?;
        for n in 0..behind {
            let parent = repository.find_commit(tip)?;
            let message = format!("upstream {n}");
            tip = repository.commit(None, &signature, &signature, &message, &tree, &[&parent])?;
        }

        repository.remote("origin", &settings().url)?;
        repository.reference("refs/remotes/origin/develop", tip, true, "track upstream")?;
        Ok(workdir)
    }

    #[test]
    fn update_pulls_once_when_it_works() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let workdir = pinned_checkout(root.path(), 0)?;
        let reconciler = reconciler(&workdir, ScriptedGit::with_pulls([NetworkOutcome::Done]));
        assert_eq!(reconciler.update(), StepResult::Acted);
        assert_eq!(
            *reconciler.transport().calls.borrow(),
            vec!["checkout develop", "pull origin develop"]
        );

        Ok(())
    }

    #[test]
    fn update_resets_and_retries_once() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let workdir = pinned_checkout(root.path(), 0)?;
        let git = ScriptedGit::with_pulls([NetworkOutcome::TimedOut, NetworkOutcome::Done]);
        let reconciler = reconciler(&workdir, git);
        assert_eq!(reconciler.update(), StepResult::Acted);
        assert_eq!(
            *reconciler.transport().calls.borrow(),
            vec!["checkout develop", "pull origin develop", "reset", "pull origin develop"]
        );

        Ok(())
    }

    #[test]
    fn pull_leaving_head_behind_remote_is_soft() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let workdir = pinned_checkout(root.path(), 1)?;
        let reconciler = reconciler(&workdir, ScriptedGit::with_pulls([NetworkOutcome::Done]));
        assert_eq!(reconciler.update(), StepResult::FailedSoft);

        Ok(())
    }

    #[test]
    fn pull_into_missing_checkout_is_soft() {
        let reconciler = reconciler(Path::new("/nonexistent"), ScriptedGit::with_pulls([NetworkOutcome::Done]));
        assert_eq!(reconciler.update(), StepResult::FailedSoft);
    }

    #[test]
    fn step_acts_on_state_observed_while_checking() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let workdir = pinned_checkout(root.path(), 1)?;
        let git = ScriptedGit {
            reachable: true,
            ..ScriptedGit::with_pulls([NetworkOutcome::Done])
        };
        let step = RepositoryStep::new(reconciler(&workdir, git));
        let mut ctx = ToolchainContext::default();

        assert_eq!(step.probe(&ctx), Probe::NeedsAction);
        assert_eq!(step.act(&mut ctx), StepResult::FailedSoft);
        assert_eq!(
            *step.reconciler().transport().calls.borrow(),
            vec!["fetch", "checkout develop", "pull origin develop"]
        );

        Ok(())
    }

    #[test]
    fn update_failing_twice_is_soft() {
        let git = ScriptedGit::with_pulls([
            NetworkOutcome::Failed("conflict".into()),
            NetworkOutcome::TimedOut,
        ]);
        let reconciler = reconciler(Path::new("/nonexistent"), git);
        assert_eq!(reconciler.update(), StepResult::FailedSoft);
        assert_eq!(reconciler.transport().calls.borrow().len(), 4);
    }

    #[test]
    fn checkout_failure_is_soft() {
        let git = ScriptedGit {
            fail_checkout: true,
            ..ScriptedGit::default()
        };
        let reconciler = reconciler(Path::new("/nonexistent"), git);
        assert_eq!(reconciler.update(), StepResult::FailedSoft);
    }

    #[test]
    fn failed_clone_is_fatal_and_replaces_stale_directory() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let workdir = root.path().join("storefront");
        create_dir_all(&workdir)?;
        std::fs::write(workdir.join("leftover.txt"), "not a repository")?;

        let reconciler = reconciler(&workdir, ScriptedGit::default());
        assert_eq!(reconciler.reconcile(), StepResult::FailedFatal);
        assert_eq!(*reconciler.transport().calls.borrow(), vec!["clone develop"]);
        assert!(!workdir.join("leftover.txt").exists());

        Ok(())
    }
}
