// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Git transport operations.
//!
//! Everything the reconciler does to a checkout goes through
//! [`GitTransport`], so reconciliation decisions can be tested against a
//! scripted transport. [`SystemGit`] is the real thing: clone and reset go
//! through libgit2, while fetch, pull, and checkout shell out to the git binary
//! so network calls can be bounded by a timeout.

use crate::shell::{self, Bounded};

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::RepoBuilder, BranchType, Config, FetchOptions, RemoteCallbacks, Repository, ResetType,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{path::Path, process::Command, time};
use tracing::{debug, info, instrument};

/// Result of a timeout-bounded network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkOutcome {
    Done,
    TimedOut,
    Failed(String),
}

impl From<shell::Result<Bounded>> for NetworkOutcome {
    fn from(result: shell::Result<Bounded>) -> Self {
        match result {
            Ok(Bounded::Finished { success: true, .. }) => Self::Done,
            Ok(Bounded::Finished { stderr, .. }) => Self::Failed(stderr),
            Ok(Bounded::TimedOut) => Self::TimedOut,
            Err(err) => Self::Failed(err.to_string()),
        }
    }
}

/// Operations the reconciler performs on a checkout.
pub trait GitTransport {
    /// Fetch from `remote`, giving up after `timeout`.
    fn fetch(&self, workdir: &Path, remote: &str, timeout: time::Duration) -> NetworkOutcome;

    /// Pull `branch` from `remote`, giving up after `timeout`.
    fn pull(
        &self,
        workdir: &Path,
        remote: &str,
        branch: &str,
        timeout: time::Duration,
    ) -> NetworkOutcome;

    /// Clone `url` into `workdir` with `branch` checked out.
    fn clone_branch(&self, url: &str, workdir: &Path, branch: &str) -> Result<()>;

    /// Check out `branch`, creating it from `remote/branch` when missing locally.
    fn checkout(&self, workdir: &Path, remote: &str, branch: &str) -> Result<()>;

    /// Hard reset working tree and index to `HEAD`.
    fn reset_hard(&self, workdir: &Path) -> Result<()>;
}

/// Git transport through libgit2 and the git binary.
#[derive(Debug, Default, Clone)]
pub struct SystemGit;

impl SystemGit {
    fn git(&self, workdir: &Path) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(workdir);
        cmd
    }
}

impl GitTransport for SystemGit {
    fn fetch(&self, workdir: &Path, remote: &str, timeout: time::Duration) -> NetworkOutcome {
        let mut cmd = self.git(workdir);
        cmd.args(["fetch", "--quiet", remote]);
        shell::run_bounded(cmd, timeout).into()
    }

    fn pull(
        &self,
        workdir: &Path,
        remote: &str,
        branch: &str,
        timeout: time::Duration,
    ) -> NetworkOutcome {
        let mut cmd = self.git(workdir);
        cmd.args(["pull", remote, branch, "--quiet"]);
        shell::run_bounded(cmd, timeout).into()
    }

    /// Clone with a progress bar, prompting for credentials when required.
    ///
    /// The progress bar is suspended while the user types credentials.
    #[instrument(skip(self, workdir), level = "debug")]
    fn clone_branch(&self, url: &str, workdir: &Path, branch: &str) -> Result<()> {
        info!("clone {url} ({branch}) into {}", workdir.display());
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(url.to_string());
        bar.enable_steady_tick(time::Duration::from_millis(100));

        let prompter = IndicatifPrompter::new(bar);
        let authenticator = GitAuthenticator::default().set_prompter(prompter.clone());
        let config = Config::open_default()?;

        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.transfer_progress(|progress| {
            let stats = progress.to_owned();
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                prompter.bar.set_length(stats.total_objects() as u64);
                prompter.bar.set_position(stats.received_objects() as u64);
            }
            true
        });

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);
        let result = RepoBuilder::new()
            .branch(branch)
            .fetch_options(fo)
            .clone(url, workdir);
        prompter.bar.finish_and_clear();
        result?;

        Ok(())
    }

    fn checkout(&self, workdir: &Path, remote: &str, branch: &str) -> Result<()> {
        let repository = Repository::open(workdir)?;
        let has_local = repository.find_branch(branch, BranchType::Local).is_ok();

        let mut cmd = self.git(workdir);
        if has_local {
            cmd.args(["checkout", branch]);
        } else {
            debug!("creating local branch {branch} tracking {remote}/{branch}");
            cmd.args(["checkout", "-b", branch, &format!("{remote}/{branch}")]);
        }
        shell::run_captured(cmd)?;

        Ok(())
    }

    fn reset_hard(&self, workdir: &Path) -> Result<()> {
        let repository = Repository::open(workdir)?;
        let head = repository.head()?.peel(git2::ObjectType::Commit)?;
        repository.reset(&head, ResetType::Hard, None)?;

        Ok(())
    }
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Git transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Git binary invocation fails.
    #[error(transparent)]
    Shell(#[from] shell::ShellError),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = TransportError> = std::result::Result<T, E>;
