// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::RepoFixture;

use anyhow::Result;
use devstrap::{
    config::{RepositorySettings, Timeouts},
    repo::{
        inspect, repo_state, transport::Result as TransportResult, GitTransport, NetworkOutcome,
        Reconciler, RepoClass, SystemGit,
    },
    StepResult,
};
use git2::Repository;
use pretty_assertions::assert_eq;
use std::{fs::create_dir_all, path::Path, time::Duration};

const UPSTREAM: &str = "https://github.com/storefront-labs/storefront.git";

/// Transport whose fetch reports a fixed outcome and touches nothing.
struct StubFetch(NetworkOutcome);

impl GitTransport for StubFetch {
    fn fetch(&self, _: &Path, _: &str, _: Duration) -> NetworkOutcome {
        self.0.clone()
    }

    fn pull(&self, _: &Path, _: &str, _: &str, _: Duration) -> NetworkOutcome {
        NetworkOutcome::Failed("pull not scripted".into())
    }

    fn clone_branch(&self, _: &str, _: &Path, _: &str) -> TransportResult<()> {
        Err(git2::Error::from_str("clone not scripted").into())
    }

    fn checkout(&self, _: &Path, _: &str, _: &str) -> TransportResult<()> {
        Err(git2::Error::from_str("checkout not scripted").into())
    }

    fn reset_hard(&self, _: &Path) -> TransportResult<()> {
        Err(git2::Error::from_str("reset not scripted").into())
    }
}

fn settings(url: &str, upstream_match: &str) -> RepositorySettings {
    RepositorySettings {
        url: url.into(),
        upstream_match: upstream_match.into(),
        branch: "develop".into(),
        remote: "origin".into(),
    }
}

fn storefront() -> RepositorySettings {
    settings(UPSTREAM, "storefront-labs/storefront")
}

fn classify(workdir: &Path, transport: &impl GitTransport) -> RepoClass {
    let settings = storefront();
    repo_state(workdir, &settings, transport, Duration::from_secs(1)).classify(&settings)
}

#[test]
fn missing_or_plain_directory_is_absent() -> Result<()> {
    let root = tempfile::tempdir()?;
    let workdir = root.path().join("storefront");
    let transport = StubFetch(NetworkOutcome::Done);
    assert_eq!(classify(&workdir, &transport), RepoClass::Absent);

    create_dir_all(&workdir)?;
    assert_eq!(classify(&workdir, &transport), RepoClass::Absent);

    Ok(())
}

#[test]
fn foreign_remote_is_wrong_remote() -> Result<()> {
    let root = tempfile::tempdir()?;
    let fixture = RepoFixture::new(root.path().join("storefront"), "develop")?;
    fixture.stage_and_commit("README.md", "hello")?;
    fixture.add_remote("origin", "https://gitlab.com/someone/fork.git")?;

    assert_eq!(classify(&fixture.path(), &StubFetch(NetworkOutcome::Done)), RepoClass::WrongRemote);

    Ok(())
}

#[test]
fn ssh_remote_of_upstream_is_accepted() -> Result<()> {
    let root = tempfile::tempdir()?;
    let fixture = RepoFixture::new(root.path().join("storefront"), "develop")?;
    let head = fixture.stage_and_commit("README.md", "hello")?;
    fixture.add_remote("origin", "git@github.com:storefront-labs/storefront.git")?;
    fixture.set_remote_ref("origin", "develop", head)?;

    assert_eq!(classify(&fixture.path(), &StubFetch(NetworkOutcome::Done)), RepoClass::UpToDate);

    Ok(())
}

#[test]
fn other_branch_needs_update() -> Result<()> {
    let root = tempfile::tempdir()?;
    let fixture = RepoFixture::new(root.path().join("storefront"), "develop")?;
    let head = fixture.stage_and_commit("README.md", "hello")?;
    fixture.add_remote("origin", UPSTREAM)?;
    fixture.set_remote_ref("origin", "develop", head)?;
    fixture.switch_to_new_branch("feature/checkout")?;

    // Branch identity wins even though the commits match.
    assert_eq!(classify(&fixture.path(), &StubFetch(NetworkOutcome::Done)), RepoClass::NeedsUpdate);

    Ok(())
}

#[test]
fn unreachable_remote_falls_back_to_up_to_date() -> Result<()> {
    let root = tempfile::tempdir()?;
    let fixture = RepoFixture::new(root.path().join("storefront"), "develop")?;
    let older = fixture.stage_and_commit("README.md", "hello")?;
    fixture.stage_and_commit("CHANGELOG.md", "local work")?;
    fixture.add_remote("origin", UPSTREAM)?;
    fixture.set_remote_ref("origin", "develop", older)?;

    let workdir = fixture.path();
    assert_eq!(classify(&workdir, &StubFetch(NetworkOutcome::Done)), RepoClass::NeedsUpdate);
    assert_eq!(classify(&workdir, &StubFetch(NetworkOutcome::TimedOut)), RepoClass::UpToDate);
    assert_eq!(
        classify(&workdir, &StubFetch(NetworkOutcome::Failed("no route to host".into()))),
        RepoClass::UpToDate
    );

    let state = repo_state(
        &workdir,
        &storefront(),
        &StubFetch(NetworkOutcome::TimedOut),
        Duration::from_secs(1),
    );
    assert!(!state.fetch_reachable);

    Ok(())
}

#[test]
fn reconcile_clones_then_pulls_from_local_upstream() -> Result<()> {
    let root = tempfile::tempdir()?;
    let upstream = RepoFixture::new(root.path().join("upstream"), "develop")?;
    upstream.stage_and_commit("package.json", "{}")?;

    let url = upstream.path().to_string_lossy().into_owned();
    let settings = settings(&url, "upstream");
    let workdir = root.path().join("checkout");
    let reconciler = Reconciler::new(settings.clone(), &workdir, Timeouts::default(), SystemGit);

    assert_eq!(reconciler.reconcile(), StepResult::Acted);
    assert!(inspect(&workdir, &settings).is_pinned(&settings));
    assert_eq!(reconciler.reconcile(), StepResult::Satisfied);

    let latest = upstream.stage_and_commit("yarn.lock", "# lock")?;
    assert_eq!(reconciler.state().classify(&settings), RepoClass::NeedsUpdate);
    assert_eq!(reconciler.reconcile(), StepResult::Acted);

    let checkout = Repository::open(&workdir)?;
    assert_eq!(checkout.head()?.peel_to_commit()?.id(), latest);
    assert_eq!(reconciler.reconcile(), StepResult::Satisfied);

    Ok(())
}
