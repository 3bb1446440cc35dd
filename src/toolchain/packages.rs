// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Base OS package installation.
//!
//! One batch install per supported distribution family. Distributions outside
//! those families are best-effort: the step warns and lets the pipeline go on.

use crate::{
    config::BasePackages,
    pipeline::{Step, StepResult},
    probe::{programs_present, Probe},
    shell,
    toolchain::ToolchainContext,
};

use nix::unistd::geteuid;
use std::{fs::read_to_string, process::Command};
use tracing::{debug, error, info, instrument, warn};

const OS_RELEASE: &str = "/etc/os-release";

/// Distribution family, keyed by package manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistroFamily {
    Debian,
    Fedora,
    RedHat,
    Arch,
    Suse,
    Unsupported,
}

impl DistroFamily {
    /// Classify `os-release` content by `ID` then `ID_LIKE`.
    pub fn from_os_release(content: &str) -> Self {
        let field = |key: &str| {
            content
                .lines()
                .filter_map(|line| line.split_once('='))
                .find(|(name, _)| name.trim() == key)
                .map(|(_, value)| value.trim().trim_matches(['"', '\'']).to_ascii_lowercase())
                .unwrap_or_default()
        };

        let id = field("ID");
        let like = field("ID_LIKE");
        std::iter::once(id.as_str())
            .chain(like.split_whitespace())
            .map(Self::from_id)
            .find(|family| *family != Self::Unsupported)
            .unwrap_or(Self::Unsupported)
    }

    fn from_id(id: &str) -> Self {
        match id {
            "debian" | "ubuntu" | "linuxmint" | "pop" => Self::Debian,
            "fedora" => Self::Fedora,
            "rhel" | "centos" | "rocky" | "almalinux" | "amzn" => Self::RedHat,
            "arch" | "manjaro" | "endeavouros" => Self::Arch,
            "suse" | "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "sles" => Self::Suse,
            _ => Self::Unsupported,
        }
    }

    /// Detect family of the running system.
    pub fn detect() -> Self {
        match read_to_string(OS_RELEASE) {
            Ok(content) => Self::from_os_release(&content),
            Err(err) => {
                debug!("cannot read {OS_RELEASE}: {err}");
                Self::Unsupported
            }
        }
    }

    /// Batch install invocation for `packages`, without privilege escalation.
    pub fn install_args(self, packages: &BasePackages) -> Option<Vec<String>> {
        let (head, list): (&[&str], &[String]) = match self {
            Self::Debian => (&["apt-get", "install", "-y"][..], packages.apt.as_slice()),
            Self::Fedora => (&["dnf", "install", "-y"][..], packages.dnf.as_slice()),
            Self::RedHat => (&["yum", "install", "-y"][..], packages.yum.as_slice()),
            Self::Arch => (
                &["pacman", "-S", "--needed", "--noconfirm"][..],
                packages.pacman.as_slice(),
            ),
            Self::Suse => (
                &["zypper", "--non-interactive", "install"][..],
                packages.zypper.as_slice(),
            ),
            Self::Unsupported => return None,
        };

        let mut args = head.iter().map(ToString::to_string).collect::<Vec<_>>();
        args.extend(list.iter().cloned());
        Some(args)
    }
}

/// Install OS packages the rest of the pipeline needs.
#[derive(Debug, Clone)]
pub struct BasePackagesStep {
    packages: BasePackages,
}

impl BasePackagesStep {
    pub fn new(packages: BasePackages) -> Self {
        Self { packages }
    }
}

impl Step for BasePackagesStep {
    fn name(&self) -> &str {
        "base-packages"
    }

    fn probe(&self, ctx: &ToolchainContext) -> Probe {
        programs_present(ctx, &self.packages.binaries)
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn act(&self, ctx: &mut ToolchainContext) -> StepResult {
        let family = DistroFamily::detect();
        let Some(args) = family.install_args(&self.packages) else {
            warn!("unsupported distribution, install {:?} manually", self.packages.binaries);
            return StepResult::FailedSoft;
        };

        let cmd = privileged(ctx, &args);
        info!("installing base packages via {}", args[0]);
        if let Err(err) = shell::run_interactive(cmd) {
            error!("base package install failed: {err}");
            return StepResult::FailedFatal;
        }

        if !programs_present(ctx, &self.packages.binaries).is_satisfied() {
            error!("base packages installed but {:?} still missing", self.packages.binaries);
            return StepResult::FailedFatal;
        }

        StepResult::Acted
    }
}

/// Prefix with `sudo` when not already root and `sudo` is available.
fn privileged(ctx: &ToolchainContext, args: &[String]) -> Command {
    if !geteuid().is_root() && ctx.find_program("sudo").is_some() {
        let mut cmd = ctx.command("sudo");
        cmd.args(args);
        return cmd;
    }

    let mut cmd = ctx.command(&args[0]);
    cmd.args(&args[1..]);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use simple_test_case::test_case;

    #[test_case("ID=ubuntu\nID_LIKE=debian\n", DistroFamily::Debian; "ubuntu")]
    #[test_case("ID=\"fedora\"\n", DistroFamily::Fedora; "quoted fedora")]
    #[test_case("ID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\n", DistroFamily::RedHat; "rocky")]
    #[test_case("ID=garuda\nID_LIKE=arch\n", DistroFamily::Arch; "arch derivative")]
    #[test_case("ID=\"opensuse-tumbleweed\"\nID_LIKE=\"opensuse suse\"\n", DistroFamily::Suse; "tumbleweed")]
    #[test_case("ID=nixos\n", DistroFamily::Unsupported; "nixos")]
    #[test_case("", DistroFamily::Unsupported; "empty")]
    #[test]
    fn classify_os_release(content: &str, expect: DistroFamily) {
        assert_eq!(DistroFamily::from_os_release(content), expect);
    }

    #[test]
    fn ignore_unrelated_keys_sharing_a_prefix() {
        let content = indoc! {r#"
            VERSION_ID="12"
            ID=debian
        "#};
        assert_eq!(DistroFamily::from_os_release(content), DistroFamily::Debian);
    }

    #[test]
    fn privileged_command_uses_sudo_only_without_root() {
        let ctx = ToolchainContext::default();
        let args = vec!["apt-get".to_string(), "install".into(), "-y".into()];
        let cmd = privileged(&ctx, &args);
        let program = std::path::Path::new(cmd.get_program()).file_name();

        if geteuid().is_root() || ctx.find_program("sudo").is_none() {
            assert_eq!(program, Some("apt-get".as_ref()));
            assert_eq!(cmd.get_args().collect::<Vec<_>>(), vec!["install", "-y"]);
        } else {
            assert_eq!(program, Some("sudo".as_ref()));
            assert_eq!(cmd.get_args().collect::<Vec<_>>(), vec!["apt-get", "install", "-y"]);
        }
    }

    #[test]
    fn install_args_use_family_package_list() {
        let packages = BasePackages {
            binaries: vec!["git".into()],
            apt: vec!["git".into(), "curl".into()],
            pacman: vec!["git".into(), "base-devel".into()],
            ..BasePackages::default()
        };

        assert_eq!(
            DistroFamily::Debian.install_args(&packages),
            Some(vec!["apt-get".into(), "install".into(), "-y".into(), "git".into(), "curl".into()])
        );
        assert_eq!(
            DistroFamily::Arch.install_args(&packages),
            Some(vec![
                "pacman".into(),
                "-S".into(),
                "--needed".into(),
                "--noconfirm".into(),
                "git".into(),
                "base-devel".into(),
            ])
        );
        assert_eq!(DistroFamily::Unsupported.install_args(&packages), None);
    }
}
