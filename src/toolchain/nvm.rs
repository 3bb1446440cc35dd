// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Node version manager backend.
//!
//! `nvm` is a shell function, not a binary. Every call here starts a fresh
//! `bash`, sources `$NVM_DIR/nvm.sh`, and runs exactly one `nvm` subcommand.
//! Arguments are passed positionally so nothing is ever interpolated into the
//! script text.

use crate::{
    shell,
    toolchain::{Result, ToolchainContext, ToolchainError, VersionManager},
};

use std::{fs::create_dir_all, path::PathBuf, process::Command};
use tracing::{debug, info, instrument};

const NVM_PRELUDE: &str = r#"source "$NVM_DIR/nvm.sh" --no-use"#;

/// Version manager backed by `nvm`.
#[derive(Debug, Clone)]
pub struct Nvm {
    install_url: String,
}

impl Nvm {
    /// Construct new nvm backend installing itself from `install_url`.
    pub fn new(install_url: impl Into<String>) -> Self {
        Self {
            install_url: install_url.into(),
        }
    }

    fn script(&self, ctx: &ToolchainContext, body: &str, args: &[String]) -> Command {
        let mut cmd = ctx.command("bash");
        cmd.arg("-c")
            .arg(format!("{NVM_PRELUDE} && {body}"))
            .arg("nvm")
            .args(args);
        cmd
    }

    fn nvm(&self, ctx: &ToolchainContext, args: &[String]) -> Command {
        self.script(ctx, r#"nvm "$@""#, args)
    }
}

impl VersionManager for Nvm {
    fn is_installed(&self, ctx: &ToolchainContext) -> bool {
        ctx.nvm_dir.join("nvm.sh").is_file()
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn install_self(&self, ctx: &ToolchainContext) -> Result<()> {
        // INVARIANT: Installer refuses an explicit NVM_DIR that does not exist.
        create_dir_all(&ctx.nvm_dir).map_err(|source| ToolchainError::Prepare {
            source,
            path: ctx.nvm_dir.clone(),
        })?;

        info!("fetching version manager from {}", self.install_url);
        let mut cmd = ctx.command("bash");
        cmd.args(["-c", r#"curl -fsSL "$1" | bash"#, "nvm-install"])
            .arg(&self.install_url);
        Ok(shell::run_interactive(cmd)?)
    }

    fn ls(&self, ctx: &ToolchainContext, major: u32) -> bool {
        let found = shell::run_captured(self.nvm(ctx, &["ls".into(), major.to_string()]));
        debug!("nvm ls {major}: {found:?}");
        found.is_ok()
    }

    #[instrument(skip(self, ctx), level = "debug")]
    fn install(&self, ctx: &ToolchainContext, major: u32) -> Result<()> {
        Ok(shell::run_interactive(
            self.nvm(ctx, &["install".into(), major.to_string()]),
        )?)
    }

    fn alias_default(&self, ctx: &ToolchainContext, major: u32) -> Result<()> {
        shell::run_captured(self.nvm(ctx, &["alias".into(), "default".into(), major.to_string()]))?;
        Ok(())
    }

    fn use_version(&self, ctx: &ToolchainContext, major: u32) -> Result<String> {
        let cmd = self.script(
            ctx,
            r#"nvm use "$1" >/dev/null && node --version"#,
            &[major.to_string()],
        );
        Ok(shell::run_captured(cmd)?)
    }

    fn default_version(&self, ctx: &ToolchainContext) -> Option<String> {
        shell::run_captured(self.nvm(ctx, &["version".into(), "default".into()]))
            .ok()
            .filter(|version| version.starts_with('v'))
    }

    fn which(&self, ctx: &ToolchainContext, major: u32) -> Option<PathBuf> {
        shell::run_captured(self.nvm(ctx, &["which".into(), major.to_string()]))
            .ok()
            .and_then(|output| output.lines().last().map(PathBuf::from))
            .filter(|path| path.is_file())
    }
}
