// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Step orchestration.
//!
//! Provisioning is a fixed, ordered list of [`Step`]s. Each step pairs a
//! read-only probe with an actor that only runs when the probe says the
//! desired state does not hold yet. Actors re-verify their own post-condition
//! and report a [`StepResult`]. The [`Pipeline`] is the only place that decides
//! whether to stop or to keep going.
//!
//! # Idempotency Contract
//!
//! - No actor runs without a probe first establishing that action is needed.
//! - No actor reports success without re-checking its post-condition.
//!
//! Running the pipeline twice with no outside change in between therefore
//! yields [`StepResult::Satisfied`] for every step on the second run.
//!
//! # Concurrency
//!
//! Steps run strictly one after another. There is no lock protecting a
//! project directory; only one invocation per project directory is supported
//! at a time.

use crate::{
    config::Plan,
    launch::DependenciesStep,
    patch::PatchStep,
    probe::Probe,
    repo::{Reconciler, RepositoryStep, SystemGit},
    toolchain::{
        BasePackagesStep, Nvm, PackageManagerStep, RuntimeStep, ToolchainContext,
        VersionManagerStep,
    },
};

use inquire::{Confirm, InquireError};
use std::{
    env,
    fmt::{Display, Formatter, Result as FmtResult},
    io::{stdin, stdout, IsTerminal},
};
use tracing::{info, instrument, warn};

/// Outcome of one pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// Desired state already held, nothing done.
    Satisfied,

    /// Action taken and post-condition verified.
    Acted,

    /// Nothing to act on.
    Skipped,

    /// Step incomplete, pipeline continues.
    FailedSoft,

    /// Step failed, pipeline aborts.
    FailedFatal,
}

impl StepResult {
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::FailedFatal)
    }
}

impl Display for StepResult {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Satisfied => fmt.write_str("satisfied"),
            Self::Acted => fmt.write_str("done"),
            Self::Skipped => fmt.write_str("skipped"),
            Self::FailedSoft => fmt.write_str("incomplete"),
            Self::FailedFatal => fmt.write_str("failed"),
        }
    }
}

/// One provisioning step.
pub trait Step {
    /// Name used in logs and the summary.
    fn name(&self) -> &str;

    /// Check desired state without side effects.
    fn probe(&self, ctx: &ToolchainContext) -> Probe;

    /// Bring about desired state and re-verify it.
    fn act(&self, ctx: &mut ToolchainContext) -> StepResult;

    /// Record resolved toolchain facts once the step holds.
    ///
    /// Called after [`StepResult::Satisfied`] or [`StepResult::Acted`].
    fn export(&self, _ctx: &mut ToolchainContext) {}
}

/// Result of one executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub result: StepResult,
}

/// Probe results of every step, gathered before anything runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub entries: Vec<(String, Probe)>,
}

impl Summary {
    /// Check if every step is already satisfied.
    pub fn all_satisfied(&self) -> bool {
        self.entries.iter().all(|(_, probe)| probe.is_satisfied())
    }
}

impl Display for Summary {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let width = self
            .entries
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0);
        for (name, probe) in &self.entries {
            writeln!(fmt, "  {name:<width$}  {probe}")?;
        }
        write!(fmt, "  {:<width$}  start development server", "launch")
    }
}

/// Ordered list of steps.
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    /// Construct new empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Build the standard provisioning pipeline for `plan`.
    ///
    /// Order: base packages, version manager, runtime, package manager,
    /// repository, patches in plan order, dependencies.
    pub fn from_plan(plan: &Plan) -> Self {
        let nvm = Nvm::new(&plan.runtime.nvm_install_url);
        let reconciler = Reconciler::new(
            plan.repository.clone(),
            &plan.project.dir,
            plan.timeouts.clone(),
            SystemGit,
        );

        let mut pipeline = Self::new()
            .with_step(BasePackagesStep::new(plan.base_packages.clone()))
            .with_step(VersionManagerStep::new(nvm.clone()))
            .with_step(RuntimeStep::new(nvm, plan.runtime.major))
            .with_step(PackageManagerStep::new(plan.package_manager.clone()))
            .with_step(RepositoryStep::new(reconciler));
        for patch in &plan.patches {
            pipeline = pipeline.with_step(PatchStep::new(&plan.project.dir, patch.to_target()));
        }

        pipeline.with_step(DependenciesStep::new(
            plan.project.clone(),
            plan.package_manager.clone(),
            plan.timeouts.install_network(),
        ))
    }

    /// Names of every step, in order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Probe every step once without acting.
    ///
    /// Satisfied steps export into a scratch copy of `ctx`, so later probes
    /// see the toolchain an actual run would hand them. The caller's context
    /// is left untouched.
    pub fn summary(&self, ctx: &ToolchainContext) -> Summary {
        let mut scratch = ctx.clone();
        let mut entries = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let probe = step.probe(&scratch);
            if probe.is_satisfied() {
                step.export(&mut scratch);
            }
            entries.push((step.name().to_string(), probe));
        }

        Summary { entries }
    }

    /// Run every step in order.
    ///
    /// Steps whose probe is satisfied are not acted on. Soft failures are
    /// logged and skipped past.
    ///
    /// # Errors
    ///
    /// - Return [`PipelineError::Fatal`] on the first fatal step. No later
    ///   step runs.
    #[instrument(skip(self, ctx), level = "debug")]
    pub fn run(&self, ctx: &mut ToolchainContext) -> Result<Vec<StepReport>> {
        let mut reports = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let result = match step.probe(ctx) {
                Probe::Satisfied => {
                    info!("{}: already satisfied, skipping", step.name());
                    StepResult::Satisfied
                }
                probe => {
                    info!("{}: {probe}, acting", step.name());
                    step.act(ctx)
                }
            };

            match result {
                StepResult::FailedFatal => {
                    return Err(PipelineError::Fatal {
                        step: step.name().to_string(),
                    })
                }
                StepResult::FailedSoft => warn!("{}: incomplete, continuing", step.name()),
                StepResult::Satisfied | StepResult::Acted => step.export(ctx),
                StepResult::Skipped => info!("{}: nothing to do", step.name()),
            }

            reports.push(StepReport {
                name: step.name().to_string(),
                result,
            });
        }

        Ok(reports)
    }
}

/// Check if an environment flag is set to something truthy.
pub fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|value| {
        let value = value.trim().to_ascii_lowercase();
        !(value.is_empty() || value == "0" || value == "false" || value == "no")
    })
}

/// Check if running under continuous integration.
pub fn is_ci() -> bool {
    env_flag("CI")
}

/// Check if a person can answer a prompt.
pub fn is_interactive() -> bool {
    stdin().is_terminal() && stdout().is_terminal() && !is_ci()
}

/// Show the summary and ask to proceed. Empty input means yes.
///
/// # Errors
///
/// - Return [`PipelineError::Interrupted`] if the prompt is interrupted.
/// - Return [`PipelineError::Prompt`] if the prompt cannot be shown.
pub fn confirm(summary: &Summary) -> Result<bool> {
    info!("provisioning plan:\n{summary}");
    match Confirm::new("Proceed with provisioning?")
        .with_default(true)
        .prompt()
    {
        Ok(answer) => Ok(answer),
        Err(InquireError::OperationCanceled) => Ok(false),
        Err(InquireError::OperationInterrupted) => Err(PipelineError::Interrupted),
        Err(err) => Err(PipelineError::Prompt(err)),
    }
}

/// Pipeline error types.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A step failed fatally.
    #[error("step {step:?} failed, aborting")]
    Fatal { step: String },

    /// User interrupted the run.
    #[error("interrupted")]
    Interrupted,

    /// Confirmation prompt cannot be shown.
    #[error(transparent)]
    Prompt(#[from] InquireError),
}

/// Friendly result alias :3
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
