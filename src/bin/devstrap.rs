// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use devstrap::{
    launch::{serve, wait_for_signal},
    pipeline::{confirm, env_flag, is_interactive},
    Pipeline, PipelineError, Plan, StepResult, ToolchainContext,
};

use anyhow::Result;
use clap::Parser;
use std::process::exit;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(about, version)]
struct Cli {
    /// Include low-level diagnostic lines in the log.
    #[arg(long)]
    pub debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = if cli.debug || env_flag("DEVSTRAP_DEBUG") {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match run().await {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let plan = Plan::builtin()?;

    // INVARIANT: Steps block, so they never run on the async executor.
    let blocking = plan.clone();
    let provisioning = tokio::task::spawn_blocking(move || provision(&blocking));
    let provisioned = tokio::select! {
        joined = provisioning => joined?,
        signal = wait_for_signal() => {
            warn!("interrupted by {}", signal?);
            return Ok(1);
        }
    };

    let ctx = match provisioned {
        Ok(Some(ctx)) => ctx,
        Ok(None) => return Ok(0),
        Err(PipelineError::Interrupted) => {
            warn!("interrupted");
            return Ok(1);
        }
        Err(error) => return Err(error.into()),
    };

    let served = serve(&ctx, &plan.project, &plan.package_manager).await?;
    Ok(served.exit_code())
}

/// Probe, confirm, and run every step. Returns `None` if the user declined.
fn provision(plan: &Plan) -> Result<Option<ToolchainContext>, PipelineError> {
    let pipeline = Pipeline::from_plan(plan);
    let mut ctx = ToolchainContext::new(&plan.runtime.nvm_dir);

    let summary = pipeline.summary(&ctx);
    if is_interactive() {
        if !confirm(&summary)? {
            info!("provisioning declined, nothing changed");
            return Ok(None);
        }
    } else {
        info!("provisioning plan:\n{summary}");
    }

    let reports = pipeline.run(&mut ctx)?;
    let incomplete = reports
        .iter()
        .filter(|report| report.result == StepResult::FailedSoft)
        .map(|report| report.name.as_str())
        .collect::<Vec<_>>();
    if incomplete.is_empty() {
        info!("environment ready");
    } else {
        warn!("environment ready with incomplete steps: {}", incomplete.join(", "));
    }

    Ok(Some(ctx))
}
