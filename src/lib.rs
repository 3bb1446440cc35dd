// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent development environment provisioning.
//!
//! Devstrap brings a machine from an unknown state to a running development
//! server for one collaborator repository. Every step first probes whether
//! its desired state already holds, acts only when it does not, and then
//! re-verifies. Running devstrap twice in a row is therefore safe, and the
//! second run changes nothing.
//!
//! See [`pipeline`] for how steps are ordered and how failures are judged.

pub mod config;
pub mod launch;
pub mod patch;
pub mod path;
pub mod pipeline;
pub mod probe;
pub mod repo;
pub mod shell;
pub mod toolchain;

pub use config::Plan;
pub use pipeline::{Pipeline, PipelineError, Step, StepReport, StepResult, Summary};
pub use probe::Probe;
pub use toolchain::ToolchainContext;
