// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use anyhow::Result;
use devstrap::{
    patch::PatchStep, Pipeline, PipelineError, Plan, Probe, StepResult, ToolchainContext,
};
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{
    fs::{create_dir_all, read_dir, read_to_string, write},
    path::{Path, PathBuf},
};

fn backups(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in read_dir(dir)? {
        let path = entry?.path();
        if path.to_string_lossy().contains(".backup") {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn patch_pipeline(plan: &Plan, root: &Path) -> Pipeline {
    plan.patches.iter().fold(Pipeline::new(), |pipeline, patch| {
        pipeline.with_step(PatchStep::new(root, patch.to_target()))
    })
}

#[sealed_test(env = [("HOME", "/home/blah")])]
fn second_run_is_all_satisfied() -> Result<()> {
    let plan = Plan::builtin()?;
    let root = tempfile::tempdir()?;
    let config = root.path().join("src/config");
    create_dir_all(&config)?;
    write(config.join("fees.ts"), "export const platformFeeBps = 250;\n")?;
    write(root.path().join("vite.config.ts"), "export default {};\n")?;

    let pipeline = patch_pipeline(&plan, root.path());
    let mut ctx = ToolchainContext::default();

    let first = pipeline.run(&mut ctx)?;
    let results = first.iter().map(|report| report.result).collect::<Vec<_>>();
    assert_eq!(results, vec![StepResult::Acted, StepResult::Acted]);
    assert!(pipeline.summary(&ctx).all_satisfied());

    let second = pipeline.run(&mut ctx)?;
    let results = second.iter().map(|report| report.result).collect::<Vec<_>>();
    assert_eq!(results, vec![StepResult::Satisfied, StepResult::Satisfied]);

    assert_eq!(backups(&config)?.len(), 1);
    assert_eq!(
        backups(root.path())?,
        vec![root.path().join("vite.config.ts.backup")]
    );
    assert_eq!(
        read_to_string(root.path().join("vite.config.ts.backup"))?,
        "export default {};\n"
    );

    Ok(())
}

#[sealed_test(env = [("HOME", "/home/blah")])]
fn upstream_edit_around_marker_is_left_alone() -> Result<()> {
    let plan = Plan::builtin()?;
    let root = tempfile::tempdir()?;
    let fees = plan
        .patch("fee-config")
        .ok_or_else(|| anyhow::anyhow!("fee-config missing from plan"))?;

    let config = root.path().join("src/config");
    create_dir_all(&config)?;
    let edited = format!("// upstream header\n{}\n// upstream footer\n", fees.payload);
    write(config.join("fees.ts"), &edited)?;

    let pipeline = Pipeline::new().with_step(PatchStep::new(root.path(), fees.to_target()));
    let reports = pipeline.run(&mut ToolchainContext::default())?;
    assert_eq!(reports[0].result, StepResult::Satisfied);
    assert_eq!(read_to_string(config.join("fees.ts"))?, edited);
    assert!(backups(&config)?.is_empty());

    Ok(())
}

#[sealed_test(env = [("HOME", "/home/blah")])]
fn missing_targets_are_soft() -> Result<()> {
    let plan = Plan::builtin()?;
    let root = tempfile::tempdir()?;
    let pipeline = patch_pipeline(&plan, root.path());

    let summary = pipeline.summary(&ToolchainContext::default());
    assert!(summary
        .entries
        .iter()
        .all(|(_, probe)| *probe == Probe::Indeterminate));

    let result = pipeline.run(&mut ToolchainContext::default());
    assert!(!matches!(result, Err(PipelineError::Fatal { .. })));
    let results = result?
        .into_iter()
        .map(|report| report.result)
        .collect::<Vec<_>>();
    assert_eq!(results, vec![StepResult::FailedSoft, StepResult::FailedSoft]);

    Ok(())
}
