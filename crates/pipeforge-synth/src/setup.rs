// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime setup injection.
//!
//! A job whose function steps need a runtime gets a setup step for it at the
//! start of its step list, unless one of its action steps already installs
//! that runtime family. Injection is idempotent: the injected steps satisfy
//! the check on a second pass.

use pipeforge_dsl::{Job, RuntimeFamily, SetupRequirement, Workflow};

/// Runtimes the job's function steps need, deduplicated in first-seen order.
///
/// rust-script is one tool per job, so its requirements are keyed by family:
/// the first version seen wins and later conflicting versions are logged and
/// dropped. cargo-script toolchains install side by side and stay keyed by
/// version.
pub fn job_requirements(job: &Job) -> Vec<SetupRequirement> {
    let mut requirements: Vec<SetupRequirement> = Vec::new();
    for function in job.steps().iter().filter_map(|step| step.function()) {
        let requirement = SetupRequirement::new(function.runtime, Some(function.version()));
        let existing = requirements.iter().position(|known| match requirement.runtime {
            RuntimeFamily::RustScript => known.runtime == requirement.runtime,
            RuntimeFamily::CargoScript => *known == requirement,
        });
        match existing {
            None => requirements.push(requirement),
            Some(kept) if requirements[kept].version != requirement.version => {
                tracing::warn!(
                    job = %job.id,
                    runtime = %requirement.runtime,
                    kept = %requirements[kept].version,
                    ignored = %requirement.version,
                    "Function steps ask for different runtime versions; keeping the first"
                );
            }
            Some(_) => {}
        }
    }
    requirements
}

/// Requirements not already satisfied by one of the job's action steps.
pub fn missing_requirements(job: &Job) -> Vec<SetupRequirement> {
    job_requirements(job)
        .into_iter()
        .filter(|requirement| {
            !job.steps()
                .iter()
                .filter_map(|step| step.action())
                .any(|action| requirement.runtime.is_setup_action(action))
        })
        .collect()
}

/// Prepend the missing setup steps to `job`. Returns how many were added.
pub fn inject_job_setup(job: &mut Job) -> usize {
    let missing = missing_requirements(job);
    if missing.is_empty() {
        return 0;
    }
    for requirement in &missing {
        tracing::warn!(
            job = %job.id,
            runtime = %requirement.runtime,
            version = %requirement.version,
            "Job has no setup step for a function-step runtime; injecting one"
        );
    }
    let setup: Vec<_> = missing.iter().map(SetupRequirement::setup_step).collect();
    job.steps_mut().splice(0..0, setup);
    missing.len()
}

/// Inject setup steps into every job of `workflow`.
pub fn inject_setup(workflow: &mut Workflow) -> usize {
    workflow.jobs.iter_mut().map(inject_job_setup).sum()
}
