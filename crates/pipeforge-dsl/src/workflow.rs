// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflows and jobs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::step::PipelineStep;

/// A pipeline: an ordered list of jobs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Workflow {
    /// Workflow name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Jobs, in declaration order.
    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl Workflow {
    /// Empty workflow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            jobs: Vec::new(),
        }
    }

    /// Append a job.
    pub fn with_job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    /// Find a job by id.
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    /// Number of function steps still waiting for synthesis.
    pub fn function_step_count(&self) -> usize {
        self.jobs
            .iter()
            .flat_map(|job| job.steps())
            .filter(|step| step.is_function())
            .count()
    }
}

/// A job: an ordered sequence of steps run on one runner.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    /// Job id, unique within the workflow.
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Runner label.
    #[serde(rename = "runs-on", default, skip_serializing_if = "Option::is_none")]
    pub runs_on: Option<String>,
    #[serde(default)]
    steps: Vec<PipelineStep>,
}

impl Job {
    /// Job without steps.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Set the runner label.
    pub fn runs_on(mut self, runner: impl Into<String>) -> Self {
        self.runs_on = Some(runner.into());
        self
    }

    /// Append a step (builder form).
    pub fn step(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a step.
    pub fn push_step(&mut self, step: PipelineStep) {
        self.steps.push(step);
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Mutable access to the step list.
    pub fn steps_mut(&mut self) -> &mut Vec<PipelineStep> {
        &mut self.steps
    }

    /// Replace the step list, returning the old one.
    pub fn replace_steps(&mut self, steps: Vec<PipelineStep>) -> Vec<PipelineStep> {
        std::mem::replace(&mut self.steps, steps)
    }

    /// Find a step by id.
    pub fn step_by_id(&self, id: &str) -> Option<&PipelineStep> {
        self.steps.iter().find(|step| step.id.as_deref() == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::ArgumentValue;

    fn report(_message: &str) {}

    #[test]
    fn test_builder_and_lookups() {
        let workflow = Workflow::new("ci").with_job(
            Job::new("build")
                .runs_on("ubuntu-latest")
                .step(PipelineStep::shell("cargo build").with_id("compile"))
                .step(PipelineStep::run_fn(report, vec![ArgumentValue::literal("done")])),
        );

        let job = workflow.job("build").unwrap();
        assert_eq!(job.runs_on.as_deref(), Some("ubuntu-latest"));
        assert_eq!(job.step_by_id("compile").unwrap().command(), Some("cargo build"));
        assert!(workflow.job("deploy").is_none());
        assert_eq!(workflow.function_step_count(), 1);
    }

    #[test]
    fn test_replace_steps_returns_previous() {
        let mut job = Job::new("lint").step(PipelineStep::shell("cargo clippy"));
        let old = job.replace_steps(vec![PipelineStep::shell("cargo fmt --check")]);
        assert_eq!(old.len(), 1);
        assert_eq!(job.steps()[0].command(), Some("cargo fmt --check"));
    }

    #[test]
    fn test_runs_on_uses_kebab_key() {
        let value = serde_json::to_value(Job::new("a").runs_on("self-hosted")).unwrap();
        assert_eq!(value["runs-on"], "self-hosted");
        assert_eq!(value["steps"], serde_json::json!([]));
    }
}
