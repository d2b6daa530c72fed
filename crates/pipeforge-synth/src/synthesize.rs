// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow synthesis pass.
//!
//! Runs the whole pipeline over a workflow:
//!
//! 1. Validate the job/step graph.
//! 2. Inject missing runtime setup steps.
//! 3. For every function step: locate the call site, extract the function,
//!    check that it is self-contained, synthesize the script and embed it as
//!    a shell command that replaces the step in place.
//!
//! The pass works on a clone of the input; the caller only sees a new
//! workflow when every step succeeded.

use pipeforge_dsl::{FunctionStep, PipelineStep, StepBody, Workflow};
use std::path::PathBuf;

use crate::codegen::{ScriptMode, ScriptSynthesizer, StepScriptRequest};
use crate::config::SynthConfig;
use crate::embed::shell_command;
use crate::error::Result;
use crate::extract::extract_function;
use crate::locate::locate;
use crate::setup::inject_setup;
use crate::source::SourceCache;
use crate::validation::{ValidationWarning, check_self_contained, validate_workflow};

/// What happened to one function step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Job id.
    pub job: String,
    /// Step label (id, name or position).
    pub step: String,
    /// Function name, or `<closure>`.
    pub function: String,
    /// Source file.
    pub file: PathBuf,
    /// First line of the function.
    pub start_line: usize,
    /// Last line of the function.
    pub end_line: usize,
    /// Bundled or fallback.
    pub mode: ScriptMode,
    /// Manifest keys of the embedded dependencies.
    pub dependencies: Vec<String>,
    /// Script checksum.
    pub checksum: String,
}

impl std::fmt::Display for StepReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}: {} ({}:{}-{}) {:?}",
            self.job,
            self.step,
            self.function,
            self.file.display(),
            self.start_line,
            self.end_line,
            self.mode
        )?;
        if !self.dependencies.is_empty() {
            write!(f, " [{}]", self.dependencies.join(", "))?;
        }
        write!(f, " sha256:{}", &self.checksum)
    }
}

/// Result of a successful pass.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    /// The workflow with every function step replaced.
    pub workflow: Workflow,
    /// One report per synthesized step, in workflow order.
    pub reports: Vec<StepReport>,
    /// Non-fatal validation findings.
    pub warnings: Vec<ValidationWarning>,
    /// Setup steps added by the pass.
    pub setup_steps_added: usize,
}

/// Synthesize every function step of `workflow` with a synthesizer built
/// from `config`.
pub fn synthesize_workflow(workflow: &Workflow, config: &SynthConfig) -> Result<SynthesisOutput> {
    WorkflowSynthesizer::new(config.clone()).run(workflow)
}

/// Drives one or more synthesis passes sharing a source cache.
pub struct WorkflowSynthesizer {
    config: SynthConfig,
    scripts: ScriptSynthesizer,
    sources: SourceCache,
}

impl WorkflowSynthesizer {
    /// Synthesizer set up from `config`.
    pub fn new(config: SynthConfig) -> Self {
        let scripts = ScriptSynthesizer::from_config(&config);
        Self {
            config,
            scripts,
            sources: SourceCache::new(),
        }
    }

    /// Replace the script synthesizer (custom bundler, edition).
    pub fn with_script_synthesizer(mut self, scripts: ScriptSynthesizer) -> Self {
        self.scripts = scripts;
        self
    }

    /// Run one pass over `workflow`.
    pub fn run(&mut self, workflow: &Workflow) -> Result<SynthesisOutput> {
        let started = std::time::Instant::now();
        let warnings = validate_workflow(workflow).into_result()?;
        for warning in &warnings {
            tracing::warn!(warning = %warning, "Workflow validation warning");
        }

        let mut output = workflow.clone();
        let setup_steps_added = inject_setup(&mut output);

        let mut reports = Vec::new();
        for job in &mut output.jobs {
            let job_id = job.id.clone();
            for (index, step) in job.steps_mut().iter_mut().enumerate() {
                let StepBody::Function(function) = &step.body else {
                    continue;
                };
                let label = step.label(index);
                let (replacement, report) = self
                    .materialize(step, function, &job_id, &label)
                    .map_err(|e| e.in_step(&job_id, &label))?;
                *step = replacement;
                reports.push(report);
            }
        }

        tracing::info!(
            workflow = output.name.as_deref().unwrap_or(""),
            jobs = output.jobs.len(),
            steps_synthesized = reports.len(),
            setup_steps_added = setup_steps_added,
            files_parsed = self.sources.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Workflow synthesis completed"
        );

        Ok(SynthesisOutput {
            workflow: output,
            reports,
            warnings,
            setup_steps_added,
        })
    }

    fn materialize(
        &mut self,
        step: &PipelineStep,
        function: &FunctionStep,
        job_id: &str,
        label: &str,
    ) -> Result<(PipelineStep, StepReport)> {
        let location = locate(&function.call_site, &self.config)?;
        let source = self.sources.get(&location.file)?;
        let extracted = extract_function(&source, &location, &function.callable, &self.config)?;
        tracing::debug!(
            job_id = %job_id,
            step_id = %label,
            file = %extracted.file.display(),
            line = extracted.start_line,
            function = %extracted.display_name(),
            "Extracted function"
        );

        if self.config.check_self_contained {
            let node = extracted.parse_node()?;
            check_self_contained(&node, &extracted.display_name(), &source.module_names())?;
        }

        let version = function.version();
        let script = self.scripts.synthesize(&StepScriptRequest {
            extracted: &extracted,
            args: &function.args,
            runtime: function.runtime,
            runtime_version: version,
        })?;
        let command = shell_command(&script, function.runtime, version, label)?;

        let mut env = step.env.clone();
        env.extend(script.env.clone());
        let name = step.name.clone().unwrap_or_else(|| match &extracted.declared_name {
            Some(name) => format!("Run {}", name),
            None => "Run closure".to_string(),
        });

        let replacement = PipelineStep {
            id: step.id.clone(),
            name: Some(name),
            env,
            condition: step.condition.clone(),
            continue_on_error: step.continue_on_error,
            timeout_minutes: step.timeout_minutes,
            working_directory: step.working_directory.clone(),
            body: StepBody::Command(command),
        };
        let report = StepReport {
            job: job_id.to_string(),
            step: label.to_string(),
            function: extracted.display_name(),
            file: extracted.file.clone(),
            start_line: extracted.start_line,
            end_line: extracted.end_line,
            mode: script.mode,
            dependencies: script
                .declared_dependencies
                .iter()
                .map(|dep| dep.name.clone())
                .collect(),
            checksum: script.checksum,
        };
        Ok((replacement, report))
    }
}
