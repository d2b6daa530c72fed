// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pipeline steps.
//!
//! A step has common metadata (id, name, env, condition, ...) and a body. The
//! body is at most one of: a shell command, a reusable action reference, or a
//! function step. Function steps are transient: synthesis replaces every one
//! with a command step before the workflow is written out.
//!
//! The JSON form keeps the body in separate keys (`run`, `uses`/`with`,
//! `function`). Deserialization rejects records that set more than one.

use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::args::ArgumentValue;
use crate::callable::{CallSite, CallableReference};
use crate::runtime::RuntimeFamily;

/// Reference to a reusable action, e.g. `actions/checkout@v4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ActionReference {
    /// `owner/repo@ref` (or a local path).
    pub uses: String,
    /// Action inputs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, String>,
}

impl ActionReference {
    /// Reference without inputs.
    pub fn new(uses: impl Into<String>) -> Self {
        Self {
            uses: uses.into(),
            with: BTreeMap::new(),
        }
    }

    /// Add an input.
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with.insert(key.into(), value.into());
        self
    }
}

/// A step that runs a Rust function as a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FunctionStep {
    /// The function handed to the step.
    #[serde(default)]
    pub callable: CallableReference,
    /// Where the step was registered.
    pub call_site: CallSite,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<ArgumentValue>,
    /// Interpreter family for the synthesized script.
    #[serde(default)]
    pub runtime: RuntimeFamily,
    /// Interpreter version; the family default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
}

impl FunctionStep {
    /// The requested version, or the family default.
    pub fn version(&self) -> &str {
        self.runtime_version
            .as_deref()
            .unwrap_or(self.runtime.default_version())
    }
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StepBody {
    /// Nothing (metadata-only step).
    #[default]
    Empty,
    /// Shell command.
    Command(String),
    /// Reusable action.
    Action(ActionReference),
    /// Rust function, pending synthesis.
    Function(Box<FunctionStep>),
}

/// A step in a job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "StepRecord", into = "StepRecord")]
pub struct PipelineStep {
    /// Step id, unique within the job.
    pub id: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Run condition (`if:`).
    pub condition: Option<String>,
    /// Keep the job going when this step fails.
    pub continue_on_error: Option<bool>,
    /// Step timeout.
    pub timeout_minutes: Option<u32>,
    /// Working directory for commands.
    pub working_directory: Option<String>,
    /// What the step does.
    pub body: StepBody,
}

impl PipelineStep {
    /// Step running a shell command.
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            body: StepBody::Command(command.into()),
            ..Self::default()
        }
    }

    /// Step using a reusable action.
    pub fn uses(action: ActionReference) -> Self {
        Self {
            body: StepBody::Action(action),
            ..Self::default()
        }
    }

    /// Step running `function` with `args` as a script.
    ///
    /// The caller's file and line are recorded so the function's source can
    /// be found again at synthesis time; `function` itself is only used for
    /// its type name.
    ///
    /// `F` carries no `Fn` bound, so the compiler cannot infer the parameter
    /// types of a closure written inline here: give them explicitly
    /// (`|name: &str| ..`). A closure bound to a variable first is located
    /// through its `let` statement instead, and untyped parameters there
    /// receive literal arguments as written.
    #[track_caller]
    pub fn run_fn<F>(function: F, args: Vec<ArgumentValue>) -> Self {
        let call_site = CallSite::caller();
        let callable = callable_of(&function);
        Self {
            body: StepBody::Function(Box::new(FunctionStep {
                callable,
                call_site,
                args,
                runtime: RuntimeFamily::default(),
                runtime_version: None,
            })),
            ..Self::default()
        }
    }

    /// Set the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the run condition.
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Set `continue-on-error`.
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = Some(continue_on_error);
        self
    }

    /// Set the timeout.
    pub fn with_timeout_minutes(mut self, minutes: u32) -> Self {
        self.timeout_minutes = Some(minutes);
        self
    }

    /// Set the working directory.
    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Choose the script runtime of a function step. No effect on other steps.
    pub fn with_runtime(mut self, runtime: RuntimeFamily, version: Option<&str>) -> Self {
        if let StepBody::Function(function) = &mut self.body {
            function.runtime = runtime;
            function.runtime_version = version.map(str::to_string);
        }
        self
    }

    /// The shell command, for command steps.
    pub fn command(&self) -> Option<&str> {
        match &self.body {
            StepBody::Command(command) => Some(command),
            _ => None,
        }
    }

    /// The action, for action steps.
    pub fn action(&self) -> Option<&ActionReference> {
        match &self.body {
            StepBody::Action(action) => Some(action),
            _ => None,
        }
    }

    /// The function, for function steps.
    pub fn function(&self) -> Option<&FunctionStep> {
        match &self.body {
            StepBody::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Returns true for steps still waiting for synthesis.
    pub fn is_function(&self) -> bool {
        matches!(self.body, StepBody::Function(_))
    }

    /// A label for diagnostics: the id, then the name, then `#<index>`.
    pub fn label(&self, index: usize) -> String {
        self.id
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| format!("#{}", index))
    }
}

fn callable_of<F>(_function: &F) -> CallableReference {
    CallableReference::of::<F>()
}

/// Wire form of a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
struct StepRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uses: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    with: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function: Option<FunctionStep>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    continue_on_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    working_directory: Option<String>,
}

impl TryFrom<StepRecord> for PipelineStep {
    type Error = String;

    fn try_from(record: StepRecord) -> Result<Self, Self::Error> {
        let label = record
            .id
            .clone()
            .or_else(|| record.name.clone())
            .unwrap_or_else(|| "<unnamed>".to_string());

        let body = match (record.run, record.uses, record.function) {
            (None, None, None) => {
                if !record.with.is_empty() {
                    return Err(format!("step `{}` has `with` inputs but no `uses`", label));
                }
                StepBody::Empty
            }
            (Some(run), None, None) => {
                if !record.with.is_empty() {
                    return Err(format!("step `{}` has `with` inputs but no `uses`", label));
                }
                StepBody::Command(run)
            }
            (None, Some(uses), None) => StepBody::Action(ActionReference {
                uses,
                with: record.with,
            }),
            (None, None, Some(function)) => StepBody::Function(Box::new(function)),
            _ => {
                return Err(format!(
                    "step `{}` sets more than one of `run`, `uses` and `function`",
                    label
                ));
            }
        };

        Ok(PipelineStep {
            id: record.id,
            name: record.name,
            env: record.env,
            condition: record.condition,
            continue_on_error: record.continue_on_error,
            timeout_minutes: record.timeout_minutes,
            working_directory: record.working_directory,
            body,
        })
    }
}

impl From<PipelineStep> for StepRecord {
    fn from(step: PipelineStep) -> Self {
        let mut record = StepRecord {
            id: step.id,
            name: step.name,
            condition: step.condition,
            env: step.env,
            continue_on_error: step.continue_on_error,
            timeout_minutes: step.timeout_minutes,
            working_directory: step.working_directory,
            ..StepRecord::default()
        };
        match step.body {
            StepBody::Empty => {}
            StepBody::Command(run) => record.run = Some(run),
            StepBody::Action(action) => {
                record.uses = Some(action.uses);
                record.with = action.with;
            }
            StepBody::Function(function) => record.function = Some(*function),
        }
        record
    }
}

impl JsonSchema for PipelineStep {
    fn schema_name() -> String {
        "PipelineStep".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        StepRecord::json_schema(generator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::SourceLocation;
    use serde_json::json;

    fn deploy(_target: &str, _retries: u32) {}

    #[test]
    fn test_run_fn_records_call_site_and_name() {
        let line = line!() + 1;
        let step = PipelineStep::run_fn(deploy, vec![ArgumentValue::literal("prod"), ArgumentValue::literal(3)]);

        let function = step.function().expect("function step");
        assert_eq!(function.callable.declared_name.as_deref(), Some("deploy"));
        assert_eq!(function.args.len(), 2);
        assert_eq!(function.runtime, RuntimeFamily::RustScript);
        match &function.call_site {
            CallSite::Registered(location) => {
                assert_eq!(location.line, line);
                assert!(location.file.ends_with("step.rs"));
            }
            other => panic!("unexpected call site {:?}", other),
        }
    }

    #[test]
    fn test_with_runtime_only_touches_function_steps() {
        let step = PipelineStep::run_fn(|| {}, vec![])
            .with_runtime(RuntimeFamily::CargoScript, Some("nightly-2025-06-01"));
        let function = step.function().unwrap();
        assert_eq!(function.runtime, RuntimeFamily::CargoScript);
        assert_eq!(function.version(), "nightly-2025-06-01");

        let command = PipelineStep::shell("ls").with_runtime(RuntimeFamily::CargoScript, None);
        assert_eq!(command.command(), Some("ls"));
    }

    #[test]
    fn test_default_version_comes_from_family() {
        let step = PipelineStep::run_fn(|| {}, vec![]);
        assert_eq!(step.function().unwrap().version(), "latest");
    }

    #[test]
    fn test_command_step_serializes_without_action_keys() {
        let step = PipelineStep::shell("cargo test")
            .with_id("test")
            .with_env("RUST_LOG", "debug")
            .with_condition("github.event_name == 'push'")
            .with_timeout_minutes(20);
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "test",
                "if": "github.event_name == 'push'",
                "run": "cargo test",
                "env": { "RUST_LOG": "debug" },
                "timeout-minutes": 20
            })
        );
    }

    #[test]
    fn test_record_with_both_run_and_uses_is_rejected() {
        let err = serde_json::from_value::<PipelineStep>(json!({
            "id": "broken",
            "run": "echo hi",
            "uses": "actions/checkout@v4"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("more than one"));
    }

    #[test]
    fn test_with_without_uses_is_rejected() {
        let err = serde_json::from_value::<PipelineStep>(json!({
            "run": "echo hi",
            "with": { "a": "b" }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("no `uses`"));
    }

    #[test]
    fn test_function_step_from_json() {
        let step: PipelineStep = serde_json::from_value(json!({
            "id": "check",
            "function": {
                "callable": { "declared_name": "check_threshold" },
                "call_site": { "registered": { "file": "src/pipeline.rs", "line": 42 } },
                "args": ["100", 50],
                "runtime": "cargo-script"
            }
        }))
        .unwrap();

        let function = step.function().unwrap();
        assert_eq!(
            function.call_site,
            CallSite::Registered(SourceLocation::new("src/pipeline.rs", 42))
        );
        assert_eq!(function.runtime, RuntimeFamily::CargoScript);
        assert_eq!(function.version(), "nightly");
    }

    #[test]
    fn test_action_round_trip() {
        let step = PipelineStep::uses(
            ActionReference::new("actions/cache@v4").with_input("path", "target"),
        )
        .with_name("Cache");
        let value = serde_json::to_value(&step).unwrap();
        let back: PipelineStep = serde_json::from_value(value).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_label_prefers_id_then_name() {
        assert_eq!(PipelineStep::shell("x").with_id("a").with_name("b").label(3), "a");
        assert_eq!(PipelineStep::shell("x").with_name("b").label(3), "b");
        assert_eq!(PipelineStep::shell("x").label(3), "#3");
    }
}
