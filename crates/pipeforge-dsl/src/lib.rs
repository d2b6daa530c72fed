// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pipeline DSL Type Definitions
//!
//! This crate defines the job/step graph that pipeforge synthesizes:
//! - Workflows own jobs, jobs own an ordered list of steps
//! - A step runs a shell command, references a reusable action, or (transiently)
//!   carries a Rust function to be turned into a script by `pipeforge-synth`
//! - Step arguments are either literal scalars or deferred pipeline expressions
//!
//! The JSON form of these types is what the `pipeforge-synth` binary reads and
//! writes. A JSON Schema for it is available through [`workflow_schema`].

use schemars::schema::RootSchema;

/// Step arguments (literal scalars and deferred expressions).
pub mod args;

/// Callable references and call-site capture.
pub mod callable;

/// Script runtime families and their setup steps.
pub mod runtime;

/// Pipeline steps and their bodies.
pub mod step;

/// Workflows and jobs.
pub mod workflow;

pub use args::{ArgumentValue, Scalar};
pub use callable::{CallSite, CallableReference, SourceLocation};
pub use runtime::{RuntimeFamily, SetupRequirement};
pub use step::{ActionReference, FunctionStep, PipelineStep, StepBody};
pub use workflow::{Job, Workflow};

// ============================================================================
// Parsing Functions
// ============================================================================

/// Parse a workflow from a JSON value.
pub fn parse_workflow(json: &serde_json::Value) -> Result<Workflow, String> {
    serde_json::from_value(json.clone()).map_err(|e| format!("Failed to parse workflow: {}", e))
}

/// Parse a workflow from JSON text.
pub fn parse_workflow_str(json: &str) -> Result<Workflow, String> {
    serde_json::from_str(json).map_err(|e| format!("Failed to parse workflow: {}", e))
}

/// JSON Schema describing the workflow document accepted by [`parse_workflow`].
pub fn workflow_schema() -> RootSchema {
    schemars::schema_for!(Workflow)
}
