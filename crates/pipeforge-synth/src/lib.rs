// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pipeforge Synth - Function Steps to Script Steps
//!
//! This crate turns pipeline steps that carry a Rust function into plain
//! shell steps that run a self-contained script. The function's own source
//! text is found again through the step's recorded call site, wrapped in a
//! small driver and handed to a single-file Rust runtime (`rust-script` or
//! `cargo -Zscript`) on the CI runner.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Function Step Synthesis                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//!
//!     ┌─────────────┐      ┌─────────────┐      ┌─────────────┐
//!     │  Call site  │      │  Function   │      │   Script    │
//!     │  (locate)   │─────▶│   source    │─────▶│  (codegen)  │
//!     │             │      │  (extract)  │      │             │
//!     └─────────────┘      └─────────────┘      └─────────────┘
//!                                 │                    │
//!                                 ▼                    ▼
//!                          ┌─────────────┐      ┌─────────────┐
//!                          │ Dependency  │      │   Shell     │
//!                          │  Analysis   │      │  (embed)    │
//!                          └─────────────┘      └─────────────┘
//! ```
//!
//! # Synthesis Pipeline
//!
//! 1. **Validate**: Check job and step ids and reserved environment names
//! 2. **Set up runtimes**: Prepend missing interpreter setup steps per job
//! 3. **Locate**: Resolve the step's call site to a source file and line
//! 4. **Extract**: Find the function node near that line and slice its text
//! 5. **Marshal**: Turn literal and deferred arguments into script expressions
//! 6. **Synthesize**: Bundle dependencies through `cargo metadata`, or fall
//!    back to a plain reprint, and wrap the function in a driver `main`
//! 7. **Embed**: Write the script through a heredoc and run it
//!
//! # Usage
//!
//! ```ignore
//! use pipeforge_dsl::{ArgumentValue, Job, PipelineStep, Workflow};
//! use pipeforge_synth::{SynthConfig, synthesize_workflow};
//!
//! fn check_threshold(data: &str, threshold: i64) {
//!     let value: i64 = data.parse().unwrap();
//!     assert!(value <= threshold, "Value {} exceeds threshold {}", value, threshold);
//! }
//!
//! let workflow = Workflow::new("ci").with_job(
//!     Job::new("check").step(PipelineStep::run_fn(
//!         check_threshold,
//!         vec![ArgumentValue::literal("100"), ArgumentValue::literal(50)],
//!     )),
//! );
//!
//! let output = synthesize_workflow(&workflow, &SynthConfig::from_env()?)?;
//! println!("{}", serde_json::to_string_pretty(&output.workflow)?);
//! ```
//!
//! # Important Notes
//!
//! - Functions must be self-contained: everything they use is declared in
//!   their own body or comes from `std` or an external crate.
//! - Synthesis reads source files at run time, so it has to run where the
//!   workflow's sources are (typically `build.rs`, a test or a dev binary).
//! - Nothing is executed here; scripts run on the pipeline's runners.
//!
//! # Modules
//!
//! - [`codegen`]: Script generation, bundling and templates
//! - [`synthesize`]: The workflow pass tying everything together
//! - [`validation`]: Graph checks and the self-containment check

#![deny(missing_docs)]

/// Script generation, bundling and templates.
pub mod codegen;

/// Synthesis configuration.
pub mod config;

/// External crates referenced by a function.
pub mod dependency_analysis;

/// Shell embedding of synthesized scripts.
pub mod embed;

/// Error types.
pub mod error;

/// Function node search and source slicing.
pub mod extract;

/// Call-site resolution.
pub mod locate;

/// Argument marshaling.
pub mod marshal;

/// Runtime setup step injection.
pub mod setup;

/// Parsed source files.
pub mod source;

/// The workflow synthesis pass.
pub mod synthesize;

/// Graph validation.
pub mod validation;

pub use codegen::bundle::{Bundler, CargoMetadataBundler, DependencySpec};
pub use codegen::{ScriptMode, ScriptSynthesizer, StepScriptRequest, SynthesizedScript};
pub use config::{BundlerKind, SynthConfig};
pub use error::{BundleError, Result, SynthError};
pub use extract::{ExtractedFunction, extract_function};
pub use locate::locate;
pub use synthesize::{StepReport, SynthesisOutput, WorkflowSynthesizer, synthesize_workflow};
pub use validation::{ValidationResult, validate_workflow};
