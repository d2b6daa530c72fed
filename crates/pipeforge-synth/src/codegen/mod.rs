// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Script synthesis.
//!
//! Turns an extracted function plus the step's arguments into a standalone
//! script for the step's runtime family. The bundled path keeps the function
//! text verbatim and embeds a dependency manifest; if bundling fails, the
//! function is reprinted from its syntax tree and the script carries no
//! dependencies.

pub mod bundle;
pub mod context;
pub mod driver;
pub mod fallback;
pub mod templates;

use pipeforge_dsl::{ArgumentValue, RuntimeFamily};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{BundlerKind, SynthConfig};
use crate::dependency_analysis::referenced_crates;
use crate::error::{BundleError, Result};
use crate::extract::{ExtractedFunction, FunctionNode};
use crate::marshal::marshal_arguments;
use bundle::{Bundler, CargoMetadataBundler, DependencySpec};
use context::EmitContext;
use templates::{ScriptTemplate, render_script};

/// How a script was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptMode {
    /// Verbatim function text plus resolved dependencies.
    Bundled,
    /// Reprinted function text, no dependencies.
    Fallback,
}

/// Input for one synthesized script.
pub struct StepScriptRequest<'a> {
    /// The function to run.
    pub extracted: &'a ExtractedFunction,
    /// Positional arguments.
    pub args: &'a [ArgumentValue],
    /// Runtime family.
    pub runtime: RuntimeFamily,
    /// Runtime version.
    pub runtime_version: &'a str,
}

/// A generated script.
#[derive(Debug, Clone)]
pub struct SynthesizedScript {
    /// Full script text, header included.
    pub code: String,
    /// Dependencies written into the manifest.
    pub declared_dependencies: Vec<DependencySpec>,
    /// Bundled or fallback.
    pub mode: ScriptMode,
    /// Hex SHA-256 of `code`.
    pub checksum: String,
    /// Environment the step must carry (deferred arguments).
    pub env: BTreeMap<String, String>,
}

/// Generates scripts for function steps.
pub struct ScriptSynthesizer {
    bundler: Option<Box<dyn Bundler>>,
    edition: String,
}

impl Default for ScriptSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptSynthesizer {
    /// Synthesizer without a bundler; every script takes the fallback path.
    pub fn new() -> Self {
        Self {
            bundler: None,
            edition: "2024".to_string(),
        }
    }

    /// Synthesizer set up from configuration.
    pub fn from_config(config: &SynthConfig) -> Self {
        let synthesizer = Self::new().with_edition(&config.script_edition);
        match config.bundler {
            BundlerKind::Cargo => {
                synthesizer.with_bundler(Box::new(CargoMetadataBundler::new(&config.cargo)))
            }
            BundlerKind::Disabled => synthesizer,
        }
    }

    /// Use `bundler` to resolve external crates.
    pub fn with_bundler(mut self, bundler: Box<dyn Bundler>) -> Self {
        self.bundler = Some(bundler);
        self
    }

    /// Edition written into embedded manifests.
    pub fn with_edition(mut self, edition: impl Into<String>) -> Self {
        self.edition = edition.into();
        self
    }

    /// Generate the script for one function step.
    pub fn synthesize(&self, request: &StepScriptRequest<'_>) -> Result<SynthesizedScript> {
        let extracted = request.extracted;
        let node = extracted.parse_node()?;
        let ctx = EmitContext::new();
        let call = marshal_arguments(extracted, request.args, &ctx)?;

        let bundled = match &self.bundler {
            Some(bundler) => match bundle(bundler.as_ref(), extracted, &node) {
                Ok(dependencies) => Some(dependencies),
                Err(err) => {
                    tracing::warn!(
                        function = %extracted.display_name(),
                        file = %extracted.file.display(),
                        bundler = bundler.name(),
                        error = %err,
                        "Bundling failed, emitting fallback script"
                    );
                    None
                }
            },
            None => None,
        };
        let (mode, declared_dependencies, function_text) = match bundled {
            Some(dependencies) => (
                ScriptMode::Bundled,
                dependencies,
                extracted.source_text.clone(),
            ),
            None => (
                ScriptMode::Fallback,
                Vec::new(),
                fallback::reprint(extracted, &node),
            ),
        };

        let body = driver::entry_module(&ctx, &extracted.shape, &function_text, &call);
        let dependency_lines: Vec<String> = declared_dependencies
            .iter()
            .map(DependencySpec::manifest_line)
            .collect();
        let code = render_script(&ScriptTemplate {
            runtime: request.runtime,
            version: request.runtime_version,
            edition: &self.edition,
            dependencies: &dependency_lines,
            body: &body,
        })?;
        let checksum = hex_digest(&code);

        tracing::debug!(
            function = %extracted.display_name(),
            mode = ?mode,
            dependencies = declared_dependencies.len(),
            checksum = %checksum,
            "Synthesized script"
        );

        Ok(SynthesizedScript {
            code,
            declared_dependencies,
            mode,
            checksum,
            env: call.env(),
        })
    }
}

/// Resolve the crates `node` refers to. No crates, no bundler call.
fn bundle(
    bundler: &dyn Bundler,
    extracted: &ExtractedFunction,
    node: &FunctionNode,
) -> std::result::Result<Vec<DependencySpec>, BundleError> {
    let crates: BTreeSet<String> = referenced_crates(node);
    if crates.is_empty() {
        return Ok(Vec::new());
    }
    tracing::debug!(bundler = bundler.name(), crates = ?crates, "Resolving crates");
    bundler.resolve(&extracted.file, &crates)
}

/// Lowercase hex SHA-256.
pub fn hex_digest(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|byte| format!("{:02x}", byte)).collect()
}
