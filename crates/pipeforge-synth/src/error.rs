// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Synthesis error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a synthesis pass.
#[derive(Debug, Error)]
pub enum SynthError {
    /// No usable user frame / source file for a function step
    #[error("could not locate the function step's call site: {reason}")]
    LocationNotFound {
        /// What went wrong
        reason: String,
    },

    /// No function node matched at the located position
    #[error("no function found near {file}:{line}{}", name.as_ref().map(|n| format!(" (looking for `{}`)", n)).unwrap_or_default())]
    NodeNotFound {
        /// Source file searched
        file: PathBuf,
        /// Located line
        line: u32,
        /// Declared name, when known
        name: Option<String>,
    },

    /// Source file could not be read
    #[error("failed to read {path}: {source}")]
    SourceRead {
        /// File path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Source file or extracted text did not parse
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// The function cannot run as a standalone script
    #[error("function `{function}` cannot be synthesized: {reason}")]
    UnsupportedFunction {
        /// Function name or `<closure>`
        function: String,
        /// Why
        reason: String,
    },

    /// Argument count differs from the parameter count
    #[error("function `{function}` takes {expected} argument(s) but {given} were supplied")]
    ArityMismatch {
        /// Function name or `<closure>`
        function: String,
        /// Declared parameters
        expected: usize,
        /// Supplied arguments
        given: usize,
    },

    /// The body refers to names defined outside the function
    #[error("function `{function}` is not self-contained; it refers to: {}", identifiers.join(", "))]
    NotSelfContained {
        /// Function name or `<closure>`
        function: String,
        /// Offending names, in first-seen order
        identifiers: Vec<String>,
    },

    /// A literal argument does not fit the parameter it is passed to
    #[error("argument {index} of `{function}` is invalid: {reason}")]
    InvalidArgument {
        /// Function name or `<closure>`
        function: String,
        /// Zero-based parameter index
        index: usize,
        /// Why
        reason: String,
    },

    /// The script contains the heredoc delimiter on a line of its own
    #[error("script for step `{step}` contains the heredoc delimiter")]
    DelimiterCollision {
        /// Step label
        step: String,
    },

    /// Template rendering failed
    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    /// The workflow failed graph validation
    #[error("invalid workflow:\n{0}")]
    InvalidGraph(String),

    /// Configuration error (invalid environment variable)
    #[error("configuration error: {0}")]
    Config(String),

    /// Error while materializing one step
    #[error("job `{job}`, step `{step}`: {source}")]
    Step {
        /// Job id
        job: String,
        /// Step label
        step: String,
        /// Underlying error
        #[source]
        source: Box<SynthError>,
    },
}

impl SynthError {
    /// Wrap this error with the job and step it occurred in.
    pub fn in_step(self, job: &str, step: &str) -> Self {
        SynthError::Step {
            job: job.to_string(),
            step: step.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error, unwrapping step context.
    pub fn root(&self) -> &SynthError {
        match self {
            SynthError::Step { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Errors from the bundling path. Recovered by falling back to a plain reprint.
#[derive(Debug, Error)]
pub enum BundleError {
    /// `cargo metadata` ran and failed
    #[error("{0}")]
    Cargo(String),

    /// `cargo metadata` could not be started or its output not read
    #[error("cargo metadata error: {0}")]
    Metadata(#[from] cargo_metadata::Error),

    /// No Cargo.toml above the source file
    #[error("no Cargo.toml found above {0}")]
    ManifestNotFound(PathBuf),

    /// The manifest has no package owning the source file
    #[error("no package in cargo metadata for manifest {0}")]
    PackageNotFound(PathBuf),

    /// Referenced crates are not dependencies of the package
    #[error("crates not declared in {manifest}: {}", crates.join(", "))]
    UnresolvedCrates {
        /// Manifest searched
        manifest: PathBuf,
        /// Unresolved crate names
        crates: Vec<String>,
    },

    /// A dependency that cannot be expressed in a single-file manifest
    #[error("dependency `{name}` cannot be embedded: {reason}")]
    UnsupportedDependency {
        /// Dependency name
        name: String,
        /// Why
        reason: String,
    },

    /// Crate references cannot be bundled as analyzed
    #[error("cannot bundle: {0}")]
    Analysis(String),
}

/// Result alias for synthesis operations.
pub type Result<T> = std::result::Result<T, SynthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_context_message_and_root() {
        let err = SynthError::ArityMismatch {
            function: "check_threshold".to_string(),
            expected: 2,
            given: 1,
        }
        .in_step("build", "check");

        assert_eq!(
            err.to_string(),
            "job `build`, step `check`: function `check_threshold` takes 2 argument(s) but 1 were supplied"
        );
        assert!(matches!(err.root(), SynthError::ArityMismatch { .. }));
    }

    #[test]
    fn test_node_not_found_mentions_name() {
        let err = SynthError::NodeNotFound {
            file: PathBuf::from("src/ci.rs"),
            line: 12,
            name: Some("deploy".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "no function found near src/ci.rs:12 (looking for `deploy`)"
        );
    }

    #[test]
    fn test_not_self_contained_lists_names() {
        let err = SynthError::NotSelfContained {
            function: "<closure>".to_string(),
            identifiers: vec!["THRESHOLD".to_string(), "helper".to_string()],
        };
        assert!(err.to_string().ends_with("refers to: THRESHOLD, helper"));
    }
}
