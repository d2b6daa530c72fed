// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Synthesis configuration.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `PIPEFORGE_SOURCE_ROOT` | current directory |
//! | `PIPEFORGE_CARGO` | `cargo` |
//! | `PIPEFORGE_BUNDLER` | `cargo` (`off` disables bundling) |
//! | `PIPEFORGE_PRECISE_WINDOW` | `10` |
//! | `PIPEFORGE_FALLBACK_WINDOW` | `100` |
//! | `PIPEFORGE_CHECK_SELF_CONTAINED` | `true` |

use std::env;
use std::path::PathBuf;

use crate::error::{Result, SynthError};

/// How the synthesizer resolves external crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BundlerKind {
    /// Resolve through `cargo metadata` and embed a manifest.
    #[default]
    Cargo,
    /// Always emit the plain fallback script.
    Disabled,
}

/// Settings for one synthesis pass.
#[derive(Debug, Clone)]
pub struct SynthConfig {
    /// Directory relative call-site paths are resolved against.
    pub source_root: PathBuf,
    /// Method / function names that register a function step.
    pub entry_points: Vec<String>,
    /// Line window for the call-expression search.
    pub precise_window: u32,
    /// Line window for the by-name / nearest-function search.
    pub fallback_window: u32,
    /// Bundling strategy.
    pub bundler: BundlerKind,
    /// Cargo executable used by the bundler.
    pub cargo: PathBuf,
    /// Reject functions that refer to names outside their own body.
    pub check_self_contained: bool,
    /// Edition written into embedded manifests.
    pub script_edition: String,
    /// Path fragments of frames that never count as the user's call site.
    pub internal_path_markers: Vec<String>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            source_root: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            entry_points: vec!["run_fn".to_string()],
            precise_window: 10,
            fallback_window: 100,
            bundler: BundlerKind::Cargo,
            cargo: PathBuf::from("cargo"),
            check_self_contained: true,
            script_edition: "2024".to_string(),
            internal_path_markers: vec![
                "/rustc/".to_string(),
                "/.cargo/registry/".to_string(),
                "/.cargo/git/".to_string(),
                "/target/".to_string(),
                "pipeforge-dsl/src/".to_string(),
                "pipeforge-synth/src/".to_string(),
            ],
        }
    }
}

impl SynthConfig {
    /// Load configuration from `PIPEFORGE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(root) = lookup("PIPEFORGE_SOURCE_ROOT") {
            config.source_root = PathBuf::from(root);
        }
        if let Some(cargo) = lookup("PIPEFORGE_CARGO") {
            config.cargo = PathBuf::from(cargo);
        }
        if let Some(bundler) = lookup("PIPEFORGE_BUNDLER") {
            config.bundler = match bundler.trim().to_ascii_lowercase().as_str() {
                "cargo" => BundlerKind::Cargo,
                "off" | "none" | "disabled" => BundlerKind::Disabled,
                other => {
                    return Err(SynthError::Config(format!(
                        "invalid PIPEFORGE_BUNDLER: {} (expected `cargo` or `off`)",
                        other
                    )));
                }
            };
        }
        if let Some(window) = lookup("PIPEFORGE_PRECISE_WINDOW") {
            config.precise_window = parse_window("PIPEFORGE_PRECISE_WINDOW", &window)?;
        }
        if let Some(window) = lookup("PIPEFORGE_FALLBACK_WINDOW") {
            config.fallback_window = parse_window("PIPEFORGE_FALLBACK_WINDOW", &window)?;
        }
        if let Some(check) = lookup("PIPEFORGE_CHECK_SELF_CONTAINED") {
            config.check_self_contained = check == "true" || check == "1";
        }

        Ok(config)
    }

    /// Set the source root.
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = root.into();
        self
    }

    /// Set the bundling strategy.
    pub fn with_bundler(mut self, bundler: BundlerKind) -> Self {
        self.bundler = bundler;
        self
    }

    /// Add an entry-point name.
    pub fn with_entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_points.push(name.into());
        self
    }

    /// Toggle the self-containment check.
    pub fn with_self_contained_check(mut self, enabled: bool) -> Self {
        self.check_self_contained = enabled;
        self
    }

    /// Returns true if `path` belongs to the toolchain, dependencies or this library.
    pub fn is_internal_path(&self, path: &str) -> bool {
        let normalized = path.replace('\\', "/");
        self.internal_path_markers
            .iter()
            .any(|marker| normalized.contains(marker.as_str()))
    }
}

fn parse_window(name: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|e| SynthError::Config(format!("invalid {}: {}", name, e)))
}
