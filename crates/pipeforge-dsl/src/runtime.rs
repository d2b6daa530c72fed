// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Script runtime families.
//!
//! A synthesized function step runs as a single-file Rust script under one of
//! two interpreters. Each family knows how it is invoked, which action installs
//! it, and how to recognise an existing setup step for it.

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::step::{ActionReference, PipelineStep};

static INSTALL_ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^taiki-e/install-action@(?P<tool>[A-Za-z0-9_.\-]+)$").unwrap());

static TOOLCHAIN_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(dtolnay/rust-toolchain|actions-rust-lang/setup-rust-toolchain)@\S+$").unwrap()
});

/// Interpreter a synthesized script runs under.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RuntimeFamily {
    /// `rust-script`, installed as a cargo tool.
    #[default]
    RustScript,
    /// Cargo single-file packages (`cargo -Zscript`), nightly toolchain.
    CargoScript,
}

impl RuntimeFamily {
    /// Version used when a step does not request one.
    pub fn default_version(&self) -> &'static str {
        match self {
            RuntimeFamily::RustScript => "latest",
            RuntimeFamily::CargoScript => "nightly",
        }
    }

    /// Shell command prefix that runs a script file.
    pub fn interpreter(&self, version: &str) -> String {
        match self {
            RuntimeFamily::RustScript => "rust-script".to_string(),
            RuntimeFamily::CargoScript => format!("cargo +{} -Zscript", version),
        }
    }

    /// The action that installs this runtime at `version`.
    pub fn setup_action(&self, version: &str) -> ActionReference {
        match self {
            RuntimeFamily::RustScript => {
                let tool = if version == "latest" {
                    "rust-script".to_string()
                } else {
                    format!("rust-script@{}", version)
                };
                ActionReference {
                    uses: "taiki-e/install-action@v2".to_string(),
                    with: BTreeMap::from([("tool".to_string(), tool)]),
                }
            }
            RuntimeFamily::CargoScript => ActionReference {
                uses: "dtolnay/rust-toolchain@master".to_string(),
                with: BTreeMap::from([("toolchain".to_string(), version.to_string())]),
            },
        }
    }

    /// A complete setup step for this runtime at `version`.
    pub fn setup_step(&self, version: &str) -> PipelineStep {
        PipelineStep::uses(self.setup_action(version))
            .with_id(format!("setup-{}-{}", self.as_ref(), slug(version)))
            .with_name(format!("Set up {} {}", self.as_ref(), version))
    }

    /// Returns true if `action` already provides this runtime.
    pub fn is_setup_action(&self, action: &ActionReference) -> bool {
        match self {
            RuntimeFamily::RustScript => {
                let Some(captures) = INSTALL_ACTION.captures(&action.uses) else {
                    return false;
                };
                // `taiki-e/install-action@rust-script` shorthand
                if captures["tool"].starts_with("rust-script") {
                    return true;
                }
                action
                    .with
                    .get("tool")
                    .map(|tools| {
                        tools
                            .split([',', '\n'])
                            .any(|tool| tool.trim().starts_with("rust-script"))
                    })
                    .unwrap_or(false)
            }
            RuntimeFamily::CargoScript => TOOLCHAIN_ACTION.is_match(&action.uses),
        }
    }
}

/// A runtime a job needs set up before its function steps run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct SetupRequirement {
    /// Runtime family.
    pub runtime: RuntimeFamily,
    /// Requested version (the family default when the step named none).
    pub version: String,
}

impl SetupRequirement {
    /// Requirement for `runtime`, falling back to its default version.
    pub fn new(runtime: RuntimeFamily, version: Option<&str>) -> Self {
        Self {
            runtime,
            version: version.unwrap_or(runtime.default_version()).to_string(),
        }
    }

    /// The step that satisfies this requirement.
    pub fn setup_step(&self) -> PipelineStep {
        self.runtime.setup_step(&self.version)
    }
}

fn slug(version: &str) -> String {
    version
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_family_names_round_trip() {
        assert_eq!(RuntimeFamily::RustScript.to_string(), "rust-script");
        assert_eq!(RuntimeFamily::CargoScript.as_ref(), "cargo-script");
        assert_eq!(
            RuntimeFamily::from_str("cargo-script").unwrap(),
            RuntimeFamily::CargoScript
        );
        assert_eq!(
            serde_json::to_value(RuntimeFamily::RustScript).unwrap(),
            serde_json::json!("rust-script")
        );
    }

    #[test]
    fn test_setup_action_is_recognised_by_its_family() {
        for family in RuntimeFamily::iter() {
            for version in ["latest", "0.35", "nightly-2025-01-01"] {
                let action = family.setup_action(version);
                assert!(family.is_setup_action(&action), "{family} {version}");
            }
        }
    }

    #[test]
    fn test_setup_action_versions() {
        let action = RuntimeFamily::RustScript.setup_action("0.35");
        assert_eq!(action.with.get("tool").unwrap(), "rust-script@0.35");
        let action = RuntimeFamily::RustScript.setup_action("latest");
        assert_eq!(action.with.get("tool").unwrap(), "rust-script");
        let action = RuntimeFamily::CargoScript.setup_action("nightly");
        assert_eq!(action.with.get("toolchain").unwrap(), "nightly");
    }

    #[test]
    fn test_install_action_for_other_tools_does_not_count() {
        let action = ActionReference::new("taiki-e/install-action@v2").with_input("tool", "nextest");
        assert!(!RuntimeFamily::RustScript.is_setup_action(&action));

        let shorthand = ActionReference::new("taiki-e/install-action@rust-script");
        assert!(RuntimeFamily::RustScript.is_setup_action(&shorthand));

        let multi = ActionReference::new("taiki-e/install-action@v2")
            .with_input("tool", "cargo-hack, rust-script@0.34");
        assert!(RuntimeFamily::RustScript.is_setup_action(&multi));
    }

    #[test]
    fn test_toolchain_actions_satisfy_cargo_script() {
        let action = ActionReference::new("actions-rust-lang/setup-rust-toolchain@v1");
        assert!(RuntimeFamily::CargoScript.is_setup_action(&action));
        assert!(!RuntimeFamily::RustScript.is_setup_action(&action));
        let checkout = ActionReference::new("actions/checkout@v4");
        assert!(!RuntimeFamily::CargoScript.is_setup_action(&checkout));
    }

    #[test]
    fn test_setup_step_shape() {
        let step = SetupRequirement::new(RuntimeFamily::CargoScript, None).setup_step();
        assert_eq!(step.id.as_deref(), Some("setup-cargo-script-nightly"));
        assert_eq!(step.name.as_deref(), Some("Set up cargo-script nightly"));
        assert!(step.command().is_none());
        assert!(step.action().is_some());
    }

    #[test]
    fn test_interpreter_commands() {
        assert_eq!(RuntimeFamily::RustScript.interpreter("0.35"), "rust-script");
        assert_eq!(
            RuntimeFamily::CargoScript.interpreter("nightly"),
            "cargo +nightly -Zscript"
        );
    }
}
