// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Callable references and call sites.
//!
//! A function step only carries metadata about the Rust function it was built
//! from: the declared name (derived from the function's type name) and where
//! the step was registered. The synthesizer recovers the function's source
//! text from that call site.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::Location;
use std::path::PathBuf;

/// Metadata about the function handed to a function step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CallableReference {
    /// Declared function name; `None` for closures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_name: Option<String>,
    /// Full type name as reported by `std::any::type_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl CallableReference {
    /// Reference for a function value of type `F`.
    ///
    /// Function items report their path (`my_crate::checks::check_threshold`),
    /// which gives the declared name. Closures report `{{closure}}` and are anonymous.
    pub fn of<F>() -> Self {
        let type_name = std::any::type_name::<F>();
        Self {
            declared_name: declared_name_from_type(type_name),
            type_name: Some(type_name.to_string()),
        }
    }

    /// Reference to a function known only by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            declared_name: Some(name.into()),
            type_name: None,
        }
    }

    /// Reference to an anonymous function.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Returns true when no declared name is known.
    pub fn is_anonymous(&self) -> bool {
        self.declared_name.is_none()
    }
}

/// Derive a declared name from a `type_name` string.
fn declared_name_from_type(type_name: &str) -> Option<String> {
    if type_name.contains("{{closure}}") || type_name.contains('(') {
        return None;
    }
    let base = type_name.split('<').next()?;
    let name = base.rsplit("::").next()?.trim();
    let mut chars = name.chars();
    let first = chars.next()?;
    let valid = (first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_');
    valid.then(|| name.to_string())
}

/// A source position: file plus 1-based line (and optional 1-based column).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct SourceLocation {
    /// Source file, absolute or relative to the source root.
    pub file: PathBuf,
    /// 1-based line.
    pub line: u32,
    /// 1-based column, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl SourceLocation {
    /// Create a location without column information.
    pub fn new(file: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column: None,
        }
    }

    /// Attach a column.
    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(column) => write!(f, "{}:{}:{}", self.file.display(), self.line, column),
            None => write!(f, "{}:{}", self.file.display(), self.line),
        }
    }
}

impl From<&Location<'_>> for SourceLocation {
    fn from(location: &Location<'_>) -> Self {
        SourceLocation::new(location.file(), location.line()).with_column(location.column())
    }
}

/// Where a function step was registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallSite {
    /// Exact position recorded at registration time.
    Registered(SourceLocation),
    /// Text of a captured `std::backtrace::Backtrace`.
    Backtrace(String),
}

impl CallSite {
    /// Record the caller's position. Propagates through `#[track_caller]` frames.
    #[track_caller]
    pub fn caller() -> Self {
        CallSite::Registered(SourceLocation::from(Location::caller()))
    }

    /// Capture the current stack as text.
    pub fn capture_backtrace() -> Self {
        CallSite::Backtrace(Backtrace::force_capture().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_step_fn(_data: &str) {}

    #[test]
    fn test_declared_name_of_fn_item() {
        let reference = CallableReference::of::<fn(&str)>();
        // fn pointers have no name
        assert!(reference.is_anonymous());

        fn reference_of<F>(_f: F) -> CallableReference {
            CallableReference::of::<F>()
        }
        let reference = reference_of(sample_step_fn);
        assert_eq!(reference.declared_name.as_deref(), Some("sample_step_fn"));
        assert!(reference.type_name.unwrap().ends_with("sample_step_fn"));
    }

    #[test]
    fn test_closure_is_anonymous() {
        fn reference_of<F>(_f: F) -> CallableReference {
            CallableReference::of::<F>()
        }
        let reference = reference_of(|| println!("hi"));
        assert!(reference.is_anonymous());
        assert!(reference.type_name.unwrap().contains("{{closure}}"));
    }

    #[test]
    fn test_declared_name_from_generic_type() {
        assert_eq!(
            declared_name_from_type("app::steps::render<alloc::string::String>"),
            Some("render".to_string())
        );
        assert_eq!(declared_name_from_type("fn(i32) -> i32"), None);
        assert_eq!(declared_name_from_type(""), None);
    }

    #[test]
    fn test_caller_records_this_line() {
        let expected_line = line!() + 1;
        let site = CallSite::caller();
        match site {
            CallSite::Registered(location) => {
                assert_eq!(location.line, expected_line);
                assert!(location.file.ends_with("callable.rs"));
                assert!(location.column.is_some());
            }
            other => panic!("unexpected call site {:?}", other),
        }
    }

    #[test]
    fn test_location_display() {
        let location = SourceLocation::new("src/main.rs", 12).with_column(5);
        assert_eq!(location.to_string(), "src/main.rs:12:5");
        assert_eq!(SourceLocation::new("a.rs", 3).to_string(), "a.rs:3");
    }
}
