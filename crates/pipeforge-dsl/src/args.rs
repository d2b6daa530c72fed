// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function-step arguments.
//!
//! Every positional argument of a function step is either a literal scalar,
//! known when the pipeline is synthesized, or a deferred expression that the
//! hosting pipeline engine resolves when the job runs (`${{ ... }}`).
//!
//! Callers build the variant explicitly. [`ArgumentValue::classify`] exists for
//! untyped inputs (JSON documents, command lines) where only a string is known.

use regex::Regex;
use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::fmt;
use std::sync::LazyLock;

/// Matches a value that is entirely one pipeline expression: `${{ ... }}`.
static DEFERRED_EXPRESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\$\{\{[\s\S]*\}\}\s*$").unwrap());

/// A literal argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Scalar {
    /// `true` / `false`
    Bool(bool),
    /// Integer or floating point number
    Number(Number),
    /// UTF-8 text
    String(String),
}

impl Scalar {
    /// The value rendered as plain text (what an environment variable would hold).
    pub fn as_text(&self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Number(n) => n.to_string(),
            Scalar::String(s) => s.clone(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

macro_rules! scalar_from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Scalar {
                fn from(value: $t) -> Self {
                    Scalar::Number(Number::from(value))
                }
            }
        )*
    };
}

scalar_from_integer!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl From<f64> for Scalar {
    /// Non-finite floats have no JSON number form and are kept as text.
    fn from(value: f64) -> Self {
        match Number::from_f64(value) {
            Some(n) => Scalar::Number(n),
            None => Scalar::String(value.to_string()),
        }
    }
}

/// One positional argument of a function step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawArgument", into = "TaggedArgument")]
pub enum ArgumentValue {
    /// Known at synthesis time.
    Literal(Scalar),
    /// Raw expression text resolved by the pipeline engine at run time.
    Deferred(String),
}

impl ArgumentValue {
    /// Build a literal argument.
    pub fn literal(value: impl Into<Scalar>) -> Self {
        ArgumentValue::Literal(value.into())
    }

    /// Build a deferred argument from raw expression text, e.g. `${{ github.sha }}`.
    pub fn deferred(expression: impl Into<String>) -> Self {
        ArgumentValue::Deferred(expression.into())
    }

    /// Classify an untyped string: a whole-value `${{ ... }}` expression is
    /// deferred, anything else is a literal string.
    pub fn classify(raw: &str) -> Self {
        if is_deferred_expression(raw) {
            ArgumentValue::Deferred(raw.trim().to_string())
        } else {
            ArgumentValue::Literal(Scalar::String(raw.to_string()))
        }
    }

    /// Returns true for [`ArgumentValue::Deferred`].
    pub fn is_deferred(&self) -> bool {
        matches!(self, ArgumentValue::Deferred(_))
    }
}

/// Returns true if `raw` is exactly one pipeline expression.
pub fn is_deferred_expression(raw: &str) -> bool {
    DEFERRED_EXPRESSION.is_match(raw)
}

/// Canonical serialized form: `{"literal": 5}` or `{"deferred": "${{ ... }}"}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
enum TaggedArgument {
    Literal(Scalar),
    Deferred(String),
}

/// Accepted input forms: the tagged form, or a bare scalar.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(untagged)]
enum RawArgument {
    Tagged(TaggedArgument),
    Bare(Scalar),
}

impl From<RawArgument> for ArgumentValue {
    fn from(raw: RawArgument) -> Self {
        match raw {
            RawArgument::Tagged(TaggedArgument::Literal(scalar)) => ArgumentValue::Literal(scalar),
            RawArgument::Tagged(TaggedArgument::Deferred(expr)) => ArgumentValue::Deferred(expr),
            RawArgument::Bare(Scalar::String(s)) => ArgumentValue::classify(&s),
            RawArgument::Bare(scalar) => ArgumentValue::Literal(scalar),
        }
    }
}

impl From<ArgumentValue> for TaggedArgument {
    fn from(value: ArgumentValue) -> Self {
        match value {
            ArgumentValue::Literal(scalar) => TaggedArgument::Literal(scalar),
            ArgumentValue::Deferred(expr) => TaggedArgument::Deferred(expr),
        }
    }
}

impl JsonSchema for ArgumentValue {
    fn schema_name() -> String {
        "ArgumentValue".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        RawArgument::json_schema(generator)
    }
}
