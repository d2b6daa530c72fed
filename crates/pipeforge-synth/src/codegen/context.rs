// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Emission context for script generation.
//!
//! Owns the identifiers generated code uses, so marshaling and the driver
//! agree on names. Every generated name carries the `__pipeforge` prefix
//! (constants: `PIPEFORGE_`) to stay clear of user code.

use proc_macro2::{Ident, Span};

use crate::marshal::ARG_ENV_PREFIX;

/// Context for code emission.
pub struct EmitContext {
    /// Name the exported entry function is bound to
    pub entry: Ident,

    /// Helper that parses argument text through `FromStr`
    pub parse_fn: Ident,

    /// Trait reporting the entry function's return value
    pub outcome_trait: Ident,
}

impl Default for EmitContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EmitContext {
    /// Create a new emission context.
    pub fn new() -> Self {
        Self {
            entry: Ident::new("__pipeforge_entry", Span::call_site()),
            parse_fn: Ident::new("__pipeforge_parse", Span::call_site()),
            outcome_trait: Ident::new("__PipeforgeOutcome", Span::call_site()),
        }
    }

    /// Environment variable carrying deferred argument `index`.
    pub fn env_name(index: usize) -> String {
        format!("{}{}", ARG_ENV_PREFIX, index)
    }

    /// Constant holding the default (raw expression text) of argument `index`.
    pub fn default_const(&self, index: usize) -> Ident {
        Ident::new(
            &format!("{}{}_DEFAULT", ARG_ENV_PREFIX, index),
            Span::call_site(),
        )
    }

    /// Local holding the runtime value of argument `index`.
    pub fn arg_var(&self, index: usize) -> Ident {
        Ident::new(&format!("__pipeforge_arg_{}", index), Span::call_site())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_names() {
        let ctx = EmitContext::new();
        assert_eq!(EmitContext::env_name(2), "PIPEFORGE_ARG_2");
        assert_eq!(ctx.default_const(2).to_string(), "PIPEFORGE_ARG_2_DEFAULT");
        assert_eq!(ctx.arg_var(0).to_string(), "__pipeforge_arg_0");
    }
}
