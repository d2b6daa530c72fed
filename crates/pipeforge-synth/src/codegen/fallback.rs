// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fallback rendering.
//!
//! When bundling fails the function is reprinted from its syntax tree instead
//! of copied verbatim. The reprint drops comments and any formatting that
//! relied on the surrounding file, leaving a canonical token stream that
//! stands on its own in a script without a dependency manifest.

use quote::ToTokens;

use crate::extract::{ExtractedFunction, FunctionNode};

/// Canonical text of the function, prefixed with a provenance comment.
pub fn reprint(extracted: &ExtractedFunction, node: &FunctionNode) -> String {
    let tokens = match node {
        FunctionNode::Item(item) => item.to_token_stream(),
        FunctionNode::Closure(closure) => closure.to_token_stream(),
    };
    let mut text = format!(
        "// {} ({}:{}-{})\n",
        extracted.display_name(),
        extracted.file.display(),
        extracted.start_line,
        extracted.end_line
    );
    text.push_str(&tokens.to_string());
    text
}
