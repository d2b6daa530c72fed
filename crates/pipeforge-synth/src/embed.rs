// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shell embedding.
//!
//! A synthesized script becomes the step's `run` command: it is written to a
//! temporary file through a quoted heredoc (no shell expansion inside) and
//! the runtime's interpreter is invoked on that file.

use pipeforge_dsl::RuntimeFamily;

use crate::codegen::SynthesizedScript;
use crate::codegen::templates::render_shell;
use crate::error::{Result, SynthError};

/// Heredoc terminator. Scripts may not contain it on a line of their own.
pub const HEREDOC_DELIMITER: &str = "PIPEFORGE_SCRIPT_EOF_5f0c2e91";

/// Script file name derived from the script checksum.
pub fn script_file_name(script: &SynthesizedScript) -> String {
    let short = script.checksum.get(..12).unwrap_or(&script.checksum);
    format!("step_{}.rs", short)
}

/// Shell command that writes and runs `script`.
pub fn shell_command(
    script: &SynthesizedScript,
    runtime: RuntimeFamily,
    version: &str,
    step: &str,
) -> Result<String> {
    if script
        .code
        .lines()
        .any(|line| line.trim_end() == HEREDOC_DELIMITER)
    {
        return Err(SynthError::DelimiterCollision {
            step: step.to_string(),
        });
    }

    let mut body = script.code.clone();
    if !body.ends_with('\n') {
        body.push('\n');
    }
    let command = render_shell(
        &script_file_name(script),
        HEREDOC_DELIMITER,
        &body,
        &runtime.interpreter(version),
    )?;
    Ok(command)
}
