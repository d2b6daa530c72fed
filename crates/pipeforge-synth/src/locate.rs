// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Call-site location.
//!
//! Turns a step's [`CallSite`] into an existing source file and line. A
//! registered location is resolved against the source root; a backtrace is
//! scanned for the first frame that belongs to user code.

use pipeforge_dsl::{CallSite, SourceLocation};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::config::SynthConfig;
use crate::error::{Result, SynthError};

/// `  12: crate::module::function` (the symbol line of a frame)
static FRAME_SYMBOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?P<index>\d+):\s+(?P<symbol>.+?)\s*$").unwrap());

/// `             at ./src/main.rs:12:5`
static FRAME_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*at\s+(?P<file>.+?):(?P<line>\d+)(?::(?P<column>\d+))?\s*$").unwrap()
});

/// One parsed backtrace frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Demangled symbol.
    pub function: String,
    /// Source file, if the frame has one.
    pub file: Option<String>,
    /// 1-based line.
    pub line: Option<u32>,
    /// 1-based column.
    pub column: Option<u32>,
}

/// Split backtrace text into frames.
pub fn parse_backtrace(trace: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for line in trace.lines() {
        if let Some(caps) = FRAME_SYMBOL.captures(line) {
            frames.push(Frame {
                function: caps["symbol"].to_string(),
                file: None,
                line: None,
                column: None,
            });
        } else if let Some(caps) = FRAME_LOCATION.captures(line)
            && let Some(frame) = frames.last_mut()
            && frame.file.is_none()
        {
            frame.file = Some(caps["file"].to_string());
            frame.line = caps["line"].parse().ok();
            frame.column = caps.name("column").and_then(|c| c.as_str().parse().ok());
        }
    }
    frames
}

/// Resolve a call site to an existing file and line.
pub fn locate(call_site: &CallSite, config: &SynthConfig) -> Result<SourceLocation> {
    match call_site {
        CallSite::Registered(location) => locate_registered(location, config),
        CallSite::Backtrace(trace) => locate_in_backtrace(trace, config),
    }
}

fn locate_registered(location: &SourceLocation, config: &SynthConfig) -> Result<SourceLocation> {
    if location.line == 0 {
        return Err(SynthError::LocationNotFound {
            reason: format!("{} has no line number", location.file.display()),
        });
    }
    let file = resolve_file(&location.file, &config.source_root).ok_or_else(|| {
        SynthError::LocationNotFound {
            reason: format!(
                "source file {} not found (source root {})",
                location.file.display(),
                config.source_root.display()
            ),
        }
    })?;
    Ok(SourceLocation {
        file,
        line: location.line,
        column: location.column,
    })
}

fn locate_in_backtrace(trace: &str, config: &SynthConfig) -> Result<SourceLocation> {
    let frames = parse_backtrace(trace);
    if frames.is_empty() {
        return Err(SynthError::LocationNotFound {
            reason: "backtrace has no frames (was it captured with symbols?)".to_string(),
        });
    }

    for frame in &frames {
        let (Some(file), Some(line)) = (&frame.file, frame.line) else {
            continue;
        };
        if config.is_internal_path(file) || is_internal_symbol(&frame.function) {
            continue;
        }
        if let Some(resolved) = resolve_file(Path::new(file), &config.source_root) {
            tracing::debug!(
                function = %frame.function,
                file = %resolved.display(),
                line = line,
                "Located call site in backtrace"
            );
            return Ok(SourceLocation {
                file: resolved,
                line,
                column: frame.column,
            });
        }
    }

    Err(SynthError::LocationNotFound {
        reason: format!(
            "none of the {} backtrace frames points at an existing user source file",
            frames.len()
        ),
    })
}

fn is_internal_symbol(symbol: &str) -> bool {
    const PREFIXES: [&str; 6] = [
        "std::",
        "core::",
        "alloc::",
        "pipeforge_dsl::",
        "pipeforge_synth::",
        "__rust",
    ];
    let symbol = symbol.trim_start_matches('<');
    PREFIXES.iter().any(|prefix| symbol.starts_with(prefix))
}

/// Resolve `file` to an existing path.
///
/// Absolute paths must exist as given. Relative paths are tried against the
/// source root and then each of its ancestors, since `Location::file` is
/// relative to the workspace root while the source root is often a member.
pub fn resolve_file(file: &Path, source_root: &Path) -> Option<PathBuf> {
    if file.is_absolute() {
        return file.is_file().then(|| file.to_path_buf());
    }
    source_root
        .ancestors()
        .map(|dir| dir.join(file))
        .find(|candidate| candidate.is_file())
}
