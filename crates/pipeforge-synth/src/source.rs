// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Parsed source files.
//!
//! Files are parsed once per pass. Spans reported by `proc-macro2` (with
//! `span-locations`) are 1-based lines and 0-based character columns; this
//! module maps them back to byte offsets so original text can be sliced out.

use proc_macro2::{LineColumn, TokenStream};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{Result, SynthError};

const BOM: char = '\u{feff}';

/// A source file together with its syntax tree.
#[derive(Debug)]
pub struct ParsedSource {
    /// Path the file was read from.
    pub path: PathBuf,
    /// File text with any byte-order mark removed.
    pub text: String,
    /// Syntax tree.
    pub file: syn::File,
    line_starts: Vec<usize>,
}

impl ParsedSource {
    /// Read and parse `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| SynthError::SourceRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, text)
    }

    /// Parse already loaded text.
    pub fn parse(path: &Path, text: String) -> Result<Self> {
        let text = match text.strip_prefix(BOM) {
            Some(stripped) => stripped.to_string(),
            None => text,
        };
        let file = syn::parse_file(&text).map_err(|e| SynthError::Parse {
            path: path.to_path_buf(),
            message: format!("{} (line {})", e, e.span().start().line),
        })?;
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            text,
            file,
            line_starts,
        })
    }

    /// Number of lines in the file.
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Byte offset of a span position.
    pub fn offset(&self, position: LineColumn) -> Option<usize> {
        let line_start = *self.line_starts.get(position.line.checked_sub(1)?)?;
        let line_end = self
            .line_starts
            .get(position.line)
            .copied()
            .unwrap_or(self.text.len());
        let line = &self.text[line_start..line_end];
        if position.column == 0 {
            return Some(line_start);
        }
        match line.char_indices().nth(position.column) {
            Some((byte, _)) => Some(line_start + byte),
            // end of the last line
            None if line.chars().count() == position.column => Some(line_end),
            None => None,
        }
    }

    /// Original text between two span positions.
    pub fn slice(&self, start: LineColumn, end: LineColumn) -> Option<&str> {
        let from = self.offset(start)?;
        let to = self.offset(end)?;
        (from <= to).then(|| &self.text[from..to])
    }

    /// Original text covered by a token stream: first token start to last token end.
    pub fn slice_tokens(&self, tokens: TokenStream) -> Option<(&str, LineColumn, LineColumn)> {
        let (start, end) = token_range(tokens)?;
        Some((self.slice(start, end)?, start, end))
    }

    /// Names of the modules declared at the top level of the file.
    pub fn module_names(&self) -> BTreeSet<String> {
        self.file
            .items
            .iter()
            .filter_map(|item| match item {
                syn::Item::Mod(module) => Some(module.ident.to_string()),
                _ => None,
            })
            .collect()
    }
}

/// Start of the first token and end of the last token.
pub fn token_range(tokens: TokenStream) -> Option<(LineColumn, LineColumn)> {
    let mut iter = tokens.into_iter();
    let first = iter.next()?;
    let last = iter.last().unwrap_or_else(|| first.clone());
    Some((first.span().start(), last.span().end()))
}

/// Per-pass cache of parsed files.
#[derive(Default)]
pub struct SourceCache {
    entries: HashMap<PathBuf, Rc<ParsedSource>>,
}

impl SourceCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parsed file at `path`, reading it on first use.
    pub fn get(&mut self, path: &Path) -> Result<Rc<ParsedSource>> {
        if let Some(parsed) = self.entries.get(path) {
            return Ok(Rc::clone(parsed));
        }
        let parsed = Rc::new(ParsedSource::load(path)?);
        tracing::debug!(file = %path.display(), lines = parsed.line_count(), "Parsed source file");
        self.entries.insert(path.to_path_buf(), Rc::clone(&parsed));
        Ok(parsed)
    }

    /// Number of cached files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been parsed yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
