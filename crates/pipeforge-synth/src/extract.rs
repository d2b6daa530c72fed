// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function extraction.
//!
//! Given a located call site, find the function the step was built from and
//! cut its original text out of the file.
//!
//! Two passes run over the file's syntax tree:
//!
//! 1. **Precise**: an entry-point call (`PipelineStep::run_fn(f, ..)`) starting
//!    within the precise window of the located line. Its first argument is the
//!    target, either a closure written in place or a path naming a `fn` item
//!    of the same file.
//! 2. **Fallback**: within the wider window, a `fn` item with the declared
//!    name, or for anonymous callables the nearest closure or `fn`.

use proc_macro2::LineColumn;
use quote::ToTokens;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};
use syn::{Expr, ExprClosure, FnArg, ItemFn, Pat, Token};

use pipeforge_dsl::{CallableReference, SourceLocation};

use crate::config::SynthConfig;
use crate::error::{Result, SynthError};
use crate::source::ParsedSource;

/// How the extracted function is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionShape {
    /// A `fn` item.
    Item {
        /// Declared identifier.
        ident: String,
    },
    /// A closure expression.
    Closure,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Binding text (`data`, `_`, `(a, b)`).
    pub name: String,
    /// Declared type, when annotated.
    pub ty: Option<String>,
}

/// The source of a function step's callable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFunction {
    /// Original text, comments and doc comments included.
    pub source_text: String,
    /// File the text came from.
    pub file: std::path::PathBuf,
    /// Declared name (`None` for closures).
    pub declared_name: Option<String>,
    /// 1-based first line.
    pub start_line: usize,
    /// 1-based last line.
    pub end_line: usize,
    /// Item or closure.
    pub shape: FunctionShape,
    /// Parameters in order.
    pub params: Vec<Param>,
}

/// A re-parsed extracted function.
pub enum FunctionNode {
    /// `fn` item
    Item(ItemFn),
    /// Closure expression
    Closure(ExprClosure),
}

impl ExtractedFunction {
    /// Name for diagnostics.
    pub fn display_name(&self) -> String {
        self.declared_name
            .clone()
            .unwrap_or_else(|| "<closure>".to_string())
    }

    /// Parse `source_text` on its own.
    pub fn parse_node(&self) -> Result<FunctionNode> {
        let parse_error = |e: syn::Error| SynthError::Parse {
            path: self.file.clone(),
            message: format!("extracted text of `{}` does not parse: {}", self.display_name(), e),
        };
        match self.shape {
            FunctionShape::Item { .. } => syn::parse_str::<ItemFn>(&self.source_text)
                .map(FunctionNode::Item)
                .map_err(parse_error),
            FunctionShape::Closure => syn::parse_str::<ExprClosure>(&self.source_text)
                .map(FunctionNode::Closure)
                .map_err(parse_error),
        }
    }
}

/// An entry-point call found in the file.
struct EntryCall {
    /// Start of the whole call expression.
    start: LineColumn,
    /// Start of the entry-point name (method calls report this column).
    name_start: LineColumn,
    first_arg: Option<Expr>,
}

#[derive(Default)]
struct Candidates {
    calls: Vec<EntryCall>,
    fns: Vec<ItemFn>,
    closures: Vec<ExprClosure>,
}

struct CandidateCollector<'a> {
    entry_points: &'a [String],
    found: Candidates,
}

impl CandidateCollector<'_> {
    fn is_entry_point(&self, ident: &syn::Ident) -> bool {
        self.entry_points.iter().any(|name| ident == name)
    }
}

impl<'ast> Visit<'ast> for CandidateCollector<'_> {
    fn visit_expr_call(&mut self, call: &'ast syn::ExprCall) {
        if let Expr::Path(path) = &*call.func
            && let Some(last) = path.path.segments.last()
            && self.is_entry_point(&last.ident)
        {
            self.found.calls.push(EntryCall {
                start: call.span().start(),
                name_start: last.ident.span().start(),
                first_arg: call.args.first().cloned(),
            });
        }
        visit::visit_expr_call(self, call);
    }

    fn visit_expr_method_call(&mut self, call: &'ast syn::ExprMethodCall) {
        if self.is_entry_point(&call.method) {
            self.found.calls.push(EntryCall {
                start: call.span().start(),
                name_start: call.method.span().start(),
                first_arg: call.args.first().cloned(),
            });
        }
        visit::visit_expr_method_call(self, call);
    }

    fn visit_item_fn(&mut self, item: &'ast ItemFn) {
        self.found.fns.push(item.clone());
        visit::visit_item_fn(self, item);
    }

    fn visit_expr_closure(&mut self, closure: &'ast ExprClosure) {
        self.found.closures.push(closure.clone());
        visit::visit_expr_closure(self, closure);
    }

    // Steps are often built inside `vec![..]` and similar macros.
    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        if let Ok(exprs) = mac.parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated) {
            for expr in &exprs {
                self.visit_expr(expr);
            }
        }
        visit::visit_macro(self, mac);
    }
}

fn collect(source: &ParsedSource, config: &SynthConfig) -> Candidates {
    let mut collector = CandidateCollector {
        entry_points: &config.entry_points,
        found: Candidates::default(),
    };
    collector.visit_file(&source.file);
    collector.found
}

/// The node the extractor settled on.
enum Target<'a> {
    Item(&'a ItemFn),
    Closure(&'a ExprClosure),
}

/// Locate and cut out the function a step was built from.
pub fn extract_function(
    source: &ParsedSource,
    location: &SourceLocation,
    callable: &CallableReference,
    config: &SynthConfig,
) -> Result<ExtractedFunction> {
    let candidates = collect(source, config);
    let line = location.line as usize;

    let target = precise_pass(&candidates, location, callable, config)
        .or_else(|| {
            tracing::debug!(
                file = %source.path.display(),
                line = line,
                "No entry-point call matched, trying fallback search"
            );
            fallback_pass(&candidates, line, callable, config)
        })
        .ok_or_else(|| SynthError::NodeNotFound {
            file: source.path.clone(),
            line: location.line,
            name: callable.declared_name.clone(),
        })?;

    let extracted = build_extracted(source, target)?;
    extracted.parse_node()?;
    Ok(extracted)
}

fn line_distance(a: usize, b: usize) -> usize {
    a.abs_diff(b)
}

fn precise_pass<'a>(
    candidates: &'a Candidates,
    location: &SourceLocation,
    callable: &CallableReference,
    config: &SynthConfig,
) -> Option<Target<'a>> {
    let line = location.line as usize;
    let window = config.precise_window as usize;

    // Registered columns are 1-based, span columns 0-based.
    let column_distance = |call: &EntryCall| -> usize {
        let Some(column) = location.column else {
            return 0;
        };
        let column = column as usize;
        let at = |position: LineColumn| {
            if position.line == line {
                (position.column + 1).abs_diff(column)
            } else {
                usize::MAX
            }
        };
        at(call.start).min(at(call.name_start))
    };

    let call = candidates
        .calls
        .iter()
        .filter(|call| line_distance(call.start.line, line) <= window)
        .min_by_key(|call| (column_distance(call), line_distance(call.start.line, line)))?;

    match strip_wrappers(call.first_arg.as_ref()?) {
        Expr::Closure(closure) => candidates
            .closures
            .iter()
            .find(|c| c.span().start() == closure.span().start())
            .map(Target::Closure),
        Expr::Path(path) => {
            let ident = &path.path.segments.last()?.ident;
            if let Some(declared) = &callable.declared_name
                && ident != declared
            {
                tracing::debug!(
                    argument = %ident,
                    declared = %declared,
                    "Entry-point argument differs from declared name"
                );
            }
            candidates
                .fns
                .iter()
                .filter(|item| &item.sig.ident == ident)
                .min_by_key(|item| line_distance(item.span().start().line, line))
                .map(Target::Item)
        }
        _ => None,
    }
}

fn strip_wrappers(expr: &Expr) -> &Expr {
    match expr {
        Expr::Paren(inner) => strip_wrappers(&inner.expr),
        Expr::Group(inner) => strip_wrappers(&inner.expr),
        Expr::Reference(inner) => strip_wrappers(&inner.expr),
        other => other,
    }
}

fn fallback_pass<'a>(
    candidates: &'a Candidates,
    line: usize,
    callable: &CallableReference,
    config: &SynthConfig,
) -> Option<Target<'a>> {
    let window = config.fallback_window as usize;
    let within = |start: usize| line_distance(start, line) <= window;

    if let Some(name) = &callable.declared_name {
        return candidates
            .fns
            .iter()
            .filter(|item| item.sig.ident == name && within(item.span().start().line))
            .min_by_key(|item| line_distance(item.span().start().line, line))
            .map(Target::Item);
    }

    let closure = candidates
        .closures
        .iter()
        .map(|c| (line_distance(c.span().start().line, line), c))
        .filter(|(distance, _)| *distance <= window)
        .min_by_key(|(distance, _)| *distance);
    let item = candidates
        .fns
        .iter()
        .map(|f| (line_distance(f.span().start().line, line), f))
        .filter(|(distance, _)| *distance <= window)
        .min_by_key(|(distance, _)| *distance);

    match (closure, item) {
        (Some((c, closure)), Some((f, item))) => {
            if c <= f {
                Some(Target::Closure(closure))
            } else {
                Some(Target::Item(item))
            }
        }
        (Some((_, closure)), None) => Some(Target::Closure(closure)),
        (None, Some((_, item))) => Some(Target::Item(item)),
        (None, None) => None,
    }
}

fn build_extracted(source: &ParsedSource, target: Target<'_>) -> Result<ExtractedFunction> {
    let (tokens, shape, params, declared_name) = match target {
        Target::Item(item) => {
            check_item(item)?;
            let ident = item.sig.ident.to_string();
            let params = item
                .sig
                .inputs
                .iter()
                .map(|input| match input {
                    FnArg::Typed(typed) => Ok(Param {
                        name: typed.pat.to_token_stream().to_string(),
                        ty: Some(typed.ty.to_token_stream().to_string()),
                    }),
                    FnArg::Receiver(_) => Err(SynthError::UnsupportedFunction {
                        function: ident.clone(),
                        reason: "methods taking `self` cannot run standalone".to_string(),
                    }),
                })
                .collect::<Result<Vec<_>>>()?;
            (
                item.to_token_stream(),
                FunctionShape::Item {
                    ident: ident.clone(),
                },
                params,
                Some(ident),
            )
        }
        Target::Closure(closure) => {
            if closure.asyncness.is_some() {
                return Err(SynthError::UnsupportedFunction {
                    function: "<closure>".to_string(),
                    reason: "async closures are not supported".to_string(),
                });
            }
            let params = closure.inputs.iter().map(closure_param).collect();
            (closure.to_token_stream(), FunctionShape::Closure, params, None)
        }
    };

    let (text, start, end) =
        source
            .slice_tokens(tokens)
            .ok_or_else(|| SynthError::Parse {
                path: source.path.clone(),
                message: "could not map function span back to source text".to_string(),
            })?;

    Ok(ExtractedFunction {
        source_text: text.to_string(),
        file: source.path.clone(),
        declared_name,
        start_line: start.line,
        end_line: end.line,
        shape,
        params,
    })
}

fn check_item(item: &ItemFn) -> Result<()> {
    let function = item.sig.ident.to_string();
    let unsupported = |reason: &str| {
        Err(SynthError::UnsupportedFunction {
            function: function.clone(),
            reason: reason.to_string(),
        })
    };
    if item.sig.asyncness.is_some() {
        return unsupported("async functions are not supported");
    }
    if item.sig.generics.type_params().next().is_some()
        || item.sig.generics.const_params().next().is_some()
    {
        return unsupported("generic functions cannot be called without type arguments");
    }
    if item.sig.ident == "main" {
        return unsupported("`main` would clash with the script's own entry point");
    }
    Ok(())
}

fn closure_param(pat: &Pat) -> Param {
    match pat {
        Pat::Type(typed) => Param {
            name: typed.pat.to_token_stream().to_string(),
            ty: Some(typed.ty.to_token_stream().to_string()),
        },
        other => Param {
            name: other.to_token_stream().to_string(),
            ty: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const PIPELINE: &str = r#"use pipeforge_dsl::{ArgumentValue, PipelineStep};

/// Fails when the value is above the threshold.
fn check_threshold(data: &str, threshold: i64) {
    // parse first
    let value: i64 = data.parse().unwrap();
    if value > threshold {
        panic!("Value {} exceeds threshold {}", value, threshold);
    }
}

fn helper() -> u32 {
    7
}

pub fn build() -> Vec<PipelineStep> {
    let check = PipelineStep::run_fn(
        check_threshold,
        vec![ArgumentValue::literal("100"), ArgumentValue::literal(50)],
    );
    let hello = PipelineStep::run_fn(|| {
        println!("Hello, world!");
    }, vec![]);
    let pair = vec![PipelineStep::run_fn(|name: &str| println!("hi {}", name), vec![]), PipelineStep::run_fn(|| helper(), vec![])];
    vec![check, hello]
}
"#;

    fn source() -> ParsedSource {
        ParsedSource::parse(Path::new("pipeline.rs"), PIPELINE.to_string()).unwrap()
    }

    fn line_of(needle: &str) -> u32 {
        PIPELINE
            .lines()
            .position(|l| l.contains(needle))
            .map(|i| i as u32 + 1)
            .unwrap()
    }

    fn column_of(needle: &str, after: &str) -> u32 {
        let line = PIPELINE.lines().find(|l| l.contains(needle)).unwrap();
        let offset = line.find(needle).unwrap();
        let after_offset = line[offset..].find(after).unwrap();
        (line[..offset + after_offset].chars().count() + 1) as u32
    }

    #[test]
    fn test_precise_pass_resolves_named_fn() {
        let location = SourceLocation::new("pipeline.rs", line_of("let check = "));
        let extracted = extract_function(
            &source(),
            &location,
            &CallableReference::named("check_threshold"),
            &SynthConfig::default(),
        )
        .unwrap();

        assert_eq!(
            extracted.shape,
            FunctionShape::Item {
                ident: "check_threshold".to_string()
            }
        );
        assert!(extracted.source_text.starts_with("/// Fails when"));
        assert!(extracted.source_text.contains("// parse first"));
        assert!(extracted.source_text.ends_with('}'));
        assert_eq!(extracted.start_line, 3);
        assert_eq!(extracted.end_line, 10);
        assert_eq!(
            extracted.params,
            vec![
                Param {
                    name: "data".to_string(),
                    ty: Some("& str".to_string())
                },
                Param {
                    name: "threshold".to_string(),
                    ty: Some("i64".to_string())
                },
            ]
        );
    }

    #[test]
    fn test_precise_pass_takes_inline_closure() {
        let location = SourceLocation::new("pipeline.rs", line_of("let hello = "));
        let extracted = extract_function(
            &source(),
            &location,
            &CallableReference::anonymous(),
            &SynthConfig::default(),
        )
        .unwrap();
        assert_eq!(extracted.shape, FunctionShape::Closure);
        assert!(extracted.source_text.starts_with("|| {"));
        assert!(extracted.source_text.contains("Hello, world!"));
        assert!(extracted.params.is_empty());
        assert!(matches!(extracted.parse_node().unwrap(), FunctionNode::Closure(_)));
    }

    #[test]
    fn test_column_breaks_ties_on_one_line() {
        let line = line_of("let pair = ");
        let second = column_of("PipelineStep::run_fn(|| helper()", "run_fn");
        let location = SourceLocation::new("pipeline.rs", line).with_column(second);
        let extracted = extract_function(
            &source(),
            &location,
            &CallableReference::anonymous(),
            &SynthConfig::default(),
        )
        .unwrap();
        assert_eq!(extracted.source_text, "|| helper()");

        let first = column_of("PipelineStep::run_fn(|name", "PipelineStep");
        let location = SourceLocation::new("pipeline.rs", line).with_column(first);
        let extracted = extract_function(
            &source(),
            &location,
            &CallableReference::anonymous(),
            &SynthConfig::default(),
        )
        .unwrap();
        assert_eq!(extracted.source_text, "|name: &str| println!(\"hi {}\", name)");
        assert_eq!(extracted.params[0].ty.as_deref(), Some("& str"));
    }

    #[test]
    fn test_fallback_finds_named_fn_without_call() {
        // line 13 is inside `helper`, no entry-point call nearby with a small window
        let config = SynthConfig {
            precise_window: 0,
            ..SynthConfig::default()
        };
        let location = SourceLocation::new("pipeline.rs", 13);
        let extracted =
            extract_function(&source(), &location, &CallableReference::named("helper"), &config)
                .unwrap();
        assert_eq!(extracted.declared_name.as_deref(), Some("helper"));
        assert_eq!(extracted.source_text, "fn helper() -> u32 {\n    7\n}");
    }

    #[test]
    fn test_unknown_name_is_node_not_found() {
        let location = SourceLocation::new("pipeline.rs", 1);
        let config = SynthConfig {
            precise_window: 0,
            ..SynthConfig::default()
        };
        let err =
            extract_function(&source(), &location, &CallableReference::named("missing"), &config)
                .unwrap_err();
        assert!(matches!(err, SynthError::NodeNotFound { .. }));
    }

    #[test]
    fn test_unsupported_functions() {
        let text = "async fn fetch() {}\nfn generic<T>(t: T) {}\nfn main() {}\n";
        let source = ParsedSource::parse(Path::new("x.rs"), text.to_string()).unwrap();
        let config = SynthConfig {
            precise_window: 0,
            ..SynthConfig::default()
        };
        for (line, name) in [(1, "fetch"), (2, "generic"), (3, "main")] {
            let err = extract_function(
                &source,
                &SourceLocation::new("x.rs", line),
                &CallableReference::named(name),
                &config,
            )
            .unwrap_err();
            assert!(
                matches!(err, SynthError::UnsupportedFunction { .. }),
                "{}: {}",
                name,
                err
            );
        }
    }
}
