// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow and function validation.
//!
//! Two checks run before any script is generated:
//! - Graph validation: job and step ids are unique and user environment
//!   variables do not collide with the names reserved for deferred arguments
//! - Self-containment: a function body may only refer to names it defines
//!   itself, the standard prelude, and external crates by path

use pipeforge_dsl::Workflow;
use std::collections::{BTreeSet, HashSet};
use syn::punctuated::Punctuated;
use syn::visit::{self, Visit};
use syn::{Expr, Token, UseTree};

use crate::dependency_analysis::{PRIMITIVES, STD_CRATES};
use crate::error::{Result, SynthError};
use crate::extract::FunctionNode;
use crate::marshal::ARG_ENV_PREFIX;

// ============================================================================
// Validation Result Types
// ============================================================================

/// Result of workflow validation containing errors and warnings.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Hard errors that prevent synthesis.
    pub errors: Vec<ValidationError>,
    /// Soft warnings that indicate potential issues.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are allowed).
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns true if there are any warnings.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Convert into a synthesis error when there are errors.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>> {
        if self.errors.is_empty() {
            return Ok(self.warnings);
        }
        let lines: Vec<String> = self.errors.iter().map(|e| format!("  {}", e)).collect();
        Err(SynthError::InvalidGraph(lines.join("\n")))
    }
}

/// Errors that prevent synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)] // Fields are self-documenting from variant docs
pub enum ValidationError {
    /// Two jobs share an id.
    DuplicateJobId { job_id: String },
    /// Two steps of one job share an id.
    DuplicateStepId { job_id: String, step_id: String },
    /// A step sets an environment variable reserved for deferred arguments.
    ReservedEnvName {
        job_id: String,
        step: String,
        name: String,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::DuplicateJobId { job_id } => {
                write!(f, "[E001] Job id '{}' is used more than once", job_id)
            }
            ValidationError::DuplicateStepId { job_id, step_id } => {
                write!(
                    f,
                    "[E002] Step id '{}' is used more than once in job '{}'",
                    step_id, job_id
                )
            }
            ValidationError::ReservedEnvName { job_id, step, name } => {
                write!(
                    f,
                    "[E003] Step '{}' in job '{}' sets '{}'; the {} prefix is reserved for function arguments",
                    step, job_id, name, ARG_ENV_PREFIX
                )
            }
        }
    }
}

/// Warnings that don't prevent synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ValidationWarning {
    /// Job has no steps.
    EmptyJob { job_id: String },
    /// Function step without an id; the synthesized step gets none either.
    UnnamedFunctionStep { job_id: String, index: usize },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::EmptyJob { job_id } => {
                write!(f, "[W001] Job '{}' has no steps", job_id)
            }
            ValidationWarning::UnnamedFunctionStep { job_id, index } => {
                write!(
                    f,
                    "[W002] Function step #{} in job '{}' has no id",
                    index, job_id
                )
            }
        }
    }
}

// ============================================================================
// Graph Validation
// ============================================================================

/// Validate job/step structure before synthesis.
pub fn validate_workflow(workflow: &Workflow) -> ValidationResult {
    let mut result = ValidationResult::default();
    let mut job_ids = HashSet::new();

    for job in &workflow.jobs {
        if !job_ids.insert(job.id.as_str()) {
            result.errors.push(ValidationError::DuplicateJobId {
                job_id: job.id.clone(),
            });
        }
        if job.steps().is_empty() {
            result.warnings.push(ValidationWarning::EmptyJob {
                job_id: job.id.clone(),
            });
        }

        let mut step_ids = HashSet::new();
        for (index, step) in job.steps().iter().enumerate() {
            if let Some(id) = &step.id
                && !step_ids.insert(id.as_str())
            {
                result.errors.push(ValidationError::DuplicateStepId {
                    job_id: job.id.clone(),
                    step_id: id.clone(),
                });
            }
            if step.is_function() && step.id.is_none() && step.name.is_none() {
                result.warnings.push(ValidationWarning::UnnamedFunctionStep {
                    job_id: job.id.clone(),
                    index,
                });
            }
            for name in step.env.keys() {
                if name.starts_with(ARG_ENV_PREFIX) {
                    result.errors.push(ValidationError::ReservedEnvName {
                        job_id: job.id.clone(),
                        step: step.label(index),
                        name: name.clone(),
                    });
                }
            }
        }
    }

    result
}

// ============================================================================
// Self-Containment
// ============================================================================

/// Names usable without an import.
const PRELUDE: [&str; 40] = [
    "Some", "None", "Ok", "Err", "Option", "Result", "Vec", "String", "Box", "ToString",
    "ToOwned", "Clone", "Copy", "Default", "Drop", "Eq", "PartialEq", "Ord", "PartialOrd",
    "Iterator", "IntoIterator", "Extend", "FromIterator", "DoubleEndedIterator",
    "ExactSizeIterator", "Fn", "FnMut", "FnOnce", "From", "Into", "TryFrom", "TryInto", "AsRef",
    "AsMut", "Send", "Sync", "Sized", "Unpin", "drop", "Self",
];

/// Standard macros that are safe in a standalone script.
const STD_MACROS: [&str; 33] = [
    "println",
    "print",
    "eprintln",
    "eprint",
    "format",
    "format_args",
    "write",
    "writeln",
    "panic",
    "assert",
    "assert_eq",
    "assert_ne",
    "debug_assert",
    "debug_assert_eq",
    "debug_assert_ne",
    "vec",
    "matches",
    "todo",
    "unimplemented",
    "unreachable",
    "dbg",
    "env",
    "option_env",
    "concat",
    "stringify",
    "line",
    "column",
    "file",
    "module_path",
    "cfg",
    "compile_error",
    "thread_local",
    "debug_assert_matches",
];

/// Macros that read files relative to the original source.
const FILE_MACROS: [&str; 3] = ["include", "include_str", "include_bytes"];

#[derive(Debug)]
enum ReferenceKind {
    /// Single name or type-like root; fine if bound locally.
    Free,
    /// Root is a module of the enclosing file.
    FileModule,
    /// Always outside the function (`crate::`, `super::`, `include_str!`).
    Outside,
}

#[derive(Debug)]
struct Reference {
    root: String,
    display: String,
    kind: ReferenceKind,
}

struct ScopeScan<'a> {
    file_modules: &'a BTreeSet<String>,
    bound: HashSet<String>,
    references: Vec<Reference>,
    glob_import: bool,
}

impl ScopeScan<'_> {
    fn bind(&mut self, ident: &syn::Ident) {
        self.bound.insert(ident.to_string());
    }

    /// `thread_local! { static NAME: T = ..; }` declares `NAME`.
    fn bind_thread_locals(&mut self, tokens: proc_macro2::TokenStream) {
        let mut after_static = false;
        for token in tokens {
            if let proc_macro2::TokenTree::Ident(ident) = token {
                if after_static {
                    self.bind(&ident);
                }
                after_static = ident == "static";
            } else {
                after_static = false;
            }
        }
    }

    fn record(&mut self, root: String, display: String, kind: ReferenceKind) {
        self.references.push(Reference {
            root,
            display,
            kind,
        });
    }

    fn check_path(&mut self, path: &syn::Path) {
        if path.leading_colon.is_some() {
            return;
        }
        let Some(first) = path.segments.first() else {
            return;
        };
        let root = first.ident.to_string();
        let display = path
            .segments
            .iter()
            .map(|s| s.ident.to_string())
            .collect::<Vec<_>>()
            .join("::");

        if matches!(root.as_str(), "crate" | "super" | "self") {
            // bare `self` is the method receiver
            if path.segments.len() > 1 || root != "self" {
                self.record(root, display, ReferenceKind::Outside);
            }
            return;
        }
        if self.file_modules.contains(&root) {
            self.record(root, display, ReferenceKind::FileModule);
            return;
        }
        if PRELUDE.contains(&root.as_str()) || PRIMITIVES.contains(&root.as_str()) {
            return;
        }
        let type_like = root.starts_with(|c: char| c.is_uppercase());
        if path.segments.len() == 1 || type_like {
            self.record(root.clone(), root, ReferenceKind::Free);
        }
    }
}

impl<'ast> Visit<'ast> for ScopeScan<'_> {
    fn visit_pat_ident(&mut self, pat: &'ast syn::PatIdent) {
        self.bind(&pat.ident);
        visit::visit_pat_ident(self, pat);
    }

    fn visit_item_fn(&mut self, item: &'ast syn::ItemFn) {
        self.bind(&item.sig.ident);
        visit::visit_item_fn(self, item);
    }

    fn visit_item_struct(&mut self, item: &'ast syn::ItemStruct) {
        self.bind(&item.ident);
        visit::visit_item_struct(self, item);
    }

    fn visit_item_enum(&mut self, item: &'ast syn::ItemEnum) {
        self.bind(&item.ident);
        visit::visit_item_enum(self, item);
    }

    fn visit_item_const(&mut self, item: &'ast syn::ItemConst) {
        self.bind(&item.ident);
        visit::visit_item_const(self, item);
    }

    fn visit_item_static(&mut self, item: &'ast syn::ItemStatic) {
        self.bind(&item.ident);
        visit::visit_item_static(self, item);
    }

    fn visit_item_type(&mut self, item: &'ast syn::ItemType) {
        self.bind(&item.ident);
        visit::visit_item_type(self, item);
    }

    fn visit_item_trait(&mut self, item: &'ast syn::ItemTrait) {
        self.bind(&item.ident);
        visit::visit_item_trait(self, item);
    }

    fn visit_item_mod(&mut self, item: &'ast syn::ItemMod) {
        self.bind(&item.ident);
        visit::visit_item_mod(self, item);
    }

    fn visit_item_macro(&mut self, item: &'ast syn::ItemMacro) {
        if let Some(ident) = &item.ident {
            self.bind(ident);
        }
    }

    fn visit_generic_param(&mut self, param: &'ast syn::GenericParam) {
        match param {
            syn::GenericParam::Type(ty) => self.bind(&ty.ident),
            syn::GenericParam::Const(c) => self.bind(&c.ident),
            syn::GenericParam::Lifetime(_) => {}
        }
        visit::visit_generic_param(self, param);
    }

    fn visit_item_use(&mut self, item: &'ast syn::ItemUse) {
        if let UseTree::Path(path) = &item.tree {
            let root = path.ident.to_string();
            let display = quote::ToTokens::to_token_stream(&item.tree)
                .to_string()
                .replace(' ', "");
            if matches!(root.as_str(), "crate" | "super" | "self") {
                self.record(root, display, ReferenceKind::Outside);
            } else if self.file_modules.contains(&root) {
                self.record(root, display, ReferenceKind::FileModule);
            }
        }
        visit::visit_item_use(self, item);
    }

    fn visit_use_name(&mut self, name: &'ast syn::UseName) {
        self.bind(&name.ident);
    }

    fn visit_use_rename(&mut self, rename: &'ast syn::UseRename) {
        self.bind(&rename.rename);
    }

    fn visit_use_glob(&mut self, _glob: &'ast syn::UseGlob) {
        self.glob_import = true;
    }

    fn visit_path(&mut self, path: &'ast syn::Path) {
        self.check_path(path);
        visit::visit_path(self, path);
    }

    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        if let Some(ident) = mac.path.get_ident() {
            let name = ident.to_string();
            if FILE_MACROS.contains(&name.as_str()) {
                self.record(name.clone(), format!("{}!", name), ReferenceKind::Outside);
            } else if !STD_MACROS.contains(&name.as_str()) {
                self.record(name.clone(), format!("{}!", name), ReferenceKind::Free);
            }
        } else {
            self.visit_path(&mac.path);
        }
        if mac.path.is_ident("thread_local") {
            self.bind_thread_locals(mac.tokens.clone());
        }
        if let Ok(exprs) = mac.parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated) {
            for expr in &exprs {
                self.visit_expr(expr);
            }
        }
    }

    fn visit_attribute(&mut self, _attr: &'ast syn::Attribute) {}

    fn visit_visibility(&mut self, _vis: &'ast syn::Visibility) {}
}

/// Reject functions that refer to names defined outside their own body.
///
/// `file_modules` are the modules declared by the file the function came
/// from; paths into them are rejected even though they look like crates.
/// A glob import inside the body disables the check for plain names.
pub fn check_self_contained(
    node: &FunctionNode,
    function: &str,
    file_modules: &BTreeSet<String>,
) -> Result<()> {
    let mut scan = ScopeScan {
        file_modules,
        bound: HashSet::new(),
        references: Vec::new(),
        glob_import: false,
    };
    match node {
        FunctionNode::Item(item) => scan.visit_item_fn(item),
        FunctionNode::Closure(closure) => scan.visit_expr_closure(closure),
    }

    let mut seen = HashSet::new();
    let identifiers: Vec<String> = scan
        .references
        .iter()
        .filter(|reference| match reference.kind {
            ReferenceKind::Outside => true,
            ReferenceKind::FileModule => !scan.bound.contains(&reference.root),
            ReferenceKind::Free => {
                !scan.glob_import
                    && !scan.bound.contains(&reference.root)
                    && !STD_CRATES.contains(&reference.root.as_str())
            }
        })
        .map(|reference| reference.display.clone())
        .filter(|display| seen.insert(display.clone()))
        .collect();

    if identifiers.is_empty() {
        Ok(())
    } else {
        Err(SynthError::NotSelfContained {
            function: function.to_string(),
            identifiers,
        })
    }
}
