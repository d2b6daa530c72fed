// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dependency analysis for extracted functions.
//!
//! Finds the external crates a function body refers to, so the bundler can
//! resolve them against the author's manifest. A crate reference is:
//!
//! - a path with a leading `::` (`::regex::Regex`)
//! - a path of two or more segments whose first segment is lowercase and not
//!   a standard crate, a path keyword, a primitive or a locally bound name
//! - the root of a `use` tree, or an `extern crate`
//!
//! Macro bodies are analyzed when they parse as comma-separated expressions.

use std::collections::{BTreeSet, HashSet};
use syn::punctuated::Punctuated;
use syn::visit::{self, Visit};
use syn::{Expr, Token, UseTree};

use crate::extract::FunctionNode;

/// Crates every script can use without a manifest entry.
pub const STD_CRATES: [&str; 4] = ["std", "core", "alloc", "proc_macro"];

/// Path roots that never name a crate.
pub const PATH_KEYWORDS: [&str; 4] = ["crate", "self", "super", "Self"];

/// Primitive types (`u8::MAX`, `str::from_utf8`).
pub const PRIMITIVES: [&str; 17] = [
    "bool", "char", "str", "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64",
    "u128", "usize", "f32", "f64",
];

/// External crates referenced by `node`, sorted.
pub fn referenced_crates(node: &FunctionNode) -> BTreeSet<String> {
    let mut bindings = LocalNames::default();
    let mut collector = CrateCollector::default();
    match node {
        FunctionNode::Item(item) => {
            bindings.visit_item_fn(item);
            collector.visit_item_fn(item);
        }
        FunctionNode::Closure(closure) => {
            bindings.visit_expr_closure(closure);
            collector.visit_expr_closure(closure);
        }
    }
    let mut crates: BTreeSet<String> = collector
        .roots
        .into_iter()
        .filter(|root| !bindings.modules.contains(root) && !bindings.imports.contains(root))
        .collect();
    crates.extend(
        collector
            .use_roots
            .into_iter()
            .filter(|root| !bindings.modules.contains(root)),
    );
    crates
}

fn is_crate_root(name: &str) -> bool {
    !STD_CRATES.contains(&name)
        && !PATH_KEYWORDS.contains(&name)
        && !PRIMITIVES.contains(&name)
        && name.starts_with(|c: char| c.is_ascii_lowercase() || c == '_')
}

/// Names a body declares itself: `mod` items and `use` renames/imports.
#[derive(Default)]
struct LocalNames {
    modules: HashSet<String>,
    imports: HashSet<String>,
}

impl<'ast> Visit<'ast> for LocalNames {
    fn visit_item_mod(&mut self, module: &'ast syn::ItemMod) {
        self.modules.insert(module.ident.to_string());
        visit::visit_item_mod(self, module);
    }

    fn visit_use_name(&mut self, name: &'ast syn::UseName) {
        if name.ident != "self" {
            self.imports.insert(name.ident.to_string());
        }
    }

    fn visit_use_rename(&mut self, rename: &'ast syn::UseRename) {
        self.imports.insert(rename.rename.to_string());
    }
}

#[derive(Default)]
struct CrateCollector {
    roots: BTreeSet<String>,
    // `use rand;` both binds and references `rand`
    use_roots: BTreeSet<String>,
}

impl<'ast> Visit<'ast> for CrateCollector {
    fn visit_path(&mut self, path: &'ast syn::Path) {
        if let Some(first) = path.segments.first() {
            let name = first.ident.to_string();
            let qualifies = path.leading_colon.is_some() || path.segments.len() >= 2;
            if qualifies && is_crate_root(&name) {
                self.roots.insert(name);
            }
        }
        visit::visit_path(self, path);
    }

    fn visit_item_use(&mut self, item: &'ast syn::ItemUse) {
        if let Some(root) = use_root(&item.tree)
            && is_crate_root(&root)
        {
            self.use_roots.insert(root);
        }
    }

    fn visit_item_extern_crate(&mut self, item: &'ast syn::ItemExternCrate) {
        let name = item.ident.to_string();
        if is_crate_root(&name) {
            self.use_roots.insert(name);
        }
    }

    fn visit_macro(&mut self, mac: &'ast syn::Macro) {
        if let Ok(exprs) = mac.parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated) {
            for expr in &exprs {
                self.visit_expr(expr);
            }
        }
        visit::visit_macro(self, mac);
    }

    // Only derive paths pull in crates; other attributes are inert here.
    fn visit_attribute(&mut self, attr: &'ast syn::Attribute) {
        if attr.path().is_ident("derive")
            && let Ok(paths) =
                attr.parse_args_with(Punctuated::<syn::Path, Token![,]>::parse_terminated)
        {
            for path in &paths {
                self.visit_path(path);
            }
        }
    }
}

fn use_root(tree: &UseTree) -> Option<String> {
    match tree {
        UseTree::Path(path) => Some(path.ident.to_string()),
        UseTree::Name(name) => Some(name.ident.to_string()),
        UseTree::Rename(rename) => Some(rename.ident.to_string()),
        UseTree::Glob(_) => None,
        // `use {a::b, c::d};` is rare enough to take the first branch only
        UseTree::Group(group) => group.items.first().and_then(use_root),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crates_of_fn(text: &str) -> Vec<String> {
        let item: syn::ItemFn = syn::parse_str(text).unwrap();
        referenced_crates(&FunctionNode::Item(item))
            .into_iter()
            .collect()
    }

    #[test]
    fn test_std_only_function_has_no_crates() {
        let crates = crates_of_fn(
            r#"fn pure(data: &str) -> usize {
                let map: std::collections::HashMap<String, u8> = Default::default();
                let max = u8::MAX as usize;
                println!("{}", core::cmp::max(map.len(), max));
                data.len()
            }"#,
        );
        assert!(crates.is_empty(), "{:?}", crates);
    }

    #[test]
    fn test_paths_uses_and_macros() {
        let crates = crates_of_fn(
            r#"fn fancy() {
                use chrono::Utc;
                use itertools;
                let re = ::regex::Regex::new("a+").unwrap();
                let value = serde_json::json!({ "now": Utc::now().to_rfc3339() });
                println!("{} {}", re.is_match("aa"), semver::Version::parse("1.0.0").unwrap());
                let _ = value;
            }"#,
        );
        assert_eq!(crates, vec!["chrono", "itertools", "regex", "semver", "serde_json"]);
    }

    #[test]
    fn test_local_modules_and_renames_are_not_crates() {
        let crates = crates_of_fn(
            r#"fn local() {
                mod helpers { pub fn one() -> u8 { 1 } }
                use std::fmt as f;
                let _ = helpers::one();
                let _: Option<&dyn f::Debug> = None;
            }"#,
        );
        assert!(crates.is_empty(), "{:?}", crates);
    }

    #[test]
    fn test_closure_body_and_derives() {
        let closure: syn::ExprClosure = syn::parse_str(
            r#"|| {
                #[derive(serde::Serialize)]
                struct Row { id: u32 }
                let _ = rand::random::<u8>();
            }"#,
        )
        .unwrap();
        let crates: Vec<_> = referenced_crates(&FunctionNode::Closure(closure))
            .into_iter()
            .collect();
        assert_eq!(crates, vec!["rand", "serde"]);
    }
}
