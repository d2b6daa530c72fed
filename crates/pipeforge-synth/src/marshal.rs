// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Argument marshaling.
//!
//! Turns a step's positional arguments into the expressions the script passes
//! to the entry function:
//!
//! - Literals are written into the script, shaped by the declared parameter
//!   type (`"100"` for `&str`, `50` for integers, `String::from(..)` for
//!   `String`, and a `FromStr` parse for anything else).
//! - Deferred arguments are read from `PIPEFORGE_ARG_<index>` at run time,
//!   falling back to a constant holding the raw expression text. The step's
//!   environment maps that variable to the expression so the pipeline engine
//!   fills it in.

use pipeforge_dsl::{ArgumentValue, Scalar};
use proc_macro2::{Literal, TokenStream};
use quote::quote;
use std::collections::BTreeMap;
use syn::Type;

use crate::codegen::context::EmitContext;
use crate::error::{Result, SynthError};
use crate::extract::ExtractedFunction;

/// Prefix of the environment variables carrying deferred arguments.
pub const ARG_ENV_PREFIX: &str = "PIPEFORGE_ARG_";

const INTEGERS: [&str; 12] = [
    "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64", "u128", "usize",
];

/// One deferred argument's environment binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvBinding {
    /// Argument position.
    pub index: usize,
    /// Environment variable name.
    pub name: String,
    /// Raw pipeline expression.
    pub expression: String,
}

/// What the script does with a parameter, judged from its declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    /// `&str`
    Str,
    /// `String`
    OwnedString,
    /// `&String`
    StringRef,
    /// `bool`
    Bool,
    /// Integer primitive.
    Integer(Type),
    /// `f32` / `f64`
    Float(Type),
    /// Anything else, parsed with `FromStr`; `by_ref` for `&T` parameters.
    Parsed {
        /// Target type (without the reference)
        ty: Type,
        /// Pass a reference to the parsed value
        by_ref: bool,
    },
    /// No annotation (closure parameter).
    Inferred,
}

impl ParamKind {
    /// Classify a declared type.
    pub fn classify(ty: Option<&str>) -> Self {
        let Some(ty) = ty else {
            return ParamKind::Inferred;
        };
        match syn::parse_str::<Type>(ty) {
            Ok(Type::Reference(reference)) => match path_name(&reference.elem).as_deref() {
                Some("str") => ParamKind::Str,
                Some("String") => ParamKind::StringRef,
                _ => ParamKind::Parsed {
                    ty: (*reference.elem).clone(),
                    by_ref: true,
                },
            },
            Ok(parsed) => match path_name(&parsed).as_deref() {
                Some("String") => ParamKind::OwnedString,
                Some("bool") => ParamKind::Bool,
                Some(name) if INTEGERS.contains(&name) => ParamKind::Integer(parsed),
                Some("f32" | "f64") => ParamKind::Float(parsed),
                _ => ParamKind::Parsed {
                    ty: parsed,
                    by_ref: false,
                },
            },
            Err(_) => ParamKind::Inferred,
        }
    }
}

fn path_name(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(path) if path.qself.is_none() => {
            path.path.get_ident().map(|ident| ident.to_string())
        }
        Type::Paren(inner) => path_name(&inner.elem),
        Type::Group(inner) => path_name(&inner.elem),
        _ => None,
    }
}

/// Arguments ready to be emitted.
#[derive(Debug, Clone)]
pub struct MarshaledCall {
    /// One binding per deferred argument, in positional order.
    pub bindings: Vec<EnvBinding>,
    /// Default constants (crate-level items).
    pub declarations: TokenStream,
    /// Environment reads (statements at the start of `main`).
    pub reads: TokenStream,
    /// One expression per parameter.
    pub call_args: Vec<TokenStream>,
}

impl MarshaledCall {
    /// Environment entries the synthesized step must carry.
    pub fn env(&self) -> BTreeMap<String, String> {
        self.bindings
            .iter()
            .map(|binding| (binding.name.clone(), binding.expression.clone()))
            .collect()
    }
}

/// Marshal `args` for `function`.
pub fn marshal_arguments(
    function: &ExtractedFunction,
    args: &[ArgumentValue],
    ctx: &EmitContext,
) -> Result<MarshaledCall> {
    if function.params.len() != args.len() {
        return Err(SynthError::ArityMismatch {
            function: function.display_name(),
            expected: function.params.len(),
            given: args.len(),
        });
    }

    let mut call = MarshaledCall {
        bindings: Vec::new(),
        declarations: TokenStream::new(),
        reads: TokenStream::new(),
        call_args: Vec::with_capacity(args.len()),
    };

    for (index, (param, arg)) in function.params.iter().zip(args).enumerate() {
        let kind = ParamKind::classify(param.ty.as_deref());
        let expr = match arg {
            ArgumentValue::Literal(scalar) => literal_expr(&kind, scalar, index, ctx)
                .map_err(|reason| SynthError::InvalidArgument {
                    function: function.display_name(),
                    index,
                    reason,
                })?,
            ArgumentValue::Deferred(expression) => {
                let name = EmitContext::env_name(index);
                let default = ctx.default_const(index);
                let var = ctx.arg_var(index);
                let text = Literal::string(expression);

                call.declarations.extend(quote! {
                    const #default: &str = #text;
                });
                call.reads.extend(quote! {
                    let #var: String = std::env::var(#name)
                        .unwrap_or_else(|_| #default.to_owned());
                });
                call.bindings.push(EnvBinding {
                    index,
                    name,
                    expression: expression.clone(),
                });
                deferred_expr(&kind, index, ctx)
            }
        };
        call.call_args.push(expr);
    }

    Ok(call)
}

fn parse_call(ty: &Type, index: usize, text: TokenStream, ctx: &EmitContext) -> TokenStream {
    let parse_fn = &ctx.parse_fn;
    quote! { #parse_fn::<#ty>(#index, #text) }
}

/// Literal argument expression; `Err` carries why the literal does not fit.
fn literal_expr(
    kind: &ParamKind,
    scalar: &Scalar,
    index: usize,
    ctx: &EmitContext,
) -> std::result::Result<TokenStream, String> {
    let text = Literal::string(&scalar.as_text());
    let expr = match (kind, scalar) {
        (ParamKind::Str, _) => quote! { #text },
        (ParamKind::OwnedString, _) => quote! { String::from(#text) },
        (ParamKind::StringRef, _) => quote! { &String::from(#text) },
        (ParamKind::Bool, Scalar::Bool(value)) => quote! { #value },
        (ParamKind::Bool, _) => parse_call(&syn::parse_quote!(bool), index, quote! { #text }, ctx),
        (ParamKind::Integer(ty), _) => {
            let literal = checked_integer(ty, scalar)?;
            quote! { #literal }
        }
        (ParamKind::Float(_), Scalar::Number(n)) if n.as_f64().is_some() => {
            let literal = Literal::f64_unsuffixed(n.as_f64().unwrap_or_default());
            quote! { #literal }
        }
        (ParamKind::Float(ty), _) => parse_call(ty, index, quote! { #text }, ctx),
        (ParamKind::Parsed { ty, by_ref }, _) => {
            let parsed = parse_call(ty, index, quote! { #text }, ctx);
            if *by_ref {
                quote! { &#parsed }
            } else {
                parsed
            }
        }
        (ParamKind::Inferred, Scalar::String(_)) => quote! { #text },
        (ParamKind::Inferred, Scalar::Bool(value)) => quote! { #value },
        (ParamKind::Inferred, Scalar::Number(n)) => match integer_literal(n) {
            Some(literal) => quote! { #literal },
            None => {
                let literal = Literal::f64_unsuffixed(n.as_f64().unwrap_or_default());
                quote! { #literal }
            }
        },
    };
    Ok(expr)
}

/// An integer literal known to fit `ty`.
fn checked_integer(ty: &Type, scalar: &Scalar) -> std::result::Result<Literal, String> {
    let name = path_name(ty).unwrap_or_default();
    let value: i128 = match scalar {
        Scalar::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(value), _) => value.into(),
            (None, Some(value)) => value.into(),
            (None, None) => return Err(format!("{} is not an integer", n)),
        },
        Scalar::String(text) => text
            .trim()
            .parse()
            .map_err(|_| format!("{:?} is not an integer", text))?,
        Scalar::Bool(value) => return Err(format!("`{}` is not an integer", value)),
    };
    let fits = match name.as_str() {
        "i8" => i8::try_from(value).is_ok(),
        "i16" => i16::try_from(value).is_ok(),
        "i32" => i32::try_from(value).is_ok(),
        "i64" => i64::try_from(value).is_ok(),
        "isize" => isize::try_from(value).is_ok(),
        "u8" => u8::try_from(value).is_ok(),
        "u16" => u16::try_from(value).is_ok(),
        "u32" => u32::try_from(value).is_ok(),
        "u64" => u64::try_from(value).is_ok(),
        "usize" => usize::try_from(value).is_ok(),
        "u128" => u128::try_from(value).is_ok(),
        _ => true,
    };
    if !fits {
        return Err(format!("{} is out of range for {}", value, name));
    }
    Ok(Literal::i128_unsuffixed(value))
}

fn integer_literal(n: &serde_json::Number) -> Option<Literal> {
    if let Some(value) = n.as_i64() {
        Some(Literal::i64_unsuffixed(value))
    } else {
        n.as_u64().map(Literal::u64_unsuffixed)
    }
}

fn deferred_expr(kind: &ParamKind, index: usize, ctx: &EmitContext) -> TokenStream {
    let var = ctx.arg_var(index);
    match kind {
        ParamKind::Str | ParamKind::StringRef => quote! { &#var },
        ParamKind::OwnedString => quote! { #var },
        ParamKind::Bool => parse_call(&syn::parse_quote!(bool), index, quote! { &#var }, ctx),
        ParamKind::Integer(ty) | ParamKind::Float(ty) => {
            parse_call(ty, index, quote! { &#var }, ctx)
        }
        ParamKind::Parsed { ty, by_ref } => {
            let parsed = parse_call(ty, index, quote! { &#var }, ctx);
            if *by_ref {
                quote! { &#parsed }
            } else {
                parsed
            }
        }
        ParamKind::Inferred => quote! { #var.as_str() },
    }
}
