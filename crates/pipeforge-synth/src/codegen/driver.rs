// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Script driver.
//!
//! Every synthesized script has the same shape regardless of bundling:
//!
//! ```text
//! #![allow(..)]
//! const PIPEFORGE_ARG_<i>_DEFAULT: &str = "..";   // deferred arguments
//! <function text>
//! <export binding __pipeforge_entry>
//! <support items: outcome trait, argument parser, panic hook>
//! fn main() { .. }
//! ```
//!
//! `main` installs a panic hook that prints the message and the user frames
//! as `function (file:line:col)`, calls the entry function under
//! `catch_unwind`, reports its return value and exits 0 on success, 1 on
//! failure.
//!
//! rust-script builds in release mode by default, where the captured
//! backtrace carries no symbols and only the panic location line prints.
//! Add `debug = 1` under `[profile.release]` in the embedded manifest to get
//! the user frames there too.

use proc_macro2::TokenStream;
use quote::{format_ident, quote};

use super::context::EmitContext;
use crate::extract::FunctionShape;
use crate::marshal::MarshaledCall;

/// Lints that generated code and verbatim user functions may trip.
const ALLOWED_LINTS: &str = "#![allow(dead_code, unused_imports, unused_variables, unused_mut)]";

/// Types whose values are printed with `Display` when returned.
const DISPLAY_OUTCOMES: [&str; 16] = [
    "bool", "char", "i8", "i16", "i32", "i64", "i128", "isize", "u8", "u16", "u32", "u64", "u128",
    "usize", "f32", "f64",
];

/// Binding that exposes the function under the entry name.
pub fn export_statement(ctx: &EmitContext, shape: &FunctionShape, function_text: &str) -> String {
    let entry = &ctx.entry;
    match shape {
        FunctionShape::Item { ident } => {
            let ident = format_ident!("{}", ident);
            quote! { use self::#ident as #entry; }.to_string()
        }
        FunctionShape::Closure => format!(
            "macro_rules! {entry} {{\n    () => {{\n{function_text}\n    }};\n}}"
        ),
    }
}

/// Items shared by every script.
///
/// The return value is reported in tiers picked by autoref method
/// resolution, so any return type compiles:
///
/// - `Result<T, E>` splits first; `Err` prints `Error: ..` (with `Display`,
///   else `Debug`) and exits 1.
/// - The success value is printed through `__PipeforgeOutcome` when it has
///   an impl (unit prints nothing, empty strings print nothing), else with
///   `Display`, else with `Debug`, else not at all.
pub fn support_items(ctx: &EmitContext) -> TokenStream {
    let outcome = &ctx.outcome_trait;
    let parse_fn = &ctx.parse_fn;
    let display_types = DISPLAY_OUTCOMES.iter().map(|t| format_ident!("{}", t));

    quote! {
        trait #outcome {
            fn __pipeforge_report(&self) -> i32;
        }

        impl #outcome for () {
            fn __pipeforge_report(&self) -> i32 {
                0
            }
        }

        impl #outcome for str {
            fn __pipeforge_report(&self) -> i32 {
                if !self.is_empty() {
                    println!("{}", self);
                }
                0
            }
        }

        impl #outcome for String {
            fn __pipeforge_report(&self) -> i32 {
                self.as_str().__pipeforge_report()
            }
        }

        impl<T: #outcome + ?Sized> #outcome for &T {
            fn __pipeforge_report(&self) -> i32 {
                <T as #outcome>::__pipeforge_report(*self)
            }
        }

        #(
            impl #outcome for #display_types {
                fn __pipeforge_report(&self) -> i32 {
                    println!("{}", self);
                    0
                }
            }
        )*

        impl<T: #outcome> #outcome for Option<T> {
            fn __pipeforge_report(&self) -> i32 {
                match self {
                    Some(value) => value.__pipeforge_report(),
                    None => 0,
                }
            }
        }

        struct __PipeforgeReturn<R>(R);

        trait __PipeforgeSplitDisplay {
            type Value;
            fn __pipeforge_split(&self) -> Result<&Self::Value, String>;
        }

        impl<T, E: std::fmt::Display> __PipeforgeSplitDisplay for &&__PipeforgeReturn<Result<T, E>> {
            type Value = T;
            fn __pipeforge_split(&self) -> Result<&T, String> {
                match &self.0 {
                    Ok(value) => Ok(value),
                    Err(err) => Err(err.to_string()),
                }
            }
        }

        trait __PipeforgeSplitDebug {
            type Value;
            fn __pipeforge_split(&self) -> Result<&Self::Value, String>;
        }

        impl<T, E: std::fmt::Debug> __PipeforgeSplitDebug for &__PipeforgeReturn<Result<T, E>> {
            type Value = T;
            fn __pipeforge_split(&self) -> Result<&T, String> {
                match &self.0 {
                    Ok(value) => Ok(value),
                    Err(err) => Err(format!("{:?}", err)),
                }
            }
        }

        trait __PipeforgeSplitPlain {
            type Value;
            fn __pipeforge_split(&self) -> Result<&Self::Value, String>;
        }

        impl<R> __PipeforgeSplitPlain for __PipeforgeReturn<R> {
            type Value = R;
            fn __pipeforge_split(&self) -> Result<&R, String> {
                Ok(&self.0)
            }
        }

        struct __PipeforgeValue<'a, T: ?Sized>(&'a T);

        trait __PipeforgeReportOutcome {
            fn __pipeforge_report_value(&self) -> i32;
        }

        impl<T: #outcome + ?Sized> __PipeforgeReportOutcome for &&&__PipeforgeValue<'_, T> {
            fn __pipeforge_report_value(&self) -> i32 {
                <T as #outcome>::__pipeforge_report(self.0)
            }
        }

        trait __PipeforgeReportDisplay {
            fn __pipeforge_report_value(&self) -> i32;
        }

        impl<T: std::fmt::Display + ?Sized> __PipeforgeReportDisplay for &&__PipeforgeValue<'_, T> {
            fn __pipeforge_report_value(&self) -> i32 {
                let text = self.0.to_string();
                if !text.is_empty() {
                    println!("{}", text);
                }
                0
            }
        }

        trait __PipeforgeReportDebug {
            fn __pipeforge_report_value(&self) -> i32;
        }

        impl<T: std::fmt::Debug + ?Sized> __PipeforgeReportDebug for &__PipeforgeValue<'_, T> {
            fn __pipeforge_report_value(&self) -> i32 {
                println!("{:?}", self.0);
                0
            }
        }

        trait __PipeforgeReportSilent {
            fn __pipeforge_report_value(&self) -> i32;
        }

        impl<T: ?Sized> __PipeforgeReportSilent for __PipeforgeValue<'_, T> {
            fn __pipeforge_report_value(&self) -> i32 {
                0
            }
        }

        fn #parse_fn<T>(index: usize, raw: &str) -> T
        where
            T: std::str::FromStr,
            <T as std::str::FromStr>::Err: std::fmt::Display,
        {
            match raw.trim().parse::<T>() {
                Ok(value) => value,
                Err(err) => {
                    eprintln!("Error: argument {} ({:?}) is invalid: {}", index, raw, err);
                    std::process::exit(1)
                }
            }
        }

        fn __pipeforge_frames(trace: &str) -> Vec<String> {
            let mut frames = Vec::new();
            let mut function: Option<String> = None;
            for line in trace.lines() {
                let line = line.trim();
                if let Some(location) = line.strip_prefix("at ") {
                    let Some(name) = function.take() else {
                        continue;
                    };
                    // `<T as Trait>::method` frames start with `<`
                    let bare = name.trim_start_matches('<');
                    let internal = location.starts_with("/rustc/")
                        || location.contains("/.cargo/registry/")
                        || bare.starts_with("std::")
                        || bare.starts_with("core::")
                        || bare.starts_with("alloc::")
                        || name.contains("__pipeforge")
                        || name.contains("__rust")
                        || name.ends_with("::main")
                        || name.contains("::main::{{closure}}");
                    if !internal {
                        frames.push(format!("{} ({})", name, location));
                    }
                } else if let Some((index, name)) = line.split_once(": ") {
                    if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
                        function = Some(name.to_string());
                    }
                }
            }
            frames
        }

        fn __pipeforge_install_panic_hook() {
            std::panic::set_hook(Box::new(|info| {
                let payload = info.payload();
                let message = if let Some(text) = payload.downcast_ref::<&str>() {
                    (*text).to_string()
                } else if let Some(text) = payload.downcast_ref::<String>() {
                    text.clone()
                } else {
                    String::from("panic with a non-string payload")
                };
                eprintln!("Error: {}", message);
                if let Some(location) = info.location() {
                    eprintln!(
                        "    at {}:{}:{}",
                        location.file(),
                        location.line(),
                        location.column()
                    );
                }
                let trace = std::backtrace::Backtrace::force_capture().to_string();
                for frame in __pipeforge_frames(&trace) {
                    eprintln!("    at {}", frame);
                }
            }));
        }
    }
}

/// The script's `main`.
pub fn main_fn(ctx: &EmitContext, shape: &FunctionShape, call: &MarshaledCall) -> TokenStream {
    let entry = &ctx.entry;
    let reads = &call.reads;
    let args = &call.call_args;

    let bind_entry = match shape {
        FunctionShape::Closure => quote! { let mut #entry = #entry!(); },
        FunctionShape::Item { .. } => quote! {},
    };

    quote! {
        fn main() {
            __pipeforge_install_panic_hook();
            #reads
            #bind_entry
            let __pipeforge_outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                #entry(#(#args),*)
            }));
            let __pipeforge_code = match __pipeforge_outcome {
                Ok(__pipeforge_value) => {
                    let __pipeforge_returned = __PipeforgeReturn(__pipeforge_value);
                    let __pipeforge_code = match (&&&__pipeforge_returned).__pipeforge_split() {
                        Ok(value) => (&&&&__PipeforgeValue(value)).__pipeforge_report_value(),
                        Err(message) => {
                            eprintln!("Error: {}", message);
                            1
                        }
                    };
                    __pipeforge_code
                }
                Err(_) => 1,
            };
            std::process::exit(__pipeforge_code);
        }
    }
}

/// Assemble the script body (everything after the runtime header).
pub fn entry_module(
    ctx: &EmitContext,
    shape: &FunctionShape,
    function_text: &str,
    call: &MarshaledCall,
) -> String {
    let mut sections = vec![ALLOWED_LINTS.to_string()];
    if !call.declarations.is_empty() {
        sections.push(call.declarations.to_string());
    }
    match shape {
        // closures live inside the export macro
        FunctionShape::Closure => {}
        FunctionShape::Item { .. } => sections.push(function_text.trim_end().to_string()),
    }
    sections.push(export_statement(ctx, shape, function_text.trim_end()));
    sections.push(support_items(ctx).to_string());
    sections.push(main_fn(ctx, shape, call).to_string());

    let mut module = sections.join("\n\n");
    module.push('\n');
    module
}
