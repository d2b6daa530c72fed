// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Script and shell templates.

use minijinja::{Environment, context};
use pipeforge_dsl::RuntimeFamily;

const RUST_SCRIPT: &str = r#"#!/usr/bin/env rust-script
//! ```cargo
//! [package]
//! edition = "{{ edition }}"
{% if dependencies %}
//!
//! [dependencies]
{% for line in dependencies %}
//! {{ line }}
{% endfor %}
{% endif %}
//! ```

{{ body }}"#;

const CARGO_SCRIPT: &str = r#"#!/usr/bin/env -S cargo +{{ version }} -Zscript
---
[package]
edition = "{{ edition }}"
{% if dependencies %}

[dependencies]
{% for line in dependencies %}
{{ line }}
{% endfor %}
{% endif %}
---

{{ body }}"#;

const SHELL: &str = r#"PIPEFORGE_SCRIPT_DIR="$(mktemp -d)"
trap 'rm -rf "$PIPEFORGE_SCRIPT_DIR"' EXIT
cat > "$PIPEFORGE_SCRIPT_DIR/{{ file_name }}" <<'{{ delimiter }}'
{{ script }}{{ delimiter }}
{{ interpreter }} "$PIPEFORGE_SCRIPT_DIR/{{ file_name }}"
"#;

fn environment() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(true);
    env.add_template("rust-script", RUST_SCRIPT)?;
    env.add_template("cargo-script", CARGO_SCRIPT)?;
    env.add_template("shell", SHELL)?;
    Ok(env)
}

/// Inputs for a script header.
pub struct ScriptTemplate<'a> {
    /// Runtime the script targets.
    pub runtime: RuntimeFamily,
    /// Runtime version (toolchain for cargo-script).
    pub version: &'a str,
    /// Edition written into the manifest.
    pub edition: &'a str,
    /// `[dependencies]` lines, empty for none.
    pub dependencies: &'a [String],
    /// Everything after the header.
    pub body: &'a str,
}

/// Render a complete script.
pub fn render_script(script: &ScriptTemplate<'_>) -> Result<String, minijinja::Error> {
    let env = environment()?;
    let name = match script.runtime {
        RuntimeFamily::RustScript => "rust-script",
        RuntimeFamily::CargoScript => "cargo-script",
    };
    env.get_template(name)?.render(context! {
        version => script.version,
        edition => script.edition,
        dependencies => script.dependencies,
        body => script.body,
    })
}

/// Render the shell command that writes `script` to a file and runs it.
///
/// `script` must end with a newline so the heredoc terminator sits on its own
/// line.
pub fn render_shell(
    file_name: &str,
    delimiter: &str,
    script: &str,
    interpreter: &str,
) -> Result<String, minijinja::Error> {
    environment()?.get_template("shell")?.render(context! {
        file_name => file_name,
        delimiter => delimiter,
        script => script,
        interpreter => interpreter,
    })
}
