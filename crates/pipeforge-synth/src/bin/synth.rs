// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Function step synthesizer CLI
//!
//! Reads a workflow JSON file, replaces every function step with a script
//! step and writes the result as JSON.
//!
//! Usage:
//!
//! ```text
//! pipeforge-synth --workflow <path> [--output <path>] [--source-root <dir>] [--no-bundle]
//! pipeforge-synth --schema
//! ```
//!
//! Example:
//!
//! ```text
//! pipeforge-synth --workflow ci.json --source-root . --output ci.synth.json
//! ```

use pipeforge_dsl::{parse_workflow_str, workflow_schema};
use pipeforge_synth::{BundlerKind, SynthConfig, synthesize_workflow};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

fn print_usage() {
    eprintln!(
        r#"Usage: pipeforge-synth [OPTIONS]

Replace the function steps of a workflow JSON file with script steps.

OPTIONS:
    --workflow <path>      Path to workflow JSON file (required)
    --output <path>        Output JSON path (default: stdout)
    --source-root <dir>    Directory call-site paths are relative to
                           (default: PIPEFORGE_SOURCE_ROOT or current directory)
    --no-bundle            Never resolve dependencies; emit fallback scripts
    --schema               Print the workflow JSON Schema and exit
    --help                 Show this help message

ENVIRONMENT:
    PIPEFORGE_SOURCE_ROOT            Source root (default: current directory)
    PIPEFORGE_CARGO                  Cargo executable (default: cargo)
    PIPEFORGE_BUNDLER                cargo | off (default: cargo)
    PIPEFORGE_PRECISE_WINDOW         Call search window in lines (default: 10)
    PIPEFORGE_FALLBACK_WINDOW        Name search window in lines (default: 100)
    PIPEFORGE_CHECK_SELF_CONTAINED   Reject functions using outside names (default: true)
    RUST_LOG                         Log filter (default: warn)

EXAMPLES:
    # Synthesize and print to stdout
    pipeforge-synth --workflow ci.json

    # Synthesize without touching cargo
    pipeforge-synth --workflow ci.json --no-bundle --output ci.synth.json
"#
    );
}

struct Args {
    workflow_path: Option<PathBuf>,
    output_path: Option<PathBuf>,
    source_root: Option<PathBuf>,
    no_bundle: bool,
    schema: bool,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();

    let mut workflow_path: Option<PathBuf> = None;
    let mut output_path: Option<PathBuf> = None;
    let mut source_root: Option<PathBuf> = None;
    let mut no_bundle = false;
    let mut schema = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--workflow" => {
                i += 1;
                if i >= args.len() {
                    return Err("--workflow requires a path".to_string());
                }
                workflow_path = Some(PathBuf::from(&args[i]));
            }
            "--output" => {
                i += 1;
                if i >= args.len() {
                    return Err("--output requires a path".to_string());
                }
                output_path = Some(PathBuf::from(&args[i]));
            }
            "--source-root" => {
                i += 1;
                if i >= args.len() {
                    return Err("--source-root requires a directory".to_string());
                }
                source_root = Some(PathBuf::from(&args[i]));
            }
            "--no-bundle" => {
                no_bundle = true;
            }
            "--schema" => {
                schema = true;
            }
            arg => {
                return Err(format!("Unknown argument: {}", arg));
            }
        }
        i += 1;
    }

    if !schema && workflow_path.is_none() {
        return Err("--workflow is required".to_string());
    }

    Ok(Args {
        workflow_path,
        output_path,
        source_root,
        no_bundle,
        schema,
    })
}

fn main() -> ExitCode {
    // Initialize minimal logging (default to warn if RUST_LOG not set)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    if args.schema {
        return match serde_json::to_string_pretty(&workflow_schema()) {
            Ok(schema) => {
                println!("{}", schema);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error serializing schema: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let Some(workflow_path) = args.workflow_path else {
        print_usage();
        return ExitCode::FAILURE;
    };

    let mut config = match SynthConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(root) = args.source_root {
        config = config.with_source_root(root);
    }
    if args.no_bundle {
        config = config.with_bundler(BundlerKind::Disabled);
    }

    // Read workflow JSON
    let workflow_json = match fs::read_to_string(&workflow_path) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error reading workflow file {:?}: {}", workflow_path, e);
            return ExitCode::FAILURE;
        }
    };

    // Parse workflow
    let workflow = match parse_workflow_str(&workflow_json) {
        Ok(workflow) => workflow,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Synthesizing workflow: {} function step(s), source root {}",
        workflow.function_step_count(),
        config.source_root.display()
    );

    let output = match synthesize_workflow(&workflow, &config) {
        Ok(output) => output,
        Err(e) => {
            eprintln!("Synthesis failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for report in &output.reports {
        eprintln!("  {}", report);
    }
    if output.setup_steps_added > 0 {
        eprintln!("  Setup steps added: {}", output.setup_steps_added);
    }

    let json = match serde_json::to_string_pretty(&output.workflow) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error serializing workflow: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match args.output_path {
        Some(output_path) => {
            if let Err(e) = fs::write(&output_path, format!("{}\n", json)) {
                eprintln!("Error writing {:?}: {}", output_path, e);
                return ExitCode::FAILURE;
            }
            // Print final path to stdout for scripts to capture
            println!("{}", output_path.display());
        }
        None => println!("{}", json),
    }

    ExitCode::SUCCESS
}
