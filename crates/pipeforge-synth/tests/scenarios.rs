// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end synthesis over steps registered in this file.
//!
//! Steps are built with `PipelineStep::run_fn`, so their call sites point
//! back into this file and the functions below are extracted from it.
//! Script bodies are compiled with `rustc` and run directly; tests marked
//! `#[ignore]` execute the full generated commands and need `rust-script` on
//! `PATH`.

use pipeforge_dsl::{ArgumentValue, Job, PipelineStep, RuntimeFamily, StepBody, Workflow};
use pipeforge_synth::embed::HEREDOC_DELIMITER;
use pipeforge_synth::{BundlerKind, ScriptMode, SynthConfig, SynthError, synthesize_workflow};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Fails when the value is above the threshold.
fn check_threshold(data: &str, threshold: i64) {
    let value: i64 = data.parse().expect("data must be a number");
    if value > threshold {
        panic!("Value {} exceeds threshold {}", value, threshold);
    }
    println!("Value {} is within threshold {}", value, threshold);
}

/// Reports and exits instead of panicking.
fn check_threshold_exit(data: &str, threshold: i64) {
    let value: i64 = data.parse().expect("data must be a number");
    if value > threshold {
        println!("Value {} exceeds threshold {}", value, threshold);
        std::process::exit(1);
    }
}

fn names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("n{}", i)).collect()
}

fn refuse(reason: &str) -> Result<u32, String> {
    Err(reason.to_string())
}

fn refuse_bytes(first: u8) -> Result<(), Vec<u8>> {
    Err(vec![first, first + 1])
}

fn small(port: u8) -> u8 {
    port
}

fn greet(name: &str, sha: String) -> String {
    format!("Hello, {} ({})", name, &sha[..sha.len().min(7)])
}

fn emit_json(name: &str) {
    let value = serde_json::json!({ "name": name });
    println!("{}", value);
}

fn config() -> SynthConfig {
    SynthConfig::default().with_source_root(env!("CARGO_MANIFEST_DIR"))
}

fn offline_config() -> SynthConfig {
    config().with_bundler(BundlerKind::Disabled)
}

fn single_step_workflow(step: PipelineStep) -> Workflow {
    Workflow::new("ci").with_job(Job::new("main").runs_on("ubuntu-latest").step(step))
}

fn run_shell(command: &str, env: &[(&String, &String)]) -> std::process::Output {
    let mut cmd = Command::new("bash");
    cmd.arg("-c").arg(command);
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.output().expect("bash must be available")
}

/// The single synthesized command of the only job.
fn synthesized_command(step: PipelineStep) -> String {
    let output = synthesize_workflow(&single_step_workflow(step), &config()).unwrap();
    let job = output.workflow.job("main").unwrap();
    job.steps()
        .iter()
        .find_map(|step| step.command())
        .expect("a synthesized command step")
        .to_string()
}

/// The Rust source between the runtime header and the heredoc delimiter.
fn script_body(command: &str) -> &str {
    let start = command.find("#![allow(").expect("script body start");
    let end = command[start..]
        .find(&format!("\n{}\n", HEREDOC_DELIMITER))
        .expect("heredoc delimiter");
    &command[start..start + end + 1]
}

/// Compile the script body with `rustc` into a fresh directory.
fn compile(command: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("step.rs");
    let binary = dir.path().join("step");
    std::fs::write(&source, script_body(command)).unwrap();

    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let result = Command::new(rustc)
        .args(["--edition", "2024", "-g", "-o"])
        .arg(&binary)
        .arg(&source)
        .output()
        .expect("rustc must be available");
    assert!(
        result.status.success(),
        "script does not compile:\n{}\n--- source ---\n{}",
        String::from_utf8_lossy(&result.stderr),
        script_body(command)
    );
    (dir, binary)
}

fn run_binary(binary: &Path, env: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(binary);
    cmd.env_clear();
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.output().unwrap()
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_threshold_step_is_synthesized() {
    let step = PipelineStep::run_fn(
        check_threshold,
        vec![ArgumentValue::literal("100"), ArgumentValue::literal(50)],
    )
    .with_id("threshold");
    let output = synthesize_workflow(&single_step_workflow(step), &config()).unwrap();

    let job = output.workflow.job("main").unwrap();
    let step = job.step_by_id("threshold").unwrap();
    let command = step.command().unwrap();
    assert!(matches!(step.body, StepBody::Command(_)));
    assert_eq!(step.name.as_deref(), Some("Run check_threshold"));
    assert!(command.contains("/// Fails when the value is above the threshold."));
    assert!(command.contains("panic!(\"Value {} exceeds threshold {}\", value, threshold);"));
    assert!(command.contains("__pipeforge_entry (\"100\" , 50)"));
    assert!(step.env.is_empty());

    let report = &output.reports[0];
    assert_eq!(report.function, "check_threshold");
    assert_eq!(report.mode, ScriptMode::Bundled);
    assert!(report.dependencies.is_empty());
}

#[test]
fn test_anonymous_closure_step() {
    let step = PipelineStep::run_fn(|| println!("Hello, world!"), vec![]);
    let output = synthesize_workflow(&single_step_workflow(step), &config()).unwrap();

    let job = output.workflow.job("main").unwrap();
    let command = job.steps()[1].command().unwrap();
    assert!(command.contains("|| println!(\"Hello, world!\")"));
    assert!(command.contains("macro_rules! __pipeforge_entry"));
    assert_eq!(output.reports[0].function, "<closure>");
}

#[test]
fn test_setup_for_requested_version_comes_first() {
    let step = PipelineStep::run_fn(
        check_threshold,
        vec![ArgumentValue::literal("1"), ArgumentValue::literal(2)],
    )
    .with_runtime(RuntimeFamily::RustScript, Some("0.35"));
    let workflow = Workflow::new("ci").with_job(
        Job::new("main")
            .step(PipelineStep::shell("echo one").with_id("one"))
            .step(step.with_id("check"))
            .step(PipelineStep::shell("echo two").with_id("two")),
    );
    let output = synthesize_workflow(&workflow, &offline_config()).unwrap();

    let steps = output.workflow.job("main").unwrap().steps();
    let ids: Vec<_> = steps.iter().map(|s| s.id.as_deref().unwrap_or("")).collect();
    assert_eq!(ids, vec!["setup-rust-script-0-35", "one", "check", "two"]);
    let setup = steps[0].action().unwrap();
    assert_eq!(setup.uses, "taiki-e/install-action@v2");
    assert_eq!(setup.with.get("tool").map(String::as_str), Some("rust-script@0.35"));
    assert_eq!(steps[1], workflow.job("main").unwrap().steps()[0]);
    assert_eq!(steps[3], workflow.job("main").unwrap().steps()[2]);
    assert_eq!(output.setup_steps_added, 1);
}

#[test]
fn test_deferred_arguments_become_step_env() {
    let step = PipelineStep::run_fn(
        greet,
        vec![
            ArgumentValue::deferred("${{ inputs.name }}"),
            ArgumentValue::deferred("${{ github.sha }}"),
        ],
    )
    .with_runtime(RuntimeFamily::CargoScript, None);
    let output = synthesize_workflow(&single_step_workflow(step), &config()).unwrap();

    let job = output.workflow.job("main").unwrap();
    assert_eq!(job.steps()[0].id.as_deref(), Some("setup-cargo-script-nightly"));
    let step = &job.steps()[1];
    let keys: Vec<_> = step.env.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["PIPEFORGE_ARG_0", "PIPEFORGE_ARG_1"]);
    assert_eq!(step.env["PIPEFORGE_ARG_1"], "${{ github.sha }}");

    let command = step.command().unwrap();
    assert!(command.contains("#!/usr/bin/env -S cargo +nightly -Zscript"));
    assert!(command.contains("const PIPEFORGE_ARG_0_DEFAULT : & str = \"${{ inputs.name }}\" ;"));
    assert!(command.contains("\ncargo +nightly -Zscript \"$PIPEFORGE_SCRIPT_DIR/step_"));
}

#[test]
fn test_serialized_output_has_no_function_steps() {
    let step = PipelineStep::run_fn(|| println!("Hello, world!"), vec![]);
    let output = synthesize_workflow(&single_step_workflow(step), &offline_config()).unwrap();

    let json = serde_json::to_value(&output.workflow).unwrap();
    for step in json["jobs"][0]["steps"].as_array().unwrap() {
        assert!(step.get("function").is_none());
        assert!(!(step.get("run").is_some() && step.get("uses").is_some()));
    }
    let reparsed = pipeforge_dsl::parse_workflow(&json).unwrap();
    assert_eq!(reparsed, output.workflow);
}

#[test]
fn test_resynthesis_is_idempotent() {
    let step = PipelineStep::run_fn(
        check_threshold,
        vec![ArgumentValue::literal("3"), ArgumentValue::literal(4)],
    );
    let first = synthesize_workflow(&single_step_workflow(step), &offline_config()).unwrap();
    let second = synthesize_workflow(&first.workflow, &offline_config()).unwrap();

    assert_eq!(second.workflow, first.workflow);
    assert_eq!(second.setup_steps_added, 0);
    assert!(second.reports.is_empty());
}

#[test]
fn test_arity_mismatch_names_the_step() {
    let step =
        PipelineStep::run_fn(check_threshold, vec![ArgumentValue::literal("1")]).with_id("short");
    let err = synthesize_workflow(&single_step_workflow(step), &offline_config()).unwrap_err();

    assert!(err.to_string().contains("step `short`"));
    assert!(matches!(
        err.root(),
        SynthError::ArityMismatch {
            expected: 2,
            given: 1,
            ..
        }
    ));
}

#[test]
fn test_external_crate_is_bundled_from_manifest() {
    let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let mut config = config();
    config.cargo = cargo.into();

    let step = PipelineStep::run_fn(emit_json, vec![ArgumentValue::literal("ci")]);
    let output = synthesize_workflow(&single_step_workflow(step), &config).unwrap();

    let report = &output.reports[0];
    assert_eq!(report.mode, ScriptMode::Bundled);
    assert_eq!(report.dependencies, vec!["serde_json".to_string()]);
    let command = output.workflow.job("main").unwrap().steps()[1]
        .command()
        .unwrap();
    assert!(command.contains("//! [dependencies]\n//! serde_json = "));
}

#[test]
fn test_disabled_bundler_reprints_external_crate_use() {
    let step = PipelineStep::run_fn(emit_json, vec![ArgumentValue::literal("ci")]);
    let output = synthesize_workflow(&single_step_workflow(step), &offline_config()).unwrap();
    assert_eq!(output.reports[0].mode, ScriptMode::Fallback);
}

#[test]
#[ignore = "requires rust-script"]
fn test_threshold_script_fails_with_message() {
    let step = PipelineStep::run_fn(
        check_threshold,
        vec![ArgumentValue::literal("100"), ArgumentValue::literal(50)],
    );
    let output = synthesize_workflow(&single_step_workflow(step), &config()).unwrap();
    let command = output.workflow.job("main").unwrap().steps()[1]
        .command()
        .unwrap()
        .to_string();

    let result = run_shell(&command, &[]);
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert_eq!(result.status.code(), Some(1), "stderr: {}", stderr);
    assert!(stderr.contains("Error: Value 100 exceeds threshold 50"), "stderr: {}", stderr);
    // release build: only the panic location is printed
    assert!(stderr.contains("    at "), "stderr: {}", stderr);
}

#[test]
#[ignore = "requires rust-script"]
fn test_hello_closure_script_succeeds() {
    let step = PipelineStep::run_fn(|| println!("Hello, world!"), vec![]);
    let output = synthesize_workflow(&single_step_workflow(step), &config()).unwrap();
    let command = output.workflow.job("main").unwrap().steps()[1]
        .command()
        .unwrap()
        .to_string();

    let result = run_shell(&command, &[]);
    assert!(result.status.success());
    assert_eq!(String::from_utf8_lossy(&result.stdout).trim(), "Hello, world!");
}

#[test]
#[ignore = "requires rust-script"]
fn test_deferred_argument_defaults_and_env() {
    let step = PipelineStep::run_fn(
        greet,
        vec![
            ArgumentValue::literal("ci"),
            ArgumentValue::deferred("${{ github.sha }}"),
        ],
    );
    let output = synthesize_workflow(&single_step_workflow(step), &config()).unwrap();
    let step = &output.workflow.job("main").unwrap().steps()[1];
    let command = step.command().unwrap().to_string();

    // unset: the raw expression text is used
    let result = run_shell(&command, &[]);
    assert_eq!(
        String::from_utf8_lossy(&result.stdout).trim(),
        "Hello, ci (${{ git)"
    );

    let name = "PIPEFORGE_ARG_1".to_string();
    let sha = "0123456789abcdef".to_string();
    let result = run_shell(&command, &[(&name, &sha)]);
    assert_eq!(String::from_utf8_lossy(&result.stdout).trim(), "Hello, ci (0123456)");
}

#[test]
fn test_compiled_exit_script_prints_and_fails() {
    let command = synthesized_command(PipelineStep::run_fn(
        check_threshold_exit,
        vec![ArgumentValue::literal("100"), ArgumentValue::literal(50)],
    ));
    let (_dir, binary) = compile(&command);

    let result = run_binary(&binary, &[]);
    assert_eq!(stdout_of(&result), "Value 100 exceeds threshold 50\n");
    assert_eq!(result.status.code(), Some(1));
}

#[test]
fn test_compiled_panic_script_reports_user_frame() {
    let command = synthesized_command(PipelineStep::run_fn(
        check_threshold,
        vec![ArgumentValue::literal("100"), ArgumentValue::literal(50)],
    ));
    let (_dir, binary) = compile(&command);

    let result = run_binary(&binary, &[]);
    let stderr = stderr_of(&result);
    assert_eq!(result.status.code(), Some(1), "stderr: {}", stderr);
    assert!(stderr.starts_with("Error: Value 100 exceeds threshold 50\n"), "stderr: {}", stderr);
    assert!(stderr.contains("check_threshold ("), "stderr: {}", stderr);
    for prefix in ["    at <std::", "    at <core::", "    at <alloc::", "    at std::"] {
        assert!(!stderr.contains(prefix), "stderr: {}", stderr);
    }
    assert!(stdout_of(&result).is_empty());
}

#[test]
fn test_compiled_passing_threshold_exits_zero() {
    let command = synthesized_command(PipelineStep::run_fn(
        check_threshold,
        vec![ArgumentValue::literal("10"), ArgumentValue::literal(50)],
    ));
    let (_dir, binary) = compile(&command);

    let result = run_binary(&binary, &[]);
    assert_eq!(result.status.code(), Some(0));
    assert_eq!(stdout_of(&result), "Value 10 is within threshold 50\n");
}

#[test]
fn test_compiled_closure_script_says_hello() {
    let command = synthesized_command(PipelineStep::run_fn(|| println!("Hello, world!"), vec![]));
    let (_dir, binary) = compile(&command);

    let result = run_binary(&binary, &[]);
    assert_eq!(result.status.code(), Some(0));
    assert_eq!(stdout_of(&result), "Hello, world!\n");
}

#[test]
fn test_compiled_deferred_argument_reads_env() {
    let command = synthesized_command(PipelineStep::run_fn(
        greet,
        vec![
            ArgumentValue::literal("ci"),
            ArgumentValue::deferred("${{ github.sha }}"),
        ],
    ));
    let (_dir, binary) = compile(&command);

    // unset: the raw expression text is used
    let result = run_binary(&binary, &[]);
    assert_eq!(result.status.code(), Some(0));
    assert_eq!(stdout_of(&result), "Hello, ci (${{ git)\n");

    let result = run_binary(&binary, &[("PIPEFORGE_ARG_1", "0123456789abcdef")]);
    assert_eq!(stdout_of(&result), "Hello, ci (0123456)\n");
}

#[test]
fn test_compiled_vec_return_prints_debug() {
    let command =
        synthesized_command(PipelineStep::run_fn(names, vec![ArgumentValue::literal(3)]));
    let (_dir, binary) = compile(&command);

    let result = run_binary(&binary, &[]);
    assert_eq!(result.status.code(), Some(0));
    assert_eq!(stdout_of(&result), "[\"n0\", \"n1\", \"n2\"]\n");
}

#[test]
fn test_compiled_error_results_exit_one() {
    let command =
        synthesized_command(PipelineStep::run_fn(refuse, vec![ArgumentValue::literal("nope")]));
    let (_dir, binary) = compile(&command);
    let result = run_binary(&binary, &[]);
    assert_eq!(result.status.code(), Some(1));
    assert_eq!(stderr_of(&result), "Error: nope\n");
    assert!(stdout_of(&result).is_empty());

    // no Display on the error: Debug is used
    let command =
        synthesized_command(PipelineStep::run_fn(refuse_bytes, vec![ArgumentValue::literal(7)]));
    let (_dir, binary) = compile(&command);
    let result = run_binary(&binary, &[]);
    assert_eq!(result.status.code(), Some(1));
    assert_eq!(stderr_of(&result), "Error: [7, 8]\n");
}

#[test]
fn test_out_of_range_literal_names_the_step() {
    let step = PipelineStep::run_fn(small, vec![ArgumentValue::literal(300)]).with_id("port");
    let err = synthesize_workflow(&single_step_workflow(step), &offline_config()).unwrap_err();

    assert!(err.to_string().contains("step `port`"), "{}", err);
    match err.root() {
        SynthError::InvalidArgument { function, index, reason } => {
            assert_eq!(function, "small");
            assert_eq!(*index, 0);
            assert!(reason.contains("u8"), "{}", reason);
        }
        other => panic!("unexpected {:?}", other),
    }
}
