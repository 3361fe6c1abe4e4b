//! CLI tests for `forge compact` and the run lifecycle commands.
//!
//! Spawns the forge binary and verifies stdout and exit codes.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use forge::exit_codes;

const HEADER: &str = "#pragma once
// A comment
int add(int a, int b);

int add(int a, int b) {
    return a + b;
}

namespace NS {
    int x;
}";

const COMPACTED: &str = "#pragma once
// A comment
int add(int a, int b);


namespace NS {
    int x;
}";

fn forge(config_dir: &Path, args: &[&str], stdin: &[u8]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_forge"))
        .current_dir(config_dir)
        .arg("--config")
        .arg(config_dir.join("forge.toml"))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn forge");
    // Commands that fail before reading stdin close the pipe early.
    let _ = child.stdin.take().expect("stdin").write_all(stdin);
    child.wait_with_output().expect("forge output")
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).expect("utf8 stdout")
}

#[test]
fn compact_reads_stdin() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = forge(temp.path(), &["compact"], HEADER.as_bytes());
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&output), COMPACTED);
}

#[test]
fn compact_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("chisel.hpp");
    std::fs::write(&path, HEADER).expect("write header");

    let output = forge(temp.path(), &["compact", "chisel.hpp"], b"");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(stdout(&output), COMPACTED);
}

#[test]
fn compact_rejects_invalid_utf8() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = forge(temp.path(), &["compact", "-"], &[0xff, 0xfe, b'{']);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn spec_for_unknown_run_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = forge(temp.path(), &["spec", "--run", "run-missing"], b"PROGRAM := STMT*");
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown run"), "stderr: {stderr}");
}

#[test]
fn run_before_build_exits_with_prerequisite() {
    let temp = tempfile::tempdir().expect("tempdir");
    let started = forge(temp.path(), &["start"], b"");
    assert_eq!(started.status.code(), Some(exit_codes::OK));
    let run_id = stdout(&started).trim().to_string();
    assert!(run_id.starts_with("run-"));
    assert!(temp.path().join(".forge/runs").join(&run_id).is_dir());

    let output = forge(temp.path(), &["run", "--run", &run_id], b"print 1");
    assert_eq!(output.status.code(), Some(exit_codes::PREREQUISITE));
    assert!(stdout(&output).contains("requires state 'built'"));

    let finished = forge(temp.path(), &["finish", "--run", &run_id], b"");
    assert_eq!(finished.status.code(), Some(exit_codes::OK));
    let record: serde_json::Value =
        serde_json::from_str(&stdout(&finished)).expect("record json");
    assert_eq!(record["run_id"], run_id.as_str());
    assert_eq!(record["state"], "empty");
    assert!(!temp.path().join(".forge/runs").join(&run_id).exists());
}

#[test]
fn document_is_visible_in_record() {
    let temp = tempfile::tempdir().expect("tempdir");
    let started = forge(temp.path(), &["start"], b"");
    let run_id = stdout(&started).trim().to_string();

    let documented = forge(
        temp.path(),
        &["document", "--run", &run_id],
        b"Arithmetic language.",
    );
    assert_eq!(documented.status.code(), Some(exit_codes::OK));

    let record = forge(temp.path(), &["record", "--run", &run_id], b"");
    let record: serde_json::Value = serde_json::from_str(&stdout(&record)).expect("record json");
    assert_eq!(record["documentation"], "Arithmetic language.");
}

#[test]
fn tools_lists_stage_capabilities() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = forge(temp.path(), &["tools"], b"");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let tools: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("tools json");
    let names: Vec<&str> = tools
        .as_array()
        .expect("array")
        .iter()
        .map(|tool| tool["name"].as_str().expect("name"))
        .collect();
    assert_eq!(
        names,
        vec!["submit_specification", "submit_interpreter", "run_example"]
    );
}
