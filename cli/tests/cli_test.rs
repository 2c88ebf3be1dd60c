//! Integration tests for the pagewise binary.

use std::fs;
use std::path::Path;
use std::process::Command;

fn pagewise() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pagewise"))
}

fn write_source(dir: &Path) -> std::path::PathBuf {
    let source = dir.join("notes.txt");
    fs::write(
        &source,
        "# Intro\n\nA short page.\x0c| Item | Qty |\n|---|---|\n| Rope | 2 |\x0c# Outro\n\nThe end.",
    )
    .unwrap();
    source
}

#[test]
fn test_stages_lists_all() {
    let output = pagewise().arg("stages").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("populate"));
    assert!(stdout.contains("chapter-summary"));
}

#[test]
fn test_run_then_status() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path());
    let out = dir.path().join("out");

    let output = pagewise()
        .args(["run", "-j", "2", "--output"])
        .arg(&out)
        .arg(&source)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let checkpoint = out.join("notes.checkpoint.json");
    let output = pagewise()
        .args(["status", "--json"])
        .arg(&checkpoint)
        .output()
        .unwrap();
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["documentId"], "notes");
    assert_eq!(status["processingStatus"]["currentStage"], "7_completed");
}

#[test]
fn test_process_mode_uses_worker_children() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path());
    let out = dir.path().join("out");

    let output = pagewise()
        .args(["run", "--mode", "process", "-j", "2", "--json", "--output"])
        .arg(&out)
        .arg(&source)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(schema["documentSummary"]["pageCount"], 3);
    let tables = schema["tableChunks"].as_array().unwrap();
    assert_eq!(tables.len(), 1);
    assert!(tables[0]["description"]["summary"].is_string());
    assert!(out.join("unit_2").is_dir());
}

#[test]
fn test_bad_stage_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(dir.path());
    let output = pagewise()
        .args(["run", "--from", "polish"])
        .arg(&source)
        .output()
        .unwrap();
    assert!(!output.status.success());
}
