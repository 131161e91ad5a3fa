// tests/cli.rs
use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

use rvooo_rust::functional_simulator::instructions::{
    encode_addi, encode_bne, encode_ecall,
};

/// Smoke tests for the command-line interface

fn write_image(words: &[u32]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    for &word in words {
        file.write_all(&word.to_le_bytes()).expect("write word");
    }
    file.flush().expect("flush image");
    file
}

fn small_loop() -> Vec<u32> {
    vec![
        encode_addi(5, 0, 5),
        encode_addi(5, 5, -1),
        encode_bne(5, 0, -4),
        encode_ecall(),
    ]
}

#[test]
fn test_timing_with_demo_program() {
    let mut cmd = Command::cargo_bin("rvooo_rust").expect("binary exists");
    cmd.arg("timing")
        .assert()
        .success()
        .stdout(predicate::str::contains("Simulation Summary"))
        .stdout(predicate::str::contains("Trace cache"));
}

#[test]
fn test_timing_with_image_file() {
    let image = write_image(&small_loop());

    let mut cmd = Command::cargo_bin("rvooo_rust").expect("binary exists");
    cmd.arg("timing")
        .arg("--input")
        .arg(image.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Simulation Summary"));
}

#[test]
fn test_oracle_prints_committed_stream() {
    let image = write_image(&small_loop());

    let mut cmd = Command::cargo_bin("rvooo_rust").expect("binary exists");
    cmd.arg("oracle")
        .arg("--input")
        .arg(image.path())
        .assert()
        .success()
        // 1 setup + 5 * 2 loop body + ecall = the loop above commits 12.
        .stdout(predicate::str::contains("Committed 12 instructions"));
}

#[test]
fn test_stats_json_report() {
    let image = write_image(&small_loop());
    let report = tempfile::NamedTempFile::new().expect("create report file");

    let mut cmd = Command::cargo_bin("rvooo_rust").expect("binary exists");
    cmd.arg("timing")
        .arg("--input")
        .arg(image.path())
        .arg("--stats-json")
        .arg(report.path())
        .assert()
        .success();

    let contents = std::fs::read_to_string(report.path()).expect("report written");
    let json: serde_json::Value = serde_json::from_str(&contents).expect("valid JSON");
    assert!(json["trace_cache"]["accesses"].is_number());
    assert!(json["pipeline"]["instructions_retired"].is_number());
}

#[test]
fn test_misaligned_image_is_rejected() {
    let mut file = tempfile::NamedTempFile::new().expect("create temp file");
    file.write_all(&[0x13, 0x00, 0x00]).expect("write bytes");
    file.flush().expect("flush");

    let mut cmd = Command::cargo_bin("rvooo_rust").expect("binary exists");
    cmd.arg("timing")
        .arg("--input")
        .arg(file.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("not a multiple of 4"));
}
