//! CLI argument parsing tests for pmon.
//!
//! These verify argument handling without requiring root; every path
//! tested here exits before the proc connector is touched.

use assert_cmd::Command;
use predicates::prelude::*;

fn pmon_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pmon"))
}

#[test]
fn test_help() {
    pmon_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Process event monitor"))
        .stdout(predicate::str::contains("Event kinds to show"));
}

#[test]
fn test_version() {
    pmon_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pmon"));
}

#[test]
fn test_invalid_kind_rejected() {
    pmon_cmd()
        .arg("bogus")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_kind_values_listed_in_help() {
    pmon_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("fork"))
        .stdout(predicate::str::contains("coredump"));
}

#[test]
fn test_requires_root() {
    if unsafe { libc::geteuid() } == 0 {
        eprintln!("Skipping test: requires non-root");
        return;
    }
    pmon_cmd()
        .args(["fork", "exit"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Root privileges are required"));
}
