//! CLI integration tests for filestorage-migrate.
//!
//! These tests verify command-line argument parsing, help output,
//! log verification and exit codes for error conditions that need no
//! database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the filestorage-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("filestorage-migrate").unwrap()
}

/// A log holding one committed transaction with no object records.
fn one_transaction_log() -> tempfile::NamedTempFile {
    let user = b"admin";
    let description = b"init";
    let tlen = (23 + user.len() + description.len()) as u64;

    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"FS21");
    bytes.extend_from_slice(&0x03d1_0a2c_0000_0000u64.to_be_bytes());
    bytes.extend_from_slice(&tlen.to_be_bytes());
    bytes.push(b' ');
    bytes.extend_from_slice(&(user.len() as u16).to_be_bytes());
    bytes.extend_from_slice(&(description.len() as u16).to_be_bytes());
    bytes.extend_from_slice(&0u16.to_be_bytes());
    bytes.extend_from_slice(user);
    bytes.extend_from_slice(description);
    bytes.extend_from_slice(&tlen.to_be_bytes());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();
    file
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("drain"))
        .stdout(predicate::str::contains("verify-log"))
        .stdout(predicate::str::contains("copy"))
        .stdout(predicate::str::contains("seed"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--skip-reset"))
        .stdout(predicate::str::contains("--skip-copy"));
}

#[test]
fn test_drain_requires_store() {
    cmd()
        .arg("drain")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--store"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("filestorage-migrate"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flags_exist() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"))
        .stdout(predicate::str::contains("--yes"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("[default: config.yaml]"));
}

#[test]
fn test_unknown_verbosity_exits_with_code_2() {
    cmd()
        .args(["--verbosity", "chatty", "health-check"])
        .assert()
        .code(2);
}

// =============================================================================
// verify-log
// =============================================================================

#[test]
fn test_verify_log_counts_transactions() {
    let log = one_transaction_log();

    cmd()
        .args(["verify-log", log.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Log OK"))
        .stdout(predicate::str::contains("Transactions: 1"));
}

#[test]
fn test_verify_log_json_output() {
    let log = one_transaction_log();

    let output = cmd()
        .args(["--output-json", "verify-log", log.path().to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["transactions"], 1);
    assert_eq!(json["objects"], 0);
}

#[test]
fn test_verify_log_needs_no_config() {
    let log = one_transaction_log();

    cmd()
        .args([
            "--config",
            "nonexistent_config_file.yaml",
            "verify-log",
            log.path().to_str().unwrap(),
        ])
        .assert()
        .success();
}

#[test]
fn test_verify_log_rejects_bad_signature() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"NOT A LOG AT ALL").unwrap();

    cmd()
        .args(["verify-log", file.path().to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unrecognized file signature"));
}

#[test]
fn test_verify_log_reports_truncation() {
    let log = one_transaction_log();
    let bytes = std::fs::read(log.path()).unwrap();
    let mut truncated = tempfile::NamedTempFile::new().unwrap();
    truncated.write_all(&bytes[..bytes.len() - 4]).unwrap();

    cmd()
        .args(["verify-log", truncated.path().to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("past end of file"));
}

// =============================================================================
// Exit Code Tests - Config Errors
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_1() {
    // Missing file is an IO error, not a config error
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "health-check"])
        .assert()
        .code(1);
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_empty_config_exits_with_code_2() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2);
}

#[test]
fn test_duplicate_store_names_exit_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "admin:").unwrap();
    writeln!(file, "  host: localhost").unwrap();
    writeln!(file, "stores:").unwrap();
    writeln!(file, "  - {{ name: main, path: /tmp/a.fs, database: a }}").unwrap();
    writeln!(file, "  - {{ name: main, path: /tmp/b.fs, database: b }}").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("duplicate store name"));
}

#[test]
fn test_run_without_yes_refuses_reset() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "admin:").unwrap();
    writeln!(file, "  host: localhost").unwrap();
    writeln!(file, "stores:").unwrap();
    writeln!(file, "  - {{ name: main, path: /tmp/a.fs, database: zodb }}").unwrap();

    // stdin is not a terminal under the test harness
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "run"])
        .write_stdin("")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("without --yes"));
}

#[test]
fn test_seed_without_section_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "admin:").unwrap();
    writeln!(file, "  host: localhost").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "seed"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no seed section"));
}

// =============================================================================
// No Subcommand Tests
// =============================================================================

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}
