//! CLI integration tests for mysql-schema-push.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for runs that never reach a database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get a command for the mysql-schema-push binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("mysql-schema-push").unwrap();
    cmd.env_remove("MYSQL_PWD");
    cmd
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
        .stdout(predicate::str::contains("push"))
        .stdout(predicate::str::contains("diff"));
}

#[test]
fn test_push_subcommand_help() {
    cmd()
        .args(["push", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--allow-unsafe"))
        .stdout(predicate::str::contains("--safe-below-size"))
        .stdout(predicate::str::contains("--alter-wrapper"))
        .stdout(predicate::str::contains("--skip-verify"));
}

#[test]
fn test_diff_subcommand_help() {
    cmd()
        .args(["diff", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--brief"))
        .stdout(predicate::str::contains("--dry-run").not());
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mysql-schema-push"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_directory_is_config_error() {
    cmd()
        .args(["diff", "--dir", "/nonexistent/mysql-schema-push-tests"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("is not a directory"));
}

#[test]
fn test_invalid_verbosity_is_config_error() {
    let tmp = TempDir::new().unwrap();
    cmd()
        .args(["diff", "--verbosity", "loud", "--dir"])
        .arg(tmp.path())
        .assert()
        .code(3);
}

#[test]
fn test_unknown_option_in_file_is_config_error() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join(".push.yaml"), "hots: db1\n").unwrap();
    cmd()
        .args(["diff", "--dir"])
        .arg(tmp.path())
        .assert()
        .code(3)
        .stderr(predicate::str::contains("hots"));
}

#[test]
fn test_empty_tree_has_no_differences() {
    let tmp = TempDir::new().unwrap();
    cmd()
        .args(["diff", "--output-json", "--dir"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"differences\": false"))
        .stdout(predicate::str::contains("\"targets_total\": 0"));
}

#[test]
fn test_invalid_directory_options_are_partial_error() {
    let tmp = TempDir::new().unwrap();
    let shop = tmp.path().join("shop");
    fs::create_dir(&shop).unwrap();
    fs::write(
        shop.join(".push.yaml"),
        "host: db1\nschema: shop\ntemp-schema-threads: 0\n",
    )
    .unwrap();
    cmd()
        .args(["diff", "--output-json", "--dir"])
        .arg(tmp.path())
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"skip_count\": 1"));
}

#[test]
fn test_unknown_workspace_kind_skips_only_that_directory() {
    let tmp = TempDir::new().unwrap();
    let shop = tmp.path().join("shop");
    fs::create_dir(&shop).unwrap();
    fs::write(
        shop.join(".push.yaml"),
        "host: db1\nschema: shop\nworkspace: tmp-schema\n",
    )
    .unwrap();
    cmd()
        .args(["diff", "--output-json", "--dir"])
        .arg(tmp.path())
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"skip_count\": 1"))
        .stderr(predicate::str::contains("tmp-schema"));
}

#[test]
fn test_invalid_flag_value_is_partial_error() {
    let tmp = TempDir::new().unwrap();
    cmd()
        .args(["push", "--alter-algorithm", "sideways", "--dir"])
        .arg(tmp.path())
        .assert()
        .code(2);
}
