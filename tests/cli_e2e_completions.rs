//! End-to-end tests for the `aptly-reconcile completions` command.
//!
//! These tests verify the CLI behavior of the `completions` command by invoking
//! the binary directly and checking its output.

#[allow(dead_code)]
mod common;
#[allow(unused_imports)]
use common::prelude::*;

#[test]
fn test_completions_help() {
    let mut cmd = cargo_bin_cmd!("aptly-reconcile");
    cmd.arg("completions")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Generate shell completion scripts"))
        .stdout(predicate::str::contains("bash"))
        .stdout(predicate::str::contains("zsh"))
        .stdout(predicate::str::contains("fish"));
}

#[test]
fn test_completions_bash() {
    let mut cmd = cargo_bin_cmd!("aptly-reconcile");
    cmd.arg("completions")
        .arg("bash")
        .assert()
        .success()
        // Bash completions define a completion function
        .stdout(predicate::str::contains("_aptly-reconcile()"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn test_completions_zsh() {
    let mut cmd = cargo_bin_cmd!("aptly-reconcile");
    cmd.arg("completions")
        .arg("zsh")
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef aptly-reconcile"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_completions_invalid_shell() {
    let mut cmd = cargo_bin_cmd!("aptly-reconcile");
    cmd.arg("completions")
        .arg("tcsh")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid value"));
}
