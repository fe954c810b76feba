//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn bare_invocation_prints_usage_and_fails() {
    let mut cmd = cargo_bin_cmd!("moor");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn bootstrap_requires_a_repository_url() {
    let mut cmd = cargo_bin_cmd!("moor");
    cmd.arg("bootstrap");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--url"));
}

#[test]
fn install_export_prints_the_rendered_manifests() {
    let mut cmd = cargo_bin_cmd!("moor");
    cmd.args(["install", "--export"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("# moor-system/components.yaml"))
        .stdout(predicate::str::contains("kind: Namespace"))
        .stdout(predicate::str::contains("kind: Deployment"));
}

#[test]
fn install_export_honours_namespace_and_component_overrides() {
    let mut cmd = cargo_bin_cmd!("moor");
    cmd.args([
        "install",
        "--export",
        "--namespace",
        "delivery",
        "--components",
        "source-agent",
    ]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("namespace: delivery"))
        .stdout(predicate::str::contains("name: source-agent"))
        .stdout(predicate::str::contains("name: apply-agent").not());
}

#[test]
fn basic_and_tls_credentials_are_mutually_exclusive() {
    let mut cmd = cargo_bin_cmd!("moor");
    cmd.args([
        "bootstrap",
        "--url",
        "https://git.example.com/ops/fleet.git",
        "--username",
        "deploy",
        "--password",
        "hunter2",
        "--tls-cert",
        "client.pem",
        "--tls-key",
        "client.key",
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn username_without_password_is_rejected_by_the_parser() {
    let mut cmd = cargo_bin_cmd!("moor");
    cmd.args([
        "bootstrap",
        "--url",
        "https://git.example.com/ops/fleet.git",
        "--username",
        "deploy",
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--password"));
}
