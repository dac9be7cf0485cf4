//! CLI-level smoke tests. Each test gets its own HOME so the catalog
//! database and cache files land in a scratch directory.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn raycoon(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("raycoon").unwrap();
    cmd.env("HOME", home)
        .env_remove("SUDO_USER")
        .env_remove("SUDO_UID")
        .env_remove("SUDO_GID")
        .env("RAYCOON_LOG", "error");
    cmd
}

const TROJAN_URI: &str = "trojan://pw@server.example:8443#CliTest";

#[test]
fn version_prints_package_version() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("raycoon"));
}

#[test]
fn completion_emits_script() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("raycoon"));
}

#[test]
fn config_add_list_show_delete_flow() {
    let home = tempfile::tempdir().unwrap();

    raycoon(home.path())
        .args(["config", "add", TROJAN_URI])
        .assert()
        .success()
        .stdout(predicate::str::contains("CliTest"));

    raycoon(home.path())
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("CliTest"))
        .stdout(predicate::str::contains("trojan"));

    raycoon(home.path())
        .args(["config", "show", "CliTest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("server.example:8443"))
        .stdout(predicate::str::contains("manual"));

    raycoon(home.path())
        .args(["config", "delete", "CliTest"])
        .assert()
        .success();

    raycoon(home.path())
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No configs found"));
}

#[test]
fn invalid_uri_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .args(["config", "add", "vless://missing-everything"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn out_of_range_port_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .args(["config", "add", "trojan://pw@h.example:65536#bad"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("port"));
}

#[test]
fn connect_unknown_config_fails() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .args(["connect", "no-such-config"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("config not found"));
}

#[test]
fn connect_without_target_requires_auto() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .arg("connect")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--auto"));
}

#[test]
fn status_without_connection() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not connected"));
}

#[test]
fn disconnect_without_connection_fails() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .arg("disconnect")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no active connection"));
}

#[test]
fn group_lifecycle_and_global_protection() {
    let home = tempfile::tempdir().unwrap();

    raycoon(home.path())
        .args(["group", "create", "work", "--description", "Work proxies"])
        .assert()
        .success()
        .stdout(predicate::str::contains("work"));

    raycoon(home.path())
        .args(["group", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("global"))
        .stdout(predicate::str::contains("work"));

    raycoon(home.path())
        .args(["group", "delete", "work"])
        .assert()
        .success();

    raycoon(home.path())
        .args(["group", "delete", "global"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("global"));
}

#[test]
fn group_delete_cascades_configs() {
    let home = tempfile::tempdir().unwrap();

    raycoon(home.path())
        .args(["group", "create", "doomed"])
        .assert()
        .success();
    raycoon(home.path())
        .args(["config", "add", TROJAN_URI, "--group", "doomed"])
        .assert()
        .success();
    raycoon(home.path())
        .args(["group", "delete", "doomed"])
        .assert()
        .success();
    raycoon(home.path())
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No configs found"));
}

#[test]
fn test_requires_target_or_all() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .arg("test")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--all"));
}

#[test]
fn test_rejects_unknown_strategy() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .args(["config", "add", TROJAN_URI])
        .assert()
        .success();
    raycoon(home.path())
        .args(["test", "CliTest", "--strategy", "icmp"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown test strategy"));
}

#[test]
fn test_history_empty() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .args(["config", "add", TROJAN_URI])
        .assert()
        .success();
    raycoon(home.path())
        .args(["test", "history", "CliTest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No latency records"));
}

#[test]
fn sub_update_requires_group_or_all() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .args(["sub", "update"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--all"));
}

#[test]
fn sub_status_without_subscriptions() {
    let home = tempfile::tempdir().unwrap();
    raycoon(home.path())
        .args(["sub", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No groups have subscription URLs"));
}
