//! CLI contract tests.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;

fn main_source() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/main.rs");
    match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(err) => panic!("main source should load from {}: {err}", path.display()),
    }
}

fn zapdesk() -> Command {
    let mut cmd = Command::cargo_bin("zapdesk").expect("binary should build");
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn main_defines_primary_subcommands() {
    let source = main_source();
    assert!(source.contains("Start"));
    assert!(source.contains("Link"));
    assert!(source.contains("CheckConfig"));
}

#[test]
fn check_config_accepts_missing_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let output = zapdesk()
        .args(["check-config", "--config-dir"])
        .arg(tmp.path())
        .output()
        .expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("http://127.0.0.1:3001"));
    assert!(stdout.contains("NLU:              rules"));
    assert!(stdout.contains("Config OK"));
}

#[test]
fn check_config_rejects_invalid_bridge_url() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    fs::write(
        tmp.path().join("config.toml"),
        "[whatsapp]\nbridge_url = \"not a url\"\n",
    )
    .expect("write config");

    let output = zapdesk()
        .args(["check-config", "--config-dir"])
        .arg(tmp.path())
        .output()
        .expect("run");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("bridge_url"), "stderr: {stderr}");
}

#[test]
fn link_stores_canonical_phone() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let output = zapdesk()
        .args(["link", "(11) 98765-4321", "acct-42", "--config-dir"])
        .arg(tmp.path())
        .output()
        .expect("run");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Linked 5511987654321 to account acct-42."));
    assert!(tmp.path().join("zapdesk.db").exists());
}

#[test]
fn link_rejects_short_phone() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let output = zapdesk()
        .args(["link", "123", "acct-42", "--config-dir"])
        .arg(tmp.path())
        .output()
        .expect("run");
    assert!(!output.status.success());
}
