//! Binary-level integration specs for `vmnoded`, run against the real
//! compiled CLI via `assert_cmd`. Structural port of the teacher's
//! `tests/specs.rs` workspace-level test entry point (one root test
//! binary that exercises the shipped binary end to end rather than its
//! internal crates).

use std::path::Path;

use assert_cmd::Command;

fn vmnoded() -> Command {
    Command::cargo_bin("vmnoded").expect("vmnoded binary should build")
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("vmnoded.toml");
    std::fs::write(&path, body).unwrap();
    path
}

const MINIMAL_CONFIG: &str = r#"
tasks_root = "TASKS_ROOT"

[resultserver]
listen_ip = "127.0.0.1"
listen_port = 29042

[[machine]]
name = "win10-1"
machinery = "libvirt"
label = "cuckoo-win10-1"
ip = "192.168.56.101"
agent_port = 8000
platform = "windows"
os_version = "10"
arch = "amd64"
tags = ["office"]
"#;

#[test]
fn check_config_accepts_a_valid_config() {
    let dir = tempfile::tempdir().unwrap();
    let body = MINIMAL_CONFIG.replace("TASKS_ROOT", &dir.path().join("tasks").display().to_string());
    let path = write_config(dir.path(), &body);

    let output = vmnoded()
        .args(["check-config", path.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1 machine(s) configured"), "stdout: {stdout}");
}

#[test]
fn check_config_rejects_a_config_with_no_machines() {
    let dir = tempfile::tempdir().unwrap();
    let body = r#"
tasks_root = "/tmp/doesnotmatter"

[resultserver]
listen_ip = "127.0.0.1"
listen_port = 29043
"#;
    let path = write_config(dir.path(), body);

    vmnoded()
        .args(["check-config", path.to_str().unwrap()])
        .assert()
        .failure();
}

#[test]
fn check_config_rejects_an_unreadable_path() {
    vmnoded()
        .args(["check-config", "/nonexistent/vmnoded.toml"])
        .assert()
        .failure();
}

#[test]
fn cli_with_no_subcommand_shows_usage() {
    let output = vmnoded().output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage:"), "stderr: {stderr}");
}
