//! CLI integration tests
//!
//! Tests the portkeep CLI using assert_cmd. Every test points
//! PORTKEEP_HOME at a temporary directory.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const PROFILE: &str = r#"
[cluster]
name = "staging"

[[services]]
name = "db"
namespace = "prod"
ports = [5432]
targets = [{ name = "db-0", address = "127.0.0.1" }]

[[services]]
name = "cache"
targets = [{ name = "cache-0", address = "127.0.0.1" }]

[[services]]
name = "empty"
namespace = "prod"
"#;

fn portkeep(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("portkeep")
        .expect("Failed to locate portkeep binary - ensure it's built before running tests");
    cmd.env("PORTKEEP_HOME", home.path())
        .env_remove("PORTKEEP_PROFILE")
        .env_remove("RUST_LOG");
    cmd
}

fn write_profile(home: &TempDir) -> std::path::PathBuf {
    let path = home.path().join("profile.toml");
    std::fs::write(&path, PROFILE).unwrap();
    path
}

/// PID of a process that has already exited
fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    portkeep(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("portkeep"))
        .stdout(predicate::str::contains("connect"))
        .stdout(predicate::str::contains("daemon").not());
}

#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    portkeep(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("portkeep"));
}

#[test]
fn test_cli_connect_help() {
    let home = TempDir::new().unwrap();
    portkeep(&home)
        .args(["connect", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--foreground"))
        .stdout(predicate::str::contains("--local-port"));
}

#[test]
fn test_list_empty_registry() {
    let home = TempDir::new().unwrap();
    portkeep(&home)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No active tunnels"));
}

#[test]
fn test_list_json_empty_registry() {
    let home = TempDir::new().unwrap();
    portkeep(&home)
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}

#[test]
fn test_list_reconciles_dead_worker() {
    let home = TempDir::new().unwrap();
    let registry = home.path().join("connections.json");
    let records = format!(
        r#"[{{"pid":{},"name":"db","namespace":"prod","local_port":"5433","remote_port":5432,"target":"db-0","profile":"/tmp/p.toml","status":"active"}}]"#,
        dead_pid()
    );
    std::fs::write(&registry, records).unwrap();

    portkeep(&home)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No active tunnels"));

    portkeep(&home)
        .args(["list", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stopped"));

    let saved = std::fs::read_to_string(&registry).unwrap();
    assert!(saved.contains(r#""status": "stopped""#));
}

#[test]
fn test_disconnect_unknown_tunnel() {
    let home = TempDir::new().unwrap();
    portkeep(&home)
        .args(["disconnect", "db", "-n", "prod"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Connection not found: prod/db"));
    assert!(!home.path().join("connections.json").exists());
}

#[test]
fn test_errors_are_printed_with_marker() {
    let home = TempDir::new().unwrap();
    portkeep(&home)
        .args(["disconnect", "db", "-n", "prod"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("✗ "))
        .stderr(predicate::str::contains("Error:").not());
}

#[test]
fn test_disconnect_dead_worker_removes_record() {
    let home = TempDir::new().unwrap();
    let registry = home.path().join("connections.json");
    let records = format!(
        r#"[{{"pid":{},"name":"db","namespace":"prod","local_port":"5433","remote_port":5432,"target":"db-0","profile":"/tmp/p.toml","status":"active"}}]"#,
        dead_pid()
    );
    std::fs::write(&registry, records).unwrap();

    portkeep(&home)
        .args(["disconnect", "db", "--namespace", "prod"])
        .assert()
        .success()
        .stderr(predicate::str::contains("was not running"));

    let saved = std::fs::read_to_string(&registry).unwrap();
    assert_eq!(saved.trim(), "[]");
}

#[test]
fn test_services_lists_namespace() {
    let home = TempDir::new().unwrap();
    let profile = write_profile(&home);
    portkeep(&home)
        .args(["services", "-n", "prod", "-p"])
        .arg(&profile)
        .assert()
        .success()
        .stdout(predicate::str::contains("db"))
        .stdout(predicate::str::contains("5432"))
        .stdout(predicate::str::contains("cache").not());
}

#[test]
fn test_services_uses_profile_in_state_dir() {
    let home = TempDir::new().unwrap();
    write_profile(&home);
    portkeep(&home)
        .arg("services")
        .assert()
        .success()
        .stdout(predicate::str::contains("cache-0"));
}

#[test]
fn test_services_without_profile() {
    let home = TempDir::new().unwrap();
    portkeep(&home)
        .arg("services")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Profile not found"));
}

#[test]
fn test_connect_unknown_service() {
    let home = TempDir::new().unwrap();
    write_profile(&home);
    portkeep(&home)
        .args(["connect", "nope", "-n", "prod"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Service prod/nope not found"));
    assert!(!home.path().join("connections.json").exists());
}

#[test]
fn test_connect_service_without_targets() {
    let home = TempDir::new().unwrap();
    write_profile(&home);
    portkeep(&home)
        .args(["connect", "empty", "-n", "prod"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("has no targets"));
}

#[test]
fn test_daemon_requires_every_flag() {
    let home = TempDir::new().unwrap();
    portkeep(&home)
        .args([
            "daemon",
            "portforward",
            "--profile",
            "/tmp/p.toml",
            "--service",
            "db",
            "--target",
            "db-0",
            "--local-port",
            "5433",
            "--remote-port",
            "5432",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--namespace"));
}

#[test]
fn test_daemon_with_bad_profile_exits_nonzero_and_logs() {
    let home = TempDir::new().unwrap();
    portkeep(&home)
        .args([
            "daemon",
            "portforward",
            "--profile",
            "/nonexistent/profile.toml",
            "--namespace",
            "prod",
            "--service",
            "db",
            "--target",
            "db-0",
            "--local-port",
            "5433",
            "--remote-port",
            "5432",
        ])
        .assert()
        .failure();

    let log = std::fs::read_to_string(home.path().join("logs").join("prod_db.log")).unwrap();
    assert!(log.contains("Failed to load profile"));
}

#[test]
fn test_config_path_prints_state_dir() {
    let home = TempDir::new().unwrap();
    portkeep(&home)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(home.path().to_string_lossy().as_ref()));
}

#[test]
fn test_config_show_defaults() {
    let home = TempDir::new().unwrap();
    portkeep(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[supervisor]"))
        .stdout(predicate::str::contains("readiness_grace = 1000"))
        .stdout(predicate::str::contains("ready_timeout = 10"));
}

#[test]
fn test_config_show_reads_file() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("custom.toml");
    std::fs::write(&config, "[teardown]\nescalate_after = 3\n").unwrap();
    portkeep(&home)
        .args(["config", "show", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("escalate_after = 3"));
}

#[test]
fn test_invalid_config_is_reported() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join("config.toml"), "[supervisor\n").unwrap();
    portkeep(&home)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
