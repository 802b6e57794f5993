//! End-to-end tests
//!
//! These tests start real detached workers through the portkeep binary
//! and push traffic through them to a local echo server.
//!
//! **These tests are ignored by default** because they require:
//! - Free local ports
//! - Permission to spawn and signal background processes
//!
//! Run with: `cargo test --test e2e_test -- --ignored`

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Echo server on an ephemeral port, running on a background thread
fn start_echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind echo server");
    let port = listener.local_addr().unwrap().port();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            std::thread::spawn(move || {
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

struct TestHome {
    dir: TempDir,
    profile: PathBuf,
}

impl TestHome {
    fn new(echo_port: u16) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let profile = dir.path().join("profile.toml");
        let contents = format!(
            r#"
[cluster]
name = "e2e"

[[services]]
name = "echo"
namespace = "test"
ports = [{}]
targets = [{{ name = "echo-0", address = "127.0.0.1" }}]
"#,
            echo_port
        );
        std::fs::write(&profile, contents).expect("Failed to write profile");
        Self { dir, profile }
    }

    fn portkeep(&self) -> Command {
        let mut cmd = Command::cargo_bin("portkeep").expect("Failed to locate portkeep binary");
        cmd.env("PORTKEEP_HOME", self.dir.path())
            .env("PORTKEEP_PROFILE", &self.profile)
            .env_remove("RUST_LOG");
        cmd
    }

    fn connect(&self, local_port: u16) -> assert_cmd::assert::Assert {
        self.portkeep()
            .args(["connect", "echo", "-n", "test", "-l"])
            .arg(local_port.to_string())
            .assert()
    }
}

impl Drop for TestHome {
    fn drop(&mut self) {
        // Best effort: never leave workers behind
        let _ = self
            .portkeep()
            .args(["disconnect", "echo", "-n", "test"])
            .output();
    }
}

fn round_trip(port: u16, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("Failed to reach tunnel");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream.write_all(payload).unwrap();
    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).unwrap();
    buf
}

#[test]
#[ignore]
fn test_connect_forward_disconnect() {
    let echo_port = start_echo_server();
    let local_port = free_port();
    let home = TestHome::new(echo_port);

    home.connect(local_port)
        .success()
        .stdout(predicate::str::contains("Connected test/echo"));

    assert_eq!(round_trip(local_port, b"through the tunnel"), b"through the tunnel");

    home.portkeep()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("echo"))
        .stdout(predicate::str::contains("active"));

    home.portkeep()
        .args(["disconnect", "echo", "-n", "test"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Disconnected test/echo"));

    home.portkeep()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No active tunnels"));

    // Give the worker a moment to release the port
    std::thread::sleep(Duration::from_millis(300));
    assert!(TcpStream::connect(("127.0.0.1", local_port)).is_err());
}

#[test]
#[ignore]
fn test_second_connect_is_rejected() {
    let echo_port = start_echo_server();
    let local_port = free_port();
    let home = TestHome::new(echo_port);

    home.connect(local_port).success();
    home.connect(free_port())
        .failure()
        .stderr(predicate::str::contains("already exists"));

    let registry = std::fs::read_to_string(home.dir.path().join("connections.json")).unwrap();
    assert_eq!(registry.matches("\"echo\"").count(), 1);
}

#[test]
#[ignore]
fn test_concurrent_connects_admit_one() {
    let echo_port = start_echo_server();
    let home = TestHome::new(echo_port);

    let outputs: Vec<std::process::Output> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let mut cmd = home.portkeep();
                cmd.args(["connect", "echo", "-n", "test", "-l"])
                    .arg(free_port().to_string());
                scope.spawn(move || cmd.output().unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let succeeded = outputs.iter().filter(|o| o.status.success()).count();
    assert_eq!(succeeded, 1);
    let rejected = outputs.iter().find(|o| !o.status.success()).unwrap();
    assert!(String::from_utf8_lossy(&rejected.stderr).contains("already exists"));

    let registry = std::fs::read_to_string(home.dir.path().join("connections.json")).unwrap();
    assert_eq!(registry.matches("\"echo\"").count(), 1);
}

#[test]
#[ignore]
fn test_port_in_use_is_start_failure() {
    let echo_port = start_echo_server();
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let taken_port = taken.local_addr().unwrap().port();
    let home = TestHome::new(echo_port);

    home.connect(taken_port)
        .failure()
        .stderr(predicate::str::contains("--foreground"));

    let log = std::fs::read_to_string(home.dir.path().join("logs").join("test_echo.log")).unwrap();
    assert!(log.contains("Failed to bind"));
    assert!(!home.dir.path().join("connections.json").exists()
        || std::fs::read_to_string(home.dir.path().join("connections.json"))
            .unwrap()
            .trim()
            == "[]");
}

#[test]
#[ignore]
fn test_killed_worker_is_reconciled() {
    let echo_port = start_echo_server();
    let local_port = free_port();
    let home = TestHome::new(echo_port);

    home.connect(local_port).success();

    let registry = std::fs::read_to_string(home.dir.path().join("connections.json")).unwrap();
    let records: serde_json::Value = serde_json::from_str(&registry).unwrap();
    let pid = records[0]["pid"].as_u64().unwrap();

    std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    std::thread::sleep(Duration::from_millis(300));

    home.portkeep()
        .args(["list", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stopped"));
}
