//! Smoke tests -- verify the binary runs and each subcommand is wired up.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn sentinel() -> Command {
    let mut cmd = Command::cargo_bin("sentinel").unwrap();
    cmd.env_remove("SENTINEL_CONFIG").env("RUST_LOG", "off");
    cmd
}

fn json_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_cli_help() {
    sentinel()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Automated threat triage"));
}

#[test]
fn test_cli_version() {
    sentinel()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sentinel"));
}

#[test]
fn test_serve_subcommand_exists() {
    sentinel().args(["serve", "--help"]).assert().success();
}

#[test]
fn test_config_prints_defaults() {
    sentinel()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("threat_threshold = 7.0"))
        .stdout(predicate::str::contains("[ledger]"));
}

#[test]
fn test_missing_config_file_fails() {
    sentinel()
        .args(["--config", "/nonexistent/sentinel.toml", "config"])
        .assert()
        .failure();
}

#[test]
fn test_analyze_malware_event() {
    let file = json_file(r#"{ "source": "x", "data": "malicious_pattern present" }"#);
    sentinel()
        .arg("analyze")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""topic":"threat:detected""#))
        .stdout(predicate::str::contains("malware_signature"))
        .stdout(predicate::str::contains(r#""topic":"response:completed""#))
        .stdout(predicate::str::contains("isolate_host"));
}

#[test]
fn test_analyze_benign_event_prints_nothing() {
    let file = json_file(r#"{ "source": "web", "cpu_usage": 55 }"#);
    sentinel()
        .arg("analyze")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_watch_reads_ndjson_from_stdin() {
    sentinel()
        .arg("watch")
        .write_stdin("{\"cpu_usage\": 500}\nnot json\n{\"data\": \"excessive_requests\"}\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("ANOMALY DETECTED: cpu_usage (high"))
        .stdout(predicate::str::contains("THREAT ALERT: dos_attack"))
        .stdout(predicate::str::contains("RESPONSE COMPLETED"));
}

#[test]
fn test_health_report() {
    let file = json_file(
        r#"[
            { "agent_id": "a", "name": "alpha", "response_time_ms": 120 },
            { "agent_id": "b", "name": "beta", "response_time_ms": 3000 }
        ]"#,
    );
    sentinel()
        .arg("health")
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Total Agents: 2"))
        .stdout(predicate::str::contains("Agent beta is degraded"));
}
