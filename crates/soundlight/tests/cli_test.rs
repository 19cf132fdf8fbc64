//! Integration tests for the `soundlight` CLI binary.
//!
//! Argument parsing, help output, completions, and error handling run
//! without any network. The account-backed cases use a wiremock server.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `soundlight` binary with env isolation.
///
/// Clears all `SOUNDLIGHT_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn soundlight_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("soundlight");
    cmd.env("HOME", "/tmp/soundlight-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/soundlight-cli-test-nonexistent")
        .env_remove("SOUNDLIGHT_PROFILE")
        .env_remove("SOUNDLIGHT_EMAIL")
        .env_remove("SOUNDLIGHT_PASSWORD")
        .env_remove("SOUNDLIGHT_OUTPUT")
        .env_remove("SOUNDLIGHT_TIMEOUT")
        .env_remove("SOUNDLIGHT_NO_KEYRING")
        .env_remove("SOUNDLIGHT_DEFAULT_PROFILE");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// Account service with one speaker attached to one profile.
async fn account_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_partial_json(json!({ "email": "parent@example.com" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/babies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "babies": [{
                "uid": "baby-1",
                "name": "Nursery",
                "speaker": {
                    "attached_to_speaker": true,
                    "speaker": { "uid": "spk-1", "name": "Nursery Speaker" }
                }
            }]
        })))
        .mount(&server)
        .await;
    server
}

/// Run the binary against `server` with env-only configuration.
async fn run_against(server: &MockServer, args: &'static [&'static str]) -> std::process::Output {
    let api_url = server.uri();
    tokio::task::spawn_blocking(move || {
        soundlight_cmd()
            .args(["--no-keyring", "--color", "never"])
            .args(args)
            .env("SOUNDLIGHT_EMAIL", "parent@example.com")
            .env("SOUNDLIGHT_PASSWORD", "hunter2")
            .env("SOUNDLIGHT_PROFILES__DEFAULT__API_URL", api_url)
            .output()
            .unwrap()
    })
    .await
    .unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = soundlight_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(
        text.contains("Usage"),
        "Expected 'Usage' in output:\n{text}"
    );
}

#[test]
fn test_help_flag() {
    soundlight_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("Sound + Light")
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("set"))
            .and(predicate::str::contains("watch")),
    );
}

#[test]
fn test_version_flag() {
    soundlight_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("soundlight"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    soundlight_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    soundlight_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Offline commands ────────────────────────────────────────────────

#[test]
fn test_sounds_lists_every_track() {
    soundlight_cmd()
        .arg("sounds")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("White Noise")
                .and(predicate::str::contains("Rain"))
                .and(predicate::str::contains("No sound")),
        );
}

#[test]
fn test_sounds_json() {
    let output = soundlight_cmd()
        .args(["sounds", "--output", "json-compact"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let names: Vec<String> = serde_json::from_slice(&output.stdout).unwrap();
    assert!(names.len() > 1);
    assert!(names.iter().any(|n| n == "White Noise"));
}

#[test]
fn test_config_show_no_config() {
    // `config show` falls back to the default config when no file exists.
    soundlight_cmd().args(["config", "show"]).assert().success();
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let output = soundlight_cmd().arg("foobar").output().unwrap();
    assert!(
        !output.status.success(),
        "Expected failure for invalid subcommand"
    );
    let text = combined_output(&output);
    assert!(
        text.contains("invalid") || text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_devices_without_config() {
    let output = soundlight_cmd().args(["devices", "list"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(
        text.contains("config") || text.contains("email"),
        "Expected a configuration hint:\n{text}"
    );
}

#[test]
fn test_unknown_profile() {
    let output = soundlight_cmd()
        .args(["--profile", "nursery", "devices"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(combined_output(&output).contains("nursery"));
}

#[test]
fn test_invalid_level() {
    let output = soundlight_cmd()
        .args(["set", "Nursery", "volume", "loud"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("65%"));
}

#[test]
fn test_out_of_range_level_rejected_before_login() {
    // No account is configured: the range check must fail first.
    let output = soundlight_cmd()
        .args(["set", "Nursery", "brightness", "150%"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("brightness"));
}

#[test]
fn test_unknown_sound_rejected() {
    let output = soundlight_cmd()
        .args(["set", "Nursery", "sound", "thunder"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Known sounds"));
}

// ── Subcommand help discovery ───────────────────────────────────────

#[test]
fn test_set_subcommands_exist() {
    soundlight_cmd()
        .args(["set", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("power")
                .and(predicate::str::contains("light"))
                .and(predicate::str::contains("brightness"))
                .and(predicate::str::contains("volume"))
                .and(predicate::str::contains("color"))
                .and(predicate::str::contains("sound")),
        );
}

#[test]
fn test_config_subcommands_exist() {
    soundlight_cmd()
        .args(["config", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("init")
                .and(predicate::str::contains("show"))
                .and(predicate::str::contains("profiles"))
                .and(predicate::str::contains("set-password")),
        );
}

// ── Against a mock account service ──────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_devices_json_from_account() {
    let server = account_server().await;
    let output = run_against(&server, &["devices", "--output", "json"]).await;
    assert!(output.status.success(), "{}", combined_output(&output));

    let devices: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(devices[0]["speaker_uid"], "spk-1");
    assert_eq!(devices[0]["speaker_name"], "Nursery Speaker");
    assert_eq!(devices[0]["baby_name"], "Nursery");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_devices_plain_from_account() {
    let server = account_server().await;
    let output = run_against(&server, &["devices", "--output", "plain"]).await;
    assert!(output.status.success(), "{}", combined_output(&output));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "spk-1");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_password_is_an_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let output = run_against(&server, &["devices"]).await;
    assert_eq!(output.status.code(), Some(3), "{}", combined_output(&output));
}
