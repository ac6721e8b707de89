//! Test plan for the `agora-config` crate.
//!
//! These tests exercise the configuration loader across default handling,
//! file discovery, environment overrides, and relay validation.

use std::fs;
use std::path::{Path, PathBuf};

use serial_test::serial;
use tempfile::TempDir;

use agora_config::{load, AppConfig, AuthConfig, HttpConfig, RelayConfig};

const ENV_VARS_TO_RESET: &[&str] = &[
    "AGORA_CONFIG",
    "AGORA__AUTH__AUDIENCE",
    "AGORA__AUTH__ISSUER",
    "AGORA__AUTH__JWT_SECRET",
    "AGORA__DATABASE__MAX_CONNECTIONS",
    "AGORA__DATABASE__URL",
    "AGORA__HTTP__ADDRESS",
    "AGORA__HTTP__PORT",
    "AGORA__RELAY__BROADCAST_QUEUE_CAPACITY",
    "AGORA__RELAY__CONTROL_QUEUE_CAPACITY",
    "AGORA__RELAY__KEEPALIVE_INTERVAL_SECONDS",
    "AGORA__RELAY__MAX_FRAME_BYTES",
    "AGORA__RELAY__OUTBOUND_QUEUE_CAPACITY",
    "AGORA__RELAY__PONG_WAIT_SECONDS",
    "AGORA__RELAY__WRITE_WAIT_SECONDS",
];

struct TestContext {
    vars: Vec<(String, Option<String>)>,
    original_dir: Option<PathBuf>,
}

impl TestContext {
    fn new() -> Self {
        Self {
            vars: Vec::new(),
            original_dir: None,
        }
    }

    fn reset_environment(&mut self) {
        for key in ENV_VARS_TO_RESET {
            self.remove_var(key);
        }
    }

    fn set_var(&mut self, key: &str, value: impl AsRef<str>) {
        let previous = std::env::var(key).ok();
        std::env::set_var(key, value.as_ref());
        self.vars.push((key.to_string(), previous));
    }

    fn remove_var(&mut self, key: &str) {
        let previous = std::env::var(key).ok();
        std::env::remove_var(key);
        self.vars.push((key.to_string(), previous));
    }

    fn set_current_dir(&mut self, dir: &Path) {
        if self.original_dir.is_none() {
            self.original_dir =
                Some(std::env::current_dir().expect("failed to capture current directory"));
        }
        std::env::set_current_dir(dir).expect("failed to set current directory");
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Some(original) = self.original_dir.take() {
            let _ = std::env::set_current_dir(original);
        }

        while let Some((key, value)) = self.vars.pop() {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }
    }
}

fn write_config_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create config directories");
    }
    fs::write(path, contents).expect("failed to write config file");
}

fn isolated() -> (TempDir, TestContext) {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());
    (temp_dir, ctx)
}

#[test]
#[serial]
fn load_uses_default_values_when_no_files_found() {
    let (_dir, _ctx) = isolated();

    let config = load().expect("configuration load should succeed without files");
    let defaults = AppConfig::default();

    assert_eq!(config.http.address, defaults.http.address);
    assert_eq!(config.http.port, defaults.http.port);
    assert_eq!(config.database.url, defaults.database.url);
    assert_eq!(
        config.database.max_connections,
        defaults.database.max_connections
    );
    assert_eq!(config.auth.issuer, defaults.auth.issuer);
    assert_eq!(config.auth.audience, defaults.auth.audience);
    assert_eq!(
        config.relay.outbound_queue_capacity,
        defaults.relay.outbound_queue_capacity
    );
    assert_eq!(
        config.relay.keepalive_interval_seconds,
        defaults.relay.keepalive_interval_seconds
    );
}

#[test]
#[serial]
fn load_picks_first_available_file_in_search_order() {
    let (temp_dir, _ctx) = isolated();

    write_config_file(
        temp_dir.path(),
        "agora.toml",
        r#"
        [http]
        port = 4242
        "#,
    );
    write_config_file(
        temp_dir.path(),
        "config/agora.toml",
        r#"
        [http]
        port = 5151
        "#,
    );

    let config = load().expect("configuration load should pick the first file");
    assert_eq!(config.http.port, 4242);
}

#[test]
#[serial]
fn load_merges_partial_relay_section_with_defaults() {
    let (temp_dir, _ctx) = isolated();

    write_config_file(
        temp_dir.path(),
        "agora.toml",
        r#"
        [relay]
        outbound_queue_capacity = 8
        keepalive_interval_seconds = 5
        pong_wait_seconds = 7
        "#,
    );

    let config = load().expect("configuration load should succeed");
    let defaults = RelayConfig::default();

    assert_eq!(config.relay.outbound_queue_capacity, 8);
    assert_eq!(config.relay.keepalive_interval_seconds, 5);
    assert_eq!(config.relay.pong_wait_seconds, 7);
    assert_eq!(
        config.relay.broadcast_queue_capacity,
        defaults.broadcast_queue_capacity
    );
    assert_eq!(config.relay.max_frame_bytes, defaults.max_frame_bytes);
}

#[test]
#[serial]
fn load_applies_environment_overrides() {
    let (temp_dir, mut ctx) = isolated();

    write_config_file(
        temp_dir.path(),
        "agora.toml",
        r#"
        [http]
        port = 3030
        "#,
    );

    ctx.set_var("AGORA__HTTP__PORT", "8080");
    ctx.set_var("AGORA__AUTH__JWT_SECRET", "from-env");

    let config = load().expect("configuration load should honour env overrides");
    assert_eq!(config.http.port, 8080);
    assert_eq!(config.auth.jwt_secret, "from-env");
}

#[test]
#[serial]
fn load_reads_explicit_config_path() {
    let (temp_dir, mut ctx) = isolated();

    write_config_file(
        temp_dir.path(),
        "elsewhere/relay.toml",
        r#"
        [database]
        url = "sqlite://elsewhere.db"
        "#,
    );
    let explicit = temp_dir.path().join("elsewhere/relay.toml");
    ctx.set_var("AGORA_CONFIG", explicit.to_string_lossy());

    let config = load().expect("configuration load should use AGORA_CONFIG");
    assert_eq!(config.database.url, "sqlite://elsewhere.db");
}

#[test]
#[serial]
fn load_rejects_pong_wait_shorter_than_keepalive() {
    let (_dir, mut ctx) = isolated();

    ctx.set_var("AGORA__RELAY__KEEPALIVE_INTERVAL_SECONDS", "30");
    ctx.set_var("AGORA__RELAY__PONG_WAIT_SECONDS", "30");

    let error = load().expect_err("pong wait equal to keepalive must be rejected");
    assert!(
        format!("{error:#}").contains("pong_wait_seconds"),
        "unexpected error message: {error:#}"
    );
}

#[test]
#[serial]
fn load_rejects_zero_queue_capacity() {
    let (_dir, mut ctx) = isolated();

    ctx.set_var("AGORA__RELAY__OUTBOUND_QUEUE_CAPACITY", "0");

    assert!(load().is_err());
}

#[test]
#[serial]
fn load_errors_on_invalid_toml_contents() {
    let (temp_dir, _ctx) = isolated();

    write_config_file(
        temp_dir.path(),
        "agora.toml",
        r#"
        [http]
        port = "not-a-number
        "#,
    );

    let error = load().expect_err("invalid TOML should cause load to fail");
    let message = error.to_string();
    assert!(
        message.contains("invalid configuration") || message.contains("unable to build configuration"),
        "unexpected error message: {message}"
    );
}

#[test]
fn relay_config_defaults_match_keepalive_contract() {
    let defaults = RelayConfig::default();
    assert_eq!(defaults.outbound_queue_capacity, 256);
    assert_eq!(defaults.keepalive_interval_seconds, 54);
    assert_eq!(defaults.pong_wait_seconds, 60);
    assert!(defaults.validate().is_ok());
}

#[test]
fn auth_config_defaults_name_the_relay_audience() {
    let defaults = AuthConfig::default();
    assert_eq!(defaults.issuer, "agora");
    assert_eq!(defaults.audience, "agora-users");
}

#[test]
fn http_config_defaults_match_expected_host_and_port() {
    let defaults = HttpConfig::default();
    assert_eq!(defaults.address, "127.0.0.1");
    assert_eq!(defaults.port, 7070);
}
