//! Tests for controller configuration.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use pretty_assertions::assert_eq;

use courier::config::ControllerConfig;
use courier::controller::RequestController;
use courier::error::CourierError;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 5] = [
    "COURIER_BASE_URL",
    "COURIER_USER_AGENT",
    "COURIER_TIMEOUT_SECS",
    "COURIER_DOWNLOAD_DIR",
    "COURIER_CREDENTIAL_ID",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn clear_env() {
    for key in CONFIG_ENV_VARS {
        std::env::remove_var(key);
    }
}

#[test]
fn from_env_reads_courier_variables() {
    let _lock = env_lock_guard();
    let _guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    clear_env();
    std::env::set_var("COURIER_BASE_URL", "https://api.example.com/v2");
    std::env::set_var("COURIER_USER_AGENT", "courier-tests/1.0");
    std::env::set_var("COURIER_TIMEOUT_SECS", " 45 ");
    std::env::set_var("COURIER_DOWNLOAD_DIR", "/var/tmp/courier");

    let config = ControllerConfig::from_env().unwrap();

    assert_eq!(config.base_url, "https://api.example.com/v2");
    assert_eq!(config.user_agent.as_deref(), Some("courier-tests/1.0"));
    assert_eq!(config.request_timeout(), Duration::from_secs(45));
    assert_eq!(
        config.download_directory(),
        std::path::PathBuf::from("/var/tmp/courier")
    );
    assert_eq!(config.credential_identifier(), "courier:api.example.com");
}

#[test]
fn from_env_requires_base_url() {
    let _lock = env_lock_guard();
    let _guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    clear_env();

    let err = ControllerConfig::from_env().unwrap_err();
    assert!(matches!(err, CourierError::Configuration(message) if message.contains("COURIER_BASE_URL")));
}

#[test]
fn from_env_rejects_non_numeric_timeout() {
    let _lock = env_lock_guard();
    let _guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    clear_env();
    std::env::set_var("COURIER_BASE_URL", "https://api.example.com");
    std::env::set_var("COURIER_TIMEOUT_SECS", "soon");

    assert!(matches!(
        ControllerConfig::from_env(),
        Err(CourierError::Configuration(_))
    ));
}

#[test]
fn explicit_credential_identifier_wins() {
    let _lock = env_lock_guard();
    let _guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    clear_env();
    std::env::set_var("COURIER_BASE_URL", "https://api.example.com");
    std::env::set_var("COURIER_CREDENTIAL_ID", "shared-login");

    let config = ControllerConfig::from_env().unwrap();
    assert_eq!(config.credential_identifier(), "shared-login");
}

#[test]
fn loads_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("courier.toml");
    std::fs::write(
        &path,
        r#"
base_url = "https://files.example.com"
request_timeout_secs = 10
ephemeral_data = true

[default_headers]
accept = "application/json"
"#,
    )
    .unwrap();

    let config = ControllerConfig::load_from_path(&path).unwrap();

    assert_eq!(config.base_url, "https://files.example.com");
    assert_eq!(config.request_timeout_secs, 10);
    assert!(config.ephemeral_data);
    assert_eq!(
        config.default_headers.get("accept").map(String::as_str),
        Some("application/json")
    );
    assert_eq!(config.user_agent, None);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ControllerConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, CourierError::Io(_)));
}

#[tokio::test]
async fn invalid_base_url_fails_controller_build() {
    assert!(matches!(
        RequestController::new(ControllerConfig::new("not a url")),
        Err(CourierError::Configuration(_))
    ));
}

#[test]
fn build_outside_a_runtime_needs_an_explicit_handle() {
    assert!(matches!(
        RequestController::new(ControllerConfig::new("https://api.example.com")),
        Err(CourierError::Configuration(_))
    ));
}
