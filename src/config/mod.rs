//! Controller configuration from code, the environment or a TOML file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{CourierError, Result};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Settings for one [`RequestController`](crate::controller::RequestController).
///
/// # Example
/// ```
/// use courier::config::ControllerConfig;
///
/// let config = ControllerConfig::builder()
///     .base_url("https://api.example.com/v1")
///     .request_timeout_secs(30)
///     .build();
/// assert_eq!(config.credential_identifier(), "courier:api.example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[builder(into)]
    pub base_url: String,
    /// Merged into every request before the request's own headers.
    #[builder(default)]
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    /// Process-wide User-Agent override, applied when the controller is built.
    #[builder(into)]
    pub user_agent: Option<String>,
    /// Key for the credential store. Derived from the base URL host when unset.
    #[builder(into)]
    pub credential_identifier: Option<String>,
    /// Where downloads without an explicit destination land.
    #[builder(into)]
    pub download_directory: Option<PathBuf>,
    #[builder(default = DEFAULT_TIMEOUT_SECS)]
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Send every data request through the memory-only session.
    #[builder(default)]
    #[serde(default)]
    pub ephemeral_data: bool,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ControllerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::builder().base_url(base_url).build()
    }

    /// Load from `COURIER_*` environment variables, reading `.env` first if
    /// present. `COURIER_BASE_URL` is required.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let base_url = std::env::var("COURIER_BASE_URL").map_err(|_| {
            CourierError::Configuration("COURIER_BASE_URL is not set".to_string())
        })?;
        let mut config = Self::new(base_url);
        if let Ok(agent) = std::env::var("COURIER_USER_AGENT") {
            config.user_agent = Some(agent);
        }
        if let Ok(timeout) = std::env::var("COURIER_TIMEOUT_SECS") {
            config.request_timeout_secs = timeout.trim().parse().map_err(|_| {
                CourierError::Configuration(format!("COURIER_TIMEOUT_SECS is not a number: {timeout}"))
            })?;
        }
        if let Ok(dir) = std::env::var("COURIER_DOWNLOAD_DIR") {
            config.download_directory = Some(PathBuf::from(dir));
        }
        if let Ok(identifier) = std::env::var("COURIER_CREDENTIAL_ID") {
            config.credential_identifier = Some(identifier);
        }
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| CourierError::Configuration(err.to_string()))
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|err| CourierError::Serialization(err.to_string()))
    }

    pub fn parsed_base_url(&self) -> Result<Url> {
        Url::parse(&self.base_url)
            .map_err(|err| CourierError::Configuration(format!("invalid base URL {}: {err}", self.base_url)))
    }

    /// The configured identifier, or `courier:<host>` from the base URL.
    pub fn credential_identifier(&self) -> String {
        if let Some(identifier) = &self.credential_identifier {
            return identifier.clone();
        }
        let host = Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "default".to_string());
        format!("courier:{host}")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_directory(&self) -> PathBuf {
        self.download_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
