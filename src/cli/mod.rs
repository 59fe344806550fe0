//! CLI entry point for courier.

pub mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ControllerConfig;
use crate::error::{CourierError, Result};
use crate::request::HttpMethod;

/// Courier HTTP CLI
#[derive(Parser, Debug)]
#[command(name = "courier", version, about = "Courier HTTP request orchestration CLI")]
pub struct Cli {
    /// Base URL paths are resolved against (falls back to COURIER_BASE_URL)
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// User-Agent sent with every request
    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    /// Extra request header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", global = true)]
    pub headers: Vec<String>,

    /// Load settings from a TOML file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// GET a path and print the response
    Get(PathArgs),
    /// HEAD a path and print the response headers
    Head(PathArgs),
    /// DELETE a path
    Delete(PathArgs),
    /// Download a path to a file
    Download(DownloadArgs),
    /// Upload a file to a path
    Upload(UploadArgs),
}

#[derive(Args, Debug)]
pub struct PathArgs {
    /// Path relative to the base URL
    pub path: String,

    /// Query parameter as `key=value` (repeatable)
    #[arg(short, long = "query")]
    pub query: Vec<String>,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    pub path: String,

    /// Destination file (defaults to a temporary file in the download directory)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// File to upload
    pub file: PathBuf,

    /// Destination path relative to the base URL
    pub path: String,

    #[arg(long)]
    pub content_type: Option<String>,

    #[arg(short = 'X', long, default_value = "POST")]
    pub method: HttpMethod,
}

impl Cli {
    /// Settings from `--config`, else the environment, else `--base-url`;
    /// flags override whichever was loaded.
    pub fn controller_config(&self) -> Result<ControllerConfig> {
        let mut config = match (&self.config, &self.base_url) {
            (Some(path), _) => ControllerConfig::load_from_path(path)?,
            (None, Some(base_url)) => ControllerConfig::new(base_url.clone()),
            (None, None) => ControllerConfig::from_env()?,
        };
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(agent) = &self.user_agent {
            config.user_agent = Some(agent.clone());
        }
        for raw in &self.headers {
            let (name, value) = parse_header(raw)?;
            config.default_headers.insert(name, value);
        }
        Ok(config)
    }
}

pub fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| CourierError::InvalidRequest(format!("header must be `Name: value`: {raw}")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CourierError::InvalidRequest(format!("empty header name: {raw}")));
    }
    Ok((name.to_ascii_lowercase(), value.trim().to_string()))
}

pub fn parse_query(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(CourierError::InvalidRequest(format!("query must be `key=value`: {raw}"))),
    }
}
