//! Environment-driven broker configuration

use crate::upstream::API_ENDPOINT;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_CLIENT_BIND: &str = "127.0.0.1:7314";
pub const DEFAULT_WEBHOOK_BIND: &str = "0.0.0.0:7313";
pub const DEFAULT_WEBHOOK_PATH: &str = "/webhook";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Bot API token
    pub token: String,
    /// Address broker clients connect to
    pub client_bind: SocketAddr,
    /// Address the webhook HTTP server listens on
    pub webhook_bind: SocketAddr,
    pub webhook_path: String,
    /// Public URL registered with Telegram at startup (None = leave as is)
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub api_endpoint: String,
    /// Per-request timeout for upstream calls
    pub upstream_timeout: Duration,
    /// A client write slower than this evicts the client
    pub write_timeout: Duration,
}

/// Read a variable, treating blank values as unset
fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_addr(name: &'static str, default: &str) -> Result<SocketAddr, ConfigError> {
    let value = env_var(name).unwrap_or_else(|| default.to_string());
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

fn parse_secs(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match env_var(name) {
        None => Ok(Duration::from_secs(default)),
        Some(value) => match value.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::Invalid { name, value }),
        },
    }
}

impl BrokerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let token = env_var("TELEGRAM_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_TOKEN"))?;

        let webhook_path = env_var("WEBHOOK_PATH").unwrap_or_else(|| DEFAULT_WEBHOOK_PATH.to_string());
        let webhook_path = if webhook_path.starts_with('/') {
            webhook_path
        } else {
            format!("/{}", webhook_path)
        };

        Ok(Self {
            token,
            client_bind: parse_addr("CLIENT_BIND", DEFAULT_CLIENT_BIND)?,
            webhook_bind: parse_addr("WEBHOOK_BIND", DEFAULT_WEBHOOK_BIND)?,
            webhook_path,
            webhook_url: env_var("WEBHOOK_URL"),
            webhook_secret: env_var("WEBHOOK_SECRET"),
            api_endpoint: env_var("TELEGRAM_API_ENDPOINT")
                .unwrap_or_else(|| API_ENDPOINT.to_string()),
            upstream_timeout: parse_secs("UPSTREAM_TIMEOUT", 60)?,
            write_timeout: parse_secs("CLIENT_WRITE_TIMEOUT", 10)?,
        })
    }
}
