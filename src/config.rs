use crate::error::{RelayError, Result};
use crate::models::Upstream;
use crate::proxy::forwarder::ForwarderConfig;
use crate::proxy::headers::InjectedHeaders;
use std::env;
use std::time::Duration;

/// Upstream used when `RELAY_UPSTREAMS` is not set
pub const DEFAULT_UPSTREAM: &str = "163.172.222.64:5836";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay server configuration
    pub relay: RelayConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Host to bind to (default: 127.0.0.1)
    pub host: String,
    /// Port to bind to, 0 picks a free port (default: 0)
    pub port: u16,
    /// Upstream proxy pool
    pub upstreams: Vec<Upstream>,
    /// Upstream connection timeout in seconds
    pub connect_timeout: u64,
    /// Relay read buffer size in bytes
    pub buffer_size: usize,
    /// Accept errors tolerated before the server gives up
    pub max_errors: u32,
    /// Extra headers injected into every request head
    pub headers: InjectedHeaders,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            relay: RelayConfig {
                host: get_env_or("RELAY_HOST", "127.0.0.1"),
                port: get_env_or("RELAY_PORT", "0").parse().map_err(|_| {
                    RelayError::InvalidConfig("RELAY_PORT must be a valid port number".into())
                })?,
                upstreams: parse_upstreams()?,
                connect_timeout: get_env_or("RELAY_CONNECT_TIMEOUT", "10")
                    .parse::<u64>()
                    .ok()
                    .filter(|&secs| secs > 0)
                    .unwrap_or(10),
                buffer_size: get_env_or("RELAY_BUFFER_SIZE", "4096")
                    .parse::<usize>()
                    .ok()
                    .filter(|&size| size > 0)
                    .unwrap_or(4096),
                max_errors: get_env_or("RELAY_MAX_ERRORS", "100")
                    .parse()
                    .unwrap_or(100),
                headers: InjectedHeaders::parse(&get_env_or("RELAY_HEADERS", ""))?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

impl RelayConfig {
    /// Get the configured listen address
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn forwarder_config(&self) -> ForwarderConfig {
        ForwarderConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            buffer_size: self.buffer_size,
            headers: self.headers.clone(),
        }
    }
}

fn parse_upstreams() -> Result<Vec<Upstream>> {
    let username = env::var("RELAY_UPSTREAM_USERNAME").ok();
    let password = env::var("RELAY_UPSTREAM_PASSWORD").ok();

    let raw = get_env_or("RELAY_UPSTREAMS", DEFAULT_UPSTREAM);
    let upstreams = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(index, entry)| {
            Upstream::parse(index as i64 + 1, entry)
                .map(|u| u.with_default_credentials(username.as_deref(), password.as_deref()))
                .map_err(|e| RelayError::InvalidConfig(format!("RELAY_UPSTREAMS: {}", e)))
        })
        .collect::<Result<Vec<_>>>()?;

    if upstreams.is_empty() {
        return Err(RelayError::InvalidConfig(
            "RELAY_UPSTREAMS must name at least one upstream".into(),
        ));
    }

    Ok(upstreams)
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
