//! TOML configuration.
//!
//! Every field has a default, so a minimal file only names what differs:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0:8080"
//!
//! [upstream]
//! host = "backend.internal"
//! port = 9000
//! timeout_ms = 2000
//! ```
//!
//! Parsing is syntactic only; [`Config::validate`] does the semantic checks.
//! [`Config::load`] and [`Config::from_toml_str`] run both.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pool::{BufferPool, DEFAULT_MAX_BODY_SIZE};
use crate::upstream::{
    UpstreamTransport, DEFAULT_DNS_CACHE_DURATION, DEFAULT_MAX_IDLE_PER_HOST, DEFAULT_TIMEOUT,
};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub buffer_pool: BufferPoolConfig,
    /// Absent when the pipeline has no proxy stage.
    pub upstream: Option<UpstreamConfig>,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.addr()?;

        let pool = &self.buffer_pool;
        if pool.buffer_size == 0 {
            return Err(invalid("buffer_pool.buffer_size", "must be greater than 0"));
        }
        if pool.max_body_size == 0 {
            return Err(invalid("buffer_pool.max_body_size", "must be greater than 0"));
        }

        if let Some(upstream) = &self.upstream {
            if upstream.host.is_empty() {
                return Err(invalid("upstream.host", "must not be empty"));
            }
            if upstream.port == 0 {
                return Err(invalid("upstream.port", "must not be 0"));
            }
            if upstream.timeout_ms == 0 {
                return Err(invalid("upstream.timeout_ms", "must be greater than 0"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.into() }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|e| invalid("server.bind_address", format!("{}: {e}", self.bind_address)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:8080".to_string() }
    }
}

/// Sizing of the shared request-body pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Idle buffers kept for reuse.
    pub capacity: usize,
    /// Initial size of a fresh buffer.
    pub buffer_size: usize,
    /// Largest body accepted for buffering.
    pub max_body_size: usize,
}

impl BufferPoolConfig {
    pub fn build(&self) -> BufferPool {
        BufferPool::new(self.capacity, self.buffer_size)
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            buffer_size: 1024,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// The backend a proxy pipeline forwards to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,
    /// How long a resolved address is reused; 0 resolves on every dial.
    #[serde(default = "default_dns_cache_secs")]
    pub dns_cache_secs: u64,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn build_transport(&self) -> UpstreamTransport {
        UpstreamTransport::builder(self.host.clone(), self.port)
            .timeout(self.timeout())
            .max_idle_per_host(self.max_idle_per_host)
            .dns_cache_duration(Duration::from_secs(self.dns_cache_secs))
            .build()
    }
}

fn default_timeout_ms() -> u64 { DEFAULT_TIMEOUT.as_millis() as u64 }
fn default_max_idle_per_host() -> usize { DEFAULT_MAX_IDLE_PER_HOST }
fn default_dns_cache_secs() -> u64 { DEFAULT_DNS_CACHE_DURATION.as_secs() }
