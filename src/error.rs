//! Error taxonomy.
//!
//! Filter-level failures are not errors in the control-flow sense: a filter
//! that cannot finish its work records a [`StageStatus`](crate::StageStatus)
//! or produces an error [`Response`](crate::Response). The types here surface
//! the failures that callers must branch on: body buffering, upstream
//! connectivity, configuration and the listening socket.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Boxed error used by streaming bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Infrastructure failures: binding a port, accepting connections, loading config.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure to buffer a request body into a [`PoolEntry`](crate::PoolEntry).
#[derive(Debug, Error)]
pub enum BodyError {
    /// The body is larger than the configured limit. Nothing was buffered.
    #[error("body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("body read failed: {0}")]
    Read(#[source] BoxError),
}

impl From<io::Error> for BodyError {
    fn from(e: io::Error) -> Self {
        Self::Read(Box::new(e))
    }
}

/// Failure to establish a connection to an upstream.
///
/// The variants are distinct because retry and failover policy differ per
/// case; the transport itself never retries.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("resolving {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("connecting to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("connection to {addr} refused")]
    Refused {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connecting to {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

impl DialError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failure of a proxied exchange with an upstream.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream {upstream}: {source}")]
    Upstream {
        upstream: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("invalid upstream request: {0}")]
    Request(#[from] http::Error),
}

impl ProxyError {
    /// The dial failure behind this error, when the connection could not be
    /// established at all.
    pub fn dial_error(&self) -> Option<&DialError> {
        self.causes().find_map(|e| e.downcast_ref::<DialError>())
    }

    /// `true` for a dial timeout and for a connection that hit its deadline.
    pub fn is_timeout(&self) -> bool {
        if let Some(dial) = self.dial_error() {
            return dial.is_timeout();
        }
        self.causes()
            .filter_map(|e| e.downcast_ref::<io::Error>())
            .any(|e| e.kind() == io::ErrorKind::TimedOut)
    }

    fn causes(&self) -> impl Iterator<Item = &(dyn std::error::Error + 'static)> {
        let first = match self {
            Self::Upstream { source, .. } => Some(source as &(dyn std::error::Error + 'static)),
            Self::Request(_) => None,
        };
        std::iter::successors(first, |e| e.source())
    }
}

/// Failure to load or validate configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
