//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::ServerError;

/// Where the gRPC server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listen {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(PathBuf),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: Listen,

    /// HTTP/2 keepalive ping interval.
    pub keepalive_interval: Duration,

    /// How long to wait for a keepalive ack.
    pub keepalive_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::tcp(SocketAddr::from(([127, 0, 0, 1], 1234)))
    }
}

impl ServerConfig {
    /// Create a new server config with TCP transport.
    pub const fn tcp(addr: SocketAddr) -> Self {
        Self {
            listen: Listen::Tcp(addr),
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
        }
    }

    /// Create a new server config with Unix socket transport.
    #[cfg(unix)]
    pub fn unix(path: PathBuf) -> Self {
        Self {
            listen: Listen::Unix(path),
            ..Self::default()
        }
    }

    /// Build from the plugin manager's `--protocol` and `--address` flags.
    pub fn from_protocol(protocol: &str, address: &str) -> Result<Self, ServerError> {
        match protocol {
            "tcp" => {
                let addr = address.parse::<SocketAddr>().map_err(|e| {
                    ServerError::Config(format!("invalid TCP address {address:?}: {e}"))
                })?;
                Ok(Self::tcp(addr))
            }
            #[cfg(unix)]
            "unix" => {
                if address.is_empty() {
                    return Err(ServerError::Config("empty Unix socket path".to_string()));
                }
                Ok(Self::unix(PathBuf::from(address)))
            }
            other => Err(ServerError::Config(format!(
                "unsupported protocol {other:?}"
            ))),
        }
    }
}
