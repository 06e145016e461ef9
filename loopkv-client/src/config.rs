use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default server host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default server port.
pub const DEFAULT_PORT: u16 = 6379;
/// Default unix socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/redis/redis.sock";

/// Where the event loop connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// TCP host and port.
    Tcp { host: String, port: u16 },
    /// Unix domain socket path.
    Unix { path: PathBuf },
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix { path: path.into() }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Endpoint::tcp(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "{host}:{port}"),
            Endpoint::Unix { path } => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Configuration for the client runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound on the connect handshake. `None` waits for the OS.
    pub connect_timeout: Option<Duration>,
    /// How long shutdown waits for replies to commands already sent.
    pub shutdown_grace: Duration,
    /// Initial no-wait mode (see `Client::no_wait`).
    pub no_wait: bool,
    /// Disable Nagle on TCP connections.
    pub nodelay: bool,
    /// Initial capacity of the reply buffer.
    pub read_buffer_capacity: usize,
    /// Initial capacity of the request buffer.
    pub write_buffer_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connect_timeout: Some(Duration::from_secs(5)),
            shutdown_grace: Duration::from_millis(100),
            no_wait: false,
            nodelay: true,
            read_buffer_capacity: 16 * 1024,
            write_buffer_capacity: 16 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_display() {
        assert_eq!(Endpoint::default().to_string(), "localhost:6379");
        assert_eq!(Endpoint::unix("/tmp/kv.sock").to_string(), "unix:/tmp/kv.sock");
    }

    #[test]
    fn default_grace_is_bounded() {
        let config = ClientConfig::default();
        assert!(config.shutdown_grace > Duration::ZERO);
        assert!(config.shutdown_grace <= Duration::from_secs(1));
        assert!(!config.no_wait);
    }
}
