use serde::Deserialize;
use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{Connection, SyncConnection};

/// Timeout applied to connecting, reading and writing, unless overridden
/// with [Client::with_timeout]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Where the daemon's control socket lives.
///
/// When deserialized, the presence of `path` selects the unix socket,
/// otherwise `host` and `port` are expected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Endpoint {
    Unix { path: PathBuf },
    Tcp { host: String, port: u16 },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Unix { path } => write!(f, "unix:{}", path.display()),
            Endpoint::Tcp { host, port } => write!(f, "tcp:{}:{}", host, port),
        }
    }
}

/// A bird client instance. Requests are made on a [Connection] or
/// [SyncConnection] created from this client.
///
/// Creating a connection does no I/O: the socket is opened on the first
/// request, so every failure, connecting included, surfaces as a failed
/// [crate::Reply].
#[derive(Debug, Clone)]
pub struct Client {
    endpoint: Endpoint,
    timeout: Duration,
}

impl Client {
    /// Creates a new [Client] using `unix_socket` file.
    pub fn for_unix_socket<P: AsRef<Path>>(unix_socket: P) -> Self {
        Self::for_endpoint(Endpoint::Unix {
            path: unix_socket.as_ref().to_owned(),
        })
    }

    /// Creates a new [Client] talking TCP to `host:port`
    pub fn for_tcp(host: impl Into<String>, port: u16) -> Self {
        Self::for_endpoint(Endpoint::Tcp {
            host: host.into(),
            port,
        })
    }

    pub fn for_endpoint(endpoint: Endpoint) -> Self {
        Client {
            endpoint,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides [DEFAULT_TIMEOUT]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Creates a new async [Connection]. You can open multiple connections
    /// to the same client, each with their own independent workflow.
    pub fn connection(&self) -> Connection {
        Connection::new(self.endpoint.clone(), self.timeout)
    }

    /// Creates a new blocking [SyncConnection].
    pub fn sync_connection(&self) -> SyncConnection {
        SyncConnection::new(self.endpoint.clone(), self.timeout)
    }
}
