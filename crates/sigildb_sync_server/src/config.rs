//! Server configuration.

use sigildb_sync_engine::SessionConfig;
use std::net::SocketAddr;
use std::time::Duration;

/// Default port for `sigildb serve`.
pub const DEFAULT_PORT: u16 = 7004;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to. Port 0 picks a free port.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// How long a new connection may take to send its first frame.
    pub first_frame_timeout: Duration,
    /// Settings for each accepted session.
    pub session: SessionConfig,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 1000,
            first_frame_timeout: Duration::from_secs(30),
            session: SessionConfig::default(),
        }
    }

    /// Sets the maximum concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Sets the first-frame timeout.
    pub fn with_first_frame_timeout(mut self, timeout: Duration) -> Self {
        self.first_frame_timeout = timeout;
        self
    }

    /// Sets the session configuration.
    pub fn with_session_config(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
    }
}
