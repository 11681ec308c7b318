//! Command line configuration
//!
//! Bind address, port, capacity and the optional idle timeout.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;

use crate::error::RelayError;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8888;

/// Default maximum number of concurrent connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 3;

/// Relay server configuration
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address to listen on (all interfaces by default)
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Maximum number of concurrently admitted connections
    #[arg(short, long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Close connections that send nothing for this many seconds
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: None,
        }
    }
}

impl Config {
    /// Socket address to bind
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Idle timeout, if enabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout.map(Duration::from_secs)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.max_connections == 0 {
            return Err(RelayError::InvalidConfig(
                "max connections must be greater than 0".to_string(),
            ));
        }
        if self.idle_timeout == Some(0) {
            return Err(RelayError::InvalidConfig(
                "idle timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}
