//! Error types for the relay server
//!
//! Defines server-level errors and outbox send errors.
//! Uses thiserror for ergonomic error definitions.

use std::net::SocketAddr;

use thiserror::Error;

/// Server-level errors
///
/// Per-connection faults never show up here once a connection has been
/// admitted; the session contains them and tears itself down.
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO error on a connection that was never admitted
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The listening socket could not be bound (fatal at startup)
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Message send errors
///
/// Occurs when a recipient's outbox cannot take another message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The recipient is not keeping up; the message was dropped
    #[error("Outbox full")]
    OutboxFull,
}
