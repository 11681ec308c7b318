//! Connection struct definition
//!
//! Represents one admitted peer: its identity, remote address and the
//! outbox feeding its writer task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::ConnectionId;

/// Outbox capacity per connection
pub const OUTBOX_CAPACITY: usize = 256;

/// Lifetime drops after which a slow reader is asked to leave
pub const SLOW_CLIENT_DROP_LIMIT: u64 = 64;

/// Admitted connection handle
///
/// Clones share the same outbox and drop accounting. The registry keeps one
/// clone for broadcasting; the owning session keeps the other.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Remote address as reported at accept time
    pub addr: SocketAddr,
    /// Server → Client message channel
    sender: mpsc::Sender<ServerMessage>,
    /// Messages discarded because the outbox was full
    drops: Arc<AtomicU64>,
    /// Raised once `drops` reaches the limit; only the owning session waits on it
    evict: Arc<Notify>,
}

impl Connection {
    /// Create a connection around an existing outbox sender
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            addr,
            sender,
            drops: Arc::new(AtomicU64::new(0)),
            evict: Arc::new(Notify::new()),
        }
    }

    /// Create a connection together with its outbox receiver
    pub fn with_outbox(addr: SocketAddr) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        (Self::new(ConnectionId::new(), addr, tx), rx)
    }

    /// Queue a message for this connection without waiting
    ///
    /// A full outbox drops the message and counts it; once the count reaches
    /// [`SLOW_CLIENT_DROP_LIMIT`] the owning session is told to close.
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let drops = self.drops.fetch_add(1, Ordering::Relaxed) + 1;
                if drops >= SLOW_CLIENT_DROP_LIMIT {
                    self.evict.notify_one();
                }
                Err(SendError::OutboxFull)
            }
            Err(TrySendError::Closed(_)) => Err(SendError::ChannelClosed),
        }
    }

    /// Messages dropped so far
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// Resolves once this connection has dropped too many messages
    pub async fn evicted(&self) {
        self.evict.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_connection_send() {
        let (conn, mut rx) = Connection::with_outbox(addr());

        conn.send(ServerMessage::Welcome { members: 1 }).unwrap();

        assert_eq!(rx.recv().await, Some(ServerMessage::Welcome { members: 1 }));
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_send_after_close() {
        let (conn, rx) = Connection::with_outbox(addr());
        drop(rx);

        assert_eq!(conn.send(ServerMessage::Refused), Err(SendError::ChannelClosed));
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn test_full_outbox_drops_without_waiting() {
        let (conn, _rx) = Connection::with_outbox(addr());
        for _ in 0..OUTBOX_CAPACITY {
            conn.send(ServerMessage::Refused).unwrap();
        }

        assert_eq!(conn.send(ServerMessage::Refused), Err(SendError::OutboxFull));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn test_slow_reader_is_evicted_after_limit() {
        let (conn, _rx) = Connection::with_outbox(addr());
        let observer = conn.clone();
        for _ in 0..OUTBOX_CAPACITY {
            conn.send(ServerMessage::Refused).unwrap();
        }

        for _ in 0..SLOW_CLIENT_DROP_LIMIT - 1 {
            let _ = conn.send(ServerMessage::Refused);
        }
        let early = tokio::time::timeout(Duration::from_millis(50), observer.evicted()).await;
        assert!(early.is_err(), "evicted before reaching the limit");

        let _ = conn.send(ServerMessage::Refused);
        tokio::time::timeout(Duration::from_secs(1), observer.evicted())
            .await
            .expect("eviction after reaching the limit");
        assert_eq!(observer.drop_count(), SLOW_CLIENT_DROP_LIMIT);
    }
}
