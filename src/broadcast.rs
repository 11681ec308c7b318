//! Message fan-out to registered connections.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::SendError;
use crate::message::ServerMessage;
use crate::registry::ConnectionRegistry;
use crate::types::ConnectionId;

/// Per-broadcast delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Recipients whose outbox accepted the message
    pub delivered: usize,
    /// Recipients whose outbox was full or whose writer had stopped
    pub failed: usize,
}

/// Delivers messages to every registered connection except an optional sender.
///
/// Only ever reads the registry. A failed recipient stays registered until its
/// own session notices the fault.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send `msg` to all members other than `excluding`
    ///
    /// Never waits on a recipient: a full or closed outbox is counted as a
    /// failure for that recipient only.
    pub fn broadcast(&self, msg: &ServerMessage, excluding: Option<ConnectionId>) -> Delivery {
        let mut delivery = Delivery::default();
        for conn in self.registry.snapshot() {
            if Some(conn.id) == excluding {
                continue;
            }
            match conn.send(msg.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(SendError::OutboxFull) => {
                    warn!(
                        "Dropped message for slow client {} ({} total drops)",
                        conn.addr,
                        conn.drop_count()
                    );
                    delivery.failed += 1;
                }
                Err(e) => {
                    debug!("Broadcast to {} ({}) failed: {}", conn.addr, conn.id, e);
                    delivery.failed += 1;
                }
            }
        }
        delivery
    }
}
