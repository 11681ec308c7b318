//! Basic type definitions for the relay server
//!
//! Provides the `ConnectionId` newtype used as the registry key.

use uuid::Uuid;

/// Registry key for one admitted connection
///
/// Freshly generated per session. The remote address cannot serve as the
/// key: a departing peer's entry may still be in the registry when the same
/// address reconnects, and removing by address would evict the newcomer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
