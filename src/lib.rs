//! Line-oriented TCP broadcast relay
//!
//! Accepts up to a fixed number of concurrent TCP peers and relays every
//! line one peer sends to all the others, announcing arrivals and
//! departures along the way.
//!
//! # Protocol
//! All server output is UTF-8, one message per CRLF-terminated line:
//! - `welcome:<N>` to a newly admitted peer (`N` = members after admission)
//! - `Connection refused: server is full` when at capacity, then close
//! - `user:<addr> has joined` to the other members
//! - `<addr>:<text>` for each non-blank line relayed from `<addr>`
//! - `user <addr> left chat.` when a member's session ends
//!
//! # Architecture
//! - `ConnectionRegistry` is the only shared mutable state, behind one lock
//! - Each connection runs as its own `session` task with a writer task
//!   draining an `mpsc` outbox
//! - `Broadcaster` fans out over a registry snapshot, outside the lock
//!
//! # Example
//! ```no_run
//! use relay_server::{Config, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), relay_server::RelayError> {
//!     let server = RelayServer::bind(&Config::default()).await?;
//!     server.run_until_ctrl_c().await
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use broadcast::{Broadcaster, Delivery};
pub use config::Config;
pub use connection::Connection;
pub use error::{RelayError, SendError};
pub use message::{ReadOutcome, ServerMessage};
pub use registry::{Admission, ConnectionRegistry};
pub use server::RelayServer;
pub use session::{run_session, SessionContext, SessionOutcome, SessionState};
pub use types::ConnectionId;
