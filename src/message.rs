//! Line protocol definitions
//!
//! Every server → client message is one UTF-8 line terminated by CRLF.
//! Client → server traffic is opaque text, one message per line.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Wire terminator appended to every outbound message
pub const LINE_TERMINATOR: &str = "\r\n";

/// Text sent to a peer that arrives while the server is at capacity
pub const REFUSAL_TEXT: &str = "Connection refused: server is full";

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Admission succeeded; `members` is the count after registration
    Welcome { members: usize },
    /// Admission failed, the transport is closed right after
    Refused,
    /// Another peer was admitted
    Joined { peer: SocketAddr },
    /// A line relayed from another peer
    Relay { peer: SocketAddr, text: String },
    /// Another peer's session closed
    Left { peer: SocketAddr },
}

impl ServerMessage {
    /// Render the message with its CRLF terminator
    pub fn encode(&self) -> String {
        format!("{self}{LINE_TERMINATOR}")
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Welcome { members } => write!(f, "welcome:{members}"),
            ServerMessage::Refused => f.write_str(REFUSAL_TEXT),
            ServerMessage::Joined { peer } => write!(f, "user:{peer} has joined"),
            ServerMessage::Relay { peer, text } => write!(f, "{peer}:{text}"),
            ServerMessage::Left { peer } => write!(f, "user {peer} left chat."),
        }
    }
}

/// Result of reading one line from a peer
///
/// Disconnect detection is an explicit variant rather than an error path,
/// so the session's transitions stay enumerable.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Raw line including any trailing delimiter
    Line(String),
    /// Peer closed its side of the stream
    EndOfStream,
    /// Transport failure, invalid UTF-8 or idle timeout
    Fault(io::Error),
}

/// Read one `\n`-delimited line
pub async fn read_line<R>(reader: &mut R) -> ReadOutcome
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => ReadOutcome::EndOfStream,
        Ok(_) => ReadOutcome::Line(line),
        Err(e) => ReadOutcome::Fault(e),
    }
}

/// Write one message with its terminator and flush
pub async fn write_message<W>(writer: &mut W, msg: &ServerMessage) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(msg.encode().as_bytes()).await?;
    writer.flush().await
}

/// Strip surrounding whitespace and the line delimiter
///
/// Returns `None` for whitespace-only lines, which are neither logged
/// nor relayed.
pub fn normalize_line(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
