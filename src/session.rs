//! Per-connection session
//!
//! Drives one accepted TCP stream through admission, the welcome handshake,
//! the relay loop and teardown:
//!
//! `Connecting → Rejected | Admitted → Active → Closing → Closed`
//!
//! Faults on the session's own stream never leave this module; they only
//! move the state machine to `Closing`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::connection::Connection;
use crate::error::RelayError;
use crate::message::{normalize_line, read_line, write_message, ReadOutcome, ServerMessage};
use crate::registry::Admission;
use crate::types::ConnectionId;

/// How long teardown waits for queued lines to reach the peer
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// How long a refused peer's pending input is drained before the socket closes
const REFUSAL_LINGER: Duration = Duration::from_secs(1);

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Rejected,
    Admitted,
    Active,
    Closing,
    Closed,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Refused at admission, never registered
    Rejected,
    /// Admitted and later torn down
    Closed,
}

/// Why the relay loop stopped
#[derive(Debug)]
enum CloseReason {
    EndOfStream,
    Fault(io::Error),
    WriterStopped,
    TooSlow,
    Shutdown,
}

/// Everything a session needs from the server
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Fan-out handle; also gives access to the registry
    pub broadcaster: Broadcaster,
    /// Close the session when a read produces nothing for this long
    pub idle_timeout: Option<Duration>,
    /// Flips to `true` when the server shuts down
    pub shutdown: watch::Receiver<bool>,
}

struct Session {
    peer: SocketAddr,
    state: SessionState,
}

impl Session {
    fn transition(&mut self, next: SessionState) {
        debug!("Session {}: {:?} -> {:?}", self.peer, self.state, next);
        self.state = next;
    }
}

/// Run one connection to completion
///
/// Only a failure to deliver the refusal line is returned as an error;
/// every fault after admission is handled by closing the session.
pub async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: SessionContext,
) -> Result<SessionOutcome, RelayError> {
    let SessionContext {
        broadcaster,
        idle_timeout,
        mut shutdown,
    } = ctx;
    let registry = Arc::clone(broadcaster.registry());
    let mut session = Session {
        peer,
        state: SessionState::Connecting,
    };

    if registry.try_admit() == Admission::Rejected {
        session.transition(SessionState::Rejected);
        warn!("Connection is full, refuse {}.", peer);
        refuse(stream).await?;
        return Ok(SessionOutcome::Rejected);
    }

    session.transition(SessionState::Admitted);
    let (conn, outbox) = Connection::with_outbox(peer);
    let id = conn.id;
    registry.register(conn.clone());

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Written before the writer task starts so it always precedes queued broadcasts
    let welcome = ServerMessage::Welcome {
        members: registry.size(),
    };
    let welcome_result = write_message(&mut writer, &welcome).await;
    info!("user \"{}\" has joined.", peer);

    let mut write_task = tokio::spawn(write_loop(writer, outbox));
    let mut writer_finished = false;

    let reason = match welcome_result {
        Err(e) => CloseReason::Fault(e),
        Ok(()) => {
            broadcaster.broadcast(&ServerMessage::Joined { peer }, Some(id));
            session.transition(SessionState::Active);

            let stopping = *shutdown.borrow_and_update();
            if stopping {
                CloseReason::Shutdown
            } else {
                loop {
                    tokio::select! {
                        outcome = next_line(&mut reader, idle_timeout) => match outcome {
                            ReadOutcome::Line(raw) => relay(&broadcaster, id, peer, &raw),
                            ReadOutcome::EndOfStream => break CloseReason::EndOfStream,
                            ReadOutcome::Fault(e) => break CloseReason::Fault(e),
                        },
                        result = &mut write_task, if !writer_finished => {
                            writer_finished = true;
                            match result {
                                Ok(Err(e)) => break CloseReason::Fault(e),
                                _ => break CloseReason::WriterStopped,
                            }
                        }
                        _ = conn.evicted() => break CloseReason::TooSlow,
                        _ = shutdown.changed() => break CloseReason::Shutdown,
                    }
                }
            }
        }
    };

    session.transition(SessionState::Closing);
    match &reason {
        CloseReason::Fault(e) => warn!("Connection exception: {}", e),
        CloseReason::TooSlow => warn!(
            "Disconnecting slow client {} after {} dropped messages",
            peer,
            conn.drop_count()
        ),
        other => debug!("Session {} closing: {:?}", peer, other),
    }

    registry.remove(id);
    // Dropping our sender lets the writer drain its queue and shut the stream down
    drop(conn);
    // A peer that stopped reading will not drain its queue either
    let grace = match reason {
        CloseReason::TooSlow => Duration::ZERO,
        _ => CLOSE_GRACE,
    };
    if !writer_finished && timeout(grace, &mut write_task).await.is_err() {
        debug!("Writer for {} did not finish in time, aborting", peer);
        write_task.abort();
        let _ = write_task.await;
    }
    drop(reader);

    info!("user \"{}\" exits.", peer);
    broadcaster.broadcast(&ServerMessage::Left { peer }, None);

    session.transition(SessionState::Closed);
    Ok(SessionOutcome::Closed)
}

/// Log and relay one inbound line; whitespace-only lines are dropped
fn relay(broadcaster: &Broadcaster, id: ConnectionId, peer: SocketAddr, raw: &str) {
    let Some(text) = normalize_line(raw) else {
        return;
    };

    info!("{}:{}", peer, text);
    let delivery = broadcaster.broadcast(
        &ServerMessage::Relay {
            peer,
            text: text.to_string(),
        },
        Some(id),
    );
    debug!(
        "Relayed line from {} to {} peers ({} failed)",
        peer, delivery.delivered, delivery.failed
    );
}

async fn next_line<R>(reader: &mut R, idle_timeout: Option<Duration>) -> ReadOutcome
where
    R: AsyncBufRead + Unpin,
{
    let Some(limit) = idle_timeout else {
        return read_line(reader).await;
    };

    match timeout(limit, read_line(reader)).await {
        Ok(outcome) => outcome,
        Err(_) => ReadOutcome::Fault(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no data for {limit:?}"),
        )),
    }
}

/// Drain the outbox into the socket, then close the write side
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::Receiver<ServerMessage>,
) -> io::Result<()> {
    while let Some(msg) = outbox.recv().await {
        write_message(&mut writer, &msg).await?;
    }
    writer.shutdown().await
}

/// Send the refusal line and close
///
/// Input the peer already sent is read and discarded for a short while, so
/// closing with unread data does not reset the connection ahead of the
/// refusal line.
async fn refuse(mut stream: TcpStream) -> io::Result<()> {
    write_message(&mut stream, &ServerMessage::Refused).await?;
    stream.shutdown().await?;

    let mut sink = [0u8; 1024];
    let drain = async { while matches!(stream.read(&mut sink).await, Ok(n) if n > 0) {} };
    let _ = timeout(REFUSAL_LINGER, drain).await;
    Ok(())
}
