//! TCP listener
//!
//! Accepts connections and spawns one independent session task per stream.
//! The accept loop never waits on a session; it only reaps finished ones.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::error::RelayError;
use crate::registry::ConnectionRegistry;
use crate::session::{run_session, SessionContext};

/// The relay server: a bound listener plus its registry
///
/// Each instance owns its own registry, so several servers can run side by
/// side in one process.
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    idle_timeout: Option<Duration>,
}

impl RelayServer {
    /// Validate `config` and bind the listening socket
    ///
    /// A bind failure is fatal and returned as [`RelayError::Bind`].
    pub async fn bind(config: &Config) -> Result<Self, RelayError> {
        config.validate()?;

        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;

        Self::from_listener(listener, config)
    }

    /// Wrap an already bound listener, validating `config` first
    pub fn from_listener(listener: TcpListener, config: &Config) -> Result<Self, RelayError> {
        config.validate()?;

        Ok(Self {
            listener,
            registry: Arc::new(ConnectionRegistry::new(config.max_connections)),
            idle_timeout: config.idle_timeout(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to this server's registry
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// On shutdown the listener is closed first, then every session is told
    /// to close and awaited, so no connection outlives this call.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer {
            listener,
            registry,
            idle_timeout,
        } = self;

        info!(
            "Server starts on {}, with max connections {}",
            listener.local_addr()?,
            registry.capacity()
        );

        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = SessionContext {
                            broadcaster: broadcaster.clone(),
                            idle_timeout,
                            shutdown: stop_rx.clone(),
                        };
                        spawn_session(&mut sessions, stream, peer, ctx);
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!("Session task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);
        info!("Closing {} active connections", registry.size());
        let _ = stop_tx.send(true);

        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                error!("Session task failed: {}", e);
            }
        }

        info!("Server stops.");
        Ok(())
    }

    /// Accept connections until Ctrl-C
    pub async fn run_until_ctrl_c(self) -> Result<(), RelayError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl-C handler: {}", e);
            }
        })
        .await
    }
}

fn spawn_session(
    sessions: &mut JoinSet<()>,
    stream: TcpStream,
    peer: SocketAddr,
    ctx: SessionContext,
) {
    debug!("New connection from {}", peer);
    sessions.spawn(async move {
        match run_session(stream, peer, ctx).await {
            Ok(outcome) => debug!("Session {} finished: {:?}", peer, outcome),
            Err(e) => warn!("Connection handler error for {}: {}", peer, e),
        }
    });
}
