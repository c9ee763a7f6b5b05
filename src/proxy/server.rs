//! Relay server: listener, accept loop and shutdown
//!
//! Every accepted connection is handed to the [`Forwarder`] on its own task.
//! The binary drives this on a single-threaded runtime, so all relays are
//! multiplexed on one thread.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::models::ProxySession;
use crate::proxy::forwarder::Forwarder;
use crate::proxy::selector::ProxySelector;
use crate::proxy::tunnel::wait_for_shutdown;

/// Relay server bound to a local port
pub struct RelayServer {
    listener: TcpListener,
    session: Arc<ProxySession>,
    forwarder: Arc<Forwarder>,
    max_errors: u32,
}

impl RelayServer {
    /// Bind the listener; port 0 lets the OS pick a free port
    pub async fn bind(config: &RelayConfig, selector: Arc<dyn ProxySelector>) -> Result<Self> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let session = Arc::new(ProxySession::new(local_addr, selector.pinned()));
        let forwarder = Arc::new(Forwarder::new(
            selector,
            config.forwarder_config(),
            session.stats.clone(),
        ));

        info!("Listening on {}", local_addr);

        Ok(Self {
            listener,
            session,
            forwarder,
            max_errors: config.max_errors.max(1),
        })
    }

    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.session.local_addr
    }

    pub fn session(&self) -> Arc<ProxySession> {
        self.session.clone()
    }

    /// Accept and relay connections until `shutdown` flips to true
    ///
    /// On return the listener is closed and every relay has finished.
    #[instrument(skip_all, fields(local_addr = %self.session.local_addr))]
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        serve(
            self.listener,
            self.forwarder,
            self.session,
            self.max_errors,
            shutdown,
        )
        .await
    }
}

/// Source of client connections for the accept loop
#[async_trait]
pub(crate) trait Acceptor: Send {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Accept loop shared by every [`Acceptor`]
///
/// Gives up with [`RelayError::TooManyErrors`] once `max_errors` accepts have
/// failed. The acceptor is dropped before open relays are stopped.
pub(crate) async fn serve<A: Acceptor>(
    mut acceptor: A,
    forwarder: Arc<Forwarder>,
    session: Arc<ProxySession>,
    max_errors: u32,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut connections = JoinSet::new();
    let mut error_count = 0u32;

    let result = loop {
        tokio::select! {
            accept_result = acceptor.accept() => {
                match accept_result {
                    Ok((stream, client_addr)) => {
                        let forwarder = forwarder.clone();
                        let stop = stop_rx.clone();
                        connections.spawn(async move {
                            match forwarder.handle(stream, client_addr, stop).await {
                                Ok(_) => {}
                                Err(e) if e.is_connection_scoped() => {
                                    debug!("Connection error: {}", e);
                                }
                                Err(e) => warn!("Connection error: {}", e),
                            }
                        });
                    }
                    Err(e) => {
                        error_count += 1;
                        error!("Accept error ({}/{}): {}", error_count, max_errors, e);
                        if error_count >= max_errors {
                            break Err(RelayError::TooManyErrors { count: error_count });
                        }
                    }
                }
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    warn!("Connection task failed: {}", e);
                }
            }
            _ = wait_for_shutdown(&mut shutdown) => {
                info!("Relay server shutting down");
                break Ok(());
            }
        }
    };

    drop(acceptor);

    let _ = stop_tx.send(true);
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            warn!("Connection task failed: {}", e);
        }
    }

    info!(
        accepted = session.stats.accepted(),
        upstream_failures = session.stats.upstream_failures(),
        "Relay server stopped"
    );

    result
}
