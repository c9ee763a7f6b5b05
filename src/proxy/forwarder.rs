//! Per-connection forwarding
//!
//! Picks an upstream for an accepted client connection, dials it, and relays
//! the two sockets until they close.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::models::SessionStats;
use crate::proxy::headers::{HeaderInjector, InjectedHeaders};
use crate::proxy::selector::ProxySelector;
use crate::proxy::transport::connect_upstream;
use crate::proxy::tunnel::{TunnelGuard, TunnelHandler, TunnelStats};

/// Configuration for the forwarder
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Timeout for upstream proxy connections
    pub connect_timeout: Duration,
    /// Read buffer size for each relay direction
    pub buffer_size: usize,
    /// Headers added to every request head
    pub headers: InjectedHeaders,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            buffer_size: 4096,
            headers: InjectedHeaders::new(),
        }
    }
}

/// Forwards client connections to upstream proxies
pub struct Forwarder {
    selector: Arc<dyn ProxySelector>,
    config: ForwarderConfig,
    stats: Arc<SessionStats>,
}

impl Forwarder {
    pub fn new(
        selector: Arc<dyn ProxySelector>,
        config: ForwarderConfig,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            selector,
            config,
            stats,
        }
    }

    /// Handle one accepted client connection
    ///
    /// If the upstream cannot be reached the client socket is closed and the
    /// error is returned; nothing is retried.
    #[instrument(skip(self, client, shutdown), fields(client = %client_addr))]
    pub async fn handle(
        &self,
        client: TcpStream,
        client_addr: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) -> Result<TunnelStats> {
        self.stats.record_accepted();

        let upstream = match self.selector.select().await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!("No upstream available: {}", e);
                warn!("Closing connection with client {}", client_addr);
                self.stats.record_upstream_failure();
                return Err(e);
            }
        };

        let server = match connect_upstream(&upstream, self.config.connect_timeout).await {
            Ok(server) => server,
            Err(e) => {
                warn!("Can't establish connection with upstream {}: {}", upstream, e);
                warn!("Closing connection with client {}", client_addr);
                self.stats.record_upstream_failure();
                return Err(e);
            }
        };

        debug!("{} has connected through {}", client_addr, upstream);

        let _guard = TunnelGuard::new(upstream.id, self.selector.clone());
        let injector = HeaderInjector::new(self.config.headers.for_upstream(&upstream));

        self.stats.connection_opened();
        let tunnel = TunnelHandler::relay(
            client,
            server,
            injector,
            self.config.buffer_size,
            shutdown,
        )
        .await;
        self.stats
            .connection_closed(tunnel.bytes_sent, tunnel.bytes_received);

        debug!(
            bytes_sent = tunnel.bytes_sent,
            bytes_received = tunnel.bytes_received,
            "{} has disconnected",
            client_addr
        );

        Ok(tunnel)
    }
}
