//! Bidirectional relay between a client connection and its upstream
//!
//! Client bytes pass through a [`HeaderInjector`] on their way upstream;
//! upstream bytes are copied back verbatim.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::proxy::headers::HeaderInjector;
use crate::proxy::selector::ProxySelector;

/// Byte counts of a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunnelStats {
    /// Client to upstream, after header injection
    pub bytes_sent: u64,
    /// Upstream to client
    pub bytes_received: u64,
    /// Relay was cut short by a shutdown signal
    pub interrupted: bool,
}

/// Handles the byte relay of one forwarded connection
pub struct TunnelHandler;

impl TunnelHandler {
    /// Relay until both directions are done or `shutdown` flips to true
    ///
    /// Each direction half-closes its destination when its source reaches EOF.
    #[instrument(skip_all)]
    pub async fn relay<C, S>(
        client: C,
        server: S,
        injector: HeaderInjector,
        buffer_size: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> TunnelStats
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (mut client_read, mut client_write) = tokio::io::split(client);
        let (mut server_read, mut server_write) = tokio::io::split(server);
        let buffer_size = buffer_size.max(1);

        let mut bytes_sent = 0u64;
        let mut bytes_received = 0u64;

        let outcome = {
            let client_to_server = async {
                let result = Self::forward_client(
                    &mut client_read,
                    &mut server_write,
                    injector,
                    buffer_size,
                    &mut bytes_sent,
                )
                .await;
                let _ = server_write.shutdown().await;
                result
            };

            let server_to_client = async {
                let result = Self::forward_upstream(
                    &mut server_read,
                    &mut client_write,
                    buffer_size,
                    &mut bytes_received,
                )
                .await;
                let _ = client_write.shutdown().await;
                result
            };

            tokio::select! {
                results = async { tokio::join!(client_to_server, server_to_client) } => Some(results),
                _ = wait_for_shutdown(&mut shutdown) => None,
            }
        };

        let interrupted = match outcome {
            Some((client_to_server, server_to_client)) => {
                if let Err(e) = client_to_server {
                    debug!("Client to upstream copy ended: {}", e);
                }
                if let Err(e) = server_to_client {
                    debug!("Upstream to client copy ended: {}", e);
                }
                false
            }
            None => {
                debug!("Relay interrupted by shutdown");
                true
            }
        };

        debug!(
            bytes_sent = bytes_sent,
            bytes_received = bytes_received,
            "Tunnel closed"
        );

        TunnelStats {
            bytes_sent,
            bytes_received,
            interrupted,
        }
    }

    async fn forward_client<R, W>(
        reader: &mut R,
        writer: &mut W,
        mut injector: HeaderInjector,
        buffer_size: usize,
        sent: &mut u64,
    ) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; buffer_size];
        loop {
            let n = reader.read(&mut buf).await?;
            let out = if n == 0 {
                injector.finish()
            } else {
                injector.process(&buf[..n])
            };

            if !out.is_empty() {
                writer.write_all(&out).await?;
                *sent += out.len() as u64;
            }
            if n == 0 {
                break;
            }
        }
        writer.flush().await
    }

    async fn forward_upstream<R, W>(
        reader: &mut R,
        writer: &mut W,
        buffer_size: usize,
        received: &mut u64,
    ) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; buffer_size];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            *received += n as u64;
        }
        writer.flush().await
    }
}

/// Resolves once the flag turns true; never resolves if the sender is gone
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Guard for tracking active connections through an upstream
pub struct TunnelGuard {
    upstream_id: i64,
    selector: Arc<dyn ProxySelector>,
}

impl TunnelGuard {
    pub fn new(upstream_id: i64, selector: Arc<dyn ProxySelector>) -> Self {
        selector.acquire(upstream_id);
        Self {
            upstream_id,
            selector,
        }
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.selector.release(self.upstream_id);
    }
}
