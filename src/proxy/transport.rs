//! Dialing upstream proxies

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::{RelayError, Result};
use crate::models::Upstream;

/// Open a TCP connection to an upstream proxy, bounded by `connect_timeout`
#[instrument(skip(upstream), fields(upstream_id = upstream.id, upstream = %upstream))]
pub async fn connect_upstream(upstream: &Upstream, connect_timeout: Duration) -> Result<TcpStream> {
    let address = upstream.address();

    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&address))
        .await
        .map_err(|_| RelayError::Timeout)?
        .map_err(|e| RelayError::UpstreamConnectFailed {
            address: address.clone(),
            reason: e.to_string(),
        })?;

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY on upstream socket: {}", e);
    }

    debug!("Connected to upstream {}", address);
    Ok(stream)
}
