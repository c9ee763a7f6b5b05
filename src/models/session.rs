use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Upstream;

/// Traffic counters shared by every connection of a session
#[derive(Debug, Default)]
pub struct SessionStats {
    accepted: AtomicU64,
    upstream_failures: AtomicU64,
    active: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a relayed connection as finished and add its byte counts
    pub fn connection_closed(&self, bytes_sent: u64, bytes_received: u64) {
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        self.bytes_sent.fetch_add(bytes_sent, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes_received, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn upstream_failures(&self) -> u64 {
        self.upstream_failures.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

/// A running relay: the bound local address and the upstream it forwards to
///
/// Lives as long as the server that owns it. `upstream` is unset only when
/// the pool was empty at bind time.
#[derive(Debug, Clone)]
pub struct ProxySession {
    pub local_addr: SocketAddr,
    pub upstream: Option<Arc<Upstream>>,
    pub started_at: DateTime<Utc>,
    pub stats: Arc<SessionStats>,
}

impl ProxySession {
    pub fn new(local_addr: SocketAddr, upstream: Option<Arc<Upstream>>) -> Self {
        Self {
            local_addr,
            upstream,
            started_at: Utc::now(),
            stats: Arc::new(SessionStats::new()),
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn upstream_host(&self) -> Option<&str> {
        self.upstream.as_deref().map(|u| u.host.as_str())
    }

    pub fn upstream_port(&self) -> Option<u16> {
        self.upstream.as_deref().map(|u| u.port)
    }

    /// Point-in-time snapshot suitable for logging
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            local_addr: self.local_addr.to_string(),
            upstream: self.upstream.as_deref().map(Upstream::address),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            accepted: self.stats.accepted(),
            upstream_failures: self.stats.upstream_failures(),
            active: self.stats.active(),
            bytes_sent: self.stats.bytes_sent(),
            bytes_received: self.stats.bytes_received(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub local_addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub accepted: u64,
    pub upstream_failures: u64,
    pub active: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}
