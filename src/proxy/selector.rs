//! Upstream selection
//!
//! One upstream is drawn at random when the pool is loaded and every
//! connection of the session goes through it.

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::sync::Arc;

use crate::error::{RelayError, Result};
use crate::models::Upstream;

/// Source of the upstream each accepted connection is forwarded to
#[async_trait]
pub trait ProxySelector: Send + Sync {
    /// Upstream for the next connection
    ///
    /// Returns an error if the pool is empty
    async fn select(&self) -> Result<Arc<Upstream>>;

    /// Replace the upstream pool
    async fn refresh(&self, upstreams: Vec<Upstream>) -> Result<()>;

    /// Get the number of upstreams in the pool
    fn available_count(&self) -> usize;

    /// The upstream every connection currently goes to
    fn pinned(&self) -> Option<Arc<Upstream>>;

    /// Mark an upstream as carrying one more connection
    fn acquire(&self, upstream_id: i64);

    /// Mark an upstream as carrying one less connection
    fn release(&self, upstream_id: i64);

    /// Number of live connections through an upstream
    fn active_connections(&self, upstream_id: i64) -> usize;
}

/// Live connection counts per upstream
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    connections: dashmap::DashMap<i64, usize>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, upstream_id: i64) {
        self.connections
            .entry(upstream_id)
            .and_modify(|c| *c += 1)
            .or_insert(1);
    }

    pub fn release(&self, upstream_id: i64) {
        self.connections.entry(upstream_id).and_modify(|c| {
            *c = c.saturating_sub(1);
        });
    }

    pub fn get(&self, upstream_id: i64) -> usize {
        self.connections.get(&upstream_id).map(|v| *v).unwrap_or(0)
    }
}

/// Pins a randomly chosen upstream until the pool stops containing it
pub struct StickySelector {
    upstreams: RwLock<Vec<Arc<Upstream>>>,
    current: RwLock<Option<Arc<Upstream>>>,
    tracker: ConnectionTracker,
}

impl StickySelector {
    pub fn new() -> Self {
        Self {
            upstreams: RwLock::new(Vec::new()),
            current: RwLock::new(None),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Selector already loaded with `upstreams`
    pub async fn with_upstreams(upstreams: Vec<Upstream>) -> Result<Arc<Self>> {
        let selector = Arc::new(Self::new());
        selector.refresh(upstreams).await?;
        Ok(selector)
    }
}

impl Default for StickySelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxySelector for StickySelector {
    async fn select(&self) -> Result<Arc<Upstream>> {
        self.current
            .read()
            .clone()
            .ok_or(RelayError::NoUpstreamsAvailable)
    }

    async fn refresh(&self, upstreams: Vec<Upstream>) -> Result<()> {
        let upstreams: Vec<Arc<Upstream>> = upstreams.into_iter().map(Arc::new).collect();

        let mut current = self.current.write();
        // Keep the pinned upstream if it survived the refresh.
        let kept = current
            .as_ref()
            .and_then(|pinned| upstreams.iter().find(|u| u.as_ref() == pinned.as_ref()))
            .cloned();

        *current = match kept {
            Some(upstream) => Some(upstream),
            None => upstreams.choose(&mut rand::thread_rng()).cloned(),
        };
        *self.upstreams.write() = upstreams;
        Ok(())
    }

    fn available_count(&self) -> usize {
        self.upstreams.read().len()
    }

    fn pinned(&self) -> Option<Arc<Upstream>> {
        self.current.read().clone()
    }

    fn acquire(&self, upstream_id: i64) {
        self.tracker.acquire(upstream_id);
    }

    fn release(&self, upstream_id: i64) {
        self.tracker.release(upstream_id);
    }

    fn active_connections(&self, upstream_id: i64) -> usize {
        self.tracker.get(upstream_id)
    }
}
