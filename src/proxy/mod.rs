//! Forwarding proxy implementation
//!
//! This module provides:
//! - the relay server and its accept loop
//! - per-connection forwarding to an upstream proxy
//! - header injection on request heads
//! - sticky upstream selection

pub mod forwarder;
pub mod headers;
pub mod selector;
pub mod server;
pub mod transport;
pub mod tunnel;

pub use forwarder::{Forwarder, ForwarderConfig};
pub use headers::{HeaderInjector, InjectedHeaders};
pub use selector::{ProxySelector, StickySelector};
pub use server::RelayServer;
pub use tunnel::{TunnelHandler, TunnelStats};
