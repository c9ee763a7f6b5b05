//! Proxy Relay - local forwarding proxy
//!
//! Binds a free local port and relays every connection it accepts to an
//! upstream HTTP proxy picked at random from a configured pool.
//!
//! ## Features
//!
//! - One randomly chosen upstream pinned for the whole session
//! - `Proxy-Authorization` and custom header injection on request heads
//! - Opaque pass-through after `CONNECT`
//! - Graceful shutdown that releases the bound port

pub mod config;
pub mod error;
pub mod models;
pub mod proxy;

pub use config::Config;
pub use error::{RelayError, Result};
