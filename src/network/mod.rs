//! Network layer for Playback
//!
//! Outbound HTTP(S) to the remote and the webhook receiver, and bounded
//! concurrency for the listener.

mod client;
mod connection_pool;

pub use client::{read_body, UpstreamClient};
pub use connection_pool::{ConnectionGuard, ConnectionLimiter};

/// Maximum number of concurrent connections
pub const MAX_CONNECTIONS: usize = 4096;

/// Connection setup timeout
pub const CONNECT_TIMEOUT_MS: u64 = 1000;

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;

/// Headers that describe a single connection and must not be relayed
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Check whether `name` is a hop-by-hop header
#[must_use]
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}
