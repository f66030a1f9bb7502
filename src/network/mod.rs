//! Network module - UDP request/reply plumbing
//!
//! Provides:
//! - Server loop with loss simulation, reply deduplication and callback
//!   fan-out
//! - Client invoker with timeout/retry and a monitor receiver
//! - The reply cache and monitor registry backing at-most-once semantics

mod client;
mod dedup;
mod monitor;
mod server;

pub use client::*;
pub use dedup::*;
pub use monitor::*;
pub use server::*;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::DEFAULT_PORT;

/// Invocation semantics selected by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantics {
    AtLeastOnce,
    AtMostOnce,
}

impl Semantics {
    /// Parse the `--sem` argument. Only `atmost` and its synonym
    /// `at-most-once` select at-most-once; anything else falls back to
    /// at-least-once.
    pub fn from_arg(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "atmost" | "at-most-once" => Semantics::AtMostOnce,
            _ => Semantics::AtLeastOnce,
        }
    }
}

impl fmt::Display for Semantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Semantics::AtLeastOnce => "at-least-once",
            Semantics::AtMostOnce => "at-most-once",
        })
    }
}

/// Server-side settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Probability of dropping an incoming request (simulated loss)
    pub loss_req: f64,
    /// Probability of dropping an outgoing reply (simulated loss)
    pub loss_rep: f64,
    /// Lifetime of cached replies for at-most-once requests
    pub dedup_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            loss_req: 0.0,
            loss_rep: 0.0,
            dedup_ttl: Duration::from_secs(60),
        }
    }
}

/// Client-side settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server endpoint to send requests to
    pub server_addr: SocketAddr,
    /// Invocation semantics for every call on this client
    pub semantics: Semantics,
    /// Receive timeout per attempt
    pub timeout: Duration,
    /// Number of send attempts before giving up
    pub retry: u32,
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_two_spellings_select_at_most_once() {
        assert_eq!(Semantics::from_arg("atmost"), Semantics::AtMostOnce);
        assert_eq!(Semantics::from_arg("at-most-once"), Semantics::AtMostOnce);
        assert_eq!(Semantics::from_arg("ATMOST"), Semantics::AtMostOnce);
        assert_eq!(Semantics::from_arg("atleast"), Semantics::AtLeastOnce);
        assert_eq!(Semantics::from_arg("once"), Semantics::AtLeastOnce);
        assert_eq!(Semantics::from_arg(""), Semantics::AtLeastOnce);
    }

    #[tokio::test]
    async fn resolves_localhost() {
        let addr = resolve_host("127.0.0.1", 9000).await.unwrap();
        assert_eq!(addr.port(), 9000);
    }
}
