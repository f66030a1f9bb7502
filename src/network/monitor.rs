//! Monitor registry - timed callback subscriptions
//!
//! Each MONITOR_REGISTER call appends an independent entry; a client that
//! registers twice receives two callbacks per update. Fan-out order is
//! registration order, which the backing `Vec` preserves.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct MonitorEntry {
    pub peer: SocketAddr,
    pub expires_at: Instant,
}

/// The set of live monitor subscriptions, owned by the server loop.
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    entries: Vec<MonitorEntry>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription for `lifetime` starting now.
    pub fn register(&mut self, peer: SocketAddr, lifetime: Duration) {
        self.entries.push(MonitorEntry {
            peer,
            expires_at: Instant::now() + lifetime,
        });
    }

    /// Drop entries past their expiry, keeping registration order.
    pub fn sweep(&mut self) {
        let now = Instant::now();
        self.entries.retain(|e| e.expires_at > now);
    }

    /// Endpoints of the surviving subscriptions, in registration order.
    pub fn peers(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(move |e| e.expires_at > now)
            .map(|e| e.peer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn peers_come_back_in_registration_order() {
        let mut reg = MonitorRegistry::new();
        reg.register(addr(5001), Duration::from_secs(5));
        reg.register(addr(5002), Duration::from_secs(5));
        reg.register(addr(5001), Duration::from_secs(5));

        let peers: Vec<_> = reg.peers().collect();
        assert_eq!(peers, vec![addr(5001), addr(5002), addr(5001)]);
    }

    #[test]
    fn duplicate_registrations_are_independent_entries() {
        let mut reg = MonitorRegistry::new();
        reg.register(addr(5001), Duration::from_secs(5));
        reg.register(addr(5001), Duration::from_secs(5));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.peers().count(), 2);
    }

    #[test]
    fn expired_entries_stop_receiving_before_the_sweep() {
        let mut reg = MonitorRegistry::new();
        reg.register(addr(5001), Duration::from_millis(30));
        reg.register(addr(5002), Duration::from_secs(5));

        sleep(Duration::from_millis(60));
        let peers: Vec<_> = reg.peers().collect();
        assert_eq!(peers, vec![addr(5002)]);

        reg.sweep();
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn sweep_on_empty_registry_is_a_no_op() {
        let mut reg = MonitorRegistry::new();
        reg.sweep();
        assert!(reg.is_empty());
    }
}
