//! Station registry for the access-point role
//!
//! Tracks stations joined to the soft AP. When a DHCP lease file is
//! attached, a station's leased address is used. Otherwise addresses come
//! from a pool: each station gets the lowest pool offset not held by another
//! valid station, so an address vacated by a leaving peer is handed out
//! again.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::signal::Signals;
use crate::wireless::MacAddr;

/// Delay before a joined station is given an address
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

pub const DEFAULT_CAPACITY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationRecord {
    pub mac: MacAddr,
    /// `None` until resolved after the settle delay
    pub address: Option<Ipv4Addr>,
    pub valid: bool,
    pub joined_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Accepted { slot: usize },
    /// Station is already registered; no slot consumed
    AlreadyPresent,
    /// Registry full
    Rejected,
}

pub struct StationRegistry {
    slots: Mutex<Vec<Option<StationRecord>>>,
    pool_start: Ipv4Addr,
    settle_delay: Duration,
    signals: Arc<Signals>,
    ready_fired: AtomicBool,
    lease_file: Option<PathBuf>,
}

impl StationRegistry {
    pub fn new(capacity: usize, pool_start: Ipv4Addr, settle_delay: Duration, signals: Arc<Signals>) -> Self {
        Self {
            slots: Mutex::new(vec![None; capacity]),
            pool_start,
            settle_delay,
            signals,
            ready_fired: AtomicBool::new(false),
            lease_file: None,
        }
    }

    /// Look up station addresses in a dnsmasq-format lease file
    pub fn with_lease_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.lease_file = Some(path.into());
        self
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Register a joining station. On acceptance the address is resolved
    /// by a background task after the settle delay.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_peer_join(self: &Arc<Self>, mac: MacAddr) -> JoinOutcome {
        let outcome = self.register(mac);

        if let JoinOutcome::Accepted { slot } = outcome {
            info!("Station {} joined (slot {})", mac, slot);

            if !self.ready_fired.swap(true, Ordering::SeqCst) {
                info!("First station joined, receiver may start");
                self.signals.peer_ready.give();
            }

            let registry = Arc::clone(self);
            let delay = self.settle_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                registry.resolve_address(mac);
            });
        }

        outcome
    }

    fn register(&self, mac: MacAddr) -> JoinOutcome {
        let mut slots = self.slots.lock();

        if slots.iter().flatten().any(|r| r.valid && r.mac == mac) {
            debug!("Station {} already registered", mac);
            return JoinOutcome::AlreadyPresent;
        }

        let free = slots.iter().position(|s| s.as_ref().map_or(true, |r| !r.valid));
        match free {
            Some(slot) => {
                slots[slot] = Some(StationRecord {
                    mac,
                    address: None,
                    valid: true,
                    joined_at: Instant::now(),
                });
                JoinOutcome::Accepted { slot }
            }
            None => {
                warn!("Station registry full ({} slots), rejecting {}", slots.len(), mac);
                JoinOutcome::Rejected
            }
        }
    }

    /// Assign the lowest free pool address to `mac` if it is still joined
    /// and unassigned. Returns the station's address.
    pub fn resolve_address(&self, mac: MacAddr) -> Option<Ipv4Addr> {
        let leased = self.leased_address(mac);
        let mut slots = self.slots.lock();

        let in_use: Vec<Ipv4Addr> = slots
            .iter()
            .flatten()
            .filter(|r| r.valid)
            .filter_map(|r| r.address)
            .collect();

        let record = slots.iter_mut().flatten().find(|r| r.valid && r.mac == mac)?;
        if let Some(addr) = record.address {
            return Some(addr);
        }

        if let Some(addr) = leased {
            record.address = Some(addr);
            info!("Station {} leased {}", mac, addr);
            return Some(addr);
        }

        let base = u32::from(self.pool_start);
        let addr = (0u32..)
            .map(|offset| Ipv4Addr::from(base.wrapping_add(offset)))
            .find(|candidate| !in_use.contains(candidate))?;

        record.address = Some(addr);
        if self.lease_file.is_some() {
            warn!("No DHCP lease for {}; pool address {} is advisory only", mac, addr);
        } else {
            info!("Station {} assigned {}", mac, addr);
        }
        Some(addr)
    }

    fn leased_address(&self, mac: MacAddr) -> Option<Ipv4Addr> {
        let path = self.lease_file.as_ref()?;
        match std::fs::read_to_string(path) {
            Ok(text) => parse_lease(&text, mac),
            Err(e) => {
                debug!("Cannot read lease file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Invalidate the station's slot. A running session keeps running even
    /// when the last station leaves.
    pub fn on_peer_leave(&self, mac: MacAddr) -> bool {
        let mut slots = self.slots.lock();

        let record = match slots.iter_mut().flatten().find(|r| r.valid && r.mac == mac) {
            Some(r) => r,
            None => {
                debug!("Leave for unknown station {}", mac);
                return false;
            }
        };
        record.valid = false;
        record.address = None;

        let remaining = slots.iter().flatten().filter(|r| r.valid).count();
        info!("Station {} left, {} remaining", mac, remaining);
        true
    }

    /// Snapshot of valid stations
    pub fn stations(&self) -> Vec<StationRecord> {
        self.slots.lock().iter().flatten().filter(|r| r.valid).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().flatten().filter(|r| r.valid).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Address leased to `mac` in dnsmasq lease file contents.
///
/// Lines look like `1700000000 02:00:00:00:00:01 10.42.0.57 host *`.
pub fn parse_lease(text: &str, mac: MacAddr) -> Option<Ipv4Addr> {
    text.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let _expiry = fields.next()?;
        let lease_mac: MacAddr = fields.next()?.parse().ok()?;
        if lease_mac != mac {
            return None;
        }
        fields.next()?.parse().ok()
    })
}

impl std::fmt::Debug for StationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StationRegistry")
            .field("pool_start", &self.pool_start)
            .field("stations", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0x02, 0, 0, 0, 0, last])
    }

    fn registry(capacity: usize) -> Arc<StationRegistry> {
        Arc::new(StationRegistry::new(
            capacity,
            Ipv4Addr::new(192, 168, 1, 2),
            Duration::from_millis(100),
            Arc::new(Signals::new()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_address_resolved_after_settle() {
        let reg = registry(2);
        assert_eq!(reg.on_peer_join(mac(1)), JoinOutcome::Accepted { slot: 0 });
        assert_eq!(reg.stations()[0].address, None);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(reg.stations()[0].address, Some(Ipv4Addr::new(192, 168, 1, 2)));
    }

    #[tokio::test]
    async fn test_overflow_rejected() {
        let reg = registry(2);
        reg.on_peer_join(mac(1));
        reg.on_peer_join(mac(2));
        reg.resolve_address(mac(1));
        reg.resolve_address(mac(2));

        assert_eq!(reg.on_peer_join(mac(3)), JoinOutcome::Rejected);
        let macs: Vec<_> = reg.stations().iter().map(|r| r.mac).collect();
        assert_eq!(macs, vec![mac(1), mac(2)]);
        assert_eq!(reg.resolve_address(mac(2)), Some(Ipv4Addr::new(192, 168, 1, 3)));
    }

    #[tokio::test]
    async fn test_duplicate_join() {
        let reg = registry(2);
        reg.on_peer_join(mac(1));
        assert_eq!(reg.on_peer_join(mac(1)), JoinOutcome::AlreadyPresent);
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_vacated_address_reused() {
        let reg = registry(3);
        for i in 1..=3 {
            reg.on_peer_join(mac(i));
            reg.resolve_address(mac(i));
        }

        assert!(reg.on_peer_leave(mac(2)));
        assert!(!reg.on_peer_leave(mac(2)));

        reg.on_peer_join(mac(4));
        // .3 is free again; .2 and .4 stay with their owners
        assert_eq!(reg.resolve_address(mac(4)), Some(Ipv4Addr::new(192, 168, 1, 3)));
        assert_eq!(reg.resolve_address(mac(3)), Some(Ipv4Addr::new(192, 168, 1, 4)));
        assert_eq!(reg.len(), 3);
    }

    #[tokio::test]
    async fn test_ready_fires_once() {
        let signals = Arc::new(Signals::new());
        let reg = Arc::new(StationRegistry::new(
            4,
            Ipv4Addr::new(10, 0, 0, 2),
            Duration::from_millis(1),
            Arc::clone(&signals),
        ));

        reg.on_peer_join(mac(1));
        assert!(signals.peer_ready.try_take());

        reg.on_peer_join(mac(2));
        reg.on_peer_leave(mac(1));
        reg.on_peer_join(mac(1));
        assert!(!signals.peer_ready.try_take());
    }

    #[test]
    fn test_parse_lease() {
        let leases = "1700000000 02:00:00:00:00:07 10.42.0.57 phone *\n\
                      1700000100 02:00:00:00:00:01 10.42.0.12 laptop 01:02:00:00:00:00:01\n";
        assert_eq!(parse_lease(leases, mac(1)), Some(Ipv4Addr::new(10, 42, 0, 12)));
        assert_eq!(parse_lease(leases, mac(7)), Some(Ipv4Addr::new(10, 42, 0, 57)));
        assert_eq!(parse_lease(leases, mac(2)), None);
        assert_eq!(parse_lease("garbage\n", mac(1)), None);
    }

    #[tokio::test]
    async fn test_leased_address_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dnsmasq-wlan0.leases");
        std::fs::write(&path, "1700000000 02:00:00:00:00:01 10.42.0.57 phone *\n").unwrap();

        let reg = Arc::new(
            StationRegistry::new(
                2,
                Ipv4Addr::new(192, 168, 1, 2),
                Duration::from_millis(100),
                Arc::new(Signals::new()),
            )
            .with_lease_file(&path),
        );
        reg.on_peer_join(mac(1));
        reg.on_peer_join(mac(2));

        assert_eq!(reg.resolve_address(mac(1)), Some(Ipv4Addr::new(10, 42, 0, 57)));
        // No lease yet: falls back to the pool
        assert_eq!(reg.resolve_address(mac(2)), Some(Ipv4Addr::new(192, 168, 1, 2)));
    }

    #[test]
    fn test_resolve_unknown_station() {
        let reg = registry(1);
        assert_eq!(reg.resolve_address(mac(9)), None);
        assert!(reg.is_empty());
    }
}
