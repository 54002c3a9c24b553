//! Path-MTU cache (RFC 1191): remembers, per destination, the smallest MTU a
//! Destination-Unreachable/Fragmentation-Required reply has told us about.
//!
//! Modeled on the neighbor cache: a bounded map keyed by destination address,
//! LRU-evicted on overflow, with entries that age out and let the path MTU
//! grow back towards the link MTU after a while. A shrink is applied to
//! open TCP connections immediately, by walking the socket set at the point
//! [`update`](PmtuCache::update) is called rather than through a separate
//! registered-observer side table -- the only caller already has the whole
//! `SocketSet` in hand.

use heapless::LinearMap;

use crate::config::{PMTU_CACHE_COUNT, PMTU_EXPIRE};
use crate::time::Instant;
use crate::wire::IpAddress;

#[derive(Debug, Clone, Copy)]
struct Entry {
    mtu: usize,
    expires_at: Instant,
}

pub struct PmtuCache {
    entries: LinearMap<IpAddress, Entry, PMTU_CACHE_COUNT>,
}

impl PmtuCache {
    pub fn new() -> Self {
        PmtuCache {
            entries: LinearMap::new(),
        }
    }

    /// Look up the path MTU to `remote`, if we've cached one and it hasn't
    /// aged out yet.
    pub fn get(&self, remote: IpAddress, now: Instant) -> Option<usize> {
        self.entries.get(&remote).and_then(|entry| {
            if entry.expires_at >= now {
                Some(entry.mtu)
            } else {
                None
            }
        })
    }

    /// Record a Next-Hop MTU reported for `remote`, evicting the
    /// longest-cached entry if the table is full. Returns `true` if this
    /// actually lowered the path MTU for `remote` (as opposed to creating a
    /// fresh entry at the reported value, or reporting a value no smaller
    /// than what we already had).
    pub fn update(&mut self, remote: IpAddress, mtu: usize, now: Instant) -> bool {
        let expires_at = now + PMTU_EXPIRE;
        if let Some(existing) = self.entries.get_mut(&remote) {
            let shrunk = mtu < existing.mtu;
            existing.mtu = existing.mtu.min(mtu);
            existing.expires_at = expires_at;
            return shrunk;
        }

        if self.entries.insert(remote, Entry { mtu, expires_at }).is_err() {
            self.evict_oldest();
            let _ = self.entries.insert(remote, Entry { mtu, expires_at });
        }
        true
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.expires_at)
            .map(|(addr, _)| *addr);
        if let Some(addr) = oldest {
            self.entries.remove(&addr);
        }
    }
}

impl Default for PmtuCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_reports_shrink() {
        let mut cache = PmtuCache::new();
        let addr = IpAddress::v4(10, 0, 0, 1);
        assert!(cache.update(addr, 1000, Instant::from_millis(0)));
        assert_eq!(cache.get(addr, Instant::from_millis(0)), Some(1000));
    }

    #[test]
    fn reporting_a_larger_mtu_does_not_grow_the_cached_value() {
        let mut cache = PmtuCache::new();
        let addr = IpAddress::v4(10, 0, 0, 1);
        cache.update(addr, 1000, Instant::from_millis(0));
        let shrunk = cache.update(addr, 1200, Instant::from_millis(0));
        assert!(!shrunk);
        assert_eq!(cache.get(addr, Instant::from_millis(0)), Some(1000));
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let mut cache = PmtuCache::new();
        let addr = IpAddress::v4(10, 0, 0, 1);
        cache.update(addr, 1000, Instant::from_millis(0));
        let late = Instant::from_millis(0) + PMTU_EXPIRE + crate::time::Duration::from_millis(1);
        assert_eq!(cache.get(addr, late), None);
    }

    #[test]
    fn eviction_makes_room_when_the_table_is_full() {
        let mut cache = PmtuCache::new();
        for i in 0..(PMTU_CACHE_COUNT as u8) {
            cache.update(IpAddress::v4(10, 0, 0, i), 1000, Instant::from_millis(i as i64));
        }
        let newcomer = IpAddress::v4(10, 0, 1, 0);
        cache.update(newcomer, 1000, Instant::from_millis(1000));
        assert_eq!(cache.get(newcomer, Instant::from_millis(1000)), Some(1000));
        // The entry with the earliest expiry (addr .0, inserted at t=0) should
        // have been the one evicted.
        assert_eq!(
            cache.get(IpAddress::v4(10, 0, 0, 0), Instant::from_millis(1000)),
            None
        );
    }
}
