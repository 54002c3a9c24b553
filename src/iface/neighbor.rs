use heapless::LinearMap;

use crate::config::{
    ARP_BASE_RESPONSE_TIMEOUT, ARP_PROTECT_COUNT, ARP_VALID_TIMEOUT, IFACE_NEIGHBOR_CACHE_COUNT,
};
use crate::time::{Duration, Instant};
use crate::wire::{HardwareAddress, IpAddress};

/// The result of a neighbor cache lookup.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Answer {
    /// The neighbor's hardware address is known.
    Found(HardwareAddress),
    /// The neighbor's hardware address is not known, and a new request should not be
    /// sent yet because the silent period after a previous request has not elapsed.
    RateLimited,
    /// The neighbor's hardware address is not known, and a request should be sent.
    NotFound,
}

impl Answer {
    /// Returns `true` if the neighbor is found.
    pub fn found(&self) -> bool {
        matches!(self, Answer::Found(_))
    }
}

/// An ARP resolver backed by a map.
///
/// The cache keeps at most [`IFACE_NEIGHBOR_CACHE_COUNT`] translations from an
/// IP address to the hardware address it is currently reachable at, and rate
/// limits repeat ARP requests to a single in-flight query at a time so a
/// socket that is waiting on an unresolved neighbor doesn't cause an ARP
/// request to be sent on every poll.
#[derive(Debug)]
pub struct Cache {
    storage: LinearMap<IpAddress, Neighbor, IFACE_NEIGHBOR_CACHE_COUNT>,
    silent_until: Instant,
}

impl Cache {
    /// Create an empty neighbor cache.
    pub fn new() -> Self {
        Self {
            storage: LinearMap::new(),
            silent_until: Instant::from_millis(0),
        }
    }

    /// Remember a neighbor's hardware address, evicting the oldest entry if the
    /// cache is already full.
    pub(crate) fn fill(&mut self, addr: IpAddress, hardware_addr: HardwareAddress, timestamp: Instant) {
        if let Some(neighbor) = self.storage.get_mut(&addr) {
            neighbor.hardware_addr = hardware_addr;
            neighbor.expires_at = timestamp + ARP_VALID_TIMEOUT;
            return;
        }

        if self.storage.insert(
            addr,
            Neighbor {
                hardware_addr,
                expires_at: timestamp + ARP_VALID_TIMEOUT,
            },
        ).is_err() {
            // The map is full; evict the entry that expires soonest, skipping the
            // most recently touched `ARP_PROTECT_COUNT` entries so a neighbor we
            // just resolved isn't immediately thrown away to make room for
            // another.
            self.evict_one();
            let _ = self.storage.insert(
                addr,
                Neighbor {
                    hardware_addr,
                    expires_at: timestamp + ARP_VALID_TIMEOUT,
                },
            );
        }
    }

    /// Update a cache entry's expiry if it already exists, without creating a
    /// new one. Used to opportunistically refresh neighbors whose traffic we
    /// merely observe, rather than to fill the cache from unsolicited ARP.
    pub(crate) fn reset_expiry_if_existing(
        &mut self,
        addr: IpAddress,
        hardware_addr: HardwareAddress,
        timestamp: Instant,
    ) {
        if let Some(neighbor) = self.storage.get_mut(&addr) {
            neighbor.hardware_addr = hardware_addr;
            neighbor.expires_at = timestamp + ARP_VALID_TIMEOUT;
        }
    }

    /// Evict the entry that expires soonest, unless fewer than
    /// [`ARP_PROTECT_COUNT`] entries remain (in which case we'd rather fail
    /// the insert than thrash a nearly-empty cache).
    fn evict_one(&mut self) {
        if self.storage.len() < ARP_PROTECT_COUNT {
            return;
        }
        let oldest = self
            .storage
            .iter()
            .min_by_key(|(_, n)| n.expires_at)
            .map(|(addr, _)| *addr);
        if let Some(addr) = oldest {
            self.storage.remove(&addr);
        }
    }

    pub(crate) fn lookup(&self, addr: &IpAddress, timestamp: Instant) -> Answer {
        if let Some(neighbor) = self.storage.get(addr) {
            if neighbor.expires_at >= timestamp {
                return Answer::Found(neighbor.hardware_addr);
            }
        }

        if timestamp < self.silent_until {
            Answer::RateLimited
        } else {
            Answer::NotFound
        }
    }

    /// Mark that a resolution request has just been sent, silencing further
    /// requests for the same miss until [`ARP_BASE_RESPONSE_TIMEOUT`] has
    /// passed.
    pub(crate) fn limit_rate(&mut self, timestamp: Instant) {
        self.silent_until = timestamp + ARP_BASE_RESPONSE_TIMEOUT;
    }

    pub(crate) fn flush(&mut self) {
        self.storage.clear()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// A cached neighbor.
///
/// A neighbor mapping translates from a protocol address to a hardware address,
/// and contains the timestamp past which the mapping should be discarded.
#[derive(Debug, Clone, Copy)]
struct Neighbor {
    hardware_addr: HardwareAddress,
    expires_at: Instant,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::EthernetAddress;

    fn hw(b: u8) -> HardwareAddress {
        HardwareAddress::Ethernet(EthernetAddress([0, 0, 0, 0, 0, b]))
    }

    #[test]
    fn fill_then_lookup_finds_entry() {
        let mut cache = Cache::new();
        let addr = IpAddress::v4(192, 168, 1, 1);
        cache.fill(addr, hw(1), Instant::from_millis(0));
        assert_eq!(cache.lookup(&addr, Instant::from_millis(0)), Answer::Found(hw(1)));
    }

    #[test]
    fn expired_entry_is_not_found() {
        let mut cache = Cache::new();
        let addr = IpAddress::v4(192, 168, 1, 1);
        cache.fill(addr, hw(1), Instant::from_millis(0));
        let late = Instant::from_millis(0) + ARP_VALID_TIMEOUT + Duration::from_millis(1);
        assert_eq!(cache.lookup(&addr, late), Answer::NotFound);
    }

    #[test]
    fn rate_limiting_silences_repeat_misses() {
        let mut cache = Cache::new();
        let addr = IpAddress::v4(192, 168, 1, 2);
        assert_eq!(cache.lookup(&addr, Instant::from_millis(0)), Answer::NotFound);
        cache.limit_rate(Instant::from_millis(0));
        assert_eq!(cache.lookup(&addr, Instant::from_millis(1)), Answer::RateLimited);
    }
}
