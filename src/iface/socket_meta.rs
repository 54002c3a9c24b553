use crate::socket::PollAt;
use crate::time::{Duration, Instant};
use crate::wire::IpAddress;

/// How long a socket stays quiet after a dispatch attempt failed because the
/// destination's hardware address hadn't been resolved yet.
///
/// Without this, a socket that has data queued would be polled again on
/// every single call to `poll()`, spamming ARP requests (the neighbor cache
/// itself rate-limits those, but we'd still burn a full egress pass each
/// time for nothing).
const NEIGHBOR_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Per-socket bookkeeping that isn't specific to any one socket type.
///
/// Kept alongside each socket in a [`SocketSet`](super::SocketSet) entry so
/// the egress/poll_at loops can rate-limit a socket that's blocked on
/// neighbor discovery without every socket type reimplementing the same
/// backoff.
#[derive(Debug, Default, Clone, Copy)]
pub struct Meta {
    blocked_on: Option<(Instant, IpAddress)>,
}

impl Meta {
    /// Whether this socket is allowed to attempt egress right now.
    pub(crate) fn egress_permitted<F>(&self, timestamp: Instant, has_neighbor: F) -> bool
    where
        F: Fn(IpAddress) -> bool,
    {
        match self.blocked_on {
            None => true,
            Some((_, addr)) if has_neighbor(addr) => true,
            Some((retry_at, _)) => timestamp >= retry_at,
        }
    }

    /// Combine a socket's own poll deadline with any neighbor-discovery
    /// backoff in effect for it.
    pub(crate) fn poll_at<F>(&self, socket_poll_at: PollAt, has_neighbor: F) -> PollAt
    where
        F: Fn(IpAddress) -> bool,
    {
        match socket_poll_at {
            PollAt::Ingress => PollAt::Ingress,
            PollAt::Time(t) => PollAt::Time(t),
            PollAt::Now => match self.blocked_on {
                None => PollAt::Now,
                Some((_, addr)) if has_neighbor(addr) => PollAt::Now,
                Some((retry_at, _)) => PollAt::Time(retry_at),
            },
        }
    }

    /// Record that dispatch just failed because `neighbor_addr`'s hardware
    /// address isn't known yet.
    pub(crate) fn neighbor_missing(&mut self, timestamp: Instant, neighbor_addr: IpAddress) {
        net_trace!("neighbor {} missing, retrying later", neighbor_addr);
        self.blocked_on = Some((timestamp + NEIGHBOR_RETRY_DELAY, neighbor_addr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_meta_permits_egress() {
        let meta = Meta::default();
        assert!(meta.egress_permitted(Instant::from_millis(0), |_| false));
    }

    #[test]
    fn blocked_meta_waits_out_the_retry_delay() {
        let mut meta = Meta::default();
        let addr = IpAddress::v4(192, 168, 1, 1);
        meta.neighbor_missing(Instant::from_millis(0), addr);
        assert!(!meta.egress_permitted(Instant::from_millis(1), |_| false));
        assert!(meta.egress_permitted(Instant::from_millis(200), |_| false));
    }

    #[test]
    fn blocked_meta_unblocks_once_neighbor_resolves() {
        let mut meta = Meta::default();
        let addr = IpAddress::v4(192, 168, 1, 1);
        meta.neighbor_missing(Instant::from_millis(0), addr);
        assert!(meta.egress_permitted(Instant::from_millis(1), |a| a == addr));
    }
}
