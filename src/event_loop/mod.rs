//! Drives an [`Interface`] to completion: ingress, egress, and the sleep
//! between polls, in one call per iteration.
//!
//! Everything the stack itself needs to wait on (retransmit timers, TIME_WAIT,
//! ARP retries, reassembly expiry, ...) is already folded into
//! [`Interface::poll_delay`]; `EventLoop` only adds two things on top of that:
//! an [`timer::TimerQueue`] for timers the *embedding program* registers (not
//! the stack), and an [`signal::AsyncSignal`] so a different thread can wake a
//! blocked [`EventLoop::run_for`] early.

pub mod observer;
pub mod signal;
pub mod timer;

pub use self::observer::{ObservableList, ObserverHandle};
pub use self::signal::AsyncSignal;
pub use self::timer::TimerQueue;

use core::cmp;

use crate::iface::{Interface, PollResult, SocketSet};
use crate::phy::Device;
use crate::time::{Duration, Instant};

/// Upper bound on how long a single [`EventLoop::run_for`] call blocks when
/// neither the stack nor any registered app timer has anything pending.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Owns the pieces needed to run one interface to completion: the transport,
/// the interface state machine, the socket arena, and an app-level timer
/// queue of the caller's choosing capacity.
pub struct EventLoop<D: Device, const TIMERS: usize> {
    device: D,
    iface: Interface,
    timers: TimerQueue<TIMERS>,
    wake: AsyncSignal,
}

impl<D: Device, const TIMERS: usize> EventLoop<D, TIMERS> {
    pub fn new(device: D, iface: Interface) -> Self {
        EventLoop {
            device,
            iface,
            timers: TimerQueue::new(),
            wake: AsyncSignal::new(),
        }
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn iface_mut(&mut self) -> &mut Interface {
        &mut self.iface
    }

    pub fn timers_mut(&mut self) -> &mut TimerQueue<TIMERS> {
        &mut self.timers
    }

    /// A handle another thread can use to wake a blocked [`run_for`](Self::run_for).
    pub fn waker(&self) -> &AsyncSignal {
        &self.wake
    }

    /// Run one ingress+egress pass and drain any app timers already due.
    ///
    /// Returns the tokens of timers that fired, oldest-due first, and the
    /// interface's verdict on whether socket state changed.
    pub fn poll(&mut self, now: Instant, sockets: &mut SocketSet<'_>) -> (PollResult, heapless::Vec<u32, TIMERS>) {
        let result = self.iface.poll(now, &mut self.device, sockets);

        let mut fired = heapless::Vec::new();
        while let Some(token) = self.timers.pop_expired(now) {
            if fired.push(token).is_err() {
                // Caller's Vec is sized to TIMERS, same as the queue itself,
                // so this can't actually happen; stop rather than panic.
                break;
            }
        }

        (result, fired)
    }

    /// Block until there's work to do, then run one [`poll`](Self::poll) pass.
    ///
    /// Wakes on whichever comes first: a stack timer expiring, an app timer
    /// expiring, or [`waker`](Self::waker) being signaled from another thread.
    /// Device readability itself isn't waited on here -- that's the caller's
    /// `Device` backend's concern (e.g. blocking `recv` on the TAP fd); this
    /// only bounds how long we sleep when nothing else would wake us.
    pub fn run_for(&mut self, sockets: &mut SocketSet<'_>) -> (PollResult, heapless::Vec<u32, TIMERS>) {
        let now = Instant::now();
        let stack_delay = self.iface.poll_delay(now, sockets);
        let timer_delay = self
            .timers
            .next_expiry()
            .map(|at| at.checked_sub_instant(now));

        let delay = match (stack_delay, timer_delay) {
            (Some(a), Some(b)) => cmp::min(a, b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => IDLE_POLL_INTERVAL,
        };

        self.wake.wait_timeout(delay);
        self.poll(Instant::now(), sockets)
    }
}

trait InstantExt {
    fn checked_sub_instant(self, other: Instant) -> Duration;
}

impl InstantExt for Instant {
    fn checked_sub_instant(self, other: Instant) -> Duration {
        if self <= other {
            Duration::ZERO
        } else {
            Duration::from_millis((self.total_millis() - other.total_millis()) as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::Config;
    use crate::phy::{Loopback, Medium};
    use crate::wire::HardwareAddress;

    fn loopback_loop() -> EventLoop<Loopback, 4> {
        let mut device = Loopback::new(Medium::Ethernet);
        let config = Config::new(HardwareAddress::Ethernet(Default::default()));
        let iface = Interface::new(config, &mut device, Instant::ZERO);
        EventLoop::new(device, iface)
    }

    #[test]
    fn poll_drains_app_timers_due_at_now() {
        let mut ev = loopback_loop();
        let mut sockets: SocketSet<'_> = SocketSet::new(Vec::new());
        ev.timers_mut()
            .schedule(Instant::from_millis(0), 42)
            .unwrap();

        let (_, fired) = ev.poll(Instant::from_millis(10), &mut sockets);
        assert_eq!(fired.as_slice(), &[42]);
    }

    #[test]
    fn poll_leaves_future_app_timers_pending() {
        let mut ev = loopback_loop();
        let mut sockets: SocketSet<'_> = SocketSet::new(Vec::new());
        ev.timers_mut()
            .schedule(Instant::from_millis(1000), 7)
            .unwrap();

        let (_, fired) = ev.poll(Instant::from_millis(10), &mut sockets);
        assert!(fired.is_empty());
    }
}
