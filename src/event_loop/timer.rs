//! A fixed-capacity timer queue, ordered by expiry.
//!
//! This is separate from the per-socket timers already driven by
//! [`Interface::poll_at`](crate::iface::Interface::poll_at) (retransmit, TIME_WAIT,
//! keep-alive, ...): those stay internal to each socket. `TimerQueue` is for
//! application-level timers the embedding program registers directly with the
//! [`EventLoop`](super::EventLoop), e.g. a periodic housekeeping tick.
//!
//! Entries are stored unsorted and scanned linearly on each operation; at the
//! small `N` this is built for (dozens of timers, not thousands) that beats
//! the bookkeeping of a real binary heap.

use heapless::Vec;

use crate::time::Instant;

/// Error returned when a [`TimerQueue`] has no free slot left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full;

/// Opaque reference to a scheduled timer, returned by [`TimerQueue::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(usize);

struct Entry {
    at: Instant,
    token: u32,
    alive: bool,
}

/// A bounded set of (expiry, token) pairs.
///
/// `token` is caller-defined; it's handed back by [`TimerQueue::pop_expired`]
/// so the caller can look up what the timer was for without `TimerQueue`
/// needing to know anything about it.
pub struct TimerQueue<const N: usize> {
    entries: Vec<Entry, N>,
}

impl<const N: usize> TimerQueue<N> {
    pub fn new() -> Self {
        TimerQueue {
            entries: Vec::new(),
        }
    }

    /// Schedule `token` to fire at `at`. Reuses a slot freed by a prior
    /// [`cancel`](Self::cancel) or [`pop_expired`](Self::pop_expired) before
    /// growing the backing storage.
    pub fn schedule(&mut self, at: Instant, token: u32) -> Result<TimerHandle, Full> {
        if let Some(index) = self.entries.iter().position(|e| !e.alive) {
            self.entries[index] = Entry {
                at,
                token,
                alive: true,
            };
            return Ok(TimerHandle(index));
        }
        let index = self.entries.len();
        self.entries
            .push(Entry {
                at,
                token,
                alive: true,
            })
            .map_err(|_| Full)?;
        Ok(TimerHandle(index))
    }

    pub fn cancel(&mut self, handle: TimerHandle) {
        if let Some(entry) = self.entries.get_mut(handle.0) {
            entry.alive = false;
        }
    }

    /// Remove and return the token of one expired timer, if any.
    ///
    /// Call repeatedly until it returns `None` to drain everything due at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<u32> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.alive && e.at <= now)
            .min_by_key(|(_, e)| e.at)
            .map(|(i, _)| i)?;
        self.entries[index].alive = false;
        Some(self.entries[index].token)
    }

    /// The earliest expiry still pending, for sizing a `poll` timeout.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|e| e.alive)
            .map(|e| e.at)
            .min()
    }
}

impl<const N: usize> Default for TimerQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_expired_returns_earliest_first() {
        let mut q: TimerQueue<4> = TimerQueue::new();
        q.schedule(Instant::from_millis(200), 2).unwrap();
        q.schedule(Instant::from_millis(100), 1).unwrap();

        assert_eq!(q.pop_expired(Instant::from_millis(150)), Some(1));
        assert_eq!(q.pop_expired(Instant::from_millis(150)), None);
        assert_eq!(q.pop_expired(Instant::from_millis(300)), Some(2));
        assert_eq!(q.pop_expired(Instant::from_millis(300)), None);
    }

    #[test]
    fn cancel_prevents_firing_and_frees_the_slot() {
        let mut q: TimerQueue<1> = TimerQueue::new();
        let h = q.schedule(Instant::from_millis(100), 1).unwrap();
        q.cancel(h);
        assert_eq!(q.pop_expired(Instant::from_millis(1000)), None);

        // slot was freed, so a new schedule can reuse it without hitting Full
        q.schedule(Instant::from_millis(50), 2).unwrap();
        assert_eq!(q.pop_expired(Instant::from_millis(1000)), Some(2));
    }

    #[test]
    fn schedule_past_capacity_is_full() {
        let mut q: TimerQueue<1> = TimerQueue::new();
        q.schedule(Instant::from_millis(1), 1).unwrap();
        assert_eq!(q.schedule(Instant::from_millis(2), 2), Err(Full));
    }

    #[test]
    fn next_expiry_ignores_cancelled_timers() {
        let mut q: TimerQueue<2> = TimerQueue::new();
        let h = q.schedule(Instant::from_millis(50), 1).unwrap();
        q.schedule(Instant::from_millis(200), 2).unwrap();
        q.cancel(h);
        assert_eq!(q.next_expiry(), Some(Instant::from_millis(200)));
    }
}
