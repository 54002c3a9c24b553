//! A monotonic instant/duration pair used throughout the stack.
//!
//! The event loop and every timer in the stack (ARP retry, TCP RTO, TIME_WAIT,
//! reassembly expiry, ...) is expressed in terms of [`Instant`] and [`Duration`].
//! Both are backed by a signed 64-bit millisecond count, which keeps timer
//! arithmetic simple (no u64 wraparound to worry about) while giving a range
//! that comfortably outlives any process using this stack.

use core::fmt;
use core::ops;

/// A point in time, represented as milliseconds since an arbitrary epoch.
///
/// The absolute value is meaningless; only differences between `Instant`s are
/// defined. Platform code is expected to hand these out from a single
/// monotonic clock (see the platform contract in the crate root docs).
#[derive(Debug, Default, Hash, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
pub struct Instant {
    millis: i64,
}

impl Instant {
    pub const ZERO: Instant = Instant::from_millis(0);

    /// The current time, measured against the process's own monotonic clock.
    ///
    /// The epoch is whenever the process happened to start `std`'s monotonic
    /// clock tracking from; only differences between calls are meaningful,
    /// same as for any other `Instant`.
    pub fn now() -> Instant {
        use std::sync::OnceLock;
        static START: OnceLock<std::time::Instant> = OnceLock::new();
        let start = *START.get_or_init(std::time::Instant::now);
        Instant::from_millis(start.elapsed().as_millis() as i64)
    }

    /// Create a new `Instant` from a number of milliseconds.
    pub const fn from_millis(millis: i64) -> Instant {
        Instant { millis }
    }

    /// Create a new `Instant` from a number of seconds.
    pub const fn from_secs(secs: i64) -> Instant {
        Instant {
            millis: secs * 1000,
        }
    }

    pub const fn total_millis(&self) -> i64 {
        self.millis
    }

    pub const fn secs(&self) -> i64 {
        self.millis / 1000
    }

    pub const fn millis(&self) -> i64 {
        self.millis % 1000
    }

    pub fn checked_sub(self, other: Duration) -> Option<Instant> {
        self.millis
            .checked_sub(other.millis as i64)
            .map(|millis| Instant { millis })
    }

    pub fn checked_add(self, other: Duration) -> Option<Instant> {
        self.millis
            .checked_add(other.millis as i64)
            .map(|millis| Instant { millis })
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}s", self.secs(), self.millis())
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis + rhs.millis as i64)
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.millis += rhs.millis as i64;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis - rhs.millis as i64)
    }
}

impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        Duration::from_millis((self.millis - rhs.millis).unsigned_abs())
    }
}

/// A length of time, represented as a number of milliseconds.
#[derive(Debug, Default, Hash, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
pub struct Duration {
    millis: u64,
}

impl Duration {
    pub const ZERO: Duration = Duration::from_millis(0);

    pub const fn from_millis(millis: u64) -> Duration {
        Duration { millis }
    }

    pub const fn from_secs(secs: u64) -> Duration {
        Duration {
            millis: secs * 1000,
        }
    }

    pub const fn secs(&self) -> u64 {
        self.millis / 1000
    }

    pub const fn millis(&self) -> u64 {
        self.millis % 1000
    }

    pub const fn total_millis(&self) -> u64 {
        self.millis
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}s", self.secs(), self.millis())
    }
}

impl ops::Add<Duration> for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration::from_millis(self.millis + rhs.millis)
    }
}

impl ops::Sub<Duration> for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        Duration::from_millis(self.millis.saturating_sub(rhs.millis))
    }
}

impl ops::Mul<u32> for Duration {
    type Output = Duration;

    fn mul(self, rhs: u32) -> Duration {
        Duration::from_millis(self.millis * rhs as u64)
    }
}

impl From<::core::time::Duration> for Duration {
    fn from(other: ::core::time::Duration) -> Duration {
        Duration::from_millis(other.as_millis() as u64)
    }
}

impl From<Duration> for ::core::time::Duration {
    fn from(val: Duration) -> Self {
        ::core::time::Duration::from_millis(val.total_millis())
    }
}
