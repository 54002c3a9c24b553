//! Compile-time tunables.
//!
//! The original design used a template-based "options" registry to bind
//! tunables (pool sizes, timeouts, ...) into the types that needed them. We
//! use plain `const`s instead: every fixed-capacity collection in the stack
//! (the ARP table, the PCB pool, the reassembly pool, ...) is sized from one
//! of these at compile time. Changing a number here changes the memory
//! footprint of the whole stack; nothing here is read at runtime.

use crate::time::Duration;

/// Number of entries in the interface's neighbor (ARP) table.
pub const IFACE_NEIGHBOR_CACHE_COUNT: usize = 16;

/// Of `IFACE_NEIGHBOR_CACHE_COUNT` entries, at least this many "hard" (actively
/// resolved) entries are protected from eviction by opportunistically learned
/// "weak" entries.
pub const ARP_PROTECT_COUNT: usize = 4;

/// Number of broadcast ARP request retransmits before giving up on a query.
pub const ARP_QUERY_ATTEMPTS: u8 = 3;

/// Base timeout for the first ARP request retransmit; doubles on each retry.
pub const ARP_BASE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Once valid, how long an ARP entry may be used without triggering a refresh.
pub const ARP_VALID_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum number of routing table entries.
pub const IFACE_MAX_ROUTE_COUNT: usize = 8;

/// Maximum number of registered link-state-change observers per interface.
pub const IFACE_MAX_ETH_STATE_OBSERVERS: usize = 4;

/// Maximum number of concurrent reassembly contexts (one per in-progress
/// fragmented datagram).
pub const REASS_MAX_ENTRIES: usize = 4;

/// Maximum number of bytes a single reassembly context may buffer.
pub const REASS_MAX_SIZE: usize = 65535;

/// A reassembly context that hasn't completed within this long is discarded.
pub const REASS_TIMEOUT: Duration = Duration::from_secs(15);

/// Number of entries in the path-MTU cache.
pub const PMTU_CACHE_COUNT: usize = 8;

/// Expiry for a PMTU cache entry after which the stack re-probes the full MTU.
pub const PMTU_EXPIRE: Duration = Duration::from_secs(600);

/// Minimum PMTU the stack will ever use (RFC 791 / RFC 1122 floor).
pub const IP_MIN_MTU: usize = 576;

/// Duplicate ACKs required to trigger fast retransmit (RFC 5681 ยง3.2).
pub const TCP_FAST_RTX_DUP_ACKS: u8 = 3;

/// Floor and ceiling for the retransmission timeout.
pub const TCP_MIN_RTO: Duration = Duration::from_millis(300);
pub const TCP_MAX_RTO: Duration = Duration::from_secs(60);

/// Default MSS used until negotiated otherwise (RFC 1122 ยง4.2.2.6).
pub const TCP_DEFAULT_MSS: usize = 536;

/// Divisor applied to the receive buffer size to get the window-update
/// threshold: an update is sent once the receivable window has grown by at
/// least `buffer_size / WINDOW_UPDATE_THRES_DIV` (minimum 1 byte). Flagged in
/// the design notes as a tunable without a principled derivation upstream.
pub const WINDOW_UPDATE_THRES_DIV: usize = 8;

/// Maximum advertised TCP window (2^30 - 1, RFC 1323).
pub const TCP_MAX_WINDOW: u32 = (1 << 30) - 1;

/// 2 * MSL, the TIME_WAIT linger duration (RFC 793 suggests 2 minutes; we use
/// a shorter default suitable for an embedded/test environment).
pub const TCP_MSL: Duration = Duration::from_secs(30);

/// Ephemeral port range used for UDP (and TCP active-open) auto-binding.
pub const EPHEMERAL_PORT_FIRST: u16 = 49152;
pub const EPHEMERAL_PORT_LAST: u16 = 65535;
