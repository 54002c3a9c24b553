//! IPv4 reassembly of fragmented datagrams (RFC 791 §3.2), and egress
//! fragmentation of oversized outgoing ones.
//!
//! Entries are keyed by (src, dst, ident, protocol); each buffers the
//! datagram's bytes directly at their final offset and tracks which ranges
//! have arrived with an [`Assembler`]. A datagram is handed back once the
//! assembler reports one contiguous run from offset zero and the
//! no-more-fragments tail has been seen.
//!
//! Egress fragmentation (see [`Fragmenter`]) works the other way around:
//! the whole payload is serialized once into a scratch buffer, then handed
//! out in MTU-sized, 8-byte-aligned slices, one per call to
//! [`Fragmenter::pop_fragment`].

use core::ops::Range;

use heapless::LinearMap;

use crate::config::{REASS_MAX_ENTRIES, REASS_MAX_SIZE, REASS_TIMEOUT};
use crate::time::Instant;
use crate::wire::{EthernetAddress, Ipv4FragKey, Ipv4Repr};

struct ReassemblyEntry {
    buffer: alloc_buffer::Buffer,
    assembler: crate::storage::Assembler,
    total_len: Option<usize>,
    last_used: Instant,
}

/// Avoids a 64 KiB `[u8; REASS_MAX_SIZE]` living directly in every
/// `ReassemblyEntry` match arm's debug formatting; just a named newtype.
mod alloc_buffer {
    use crate::config::REASS_MAX_SIZE;

    pub(super) struct Buffer(pub [u8; REASS_MAX_SIZE]);

    impl Buffer {
        pub(super) fn zeroed() -> Self {
            Buffer([0; REASS_MAX_SIZE])
        }
    }
}

impl ReassemblyEntry {
    fn new(now: Instant) -> Self {
        ReassemblyEntry {
            buffer: alloc_buffer::Buffer::zeroed(),
            assembler: crate::storage::Assembler::new(),
            total_len: None,
            last_used: now,
        }
    }
}

/// The pool of in-progress reassembly contexts for one interface.
pub(crate) struct FragmentsBuffer {
    entries: LinearMap<Ipv4FragKey, ReassemblyEntry, REASS_MAX_ENTRIES>,
    // Scratch space a completed datagram is copied into, so `reassemble` can
    // hand back a slice after its source entry is freed.
    complete: alloc_buffer::Buffer,
}

impl FragmentsBuffer {
    pub(crate) fn new() -> Self {
        FragmentsBuffer {
            entries: LinearMap::new(),
            complete: alloc_buffer::Buffer::zeroed(),
        }
    }

    /// Fold one fragment into the reassembly context for `key`, returning the
    /// full datagram's bytes once every fragment has arrived.
    ///
    /// `offset`/`payload` describe this fragment's placement in the
    /// reassembled datagram; `more_frags` is the IPv4 header's MF bit.
    pub(crate) fn reassemble(
        &mut self,
        now: Instant,
        key: Ipv4FragKey,
        offset: usize,
        more_frags: bool,
        payload: &[u8],
    ) -> Option<&[u8]> {
        self.expire(now);

        if payload.is_empty() || offset + payload.len() > REASS_MAX_SIZE {
            net_trace!("reassembly: fragment out of bounds, dropping");
            return None;
        }

        if !self.entries.contains_key(&key) && self.entries.len() == REASS_MAX_ENTRIES {
            self.evict_oldest();
        }

        let entry = match self.entries.get_mut(&key) {
            Some(entry) => entry,
            None => {
                if self
                    .entries
                    .insert(key, ReassemblyEntry::new(now))
                    .is_err()
                {
                    net_trace!("reassembly: pool full, dropping fragment");
                    return None;
                }
                self.entries.get_mut(&key).unwrap()
            }
        };

        entry.last_used = now;
        entry.buffer.0[offset..offset + payload.len()].copy_from_slice(payload);
        if entry.assembler.add(offset, payload.len()).is_err() {
            net_trace!("reassembly: too many disjoint fragments, dropping entry");
            self.entries.remove(&key);
            return None;
        }
        if !more_frags {
            entry.total_len = Some(offset + payload.len());
        }

        let entry = self.entries.get(&key).unwrap();
        let total = match entry.total_len {
            Some(total) if entry.assembler.peek_front() >= total => total,
            _ => return None,
        };
        self.complete.0[..total].copy_from_slice(&entry.buffer.0[..total]);
        self.entries.remove(&key);
        Some(&self.complete.0[..total])
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| *k);
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    fn expire(&mut self, now: Instant) {
        let expired: heapless::Vec<Ipv4FragKey, REASS_MAX_ENTRIES> = self
            .entries
            .iter()
            .filter(|(_, e)| now >= e.last_used + REASS_TIMEOUT)
            .map(|(k, _)| *k)
            .collect();
        for key in expired {
            net_trace!("reassembly: entry timed out");
            self.entries.remove(&key);
        }
    }
}

/// One fragment handed out by [`Fragmenter::pop_fragment`]: everything the
/// caller needs to emit it onto the wire, except the fragment's data bytes
/// themselves (fetch those with [`Fragmenter::fragment_data`]).
pub(crate) struct FragmentPlan {
    pub(crate) repr: Ipv4Repr,
    pub(crate) more_frags: bool,
    pub(crate) frag_offset: u16,
    pub(crate) dst_hardware_addr: EthernetAddress,
    pub(crate) range: Range<usize>,
}

struct FragmenterState {
    repr: Ipv4Repr,
    dst_hardware_addr: EthernetAddress,
    total_len: usize,
    sent: usize,
    frag_size: usize,
}

/// Splits an oversized outgoing IPv4 datagram into 8-byte-aligned fragments.
///
/// A transmission is started with [`start`](Self::start), which takes a
/// fully-serialized IP payload (written into the buffer handed back by
/// [`payload_buffer`](Self::payload_buffer)) and a per-fragment size budget.
/// The caller then repeatedly calls [`pop_fragment`](Self::pop_fragment),
/// emitting each one with the interface's usual Ethernet+IP dispatch, until
/// [`is_pending`](Self::is_pending) reports false.
pub(crate) struct Fragmenter {
    buffer: alloc_buffer::Buffer,
    state: Option<FragmenterState>,
}

impl Fragmenter {
    pub(crate) fn new() -> Self {
        Fragmenter {
            buffer: alloc_buffer::Buffer::zeroed(),
            state: None,
        }
    }

    /// Whether a fragmented transmission is still in progress.
    pub(crate) fn is_pending(&self) -> bool {
        self.state.is_some()
    }

    /// Scratch space to serialize the full, unfragmented payload into before
    /// calling [`start`](Self::start).
    pub(crate) fn payload_buffer(&mut self) -> &mut [u8] {
        &mut self.buffer.0[..]
    }

    /// Begin fragmenting `payload_len` bytes already written to
    /// [`payload_buffer`](Self::payload_buffer). `repr.payload_len` is
    /// ignored; each fragment gets its own.
    pub(crate) fn start(
        &mut self,
        repr: Ipv4Repr,
        dst_hardware_addr: EthernetAddress,
        payload_len: usize,
        mtu: usize,
    ) {
        let frag_size = (mtu - repr.header_len()) / 8 * 8;
        self.state = Some(FragmenterState {
            repr,
            dst_hardware_addr,
            total_len: payload_len,
            sent: 0,
            frag_size,
        });
    }

    /// Pop the next fragment to emit, advancing internal progress.
    ///
    /// # Panics
    /// Panics if no transmission is in progress; only call while
    /// [`is_pending`](Self::is_pending) is true.
    pub(crate) fn pop_fragment(&mut self) -> FragmentPlan {
        let state = self.state.as_mut().expect("no fragmented send in progress");
        let start = state.sent;
        let len = (state.total_len - start).min(state.frag_size);
        let more_frags = start + len < state.total_len;
        let plan = FragmentPlan {
            repr: state.repr,
            more_frags,
            frag_offset: start as u16,
            dst_hardware_addr: state.dst_hardware_addr,
            range: start..start + len,
        };
        state.sent += len;
        if !more_frags {
            self.state = None;
        }
        plan
    }

    /// The fragment data named by a [`FragmentPlan::range`] returned from
    /// the preceding [`pop_fragment`](Self::pop_fragment) call.
    pub(crate) fn fragment_data(&self, range: Range<usize>) -> &[u8] {
        &self.buffer.0[range]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{IpProtocol, Ipv4Address};

    fn key() -> Ipv4FragKey {
        Ipv4FragKey {
            id: 1,
            src_addr: Ipv4Address::new(192, 168, 1, 1),
            dst_addr: Ipv4Address::new(192, 168, 1, 2),
            protocol: IpProtocol::Udp,
        }
    }

    #[test]
    fn in_order_fragments_reassemble() {
        let mut frag = FragmentsBuffer::new();
        let k = key();
        assert!(frag.reassemble(Instant::ZERO, k, 0, true, &[1, 2, 3]).is_none());
        let data = frag.reassemble(Instant::ZERO, k, 3, false, &[4, 5]).unwrap();
        assert_eq!(data, &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn out_of_order_fragments_reassemble() {
        let mut frag = FragmentsBuffer::new();
        let k = key();
        // Middle, then tail, then head -- a 3-way out-of-order delivery.
        assert!(frag.reassemble(Instant::ZERO, k, 3, true, &[4, 5, 6]).is_none());
        assert!(frag.reassemble(Instant::ZERO, k, 6, false, &[7]).is_none());
        let data = frag.reassemble(Instant::ZERO, k, 0, true, &[1, 2, 3]).unwrap();
        assert_eq!(data, &[1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn duplicate_fragment_does_not_confuse_completion() {
        let mut frag = FragmentsBuffer::new();
        let k = key();
        assert!(frag.reassemble(Instant::ZERO, k, 0, true, &[1, 2, 3]).is_none());
        // Resend the same first fragment before the final one arrives.
        assert!(frag.reassemble(Instant::ZERO, k, 0, true, &[1, 2, 3]).is_none());
        let data = frag.reassemble(Instant::ZERO, k, 3, false, &[4]).unwrap();
        assert_eq!(data, &[1, 2, 3, 4]);
    }

    #[test]
    fn pool_exhaustion_evicts_the_oldest_context() {
        let mut frag = FragmentsBuffer::new();
        for id in 0..REASS_MAX_ENTRIES as u16 {
            let mut k = key();
            k.id = id;
            frag.reassemble(Instant::from_millis(id as i64), k, 0, true, &[1, 2, 3]);
        }

        // One more, distinct key: the oldest in-progress context (id 0) should
        // be evicted to make room rather than the call simply failing.
        let mut newcomer = key();
        newcomer.id = REASS_MAX_ENTRIES as u16;
        frag.reassemble(Instant::from_millis(1000), newcomer, 0, true, &[9]);

        let mut victim = key();
        victim.id = 0;
        // The evicted context forgot everything; completing it now starts over
        // and correctly still reports incomplete (no more-frags-false seen).
        assert!(frag
            .reassemble(Instant::from_millis(1000), victim, 3, false, &[4])
            .is_none());
    }

    #[test]
    fn stale_context_expires_and_is_dropped() {
        let mut frag = FragmentsBuffer::new();
        let k = key();
        frag.reassemble(Instant::ZERO, k, 0, true, &[1, 2, 3]);

        let late = Instant::ZERO + REASS_TIMEOUT + crate::time::Duration::from_millis(1);
        // The first fragment was forgotten; this tail fragment alone can't
        // complete a datagram.
        assert!(frag.reassemble(late, k, 3, false, &[4]).is_none());
    }

    #[test]
    fn oversized_fragment_is_rejected() {
        let mut frag = FragmentsBuffer::new();
        let k = key();
        assert!(frag
            .reassemble(Instant::ZERO, k, REASS_MAX_SIZE - 1, false, &[1, 2, 3])
            .is_none());
        assert_eq!(frag.entries.len(), 0);
    }

    fn repr() -> Ipv4Repr {
        Ipv4Repr {
            src_addr: Ipv4Address::new(192, 168, 1, 1),
            dst_addr: Ipv4Address::new(192, 168, 1, 2),
            next_header: IpProtocol::Udp,
            payload_len: 0,
            hop_limit: 64,
            ident: 7,
            dont_frag: false,
        }
    }

    #[test]
    fn fragmenter_splits_on_8_byte_boundaries_with_shared_ident() {
        let mut frag = Fragmenter::new();
        let payload_len = 3000;
        for (i, b) in frag.payload_buffer()[..payload_len].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        // 20-byte IPv4 header, 1500-byte link MTU -> 1480 usable payload bytes per fragment.
        frag.start(repr(), EthernetAddress([0; 6]), payload_len, 1500);

        assert!(frag.is_pending());
        let f0 = frag.pop_fragment();
        assert_eq!(f0.frag_offset, 0);
        assert!(f0.more_frags);
        assert_eq!(f0.range, 0..1480);
        assert_eq!(f0.repr.ident, 7);

        assert!(frag.is_pending());
        let f1 = frag.pop_fragment();
        assert_eq!(f1.frag_offset, 1480);
        assert!(f1.more_frags);
        assert_eq!(f1.range, 1480..2960);
        assert_eq!(f1.repr.ident, f0.repr.ident);

        assert!(frag.is_pending());
        let f2 = frag.pop_fragment();
        assert_eq!(f2.frag_offset, 2960);
        assert!(!f2.more_frags);
        assert_eq!(f2.range, 2960..3000);

        assert!(!frag.is_pending());
        assert_eq!(f0.frag_offset % 8, 0);
        assert_eq!(f1.frag_offset % 8, 0);
        assert_eq!(f2.frag_offset % 8, 0);

        let reassembled_len =
            (f0.range.end - f0.range.start) + (f1.range.end - f1.range.start) + (f2.range.end - f2.range.start);
        assert_eq!(reassembled_len, payload_len);
    }
}
