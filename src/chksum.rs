//! Incremental RFC 1071 checksum accumulation over a [`crate::buf::IpBufRef`] chain.
//!
//! [`crate::wire::ip::checksum`] computes a checksum over one contiguous
//! slice. TCP segments built from [`sub_header_to_continued_by`] almost never
//! are one contiguous slice — a header in scratch storage is followed by
//! payload living in a send ring buffer — so the checksum has to be folded
//! incrementally across chunks. The one subtlety is that RFC 1071 pairs bytes
//! up as big-endian 16-bit words *of the whole datagram*, not of each chunk:
//! if a chunk boundary falls between the two bytes of a word, the leftover
//! byte has to be carried over and paired with the first byte of the next
//! chunk.
//!
//! [`sub_header_to_continued_by`]: crate::buf::IpBufRef::sub_header_to_continued_by

use crate::buf::IpBufRef;
use crate::wire::ip::checksum;
use crate::wire::{IpProtocol as Protocol, Ipv4Address};

/// An in-progress RFC 1071 ones'-complement checksum, fed one chunk at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpChksumAccumulator {
    accum: u32,
    /// A byte left over from a chunk with odd length, still waiting to be
    /// paired with the first byte of the next chunk. Its position (high or
    /// low half of the 16-bit word) depends on how many bytes have been fed
    /// so far, which `odd_byte` alone doesn't track — see `pending_offset`.
    pending: Option<u8>,
    /// Total bytes accumulated so far; used only to know whether `pending`
    /// (if set) occupies the high or low byte of its word.
    total: usize,
}

impl IpChksumAccumulator {
    pub const fn new() -> Self {
        IpChksumAccumulator {
            accum: 0,
            pending: None,
            total: 0,
        }
    }

    /// Fold in one 16-bit word (host-order value of two network-order bytes).
    pub fn add_u16(&mut self, word: u16) {
        self.accum += word as u32;
    }

    /// Fold in a contiguous run of bytes, correctly carrying a pending odd
    /// byte from (or into) an adjacent chunk.
    pub fn add_bytes(&mut self, mut data: &[u8]) {
        if data.is_empty() {
            return;
        }
        if let Some(hi) = self.pending.take() {
            self.add_u16(u16::from_be_bytes([hi, data[0]]));
            data = &data[1..];
            self.total += 1;
        }
        self.total += data.len();
        self.add_u16(checksum::data(data));
        if data.len() % 2 == 1 {
            self.pending = Some(*data.last().unwrap());
        }
    }

    /// Fold in every byte reachable from an [`IpBufRef`] view, without
    /// copying it into a contiguous buffer first.
    pub fn add_buf(&mut self, buf: &IpBufRef<'_>) {
        let mut view = *buf;
        view.process_bytes(view.total_len, |chunk| self.add_bytes(chunk));
    }

    /// Fold in the IPv4 pseudo-header used by TCP and UDP checksums.
    pub fn add_pseudo_header(
        &mut self,
        src_addr: &Ipv4Address,
        dst_addr: &Ipv4Address,
        protocol: Protocol,
        length: u32,
    ) {
        self.add_u16(checksum::pseudo_header_v4(
            src_addr, dst_addr, protocol, length,
        ));
    }

    /// Finish accumulation and fold any trailing odd byte, returning the
    /// RFC 1071 ones'-complement checksum (not yet complemented).
    pub fn finish_uncomplemented(mut self) -> u16 {
        if let Some(hi) = self.pending.take() {
            self.add_u16((hi as u16) << 8);
        }
        let sum = (self.accum >> 16) + (self.accum & 0xffff);
        ((sum >> 16) as u16).wrapping_add(sum as u16)
    }

    /// Finish accumulation, returning the complemented checksum ready to be
    /// placed on the wire (0xffff maps to 0xffff, never 0x0000, per RFC 768 /
    /// RFC 793 rules for an all-zero computed checksum).
    pub fn finish(self) -> u16 {
        let sum = self.finish_uncomplemented();
        let comp = !sum;
        if comp == 0 {
            0xffff
        } else {
            comp
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buf::IpBufNode;

    #[test]
    fn chunked_and_contiguous_checksums_agree() {
        let data: Vec<u8> = (0u8..=200).collect();

        let mut whole = IpChksumAccumulator::new();
        whole.add_bytes(&data);

        for split in [1, 2, 3, 7, 64, 127, 128, 199, 200] {
            let (a, b) = data.split_at(split);
            let mut chunked = IpChksumAccumulator::new();
            chunked.add_bytes(a);
            chunked.add_bytes(b);
            assert_eq!(
                chunked.finish_uncomplemented(),
                whole.finish_uncomplemented(),
                "split at {split}"
            );
        }
    }

    #[test]
    fn add_buf_matches_add_bytes_over_a_chain() {
        let tail = IpBufNode::new(&[9, 10, 11, 12, 13]);
        let head = IpBufNode::new_with_next(&[1, 2, 3, 4, 5, 6, 7], &tail);
        let view = IpBufRef::new(&head, 0, 12);

        let mut chained = IpChksumAccumulator::new();
        chained.add_buf(&view);

        let mut flat_bytes = Vec::new();
        flat_bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7]);
        flat_bytes.extend_from_slice(&[9, 10, 11, 12, 13]);
        let mut flat = IpChksumAccumulator::new();
        flat.add_bytes(&flat_bytes);

        assert_eq!(chained.finish(), flat.finish());
    }

    #[test]
    fn all_zero_checksum_is_emitted_as_0xffff() {
        let acc = IpChksumAccumulator::new();
        assert_eq!(acc.finish(), 0xffff);
    }
}
