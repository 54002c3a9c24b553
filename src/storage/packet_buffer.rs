use core::fmt;

use super::{Empty, Full, RingBuffer};

/// Per-packet metadata held in a [`PacketBuffer`], alongside its bytes.
///
/// `H` is whatever identifies the packet's 4-tuple or other routing information to its
/// owner (for instance a UDP socket stores the peer [`IpEndpoint`](crate::wire::IpEndpoint)
/// here, so a packet dequeued from the buffer can be handed back to the application together
/// with the address it arrived from, without a second lookup).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMetadata<H> {
    size: usize,
    header: Option<H>,
}

impl<H> PacketMetadata<H> {
    /// Empty packet description used to pad the metadata ring's unused slots.
    pub const EMPTY: PacketMetadata<H> = PacketMetadata {
        size: 0,
        header: None,
    };

    fn packet(size: usize, header: H) -> PacketMetadata<H> {
        PacketMetadata {
            size,
            header: Some(header),
        }
    }

    const fn is_empty(&self) -> bool {
        self.header.is_none()
    }
}

/// An independent buffer of length-delimited packets, each with its own metadata of type `H`.
///
/// The payloads of every enqueued packet share one contiguous ring buffer; the metadata ring
/// tracks where each packet's bytes begin and how long they are, so packets can be dequeued
/// in FIFO order without ever moving payload bytes around once they're written.
#[derive(Debug)]
pub struct PacketBuffer<'a, H> {
    metadata_ring: RingBuffer<'a, PacketMetadata<H>>,
    payload_ring: RingBuffer<'a, u8>,
}

impl<'a, H> PacketBuffer<'a, H> {
    /// Create a new packet buffer with the given metadata and payload storage.
    pub fn new<MS, PS>(metadata_storage: MS, payload_storage: PS) -> PacketBuffer<'a, H>
    where
        MS: Into<managed::ManagedSlice<'a, PacketMetadata<H>>>,
        PS: Into<managed::ManagedSlice<'a, u8>>,
    {
        PacketBuffer {
            metadata_ring: RingBuffer::new(metadata_storage),
            payload_ring: RingBuffer::new(payload_storage),
        }
    }

    /// Query whether the buffer holds no packets.
    pub fn is_empty(&self) -> bool {
        self.metadata_ring.is_empty()
    }

    /// Query whether the buffer cannot accept another packet of any nonzero size.
    pub fn is_full(&self) -> bool {
        self.metadata_ring.is_full() || self.payload_ring.is_empty() && self.payload_ring.capacity() == 0
    }

    /// Enqueue a new packet with up to `max_size` payload bytes, returning a mutable
    /// reference to the payload storage.
    ///
    /// Returns `Err(Full)` if the metadata ring has no free slot, or if the payload ring
    /// cannot provide a contiguous run of `max_size` bytes right now (the caller should
    /// retry with a smaller `max_size`, typically bounded by `payload_bytes_available()`).
    pub fn enqueue(&mut self, max_size: usize, header: H) -> Result<&mut [u8], Full> {
        if self.metadata_ring.is_full() {
            return Err(Full);
        }
        let window = self.payload_ring.window();
        if window == 0 && max_size > 0 {
            return Err(Full);
        }
        let size = max_size.min(window);
        let payload_buf = self.payload_ring.enqueue_many(size);
        let actual = payload_buf.len();
        *self.metadata_ring.enqueue_one()? = PacketMetadata::packet(actual, header);
        Ok(payload_buf)
    }

    /// Enqueue a whole packet, copying `data` into the payload ring.
    pub fn enqueue_slice(&mut self, data: &[u8], header: H) -> Result<(), Full>
    where
        H: Clone,
    {
        if self.metadata_ring.is_full() || self.payload_ring.window() < data.len() {
            return Err(Full);
        }
        let written = self.payload_ring.enqueue_slice(data);
        debug_assert_eq!(written, data.len());
        *self.metadata_ring.enqueue_one()? = PacketMetadata::packet(data.len(), header);
        Ok(())
    }

    /// Dequeue the oldest packet, returning its header and payload bytes.
    pub fn dequeue(&mut self) -> Result<(H, &[u8]), Empty> {
        loop {
            let meta = *self.metadata_ring.dequeue_one()?;
            let payload_buf = self.payload_ring.dequeue_many(meta.size);
            debug_assert_eq!(payload_buf.len(), meta.size);
            if let Some(header) = meta.header {
                return Ok((header, payload_buf));
            }
            // Padding entry (shouldn't occur in normal use); skip it.
        }
    }

    /// Peek at the oldest packet without dequeuing it.
    pub fn peek(&self) -> Result<(&H, &[u8]), Empty> {
        if self.metadata_ring.is_empty() {
            return Err(Empty);
        }
        let meta = &self.metadata_ring.get_allocated(0, 1)[0];
        let payload_buf = self.payload_ring.get_allocated(0, meta.size);
        Ok((meta.header.as_ref().unwrap(), payload_buf))
    }

    /// Remove every packet from the buffer.
    pub fn reset(&mut self) {
        self.metadata_ring.clear();
        self.payload_ring.clear();
    }

    /// Total payload capacity of the buffer, in bytes.
    pub fn payload_capacity(&self) -> usize {
        self.payload_ring.capacity()
    }

    /// Total number of packets the buffer can hold at once.
    pub fn packet_capacity(&self) -> usize {
        self.metadata_ring.capacity()
    }
}

impl<H> fmt::Display for PacketMetadata<H> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            write!(f, "(empty)")
        } else {
            write!(f, "{} bytes", self.size)
        }
    }
}

impl<H> super::Resettable for PacketMetadata<H> {
    fn reset(&mut self) {
        *self = PacketMetadata::EMPTY;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_dequeue_round_trip_preserves_header_and_bytes() {
        let mut meta_storage = vec![PacketMetadata::<u32>::EMPTY; 4];
        let mut payload_storage = vec![0u8; 16];
        let mut buf = PacketBuffer::new(&mut meta_storage[..], &mut payload_storage[..]);

        buf.enqueue_slice(&[1, 2, 3], 42).unwrap();
        buf.enqueue_slice(&[4, 5], 43).unwrap();

        let (h1, p1) = buf.dequeue().unwrap();
        assert_eq!(h1, 42);
        assert_eq!(p1, &[1, 2, 3]);

        let (h2, p2) = buf.dequeue().unwrap();
        assert_eq!(h2, 43);
        assert_eq!(p2, &[4, 5]);

        assert!(buf.is_empty());
        assert_eq!(buf.dequeue(), Err(Empty));
    }

    #[test]
    fn full_metadata_ring_rejects_further_enqueues() {
        let mut meta_storage = vec![PacketMetadata::<u32>::EMPTY; 2];
        let mut payload_storage = vec![0u8; 16];
        let mut buf = PacketBuffer::new(&mut meta_storage[..], &mut payload_storage[..]);

        buf.enqueue_slice(&[1], 1).unwrap();
        buf.enqueue_slice(&[2], 2).unwrap();
        assert_eq!(buf.enqueue_slice(&[3], 3), Err(Full));
    }
}
