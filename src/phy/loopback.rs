use std::collections::VecDeque;

use crate::phy::{self, Device, DeviceCapabilities, Medium, PacketMeta};
use crate::time::Instant;

/// An in-memory device that loops transmitted frames back for reception.
///
/// Frames pushed through [`TxToken`] are queued and handed back out of the
/// next `receive()` call, in order. Useful for testing protocol code without
/// a real network device.
#[derive(Debug)]
pub struct Loopback {
    queue: VecDeque<Vec<u8>>,
    medium: Medium,
}

impl Loopback {
    /// Create a loopback device carrying the given medium.
    pub fn new(medium: Medium) -> Loopback {
        Loopback {
            queue: VecDeque::new(),
            medium,
        }
    }
}

impl Device for Loopback {
    type RxToken<'a> = RxToken;
    type TxToken<'a> = TxToken<'a>;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        self.queue.pop_front().map(move |buffer| {
            (
                RxToken { buffer },
                TxToken {
                    queue: &mut self.queue,
                },
            )
        })
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        Some(TxToken {
            queue: &mut self.queue,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            medium: self.medium,
            max_transmission_unit: 65535,
            ..Default::default()
        }
    }
}

#[doc(hidden)]
pub struct RxToken {
    buffer: Vec<u8>,
}

impl phy::RxToken for RxToken {
    fn consume<R, F>(self, f: F) -> R
    where
        F: FnOnce(&[u8]) -> R,
    {
        f(&self.buffer[..])
    }

    fn meta(&self) -> PacketMeta {
        PacketMeta::default()
    }
}

#[doc(hidden)]
pub struct TxToken<'a> {
    queue: &'a mut VecDeque<Vec<u8>>,
}

impl<'a> phy::TxToken for TxToken<'a> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buffer = vec![0; len];
        let result = f(&mut buffer);
        self.queue.push_back(buffer);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmitted_frame_is_received_back() {
        let mut dev = Loopback::new(Medium::Ethernet);
        let t = dev.transmit(Instant::ZERO).unwrap();
        phy::TxToken::consume(t, 4, |buf| buf.copy_from_slice(b"ping"));

        let (rx, _tx) = dev.receive(Instant::ZERO).unwrap();
        let received = phy::RxToken::consume(rx, |buf| buf.to_vec());
        assert_eq!(received, b"ping");
    }

    #[test]
    fn receive_on_empty_queue_returns_none() {
        let mut dev = Loopback::new(Medium::Ethernet);
        assert!(dev.receive(Instant::ZERO).is_none());
    }
}
