use crate::iface::InterfaceInner;
use crate::phy::ChecksumCapabilities;
use crate::socket::PollAt;
use crate::storage::RingBuffer;
use crate::wire::{IpProtocol, IpRepr, IpVersion, Ipv4Packet, Ipv4Repr};

/// Largest complete IP packet (header + payload) a single raw socket
/// datagram may hold.
pub const RAW_PACKET_CAP: usize = 1500;

/// One complete IP packet queued on a raw socket, header included: raw
/// sockets hand the application the whole datagram, the way a POSIX
/// `SOCK_RAW` socket does.
pub type RawPacket = heapless::Vec<u8, RAW_PACKET_CAP>;

/// A raw IP packet ring buffer.
pub type PacketBuffer<'a> = RingBuffer<'a, RawPacket>;

/// A raw IP socket.
///
/// A raw socket is bound to a specific IP version and protocol, and
/// receives a copy of every packet the interface sees with that
/// version/protocol, whether or not it's also handled by another
/// (UDP/TCP/ICMP) socket. Queued outgoing packets must already contain a
/// complete IP header; the socket only parses it to route the send, it
/// does not fill it in.
#[derive(Debug)]
pub struct Socket<'a> {
    ip_version: IpVersion,
    ip_protocol: IpProtocol,
    rx_buffer: PacketBuffer<'a>,
    tx_buffer: PacketBuffer<'a>,
}

impl<'a> Socket<'a> {
    /// Create a raw IP socket bound to the given IP version and protocol,
    /// with the given buffers.
    pub fn new(
        ip_version: IpVersion,
        ip_protocol: IpProtocol,
        rx_buffer: PacketBuffer<'a>,
        tx_buffer: PacketBuffer<'a>,
    ) -> Socket<'a> {
        Socket {
            ip_version,
            ip_protocol,
            rx_buffer,
            tx_buffer,
        }
    }

    /// Enqueue a complete IP packet (header included) to be sent, returning
    /// `Err(Full)` if the transmit buffer has no room.
    pub fn send_slice(&mut self, packet: &[u8]) -> Result<(), crate::storage::Full> {
        let mut slot = RawPacket::new();
        slot.extend_from_slice(packet)
            .map_err(|_| crate::storage::Full)?;
        *self.tx_buffer.enqueue_one()? = slot;
        Ok(())
    }

    /// Dequeue a received packet (header included) into `data`, returning
    /// the number of bytes copied.
    pub fn recv_slice(&mut self, data: &mut [u8]) -> Result<usize, crate::storage::Empty> {
        let slot = self.rx_buffer.dequeue_one()?;
        let n = slot.len().min(data.len());
        data[..n].copy_from_slice(&slot[..n]);
        Ok(n)
    }

    /// Query whether a received packet is waiting to be read.
    pub fn can_recv(&self) -> bool {
        !self.rx_buffer.is_empty()
    }

    /// Query whether a packet can currently be queued for sending.
    pub fn can_send(&self) -> bool {
        !self.tx_buffer.is_full()
    }

    pub(crate) fn accepts(&self, ip_repr: &IpRepr) -> bool {
        ip_repr.version() == self.ip_version && ip_repr.next_header() == self.ip_protocol
    }

    pub(crate) fn process(&mut self, _cx: &mut InterfaceInner, ip_repr: &IpRepr, payload: &[u8]) {
        let mut slot = RawPacket::new();
        let header_len = ip_repr.header_len();
        let ok = slot.resize_default(header_len).is_ok()
            && {
                ip_repr.emit(&mut slot[..header_len], &ChecksumCapabilities::default());
                slot.extend_from_slice(payload).is_ok()
            };
        if !ok {
            net_trace!("raw: dropping oversized packet ({} bytes)", payload.len());
            return;
        }
        if self.rx_buffer.enqueue_one_with(|s| *s = slot).is_err() {
            net_trace!("raw: receive buffer full, dropping packet");
        }
    }

    pub(crate) fn dispatch<F, E>(&mut self, cx: &mut InterfaceInner, mut emit: F) -> Result<(), E>
    where
        F: FnMut(&mut InterfaceInner, (IpRepr, &[u8])) -> Result<(), E>,
    {
        let ip_version = self.ip_version;
        let result = self.tx_buffer.dequeue_one_with(|slot| {
            match ip_version {
                IpVersion::Ipv4 => {
                    let packet = match Ipv4Packet::new_checked(slot.as_slice()) {
                        Ok(packet) => packet,
                        Err(_) => {
                            net_trace!("raw: queued packet has malformed IPv4 header, dropping");
                            return Ok(());
                        }
                    };
                    let ip_repr = match Ipv4Repr::parse(&packet, &ChecksumCapabilities::default()) {
                        Ok(repr) => repr,
                        Err(_) => return Ok(()),
                    };
                    emit(cx, (IpRepr::Ipv4(ip_repr), packet.payload()))
                }
            }
        });
        match result {
            Ok(r) => r,
            Err(crate::storage::Empty) => Ok(()),
        }
    }

    pub(crate) fn poll_at(&self, _cx: &mut InterfaceInner) -> PollAt {
        if self.tx_buffer.is_empty() {
            PollAt::Ingress
        } else {
            PollAt::Now
        }
    }
}
