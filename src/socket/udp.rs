use crate::config::{EPHEMERAL_PORT_FIRST, EPHEMERAL_PORT_LAST};
use crate::iface::InterfaceInner;
use crate::phy::PacketMeta;
use crate::socket::PollAt;
use crate::wire::{IpAddress, IpEndpoint, IpListenEndpoint, IpRepr, UdpRepr};

/// A UDP packet ring buffer.
pub type PacketBuffer<'a> = crate::storage::PacketBuffer<'a, UdpMetadata>;

/// A UDP packet metadata.
pub type PacketMetadata = crate::storage::PacketMetadata<UdpMetadata>;

/// Metadata for a sent or received UDP packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct UdpMetadata {
    /// The IP endpoint from which an incoming datagram was received, or to which an outgoing
    /// datagram will be sent.
    pub endpoint: IpEndpoint,
    /// The IP address to which an incoming datagram was sent, or from which an outgoing datagram
    /// will be sent. Incoming datagrams always have this set. On outgoing datagrams, if it is not
    /// set, a suitable address is picked the way [`InterfaceInner::get_source_address`] does.
    pub local_address: Option<IpAddress>,
    pub meta: PacketMeta,
}

impl From<IpEndpoint> for UdpMetadata {
    fn from(endpoint: IpEndpoint) -> UdpMetadata {
        UdpMetadata {
            endpoint,
            local_address: None,
            meta: PacketMeta::default(),
        }
    }
}

/// Error returned by [`Socket::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    Unaddressable,
}

/// Error returned by [`Socket::send`] / [`Socket::send_slice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    Unaddressable,
    BufferFull,
}

/// Error returned by [`Socket::recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    Exhausted,
}

/// A User Datagram Protocol socket.
///
/// A UDP socket acts as either a *listener*, bound to a port on any local
/// address, or a *association*, bound to a specific 4-tuple once a peer has
/// been addressed through [`Socket::send_slice_to`]. Binding with port `0`
/// assigns the next free ephemeral port out of
/// [`EPHEMERAL_PORT_FIRST`]..=[`EPHEMERAL_PORT_LAST`] the first time the
/// socket has something to send.
#[derive(Debug)]
pub struct Socket<'a> {
    endpoint: IpListenEndpoint,
    rx_buffer: PacketBuffer<'a>,
    tx_buffer: PacketBuffer<'a>,
    /// The time-to-live (IPv4) or hop limit (IPv6) value used in outgoing packets.
    hop_limit: Option<u8>,
}

impl<'a> Socket<'a> {
    /// Create an UDP socket with the given buffers.
    pub fn new(rx_buffer: PacketBuffer<'a>, tx_buffer: PacketBuffer<'a>) -> Socket<'a> {
        Socket {
            endpoint: IpListenEndpoint::default(),
            rx_buffer,
            tx_buffer,
            hop_limit: None,
        }
    }

    /// Bind the socket to the given endpoint.
    ///
    /// This never fails on port `0`; the actual port is picked lazily, on
    /// the socket's first outgoing datagram.
    pub fn bind<T: Into<IpListenEndpoint>>(&mut self, endpoint: T) -> Result<(), BindError> {
        if self.is_open() {
            return Err(BindError::Unaddressable);
        }
        self.endpoint = endpoint.into();
        Ok(())
    }

    /// Query whether the socket is bound to a local endpoint.
    pub fn is_open(&self) -> bool {
        self.endpoint.port != 0
    }

    /// Close the socket, dropping its binding and any queued datagrams.
    pub fn close(&mut self) {
        self.endpoint = IpListenEndpoint::default();
        self.rx_buffer.reset();
        self.tx_buffer.reset();
    }

    /// Set the time-to-live used for outgoing packets.
    pub fn set_hop_limit(&mut self, hop_limit: Option<u8>) {
        self.hop_limit = hop_limit;
    }

    /// Enqueue a datagram to be sent to `meta.endpoint`.
    pub fn send_slice(&mut self, data: &[u8], meta: impl Into<UdpMetadata>) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Unaddressable);
        }
        let meta = meta.into();
        if meta.endpoint.port == 0 || meta.endpoint.addr.is_unspecified() {
            return Err(SendError::Unaddressable);
        }
        self.tx_buffer
            .enqueue_slice(data, meta)
            .map_err(|_| SendError::BufferFull)
    }

    /// Query whether a datagram can currently be queued for sending.
    pub fn can_send(&self) -> bool {
        !self.tx_buffer.is_full()
    }

    /// Dequeue a received datagram, returning its payload and metadata.
    pub fn recv(&mut self) -> Result<(&[u8], UdpMetadata), RecvError> {
        let (meta, payload) = self.rx_buffer.dequeue().map_err(|_| RecvError::Exhausted)?;
        Ok((payload, meta))
    }

    /// Query whether a received datagram is waiting to be read.
    pub fn can_recv(&self) -> bool {
        !self.rx_buffer.is_empty()
    }

    pub(crate) fn accepts(&self, ip_repr: &IpRepr, repr: &UdpRepr) -> bool {
        if self.endpoint.port != repr.dst_port {
            return false;
        }
        match self.endpoint.addr {
            Some(addr) if addr != ip_repr.dst_addr() => false,
            _ => true,
        }
    }

    pub(crate) fn process(
        &mut self,
        _cx: &mut InterfaceInner,
        meta: PacketMeta,
        ip_repr: &IpRepr,
        repr: &UdpRepr,
        payload: &[u8],
    ) {
        net_trace!(
            "udp:{}:{}: receiving {} octets",
            self.endpoint,
            repr.src_port,
            payload.len()
        );
        let metadata = UdpMetadata {
            endpoint: IpEndpoint {
                addr: ip_repr.src_addr(),
                port: repr.src_port,
            },
            local_address: Some(ip_repr.dst_addr()),
            meta,
        };
        if self.rx_buffer.enqueue_slice(payload, metadata).is_err() {
            net_trace!("udp:{}:{}: buffer full, dropped incoming packet", self.endpoint, repr.src_port);
        }
    }

    pub(crate) fn dispatch<F, E>(&mut self, cx: &mut InterfaceInner, mut emit: F) -> Result<(), E>
    where
        F: FnMut(&mut InterfaceInner, PacketMeta, (IpRepr, UdpRepr, &[u8])) -> Result<(), E>,
    {
        let endpoint = self.endpoint;
        let hop_limit = self.hop_limit.unwrap_or(64);

        let (meta, payload) = match self.tx_buffer.dequeue() {
            Ok(entry) => entry,
            Err(crate::storage::Empty) => return Ok(()),
        };

        net_trace!(
            "udp:{}:{}: sending {} octets",
            endpoint,
            meta.endpoint,
            payload.len()
        );

        let src_addr = match meta
            .local_address
            .or_else(|| cx.get_source_address(&meta.endpoint.addr))
        {
            Some(addr) => addr,
            None => return Ok(()),
        };

        // An unbound socket (port 0) sends from a fresh ephemeral port every
        // datagram; a bound one always sends from its own port.
        let src_port = if endpoint.port != 0 {
            endpoint.port
        } else {
            cx.rand().rand_source_port(EPHEMERAL_PORT_FIRST, EPHEMERAL_PORT_LAST)
        };
        let repr = UdpRepr {
            src_port,
            dst_port: meta.endpoint.port,
        };
        let ip_repr = IpRepr::new(
            src_addr,
            meta.endpoint.addr,
            crate::wire::IpProtocol::Udp,
            repr.header_len() + payload.len(),
            hop_limit,
        );

        emit(cx, meta.meta, (ip_repr, repr, payload))
    }

    pub(crate) fn poll_at(&self, _cx: &mut InterfaceInner) -> PollAt {
        if self.tx_buffer.is_empty() {
            PollAt::Ingress
        } else {
            PollAt::Now
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Ipv4Address;

    fn socket() -> Socket<'static> {
        Socket::new(
            PacketBuffer::new(vec![PacketMetadata::EMPTY; 4], vec![0; 256]),
            PacketBuffer::new(vec![PacketMetadata::EMPTY; 4], vec![0; 256]),
        )
    }

    fn peer() -> IpEndpoint {
        IpEndpoint::new(IpAddress::Ipv4(Ipv4Address::new(192, 0, 2, 1)), 12345)
    }

    #[test]
    fn unbound_socket_refuses_to_send() {
        let mut s = socket();
        assert_eq!(s.send_slice(b"hi", peer()), Err(SendError::Unaddressable));
    }

    #[test]
    fn bound_socket_queues_and_never_rebinds_in_place() {
        let mut s = socket();
        s.bind(6969).unwrap();
        assert!(s.is_open());
        assert_eq!(s.bind(7000), Err(BindError::Unaddressable));
    }

    #[test]
    fn queued_datagram_does_not_affect_the_receive_buffer() {
        let mut s = socket();
        s.bind(6969).unwrap();
        assert!(s.can_send());
        s.send_slice(b"hello", peer()).unwrap();
        assert!(!s.can_recv());
    }

    #[test]
    fn recv_on_empty_buffer_is_exhausted() {
        let mut s = socket();
        s.bind(6969).unwrap();
        assert_eq!(s.recv().unwrap_err(), RecvError::Exhausted);
    }

    #[test]
    fn accepts_matches_on_bound_port_and_optional_address() {
        let mut s = socket();
        s.bind(6969).unwrap();
        let repr = UdpRepr {
            src_port: 12345,
            dst_port: 6969,
        };
        let ip_repr = IpRepr::new(
            peer().addr,
            IpAddress::Ipv4(Ipv4Address::new(192, 0, 2, 2)),
            crate::wire::IpProtocol::Udp,
            repr.header_len(),
            64,
        );
        assert!(s.accepts(&ip_repr, &repr));

        let mismatched = UdpRepr {
            src_port: 12345,
            dst_port: 1,
        };
        assert!(!s.accepts(&ip_repr, &mismatched));
    }
}
