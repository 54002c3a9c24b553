use crate::iface::InterfaceInner;
use crate::socket::PollAt;
use crate::wire::Icmpv4Repr;
use crate::wire::{IcmpRepr, IpAddress, IpListenEndpoint, IpRepr, Ipv4Repr};

/// An ICMP packet ring buffer.
pub type PacketBuffer<'a> = crate::storage::PacketBuffer<'a, IpAddress>;

/// An ICMP packet metadata.
pub type PacketMetadata = crate::storage::PacketMetadata<IpAddress>;

/// Header carried alongside each datagram queued for sending: the
/// destination, and the sequence number to stamp on the echo request built
/// from it (the identifier comes from the socket's own [`Endpoint::Ident`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TxHeader {
    dst_addr: IpAddress,
    seq_no: u16,
}

/// Type of endpoint to bind the ICMP socket to. See [`Socket::bind`] for
/// more details.
#[derive(Debug, Default, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum Endpoint {
    #[default]
    Unspecified,
    /// Bound to a specific ICMP echo identifier; matches echo replies
    /// carrying that identifier and lets the socket send echo requests.
    Ident(u16),
    /// Bound to a UDP 4-tuple; matches Destination Unreachable messages
    /// whose embedded original datagram was sent from this local endpoint.
    Udp(IpListenEndpoint),
}

/// Error returned by [`Socket::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    Unaddressable,
}

/// Error returned by [`Socket::send`] / [`Socket::send_echo_request`].
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

/// An ICMP socket.
///
/// An ICMP socket is bound to a specific [`Endpoint`], which may be an echo
/// identifier (for sending/receiving pings) or a UDP endpoint (for
/// receiving Destination Unreachable notifications about a UDP
/// association).
#[derive(Debug)]
pub struct Socket<'a> {
    rx_buffer: PacketBuffer<'a>,
    tx_buffer: heapless::Deque<(TxHeader, heapless::Vec<u8, 1024>), 4>,
    endpoint: Endpoint,
    hop_limit: Option<u8>,
}

impl<'a> Socket<'a> {
    /// Create an ICMP socket with the given receive buffer.
    pub fn new(rx_buffer: PacketBuffer<'a>) -> Socket<'a> {
        Socket {
            rx_buffer,
            tx_buffer: heapless::Deque::new(),
            endpoint: Endpoint::default(),
            hop_limit: None,
        }
    }

    /// Bind the socket to the given endpoint.
    pub fn bind<T: Into<Endpoint>>(&mut self, endpoint: T) -> Result<(), BindError> {
        let endpoint = endpoint.into();
        if endpoint == Endpoint::Unspecified {
            return Err(BindError::Unaddressable);
        }
        self.endpoint = endpoint;
        Ok(())
    }

    /// Set the time-to-live used for outgoing packets.
    pub fn set_hop_limit(&mut self, hop_limit: Option<u8>) {
        self.hop_limit = hop_limit;
    }

    /// Queue an echo request carrying `data`, to the given destination.
    ///
    /// The socket must be bound to [`Endpoint::Ident`].
    pub fn send_echo_request(
        &mut self,
        dst_addr: IpAddress,
        seq_no: u16,
        data: &[u8],
    ) -> Result<(), SendError> {
        if !matches!(self.endpoint, Endpoint::Ident(_)) {
            return Err(SendError::Unaddressable);
        }
        let mut buf = heapless::Vec::new();
        buf.extend_from_slice(data).map_err(|_| SendError::BufferFull)?;
        self.tx_buffer
            .push_back((TxHeader { dst_addr, seq_no }, buf))
            .map_err(|_| SendError::BufferFull)
    }

    /// Query whether an echo request can currently be queued.
    pub fn can_send(&self) -> bool {
        !self.tx_buffer.is_full()
    }

    /// Dequeue a received packet, returning its payload and the address it
    /// came from.
    pub fn recv(&mut self) -> Result<(&[u8], IpAddress), RecvError> {
        self.rx_buffer.dequeue().map_err(|_| RecvError::Exhausted)
    }

    /// Query whether a received packet is waiting to be read.
    pub fn can_recv(&self) -> bool {
        !self.rx_buffer.is_empty()
    }

    pub(crate) fn accepts_v4(
        &self,
        _cx: &mut InterfaceInner,
        ip_repr: &Ipv4Repr,
        icmp_repr: &Icmpv4Repr,
    ) -> bool {
        match self.endpoint {
            Endpoint::Unspecified => false,
            Endpoint::Ident(bound_ident) => {
                matches!(icmp_repr, Icmpv4Repr::EchoReply { ident, .. } if *ident == bound_ident)
            }
            Endpoint::Udp(endpoint) => match icmp_repr {
                Icmpv4Repr::DstUnreachable { header, .. } => {
                    endpoint.addr.map_or(true, |addr| addr == IpAddress::Ipv4(header.dst_addr))
                        && endpoint.port != 0
                        && ip_repr.src_addr == header.dst_addr
                }
                _ => false,
            },
        }
    }

    pub(crate) fn process_v4(
        &mut self,
        _cx: &mut InterfaceInner,
        ip_repr: &Ipv4Repr,
        icmp_repr: &Icmpv4Repr,
    ) {
        net_trace!("icmp: receiving {} octet packet", icmp_repr.buffer_len());
        let data = match icmp_repr {
            Icmpv4Repr::EchoReply { data, .. } => data,
            Icmpv4Repr::DstUnreachable { data, .. } => data,
            _ => return,
        };
        if self
            .rx_buffer
            .enqueue_slice(data, IpAddress::Ipv4(ip_repr.src_addr))
            .is_err()
        {
            net_trace!("icmp: receive buffer full, dropped incoming packet");
        }
    }

    pub(crate) fn dispatch<F, E>(&mut self, cx: &mut InterfaceInner, mut emit: F) -> Result<(), E>
    where
        F: FnMut(&mut InterfaceInner, (IpRepr, IcmpRepr)) -> Result<(), E>,
    {
        let Endpoint::Ident(ident) = self.endpoint else {
            return Ok(());
        };
        let Some((header, data)) = self.tx_buffer.pop_front() else {
            return Ok(());
        };

        let icmp_repr = Icmpv4Repr::EchoRequest {
            ident,
            seq_no: header.seq_no,
            data: &data,
        };

        let src_addr = cx
            .get_source_address(&header.dst_addr)
            .unwrap_or(header.dst_addr);
        #[allow(irrefutable_let_patterns)]
        let IpAddress::Ipv4(src_addr) = src_addr;
        #[allow(irrefutable_let_patterns)]
        let IpAddress::Ipv4(dst_addr) = header.dst_addr;
        let ipv4_repr = Ipv4Repr {
            src_addr,
            dst_addr,
            next_header: crate::wire::IpProtocol::Icmp,
            payload_len: icmp_repr.buffer_len(),
            hop_limit: self.hop_limit.unwrap_or(64),
            ident: 0,
            dont_frag: false,
        };

        emit(
            cx,
            (IpRepr::Ipv4(ipv4_repr), IcmpRepr::Ipv4(icmp_repr)),
        )
    }

    pub(crate) fn poll_at(&self, _cx: &mut InterfaceInner) -> PollAt {
        if self.tx_buffer.is_empty() {
            PollAt::Ingress
        } else {
            PollAt::Now
        }
    }
}

impl From<u16> for Endpoint {
    fn from(ident: u16) -> Endpoint {
        Endpoint::Ident(ident)
    }
}

impl From<IpListenEndpoint> for Endpoint {
    fn from(endpoint: IpListenEndpoint) -> Endpoint {
        Endpoint::Udp(endpoint)
    }
}
