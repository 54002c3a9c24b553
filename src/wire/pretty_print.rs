//! Lightweight, indentation-aware `Display` helper for nested packet headers.
//!
//! Every `Packet` type (Ethernet, ARP, IPv4, ICMPv4, UDP, TCP) implements
//! [`PrettyPrint`], and the crate typically logs a received/emitted frame
//! through [`PrettyPrinter`] rather than its raw `Debug` form, since a raw
//! byte dump is far less useful than each header rendered one indentation
//! level deeper than its encapsulating header.

use core::fmt;
use core::marker::PhantomData;

use super::{EthernetFrame, EthernetProtocol, EthernetRepr, IpProtocol};

/// Indentation state threaded through nested `pretty_print` calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrettyIndent {
    level: usize,
    pub(crate) is_new_line: bool,
}

impl PrettyIndent {
    pub fn new_level() -> PrettyIndent {
        PrettyIndent {
            level: 0,
            is_new_line: true,
        }
    }

    pub fn increase(&mut self, f: &mut fmt::Formatter) -> fmt::Result {
        self.level += 1;
        self.is_new_line = true;
        write!(f, "\n")
    }
}

impl fmt::Display for PrettyIndent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_new_line {
            for _ in 0..self.level {
                write!(f, "  ")?;
            }
        }
        Ok(())
    }
}

/// Implemented by every `Packet<T>` wire type to render itself (and, where
/// the payload encapsulates another protocol, recurse into it) through a
/// shared [`fmt::Formatter`].
pub trait PrettyPrint {
    fn pretty_print(
        buffer: &dyn AsRef<[u8]>,
        f: &mut fmt::Formatter,
        indent: &mut PrettyIndent,
    ) -> fmt::Result;
}

/// A wrapper suitable for passing to `log::trace!`/`{:?}` that renders a raw
/// frame buffer through its `PrettyPrint` impl instead of as a byte dump.
pub struct PrettyPrinter<'a, T: PrettyPrint> {
    buffer: &'a dyn AsRef<[u8]>,
    _marker: PhantomData<T>,
}

impl<'a, T: PrettyPrint> PrettyPrinter<'a, T> {
    pub fn new(buffer: &'a dyn AsRef<[u8]>) -> PrettyPrinter<'a, T> {
        PrettyPrinter {
            buffer,
            _marker: PhantomData,
        }
    }
}

impl<'a, T: PrettyPrint> fmt::Display for PrettyPrinter<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut indent = PrettyIndent::new_level();
        T::pretty_print(&self.buffer, f, &mut indent)
    }
}

impl<'a, T: PrettyPrint> fmt::Debug for PrettyPrinter<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<T: AsRef<[u8]>> PrettyPrint for EthernetFrame<T> {
    fn pretty_print(
        buffer: &dyn AsRef<[u8]>,
        f: &mut fmt::Formatter,
        indent: &mut PrettyIndent,
    ) -> fmt::Result {
        let frame = match EthernetFrame::new_checked(buffer.as_ref()) {
            Err(err) => return write!(f, "{indent}({err})"),
            Ok(frame) => frame,
        };
        match EthernetRepr::parse(&frame) {
            Err(err) => return write!(f, "{indent}({err})"),
            Ok(repr) => write!(f, "{indent}{repr}")?,
        }

        match frame.ethertype() {
            EthernetProtocol::Arp => {
                indent.increase(f)?;
                super::ArpPacket::<&[u8]>::pretty_print(&frame.payload(), f, indent)
            }
            EthernetProtocol::Ipv4 => {
                indent.increase(f)?;
                super::Ipv4Packet::<&[u8]>::pretty_print(&frame.payload(), f, indent)
            }
            _ => Ok(()),
        }
    }
}

impl<T: AsRef<[u8]>> PrettyPrint for super::ArpPacket<T> {
    fn pretty_print(
        buffer: &dyn AsRef<[u8]>,
        f: &mut fmt::Formatter,
        indent: &mut PrettyIndent,
    ) -> fmt::Result {
        match super::ArpPacket::new_checked(buffer.as_ref()) {
            Err(err) => write!(f, "{indent}({err})"),
            Ok(packet) => match super::ArpRepr::parse(&packet) {
                Err(err) => write!(f, "{indent}{err}"),
                Ok(repr) => write!(f, "{indent}{repr}"),
            },
        }
    }
}

impl<T: AsRef<[u8]>> PrettyPrint for super::Ipv4Packet<T> {
    fn pretty_print(
        buffer: &dyn AsRef<[u8]>,
        f: &mut fmt::Formatter,
        indent: &mut PrettyIndent,
    ) -> fmt::Result {
        use crate::phy::ChecksumCapabilities;

        let packet = match super::Ipv4Packet::new_checked(buffer.as_ref()) {
            Err(err) => return write!(f, "{indent}({err})"),
            Ok(packet) => packet,
        };
        let repr = match super::Ipv4Repr::parse(&packet, &ChecksumCapabilities::ignored()) {
            Err(err) => return write!(f, "{indent}({err})"),
            Ok(repr) => repr,
        };
        write!(f, "{indent}{repr}")?;

        match repr.next_header {
            IpProtocol::Icmp | IpProtocol::Udp | IpProtocol::Tcp => {
                super::ip::pretty_print_ip_payload(f, indent, repr, packet.payload())
            }
            _ => Ok(()),
        }
    }
}

impl<T: AsRef<[u8]>> PrettyPrint for super::Icmpv4Packet<T> {
    fn pretty_print(
        buffer: &dyn AsRef<[u8]>,
        f: &mut fmt::Formatter,
        indent: &mut PrettyIndent,
    ) -> fmt::Result {
        use crate::phy::ChecksumCapabilities;

        match super::Icmpv4Packet::new_checked(buffer.as_ref()) {
            Err(err) => write!(f, "{indent}({err})"),
            Ok(packet) => match super::Icmpv4Repr::parse(&packet, &ChecksumCapabilities::ignored())
            {
                Err(err) => write!(f, "{indent}{packet} ({err})"),
                Ok(repr) => write!(f, "{indent}{repr}"),
            },
        }
    }
}
