//! Socket types layered on top of the interface's IP dispatch.

pub mod icmp;
pub mod raw;
pub mod tcp;
pub mod udp;

use crate::iface::InterfaceInner;
use crate::iface::{AsSocket, AsSocketMut};
use crate::time::Instant;

/// A network socket of any supported type.
///
/// Every variant is a thin wrapper around the type-specific socket in its
/// own module; this enum only exists so a [`SocketSet`](crate::iface::SocketSet)
/// can hold a mix of socket types in one fixed-size arena.
#[derive(Debug)]
pub enum Socket<'a> {
    Raw(raw::Socket<'a>),
    Icmp(icmp::Socket<'a>),
    Udp(udp::Socket<'a>),
    Tcp(tcp::Socket<'a>),
}

macro_rules! from_socket {
    ($variant:ident, $ty:ty) => {
        impl<'a> From<$ty> for Socket<'a> {
            fn from(socket: $ty) -> Self {
                Socket::$variant(socket)
            }
        }

        impl<'a> AsSocket<'a> for $ty {
            fn downcast(socket: &Socket<'a>) -> Option<&Self> {
                match socket {
                    Socket::$variant(socket) => Some(socket),
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }

        impl<'a> AsSocketMut<'a> for $ty {
            fn downcast_mut(socket: &mut Socket<'a>) -> Option<&mut Self> {
                match socket {
                    Socket::$variant(socket) => Some(socket),
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}

from_socket!(Raw, raw::Socket<'a>);
from_socket!(Icmp, icmp::Socket<'a>);
from_socket!(Udp, udp::Socket<'a>);
from_socket!(Tcp, tcp::Socket<'a>);

impl<'a> Socket<'a> {
    pub(crate) fn poll_at(&self, cx: &mut InterfaceInner) -> PollAt {
        match self {
            Socket::Raw(s) => s.poll_at(cx),
            Socket::Icmp(s) => s.poll_at(cx),
            Socket::Udp(s) => s.poll_at(cx),
            Socket::Tcp(s) => s.poll_at(cx),
        }
    }
}

/// A description of when a socket next wants its [`dispatch`](raw::Socket::dispatch)-style
/// method to be called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAt {
    /// The socket needs to be polled immediately.
    Now,
    /// The socket needs to be polled at a specific time.
    Time(Instant),
    /// The socket does not need to be polled until there is a change in its
    /// ingress state, e.g. a packet arrives.
    Ingress,
}
