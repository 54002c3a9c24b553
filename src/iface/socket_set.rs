use core::fmt;

use managed::ManagedSlice;

use super::socket_meta::Meta;
use crate::socket::Socket;

/// Opaque handle to a socket stored in a [`SocketSet`].
///
/// Handles are only ever valid for the set that produced them; passing one
/// to a different `SocketSet` will panic or return the wrong socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketHandle(usize);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One slot of a [`SocketSet`]'s backing storage.
#[derive(Debug)]
pub struct Item<'a> {
    pub meta: Meta,
    pub socket: Socket<'a>,
}

/// An extensible set of sockets, backed by either a `Vec` or a fixed-size
/// array of `Option<Item>` slots.
///
/// The interface's poll loop walks every occupied slot each time it's
/// polled; sockets are addressed by the [`SocketHandle`] returned from
/// [`add`](Self::add), not by position, so removing one socket doesn't
/// invalidate handles to the others.
#[derive(Debug)]
pub struct SocketSet<'a> {
    sockets: ManagedSlice<'a, Option<Item<'a>>>,
}

impl<'a> SocketSet<'a> {
    /// Create a socket set using the provided storage.
    pub fn new<SocketsT>(sockets: SocketsT) -> SocketSet<'a>
    where
        SocketsT: Into<ManagedSlice<'a, Option<Item<'a>>>>,
    {
        let sockets = sockets.into();
        SocketSet { sockets }
    }

    /// Add a socket to the set, and return its handle.
    ///
    /// # Panics
    /// This function panics if every slot in the set's storage is occupied.
    pub fn add<T: Into<Socket<'a>>>(&mut self, socket: T) -> SocketHandle {
        let socket = socket.into();

        for (index, slot) in self.sockets.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Item {
                    meta: Meta::default(),
                    socket,
                });
                return SocketHandle(index);
            }
        }

        panic!("adding a socket to a full SocketSet")
    }

    /// Get a socket from the set by its handle, as mutable.
    ///
    /// # Panics
    /// This function panics if the handle does not belong to this socket set
    /// or the socket has the wrong type.
    pub fn get<T: AsSocket<'a>>(&self, handle: SocketHandle) -> &T {
        match self.sockets[handle.0].as_ref() {
            Some(item) => T::downcast(&item.socket).expect("handle refers to a socket of a wrong type"),
            None => panic!("handle does not refer to a valid socket"),
        }
    }

    /// Get a mutable reference to a socket from the set by its handle.
    ///
    /// # Panics
    /// This function panics if the handle does not belong to this socket set
    /// or the socket has the wrong type.
    pub fn get_mut<T: AsSocketMut<'a>>(&mut self, handle: SocketHandle) -> &mut T {
        match self.sockets[handle.0].as_mut() {
            Some(item) => {
                T::downcast_mut(&mut item.socket).expect("handle refers to a socket of a wrong type")
            }
            None => panic!("handle does not refer to a valid socket"),
        }
    }

    /// Remove a socket from the set, returning it.
    ///
    /// # Panics
    /// This function panics if the handle does not belong to this socket set.
    pub fn remove(&mut self, handle: SocketHandle) -> Socket<'a> {
        match self.sockets[handle.0].take() {
            Some(item) => item.socket,
            None => panic!("handle does not refer to a valid socket"),
        }
    }

    /// Get the number of sockets currently held in the set.
    pub fn len(&self) -> usize {
        self.sockets.iter().filter(|i| i.is_some()).count()
    }

    /// Query whether the set holds no sockets.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over every occupied slot.
    pub(crate) fn items(&self) -> impl Iterator<Item = &Item<'a>> + '_ {
        self.sockets.iter().filter_map(|i| i.as_ref())
    }

    /// Iterate mutably over every occupied slot.
    pub(crate) fn items_mut(&mut self) -> impl Iterator<Item = &mut Item<'a>> + '_ {
        self.sockets.iter_mut().filter_map(|i| i.as_mut())
    }

    /// Iterate over every handle/socket pair currently in the set.
    pub fn iter(&self) -> impl Iterator<Item = (SocketHandle, &Socket<'a>)> + '_ {
        self.sockets
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|item| (SocketHandle(i), &item.socket)))
    }

    /// Iterate mutably over every handle/socket pair currently in the set.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SocketHandle, &mut Socket<'a>)> + '_ {
        self.sockets
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|item| (SocketHandle(i), &mut item.socket)))
    }
}

/// Downcast a `&Socket` to one of its variants' inner type.
pub trait AsSocket<'a> {
    fn downcast(socket: &Socket<'a>) -> Option<&Self>;
}

/// Downcast a `&mut Socket` to one of its variants' inner type.
pub trait AsSocketMut<'a> {
    fn downcast_mut(socket: &mut Socket<'a>) -> Option<&mut Self>;
}
