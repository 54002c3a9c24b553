mod fragmentation;
mod interface;
mod neighbor;
mod packet;
mod pmtu;
mod route;
mod socket_meta;
mod socket_set;

pub use self::interface::{Config, Interface, InterfaceInner, PollIngressSingleResult, PollResult};
pub use self::route::{Route, RouteTableFull, Routes};
pub use self::socket_set::{AsSocket, AsSocketMut, SocketHandle, SocketSet};
