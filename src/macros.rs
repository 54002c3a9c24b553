// Copied pretty much verbatim from smoltcp, which the on-the-wire parsing
// style of this crate is otherwise closely modeled on.

macro_rules! net_log {
    (trace, $($arg:expr),*) => { log::trace!($($arg),*); };
    (debug, $($arg:expr),*) => { log::debug!($($arg),*); };
}

macro_rules! net_trace {
    ($($arg:expr),*) => (net_log!(trace, $($arg),*));
}

macro_rules! net_debug {
    ($($arg:expr),*) => (net_log!(debug, $($arg),*));
}

/// Define an enum which has some known variants, and a single `Unknown(iN)` variant which
/// absorbs any value outside of the known ones.
///
/// This is used throughout `wire` for fields that are a small, closed set of known values
/// on the wire (ARP operation, IP protocol number, ...) but which must never cause a parse
/// failure just because a peer sent something outside the known set.
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $( $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $( #[$enum_attr] )*
        pub enum $name {
            $( $variant ),+,
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),+,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),+,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}
