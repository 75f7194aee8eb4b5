//! Low-level packet access and construction.
//!
//! Patterned on `tapip-rs::wire`: a `Packet<T>` family gives checked,
//! panic-free accessors over a raw octet buffer, and a parallel `Repr`
//! family gives a compact, validated, high-level view that can be `parse`d
//! from and `emit`ted into such a buffer. The codec never validates
//! cross-field semantics (is this the block number we expect? is this
//! source port the one we bound?) — that is the session's job.
//!
//! Unlike the teacher crate this module only ever deals with Ethernet, ARP
//! and IPv4: there is no IPv6 and no multi-family `IpAddress`/`IpCidr`
//! abstraction, since the spec this crate implements rules both out.

pub(crate) mod field {
    pub type Field = ::core::ops::Range<usize>;
    pub type Rest = ::core::ops::RangeFrom<usize>;
}

/// Defines a fieldless wrapper enum that round-trips an unrecognized wire
/// value through an `Unknown` variant instead of failing to parse.
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $( $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        $( #[$enum_attr] )*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $variant ),+,
            Unknown($ty),
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant, )+
                    other => $name::Unknown(other),
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value, )+
                    $name::Unknown(other) => other,
                }
            }
        }
    };
}

pub mod arp;
pub mod checksum;
pub mod ethernet;
pub mod icmpv4;
pub mod ipv4;
pub mod tftp;
pub mod udp;

pub use self::arp::{Operation as ArpOperation, Packet as ArpPacket, Repr as ArpRepr};
pub use self::ethernet::{Address as EthernetAddress, EtherType, Frame as EthernetFrame};
pub use self::icmpv4::{DstUnreachable, Packet as Icmpv4Packet, Repr as Icmpv4Repr};
pub use self::ipv4::{Address as Ipv4Address, Packet as Ipv4Packet, Repr as Ipv4Repr};
pub use self::tftp::{Opcode as TftpOpcode, Packet as TftpPacket, Repr as TftpRepr};
pub use self::udp::{Packet as UdpPacket, Repr as UdpRepr, HEADER_LEN as UDP_HEADER_LEN};

use core::fmt;

enum_with_unknown! {
    /// IP datagram encapsulated protocol. Only the values this crate ever
    /// emits or accepts are named; everything else still round-trips.
    pub enum IpProtocol(u8) {
        Icmp = 0x01,
        Udp  = 0x11,
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            IpProtocol::Icmp => write!(f, "ICMP"),
            IpProtocol::Udp => write!(f, "UDP"),
            IpProtocol::Unknown(id) => write!(f, "0x{id:02x}"),
        }
    }
}

/// Parsing or emitting a packet failed: the buffer was too short, a field
/// held a value this crate does not support, or the data would overflow
/// the buffer it was asked to be emitted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed or unsupported packet")
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
