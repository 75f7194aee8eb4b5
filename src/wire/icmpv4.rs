//! ICMPv4 (RFC 792), restricted to what this crate ever needs to read:
//! Destination Unreachable. There is nothing to build: this crate never
//! sends ICMP, only surfaces it to the session as a terminal error.

use byteorder::{ByteOrder, NetworkEndian};

use super::{checksum, Error, Ipv4Packet, Result};

mod field {
    use crate::wire::field::Rest;

    pub const TYPE: usize = 0;
    pub const CODE: usize = 1;
    pub const CHECKSUM: ::core::ops::Range<usize> = 2..4;
    pub const UNUSED: ::core::ops::Range<usize> = 4..8;
    pub const DATA: Rest = 8..;
}

pub const HEADER_LEN: usize = field::DATA.start;

const TYPE_DST_UNREACHABLE: u8 = 3;

enum_with_unknown! {
    /// The subcode of a "Destination Unreachable" message.
    pub enum DstUnreachable(u8) {
        NetUnreachable   =  0,
        HostUnreachable  =  1,
        ProtoUnreachable =  2,
        PortUnreachable  =  3,
        FragRequired     =  4,
        SrcRouteFailed   =  5,
        DstNetUnknown    =  6,
        DstHostUnknown   =  7,
        SrcHostIsolated  =  8,
        NetProhibited    =  9,
        HostProhibited   = 10,
        NetUnreachToS    = 11,
        HostUnreachToS   = 12,
        CommProhibited   = 13,
        HostPrecedViol   = 14,
        PrecedCutoff     = 15,
    }
}

/// A read-only wrapper around an ICMPv4 message buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        Ok(packet)
    }

    pub fn check_len(&self) -> Result<()> {
        if self.buffer.as_ref().len() < HEADER_LEN {
            Err(Error)
        } else {
            Ok(())
        }
    }

    pub fn msg_type(&self) -> u8 {
        self.buffer.as_ref()[field::TYPE]
    }

    pub fn msg_code(&self) -> u8 {
        self.buffer.as_ref()[field::CODE]
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn verify_checksum(&self) -> bool {
        checksum::verify(self.buffer.as_ref())
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    pub fn data(&self) -> &'a [u8] {
        &self.buffer.as_ref()[field::DATA]
    }
}

/// A high-level representation of the only ICMPv4 message this crate reads:
/// a Destination Unreachable report carrying the offending IP header plus
/// its first 8 bytes of payload (which is enough to hold the UDP header
/// that names the port that was unreachable).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Repr {
    pub reason: DstUnreachable,
    pub offending_protocol: super::IpProtocol,
    pub offending_dst_addr: super::Ipv4Address,
}

impl Repr {
    pub fn parse<T: AsRef<[u8]> + ?Sized>(packet: &Packet<&T>) -> Result<Repr> {
        packet.check_len()?;
        if !packet.verify_checksum() {
            return Err(Error);
        }
        if packet.msg_type() != TYPE_DST_UNREACHABLE {
            return Err(Error);
        }
        let reason = DstUnreachable::from(packet.msg_code());
        let embedded = Ipv4Packet::new_checked(packet.data())?;
        Ok(Repr {
            reason,
            offending_protocol: embedded.protocol(),
            offending_dst_addr: embedded.dst_addr(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{IpProtocol, Ipv4Address, Ipv4Repr};

    #[test]
    fn parses_port_unreachable() {
        let offending = Ipv4Repr {
            src_addr: Ipv4Address::new(10, 0, 0, 2),
            dst_addr: Ipv4Address::new(10, 0, 0, 1),
            protocol: IpProtocol::Udp,
            payload_len: 8,
            hop_limit: 64,
        };
        let mut offending_buf = [0u8; crate::wire::ipv4::HEADER_LEN + 8];
        {
            let mut packet = Ipv4Packet::new_unchecked(&mut offending_buf[..]);
            offending.emit(&mut packet, 1);
        }

        let mut buffer = vec![0u8; HEADER_LEN + offending_buf.len()];
        buffer[field::TYPE] = TYPE_DST_UNREACHABLE;
        buffer[field::CODE] = DstUnreachable::PortUnreachable.into();
        buffer[field::DATA].copy_from_slice(&offending_buf);
        let sum = checksum::data(&buffer);
        NetworkEndian::write_u16(&mut buffer[field::CHECKSUM], !sum);

        let packet = Packet::new_checked(&buffer[..]).unwrap();
        let repr = Repr::parse(&packet).unwrap();
        assert_eq!(repr.reason, DstUnreachable::PortUnreachable);
        assert_eq!(repr.offending_protocol, IpProtocol::Udp);
        assert_eq!(repr.offending_dst_addr, offending.dst_addr);
    }

    #[test]
    fn rejects_non_unreachable_type() {
        let mut buffer = vec![0u8; HEADER_LEN + crate::wire::ipv4::HEADER_LEN];
        buffer[field::TYPE] = 8; // echo request
        let sum = checksum::data(&buffer);
        NetworkEndian::write_u16(&mut buffer[field::CHECKSUM], !sum);

        let packet = Packet::new_checked(&buffer[..]).unwrap();
        assert!(Repr::parse(&packet).is_err());
    }
}
