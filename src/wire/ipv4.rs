//! IPv4 (RFC 791), header-only: no options, no fragmentation.

use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

pub use core::net::Ipv4Addr as Address;

use super::{checksum, Error, IpProtocol, Result};

pub const ADDR_SIZE: usize = 4;

pub(crate) trait AddressExt {
    fn from_bytes(data: &[u8]) -> Self;
}

impl AddressExt for Address {
    fn from_bytes(data: &[u8]) -> Address {
        let mut bytes = [0; ADDR_SIZE];
        bytes.copy_from_slice(data);
        Address::from(bytes)
    }
}

mod field {
    use crate::wire::field::{Field, Rest};

    pub const VER_IHL: usize = 0;
    pub const DSCP_ECN: usize = 1;
    pub const LENGTH: Field = 2..4;
    pub const IDENT: Field = 4..6;
    pub const FLG_OFF: Field = 6..8;
    pub const TTL: usize = 8;
    pub const PROTOCOL: usize = 9;
    pub const CHECKSUM: Field = 10..12;
    pub const SRC_ADDR: Field = 12..16;
    pub const DST_ADDR: Field = 16..20;
    pub const PAYLOAD: Rest = 20..;
}

/// Fixed header length: version 4, IHL 5, no options.
pub const HEADER_LEN: usize = field::PAYLOAD.start;

const VERSION: u8 = 4;
const IHL: u8 = 5;
const DEFAULT_TTL: u8 = 64;

/// A read/write wrapper around an IPv4 packet buffer.
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

    /// Ensure the buffer is at least as long as the fixed header, and that
    /// the declared total length fits within it. Options and fragmentation
    /// are never emitted or expected, so the header is always exactly
    /// [`HEADER_LEN`] bytes.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            return Err(Error);
        }
        if self.header_len() != HEADER_LEN {
            return Err(Error);
        }
        if len < self.total_len() as usize {
            return Err(Error);
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[field::VER_IHL] >> 4
    }

    pub fn header_len(&self) -> usize {
        ((self.buffer.as_ref()[field::VER_IHL] & 0x0f) as usize) << 2
    }

    pub fn total_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::LENGTH])
    }

    pub fn ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::IDENT])
    }

    pub fn dont_fragment(&self) -> bool {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLG_OFF]) & 0x4000 != 0
    }

    pub fn more_fragments(&self) -> bool {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLG_OFF]) & 0x2000 != 0
    }

    pub fn frag_offset(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLG_OFF]) & 0x1fff
    }

    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[field::TTL]
    }

    pub fn protocol(&self) -> IpProtocol {
        IpProtocol::from(self.buffer.as_ref()[field::PROTOCOL])
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn src_addr(&self) -> Address {
        Address::from_bytes(&self.buffer.as_ref()[field::SRC_ADDR])
    }

    pub fn dst_addr(&self) -> Address {
        Address::from_bytes(&self.buffer.as_ref()[field::DST_ADDR])
    }

    /// The header checksum folds to all-ones over a well-formed header.
    pub fn verify_checksum(&self) -> bool {
        checksum::verify(&self.buffer.as_ref()[..HEADER_LEN])
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    pub fn payload(&self) -> &'a [u8] {
        let total_len = self.total_len() as usize;
        &self.buffer.as_ref()[HEADER_LEN..total_len]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_version_and_ihl(&mut self) {
        self.buffer.as_mut()[field::VER_IHL] = (VERSION << 4) | IHL;
    }

    pub fn set_dscp_ecn(&mut self, value: u8) {
        self.buffer.as_mut()[field::DSCP_ECN] = value;
    }

    pub fn set_total_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::LENGTH], value);
    }

    pub fn set_ident(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::IDENT], value);
    }

    pub fn set_flags_and_frag_offset(&mut self, dont_fragment: bool) {
        let value = if dont_fragment { 0x4000 } else { 0 };
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::FLG_OFF], value);
    }

    pub fn set_ttl(&mut self, value: u8) {
        self.buffer.as_mut()[field::TTL] = value;
    }

    pub fn set_protocol(&mut self, value: IpProtocol) {
        self.buffer.as_mut()[field::PROTOCOL] = value.into();
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }

    pub fn set_src_addr(&mut self, value: Address) {
        self.buffer.as_mut()[field::SRC_ADDR].copy_from_slice(&value.octets());
    }

    pub fn set_dst_addr(&mut self, value: Address) {
        self.buffer.as_mut()[field::DST_ADDR].copy_from_slice(&value.octets());
    }

    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let sum = checksum::data(&self.buffer.as_ref()[..HEADER_LEN]);
        self.set_checksum(!sum);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let total_len = self.total_len() as usize;
        &mut self.buffer.as_mut()[HEADER_LEN..total_len]
    }
}

/// A high-level representation of an IPv4 header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_addr: Address,
    pub dst_addr: Address,
    pub protocol: IpProtocol,
    pub payload_len: usize,
    pub hop_limit: u8,
}

impl Repr {
    pub fn parse<T: AsRef<[u8]> + ?Sized>(packet: &Packet<&T>) -> Result<Repr> {
        packet.check_len()?;
        if packet.version() != VERSION {
            return Err(Error);
        }
        if !packet.verify_checksum() {
            return Err(Error);
        }
        // No IP fragmentation or reassembly: a fragmented datagram is rejected
        // outright rather than queued for reassembly.
        if packet.more_fragments() || packet.frag_offset() != 0 {
            return Err(Error);
        }
        Ok(Repr {
            src_addr: packet.src_addr(),
            dst_addr: packet.dst_addr(),
            protocol: packet.protocol(),
            payload_len: packet.total_len() as usize - HEADER_LEN,
            hop_limit: packet.ttl(),
        })
    }

    pub const fn buffer_len(&self) -> usize {
        HEADER_LEN
    }

    /// Emit the header and fill in its checksum. `ident` should be a
    /// per-datagram identifier (the spec's traffic never fragments, so it
    /// only needs to be unique enough to not alias recently-sent packets).
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>, ident: u16) {
        packet.set_version_and_ihl();
        packet.set_dscp_ecn(0);
        let total_len = (HEADER_LEN + self.payload_len) as u16;
        // Total length is the IP+UDP+payload size, padded to even for the
        // checksum the spec requires; actual framing never needs trailing
        // padding bytes since TFTP payloads already fall on byte boundaries.
        packet.set_total_len(total_len);
        packet.set_ident(ident);
        packet.set_flags_and_frag_offset(true);
        packet.set_ttl(if self.hop_limit == 0 {
            DEFAULT_TTL
        } else {
            self.hop_limit
        });
        packet.set_protocol(self.protocol);
        packet.set_src_addr(self.src_addr);
        packet.set_dst_addr(self.dst_addr);
        packet.fill_checksum();
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "IPv4 {} -> {} proto={} len={}",
            self.src_addr, self.dst_addr, self.protocol, self.payload_len
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let repr = Repr {
            src_addr: Address::new(10, 0, 0, 2),
            dst_addr: Address::new(10, 0, 0, 1),
            protocol: IpProtocol::Udp,
            payload_len: 16,
            hop_limit: 64,
        };
        let mut buffer = [0u8; HEADER_LEN + 16];
        {
            let mut packet = Packet::new_unchecked(&mut buffer[..]);
            repr.emit(&mut packet, 0x1234);
        }
        let packet = Packet::new_checked(&buffer[..]).unwrap();
        assert!(packet.verify_checksum());
        assert_eq!(Repr::parse(&packet).unwrap(), repr);
    }

    #[test]
    fn checksum_fixpoint() {
        let repr = Repr {
            src_addr: Address::new(192, 168, 1, 1),
            dst_addr: Address::new(192, 168, 1, 2),
            protocol: IpProtocol::Icmp,
            payload_len: 0,
            hop_limit: 64,
        };
        let mut buffer = [0u8; HEADER_LEN];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        repr.emit(&mut packet, 1);
        assert_eq!(checksum::data(&buffer[..HEADER_LEN]), 0xffff);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let repr = Repr {
            src_addr: Address::new(10, 0, 0, 2),
            dst_addr: Address::new(10, 0, 0, 1),
            protocol: IpProtocol::Udp,
            payload_len: 0,
            hop_limit: 64,
        };
        let mut buffer = [0u8; HEADER_LEN];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        repr.emit(&mut packet, 7);
        buffer[field::TTL] ^= 0xff;
        let packet = Packet::new_checked(&buffer[..]).unwrap();
        assert!(Repr::parse(&packet).is_err());
    }
}
