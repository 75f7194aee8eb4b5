//! UDP (RFC 768), ported from `tapip-rs::wire::udp`.

use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

use super::{checksum, Error, IpProtocol, Ipv4Address, Result};

mod field {
    use crate::wire::field::{Field, Rest};

    pub const SRC_PORT: Field = 0..2;
    pub const DST_PORT: Field = 2..4;
    pub const LENGTH: Field = 4..6;
    pub const CHECKSUM: Field = 6..8;
    pub const PAYLOAD: Rest = 8..;
}

pub const HEADER_LEN: usize = field::PAYLOAD.start;

/// A read/write wrapper around a UDP datagram buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

#[allow(clippy::len_without_is_empty)]
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
        let buffer_len = self.buffer.as_ref().len();
        if buffer_len < HEADER_LEN {
            return Err(Error);
        }
        let field_len = self.len() as usize;
        if buffer_len < field_len || field_len < HEADER_LEN {
            return Err(Error);
        }
        Ok(())
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::SRC_PORT])
    }

    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::DST_PORT])
    }

    /// The length field: the UDP header plus payload, in bytes.
    pub fn len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::LENGTH])
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    /// Validate the packet checksum against the given pseudo-header
    /// addresses. An all-zero transmitted checksum means the sender
    /// generated none, and is accepted unconditionally per RFC 768.
    pub fn verify_checksum(&self, src_addr: &Ipv4Address, dst_addr: &Ipv4Address) -> bool {
        if self.checksum() == 0 {
            return true;
        }
        let data = self.buffer.as_ref();
        checksum::combine(&[
            checksum::pseudo_header_v4(src_addr, dst_addr, IpProtocol::Udp, self.len()),
            checksum::data(&data[..self.len() as usize]),
        ]) == 0xffff
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    pub fn payload(&self) -> &'a [u8] {
        let len = self.len() as usize;
        &self.buffer.as_ref()[HEADER_LEN..len]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::SRC_PORT], value);
    }

    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::DST_PORT], value);
    }

    pub fn set_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::LENGTH], value);
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let len = self.len() as usize;
        &mut self.buffer.as_mut()[HEADER_LEN..len]
    }

    /// Compute and fill in the checksum over the pseudo-header and the
    /// datagram itself. A computed value of zero is sent as all-ones
    /// instead, since zero on the wire means "no checksum".
    pub fn fill_checksum(&mut self, src_addr: &Ipv4Address, dst_addr: &Ipv4Address) {
        self.set_checksum(0);
        let checksum = {
            let data = self.buffer.as_ref();
            !checksum::combine(&[
                checksum::pseudo_header_v4(src_addr, dst_addr, IpProtocol::Udp, self.len()),
                checksum::data(&data[..self.len() as usize]),
            ])
        };
        self.set_checksum(if checksum == 0 { 0xffff } else { checksum });
    }
}

/// A high-level representation of a UDP datagram header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub src_port: u16,
    pub dst_port: u16,
}

impl Repr {
    pub fn parse<T: AsRef<[u8]> + ?Sized>(
        packet: &Packet<&T>,
        src_addr: &Ipv4Address,
        dst_addr: &Ipv4Address,
    ) -> Result<Repr> {
        packet.check_len()?;
        if packet.dst_port() == 0 {
            return Err(Error);
        }
        if !packet.verify_checksum(src_addr, dst_addr) {
            return Err(Error);
        }
        Ok(Repr {
            src_port: packet.src_port(),
            dst_port: packet.dst_port(),
        })
    }

    pub const fn header_len(&self) -> usize {
        HEADER_LEN
    }

    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(
        &self,
        packet: &mut Packet<T>,
        src_addr: &Ipv4Address,
        dst_addr: &Ipv4Address,
        payload_len: usize,
    ) {
        packet.set_src_port(self.src_port);
        packet.set_dst_port(self.dst_port);
        packet.set_len((HEADER_LEN + payload_len) as u16);
        packet.fill_checksum(src_addr, dst_addr);
    }
}

impl fmt::Display for Repr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UDP src={} dst={}", self.src_port, self.dst_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC_ADDR: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);
    const DST_ADDR: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);

    #[test]
    fn round_trip() {
        let repr = Repr {
            src_port: 50000,
            dst_port: 69,
        };
        let payload = b"octet\0";
        let mut buffer = vec![0u8; HEADER_LEN + payload.len()];
        {
            let mut packet = Packet::new_unchecked(&mut buffer[..]);
            repr.emit(&mut packet, &SRC_ADDR, &DST_ADDR, payload.len());
            packet.payload_mut().copy_from_slice(payload);
        }
        let packet = Packet::new_checked(&buffer[..]).unwrap();
        assert_eq!(Repr::parse(&packet, &SRC_ADDR, &DST_ADDR).unwrap(), repr);
        assert_eq!(packet.payload(), payload);
    }

    #[test]
    fn zero_checksum_is_accepted() {
        let repr = Repr {
            src_port: 1,
            dst_port: 2,
        };
        let mut buffer = vec![0u8; HEADER_LEN];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        repr.emit(&mut packet, &SRC_ADDR, &DST_ADDR, 0);
        packet.set_checksum(0);
        let packet = Packet::new_checked(&buffer[..]).unwrap();
        assert!(Repr::parse(&packet, &SRC_ADDR, &DST_ADDR).is_ok());
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let repr = Repr {
            src_port: 1,
            dst_port: 2,
        };
        let mut buffer = vec![0u8; HEADER_LEN];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        repr.emit(&mut packet, &SRC_ADDR, &DST_ADDR, 0);
        let corrupt = packet.checksum() ^ 0xffff;
        packet.set_checksum(corrupt);
        let packet = Packet::new_checked(&buffer[..]).unwrap();
        assert!(Repr::parse(&packet, &SRC_ADDR, &DST_ADDR).is_err());
    }
}
