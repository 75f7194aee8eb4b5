//! The Internet checksum (RFC 1071), ported from `tapip-rs::wire::ip::checksum`.

use byteorder::{ByteOrder, NetworkEndian};

use super::{IpProtocol, Ipv4Address};

const fn propagate_carries(word: u32) -> u16 {
    let sum = (word >> 16) + (word & 0xffff);
    ((sum >> 16) as u16) + (sum as u16)
}

/// Compute an RFC 1071 compliant checksum (without the final one's complement)
/// over a one's-complement sum of 16-bit big-endian words. A trailing odd byte
/// is treated as if zero-padded.
pub fn data(mut data: &[u8]) -> u16 {
    let mut accum: u32 = 0;

    const CHUNK_SIZE: usize = 32;
    while data.len() >= CHUNK_SIZE {
        let mut d = &data[..CHUNK_SIZE];
        while d.len() >= 2 {
            accum += NetworkEndian::read_u16(d) as u32;
            d = &d[2..];
        }
        data = &data[CHUNK_SIZE..];
    }

    while data.len() >= 2 {
        accum += NetworkEndian::read_u16(data) as u32;
        data = &data[2..];
    }

    if let Some(&value) = data.first() {
        accum += (value as u32) << 8;
    }

    propagate_carries(accum)
}

/// Combine several RFC 1071 partial checksums (each already folded to 16 bits).
pub fn combine(checksums: &[u16]) -> u16 {
    let mut accum: u32 = 0;
    for &word in checksums {
        accum += word as u32;
    }
    propagate_carries(accum)
}

/// The 12-byte IPv4 pseudo-header checksum contribution used by UDP: source
/// address, destination address, a zero byte, the protocol number, and the
/// UDP length.
pub fn pseudo_header_v4(
    src_addr: &Ipv4Address,
    dst_addr: &Ipv4Address,
    protocol: IpProtocol,
    length: u16,
) -> u16 {
    let mut proto_len = [0u8; 4];
    proto_len[1] = protocol.into();
    NetworkEndian::write_u16(&mut proto_len[2..4], length);

    combine(&[
        data(&src_addr.octets()),
        data(&dst_addr.octets()),
        data(&proto_len[..]),
    ])
}

/// A well-formed packet's checksum field holds the one's complement of the
/// folded sum of everything else; summing the whole range (field included)
/// therefore always folds to all-ones (0xffff), never zero.
pub fn verify(bytes: &[u8]) -> bool {
    data(bytes) == 0xffff
}
