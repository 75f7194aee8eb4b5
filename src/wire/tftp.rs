//! TFTP (RFC 1350) header build/parse.
//!
//! No teacher precedent exists for this protocol inside `tapip-rs`: this
//! module follows the same `Packet<T>`/`Repr` shape as the rest of `wire`,
//! grounded on the wire behaviour of `original_source/network-tftp.c`
//! (`start_tftp`, `send_tftp_acknowledgement`, `send_tftp_error`). Option
//! negotiation (RFC 2347 et seq.) is out of scope: the mode is always the
//! literal `octet`, and there is no block-size option.

use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

use super::{Error, Result};

mod field {
    use crate::wire::field::{Field, Rest};

    pub const OPCODE: Field = 0..2;
    pub const BLOCK: Field = 2..4;
    pub const ERROR_CODE: Field = 2..4;
    pub const DATA: Rest = 4..;
    pub const ERROR_MESSAGE: Rest = 4..;
    pub const RQ_FIELDS: Rest = 2..;
}

/// The literal transfer mode this crate ever sends or expects.
pub const MODE_OCTET: &str = "octet";

/// Maximum DATA payload per RFC 1350: transfers close on the first short
/// (or zero-length) block.
pub const MAX_DATA_LEN: usize = 512;

enum_with_unknown! {
    pub enum Opcode(u16) {
        Rrq   = 1,
        Wrq   = 2,
        Data  = 3,
        Ack   = 4,
        Error = 5,
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Opcode::Rrq => write!(f, "RRQ"),
            Opcode::Wrq => write!(f, "WRQ"),
            Opcode::Data => write!(f, "DATA"),
            Opcode::Ack => write!(f, "ACK"),
            Opcode::Error => write!(f, "ERROR"),
            Opcode::Unknown(op) => write!(f, "opcode {op}"),
        }
    }
}

/// Find the first NUL byte in `data`, returning the string before it.
fn cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let nul = data.iter().position(|&b| b == 0).ok_or(Error)?;
    let s = core::str::from_utf8(&data[..nul]).map_err(|_| Error)?;
    Ok((s, &data[nul + 1..]))
}

/// A read/write wrapper around a TFTP message buffer.
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
        if self.buffer.as_ref().len() < field::OPCODE.end {
            Err(Error)
        } else {
            Ok(())
        }
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn opcode(&self) -> Opcode {
        Opcode::from(NetworkEndian::read_u16(&self.buffer.as_ref()[field::OPCODE]))
    }

    /// The block number of a DATA or ACK message.
    pub fn block_number(&self) -> Result<u16> {
        let data = self.buffer.as_ref();
        if data.len() < field::BLOCK.end {
            return Err(Error);
        }
        Ok(NetworkEndian::read_u16(&data[field::BLOCK]))
    }

    /// The error code of an ERROR message.
    pub fn error_code(&self) -> Result<u16> {
        let data = self.buffer.as_ref();
        if data.len() < field::ERROR_CODE.end {
            return Err(Error);
        }
        Ok(NetworkEndian::read_u16(&data[field::ERROR_CODE]))
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Packet<&'a T> {
    /// The DATA payload following the block number.
    pub fn data(&self) -> &'a [u8] {
        &self.buffer.as_ref()[field::DATA]
    }

    /// The NUL-terminated error message following the error code.
    pub fn error_message(&self) -> Result<&'a str> {
        let (message, _) = cstr(&self.buffer.as_ref()[field::ERROR_MESSAGE])?;
        Ok(message)
    }

    /// The filename and mode of an RRQ or WRQ, each NUL-terminated.
    pub fn filename_and_mode(&self) -> Result<(&'a str, &'a str)> {
        let rest = &self.buffer.as_ref()[field::RQ_FIELDS];
        let (filename, rest) = cstr(rest)?;
        let (mode, _) = cstr(rest)?;
        Ok((filename, mode))
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_opcode(&mut self, value: Opcode) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::OPCODE], value.into());
    }

    pub fn set_block_number(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::BLOCK], value);
    }

    pub fn set_error_code(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::ERROR_CODE], value);
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer.as_mut()[field::DATA]
    }
}

/// A high-level representation of a TFTP message.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Repr<'a> {
    Rrq {
        filename: &'a str,
        mode: &'a str,
    },
    Wrq {
        filename: &'a str,
        mode: &'a str,
    },
    Data {
        block: u16,
        data: &'a [u8],
    },
    Ack {
        block: u16,
    },
    Error {
        code: u16,
        message: &'a str,
    },
}

impl<'a> Repr<'a> {
    pub fn parse<T: AsRef<[u8]> + ?Sized>(packet: &Packet<&'a T>) -> Result<Repr<'a>> {
        match packet.opcode() {
            Opcode::Rrq => {
                let (filename, mode) = packet.filename_and_mode()?;
                Ok(Repr::Rrq { filename, mode })
            }
            Opcode::Wrq => {
                let (filename, mode) = packet.filename_and_mode()?;
                Ok(Repr::Wrq { filename, mode })
            }
            Opcode::Data => Ok(Repr::Data {
                block: packet.block_number()?,
                data: packet.data(),
            }),
            Opcode::Ack => Ok(Repr::Ack {
                block: packet.block_number()?,
            }),
            Opcode::Error => Ok(Repr::Error {
                code: packet.error_code()?,
                message: packet.error_message()?,
            }),
            Opcode::Unknown(_) => Err(Error),
        }
    }

    /// The exact number of bytes this message needs on the wire.
    pub fn buffer_len(&self) -> usize {
        match *self {
            Repr::Rrq { filename, mode } | Repr::Wrq { filename, mode } => {
                field::RQ_FIELDS.start + filename.len() + 1 + mode.len() + 1
            }
            Repr::Data { data, .. } => field::DATA.start + data.len(),
            Repr::Ack { .. } => field::BLOCK.end,
            Repr::Error { message, .. } => field::ERROR_MESSAGE.start + message.len() + 1,
        }
    }

    /// Emit this message into `packet`'s buffer, which must be at least
    /// [`buffer_len`](Self::buffer_len) bytes. Returns `Err` instead of
    /// panicking if the buffer is too small to hold the message — this is
    /// how an oversized filename is rejected rather than truncated.
    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>) -> Result<()> {
        if packet.buffer.as_ref().len() < self.buffer_len() {
            return Err(Error);
        }
        match *self {
            Repr::Rrq { filename, mode } | Repr::Wrq { filename, mode } => {
                packet.set_opcode(if matches!(self, Repr::Rrq { .. }) {
                    Opcode::Rrq
                } else {
                    Opcode::Wrq
                });
                let rest = &mut packet.buffer.as_mut()[field::RQ_FIELDS];
                let (name_field, rest) = rest.split_at_mut(filename.len() + 1);
                name_field[..filename.len()].copy_from_slice(filename.as_bytes());
                name_field[filename.len()] = 0;
                let (mode_field, _) = rest.split_at_mut(mode.len() + 1);
                mode_field[..mode.len()].copy_from_slice(mode.as_bytes());
                mode_field[mode.len()] = 0;
            }
            Repr::Data { block, data } => {
                packet.set_opcode(Opcode::Data);
                packet.set_block_number(block);
                packet.buffer.as_mut()[field::DATA.start..field::DATA.start + data.len()]
                    .copy_from_slice(data);
            }
            Repr::Ack { block } => {
                packet.set_opcode(Opcode::Ack);
                packet.set_block_number(block);
            }
            Repr::Error { code, message } => {
                packet.set_opcode(Opcode::Error);
                packet.set_error_code(code);
                let rest = &mut packet.buffer.as_mut()
                    [field::ERROR_MESSAGE.start..field::ERROR_MESSAGE.start + message.len() + 1];
                rest[..message.len()].copy_from_slice(message.as_bytes());
                rest[message.len()] = 0;
            }
        }
        Ok(())
    }
}

impl<'a> fmt::Display for Repr<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Repr::Rrq { filename, mode } => write!(f, "RRQ {filename} ({mode})"),
            Repr::Wrq { filename, mode } => write!(f, "WRQ {filename} ({mode})"),
            Repr::Data { block, data } => write!(f, "DATA block={block} len={}", data.len()),
            Repr::Ack { block } => write!(f, "ACK block={block}"),
            Repr::Error { code, message } => write!(f, "ERROR code={code} {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrq_round_trip() {
        let repr = Repr::Rrq {
            filename: "abc",
            mode: MODE_OCTET,
        };
        let mut buffer = vec![0u8; repr.buffer_len()];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        repr.emit(&mut packet).unwrap();

        let packet = Packet::new_checked(&buffer[..]).unwrap();
        assert_eq!(Repr::parse(&packet).unwrap(), repr);
    }

    #[test]
    fn data_round_trip() {
        let payload = [0xaau8; 512];
        let repr = Repr::Data {
            block: 7,
            data: &payload,
        };
        let mut buffer = vec![0u8; repr.buffer_len()];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        repr.emit(&mut packet).unwrap();

        let packet = Packet::new_checked(&buffer[..]).unwrap();
        assert_eq!(Repr::parse(&packet).unwrap(), repr);
    }

    #[test]
    fn ack_round_trip() {
        let repr = Repr::Ack { block: 65535 };
        let mut buffer = vec![0u8; repr.buffer_len()];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        repr.emit(&mut packet).unwrap();

        let packet = Packet::new_checked(&buffer[..]).unwrap();
        assert_eq!(Repr::parse(&packet).unwrap(), repr);
    }

    #[test]
    fn error_round_trip() {
        let repr = Repr::Error {
            code: 1,
            message: "File not found",
        };
        let mut buffer = vec![0u8; repr.buffer_len()];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        repr.emit(&mut packet).unwrap();

        let packet = Packet::new_checked(&buffer[..]).unwrap();
        assert_eq!(Repr::parse(&packet).unwrap(), repr);
    }

    #[test]
    fn oversized_filename_is_rejected() {
        let filename = "x".repeat(600);
        let repr = Repr::Wrq {
            filename: &filename,
            mode: MODE_OCTET,
        };
        let mut buffer = vec![0u8; 32];
        let mut packet = Packet::new_unchecked(&mut buffer[..]);
        assert!(repr.emit(&mut packet).is_err());
    }
}
