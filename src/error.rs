//! Crate-level error type.
//!
//! [`wire::Error`](crate::wire::Error) stays a minimal "malformed or
//! unsupported" marker, the way `tapip-rs`'s wire layer keeps it — codecs
//! don't know *why* a packet is being rejected, only that it is. This type
//! is what the session and pool layers use once they need to explain a
//! failure to a human and pick an exit code.

use std::fmt;
use std::io;

use crate::wire;

/// TFTP error codes, RFC 1350 section 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TftpErrorCode {
    Undefined,
    NotFound,
    AccessViolation,
    NoSpace,
    BadOp,
    UnknownTid,
    FileExists,
    NoSuchUser,
    Other(u16),
}

impl TftpErrorCode {
    pub fn from_wire(code: u16) -> Self {
        match code {
            0 => Self::Undefined,
            1 => Self::NotFound,
            2 => Self::AccessViolation,
            3 => Self::NoSpace,
            4 => Self::BadOp,
            5 => Self::UnknownTid,
            6 => Self::FileExists,
            7 => Self::NoSuchUser,
            other => Self::Other(other),
        }
    }

    pub fn to_wire(self) -> u16 {
        match self {
            Self::Undefined => 0,
            Self::NotFound => 1,
            Self::AccessViolation => 2,
            Self::NoSpace => 3,
            Self::BadOp => 4,
            Self::UnknownTid => 5,
            Self::FileExists => 6,
            Self::NoSuchUser => 7,
            Self::Other(n) => n,
        }
    }
}

impl fmt::Display for TftpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Self::Undefined => "undefined error",
            Self::NotFound => "file not found",
            Self::AccessViolation => "access violation",
            Self::NoSpace => "disk full or allocation exceeded",
            Self::BadOp => "illegal TFTP operation",
            Self::UnknownTid => "unknown transfer ID",
            Self::FileExists => "file already exists",
            Self::NoSuchUser => "no such user",
            Self::Other(n) => return write!(f, "error {n}"),
        };
        f.write_str(text)
    }
}

/// ICMP "destination unreachable" subcodes, RFC 792.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpUnreachable {
    BadNetwork,
    BadHost,
    BadProtocol,
    BadPort,
    FragNeeded,
    SrcRouteFailed,
    NetUnknown,
    HostUnknown,
    Isolated,
    NetProhibited,
    HostProhibited,
    TosForNet,
    TosForHost,
    CommProhibited,
    HostPrecedenceViolation,
    PrecedenceCutoff,
    Other(u8),
}

impl IcmpUnreachable {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::BadNetwork,
            1 => Self::BadHost,
            2 => Self::BadProtocol,
            3 => Self::BadPort,
            4 => Self::FragNeeded,
            5 => Self::SrcRouteFailed,
            6 => Self::NetUnknown,
            7 => Self::HostUnknown,
            8 => Self::Isolated,
            9 => Self::NetProhibited,
            10 => Self::HostProhibited,
            11 => Self::TosForNet,
            12 => Self::TosForHost,
            13 => Self::CommProhibited,
            14 => Self::HostPrecedenceViolation,
            15 => Self::PrecedenceCutoff,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for IcmpUnreachable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Self::BadNetwork => "bad-network",
            Self::BadHost => "bad-host",
            Self::BadProtocol => "bad-protocol",
            Self::BadPort => "bad-port",
            Self::FragNeeded => "frag-needed",
            Self::SrcRouteFailed => "src-route-failed",
            Self::NetUnknown => "net-unknown",
            Self::HostUnknown => "host-unknown",
            Self::Isolated => "isolated",
            Self::NetProhibited => "net-prohibited",
            Self::HostProhibited => "host-prohibited",
            Self::TosForNet => "tos-for-net",
            Self::TosForHost => "tos-for-host",
            Self::CommProhibited => "comm-prohibited",
            Self::HostPrecedenceViolation => "host-precedence-violation",
            Self::PrecedenceCutoff => "precedence-cutoff",
            Self::Other(n) => return write!(f, "unreachable({n})"),
        };
        f.write_str(text)
    }
}

#[derive(Debug)]
pub enum Error {
    /// A command-line argument or configuration value was invalid.
    Argument(String),
    /// Opening, querying or configuring the link-layer device failed.
    Link(String),
    /// The remote host never answered ARP after the retry budget was spent.
    ArpUnreachable,
    /// The peer sent a TFTP ERROR packet.
    Peer {
        code: TftpErrorCode,
        message: String,
    },
    /// An ICMP destination-unreachable arrived before the last block was sent.
    IcmpUnreachable(IcmpUnreachable),
    /// A local file read failed mid-transfer.
    LocalRead(io::Error),
    /// A local file write failed mid-transfer.
    LocalWrite(io::Error),
    /// The peer sent an opcode we didn't expect in the current state.
    UnexpectedOpcode,
    /// The codec refused to build a packet (e.g. a filename too long for the MTU).
    BufferOverflow,
    /// A malformed wire packet that the caller could not otherwise classify.
    Wire(wire::Error),
    /// The user interrupted the transfer.
    Interrupted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Argument(msg) => write!(f, "{msg}"),
            Self::Link(msg) => write!(f, "link-layer device error: {msg}"),
            Self::ArpUnreachable => write!(f, "ARP request timed out: host unreachable"),
            Self::Peer { code, message } => write!(f, "server reported error {code}: {message}"),
            Self::IcmpUnreachable(reason) => write!(f, "destination unreachable: {reason}"),
            Self::LocalRead(e) => write!(f, "error reading from file: {e}"),
            Self::LocalWrite(e) => write!(f, "error writing to file: {e}"),
            Self::UnexpectedOpcode => write!(f, "unexpected TFTP opcode"),
            Self::BufferOverflow => write!(f, "packet too large for the link MTU"),
            Self::Wire(e) => write!(f, "malformed packet: {e}"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for Error {}

impl From<wire::Error> for Error {
    fn from(e: wire::Error) -> Self {
        Self::Wire(e)
    }
}

/// Process exit codes, `spec.md` §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Warning = 1,
    NetworkError = 2,
    Failure = 3,
}

impl Error {
    /// Map this error onto the process exit code a CLI front-end should use.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Argument(_) | Self::Link(_) => ExitCode::Failure,
            Self::ArpUnreachable
            | Self::Peer { .. }
            | Self::IcmpUnreachable(_)
            | Self::LocalRead(_)
            | Self::LocalWrite(_)
            | Self::UnexpectedOpcode
            | Self::BufferOverflow
            | Self::Wire(_) => ExitCode::NetworkError,
            Self::Interrupted => ExitCode::Failure,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
