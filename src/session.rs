//! The ARP-then-TFTP session state machine.
//!
//! Grounded on `spec.md` §4.4. `Session` holds no global/static state — the
//! original program's module-level IPv4/hardware-address variables become
//! plain fields here, passed around the way
//! `tapip_rs::iface::Interface::poll` takes `&mut Device` and
//! `&mut SocketSet` explicitly instead of reaching for statics (`spec.md`
//! §9, "Global session state"). The main loop ([`Session::run`]) mirrors
//! that same `poll(timestamp, ..)` shape: every step is driven by an
//! explicit [`Instant`] the caller supplies, rather than by a timer that
//! reads the clock itself, so the state machine is exercised from tests
//! with synthetic timestamps instead of real sleeps.

use log::{debug, info, trace, warn};

use crate::config::{Direction, Transfer};
use crate::error::{Error, Result, TftpErrorCode};
use crate::file::{DestinationFile, SourceFile};
use crate::pool::{Completion, LinkDevice, Pool};
use crate::time::Instant;
use crate::timer::Timer;
use crate::wire::{
    self, ArpOperation, ArpPacket, ArpRepr, EtherType, EthernetAddress, Icmpv4Packet, Icmpv4Repr,
    IpProtocol, Ipv4Address, Ipv4Packet, Ipv4Repr, TftpPacket, TftpRepr, UdpPacket,
    UdpRepr,
};

/// The first client UDP source port in the ephemeral range the spec names.
const EPHEMERAL_PORT_BASE: u16 = 49152;
const EPHEMERAL_PORT_RANGE: u16 = 16384;
/// The server's well-known TFTP port, absent a `--port` override.
pub const WELL_KNOWN_TFTP_PORT: u16 = 69;

/// ARP query budget: one initial broadcast plus this many retransmissions.
const ARP_ATTEMPTS: u8 = 4;
const ARP_RETRY_SECS: u64 = 1;
/// TFTP DATA/ACK/RRQ/WRQ retransmission interval. The spec gates unbounded
/// retransmission only by the dally count on the receiver side.
const RETRANSMIT_SECS: u64 = 1;
/// How many times the receiver re-ACKs the final block before giving up
/// waiting for the peer to notice it is done.
const DALLY_COUNT: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingArp,
    AwaitingServerPort,
    Receiving { expected_block: u16 },
    Sending { current_block: u16 },
    Completed,
}

enum TransferFile {
    Download(DestinationFile),
    Upload(SourceFile),
}

/// Byte counters reported once a transfer finishes successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes_transferred: u64,
}

/// Drives one ARP resolution followed by one TFTP RRQ or WRQ exchange to
/// completion. One `Session` per invocation; the spec rules out
/// concurrent transfers.
pub struct Session<D: LinkDevice> {
    pool: Pool<D>,
    timer: Timer,
    state: State,

    local_ip: Ipv4Address,
    local_mac: EthernetAddress,
    remote_ip: Ipv4Address,
    remote_mac: Option<EthernetAddress>,

    client_port: u16,
    server_port: u16,
    server_port_known: bool,

    direction: Direction,
    remote_filename: String,
    file: TransferFile,

    last_block_transmitted: bool,
    dally_remaining: u8,
    arp_attempts_remaining: u8,
    bytes_transferred: u64,
    ident: u16,

    /// The most recently emitted DATA block, cached so a retransmission on
    /// timeout replays the exact bytes instead of re-reading the file (a
    /// second sequential read would return the *next* block, not this one).
    last_data: (u16, Vec<u8>),
}

impl<D: LinkDevice> Session<D> {
    /// Build a session for `transfer` from a ready [`Pool`]. `local_ip` is
    /// the address the CLI validated; `remote_port` overrides the
    /// well-known TFTP port 69.
    pub fn new(
        pool: Pool<D>,
        local_ip: Ipv4Address,
        transfer: Transfer,
        remote_port: u16,
    ) -> Result<Session<D>> {
        let file = match &transfer.direction {
            Direction::Download => TransferFile::Download(DestinationFile::create(&transfer.local_path)?),
            Direction::Upload => TransferFile::Upload(SourceFile::open(&transfer.local_path)?),
        };
        let local_mac = pool.local_hardware_addr();
        Ok(Session {
            pool,
            timer: Timer::new(),
            state: State::AwaitingArp,
            local_ip,
            local_mac,
            remote_ip: transfer.remote_addr,
            remote_mac: None,
            client_port: ephemeral_port(),
            server_port: remote_port,
            server_port_known: false,
            direction: transfer.direction,
            remote_filename: transfer.remote_filename,
            file,
            last_block_transmitted: false,
            dally_remaining: DALLY_COUNT,
            arp_attempts_remaining: ARP_ATTEMPTS,
            bytes_transferred: 0,
            ident: 1,
            last_data: (0, Vec::new()),
        })
    }

    /// Run the session to completion: broadcast the initial ARP query, then
    /// drive reads/timeouts until the transfer succeeds or a terminal
    /// error occurs. On failure the destination file (if this was a
    /// download) is deleted unless at least one block was already written.
    pub fn run(mut self) -> Result<TransferStats> {
        let now = Instant::now();
        info!(
            "resolving {} for {} of \"{}\"",
            self.remote_ip,
            match self.direction {
                Direction::Download => "download",
                Direction::Upload => "upload",
            },
            self.remote_filename
        );
        self.send_arp_request()?;
        self.timer.start(now, ARP_RETRY_SECS);

        let result = self.drive();
        let outcome = match result {
            Ok(stats) => match self.file {
                TransferFile::Download(file) => file.finish().map(|()| stats),
                TransferFile::Upload(_) => Ok(stats),
            },
            Err(err) => {
                if let TransferFile::Download(file) = self.file {
                    file.abandon();
                }
                Err(err)
            }
        };
        // spec.md §4.1/§9: quiesce every slot (abort, then implicitly wait,
        // since nothing is genuinely in flight between synchronous calls)
        // before the pool's buffers go away with it.
        self.pool.close();
        outcome
    }

    fn drive(&mut self) -> Result<TransferStats> {
        loop {
            let now = Instant::now();
            let timeout = self.timer.remaining(now).map(|d| d.as_std());
            if let Some(completion) = self.pool.poll(timeout)? {
                if self.on_completion(Instant::now(), completion)? {
                    return Ok(TransferStats {
                        bytes_transferred: self.bytes_transferred,
                    });
                }
            }

            let now = Instant::now();
            if self.timer.has_expired(now) {
                self.timer.stop();
                if self.on_timeout(now)? {
                    return Ok(TransferStats {
                        bytes_transferred: self.bytes_transferred,
                    });
                }
            }
        }
    }

    /// Dispatch one completed read. Returns `Ok(true)` once the transfer is
    /// done.
    fn on_completion(&mut self, now: Instant, completion: Completion) -> Result<bool> {
        match completion.ethertype {
            EtherType::Arp => self.on_arp(now, &completion.payload),
            EtherType::Ipv4 => self.on_ipv4(now, &completion.payload),
            EtherType::Unknown(_) => Ok(false),
        }
    }

    fn on_arp(&mut self, now: Instant, payload: &[u8]) -> Result<bool> {
        let packet = match ArpPacket::new_checked(payload) {
            Ok(p) => p,
            Err(_) => return Ok(false),
        };
        // A malformed ARP reply (wrong hardware/protocol format or length)
        // is dropped silently; the retry budget is *not* reset by it, since
        // a malformed reply is not evidence the network is actually
        // delivering our queries (see DESIGN.md).
        let repr = match ArpRepr::parse(&packet) {
            Ok(r) => r,
            Err(_) => return Ok(false),
        };

        if self.state != State::AwaitingArp {
            return Ok(false);
        }

        match repr.operation {
            ArpOperation::Reply if repr.source_protocol_addr == self.remote_ip => {
                self.remote_mac = Some(repr.source_hardware_addr);
                info!("{} resolved to {}", self.remote_ip, repr.source_hardware_addr);
                self.send_request_packet()?;
                self.state = State::AwaitingServerPort;
                self.timer.start(now, RETRANSMIT_SECS);
            }
            ArpOperation::Request
                if repr.target_protocol_addr == self.local_ip
                    && repr.source_protocol_addr != self.local_ip =>
            {
                trace!("answering ARP query from {}", repr.source_protocol_addr);
                self.send_arp_reply(repr.source_hardware_addr, repr.source_protocol_addr)?;
            }
            _ => {}
        }
        Ok(false)
    }

    fn on_ipv4(&mut self, now: Instant, payload: &[u8]) -> Result<bool> {
        let ip_packet = match Ipv4Packet::new_checked(payload) {
            Ok(p) => p,
            Err(_) => return Ok(false),
        };
        let ip_repr = match Ipv4Repr::parse(&ip_packet) {
            Ok(r) => r,
            Err(_) => return Ok(false),
        };
        match ip_repr.protocol {
            IpProtocol::Udp => self.on_udp(now, &ip_repr, ip_packet.payload()),
            IpProtocol::Icmp => self.on_icmp(ip_packet.payload()),
            _ => Ok(false),
        }
    }

    fn on_udp(&mut self, now: Instant, ip: &Ipv4Repr, payload: &[u8]) -> Result<bool> {
        let udp_packet = match UdpPacket::new_checked(payload) {
            Ok(p) => p,
            Err(_) => return Ok(false),
        };
        let udp_repr = match UdpRepr::parse(&udp_packet, &ip.src_addr, &ip.dst_addr) {
            Ok(r) => r,
            Err(_) => return Ok(false),
        };
        if udp_repr.dst_port != self.client_port {
            return Ok(false);
        }
        // Server-TID binding: once we know the server's chosen transfer ID,
        // anything from a different source port is not our peer.
        if self.server_port_known && udp_repr.src_port != self.server_port {
            return Ok(false);
        }

        let tftp_packet = match TftpPacket::new_checked(udp_packet.payload()) {
            Ok(p) => p,
            Err(_) => return Ok(false),
        };
        let tftp_repr = match TftpRepr::parse(&tftp_packet) {
            Ok(r) => r,
            Err(_) => return Ok(false),
        };

        match self.state {
            State::AwaitingServerPort => self.handle_awaiting_server_port(now, udp_repr.src_port, tftp_repr),
            State::Receiving { expected_block } => {
                self.handle_receiving(now, expected_block, tftp_repr)
            }
            State::Sending { current_block } => self.handle_sending(now, current_block, tftp_repr),
            State::AwaitingArp | State::Completed => Ok(false),
        }
    }

    fn on_icmp(&mut self, payload: &[u8]) -> Result<bool> {
        if self.state == State::AwaitingArp || self.state == State::Completed {
            return Ok(false);
        }
        let packet = match Icmpv4Packet::new_checked(payload) {
            Ok(p) => p,
            Err(_) => return Ok(false),
        };
        let repr = match Icmpv4Repr::parse(&packet) {
            Ok(r) => r,
            Err(_) => return Ok(false),
        };
        // The ICMP message itself may come from an intermediate router, not
        // the TFTP server, so its own IPv4 source address is not checked —
        // only that the embedded offending datagram was addressed to our
        // remote host.
        if repr.offending_dst_addr != self.remote_ip {
            return Ok(false);
        }
        if self.last_block_transmitted {
            // Some servers tear down their socket immediately after the
            // final ACK and produce a spurious "port unreachable"; that is
            // not a transfer failure.
            debug!("ignoring {} after the last block was sent", repr.reason);
            return Ok(false);
        }
        Err(Error::IcmpUnreachable(crate::error::IcmpUnreachable::from_code(
            repr.reason.into(),
        )))
    }

    fn handle_awaiting_server_port(
        &mut self,
        now: Instant,
        src_port: u16,
        tftp: TftpRepr,
    ) -> Result<bool> {
        if let TftpRepr::Error { code, message } = tftp {
            return Err(peer_error(code, message));
        }
        match self.direction {
            Direction::Download => {
                if let TftpRepr::Data { block: 1, data } = tftp {
                    self.bind_server_port(src_port);
                    self.write_block(data)?;
                    if data.len() < wire::tftp::MAX_DATA_LEN {
                        self.last_block_transmitted = true;
                        // spec.md §4.4: a short first block is both the
                        // first and the last DATA, so the dally counter
                        // starts pre-decremented rather than full.
                        self.dally_remaining = DALLY_COUNT - 1;
                    }
                    self.send_ack(1)?;
                    self.state = State::Receiving { expected_block: 2 };
                    self.timer.start(now, RETRANSMIT_SECS);
                }
            }
            Direction::Upload => {
                if let TftpRepr::Ack { block: 0 } = tftp {
                    self.bind_server_port(src_port);
                    self.send_next_data_block(now, 1)?;
                    self.state = State::Sending { current_block: 1 };
                }
            }
        }
        Ok(false)
    }

    fn handle_receiving(&mut self, now: Instant, expected_block: u16, tftp: TftpRepr) -> Result<bool> {
        match tftp {
            TftpRepr::Error { code, message } => Err(peer_error(code, message)),
            TftpRepr::Data { block, data } if block == expected_block => {
                self.write_block(data)?;
                if data.len() < wire::tftp::MAX_DATA_LEN {
                    self.last_block_transmitted = true;
                    self.dally_remaining = DALLY_COUNT;
                }
                self.send_ack(expected_block)?;
                self.state = State::Receiving {
                    expected_block: expected_block.wrapping_add(1),
                };
                self.timer.start(now, RETRANSMIT_SECS);
                Ok(false)
            }
            TftpRepr::Data { block, .. } => {
                debug!("ignoring DATA block {block}, expected {expected_block}");
                Ok(false)
            }
            _ => {
                self.send_error(TftpErrorCode::BadOp, "unexpected opcode")?;
                Err(Error::UnexpectedOpcode)
            }
        }
    }

    fn handle_sending(&mut self, now: Instant, current_block: u16, tftp: TftpRepr) -> Result<bool> {
        match tftp {
            TftpRepr::Error { code, message } => Err(peer_error(code, message)),
            TftpRepr::Ack { block } if block == current_block => {
                if self.last_block_transmitted {
                    self.state = State::Completed;
                    return Ok(true);
                }
                let next_block = current_block.wrapping_add(1);
                self.send_next_data_block(now, next_block)?;
                self.state = State::Sending {
                    current_block: next_block,
                };
                Ok(false)
            }
            TftpRepr::Ack { .. } => Ok(false),
            _ => {
                self.send_error(TftpErrorCode::BadOp, "unexpected opcode")?;
                Err(Error::UnexpectedOpcode)
            }
        }
    }

    fn on_timeout(&mut self, now: Instant) -> Result<bool> {
        match self.state {
            State::AwaitingArp => {
                self.arp_attempts_remaining -= 1;
                if self.arp_attempts_remaining == 0 {
                    return Err(Error::ArpUnreachable);
                }
                warn!("ARP query for {} timed out, retrying", self.remote_ip);
                self.send_arp_request()?;
                self.timer.start(now, ARP_RETRY_SECS);
                Ok(false)
            }
            State::AwaitingServerPort => {
                self.send_request_packet()?;
                self.timer.start(now, RETRANSMIT_SECS);
                Ok(false)
            }
            State::Receiving { expected_block } => {
                if self.last_block_transmitted {
                    self.dally_remaining -= 1;
                    if self.dally_remaining == 0 {
                        self.state = State::Completed;
                        return Ok(true);
                    }
                }
                self.send_ack(expected_block.wrapping_sub(1))?;
                self.timer.start(now, RETRANSMIT_SECS);
                Ok(false)
            }
            State::Sending { current_block } => {
                self.resend_current_data(current_block)?;
                self.timer.start(now, RETRANSMIT_SECS);
                Ok(false)
            }
            State::Completed => Ok(true),
        }
    }

    fn bind_server_port(&mut self, port: u16) {
        if !self.server_port_known {
            self.server_port = port;
            self.server_port_known = true;
            debug!("bound server TID to port {port}");
        }
    }

    fn write_block(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.file {
            TransferFile::Download(file) => match file.write_block(data) {
                Ok(()) => {
                    self.bytes_transferred += data.len() as u64;
                    Ok(())
                }
                Err(err) => {
                    // spec.md §4.4/§7: a local write failure must still
                    // notify the peer before the session fails.
                    let _ = self.send_error(TftpErrorCode::Undefined, "Error writing to file");
                    Err(err)
                }
            },
            TransferFile::Upload(_) => unreachable!("only a download session writes blocks"),
        }
    }

    fn send_next_data_block(&mut self, now: Instant, block: u16) -> Result<()> {
        let mut buf = [0u8; wire::tftp::MAX_DATA_LEN];
        let n = match &mut self.file {
            TransferFile::Upload(file) => match file.read_block(&mut buf) {
                Ok(n) => n,
                Err(err) => {
                    // spec.md §4.4/§7: a local read failure must still
                    // notify the peer before the session fails.
                    let _ = self.send_error(TftpErrorCode::Undefined, "Error reading from file");
                    return Err(err);
                }
            },
            TransferFile::Download(_) => unreachable!("only an upload session reads blocks"),
        };
        if n < wire::tftp::MAX_DATA_LEN || block.wrapping_add(1) == 0 {
            self.last_block_transmitted = true;
        }
        self.bytes_transferred += n as u64;
        self.send_data(block, &buf[..n])?;
        self.timer.start(now, RETRANSMIT_SECS);
        Ok(())
    }

    fn resend_current_data(&mut self, current_block: u16) -> Result<()> {
        debug_assert_eq!(self.last_data.0, current_block);
        let payload = self.last_data.1.clone();
        self.send_datagram(TftpRepr::Data {
            block: current_block,
            data: &payload,
        })
    }

    fn send_arp_request(&mut self) -> Result<()> {
        let repr = ArpRepr {
            operation: ArpOperation::Request,
            source_hardware_addr: self.local_mac,
            source_protocol_addr: self.local_ip,
            target_hardware_addr: EthernetAddress::default(),
            target_protocol_addr: self.remote_ip,
        };
        let mut buf = [0u8; wire::arp::HEADER_LEN];
        let mut packet = ArpPacket::new_unchecked(&mut buf[..]);
        repr.emit(&mut packet);
        self.pool.send_frame(EtherType::Arp, EthernetAddress::BROADCAST, &buf)
    }

    fn send_arp_reply(&mut self, dst_mac: EthernetAddress, dst_ip: Ipv4Address) -> Result<()> {
        let repr = ArpRepr {
            operation: ArpOperation::Reply,
            source_hardware_addr: self.local_mac,
            source_protocol_addr: self.local_ip,
            target_hardware_addr: dst_mac,
            target_protocol_addr: dst_ip,
        };
        let mut buf = [0u8; wire::arp::HEADER_LEN];
        let mut packet = ArpPacket::new_unchecked(&mut buf[..]);
        repr.emit(&mut packet);
        self.pool.send_frame(EtherType::Arp, dst_mac, &buf)
    }

    fn send_request_packet(&mut self) -> Result<()> {
        let repr = match self.direction {
            Direction::Download => TftpRepr::Rrq {
                filename: &self.remote_filename,
                mode: wire::tftp::MODE_OCTET,
            },
            Direction::Upload => TftpRepr::Wrq {
                filename: &self.remote_filename,
                mode: wire::tftp::MODE_OCTET,
            },
        };
        self.send_datagram(repr)
    }

    fn send_ack(&mut self, block: u16) -> Result<()> {
        self.send_datagram(TftpRepr::Ack { block })
    }

    fn send_error(&mut self, code: TftpErrorCode, message: &str) -> Result<()> {
        self.send_datagram(TftpRepr::Error {
            code: code.to_wire(),
            message,
        })
    }

    fn send_data(&mut self, block: u16, data: &[u8]) -> Result<()> {
        self.last_data = (block, data.to_vec());
        self.send_datagram(TftpRepr::Data { block, data })
    }

    /// Build an IPv4/UDP/TFTP datagram and hand it to the pool. The UDP
    /// checksum must be computed over the full datagram including the
    /// payload, so the TFTP bytes are written before the UDP header, and
    /// the UDP datagram before the IPv4 header (`wire::udp::Repr::emit`
    /// reads the payload it is checksumming, it does not reserve space for
    /// one written afterwards).
    fn send_datagram(&mut self, tftp: TftpRepr) -> Result<()> {
        let remote_mac = self
            .remote_mac
            .expect("send_datagram is only called once ARP has resolved the remote host");
        let tftp_len = tftp.buffer_len();
        if tftp_len > self.pool.max_udp_payload() {
            return Err(Error::BufferOverflow);
        }
        let udp_len = wire::UDP_HEADER_LEN + tftp_len;
        let total_len = wire::ipv4::HEADER_LEN + udp_len;
        let mut buf = vec![0u8; total_len];

        {
            let mut tftp_packet =
                TftpPacket::new_unchecked(&mut buf[wire::ipv4::HEADER_LEN + wire::UDP_HEADER_LEN..]);
            tftp.emit(&mut tftp_packet)?;
        }
        {
            let mut udp_packet = UdpPacket::new_unchecked(&mut buf[wire::ipv4::HEADER_LEN..]);
            let udp_repr = UdpRepr {
                src_port: self.client_port,
                dst_port: self.server_port,
            };
            udp_repr.emit(&mut udp_packet, &self.local_ip, &self.remote_ip, tftp_len);
        }
        {
            let mut ip_packet = Ipv4Packet::new_unchecked(&mut buf[..]);
            let ip_repr = Ipv4Repr {
                src_addr: self.local_ip,
                dst_addr: self.remote_ip,
                protocol: IpProtocol::Udp,
                payload_len: udp_len,
                hop_limit: 0,
            };
            ip_repr.emit(&mut ip_packet, self.next_ident());
        }

        trace!("-> {tftp}");
        self.pool.send_frame(EtherType::Ipv4, remote_mac, &buf)
    }

    fn next_ident(&mut self) -> u16 {
        let ident = self.ident;
        self.ident = self.ident.wrapping_add(1);
        ident
    }
}

fn peer_error(code: u16, message: &str) -> Error {
    Error::Peer {
        code: TftpErrorCode::from_wire(code),
        message: message.to_string(),
    }
}

/// Choose the ephemeral client UDP port. The spec prefers a unique-ID
/// facility when available, falling back to a PRNG seeded from wall-clock
/// time; a process ID is this crate's unique-ID facility, so it is used
/// directly rather than adding a second, untestable PRNG-only path.
fn ephemeral_port() -> u16 {
    let pid = std::process::id() as u16;
    EPHEMERAL_PORT_BASE + (pid % EPHEMERAL_PORT_RANGE)
}
