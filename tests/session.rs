//! End-to-end exercises of [`rawtftp::session::Session`] against an
//! in-memory [`rawtftp::pool::LinkDevice`], standing in for the
//! `FakeDevice` already used by `src/pool/mod.rs`'s own unit tests but
//! built fresh here since an integration test cannot reach a private
//! test-only type in another crate.
//!
//! `Session` reads the wall clock directly (`Instant::now()`, matching
//! `tapip_rs::iface::Interface::poll`'s explicit-timestamp shape one level
//! up, at `Session::drive`'s caller), so the retransmission and EOF-dally
//! scenarios below run for real seconds rather than synthetic ticks. That
//! is the accepted cost of keeping the state machine itself clock-agnostic.

use std::collections::VecDeque;
use std::time::Duration;

use byteorder::{ByteOrder, NetworkEndian};

use rawtftp::config::{Direction, Transfer};
use rawtftp::error::Error;
use rawtftp::pool::{LinkDevice, Pool};
use rawtftp::session::Session;
use rawtftp::wire::{
    self, ArpOperation, ArpPacket, ArpRepr, EtherType, EthernetAddress, EthernetFrame, IpProtocol,
    Ipv4Address, Ipv4Packet, Ipv4Repr, TftpPacket, TftpRepr, UdpPacket, UdpRepr,
};

const LOCAL_MAC: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 1]);
const LOCAL_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);
const SERVER_MAC: EthernetAddress = EthernetAddress([0x02, 0, 0, 0, 0, 2]);
const SERVER_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
const SERVER_TID: u16 = 50000;

/// `Session::new`'s ephemeral-port pick is `EPHEMERAL_PORT_BASE +
/// pid % EPHEMERAL_PORT_RANGE`; both constants are restated here rather
/// than exposed from the crate, since the same process (and so the same
/// pid) computes the identical port for both the session under test and
/// the frames this file scripts for it.
const EPHEMERAL_PORT_BASE: u16 = 49152;
const EPHEMERAL_PORT_RANGE: u16 = 16384;

fn client_port() -> u16 {
    let pid = std::process::id() as u16;
    EPHEMERAL_PORT_BASE + (pid % EPHEMERAL_PORT_RANGE)
}

struct FakeDevice {
    mtu: usize,
    inbox: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
}

impl FakeDevice {
    fn new() -> FakeDevice {
        FakeDevice {
            mtu: 1514,
            inbox: VecDeque::new(),
            sent: Vec::new(),
        }
    }

    fn queue(&mut self, frame: Vec<u8>) {
        self.inbox.push_back(frame);
    }
}

impl LinkDevice for FakeDevice {
    fn local_hardware_addr(&self) -> EthernetAddress {
        LOCAL_MAC
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send(&mut self, frame: &[u8]) -> rawtftp::Result<()> {
        self.sent.push(frame.to_vec());
        Ok(())
    }

    fn try_recv(&mut self, buffer: &mut [u8], _timeout: Option<Duration>) -> rawtftp::Result<Option<usize>> {
        match self.inbox.pop_front() {
            Some(frame) => {
                buffer[..frame.len()].copy_from_slice(&frame);
                Ok(Some(frame.len()))
            }
            None => Ok(None),
        }
    }
}

fn arp_reply_frame() -> Vec<u8> {
    let repr = ArpRepr {
        operation: ArpOperation::Reply,
        source_hardware_addr: SERVER_MAC,
        source_protocol_addr: SERVER_IP,
        target_hardware_addr: LOCAL_MAC,
        target_protocol_addr: LOCAL_IP,
    };
    let mut arp_buf = [0u8; wire::arp::HEADER_LEN];
    {
        let mut packet = ArpPacket::new_unchecked(&mut arp_buf[..]);
        repr.emit(&mut packet);
    }
    let mut frame = vec![0u8; EthernetFrame::<&[u8]>::header_len() + arp_buf.len()];
    {
        let mut eth = EthernetFrame::new_unchecked(&mut frame[..]);
        eth.set_dst_addr(LOCAL_MAC);
        eth.set_src_addr(SERVER_MAC);
        eth.set_ethertype(EtherType::Arp);
        eth.payload_mut().copy_from_slice(&arp_buf);
    }
    frame
}

/// Build a full Ethernet/IPv4/UDP frame carrying `tftp`, from the server's
/// transfer ID to the client's.
fn server_datagram(src_port: u16, tftp: TftpRepr) -> Vec<u8> {
    let tftp_len = tftp.buffer_len();
    let udp_len = wire::UDP_HEADER_LEN + tftp_len;
    let total_len = wire::ipv4::HEADER_LEN + udp_len;
    let mut ip_buf = vec![0u8; total_len];

    {
        let mut tftp_packet = TftpPacket::new_unchecked(&mut ip_buf[wire::ipv4::HEADER_LEN + wire::UDP_HEADER_LEN..]);
        tftp.emit(&mut tftp_packet).unwrap();
    }
    {
        let mut udp_packet = UdpPacket::new_unchecked(&mut ip_buf[wire::ipv4::HEADER_LEN..]);
        let udp_repr = UdpRepr {
            src_port,
            dst_port: client_port(),
        };
        udp_repr.emit(&mut udp_packet, &SERVER_IP, &LOCAL_IP, tftp_len);
    }
    {
        let mut ip_packet = Ipv4Packet::new_unchecked(&mut ip_buf[..]);
        let ip_repr = Ipv4Repr {
            src_addr: SERVER_IP,
            dst_addr: LOCAL_IP,
            protocol: IpProtocol::Udp,
            payload_len: udp_len,
            hop_limit: 64,
        };
        ip_repr.emit(&mut ip_packet, 1);
    }

    let mut frame = vec![0u8; EthernetFrame::<&[u8]>::header_len() + ip_buf.len()];
    {
        let mut eth = EthernetFrame::new_unchecked(&mut frame[..]);
        eth.set_dst_addr(LOCAL_MAC);
        eth.set_src_addr(SERVER_MAC);
        eth.set_ethertype(EtherType::Ipv4);
        eth.payload_mut().copy_from_slice(&ip_buf);
    }
    frame
}

/// Build an ICMP destination-unreachable frame whose *IP* source address is
/// `icmp_src` (the host or router reporting the failure) but whose embedded
/// offending datagram was addressed to `SERVER_IP` — the only thing
/// `Session::on_icmp` actually checks. `icmp_src` need not equal the TFTP
/// server: real "destination unreachable" messages are typically sent by an
/// intermediate router, not by the peer itself.
fn icmp_unreachable_frame(icmp_src: Ipv4Address, code: u8) -> Vec<u8> {
    let offending = Ipv4Repr {
        src_addr: LOCAL_IP,
        dst_addr: SERVER_IP,
        protocol: IpProtocol::Udp,
        payload_len: 8,
        hop_limit: 64,
    };
    let mut offending_buf = [0u8; wire::ipv4::HEADER_LEN + 8];
    {
        let mut packet = Ipv4Packet::new_unchecked(&mut offending_buf[..]);
        offending.emit(&mut packet, 1);
    }

    const ICMP_HEADER_LEN: usize = 8;
    let mut icmp_buf = vec![0u8; ICMP_HEADER_LEN + offending_buf.len()];
    icmp_buf[0] = 3; // destination unreachable
    icmp_buf[1] = code;
    icmp_buf[ICMP_HEADER_LEN..].copy_from_slice(&offending_buf);
    let sum = rawtftp::wire::checksum::data(&icmp_buf);
    NetworkEndian::write_u16(&mut icmp_buf[2..4], !sum);

    let total_len = wire::ipv4::HEADER_LEN + icmp_buf.len();
    let mut ip_buf = vec![0u8; total_len];
    ip_buf[wire::ipv4::HEADER_LEN..].copy_from_slice(&icmp_buf);
    {
        let mut ip_packet = Ipv4Packet::new_unchecked(&mut ip_buf[..]);
        let ip_repr = Ipv4Repr {
            src_addr: icmp_src,
            dst_addr: LOCAL_IP,
            protocol: IpProtocol::Icmp,
            payload_len: icmp_buf.len(),
            hop_limit: 64,
        };
        ip_repr.emit(&mut ip_packet, 2);
    }

    let mut frame = vec![0u8; EthernetFrame::<&[u8]>::header_len() + ip_buf.len()];
    {
        let mut eth = EthernetFrame::new_unchecked(&mut frame[..]);
        eth.set_dst_addr(LOCAL_MAC);
        eth.set_src_addr(SERVER_MAC);
        eth.set_ethertype(EtherType::Ipv4);
        eth.payload_mut().copy_from_slice(&ip_buf);
    }
    frame
}

fn icmp_port_unreachable_frame() -> Vec<u8> {
    icmp_unreachable_frame(SERVER_IP, 3)
}

fn transfer(direction: Direction, local_path: &std::path::Path) -> Transfer {
    Transfer {
        direction,
        remote_addr: SERVER_IP,
        remote_filename: "remote.bin".to_string(),
        local_path: local_path.to_path_buf(),
    }
}

fn scratch_path(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("rawtftp-session-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

#[test]
fn download_completes_and_writes_file() {
    let local_path = scratch_path("download-ok.bin");
    let _ = std::fs::remove_file(&local_path);

    let mut device = FakeDevice::new();
    device.queue(arp_reply_frame());
    // A duplicate of block 1 before the real block 2 must be ignored
    // without disturbing the expected-block sequence.
    let payload1 = vec![0xaa; wire::tftp::MAX_DATA_LEN];
    device.queue(server_datagram(SERVER_TID, TftpRepr::Data { block: 1, data: &payload1 }));
    device.queue(server_datagram(SERVER_TID, TftpRepr::Data { block: 1, data: &payload1 }));
    let payload2 = vec![0xbb; 10];
    device.queue(server_datagram(SERVER_TID, TftpRepr::Data { block: 2, data: &payload2 }));

    let pool = Pool::new(device);
    let session = Session::new(pool, LOCAL_IP, transfer(Direction::Download, &local_path), 69).unwrap();
    let stats = session.run().unwrap();

    assert_eq!(stats.bytes_transferred, (wire::tftp::MAX_DATA_LEN + 10) as u64);
    let contents = std::fs::read(&local_path).unwrap();
    assert_eq!(contents.len(), wire::tftp::MAX_DATA_LEN + 10);
    assert_eq!(&contents[..wire::tftp::MAX_DATA_LEN], &payload1[..]);
    assert_eq!(&contents[wire::tftp::MAX_DATA_LEN..], &payload2[..]);

    std::fs::remove_file(&local_path).unwrap();
}

#[test]
fn upload_completes_without_writing_local_file() {
    let local_path = scratch_path("upload-source.bin");
    std::fs::write(&local_path, vec![0xccu8; 20]).unwrap();

    let mut device = FakeDevice::new();
    device.queue(arp_reply_frame());
    device.queue(server_datagram(SERVER_TID, TftpRepr::Ack { block: 0 }));
    device.queue(server_datagram(SERVER_TID, TftpRepr::Ack { block: 1 }));

    let pool = Pool::new(device);
    let session = Session::new(pool, LOCAL_IP, transfer(Direction::Upload, &local_path), 69).unwrap();
    let stats = session.run().unwrap();

    assert_eq!(stats.bytes_transferred, 20);
    std::fs::remove_file(&local_path).unwrap();
}

#[test]
fn server_error_response_aborts_download_and_deletes_output() {
    let local_path = scratch_path("download-error.bin");
    let _ = std::fs::remove_file(&local_path);

    let mut device = FakeDevice::new();
    device.queue(arp_reply_frame());
    device.queue(server_datagram(
        SERVER_TID,
        TftpRepr::Error {
            code: 1,
            message: "File not found",
        },
    ));

    let pool = Pool::new(device);
    let session = Session::new(pool, LOCAL_IP, transfer(Direction::Download, &local_path), 69).unwrap();
    let err = session.run().unwrap_err();
    assert!(matches!(err, Error::Peer { .. }));
    assert!(!local_path.exists());
}

#[test]
fn icmp_port_unreachable_after_last_block_is_ignored() {
    let local_path = scratch_path("download-icmp-benign.bin");
    let _ = std::fs::remove_file(&local_path);

    let mut device = FakeDevice::new();
    device.queue(arp_reply_frame());
    let payload = vec![0xdd; 5];
    device.queue(server_datagram(SERVER_TID, TftpRepr::Data { block: 1, data: &payload }));
    device.queue(icmp_port_unreachable_frame());

    let pool = Pool::new(device);
    let session = Session::new(pool, LOCAL_IP, transfer(Direction::Download, &local_path), 69).unwrap();
    // Only one short block arrives, so the transfer is already "done" as
    // far as data goes; the client spends the dally budget re-ACKing
    // before giving up on hearing from the server again. The ICMP
    // datagram must not turn into an error despite arriving mid-dally.
    let stats = session.run().unwrap();
    assert_eq!(stats.bytes_transferred, 5);

    std::fs::remove_file(&local_path).unwrap();
}

#[test]
fn icmp_unreachable_from_third_party_router_fails_session_pre_last_block() {
    let local_path = scratch_path("download-icmp-router.bin");
    let _ = std::fs::remove_file(&local_path);

    // "Destination unreachable" is typically raised by an intermediate
    // router, not the TFTP server itself, and must still fail the session
    // as long as it arrives before the last block was sent. Its IPv4
    // source address is therefore not SERVER_IP.
    const ROUTER_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 254);

    let mut device = FakeDevice::new();
    device.queue(arp_reply_frame());
    device.queue(icmp_unreachable_frame(ROUTER_IP, 0)); // net unreachable

    let pool = Pool::new(device);
    let session = Session::new(pool, LOCAL_IP, transfer(Direction::Download, &local_path), 69).unwrap();
    let err = session.run().unwrap_err();
    assert!(matches!(err, Error::IcmpUnreachable(_)));
    assert!(!local_path.exists());
}

#[test]
fn arp_unreachable_after_retry_budget_is_exhausted() {
    let local_path = scratch_path("download-arp-timeout.bin");
    let _ = std::fs::remove_file(&local_path);

    let device = FakeDevice::new();
    let pool = Pool::new(device);
    let session = Session::new(pool, LOCAL_IP, transfer(Direction::Download, &local_path), 69).unwrap();
    let err = session.run().unwrap_err();
    assert!(matches!(err, Error::ArpUnreachable));
    assert!(!local_path.exists());
}

