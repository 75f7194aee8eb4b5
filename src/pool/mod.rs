//! The Link I/O Pool: a fixed set of receive descriptors plus one transmit
//! descriptor, sitting between a [`LinkDevice`] driver and the session.
//!
//! Grounded on `spec.md` §4.1. The pool owns every [`slot::ReadSlot`] and
//! the single [`slot::WriteSlot`] (and their buffers); the session only ever
//! borrows a transient view into a just-completed read. Unlike the
//! interrupt-driven driver the spec describes, [`LinuxRawSocket`] is a
//! blocking syscall-based driver with a single file descriptor carrying
//! both EtherTypes — so "issue a read to a slot, let the driver complete it
//! asynchronously" collapses into "read one frame off the wire, classify
//! it, and hand it to the next free slot of that EtherType", done
//! synchronously on every call to [`Pool::poll`]. The slot bookkeeping
//! (fixed counts per EtherType, in-flight tracking, abort-then-wait
//! teardown) is kept regardless, since it is what bounds memory and gives
//! the rest of the crate a driver-agnostic interface.

pub mod fault;
pub mod linux_raw;
pub mod slot;

use std::time::Duration as StdDuration;

use crate::error::{Error, Result};
use crate::wire::{EtherType, EthernetAddress, EthernetFrame};

pub use fault::FaultInjection;
pub use linux_raw::LinuxRawSocket;
pub use slot::{BufferCallbacks, IoBuffer, ReadSlot, WriteSlot};

/// At least this many ARP-typed read slots are kept in flight at all times.
pub const MIN_ARP_SLOTS: usize = 4;
/// At least this many IPv4-typed read slots are kept in flight at all times.
pub const MIN_IPV4_SLOTS: usize = 8;

/// The driver contract a [`Pool`] is generic over. `LinuxRawSocket` is the
/// one concrete implementation this crate ships; tests substitute an
/// in-memory fake.
pub trait LinkDevice {
    fn local_hardware_addr(&self) -> EthernetAddress;

    /// Frame buffer size the driver is prepared to hand back or accept,
    /// including the Ethernet header.
    fn mtu(&self) -> usize;

    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Block for up to `timeout` (or forever, if `None`) for one frame.
    fn try_recv(&mut self, buffer: &mut [u8], timeout: Option<StdDuration>) -> Result<Option<usize>>;
}

impl LinkDevice for LinuxRawSocket {
    fn local_hardware_addr(&self) -> EthernetAddress {
        LinuxRawSocket::local_hardware_addr(self)
    }

    fn mtu(&self) -> usize {
        LinuxRawSocket::mtu(self)
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        LinuxRawSocket::send(self, frame)
    }

    fn try_recv(&mut self, buffer: &mut [u8], timeout: Option<StdDuration>) -> Result<Option<usize>> {
        LinuxRawSocket::try_recv(self, buffer, timeout)
    }
}

/// A completed receive, classified and handed up from the pool.
pub struct Completion {
    pub ethertype: EtherType,
    pub src_addr: EthernetAddress,
    /// The Ethernet payload (ARP packet, or IPv4 datagram), without the
    /// Ethernet header itself.
    pub payload: Vec<u8>,
}

/// Owns a driver, its fixed ARP/IPv4 read-slot pools, and the single write
/// slot. The session talks only to this type, never to the driver or the
/// slots directly.
pub struct Pool<D: LinkDevice> {
    device: D,
    local_addr: EthernetAddress,
    arp_slots: Vec<ReadSlot>,
    ipv4_slots: Vec<ReadSlot>,
    next_arp_slot: usize,
    next_ipv4_slot: usize,
    write_slot: WriteSlot,
    scratch: Vec<u8>,
    fault: Option<FaultInjection>,
}

impl Pool<LinuxRawSocket> {
    /// Open `device` (plus `unit`) and bring up the pool. The station-
    /// address / configure-interface handshake the spec describes for a
    /// SANA-II driver has no analogue on an `AF_PACKET` socket: opening and
    /// binding the socket *is* the handshake, and there is no "already
    /// configured by another client" failure mode to special-case, since
    /// raw sockets don't claim exclusive ownership of an address the way a
    /// SANA-II unit does.
    pub fn open(device: &str, unit: u32) -> Result<Pool<LinuxRawSocket>> {
        let socket = LinuxRawSocket::open(device, unit)?;
        Ok(Pool::new(socket))
    }
}

impl<D: LinkDevice> Pool<D> {
    pub fn new(device: D) -> Pool<D> {
        let mtu = device.mtu();
        let local_addr = device.local_hardware_addr();
        Pool {
            arp_slots: (0..MIN_ARP_SLOTS).map(|_| ReadSlot::new(EtherType::Arp, mtu)).collect(),
            ipv4_slots: (0..MIN_IPV4_SLOTS).map(|_| ReadSlot::new(EtherType::Ipv4, mtu)).collect(),
            next_arp_slot: 0,
            next_ipv4_slot: 0,
            write_slot: WriteSlot::new(mtu),
            scratch: vec![0; mtu],
            fault: None,
            device,
            local_addr,
        }
    }

    #[cfg(feature = "fault-injection")]
    pub fn with_fault_injection(mut self, fault: FaultInjection) -> Pool<D> {
        self.fault = Some(fault);
        self
    }

    pub fn local_hardware_addr(&self) -> EthernetAddress {
        self.local_addr
    }

    pub fn mtu(&self) -> usize {
        self.device.mtu()
    }

    /// Access to the underlying driver, for tests that need to inspect what
    /// was sent or queue up what should be received.
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// The largest TFTP payload this pool's write slot can carry alongside
    /// an Ethernet + IPv4 + UDP header.
    pub fn max_udp_payload(&self) -> usize {
        self.mtu() - EthernetFrame::<&[u8]>::header_len() - crate::wire::ipv4::HEADER_LEN
            - crate::wire::UDP_HEADER_LEN
    }

    /// Emit `payload` (an ARP packet, or an already-built IPv4 datagram)
    /// inside an Ethernet frame addressed to `dst`.
    pub fn send_frame(&mut self, ethertype: EtherType, dst: EthernetAddress, payload: &[u8]) -> Result<()> {
        if let Some(fault) = &self.fault {
            if fault.should_drop_tx() {
                return Ok(());
            }
        }

        let header_len = EthernetFrame::<&[u8]>::header_len();
        let total_len = header_len + payload.len();
        if total_len > self.write_slot.buffer().capacity() {
            return Err(Error::BufferOverflow);
        }

        let mut frame = vec![0u8; total_len];
        {
            let mut eth = EthernetFrame::new_unchecked(&mut frame[..]);
            eth.set_dst_addr(dst);
            eth.set_src_addr(self.local_addr);
            eth.set_ethertype(ethertype);
            eth.payload_mut().copy_from_slice(payload);
        }

        if let Some(fault) = &self.fault {
            fault.maybe_trash_tx(&mut frame);
        }

        self.write_slot
            .submit(&frame)
            .map_err(|()| Error::BufferOverflow)?;
        let result = self.device.send(self.write_slot.buffer().as_slice());
        self.write_slot.complete();
        result
    }

    /// Wait up to `timeout` for one frame, classify it, and hand it back.
    /// `Ok(None)` means the wait elapsed with nothing arriving.
    pub fn poll(&mut self, timeout: Option<StdDuration>) -> Result<Option<Completion>> {
        let received = match self.device.try_recv(&mut self.scratch, timeout)? {
            Some(n) => n,
            None => return Ok(None),
        };

        let mut raw = self.scratch[..received].to_vec();
        if let Some(fault) = &self.fault {
            if fault.should_drop_rx() {
                return Ok(None);
            }
            fault.maybe_trash_rx(&mut raw);
        }

        let frame = match EthernetFrame::new_checked(&raw[..]) {
            Ok(frame) => frame,
            Err(_) => return Ok(None),
        };
        let ethertype = frame.ethertype();
        let src_addr = frame.src_addr();
        let payload = frame.payload().to_vec();

        if let EtherType::Unknown(_) = ethertype {
            return Ok(None);
        }
        self.cycle_slot(ethertype, &payload)?;

        Ok(Some(Completion {
            ethertype,
            src_addr,
            payload,
        }))
    }

    /// Record the completion against the next slot of the right EtherType
    /// (round-robin, so every slot's buffer gets reused in turn) and
    /// immediately resubmit it, matching the "classify, deliver, resubmit"
    /// lifecycle the spec describes for a `ReadSlot`.
    fn cycle_slot(&mut self, ethertype: EtherType, payload: &[u8]) -> Result<()> {
        let (slots, cursor) = match ethertype {
            EtherType::Arp => (&mut self.arp_slots, &mut self.next_arp_slot),
            EtherType::Ipv4 => (&mut self.ipv4_slots, &mut self.next_ipv4_slot),
            EtherType::Unknown(_) => return Ok(()),
        };
        let slot = &mut slots[*cursor];
        slot.submit();
        slot.copy_to_client(payload).map_err(|()| Error::BufferOverflow)?;
        slot.complete(payload.len());
        *cursor = (*cursor + 1) % slots.len();
        Ok(())
    }

    /// Abort every in-flight slot, then wait (a no-op on this synchronous
    /// driver, since nothing is genuinely in flight between calls), then
    /// let `Drop` free the buffers. Matches the spec's teardown order:
    /// quiesce every slot before any memory goes away.
    pub fn close(mut self) {
        for slot in self.arp_slots.iter_mut().chain(self.ipv4_slots.iter_mut()) {
            slot.abort();
        }
        if self.write_slot.in_flight() {
            self.write_slot.complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeDevice {
        local_addr: EthernetAddress,
        mtu: usize,
        inbox: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl LinkDevice for FakeDevice {
        fn local_hardware_addr(&self) -> EthernetAddress {
            self.local_addr
        }

        fn mtu(&self) -> usize {
            self.mtu
        }

        fn send(&mut self, frame: &[u8]) -> Result<()> {
            self.sent.push(frame.to_vec());
            Ok(())
        }

        fn try_recv(&mut self, buffer: &mut [u8], _timeout: Option<StdDuration>) -> Result<Option<usize>> {
            match self.inbox.pop_front() {
                Some(frame) => {
                    buffer[..frame.len()].copy_from_slice(&frame);
                    Ok(Some(frame.len()))
                }
                None => Ok(None),
            }
        }
    }

    fn fake_pool() -> Pool<FakeDevice> {
        Pool::new(FakeDevice {
            local_addr: EthernetAddress([0, 1, 2, 3, 4, 5]),
            mtu: 1514,
            inbox: VecDeque::new(),
            sent: Vec::new(),
        })
    }

    #[test]
    fn send_frame_wraps_ethernet_header() {
        let mut pool = fake_pool();
        let dst = EthernetAddress([6, 7, 8, 9, 10, 11]);
        pool.send_frame(EtherType::Arp, dst, &[0xaa; 28]).unwrap();

        let sent = &pool.device.sent[0];
        let frame = EthernetFrame::new_checked(&sent[..]).unwrap();
        assert_eq!(frame.dst_addr(), dst);
        assert_eq!(frame.src_addr(), pool.local_hardware_addr());
        assert_eq!(frame.ethertype(), EtherType::Arp);
        assert_eq!(frame.payload(), &[0xaa; 28][..]);
    }

    #[test]
    fn poll_classifies_and_returns_payload() {
        let mut pool = fake_pool();
        let mut frame = vec![0u8; EthernetFrame::<&[u8]>::header_len() + 4];
        {
            let mut eth = EthernetFrame::new_unchecked(&mut frame[..]);
            eth.set_dst_addr(pool.local_hardware_addr());
            eth.set_src_addr(EthernetAddress([9; 6]));
            eth.set_ethertype(EtherType::Ipv4);
            eth.payload_mut().copy_from_slice(&[1, 2, 3, 4]);
        }
        pool.device.inbox.push_back(frame);

        let completion = pool.poll(None).unwrap().unwrap();
        assert_eq!(completion.ethertype, EtherType::Ipv4);
        assert_eq!(completion.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn poll_returns_none_on_empty_inbox() {
        let mut pool = fake_pool();
        assert!(pool.poll(None).unwrap().is_none());
    }
}
