//! `IoBuffer`, `ReadSlot`, `WriteSlot`, and the buffer-management contract
//! a driver uses to move bytes in and out of them.
//!
//! Grounded on `spec.md` §3/§4.1's slot model, shaped the way
//! `tapip-rs::phy::sys::tuntap_interface` shapes its own fixed-size
//! recv/send buffers, but kept explicit about capacity and in-flight state
//! since the spec requires a *fixed pool* rather than one buffer per call.

use crate::wire::EtherType;

/// A heap-allocated, MTU-sized buffer. `Vec<u8>`'s allocator already
/// returns word-aligned storage, which is always a multiple of 4 bytes —
/// enough for the 32-bit-aligned DMA fast path the spec asks for.
#[derive(Debug, Clone)]
pub struct IoBuffer {
    data: Vec<u8>,
    len: usize,
}

impl IoBuffer {
    pub fn with_capacity(capacity: usize) -> IoBuffer {
        IoBuffer {
            data: vec![0; capacity],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// The full backing store, for a driver to read or write into directly.
    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.data.len());
        self.len = len;
    }

    pub fn is_dma_aligned(&self) -> bool {
        (self.data.as_ptr() as usize) % 4 == 0
    }

    /// Whether the buffer's current data, rounded up to a 4-byte DMA
    /// granularity, still fits within capacity.
    pub fn dma_len_fits(&self) -> bool {
        self.len.div_ceil(4) * 4 <= self.capacity()
    }
}

/// The four operations a driver may call, at interrupt time, to move bytes
/// through a slot. Each is reentrant with respect to everything else in the
/// pool: it touches only the one slot's own fields.
pub trait BufferCallbacks {
    /// Copy `n` bytes from driver memory into the slot's buffer. Fails if
    /// `n` exceeds the slot's capacity.
    fn copy_to_client(&mut self, src: &[u8]) -> Result<(), ()>;

    /// Copy `n` bytes from the slot's buffer into driver memory. Fails if
    /// `n` exceeds the amount of valid data currently in the buffer.
    fn copy_from_client(&self, dst: &mut [u8], n: usize) -> Result<(), ()>;

    /// The slot's buffer address, if it is 4-byte aligned and its data
    /// (rounded up to a DMA-friendly size) fits within capacity; otherwise
    /// `None`, forcing the driver to fall back to a byte copy.
    fn dma_to_client(&mut self) -> Option<*mut u8>;
    fn dma_from_client(&self) -> Option<*const u8>;
}

/// A prepared receive descriptor: one `EtherType` filter, one buffer, and
/// whether it currently has an outstanding read submitted to the driver.
#[derive(Debug)]
pub struct ReadSlot {
    ethertype: EtherType,
    buffer: IoBuffer,
    in_flight: bool,
}

impl ReadSlot {
    pub fn new(ethertype: EtherType, capacity: usize) -> ReadSlot {
        ReadSlot {
            ethertype,
            buffer: IoBuffer::with_capacity(capacity),
            in_flight: false,
        }
    }

    pub fn ethertype(&self) -> EtherType {
        self.ethertype
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn submit(&mut self) {
        self.in_flight = true;
    }

    pub fn abort(&mut self) {
        self.in_flight = false;
        self.buffer.set_len(0);
    }

    /// Mark the slot's buffer as holding `len` bytes of a newly-completed
    /// receive, and clear the in-flight flag so it can be classified.
    pub fn complete(&mut self, len: usize) {
        self.buffer.set_len(len);
        self.in_flight = false;
    }

    pub fn buffer(&self) -> &IoBuffer {
        &self.buffer
    }
}

impl BufferCallbacks for ReadSlot {
    fn copy_to_client(&mut self, src: &[u8]) -> Result<(), ()> {
        if src.len() > self.buffer.capacity() {
            return Err(());
        }
        self.buffer.raw_mut()[..src.len()].copy_from_slice(src);
        self.buffer.set_len(src.len());
        Ok(())
    }

    fn copy_from_client(&self, dst: &mut [u8], n: usize) -> Result<(), ()> {
        if n > self.buffer.len() {
            return Err(());
        }
        dst[..n].copy_from_slice(&self.buffer.as_slice()[..n]);
        Ok(())
    }

    fn dma_to_client(&mut self) -> Option<*mut u8> {
        if self.buffer.is_dma_aligned() && self.buffer.dma_len_fits() {
            Some(self.buffer.raw_mut().as_mut_ptr())
        } else {
            None
        }
    }

    fn dma_from_client(&self) -> Option<*const u8> {
        if self.buffer.is_dma_aligned() {
            Some(self.buffer.as_slice().as_ptr())
        } else {
            None
        }
    }
}

/// A single descriptor, reused serially for every outgoing frame. Never in
/// flight concurrently with itself: a second `send_frame` before the first
/// completes is a programming error in the pool, not a protocol state.
#[derive(Debug)]
pub struct WriteSlot {
    buffer: IoBuffer,
    in_flight: bool,
}

impl WriteSlot {
    pub fn new(capacity: usize) -> WriteSlot {
        WriteSlot {
            buffer: IoBuffer::with_capacity(capacity),
            in_flight: false,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn submit(&mut self, frame: &[u8]) -> Result<(), ()> {
        self.copy_to_client(frame)?;
        self.in_flight = true;
        Ok(())
    }

    pub fn complete(&mut self) {
        self.in_flight = false;
    }

    pub fn buffer(&self) -> &IoBuffer {
        &self.buffer
    }
}

impl BufferCallbacks for WriteSlot {
    fn copy_to_client(&mut self, src: &[u8]) -> Result<(), ()> {
        if src.len() > self.buffer.capacity() {
            return Err(());
        }
        self.buffer.raw_mut()[..src.len()].copy_from_slice(src);
        self.buffer.set_len(src.len());
        Ok(())
    }

    fn copy_from_client(&self, dst: &mut [u8], n: usize) -> Result<(), ()> {
        if n > self.buffer.len() {
            return Err(());
        }
        dst[..n].copy_from_slice(&self.buffer.as_slice()[..n]);
        Ok(())
    }

    fn dma_to_client(&mut self) -> Option<*mut u8> {
        if self.buffer.is_dma_aligned() && self.buffer.dma_len_fits() {
            Some(self.buffer.raw_mut().as_mut_ptr())
        } else {
            None
        }
    }

    fn dma_from_client(&self) -> Option<*const u8> {
        if self.buffer.is_dma_aligned() {
            Some(self.buffer.as_slice().as_ptr())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_to_client_rejects_overflow() {
        let mut slot = ReadSlot::new(EtherType::Arp, 8);
        assert!(slot.copy_to_client(&[0u8; 9]).is_err());
        assert!(slot.copy_to_client(&[1, 2, 3]).is_ok());
        assert_eq!(slot.buffer().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn dma_pointer_present_for_aligned_buffer() {
        let mut slot = ReadSlot::new(EtherType::Ipv4, 64);
        assert!(slot.dma_to_client().is_some());
    }

    #[test]
    fn dma_pointer_withheld_when_rounded_len_overflows_capacity() {
        let mut slot = ReadSlot::new(EtherType::Ipv4, 65);
        slot.buffer.set_len(65);
        assert!(slot.dma_to_client().is_none());
    }

    #[test]
    fn write_slot_tracks_in_flight() {
        let mut slot = WriteSlot::new(64);
        assert!(!slot.in_flight());
        slot.submit(&[1, 2, 3]).unwrap();
        assert!(slot.in_flight());
        slot.complete();
        assert!(!slot.in_flight());
    }
}
