//! Socket Buffer (sk_buff) - Linux-inspired packet buffer
//!
//! This module implements a packet buffer structure inspired by Linux's sk_buff.
//! The buffer owns a heap allocation whose address never changes, so it can
//! be posted to a descriptor ring directly and handed back and forth between
//! the stack and the controller without copying.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              SkBuff (metadata)                   │
//! ├─────────────────────────────────────────────────┤
//! │  data_ptr: 18  (after the receive header)        │
//! │  tail: 82                                        │
//! │  tx_offload: { checksum, vlan_tag }              │
//! │  rx_checksum: IP | TCP                           │
//! └──────────────┬──────────────────────────────────┘
//!                │
//!                ▼
//! ┌─────────────────────────────────────────────────┐
//! │           Packet Data (heap buffer)             │
//! ├─────────────────────────────────────────────────┤
//! │ [l2_fhdr+pad][Eth Hdr][IP Hdr][Payload][FCS]    │
//! │  ^            ^                         ^       │
//! │  0            data                      tail    │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # DMA Mapping
//!
//! Buffers live in identity-mapped memory: the bus address of a byte is its
//! virtual address. Every buffer is a naturally aligned block of
//! [`MAX_PACKET_SIZE`] bytes, so it never straddles a page and always maps to
//! a single segment. Mapping still splits at page boundaries in general.
//!
//! # References
//!
//! - Linux kernel sk_buff: <https://docs.kernel.org/networking/skbuff.html>

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::drivers::net::netdev::{ChecksumMask, DmaSegment, NetPacket, TxOffload};

/// Maximum packet size (Ethernet MTU + headers + receive header)
pub const MAX_PACKET_SIZE: usize = 2048;

/// Page granularity of the identity mapping
const MAP_PAGE_SIZE: usize = 4096;

/// Socket buffer - Linux sk_buff equivalent
///
/// # Lifecycle
///
/// 1. **Receive**: allocated empty by the stack, posted to the RX ring,
///    filled by DMA, trimmed to the frame and delivered
/// 2. **Transmit**: built by the stack, posted to the TX ring, released
///    back to the stack when the hardware consumer passes it
pub struct SkBuff {
    /// Packet data (owned, heap-allocated, never reallocated)
    data: Box<Block>,

    /// Offsets into `data`
    headers: SkBuffHeaders,

    /// Offload requests and results
    metadata: PacketMetadata,
}

/// Backing storage, aligned to its own size
#[repr(C, align(2048))]
struct Block([u8; MAX_PACKET_SIZE]);

/// sk_buff window (offsets into data buffer)
#[derive(Debug, Clone)]
struct SkBuffHeaders {
    /// Current layer's data start (moves as headers are pushed/pulled)
    data: usize,

    /// End of actual packet data
    tail: usize,
}

/// Per-packet offload state
#[derive(Debug, Clone, Default)]
pub struct PacketMetadata {
    /// Work requested from the transmit hardware
    pub tx_offload: TxOffload,

    /// Checksums the receive hardware verified
    pub rx_checksum: ChecksumMask,
}

/// Errors that can occur during sk_buff operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkBuffError {
    /// Packet size exceeds maximum
    PacketTooLarge,
}

impl fmt::Display for SkBuffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PacketTooLarge => write!(f, "packet exceeds maximum size"),
        }
    }
}

impl SkBuff {
    /// Allocate a zeroed buffer of `size` bytes, all of it packet data
    ///
    /// This is what receive rings post: the hardware writes into the whole
    /// buffer and the driver trims it to the frame afterwards.
    pub fn alloc(size: usize) -> Result<Self, SkBuffError> {
        if size > MAX_PACKET_SIZE {
            return Err(SkBuffError::PacketTooLarge);
        }
        Ok(Self {
            data: Box::new(Block([0u8; MAX_PACKET_SIZE])),
            headers: SkBuffHeaders {
                data: 0,
                tail: size,
            },
            metadata: PacketMetadata::default(),
        })
    }

    /// Build an egress packet by copying a complete frame
    pub fn from_frame(frame: &[u8]) -> Result<Self, SkBuffError> {
        let mut skb = Self::alloc(frame.len())?;
        skb.data.0[..frame.len()].copy_from_slice(frame);
        Ok(skb)
    }

    /// Get current layer's data (after headers have been pulled)
    pub fn data(&self) -> &[u8] {
        &self.data.0[self.headers.data..self.headers.tail]
    }

    /// Mutable view of the current data
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data.0[self.headers.data..self.headers.tail]
    }

    /// Get reference to metadata
    pub fn metadata(&self) -> &PacketMetadata {
        &self.metadata
    }

    /// Get mutable reference to metadata
    pub fn metadata_mut(&mut self) -> &mut PacketMetadata {
        &mut self.metadata
    }

    /// Get current packet length
    pub fn len(&self) -> usize {
        self.headers.tail - self.headers.data
    }

    /// Check if packet is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NetPacket for SkBuff {
    fn len(&self) -> usize {
        SkBuff::len(self)
    }

    fn data(&self) -> &[u8] {
        SkBuff::data(self)
    }

    fn dma_segments(&self, max_segments: usize, out: &mut Vec<DmaSegment>) {
        let bytes = SkBuff::data(self);
        if bytes.is_empty() {
            return;
        }

        let start = bytes.as_ptr() as usize;
        let end = start + bytes.len();
        let pages = (end - 1) / MAP_PAGE_SIZE - start / MAP_PAGE_SIZE + 1;
        if pages > max_segments {
            return;
        }

        let mut addr = start;
        while addr < end {
            let page_end = (addr / MAP_PAGE_SIZE + 1) * MAP_PAGE_SIZE;
            let seg_end = page_end.min(end);
            out.push(DmaSegment {
                bus_addr: addr as u64,
                len: (seg_end - addr) as u32,
            });
            addr = seg_end;
        }
    }

    fn trim(&mut self, head: usize, len: usize) -> bool {
        let start = self.headers.data + head;
        if start + len > self.headers.tail {
            return false;
        }
        self.headers.data = start;
        self.headers.tail = start + len;
        true
    }

    fn tx_offload(&self) -> TxOffload {
        self.metadata.tx_offload
    }

    fn set_rx_checksum(&mut self, mask: ChecksumMask) {
        self.metadata.rx_checksum = mask;
    }
}

impl fmt::Debug for SkBuff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkBuff")
            .field("len", &self.len())
            .field("data_ptr", &self.headers.data)
            .field("tx_offload", &self.metadata.tx_offload)
            .field("rx_checksum", &self.metadata.rx_checksum)
            .finish()
    }
}
