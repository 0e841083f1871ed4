//! Receive ring
//!
//! Every usable slot always holds a posted buffer. The hardware prepends an
//! `l2_fhdr` to each frame it writes:
//!
//! ```text
//! 0x00  status           u16   frame classification
//! 0x02  errors           u16   MAC/checksum errors
//! 0x04  hash             u32
//! 0x08  vlan_tag         u16
//! 0x0A  pkt_len          u16   includes the 4-byte FCS
//! 0x0C  tcp_udp_xsum     u16
//! 0x0E  ip_xsum          u16
//! 0x10  (2 bytes pad, aligns the IP header)
//! 0x12  frame
//! ```
//!
//! A consumed slot is refilled before its frame is delivered. If no
//! replacement buffer can be allocated the frame is dropped and its own
//! buffer is posted again, so the ring never shrinks.

use super::Nx2Host;
use super::mmio::DeviceRegisters;
use super::regs::*;
use super::ring::*;
use crate::drivers::net::netdev::{ChecksumMask, DmaSegment, NetPacket, NetStack};
use alloc::vec::Vec;

/// Bytes the hardware places in front of the frame
pub const RX_OFFSET: usize = L2_FHDR_SIZE + 2;

/// Largest frame accepted, FCS excluded
pub const MAX_FRAME_SIZE: usize = 1518;

/// Trailing FCS included in `pkt_len`
pub const RX_FCS_LEN: usize = 4;

/// Size of every posted receive buffer
pub const RX_BUF_SIZE: usize = RX_OFFSET + MAX_FRAME_SIZE + RX_FCS_LEN + 4;

pub const L2_FHDR_SIZE: usize = 16;

pub const L2_FHDR_STATUS_RULE_CLASS: u16 = 0x7;
pub const L2_FHDR_STATUS_RULE_P2: u16 = 1 << 3;
pub const L2_FHDR_STATUS_RULE_P3: u16 = 1 << 4;
pub const L2_FHDR_STATUS_RULE_P4: u16 = 1 << 5;
pub const L2_FHDR_STATUS_L2_VLAN_TAG: u16 = 1 << 6;
pub const L2_FHDR_STATUS_L2_LLC_SNAP: u16 = 1 << 7;
pub const L2_FHDR_STATUS_RSS_HASH: u16 = 1 << 8;
pub const L2_FHDR_STATUS_IP_DATAGRAM: u16 = 1 << 13;
pub const L2_FHDR_STATUS_TCP_SEGMENT: u16 = 1 << 14;
pub const L2_FHDR_STATUS_UDP_DATAGRAM: u16 = 1 << 15;

pub const L2_FHDR_ERRORS_BAD_CRC: u16 = 1 << 1;
pub const L2_FHDR_ERRORS_PHY_DECODE: u16 = 1 << 2;
pub const L2_FHDR_ERRORS_ALIGNMENT: u16 = 1 << 3;
pub const L2_FHDR_ERRORS_TOO_SHORT: u16 = 1 << 4;
pub const L2_FHDR_ERRORS_GIANT_FRAME: u16 = 1 << 5;
pub const L2_FHDR_ERRORS_IPV4_BAD_LEN: u16 = 1 << 6;
pub const L2_FHDR_ERRORS_TCP_XSUM: u16 = 1 << 12;
pub const L2_FHDR_ERRORS_UDP_XSUM: u16 = 1 << 15;

/// Hardware receive header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct L2Fhdr {
    pub status: u16,
    pub errors: u16,
    pub hash: u32,
    pub vlan_tag: u16,
    pub pkt_len: u16,
    pub tcp_udp_xsum: u16,
    pub ip_xsum: u16,
}

impl L2Fhdr {
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < L2_FHDR_SIZE {
            return None;
        }
        let le16 = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        Some(Self {
            status: le16(0),
            errors: le16(2),
            hash: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            vlan_tag: le16(8),
            pkt_len: le16(10),
            tcp_udp_xsum: le16(12),
            ip_xsum: le16(14),
        })
    }

    pub fn encode(&self) -> [u8; L2_FHDR_SIZE] {
        let mut raw = [0u8; L2_FHDR_SIZE];
        raw[0..2].copy_from_slice(&self.status.to_le_bytes());
        raw[2..4].copy_from_slice(&self.errors.to_le_bytes());
        raw[4..8].copy_from_slice(&self.hash.to_le_bytes());
        raw[8..10].copy_from_slice(&self.vlan_tag.to_le_bytes());
        raw[10..12].copy_from_slice(&self.pkt_len.to_le_bytes());
        raw[12..14].copy_from_slice(&self.tcp_udp_xsum.to_le_bytes());
        raw[14..16].copy_from_slice(&self.ip_xsum.to_le_bytes());
        raw
    }

    /// Checksums the hardware validated, from the classification bits
    pub fn checksum_mask(&self) -> ChecksumMask {
        let mut mask = ChecksumMask::NONE;
        if self.status & L2_FHDR_STATUS_IP_DATAGRAM != 0 {
            mask |= ChecksumMask::IP;
        }
        if self.status & L2_FHDR_STATUS_TCP_SEGMENT != 0 {
            mask |= ChecksumMask::TCP;
        }
        if self.status & L2_FHDR_STATUS_UDP_DATAGRAM != 0 {
            mask |= ChecksumMask::UDP;
        }
        mask
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxStats {
    pub packets: u64,
    pub bytes: u64,
    pub errors: u64,
    pub oversize: u64,
    pub refill_failures: u64,
}

/// Why `fill` could not post a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxFillError {
    /// The stack had no buffer to give
    NoBuffer,
    /// The buffer did not map to exactly one segment
    Unmappable,
}

enum Verdict {
    Deliver(usize),
    Error(u16),
    Oversize(usize),
}

pub struct RxRing<P> {
    page: BdPage,
    prod: u16,
    cons: u16,
    prod_bseq: u32,
    slots: Vec<Option<P>>,
    lengths: Vec<u32>,
    segments: Vec<DmaSegment>,
    stats: RxStats,
}

impl<P: NetPacket> RxRing<P> {
    pub fn new(page: BdPage) -> Self {
        let mut slots = Vec::with_capacity(BD_TOTAL);
        slots.resize_with(BD_TOTAL, || None);
        Self {
            page,
            prod: 0,
            cons: 0,
            prod_bseq: 0,
            slots,
            lengths: alloc::vec![0; BD_TOTAL],
            segments: Vec::with_capacity(2),
            stats: RxStats::default(),
        }
    }

    pub fn page(&self) -> &BdPage {
        &self.page
    }

    pub fn into_page(self) -> BdPage {
        self.page
    }

    pub fn prod(&self) -> u16 {
        self.prod
    }

    pub fn cons(&self) -> u16 {
        self.cons
    }

    pub fn prod_bseq(&self) -> u32 {
        self.prod_bseq
    }

    pub fn stats(&self) -> RxStats {
        self.stats
    }

    /// True when every usable slot holds a buffer
    pub fn is_full(&self) -> bool {
        self.slots[..BD_USABLE].iter().all(Option::is_some)
    }

    pub fn posted(&self, slot: usize) -> Option<&P> {
        self.slots[slot].as_ref()
    }

    /// Length last written into `slot`'s descriptor
    pub fn posted_len(&self, slot: usize) -> u32 {
        self.lengths[slot]
    }

    pub fn descriptor(&self, slot: usize) -> RxBd {
        RxBd::decode(&self.page.read(slot))
    }

    /// Write the producer index and byte sequence to the RX mailbox
    pub fn publish<H: Nx2Host>(&self, regs: &DeviceRegisters<H>) {
        let mailbox = mb_cid_addr(RX_CID);
        regs.write16(mailbox + L2MQ_RX_HOST_BDIDX, self.prod);
        regs.write32(mailbox + L2MQ_RX_HOST_BSEQ, self.prod_bseq);
    }

    /// Post `packet` at the producer slot and advance the producer
    fn post(&mut self, packet: P) -> Result<(), (RxFillError, P)> {
        self.segments.clear();
        packet.dma_segments(1, &mut self.segments);
        let segment = match self.segments.as_slice() {
            [segment] => *segment,
            _ => return Err((RxFillError::Unmappable, packet)),
        };

        let slot = bd_slot(self.prod);
        let bd = RxBd {
            addr: segment.bus_addr,
            len: segment.len,
            flags: RX_BD_FLAGS_START | RX_BD_FLAGS_END,
        };
        self.page.write(slot, &bd.encode());
        self.slots[slot] = Some(packet);
        self.lengths[slot] = segment.len;
        self.prod_bseq = self.prod_bseq.wrapping_add(segment.len);
        self.prod = next_bd(self.prod);
        Ok(())
    }

    /// Allocate a fresh buffer from the stack and post it
    pub fn refill<S: NetStack<Packet = P>>(&mut self, stack: &mut S) -> Result<(), RxFillError> {
        let packet = stack
            .allocate_packet(RX_BUF_SIZE)
            .ok_or(RxFillError::NoBuffer)?;
        self.post(packet).map_err(|(err, packet)| {
            stack.release_packet(packet);
            err
        })
    }

    /// Post a buffer to every usable slot
    pub fn fill<S: NetStack<Packet = P>>(&mut self, stack: &mut S) -> Result<(), RxFillError> {
        for _ in 0..BD_USABLE {
            self.refill(stack)?;
        }
        Ok(())
    }

    fn classify(&self, packet: &P) -> Verdict {
        let hdr = match L2Fhdr::decode(packet.data()) {
            Some(hdr) => hdr,
            None => return Verdict::Error(0),
        };
        if hdr.errors != 0 {
            return Verdict::Error(hdr.errors);
        }
        let pkt_len = hdr.pkt_len as usize;
        if pkt_len < RX_FCS_LEN {
            return Verdict::Error(L2_FHDR_ERRORS_TOO_SHORT);
        }
        let len = pkt_len - RX_FCS_LEN;
        if len > MAX_FRAME_SIZE {
            return Verdict::Oversize(len);
        }
        Verdict::Deliver(len)
    }

    /// Consume completed slots up to the hardware index.
    ///
    /// Good frames are trimmed to the Ethernet frame and queued on the stack
    /// with their checksum result. Does not ring the doorbell or flush the
    /// stack. Returns the number of frames delivered.
    pub fn handle_completion<S: NetStack<Packet = P>>(
        &mut self,
        hw_cons: u16,
        stack: &mut S,
    ) -> usize {
        let mut delivered = 0;
        let mut budget = BD_USABLE;

        while self.cons != hw_cons && budget > 0 {
            budget -= 1;
            let slot = bd_slot(self.cons);
            self.cons = next_bd(self.cons);

            let Some(mut packet) = self.slots[slot].take() else {
                // Nothing was posted here; keep the ring populated
                if self.refill(stack).is_err() {
                    self.stats.refill_failures += 1;
                }
                continue;
            };

            let len = match self.classify(&packet) {
                Verdict::Deliver(len) => len,
                Verdict::Error(errors) => {
                    log::debug!("[NX2] RX frame dropped, errors {:#06x}", errors);
                    self.stats.errors += 1;
                    self.discard(packet, stack);
                    continue;
                }
                Verdict::Oversize(len) => {
                    log::debug!("[NX2] RX frame of {} bytes dropped", len);
                    self.stats.oversize += 1;
                    self.discard(packet, stack);
                    continue;
                }
            };

            // Replacement first: on failure the frame is lost, not the slot
            if let Err(err) = self.refill(stack) {
                log::debug!("[NX2] RX refill failed ({:?}), frame dropped", err);
                self.stats.refill_failures += 1;
                self.recycle(packet, stack);
                continue;
            }

            let mask = L2Fhdr::decode(packet.data())
                .map(|hdr| hdr.checksum_mask())
                .unwrap_or_default();
            if !packet.trim(RX_OFFSET, len) {
                // Header claims more than the buffer holds
                self.stats.errors += 1;
                stack.release_packet(packet);
                continue;
            }
            packet.set_rx_checksum(mask);

            self.stats.packets += 1;
            self.stats.bytes += len as u64;
            stack.deliver(packet);
            delivered += 1;
        }

        delivered
    }

    /// Drop a bad frame and refill its slot with a fresh buffer. Without
    /// one, the old buffer goes back on the ring.
    fn discard<S: NetStack<Packet = P>>(&mut self, packet: P, stack: &mut S) {
        match self.refill(stack) {
            Ok(()) => stack.release_packet(packet),
            Err(err) => {
                log::debug!("[NX2] RX refill failed ({:?}), buffer reposted", err);
                self.stats.refill_failures += 1;
                self.recycle(packet, stack);
            }
        }
    }

    /// Post a consumed buffer again unchanged
    fn recycle<S: NetStack<Packet = P>>(&mut self, packet: P, stack: &mut S) {
        if let Err((_, packet)) = self.post(packet) {
            stack.release_packet(packet);
            self.stats.refill_failures += 1;
        }
    }

    /// Take every posted buffer (teardown)
    pub fn drain(&mut self, released: &mut Vec<P>) {
        for slot in self.slots.iter_mut() {
            if let Some(packet) = slot.take() {
                released.push(packet);
            }
        }
        self.lengths.iter_mut().for_each(|len| *len = 0);
    }

    /// Return to the empty state. Posted buffers must have been drained.
    pub fn reset(&mut self) {
        debug_assert!(self.slots.iter().all(Option::is_none));
        self.page.reset();
        self.prod = 0;
        self.cons = 0;
        self.prod_bseq = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::net::ethernet::broadcom::nx2::dma::{DmaBuffer, IdentityDma};
    use crate::drivers::net::ethernet::broadcom::nx2::testing::{RecordingStack, write_rx_frame};
    use crate::net::skbuff::SkBuff;

    fn ring() -> RxRing<SkBuff> {
        let buffer = DmaBuffer::allocate(&IdentityDma, BD_PAGE_SIZE).unwrap();
        RxRing::new(BdPage::new(buffer))
    }

    fn free(mut ring: RxRing<SkBuff>) {
        let mut released = Vec::new();
        ring.drain(&mut released);
        unsafe { ring.into_page().into_buffer().release(&IdentityDma) };
    }

    fn frame(len: usize) -> Vec<u8> {
        (0..len).map(|i| i as u8).collect()
    }

    #[test]
    fn test_l2_fhdr_byte_layout() {
        let raw = [
            0x00, 0x60, // status: IP | TCP
            0x00, 0x00, // errors
            0x78, 0x56, 0x34, 0x12, // hash
            0x64, 0x00, // vlan
            0x40, 0x00, // pkt_len 64
            0xCD, 0xAB, // tcp_udp_xsum
            0xFF, 0xFF, // ip_xsum
        ];
        let hdr = L2Fhdr::decode(&raw).unwrap();
        assert_eq!(hdr.status, L2_FHDR_STATUS_IP_DATAGRAM | L2_FHDR_STATUS_TCP_SEGMENT);
        assert_eq!(hdr.hash, 0x1234_5678);
        assert_eq!(hdr.vlan_tag, 100);
        assert_eq!(hdr.pkt_len, 64);
        assert_eq!(hdr.tcp_udp_xsum, 0xABCD);
        assert_eq!(hdr.encode(), raw);
        assert_eq!(L2Fhdr::decode(&raw[..15]), None);
    }

    #[test]
    fn test_checksum_mask_all_combinations() {
        for bits in 0u8..8 {
            let mut status = L2_FHDR_STATUS_L2_VLAN_TAG;
            let mut expected = ChecksumMask::NONE;
            if bits & 1 != 0 {
                status |= L2_FHDR_STATUS_IP_DATAGRAM;
                expected |= ChecksumMask::IP;
            }
            if bits & 2 != 0 {
                status |= L2_FHDR_STATUS_TCP_SEGMENT;
                expected |= ChecksumMask::TCP;
            }
            if bits & 4 != 0 {
                status |= L2_FHDR_STATUS_UDP_DATAGRAM;
                expected |= ChecksumMask::UDP;
            }
            let hdr = L2Fhdr {
                status,
                ..L2Fhdr::default()
            };
            assert_eq!(hdr.checksum_mask(), expected, "status {:#06x}", status);
        }
    }

    #[test]
    fn test_fill_posts_every_slot() {
        let mut ring = ring();
        let mut stack = RecordingStack::new();

        ring.fill(&mut stack).unwrap();

        assert!(ring.is_full());
        assert_eq!(ring.prod(), 1024);
        let bd = ring.descriptor(0);
        assert_eq!(bd.flags, RX_BD_FLAGS_START | RX_BD_FLAGS_END);
        assert_eq!(bd.len as usize, RX_BUF_SIZE);
        assert_eq!(ring.posted_len(5) as usize, RX_BUF_SIZE);
        assert_eq!(ring.prod_bseq() as usize, RX_BUF_SIZE * BD_USABLE);
        free(ring);
    }

    #[test]
    fn test_good_frame_trimmed_and_delivered() {
        let mut ring = ring();
        let mut stack = RecordingStack::new();
        ring.fill(&mut stack).unwrap();

        let payload = frame(60);
        let hdr = L2Fhdr {
            status: L2_FHDR_STATUS_IP_DATAGRAM | L2_FHDR_STATUS_UDP_DATAGRAM,
            pkt_len: (payload.len() + RX_FCS_LEN) as u16,
            ..L2Fhdr::default()
        };
        write_rx_frame(ring.descriptor(0).addr, &hdr, &payload);
        let original = ring.descriptor(0).addr;

        assert_eq!(ring.handle_completion(1, &mut stack), 1);

        assert_eq!(stack.delivered.len(), 1);
        let skb = &stack.delivered[0];
        assert_eq!(skb.data(), payload.as_slice());
        assert_eq!(
            skb.metadata().rx_checksum,
            ChecksumMask::IP | ChecksumMask::UDP
        );
        assert!(ring.is_full());
        // Slot 0 now holds a different buffer
        assert_ne!(ring.descriptor(0).addr, original);
        assert_eq!(ring.stats().packets, 1);
        free(ring);
    }

    #[test]
    fn test_error_frame_dropped_and_same_slot_refilled() {
        let mut ring = ring();
        let mut stack = RecordingStack::new();
        ring.fill(&mut stack).unwrap();
        let allocated = stack.allocated;
        let original = ring.descriptor(0).addr;

        let hdr = L2Fhdr {
            errors: L2_FHDR_ERRORS_BAD_CRC,
            pkt_len: 64,
            ..L2Fhdr::default()
        };
        write_rx_frame(original, &hdr, &frame(60));

        assert_eq!(ring.handle_completion(1, &mut stack), 0);

        assert!(stack.delivered.is_empty());
        assert!(ring.is_full());
        assert_eq!(ring.prod(), 1025);
        assert_ne!(ring.descriptor(0).addr, original);
        assert_eq!(stack.allocated, allocated + 1);
        assert_eq!(stack.released.len(), 1);
        assert_eq!(ring.stats().errors, 1);
        free(ring);
    }

    #[test]
    fn test_oversize_frame_dropped() {
        let mut ring = ring();
        let mut stack = RecordingStack::new();
        ring.fill(&mut stack).unwrap();
        let original = ring.descriptor(0).addr;

        let hdr = L2Fhdr {
            pkt_len: (MAX_FRAME_SIZE + RX_FCS_LEN + 1) as u16,
            ..L2Fhdr::default()
        };
        write_rx_frame(original, &hdr, &[]);

        assert_eq!(ring.handle_completion(1, &mut stack), 0);
        assert_eq!(ring.stats().oversize, 1);
        assert!(ring.is_full());
        assert_ne!(ring.descriptor(0).addr, original);
        assert_eq!(stack.released.len(), 1);
        free(ring);
    }

    #[test]
    fn test_error_frame_reposts_old_buffer_without_allocation() {
        let mut ring = ring();
        let mut stack = RecordingStack::new();
        ring.fill(&mut stack).unwrap();
        let original = ring.descriptor(0).addr;

        let hdr = L2Fhdr {
            errors: L2_FHDR_ERRORS_BAD_CRC,
            pkt_len: 64,
            ..L2Fhdr::default()
        };
        write_rx_frame(original, &hdr, &frame(60));

        stack.fail_allocations = true;
        assert_eq!(ring.handle_completion(1, &mut stack), 0);

        assert!(ring.is_full());
        assert_eq!(ring.descriptor(0).addr, original);
        assert!(stack.released.is_empty());
        assert_eq!(ring.stats().errors, 1);
        assert_eq!(ring.stats().refill_failures, 1);
        free(ring);
    }

    #[test]
    fn test_allocation_failure_drops_frame_keeps_slot() {
        let mut ring = ring();
        let mut stack = RecordingStack::new();
        ring.fill(&mut stack).unwrap();

        let payload = frame(100);
        for slot in 0..3 {
            let hdr = L2Fhdr {
                pkt_len: (payload.len() + RX_FCS_LEN) as u16,
                ..L2Fhdr::default()
            };
            write_rx_frame(ring.descriptor(slot).addr, &hdr, &payload);
        }

        stack.fail_allocations = true;
        assert_eq!(ring.handle_completion(3, &mut stack), 0);

        assert!(stack.delivered.is_empty());
        assert!(ring.is_full());
        assert_eq!(ring.stats().refill_failures, 3);
        free(ring);
    }

    #[test]
    fn test_completion_is_bounded_and_idempotent() {
        let mut ring = ring();
        let mut stack = RecordingStack::new();
        ring.fill(&mut stack).unwrap();

        assert_eq!(ring.handle_completion(0, &mut stack), 0);
        assert_eq!(ring.cons(), 0);
        assert_eq!(ring.prod(), 1024);
        free(ring);
    }

    #[test]
    fn test_doorbell_writes_mailbox() {
        use crate::drivers::net::ethernet::broadcom::nx2::testing::MockNx2;

        let regs = DeviceRegisters::new(MockNx2::new());
        let mut ring = ring();
        let mut stack = RecordingStack::new();
        ring.fill(&mut stack).unwrap();
        ring.publish(&regs);

        let mailbox = mb_cid_addr(RX_CID);
        assert_eq!(regs.read16(mailbox + L2MQ_RX_HOST_BDIDX), 1024);
        assert_eq!(
            regs.read32(mailbox + L2MQ_RX_HOST_BSEQ) as usize,
            RX_BUF_SIZE * BD_USABLE
        );
        free(ring);
    }
}
