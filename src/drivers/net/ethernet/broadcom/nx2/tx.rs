//! Transmit ring
//!
//! # Ownership
//!
//! A packet handed to [`TxRing::send`] is parked in the slot of its last
//! descriptor. It stays there until the hardware consumer index moves past
//! that slot, at which point [`TxRing::reclaim`] hands it back for release to
//! the stack.
//!
//! # Full vs Empty
//!
//! The ring is never filled to zero free descriptors: a send needs strictly
//! fewer segments than the free count. Producer equal to consumer therefore
//! always means empty.

use super::Nx2Host;
use super::mmio::DeviceRegisters;
use super::regs::*;
use super::ring::*;
use crate::drivers::net::netdev::{ChecksumMask, DmaSegment, NetPacket, TxError};
use alloc::vec::Vec;

/// Most segments one packet may map to
pub const TX_MAX_SEGMENTS: usize = 512;

/// Free descriptors on an empty ring
pub const TX_INITIAL_FREE: usize = BD_USABLE - 1;

/// Doorbell values published after a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxDoorbell {
    pub prod: u16,
    pub bseq: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxStats {
    pub packets: u64,
    pub bytes: u64,
    pub stalls: u64,
    pub unmappable: u64,
}

pub struct TxRing<P> {
    page: BdPage,
    prod: u16,
    cons: u16,
    prod_bseq: u32,
    free_bd: usize,
    slots: Vec<Option<P>>,
    segments: Vec<DmaSegment>,
    stats: TxStats,
}

impl<P: NetPacket> TxRing<P> {
    pub fn new(page: BdPage) -> Self {
        let mut slots = Vec::with_capacity(BD_TOTAL);
        slots.resize_with(BD_TOTAL, || None);
        Self {
            page,
            prod: 0,
            cons: 0,
            prod_bseq: 0,
            free_bd: TX_INITIAL_FREE,
            slots,
            segments: Vec::with_capacity(TX_MAX_SEGMENTS),
            stats: TxStats::default(),
        }
    }

    /// Return to the empty state. Outstanding packets must have been drained.
    pub fn reset(&mut self) {
        debug_assert!(self.slots.iter().all(Option::is_none));
        self.page.reset();
        self.prod = 0;
        self.cons = 0;
        self.prod_bseq = 0;
        self.free_bd = TX_INITIAL_FREE;
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

    pub fn free_descriptors(&self) -> usize {
        self.free_bd
    }

    pub fn stats(&self) -> TxStats {
        self.stats
    }

    pub fn doorbell(&self) -> TxDoorbell {
        TxDoorbell {
            prod: self.prod,
            bseq: self.prod_bseq,
        }
    }

    /// Write the producer index and byte sequence to the TX mailbox
    pub fn publish<H: Nx2Host>(&self, regs: &DeviceRegisters<H>) {
        let mailbox = mb_cid_addr(TX_CID);
        regs.write16(mailbox + L2MQ_TX_HOST_BIDX, self.prod);
        regs.write32(mailbox + L2MQ_TX_HOST_BSEQ, self.prod_bseq);
    }

    /// Post one packet. Does not ring the doorbell.
    pub fn send(&mut self, packet: P) -> Result<(), TxError<P>> {
        if self.free_bd == 0 {
            self.stats.stalls += 1;
            return Err(TxError::Stall(packet));
        }

        self.segments.clear();
        packet.dma_segments(TX_MAX_SEGMENTS, &mut self.segments);
        let nseg = self.segments.len();

        if nseg == 0 {
            log::debug!("[NX2] TX packet of {} bytes could not be mapped", packet.len());
            self.stats.unmappable += 1;
            return Err(TxError::Dropped);
        }

        if nseg >= self.free_bd {
            self.stats.stalls += 1;
            return Err(TxError::Stall(packet));
        }

        let offload = packet.tx_offload();
        let mut base_flags = 0u16;
        if offload.checksum.contains(ChecksumMask::IP) {
            base_flags |= TX_BD_FLAGS_IP_CKSUM;
        }
        if offload.checksum.contains(ChecksumMask::TCP)
            || offload.checksum.contains(ChecksumMask::UDP)
        {
            base_flags |= TX_BD_FLAGS_TCP_UDP_CKSUM;
        }
        let vlan_tag = match offload.vlan_tag {
            Some(tag) => {
                base_flags |= TX_BD_FLAGS_VLAN_TAG;
                tag
            }
            None => 0,
        };

        let mut last_slot = bd_slot(self.prod);
        let mut total = 0u32;
        for (i, segment) in self.segments.iter().enumerate() {
            let mut flags = base_flags;
            if i == 0 {
                flags |= TX_BD_FLAGS_START;
            }
            if i == nseg - 1 {
                flags |= TX_BD_FLAGS_END;
            }

            last_slot = bd_slot(self.prod);
            let bd = TxBd {
                addr: segment.bus_addr,
                nbytes: segment.len,
                flags,
                vlan_tag,
            };
            self.page.write(last_slot, &bd.encode());

            total = total.wrapping_add(segment.len);
            self.prod = next_bd(self.prod);
        }

        self.prod_bseq = self.prod_bseq.wrapping_add(total);
        self.free_bd -= nseg;
        self.slots[last_slot] = Some(packet);

        self.stats.packets += 1;
        self.stats.bytes += total as u64;
        Ok(())
    }

    /// Advance the consumer to the hardware index, moving completed packets
    /// into `released`. Returns the number of descriptors freed.
    pub fn reclaim(&mut self, hw_cons: u16, released: &mut Vec<P>) -> usize {
        let mut freed = 0;
        // Bounded to one lap so a corrupt index cannot spin forever
        while self.cons != hw_cons && freed < BD_USABLE {
            if let Some(packet) = self.slots[bd_slot(self.cons)].take() {
                released.push(packet);
            }
            self.free_bd += 1;
            self.cons = next_bd(self.cons);
            freed += 1;
        }
        freed
    }

    /// Take every packet still on the ring (teardown)
    pub fn drain(&mut self, released: &mut Vec<P>) {
        for slot in self.slots.iter_mut() {
            if let Some(packet) = slot.take() {
                released.push(packet);
            }
        }
        self.cons = self.prod;
        self.free_bd = TX_INITIAL_FREE;
    }

    /// Descriptor currently stored at `slot`
    pub fn descriptor(&self, slot: usize) -> TxBd {
        TxBd::decode(&self.page.read(slot))
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        self.slots[slot].is_some()
    }
}
