//! Simulated controller for unit tests
//!
//! `MockNx2` stands in for BAR0, PCI configuration space, the host DMA
//! allocator and the clock. Registers with hardware side effects behave
//! just enough like silicon for the bring-up and ring paths to run:
//!
//! - The bootcode acknowledges every DRV_MB write in FW_MB
//! - Reset, memory-init and request bits clear themselves
//! - Context page table and context word accesses land in a shared map
//! - MDIO commands complete at once against a simulated PHY
//!
//! `stick_bits` pins bits high on read to simulate hardware that never
//! finishes. Delays advance a virtual clock instead of spinning.

use super::dma::{DmaAllocator, DmaBuffer, DmaRegion, IdentityDma};
use super::mmio::MmioRegion;
use super::phy::*;
use super::regs::*;
use super::rx::{L2_FHDR_SIZE, L2Fhdr, RX_OFFSET};
use super::status::StatusBlock;
use crate::drivers::clocksource::Clock;
use crate::drivers::net::netdev::{
    ChecksumMask, DmaSegment, LinkStatus, Medium, NetPacket, NetStack, TxOffload,
};
use crate::drivers::pci::{PciConfig, offset};
use crate::net::skbuff::SkBuff;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};

/// How the simulated bootcode answers driver mailbox messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootcodeMode {
    /// Echo the sequence number (working firmware)
    AckExact,
    /// Answer with the previous sequence
    AckPrevious,
    /// Answer with the next sequence
    AckNext,
    /// Never answer
    Silent,
}

pub struct MockNx2 {
    regs: RefCell<BTreeMap<u32, u32>>,
    regs16: RefCell<BTreeMap<u32, u16>>,
    sticky: RefCell<BTreeMap<u32, u32>>,
    config: RefCell<BTreeMap<u32, u32>>,
    indirect: RefCell<BTreeMap<u32, u32>>,
    context: RefCell<BTreeMap<u32, u32>>,
    page_table: RefCell<Vec<(u32, u64)>>,
    rv2p_log: RefCell<Vec<(u32, u32, u32, u32)>>,
    phy_regs: RefCell<BTreeMap<u32, u16>>,
    phy_writes: RefCell<Vec<(u32, u16)>>,
    mdio_log: RefCell<Vec<(u32, u16)>>,
    int_acks: RefCell<Vec<u32>>,
    drv_messages: RefCell<Vec<u32>>,
    bootcode: Cell<BootcodeMode>,
    shmem_base: Cell<u32>,
    swap_diag: Cell<u32>,
    function: Cell<u8>,
    elapsed_us: Cell<u64>,
    dma_live: Cell<isize>,
    fail_dma: Cell<bool>,
}

impl MockNx2 {
    /// A 5709 C0 with working bootcode, a 1000FD link and a fixed MAC
    pub fn new() -> Self {
        let mock = Self {
            regs: RefCell::new(BTreeMap::new()),
            regs16: RefCell::new(BTreeMap::new()),
            sticky: RefCell::new(BTreeMap::new()),
            config: RefCell::new(BTreeMap::new()),
            indirect: RefCell::new(BTreeMap::new()),
            context: RefCell::new(BTreeMap::new()),
            page_table: RefCell::new(Vec::new()),
            rv2p_log: RefCell::new(Vec::new()),
            phy_regs: RefCell::new(BTreeMap::new()),
            phy_writes: RefCell::new(Vec::new()),
            mdio_log: RefCell::new(Vec::new()),
            int_acks: RefCell::new(Vec::new()),
            drv_messages: RefCell::new(Vec::new()),
            bootcode: Cell::new(BootcodeMode::AckExact),
            shmem_base: Cell::new(HOST_VIEW_SHMEM_BASE),
            swap_diag: Cell::new(SWAP_DIAG0_PATTERN),
            function: Cell::new(0),
            elapsed_us: Cell::new(0),
            dma_live: Cell::new(0),
            fail_dma: Cell::new(false),
        };
        mock.set_chip_id(0x5709_2000);
        mock.set_pci_ids(0x14E4, 0x1639, 0x14E4, 0x1639);
        mock.set_mac(0x0000_0010, 0x18AB_CDEF);
        mock.set_phy_reg(PHY_ID_HIGH, 0x0143);
        mock.set_phy_reg(PHY_ID_LOW, 0xBC70);
        mock.set_phy_reg(AUX_STATUS, AUX_STATUS_SPEED_1000FD | AUX_STATUS_LINK_UP);
        mock
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn set_bootcode(&self, mode: BootcodeMode) {
        self.bootcode.set(mode);
    }

    pub fn set_chip_id(&self, misc_id: u32) {
        self.regs.borrow_mut().insert(MISC_ID, misc_id);
    }

    pub fn set_pci_ids(&self, vendor: u16, device: u16, subsystem_vendor: u16, subsystem: u16) {
        let mut config = self.config.borrow_mut();
        config.insert(offset::VENDOR_DEVICE, (device as u32) << 16 | vendor as u32);
        config.insert(
            offset::SUBSYSTEM,
            (subsystem as u32) << 16 | subsystem_vendor as u32,
        );
    }

    pub fn set_swap_diag(&self, value: u32) {
        self.swap_diag.set(value);
    }

    pub fn set_function(&self, function: u8) {
        self.function.set(function);
    }

    /// Publish a signature header pointing shared memory at `base`
    pub fn set_shmem_signature(&self, base: u32) {
        let mut indirect = self.indirect.borrow_mut();
        indirect.insert(SHM_HDR_SIGNATURE, SHM_HDR_SIGNATURE_SIG | 0x0001);
        indirect.insert(SHM_HDR_ADDR_0 + ((self.function.get() as u32) << 2), base);
        drop(indirect);
        self.relocate_shmem(base);
    }

    /// Signature present but the per-function base is unusable
    pub fn set_shmem_signature_raw(&self, base: u32) {
        let mut indirect = self.indirect.borrow_mut();
        indirect.insert(SHM_HDR_SIGNATURE, SHM_HDR_SIGNATURE_SIG);
        indirect.insert(SHM_HDR_ADDR_0 + ((self.function.get() as u32) << 2), base);
    }

    fn relocate_shmem(&self, base: u32) {
        let old = self.shmem_base.replace(base);
        let upper = self.indirect(old + PORT_HW_CFG_MAC_UPPER);
        let lower = self.indirect(old + PORT_HW_CFG_MAC_LOWER);
        let mut indirect = self.indirect.borrow_mut();
        indirect.insert(base + PORT_HW_CFG_MAC_UPPER, upper);
        indirect.insert(base + PORT_HW_CFG_MAC_LOWER, lower);
    }

    /// Port MAC address as the bootcode stores it
    pub fn set_mac(&self, upper: u32, lower: u32) {
        let base = self.shmem_base.get();
        let mut indirect = self.indirect.borrow_mut();
        indirect.insert(base + PORT_HW_CFG_MAC_UPPER, upper);
        indirect.insert(base + PORT_HW_CFG_MAC_LOWER, lower);
    }

    /// Force `bits` to read back as set in direct register `offset`
    pub fn stick_bits(&self, offset: u32, bits: u32) {
        *self.sticky.borrow_mut().entry(offset).or_insert(0) |= bits;
    }

    pub fn unstick_bits(&self, offset: u32) {
        self.sticky.borrow_mut().remove(&offset);
    }

    pub fn set_phy_reg(&self, reg: u32, value: u16) {
        self.phy_regs.borrow_mut().insert(reg, value);
    }

    pub fn fail_dma(&self, fail: bool) {
        self.fail_dma.set(fail);
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us.get()
    }

    pub fn indirect(&self, address: u32) -> u32 {
        self.indirect.borrow().get(&address).copied().unwrap_or(0)
    }

    pub fn config(&self, offset: u32) -> u32 {
        self.config.borrow().get(&offset).copied().unwrap_or(0)
    }

    /// Last value written to a direct register, without side effects
    pub fn reg(&self, offset: u32) -> u32 {
        self.regs.borrow().get(&offset).copied().unwrap_or(0)
    }

    pub fn context_page_table(&self) -> Vec<(u32, u64)> {
        self.page_table.borrow().clone()
    }

    pub fn context_word(&self, address: u32) -> u32 {
        self.context.borrow().get(&address).copied().unwrap_or(0)
    }

    /// (address command register, high word, low word, command) per RV2P write
    pub fn rv2p_log(&self) -> Vec<(u32, u32, u32, u32)> {
        self.rv2p_log.borrow().clone()
    }

    pub fn phy_reg(&self, reg: u32) -> u16 {
        self.phy_regs.borrow().get(&reg).copied().unwrap_or(0)
    }

    pub fn phy_writes(&self) -> Vec<(u32, u16)> {
        self.phy_writes.borrow().clone()
    }

    /// (command word, data returned) per MDIO transaction
    pub fn mdio_log(&self) -> Vec<(u32, u16)> {
        self.mdio_log.borrow().clone()
    }

    pub fn int_acks(&self) -> Vec<u32> {
        self.int_acks.borrow().clone()
    }

    /// Every message the driver wrote to DRV_MB, in order
    pub fn drv_messages(&self) -> Vec<u32> {
        self.drv_messages.borrow().clone()
    }

    pub fn dma_outstanding(&self) -> isize {
        self.dma_live.get()
    }

    // ========================================================================
    // Side Effects
    // ========================================================================

    fn self_clearing(offset: u32) -> u32 {
        match offset {
            MISC_COMMAND => MISC_COMMAND_SW_RESET,
            PCICFG_MISC_CONFIG => PCICFG_MISC_CONFIG_CORE_RST_REQ | PCICFG_MISC_CONFIG_CORE_RST_BSY,
            CTX_COMMAND => CTX_COMMAND_MEM_INIT,
            CTX_HOST_PAGE_TBL_CTRL => CTX_HOST_PAGE_TBL_CTRL_WRITE_REQ,
            CTX_CTX_CTRL => CTX_CTX_CTRL_READ_REQ | CTX_CTX_CTRL_WRITE_REQ,
            EMAC_MDIO_COMM => EMAC_MDIO_COMM_START_BUSY,
            _ => 0,
        }
    }

    fn write_indirect_word(&self, address: u32, value: u32) {
        self.indirect.borrow_mut().insert(address, value);
        if address == self.shmem_base.get() + DRV_MB {
            self.drv_messages.borrow_mut().push(value);
            self.bootcode_answer(value);
        }
    }

    fn bootcode_answer(&self, message: u32) {
        let seq = (message & DRV_MSG_SEQ) as u16;
        let ack = match self.bootcode.get() {
            BootcodeMode::AckExact => seq,
            BootcodeMode::AckPrevious => seq.wrapping_sub(1),
            BootcodeMode::AckNext => seq.wrapping_add(1),
            BootcodeMode::Silent => return,
        };
        let fw_mb = self.shmem_base.get() + FW_MB;
        self.indirect.borrow_mut().insert(fw_mb, ack as u32);
    }

    fn mdio(&self, command: u32) -> u32 {
        let reg = (command >> EMAC_MDIO_COMM_REG_SHIFT) & 0x1F;
        let mut result = 0u16;
        if (command & EMAC_MDIO_COMM_COMMAND_READ) == EMAC_MDIO_COMM_COMMAND_READ {
            result = self.phy_reg(reg);
        } else if (command & EMAC_MDIO_COMM_COMMAND_WRITE) != 0 {
            let data = (command & EMAC_MDIO_COMM_DATA) as u16;
            self.phy_writes.borrow_mut().push((reg, data));
            let stored = if reg == MII_CONTROL {
                data & !MII_CONTROL_RESET
            } else {
                data
            };
            self.set_phy_reg(reg, stored);
        }
        self.mdio_log.borrow_mut().push((command, result));

        if (command & EMAC_MDIO_COMM_COMMAND_READ) == EMAC_MDIO_COMM_COMMAND_READ {
            (command & !EMAC_MDIO_COMM_DATA) | result as u32
        } else {
            command
        }
    }

    fn store(&self, offset: u32, value: u32) {
        self.regs.borrow_mut().insert(offset, value);
    }
}

impl Default for MockNx2 {
    fn default() -> Self {
        Self::new()
    }
}

impl MmioRegion for MockNx2 {
    fn read32(&self, offset: u32) -> u32 {
        let value = match offset {
            PCI_SWAP_DIAG0 => self.swap_diag.get(),
            CTX_DATA => {
                let address = self.reg(CTX_DATA_ADR);
                self.context_word(address)
            }
            _ => self.reg(offset),
        };
        value | self.sticky.borrow().get(&offset).copied().unwrap_or(0)
    }

    fn write32(&self, offset: u32, value: u32) {
        let mut stored = value & !Self::self_clearing(offset);
        match offset {
            PCICFG_INT_ACK_CMD => self.int_acks.borrow_mut().push(value),
            CTX_DATA => {
                let address = self.reg(CTX_DATA_ADR);
                self.context.borrow_mut().insert(address, value);
            }
            CTX_CTX_CTRL => {
                let address = value & CTX_CTX_CTRL_CTX_ADDR;
                if (value & CTX_CTX_CTRL_WRITE_REQ) != 0 {
                    let data = self.reg(CTX_CTX_DATA);
                    self.context.borrow_mut().insert(address, data);
                }
                if (value & CTX_CTX_CTRL_READ_REQ) != 0 {
                    let data = self.context_word(address);
                    self.store(CTX_CTX_DATA, data);
                }
            }
            CTX_HOST_PAGE_TBL_CTRL if (value & CTX_HOST_PAGE_TBL_CTRL_WRITE_REQ) != 0 => {
                let low = (self.reg(CTX_HOST_PAGE_TBL_DATA0) & !CTX_HOST_PAGE_TBL_DATA0_VALID) as u64;
                let high = self.reg(CTX_HOST_PAGE_TBL_DATA1) as u64;
                self.page_table
                    .borrow_mut()
                    .push((value & !CTX_HOST_PAGE_TBL_CTRL_WRITE_REQ, (high << 32) | low));
            }
            RV2P_PROC1_ADDR_CMD | RV2P_PROC2_ADDR_CMD => {
                let high = self.reg(RV2P_INSTR_HIGH);
                let low = self.reg(RV2P_INSTR_LOW);
                self.rv2p_log.borrow_mut().push((offset, high, low, value));
            }
            EMAC_MDIO_COMM if (value & EMAC_MDIO_COMM_START_BUSY) != 0 => {
                stored = self.mdio(value) & !EMAC_MDIO_COMM_START_BUSY;
            }
            _ => {}
        }
        self.store(offset, stored);
    }

    fn read16(&self, offset: u32) -> u16 {
        self.regs16.borrow().get(&offset).copied().unwrap_or(0)
    }

    fn write16(&self, offset: u32, value: u16) {
        self.regs16.borrow_mut().insert(offset, value);
    }
}

impl PciConfig for MockNx2 {
    fn config_read32(&self, offset: u32) -> u32 {
        if offset == PCICFG_REG_WINDOW {
            return self.indirect(self.config(PCICFG_REG_WINDOW_ADDRESS));
        }
        self.config(offset)
    }

    fn config_write32(&self, offset: u32, value: u32) {
        if offset == PCICFG_REG_WINDOW {
            let address = self.config(PCICFG_REG_WINDOW_ADDRESS);
            self.write_indirect_word(address, value);
            return;
        }
        self.config.borrow_mut().insert(offset, value);
    }

    fn function(&self) -> u8 {
        self.function.get()
    }
}

impl DmaAllocator for MockNx2 {
    fn alloc_coherent(&self, size: usize, align: usize) -> Option<DmaRegion> {
        if self.fail_dma.get() {
            return None;
        }
        let region = IdentityDma.alloc_coherent(size, align)?;
        self.dma_live.set(self.dma_live.get() + 1);
        Some(region)
    }

    unsafe fn free_coherent(&self, region: DmaRegion) {
        self.dma_live.set(self.dma_live.get() - 1);
        // SAFETY: forwarded from the caller; regions come from IdentityDma
        unsafe { IdentityDma.free_coherent(region) };
    }
}

impl Clock for MockNx2 {
    fn timestamp_us(&self) -> u64 {
        self.elapsed_us.get()
    }

    fn delay_us(&self, microseconds: u64) {
        self.elapsed_us.set(self.elapsed_us.get() + microseconds);
    }
}

// ============================================================================
// Packets and Stack
// ============================================================================

/// Transmit packet with caller-chosen segments and no backing bytes
#[derive(Debug, PartialEq)]
pub struct SegmentedPacket {
    pub id: u32,
    pub segments: Vec<DmaSegment>,
    pub offload: TxOffload,
}

impl SegmentedPacket {
    pub fn new(id: u32, segments: &[(u64, u32)]) -> Self {
        Self {
            id,
            segments: segments
                .iter()
                .map(|&(bus_addr, len)| DmaSegment { bus_addr, len })
                .collect(),
            offload: TxOffload::default(),
        }
    }
}

impl NetPacket for SegmentedPacket {
    fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len as usize).sum()
    }

    fn data(&self) -> &[u8] {
        &[]
    }

    fn dma_segments(&self, max_segments: usize, out: &mut Vec<DmaSegment>) {
        if self.segments.len() <= max_segments {
            out.extend_from_slice(&self.segments);
        }
    }

    fn trim(&mut self, _head: usize, _len: usize) -> bool {
        false
    }

    fn tx_offload(&self) -> TxOffload {
        self.offload
    }

    fn set_rx_checksum(&mut self, _mask: ChecksumMask) {}
}

/// Upstream collaborator that records every callback
#[derive(Default)]
pub struct RecordingStack {
    pub delivered: Vec<SkBuff>,
    pub released: Vec<SkBuff>,
    pub links: Vec<LinkStatus>,
    pub media: Vec<Medium>,
    pub allocated: usize,
    pub fail_allocations: bool,
    pub flushes: usize,
    pub output_serviced: usize,
}

impl RecordingStack {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NetStack for RecordingStack {
    type Packet = SkBuff;

    fn allocate_packet(&mut self, size: usize) -> Option<SkBuff> {
        if self.fail_allocations {
            return None;
        }
        let skb = SkBuff::alloc(size).ok()?;
        self.allocated += 1;
        Some(skb)
    }

    fn release_packet(&mut self, packet: SkBuff) {
        self.released.push(packet);
    }

    fn deliver(&mut self, packet: SkBuff) {
        self.delivered.push(packet);
    }

    fn flush_deliveries(&mut self) {
        self.flushes += 1;
    }

    fn link_status(&mut self, status: LinkStatus) {
        self.links.push(status);
    }

    fn publish_media(&mut self, media: &[Medium]) {
        self.media = media.to_vec();
    }

    fn service_output(&mut self) {
        self.output_serviced += 1;
    }
}

/// Write a received frame into a posted buffer the way the RX engine does:
/// `l2_fhdr`, two pad bytes, the frame, then a four byte FCS.
pub fn write_rx_frame(bus_addr: u64, hdr: &L2Fhdr, payload: &[u8]) {
    let base = bus_addr as usize as *mut u8;
    let header = hdr.encode();
    // SAFETY: bus addresses are identity mapped and every posted buffer
    // holds RX_BUF_SIZE bytes, enough for a maximum frame plus FCS
    unsafe {
        core::ptr::copy_nonoverlapping(header.as_ptr(), base, L2_FHDR_SIZE);
        core::ptr::write_bytes(base.add(L2_FHDR_SIZE), 0, RX_OFFSET - L2_FHDR_SIZE);
        core::ptr::copy_nonoverlapping(payload.as_ptr(), base.add(RX_OFFSET), payload.len());
        core::ptr::write_bytes(base.add(RX_OFFSET + payload.len()), 0xFC, 4);
    }
}

/// DMA a status block the way the host coalescing block does: whole 32-bit
/// words, index0 in the upper half of each shared word.
pub fn write_status_block(buffer: &DmaBuffer, sb: &StatusBlock) {
    buffer.write32(0x00, sb.attn_bits);
    buffer.write32(0x04, sb.attn_bits_ack);
    buffer.write32(0x08, (sb.tx_cons as u32) << 16);
    buffer.write32(0x10, (sb.rx_cons as u32) << 16);
    buffer.write32(0x30, ((sb.completion_prod as u32) << 16) | sb.cmd_cons as u32);
    buffer.write32(0x34, (sb.status_idx as u32) << 16);
}
