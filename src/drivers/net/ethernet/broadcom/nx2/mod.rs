//! Broadcom NetXtreme II (BCM5706/5708/5709/5716) Gigabit Ethernet Driver
//!
//! The NX2 is a PCI controller whose packet pipeline runs on embedded
//! processors. The driver loads their firmware, negotiates every reset with
//! the on-chip bootcode, and then talks to the pipeline through two
//! descriptor rings and a status block the chip DMAs into host memory.
//!
//! # Lifecycle
//!
//! ```text
//! Unprepared ─prepare─▶ Prepared ─reset─▶ Reset ─init chip─▶ ChipInitialized
//!                                           ▲                      │
//!                                           │                  init rings
//!                                      bring_up                    ▼
//!                                           │                 RingsReady
//!                                       Disabled ◀─bring_down─ Enabled ◀─PHY─┘
//! ```
//!
//! - Prepare: identify the chip, find shared memory, allocate DMA memory
//! - Reset: quiesce DMA, reset the core between WAIT0 and WAIT1 handshakes
//! - Init chip: DMA configuration, context memory, firmware, coalescing, MAC
//!   address, receive filter, WAIT2 handshake
//! - Init rings: TX/RX contexts, receive buffers posted, interrupts enabled
//! - PHY: reset, auto-MDIX, autonegotiation, first link report
//!
//! A failure after reset quiesces the chip, returns ring buffers and
//! leaves the controller `Disabled`. `initialize` on a running controller
//! brings it down first.
//!
//! # Interrupts
//!
//! One interrupt source. Each interrupt masks, reads the status block, runs
//! the link handler if the link attention bit changed, reclaims TX and
//! completes RX if their consumer indices moved, then unmasks with the
//! status index it consumed.
//!
//! # Locking
//!
//! `send` and the interrupt path both take `&self`. Each ring sits behind
//! its own spin lock, and neither the TX lock nor the interrupt state lock
//! is held across a stack callback.
//!
//! # References
//!
//! - Linux: drivers/net/ethernet/broadcom/bnx2.c
//! - Broadcom NetXtreme II Programmer's Reference Guide

pub mod chip;
pub mod context;
pub mod cpu;
pub mod dma;
pub mod firmware;
pub mod mailbox;
pub mod mmio;
pub mod phy;
pub mod regs;
pub mod ring;
pub mod rx;
pub mod status;
pub mod tx;

#[cfg(test)]
pub(crate) mod testing;

use crate::drivers::clocksource::Clock;
use crate::drivers::net::netdev::{
    DuplexMode, LinkStatus, NetPacket, NetStack, NetworkDevice, NetworkError, TxError,
};
use crate::drivers::pci::{self, PciConfig, PciIds};
use crate::net::ethernet::MacAddress;
use alloc::vec::Vec;
use chip::{ChipId, ChipModel};
use context::{CTX_PAGE_COUNT, ContextError, ContextMode};
use core::fmt;
use cpu::{CPU_REG_COM, CPU_REG_CP, CPU_REG_RXP, CPU_REG_TPAT, CPU_REG_TXP, Rv2pProcessor};
use dma::{DMA_PAGE_SIZE, DmaAllocator, DmaBuffer, DmaError};
use firmware::{FirmwareError, MipsFirmware, Nx2Firmware, Rv2pFirmware};
use mailbox::{FirmwareSync, MailboxError, ResetCode};
use mmio::{DeviceRegisters, MmioRegion};
use phy::{MEDIA, Phy, PhyError, PhyMediaState};
use regs::*;
use ring::{BD_PAGE_SIZE, BdPage, normalize_cons};
use rx::{MAX_FRAME_SIZE, RxFillError, RxRing};
use spin::Mutex;
use status::StatusBlock;
use tx::TxRing;

/// Everything the controller needs from its host
pub trait Nx2Host: MmioRegion + PciConfig + DmaAllocator + Clock {}

impl<T: MmioRegion + PciConfig + DmaAllocator + Clock> Nx2Host for T {}

// ============================================================================
// Tuning
// ============================================================================

/// Interrupt coalescing defaults, in microseconds and completions
pub const TX_COAL_TICKS: u16 = 80;
pub const TX_QUICK_CONS_TRIP: u16 = 20;
pub const RX_COAL_TICKS: u16 = 18;
pub const RX_QUICK_CONS_TRIP: u16 = 6;

/// log2 of the descriptor ring page
const BD_PAGE_BITS: u32 = 14;

/// Descriptors the TBDR prefetches
const TBDR_MAX_BDS: u32 = 0x40;

/// Receive BD prefetch count in the RX context
const RX_BD_PRE_READ: u32 = 0x02;

/// 5706/5708 core reset request polling
const CORE_RESET_POLLS: u32 = 10;
const CORE_RESET_POLL_US: u64 = 10;

/// 5709 software reset settle time
const SW_RESET_DELAY_MS: u64 = 50;

/// Runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nx2Config {
    pub tx_ticks: u16,
    pub tx_quick_cons_trip: u16,
    pub rx_ticks: u16,
    pub rx_quick_cons_trip: u16,
    pub promiscuous: bool,
    pub all_multicast: bool,
    /// Advertise symmetric and asymmetric pause
    pub flow_control: bool,
    pub phy_addr: u32,
}

impl Default for Nx2Config {
    fn default() -> Self {
        Self {
            tx_ticks: TX_COAL_TICKS,
            tx_quick_cons_trip: TX_QUICK_CONS_TRIP,
            rx_ticks: RX_COAL_TICKS,
            rx_quick_cons_trip: RX_QUICK_CONS_TRIP,
            promiscuous: false,
            all_multicast: false,
            flow_control: false,
            phy_addr: phy::DEFAULT_PHY_ADDR,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nx2Error {
    /// Not a NetXtreme II function
    UnsupportedDevice,
    /// Pre-production or unknown silicon (raw MISC_ID)
    UnsupportedRevision(u32),
    /// Shared memory signature present but the base is unusable
    SharedMemoryUnavailable,
    /// Bootcode did not acknowledge a mailbox message
    FirmwareSyncTimeout,
    /// Core reset request never completed
    ResetTimeout,
    /// PCI_SWAP_DIAG0 read back something other than the pattern
    SwapDiagnosticMismatch(u32),
    ContextInitTimeout,
    ContextPageTimeout(usize),
    ContextAccessTimeout,
    Firmware(FirmwareError),
    DmaAllocationFailed,
    /// Operation not valid in the current controller state
    InvalidState,
    PhyTimeout,
}

impl fmt::Display for Nx2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Nx2Error::UnsupportedDevice => write!(f, "not a NetXtreme II device"),
            Nx2Error::UnsupportedRevision(id) => write!(f, "unsupported chip id {:#010x}", id),
            Nx2Error::SharedMemoryUnavailable => write!(f, "shared memory base unavailable"),
            Nx2Error::FirmwareSyncTimeout => write!(f, "bootcode handshake timed out"),
            Nx2Error::ResetTimeout => write!(f, "core reset timed out"),
            Nx2Error::SwapDiagnosticMismatch(value) => {
                write!(f, "swap diagnostic read {:#010x}", value)
            }
            Nx2Error::ContextInitTimeout => write!(f, "context memory init timed out"),
            Nx2Error::ContextPageTimeout(page) => write!(f, "context page {} not accepted", page),
            Nx2Error::ContextAccessTimeout => write!(f, "context access timed out"),
            Nx2Error::Firmware(err) => write!(f, "bad firmware image: {}", err),
            Nx2Error::DmaAllocationFailed => write!(f, "DMA allocation failed"),
            Nx2Error::InvalidState => write!(f, "invalid controller state"),
            Nx2Error::PhyTimeout => write!(f, "PHY access timed out"),
        }
    }
}

impl From<MailboxError> for Nx2Error {
    fn from(_: MailboxError) -> Self {
        Nx2Error::FirmwareSyncTimeout
    }
}

impl From<ContextError> for Nx2Error {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::MemInitTimeout => Nx2Error::ContextInitTimeout,
            ContextError::PageWriteTimeout { page } => Nx2Error::ContextPageTimeout(page),
            ContextError::AccessTimeout { .. } => Nx2Error::ContextAccessTimeout,
        }
    }
}

impl From<FirmwareError> for Nx2Error {
    fn from(err: FirmwareError) -> Self {
        Nx2Error::Firmware(err)
    }
}

impl From<DmaError> for Nx2Error {
    fn from(_: DmaError) -> Self {
        Nx2Error::DmaAllocationFailed
    }
}

impl From<PhyError> for Nx2Error {
    fn from(_: PhyError) -> Self {
        Nx2Error::PhyTimeout
    }
}

impl From<RxFillError> for Nx2Error {
    fn from(_: RxFillError) -> Self {
        Nx2Error::DmaAllocationFailed
    }
}

impl From<Nx2Error> for NetworkError {
    fn from(err: Nx2Error) -> Self {
        match err {
            Nx2Error::UnsupportedDevice | Nx2Error::UnsupportedRevision(_) => {
                NetworkError::HardwareNotPresent
            }
            Nx2Error::FirmwareSyncTimeout
            | Nx2Error::ResetTimeout
            | Nx2Error::ContextInitTimeout
            | Nx2Error::ContextPageTimeout(_)
            | Nx2Error::ContextAccessTimeout
            | Nx2Error::PhyTimeout => NetworkError::Timeout,
            Nx2Error::Firmware(_) => NetworkError::InvalidConfiguration,
            Nx2Error::InvalidState => NetworkError::NotInitialized,
            Nx2Error::SharedMemoryUnavailable
            | Nx2Error::SwapDiagnosticMismatch(_)
            | Nx2Error::DmaAllocationFailed => NetworkError::HardwareError,
        }
    }
}

// ============================================================================
// Controller State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Unprepared,
    Prepared,
    Reset,
    ChipInitialized,
    RingsReady,
    Enabled,
    Disabled,
}

/// Driver-side counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nx2Stats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_stalls: u64,
    pub tx_unmappable: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_errors: u64,
    pub rx_oversize: u64,
    pub rx_refill_failures: u64,
}

/// DMA memory owned for the controller's operational life
struct Resources<P> {
    status: DmaBuffer,
    statistics: DmaBuffer,
    context: Vec<DmaBuffer>,
    tx: Mutex<TxRing<P>>,
    rx: Mutex<RxRing<P>>,
}

/// Buffers allocated so far; released on drop unless taken
struct Allocation<'a, H: Nx2Host> {
    host: &'a H,
    held: Vec<DmaBuffer>,
}

impl<'a, H: Nx2Host> Allocation<'a, H> {
    fn push(&mut self, size: usize) -> Result<(), DmaError> {
        self.held.push(DmaBuffer::allocate(self.host, size)?);
        Ok(())
    }

    fn take(mut self) -> Vec<DmaBuffer> {
        core::mem::take(&mut self.held)
    }
}

impl<H: Nx2Host> Drop for Allocation<'_, H> {
    fn drop(&mut self) {
        for buffer in self.held.drain(..) {
            // SAFETY: nothing has been handed to the device yet
            unsafe { buffer.release(self.host) };
        }
    }
}

impl<P: NetPacket> Resources<P> {
    fn allocate<H: Nx2Host>(host: &H, context_pages: usize) -> Result<Self, DmaError> {
        let mut allocation = Allocation {
            host,
            held: Vec::with_capacity(4 + context_pages),
        };
        allocation.push(DMA_PAGE_SIZE)?;
        allocation.push(DMA_PAGE_SIZE)?;
        allocation.push(BD_PAGE_SIZE)?;
        allocation.push(BD_PAGE_SIZE)?;
        for _ in 0..context_pages {
            allocation.push(DMA_PAGE_SIZE)?;
        }

        let mut buffers = allocation.take().into_iter();
        let (Some(status), Some(statistics), Some(tx), Some(rx)) =
            (buffers.next(), buffers.next(), buffers.next(), buffers.next())
        else {
            return Err(DmaError::AllocationFailed { size: 0 });
        };

        Ok(Self {
            status,
            statistics,
            context: buffers.collect(),
            tx: Mutex::new(TxRing::new(BdPage::new(tx))),
            rx: Mutex::new(RxRing::new(BdPage::new(rx))),
        })
    }

    /// Hand every packet still on a ring to `released`
    fn drain(&self, released: &mut Vec<P>) {
        let mut tx = self.tx.lock();
        tx.drain(released);
        tx.reset();
        drop(tx);

        let mut rx = self.rx.lock();
        rx.drain(released);
        rx.reset();
    }

    /// # Safety
    ///
    /// The device must have been reset or quiesced.
    unsafe fn release<H: Nx2Host>(self, host: &H) {
        let tx = self.tx.into_inner().into_page().into_buffer();
        let rx = self.rx.into_inner().into_page().into_buffer();
        // SAFETY: caller guarantees the device no longer references these
        unsafe {
            self.status.release(host);
            self.statistics.release(host);
            tx.release(host);
            rx.release(host);
            for page in self.context {
                page.release(host);
            }
        }
    }
}

/// State owned by the interrupt path
struct InterruptState<P> {
    last_status_idx: u16,
    media: PhyMediaState,
    released: Vec<P>,
}

// ============================================================================
// NX2 Controller
// ============================================================================

pub struct Nx2Controller<'fw, H: Nx2Host, P: NetPacket> {
    regs: DeviceRegisters<H>,
    firmware: Nx2Firmware<'fw>,
    config: Nx2Config,
    state: ControllerState,
    chip_id: ChipId,
    model: Option<ChipModel>,
    mac: MacAddress,
    sync: FirmwareSync,
    phy: Phy,
    resources: Option<Resources<P>>,
    irq: Mutex<InterruptState<P>>,
}

impl<'fw, H: Nx2Host, P: NetPacket> Nx2Controller<'fw, H, P> {
    pub fn new(host: H, firmware: Nx2Firmware<'fw>, config: Nx2Config) -> Self {
        Self {
            regs: DeviceRegisters::new(host),
            firmware,
            config,
            state: ControllerState::Unprepared,
            chip_id: ChipId::from_misc_id(0),
            model: None,
            mac: MacAddress::zero(),
            sync: FirmwareSync::new(),
            phy: Phy::new(config.phy_addr),
            resources: None,
            irq: Mutex::new(InterruptState {
                last_status_idx: 0,
                media: PhyMediaState::unknown(),
                released: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn chip_id(&self) -> ChipId {
        self.chip_id
    }

    pub fn model(&self) -> Option<ChipModel> {
        self.model
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn config(&self) -> &Nx2Config {
        &self.config
    }

    pub fn registers(&self) -> &DeviceRegisters<H> {
        &self.regs
    }

    /// Most recent PHY state seen by the link handler
    pub fn media_state(&self) -> PhyMediaState {
        self.irq.lock().media
    }

    fn context_mode(&self) -> ContextMode {
        if self.chip_id.is_5709() {
            ContextMode::HostPaged
        } else {
            ContextMode::OnChip
        }
    }

    fn resources(&self) -> Result<&Resources<P>, Nx2Error> {
        self.resources.as_ref().ok_or(Nx2Error::InvalidState)
    }

    // ========================================================================
    // Bring-Up
    // ========================================================================

    /// Identify the chip, locate shared memory and allocate DMA memory
    pub fn prepare_controller(&mut self) -> Result<(), Nx2Error> {
        if self.state != ControllerState::Unprepared {
            return Err(Nx2Error::InvalidState);
        }

        let host = self.regs.host();
        let ids = PciIds::read(host);
        let model = ChipModel::lookup(&ids).ok_or_else(|| {
            log::error!(
                "[NX2] Device {:04x}:{:04x} is not supported",
                ids.vendor,
                ids.device
            );
            Nx2Error::UnsupportedDevice
        })?;

        // Indirect window and mailbox word swap before touching shared memory
        host.config_write32(
            PCICFG_MISC_CONFIG,
            PCICFG_MISC_CONFIG_REG_WINDOW_ENA | PCICFG_MISC_CONFIG_TARGET_MB_WORD_SWAP,
        );

        let chip_id = ChipId::from_misc_id(self.regs.read32(MISC_ID));
        if !chip_id.is_supported() {
            log::error!("[NX2] Chip id {:#010x} is not supported", chip_id.raw());
            return Err(Nx2Error::UnsupportedRevision(chip_id.raw()));
        }
        self.chip_id = chip_id;
        self.model = Some(model);
        log::info!(
            "[NX2] {} {} (BCM{}, subsystem {:04x}:{:04x})",
            model.vendor,
            model.model,
            chip_id,
            ids.subsystem_vendor,
            ids.subsystem
        );

        pci::enable_bus_master(self.regs.host());
        self.locate_shared_memory()?;

        let context_pages = if chip_id.is_5709() { CTX_PAGE_COUNT } else { 0 };
        let resources = Resources::allocate(self.regs.host(), context_pages).inspect_err(|err| {
            log::error!("[NX2] {}", err);
        })?;
        self.resources = Some(resources);

        self.state = ControllerState::Prepared;
        Ok(())
    }

    fn locate_shared_memory(&mut self) -> Result<(), Nx2Error> {
        let signature = self.regs.read_indirect(SHM_HDR_SIGNATURE);
        let base = if (signature & SHM_HDR_SIGNATURE_SIG_MASK) == SHM_HDR_SIGNATURE_SIG {
            let function = self.regs.host().function() as u32;
            let base = self.regs.read_indirect(SHM_HDR_ADDR_0 + (function << 2));
            if base == 0 || base == u32::MAX {
                log::error!("[NX2] Shared memory base {:#x} for function {}", base, function);
                return Err(Nx2Error::SharedMemoryUnavailable);
            }
            base
        } else {
            HOST_VIEW_SHMEM_BASE
        };

        log::debug!("[NX2] Shared memory at {:#x}", base);
        self.regs.set_shmem_base(base);
        Ok(())
    }

    /// Reset the core between the WAIT0 and WAIT1 bootcode handshakes
    pub fn reset_controller(&mut self, code: ResetCode) -> Result<(), Nx2Error> {
        if self.state == ControllerState::Unprepared {
            return Err(Nx2Error::InvalidState);
        }

        self.regs.write32(
            MISC_ENABLE_CLR_BITS,
            MISC_ENABLE_TX_DMA | MISC_ENABLE_DMA_ENGINE | MISC_ENABLE_RX_DMA | MISC_ENABLE_HOST_COALESCE,
        );
        self.regs.read32(MISC_ENABLE_CLR_BITS);
        self.regs.delay_us(10);

        if self.chip_id.is_5709() {
            self.regs.clear_bits32(MISC_NEW_CORE_CTL, MISC_NEW_CORE_CTL_DMA_ENABLE);
        }

        self.sync.sync(&self.regs, DRV_MSG_DATA_WAIT0 | code.bits())?;

        // Tells the bootcode this is a driver reset, not a power cycle
        self.regs.shmem_write(DRV_RESET_SIGNATURE, DRV_RESET_SIGNATURE_MAGIC);
        self.regs.read32(MISC_ID);

        if self.chip_id.is_5709() {
            self.regs.write32(MISC_COMMAND, MISC_COMMAND_SW_RESET);
            self.regs.read32(MISC_COMMAND);
            self.regs.delay_ms(SW_RESET_DELAY_MS);
            self.regs.host().config_write32(
                PCICFG_MISC_CONFIG,
                PCICFG_MISC_CONFIG_REG_WINDOW_ENA | PCICFG_MISC_CONFIG_TARGET_MB_WORD_SWAP,
            );
        } else {
            self.regs.write32(
                PCICFG_MISC_CONFIG,
                PCICFG_MISC_CONFIG_CORE_RST_REQ
                    | PCICFG_MISC_CONFIG_REG_WINDOW_ENA
                    | PCICFG_MISC_CONFIG_TARGET_MB_WORD_SWAP,
            );
            let busy = PCICFG_MISC_CONFIG_CORE_RST_REQ | PCICFG_MISC_CONFIG_CORE_RST_BSY;
            let mut done = false;
            for _ in 0..CORE_RESET_POLLS {
                if (self.regs.read32(PCICFG_MISC_CONFIG) & busy) == 0 {
                    done = true;
                    break;
                }
                self.regs.delay_us(CORE_RESET_POLL_US);
            }
            if !done {
                log::error!("[NX2] Core reset did not complete");
                return Err(Nx2Error::ResetTimeout);
            }
        }

        let swap = self.regs.read32(PCI_SWAP_DIAG0);
        if swap != SWAP_DIAG0_PATTERN {
            log::error!("[NX2] Swap diagnostic read {:#010x} after reset", swap);
            return Err(Nx2Error::SwapDiagnosticMismatch(swap));
        }

        self.sync.sync(&self.regs, DRV_MSG_DATA_WAIT1 | code.bits())?;

        self.state = ControllerState::Reset;
        Ok(())
    }

    /// Program the chip after reset: DMA, context memory, firmware,
    /// coalescing, MAC address and receive filter
    fn init_chip(&mut self) -> Result<(), Nx2Error> {
        if self.state != ControllerState::Reset {
            return Err(Nx2Error::InvalidState);
        }

        self.regs.write32(PCICFG_INT_ACK_CMD, PCICFG_INT_ACK_CMD_MASK_INT);
        self.regs
            .shmem_write(DRV_PULSE_MB, DRV_MSG_DATA_PULSE_CODE_ALWAYS_ALIVE);

        let dma_config = DMA_CONFIG_DATA_BYTE_SWAP
            | DMA_CONFIG_DATA_WORD_SWAP
            | DMA_CONFIG_CNTL_WORD_SWAP
            | (DMA_READ_CHANS << DMA_CONFIG_READ_CHANS_SHIFT)
            | (DMA_WRITE_CHANS << DMA_CONFIG_WRITE_CHANS_SHIFT)
            | (0x2 << 20)
            | DMA_CONFIG_CNTL_PCI_COMP_DLY;
        self.regs.write32(DMA_CONFIG, dma_config);

        self.regs.write32(
            MISC_ENABLE_SET_BITS,
            MISC_ENABLE_HOST_COALESCE | MISC_ENABLE_RX_V2P | MISC_ENABLE_CONTEXT,
        );

        if self.context_mode() == ContextMode::HostPaged {
            let resources = self.resources()?;
            for page in &resources.context {
                page.zero();
            }
            context::init_host_context(&self.regs, &resources.context)?;
        }

        self.load_firmware()?;
        self.init_tx_rx_regs();
        self.fetch_mac();

        let resources = self.resources()?;
        self.regs.write32(HC_STATUS_ADDR_L, resources.status.bus_addr_lo());
        self.regs.write32(HC_STATUS_ADDR_H, resources.status.bus_addr_hi());
        self.regs
            .write32(HC_STATISTICS_ADDR_L, resources.statistics.bus_addr_lo());
        self.regs
            .write32(HC_STATISTICS_ADDR_H, resources.statistics.bus_addr_hi());

        self.program_mac_match();
        self.program_rx_filter();

        if self.chip_id.is_5709() {
            self.regs.set_bits32(MISC_NEW_CORE_CTL, MISC_NEW_CORE_CTL_DMA_ENABLE);
        }
        let enable = if self.chip_id.is_5709() {
            MISC_ENABLE_DEFAULT_XI
        } else {
            MISC_ENABLE_DEFAULT
        };
        self.regs.write32(MISC_ENABLE_SET_BITS, enable);
        self.regs.read32(MISC_ENABLE_SET_BITS);
        self.regs.delay_us(20);

        self.sync
            .sync(&self.regs, DRV_MSG_DATA_WAIT2 | ResetCode::Reset.bits())?;

        self.state = ControllerState::ChipInitialized;
        Ok(())
    }

    fn load_firmware(&self) -> Result<(), Nx2Error> {
        let rv2p = Rv2pFirmware::parse(self.firmware.rv2p)?;
        let mips = MipsFirmware::parse(self.firmware.mips)?;

        cpu::load_rv2p(&self.regs, Rv2pProcessor::Proc1, &rv2p.proc1);
        cpu::load_rv2p(&self.regs, Rv2pProcessor::Proc2, &rv2p.proc2);

        cpu::load_cpu(&self.regs, &CPU_REG_RXP, &mips.rxp);
        cpu::load_cpu(&self.regs, &CPU_REG_TXP, &mips.txp);
        cpu::load_cpu(&self.regs, &CPU_REG_TPAT, &mips.tpat);
        cpu::load_cpu(&self.regs, &CPU_REG_COM, &mips.com);
        cpu::load_cpu(&self.regs, &CPU_REG_CP, &mips.cp);

        log::info!("[NX2] Firmware loaded");
        Ok(())
    }

    /// TBDR page size, mailbox queue arm and interrupt coalescing
    pub fn init_tx_rx_regs(&self) {
        let mut tbdr = self.regs.read32(TBDR_CONFIG) & !(TBDR_CONFIG_PAGE_SIZE | TBDR_CONFIG_MAX_BDS);
        tbdr |= ((BD_PAGE_BITS - 8) << TBDR_CONFIG_PAGE_SIZE_SHIFT) | TBDR_MAX_BDS;
        self.regs.write32(TBDR_CONFIG, tbdr);

        self.regs.set_bits32(MQ_MAP_L2_5, MQ_MAP_L2_5_ARM);

        let pair = |value: u16| ((value as u32) << 16) | value as u32;
        self.regs
            .write32(HC_TX_QUICK_CONS_TRIP, pair(self.config.tx_quick_cons_trip));
        self.regs
            .write32(HC_RX_QUICK_CONS_TRIP, pair(self.config.rx_quick_cons_trip));
        self.regs.write32(HC_TX_TICKS, pair(self.config.tx_ticks));
        self.regs.write32(HC_RX_TICKS, pair(self.config.rx_ticks));
    }

    /// Read the port MAC address the bootcode keeps in shared memory
    pub fn fetch_mac(&mut self) -> MacAddress {
        let upper = self.regs.shmem_read(PORT_HW_CFG_MAC_UPPER);
        let lower = self.regs.shmem_read(PORT_HW_CFG_MAC_LOWER);
        self.mac = MacAddress::from_words(upper, lower);
        if self.mac.is_valid_station() {
            log::info!("[NX2] MAC address {}", self.mac);
        } else {
            log::warn!("[NX2] Bootcode reports unusable MAC address {}", self.mac);
        }
        self.mac
    }

    fn program_mac_match(&self) {
        let (match0, match1) = self.mac.to_words();
        self.regs.write32(EMAC_MAC_MATCH0, match0);
        self.regs.write32(EMAC_MAC_MATCH1, match1);
    }

    /// EMAC receive mode, multicast hash and RPM sort rule 0
    fn program_rx_filter(&self) {
        let mut rx_mode = self.regs.read32(EMAC_RX_MODE)
            & !(EMAC_RX_MODE_PROMISCUOUS | EMAC_RX_MODE_KEEP_VLAN_TAG);
        rx_mode |= EMAC_RX_MODE_KEEP_VLAN_TAG;

        // Rule 0 matches MAC_MATCH0/1 and broadcast
        let mut sort = 1 | RPM_SORT_USER0_BC_EN;
        if self.config.promiscuous {
            rx_mode |= EMAC_RX_MODE_PROMISCUOUS;
            sort |= RPM_SORT_USER0_PROM_EN;
        }

        let hash = if self.config.all_multicast || self.config.promiscuous {
            sort |= RPM_SORT_USER0_MC_EN;
            0xFFFF_FFFF
        } else {
            0
        };
        for i in 0..EMAC_MULTICAST_HASH_COUNT {
            self.regs.write32(EMAC_MULTICAST_HASH0 + 4 * i, hash);
        }

        self.regs.write32(EMAC_RX_MODE, rx_mode);
        self.regs.write32(RPM_SORT_USER0, 0);
        self.regs.write32(RPM_SORT_USER0, sort);
        self.regs.write32(RPM_SORT_USER0, sort | RPM_SORT_USER0_ENA);
    }

    /// Tell the chip where the TX ring lives
    pub fn init_tx_context(&self) -> Result<(), Nx2Error> {
        let (type_offset, cmd_offset, hi_offset, lo_offset) = if self.chip_id.is_5709() {
            (
                L2CTX_TX_TYPE_XI,
                L2CTX_TX_CMD_TYPE_XI,
                L2CTX_TX_TBDR_BHADDR_HI_XI,
                L2CTX_TX_TBDR_BHADDR_LO_XI,
            )
        } else {
            (
                L2CTX_TX_TYPE,
                L2CTX_TX_CMD_TYPE,
                L2CTX_TX_TBDR_BHADDR_HI,
                L2CTX_TX_TBDR_BHADDR_LO,
            )
        };

        let mode = self.context_mode();
        let tx = self.resources()?.tx.lock();
        let page = tx.page();
        context::write_context32(
            &self.regs,
            mode,
            TX_CID,
            type_offset,
            L2CTX_TX_TYPE_TYPE_L2 | L2CTX_TX_TYPE_SIZE_L2,
        )?;
        context::write_context32(
            &self.regs,
            mode,
            TX_CID,
            cmd_offset,
            L2CTX_TX_CMD_TYPE_TYPE_L2 | (8 << L2CTX_TX_CMD_TYPE_NBDS_SHIFT),
        )?;
        context::write_context32(&self.regs, mode, TX_CID, hi_offset, page.bus_addr_hi())?;
        context::write_context32(&self.regs, mode, TX_CID, lo_offset, page.bus_addr_lo())?;
        Ok(())
    }

    /// Tell the chip where the RX ring lives
    pub fn init_rx_context(&self) -> Result<(), Nx2Error> {
        let mode = self.context_mode();
        let rx = self.resources()?.rx.lock();
        let page = rx.page();
        context::write_context32(
            &self.regs,
            mode,
            RX_CID,
            L2CTX_RX_CTX_TYPE,
            L2CTX_RX_CTX_TYPE_BD_CHAIN_VALUE
                | L2CTX_RX_CTX_TYPE_SIZE_L2
                | (RX_BD_PRE_READ << L2CTX_RX_BD_PRE_READ_SHIFT),
        )?;
        context::write_context32(
            &self.regs,
            mode,
            RX_CID,
            L2CTX_RX_NX_BDHADDR_HI,
            page.bus_addr_hi(),
        )?;
        context::write_context32(
            &self.regs,
            mode,
            RX_CID,
            L2CTX_RX_NX_BDHADDR_LO,
            page.bus_addr_lo(),
        )?;
        Ok(())
    }

    fn init_rings<S: NetStack<Packet = P>>(&mut self, stack: &mut S) -> Result<(), Nx2Error> {
        if self.state != ControllerState::ChipInitialized {
            return Err(Nx2Error::InvalidState);
        }

        self.init_tx_context()?;
        self.init_rx_context()?;

        // The core was just reset, so nothing left on either ring is live
        self.release_ring_packets(stack);

        let mut rx = self.resources()?.rx.lock();
        if let Err(err) = rx.fill(stack) {
            log::error!("[NX2] Could not post receive buffers: {:?}", err);
            let mut posted = Vec::new();
            rx.drain(&mut posted);
            rx.reset();
            for packet in posted {
                stack.release_packet(packet);
            }
            return Err(err.into());
        }
        rx.publish(&self.regs);
        drop(rx);

        self.state = ControllerState::RingsReady;
        Ok(())
    }

    fn enable_interrupts(&self) {
        let idx = self.irq.lock().last_status_idx as u32;
        self.regs.write32(
            PCICFG_INT_ACK_CMD,
            PCICFG_INT_ACK_CMD_INDEX_VALID | PCICFG_INT_ACK_CMD_MASK_INT | idx,
        );
        self.regs
            .write32(PCICFG_INT_ACK_CMD, PCICFG_INT_ACK_CMD_INDEX_VALID | idx);
        self.regs.set_bits32(HC_COMMAND, HC_COMMAND_COAL_NOW);
    }

    fn disable_interrupts(&self) {
        self.regs
            .write32(PCICFG_INT_ACK_CMD, PCICFG_INT_ACK_CMD_MASK_INT);
        self.regs.read32(PCICFG_INT_ACK_CMD);
    }

    fn init_phy<S: NetStack<Packet = P>>(&mut self, stack: &mut S) -> Result<(), Nx2Error> {
        self.phy.probe(&self.regs)?;
        self.phy.reset(&self.regs)?;
        self.phy.enable_auto_mdix(&self.regs)?;
        self.phy.autonegotiate(&self.regs, self.config.flow_control)?;

        self.regs.write32(EMAC_ATTENTION_ENA, EMAC_ATTENTION_ENA_LINK);
        stack.publish_media(&MEDIA);
        let media = self.read_media_state();
        self.irq.lock().media = media;
        stack.link_status(media.link_status());
        Ok(())
    }

    /// Read the PHY and match the MAC to it
    fn read_media_state(&self) -> PhyMediaState {
        let media = self.phy.media_state(&self.regs).unwrap_or_else(|err| {
            log::warn!("[NX2] Could not read link state: {}", err);
            PhyMediaState::unknown()
        });
        phy::apply_emac_mode(&self.regs, &media);

        if media.link_up && media.medium.is_some() {
            log::info!(
                "[NX2] Link is up at {} Mbps, {} duplex",
                media.speed.mbps(),
                if media.duplex == DuplexMode::Full {
                    "full"
                } else {
                    "half"
                }
            );
        } else {
            log::info!("[NX2] Link is down");
        }
        media
    }

    /// Everything after a successful reset, up to accepting traffic.
    ///
    /// On failure the chip is quiesced, ring buffers go back to the stack
    /// and the controller is left `Disabled` for `bring_up` to retry.
    pub fn init_controller_chip<S: NetStack<Packet = P>>(
        &mut self,
        stack: &mut S,
    ) -> Result<(), Nx2Error> {
        if let Err(err) = self.start_chip(stack) {
            log::error!("[NX2] Chip initialization failed: {}", err);
            self.abort_init(stack);
            return Err(err);
        }
        self.state = ControllerState::Enabled;
        log::info!("[NX2] Initialization complete");
        Ok(())
    }

    fn start_chip<S: NetStack<Packet = P>>(&mut self, stack: &mut S) -> Result<(), Nx2Error> {
        self.init_chip()?;
        self.init_rings(stack)?;
        self.enable_interrupts();
        self.init_phy(stack)
    }

    fn abort_init<S: NetStack<Packet = P>>(&mut self, stack: &mut S) {
        self.disable_interrupts();
        self.quiesce();
        self.release_ring_packets(stack);

        let mut irq = self.irq.lock();
        irq.media = PhyMediaState::unknown();
        irq.last_status_idx = 0;
        drop(irq);

        if self.resources.is_some() {
            self.state = ControllerState::Disabled;
        }
    }

    /// Prepare, reset and initialize. A running controller is brought down
    /// first.
    pub fn initialize<S: NetStack<Packet = P>>(&mut self, stack: &mut S) -> Result<(), Nx2Error> {
        match self.state {
            ControllerState::Unprepared => self.prepare_controller()?,
            ControllerState::Prepared | ControllerState::Disabled => {}
            _ => self.bring_down(stack),
        }
        self.reset_controller(ResetCode::Reset)?;
        self.init_controller_chip(stack)
    }

    /// Re-enable after `bring_down`, keeping DMA allocations
    pub fn bring_up<S: NetStack<Packet = P>>(&mut self, stack: &mut S) -> Result<(), Nx2Error> {
        match self.state {
            ControllerState::Enabled => Ok(()),
            ControllerState::Disabled | ControllerState::Prepared => {
                self.reset_controller(ResetCode::Reset)?;
                self.init_controller_chip(stack)
            }
            _ => Err(Nx2Error::InvalidState),
        }
    }

    /// Stop traffic and return ring buffers to the stack
    pub fn bring_down<S: NetStack<Packet = P>>(&mut self, stack: &mut S) {
        if self.state == ControllerState::Unprepared || self.state == ControllerState::Disabled {
            return;
        }

        self.disable_interrupts();
        if let Err(err) = self.reset_controller(ResetCode::Unload) {
            log::error!("[NX2] Reset on bring down failed: {}", err);
        }
        self.release_ring_packets(stack);

        // Status index restarts from zero after a core reset
        let mut irq = self.irq.lock();
        irq.media = PhyMediaState::unknown();
        irq.last_status_idx = 0;
        drop(irq);
        stack.link_status(LinkStatus::down());

        self.state = ControllerState::Disabled;
    }

    /// Reset for driver detach and free every DMA buffer
    pub fn shutdown<S: NetStack<Packet = P>>(&mut self, stack: &mut S) {
        if self.state == ControllerState::Unprepared {
            return;
        }

        self.disable_interrupts();
        if let Err(err) = self.reset_controller(ResetCode::Shutdown) {
            log::error!("[NX2] Reset on shutdown failed: {}", err);
            self.quiesce();
        }
        self.release_ring_packets(stack);
        if let Some(resources) = self.resources.take() {
            // SAFETY: the chip was reset or its DMA engines disabled above
            unsafe { resources.release(self.regs.host()) };
        }
        self.state = ControllerState::Unprepared;
    }

    fn release_ring_packets<S: NetStack<Packet = P>>(&self, stack: &mut S) {
        let Some(resources) = self.resources.as_ref() else {
            return;
        };
        let mut released = Vec::new();
        resources.drain(&mut released);
        for packet in released {
            stack.release_packet(packet);
        }
    }

    /// Stop every DMA engine without a bootcode handshake
    fn quiesce(&self) {
        self.regs.write32(
            MISC_ENABLE_CLR_BITS,
            MISC_ENABLE_TX_DMA | MISC_ENABLE_DMA_ENGINE | MISC_ENABLE_RX_DMA | MISC_ENABLE_HOST_COALESCE,
        );
        self.regs.read32(MISC_ENABLE_CLR_BITS);
        self.regs.delay_us(10);
    }

    // ========================================================================
    // Receive Filter
    // ========================================================================

    pub fn set_promiscuous(&mut self, enabled: bool) {
        self.config.promiscuous = enabled;
        if self.filter_programmed() {
            self.program_rx_filter();
        }
    }

    pub fn set_all_multicast(&mut self, enabled: bool) {
        self.config.all_multicast = enabled;
        if self.filter_programmed() {
            self.program_rx_filter();
        }
    }

    fn filter_programmed(&self) -> bool {
        matches!(
            self.state,
            ControllerState::ChipInitialized | ControllerState::RingsReady | ControllerState::Enabled
        )
    }

    // ========================================================================
    // Data Path
    // ========================================================================

    /// Queue one packet and ring the TX doorbell
    pub fn send(&self, packet: P) -> Result<(), TxError<P>> {
        let resources = match (self.state, self.resources.as_ref()) {
            (ControllerState::Enabled, Some(resources)) => resources,
            _ => return Err(TxError::NotEnabled(packet)),
        };

        let mut tx = resources.tx.lock();
        tx.send(packet)?;
        tx.publish(&self.regs);
        Ok(())
    }

    /// Interrupt service: link attention, TX reclaim, RX completion
    pub fn service_interrupt<S: NetStack<Packet = P>>(&self, stack: &mut S) {
        if self.state != ControllerState::Enabled {
            return;
        }
        let Some(resources) = self.resources.as_ref() else {
            return;
        };

        // The lock covers only interrupt bookkeeping. Stack callbacks run
        // after it is dropped and may call back into the controller.
        let mut irq = self.irq.lock();
        self.regs.write32(
            PCICFG_INT_ACK_CMD,
            PCICFG_INT_ACK_CMD_INDEX_VALID
                | PCICFG_INT_ACK_CMD_USE_INT_HC_PARAM
                | PCICFG_INT_ACK_CMD_MASK_INT
                | irq.last_status_idx as u32,
        );

        let sb = StatusBlock::decode(&resources.status);

        let link_change = if sb.link_attention(STATUS_ATTN_BITS_LINK_STATE) {
            let media = self.handle_link_change(&sb);
            irq.media = media;
            Some(media)
        } else {
            None
        };
        let mut released = core::mem::take(&mut irq.released);
        drop(irq);

        if let Some(media) = link_change {
            stack.link_status(media.link_status());
        }

        let hw_tx_cons = normalize_cons(sb.tx_cons);
        let mut tx = resources.tx.lock();
        let freed = if tx.cons() != hw_tx_cons {
            tx.reclaim(hw_tx_cons, &mut released)
        } else {
            0
        };
        drop(tx);
        for packet in released.drain(..) {
            stack.release_packet(packet);
        }
        if freed > 0 {
            stack.service_output();
        }

        let hw_rx_cons = normalize_cons(sb.rx_cons);
        let mut rx = resources.rx.lock();
        if rx.cons() != hw_rx_cons {
            rx.handle_completion(hw_rx_cons, stack);
            rx.publish(&self.regs);
            drop(rx);
            stack.flush_deliveries();
        } else {
            drop(rx);
        }

        let mut irq = self.irq.lock();
        irq.released = released;
        irq.last_status_idx = sb.status_idx;
        drop(irq);
        self.regs.write32(
            PCICFG_INT_ACK_CMD,
            PCICFG_INT_ACK_CMD_INDEX_VALID | sb.status_idx as u32,
        );
    }

    /// Acknowledge the link attention and read the new media state
    fn handle_link_change(&self, sb: &StatusBlock) -> PhyMediaState {
        if (sb.attn_bits & STATUS_ATTN_BITS_LINK_STATE) != 0 {
            self.regs
                .write32(PCICFG_STATUS_BIT_SET_CMD, STATUS_ATTN_BITS_LINK_STATE);
        } else {
            self.regs
                .write32(PCICFG_STATUS_BIT_CLEAR_CMD, STATUS_ATTN_BITS_LINK_STATE);
        }
        self.regs.write32(EMAC_STATUS, EMAC_STATUS_LINK_CHANGE);

        let media = self.read_media_state();

        // Push the link event out without waiting for the coalescing timer
        self.regs.set_bits32(HC_COMMAND, HC_COMMAND_COAL_NOW_WO_INT);
        self.regs.read32(HC_COMMAND);
        media
    }

    pub fn stats(&self) -> Nx2Stats {
        let Some(resources) = self.resources.as_ref() else {
            return Nx2Stats::default();
        };
        let tx = resources.tx.lock().stats();
        let rx = resources.rx.lock().stats();
        Nx2Stats {
            tx_packets: tx.packets,
            tx_bytes: tx.bytes,
            tx_stalls: tx.stalls,
            tx_unmappable: tx.unmappable,
            rx_packets: rx.packets,
            rx_bytes: rx.bytes,
            rx_errors: rx.errors,
            rx_oversize: rx.oversize,
            rx_refill_failures: rx.refill_failures,
        }
    }

    pub fn is_present(&self) -> bool {
        ChipModel::lookup(&PciIds::read(self.regs.host())).is_some()
    }
}

#[cfg(test)]
impl<H: Nx2Host, P: NetPacket> Nx2Controller<'_, H, P> {
    /// Status block memory, for simulated hardware writes
    pub(crate) fn status_block(&self) -> &DmaBuffer {
        &self.resources.as_ref().expect("controller not prepared").status
    }

    /// Bus address of the buffer posted in RX `slot`
    pub(crate) fn posted_rx_addr(&self, slot: usize) -> u64 {
        let resources = self.resources.as_ref().expect("controller not prepared");
        resources.rx.lock().descriptor(slot).addr
    }
}

impl<H: Nx2Host, P: NetPacket> Drop for Nx2Controller<'_, H, P> {
    fn drop(&mut self) {
        if let Some(resources) = self.resources.take() {
            self.disable_interrupts();
            self.quiesce();
            // SAFETY: DMA engines are disabled; nothing references the memory
            unsafe { resources.release(self.regs.host()) };
        }
    }
}

// ============================================================================
// NetworkDevice Trait Implementation
// ============================================================================

impl<H: Nx2Host, S: NetStack> NetworkDevice<S> for Nx2Controller<'_, H, S::Packet> {
    fn is_present(&self) -> bool {
        Nx2Controller::is_present(self)
    }

    fn init(&mut self, stack: &mut S) -> Result<(), NetworkError> {
        self.initialize(stack).map_err(|err| {
            log::error!("[NX2] Bring-up failed: {}", err);
            NetworkError::from(err)
        })
    }

    fn enable(&mut self, stack: &mut S) -> Result<(), NetworkError> {
        self.bring_up(stack).map_err(|err| {
            log::error!("[NX2] Enable failed: {}", err);
            NetworkError::from(err)
        })
    }

    fn disable(&mut self, stack: &mut S) {
        self.bring_down(stack);
    }

    fn transmit(&self, packet: S::Packet) -> Result<(), TxError<S::Packet>> {
        self.send(packet)
    }

    fn handle_interrupt(&self, stack: &mut S) {
        self.service_interrupt(stack);
    }

    fn mac_address(&self) -> MacAddress {
        self.mac
    }

    fn link_up(&self) -> bool {
        self.irq.lock().media.link_up
    }

    fn max_packet_size(&self) -> usize {
        MAX_FRAME_SIZE
    }
}
