//! Register access
//!
//! Direct registers are 16/32-bit little-endian MMIO in BAR0. Everything else
//! (embedded CPU scratchpads, the bootcode's shared memory) is reached through
//! the indirect window: write the target address to PCICFG_REG_WINDOW_ADDRESS,
//! then read or write PCICFG_REG_WINDOW, both in PCI configuration space.

use super::Nx2Host;
use super::regs::*;
use volatile::Volatile;

/// Memory-mapped register region (BAR0)
pub trait MmioRegion {
    fn read32(&self, offset: u32) -> u32;
    fn write32(&self, offset: u32, value: u32);
    fn read16(&self, offset: u32) -> u16;
    fn write16(&self, offset: u32, value: u16);
}

/// BAR0 mapped into the kernel's address space
pub struct VolatileMmio {
    base_addr: usize,
}

impl VolatileMmio {
    /// # Safety
    ///
    /// `base_addr` must be the virtual address of the controller's BAR0,
    /// mapped uncached for the lifetime of this value.
    pub const unsafe fn new(base_addr: usize) -> Self {
        Self { base_addr }
    }

    #[inline]
    fn reg32(&self, offset: u32) -> *mut Volatile<u32> {
        (self.base_addr + offset as usize) as *mut Volatile<u32>
    }

    #[inline]
    fn reg16(&self, offset: u32) -> *mut Volatile<u16> {
        (self.base_addr + offset as usize) as *mut Volatile<u16>
    }
}

impl MmioRegion for VolatileMmio {
    #[inline]
    fn read32(&self, offset: u32) -> u32 {
        // SAFETY: BAR0 is mapped for the lifetime of self (see `new`)
        u32::from_le(unsafe { (*self.reg32(offset)).read() })
    }

    #[inline]
    fn write32(&self, offset: u32, value: u32) {
        // SAFETY: BAR0 is mapped for the lifetime of self (see `new`)
        unsafe { (*self.reg32(offset)).write(value.to_le()) }
    }

    #[inline]
    fn read16(&self, offset: u32) -> u16 {
        // SAFETY: BAR0 is mapped for the lifetime of self (see `new`)
        u16::from_le(unsafe { (*self.reg16(offset)).read() })
    }

    #[inline]
    fn write16(&self, offset: u32, value: u16) {
        // SAFETY: BAR0 is mapped for the lifetime of self (see `new`)
        unsafe { (*self.reg16(offset)).write(value.to_le()) }
    }
}

/// Register handle shared by every part of the controller
pub struct DeviceRegisters<H> {
    host: H,
    shmem_base: u32,
}

impl<H: Nx2Host> DeviceRegisters<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            shmem_base: HOST_VIEW_SHMEM_BASE,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    // ========================================================================
    // Direct Access
    // ========================================================================

    #[inline]
    pub fn read32(&self, offset: u32) -> u32 {
        self.host.read32(offset)
    }

    #[inline]
    pub fn write32(&self, offset: u32, value: u32) {
        self.host.write32(offset, value);
    }

    #[inline]
    pub fn read16(&self, offset: u32) -> u16 {
        self.host.read16(offset)
    }

    #[inline]
    pub fn write16(&self, offset: u32, value: u16) {
        self.host.write16(offset, value);
    }

    pub fn set_bits32(&self, offset: u32, bits: u32) {
        let value = self.read32(offset);
        self.write32(offset, value | bits);
    }

    pub fn clear_bits32(&self, offset: u32, bits: u32) {
        let value = self.read32(offset);
        self.write32(offset, value & !bits);
    }

    // ========================================================================
    // Indirect Window
    // ========================================================================

    pub fn read_indirect(&self, offset: u32) -> u32 {
        self.host.config_write32(PCICFG_REG_WINDOW_ADDRESS, offset);
        self.host.config_read32(PCICFG_REG_WINDOW)
    }

    pub fn write_indirect(&self, offset: u32, value: u32) {
        self.host.config_write32(PCICFG_REG_WINDOW_ADDRESS, offset);
        self.host.config_write32(PCICFG_REG_WINDOW, value);
    }

    // ========================================================================
    // Shared Memory
    // ========================================================================

    pub fn shmem_base(&self) -> u32 {
        self.shmem_base
    }

    pub fn set_shmem_base(&mut self, base: u32) {
        self.shmem_base = base;
    }

    pub fn shmem_read(&self, offset: u32) -> u32 {
        self.read_indirect(self.shmem_base + offset)
    }

    pub fn shmem_write(&self, offset: u32, value: u32) {
        self.write_indirect(self.shmem_base + offset, value);
    }

    // ========================================================================
    // Delays
    // ========================================================================

    #[inline]
    pub fn delay_us(&self, microseconds: u64) {
        self.host.delay_us(microseconds);
    }

    #[inline]
    pub fn delay_ms(&self, milliseconds: u64) {
        self.host.delay_ms(milliseconds);
    }
}
