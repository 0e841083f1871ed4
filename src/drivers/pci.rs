//! PCI configuration space access
//!
//! Bus enumeration and BAR mapping belong to the host. The NIC driver only
//! needs dword access to its own function's configuration space: identity
//! registers, the command register (bus mastering), and the NX2 indirect
//! register window which lives in the vendor-specific region.

/// Standard configuration header offsets
pub mod offset {
    pub const VENDOR_DEVICE: u32 = 0x00;
    pub const COMMAND_STATUS: u32 = 0x04;
    pub const SUBSYSTEM: u32 = 0x2C;
}

pub const COMMAND_MEMORY_SPACE: u32 = 1 << 1;
pub const COMMAND_BUS_MASTER: u32 = 1 << 2;

/// Configuration space accessor for one PCI function.
pub trait PciConfig {
    fn config_read32(&self, offset: u32) -> u32;
    fn config_write32(&self, offset: u32, value: u32);

    /// Function number within the device (selects per-port shared memory)
    fn function(&self) -> u8 {
        0
    }
}

/// Identity registers read at attach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciIds {
    pub vendor: u16,
    pub device: u16,
    pub subsystem_vendor: u16,
    pub subsystem: u16,
}

impl PciIds {
    pub fn read<C: PciConfig + ?Sized>(config: &C) -> Self {
        let id = config.config_read32(offset::VENDOR_DEVICE);
        let sub = config.config_read32(offset::SUBSYSTEM);
        Self {
            vendor: (id & 0xFFFF) as u16,
            device: (id >> 16) as u16,
            subsystem_vendor: (sub & 0xFFFF) as u16,
            subsystem: (sub >> 16) as u16,
        }
    }
}

/// Set memory-space decode and bus mastering in the command register.
///
/// The upper half of the dword is the status register, whose error bits are
/// write-one-to-clear, so it is written back as zero.
pub fn enable_bus_master<C: PciConfig + ?Sized>(config: &C) {
    let command = config.config_read32(offset::COMMAND_STATUS) & 0xFFFF;
    config.config_write32(
        offset::COMMAND_STATUS,
        command | COMMAND_MEMORY_SPACE | COMMAND_BUS_MASTER,
    );
}
