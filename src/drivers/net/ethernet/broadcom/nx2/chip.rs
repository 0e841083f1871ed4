//! Chip identification
//!
//! MISC_ID layout:
//!
//! ```text
//! 31        16 15  12 11   4 3     0
//! +-----------+------+------+-------+
//! | chip num  | rev  | metal| bond  |
//! +-----------+------+------+-------+
//! ```
//!
//! Only production silicon is accepted. The 5716 reports itself as a 5709.

use crate::drivers::pci::PciIds;

/// Broadcom PCI vendor id
pub const PCI_VENDOR_BROADCOM: u16 = 0x14E4;

const PCI_VENDOR_HP: u16 = 0x103C;

pub const CHIP_NUM_5706: u32 = 0x5706_0000;
pub const CHIP_NUM_5708: u32 = 0x5708_0000;
pub const CHIP_NUM_5709: u32 = 0x5709_0000;

const CHIP_NUM_MASK: u32 = 0xFFFF_0000;
const CHIP_ID_MASK: u32 = 0xFFFF_FFF0;

/// Accepted revisions
const CHIP_ALLOWLIST: [u32; 10] = [
    0x5706_0010, // 5706 A1
    0x5706_0020, // 5706 A2
    0x5706_0030, // 5706 A3
    0x5708_1000, // 5708 B0
    0x5708_1010, // 5708 B1
    0x5708_1020, // 5708 B2
    0x5709_1000, // 5709 B0
    0x5709_1010, // 5709 B1
    0x5709_1020, // 5709 B2
    0x5709_2000, // 5709 C0
];

/// Decoded MISC_ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipId(u32);

impl ChipId {
    pub const fn from_misc_id(misc_id: u32) -> Self {
        Self(misc_id & CHIP_ID_MASK)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn num(self) -> u32 {
        self.0 & CHIP_NUM_MASK
    }

    pub const fn rev(self) -> u32 {
        (self.0 >> 12) & 0xF
    }

    pub const fn metal(self) -> u32 {
        (self.0 >> 4) & 0xFF
    }

    /// Host-paged context and the `_XI` register variants
    pub const fn is_5709(self) -> bool {
        self.num() == CHIP_NUM_5709
    }

    pub fn is_supported(self) -> bool {
        CHIP_ALLOWLIST.contains(&self.0)
    }
}

impl core::fmt::Display for ChipId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let rev = (b'A' + self.rev() as u8) as char;
        write!(f, "{:x} {}{}", self.num() >> 16, rev, self.metal())
    }
}

// ============================================================================
// Model Table
// ============================================================================

/// Vendor and model resolved from PCI identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipModel {
    pub vendor: &'static str,
    pub model: &'static str,
}

struct ModelEntry {
    device: u16,
    subsystem: Option<(u16, u16)>,
    model: &'static str,
}

const fn entry(device: u16, model: &'static str) -> ModelEntry {
    ModelEntry {
        device,
        subsystem: None,
        model,
    }
}

const fn oem(device: u16, subvendor: u16, subdevice: u16, model: &'static str) -> ModelEntry {
    ModelEntry {
        device,
        subsystem: Some((subvendor, subdevice)),
        model,
    }
}

// OEM entries first; the first match wins
const MODELS: [ModelEntry; 11] = [
    oem(0x164A, PCI_VENDOR_HP, 0x3101, "NC370T Multifunction Gigabit Server Adapter"),
    oem(0x164A, PCI_VENDOR_HP, 0x3106, "NC370i Multifunction Gigabit Server Adapter"),
    oem(0x16AA, PCI_VENDOR_HP, 0x3102, "NC370F Multifunction Gigabit Server Adapter"),
    entry(0x164A, "NetXtreme II BCM5706 1000Base-T"),
    entry(0x16AA, "NetXtreme II BCM5706 1000Base-SX"),
    entry(0x164C, "NetXtreme II BCM5708 1000Base-T"),
    entry(0x16AC, "NetXtreme II BCM5708 1000Base-SX"),
    entry(0x1639, "NetXtreme II BCM5709 1000Base-T"),
    entry(0x163A, "NetXtreme II BCM5709 1000Base-SX"),
    entry(0x163B, "NetXtreme II BCM5716 1000Base-T"),
    entry(0x163C, "NetXtreme II BCM5716 1000Base-SX"),
];

const GENERIC_MODEL: &str = "NetXtreme II";

impl ChipModel {
    /// Resolve the model string; `None` for a foreign vendor
    pub fn lookup(ids: &PciIds) -> Option<Self> {
        if ids.vendor != PCI_VENDOR_BROADCOM {
            return None;
        }

        let model = MODELS
            .iter()
            .find(|m| {
                m.device == ids.device
                    && m.subsystem
                        .is_none_or(|sub| sub == (ids.subsystem_vendor, ids.subsystem))
            })
            .map(|m| m.model)
            .unwrap_or(GENERIC_MODEL);

        Some(Self {
            vendor: "Broadcom",
            model,
        })
    }
}
