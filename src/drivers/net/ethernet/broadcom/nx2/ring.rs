//! Buffer descriptor rings
//!
//! Each direction uses a single 16 KiB page of 16-byte descriptors. The last
//! descriptor of the page is a chain pointer holding the page's own bus
//! address, so the hardware loops over the page forever.
//!
//! # Index Space
//!
//! Producer and consumer indices are free-running 16-bit counters. The low
//! ten bits select the slot. Whenever advancing would land on the chain
//! slot, the index skips it:
//!
//! ```text
//! slot:   0   1   ...  1021  1022  [1023 = chain]  0   1 ...
//! index:  0   1   ...  1021  1022                  1024 1025 ...
//! ```
//!
//! The hardware reports consumer indices in the same space but may report
//! the chain slot itself; [`normalize_cons`] advances such values.

use super::dma::DmaBuffer;

/// Ring page size in bytes
pub const BD_PAGE_SIZE: usize = 16384;

/// Bytes per descriptor
pub const BD_SIZE: usize = 16;

/// Descriptors per page, including the chain slot
pub const BD_TOTAL: usize = BD_PAGE_SIZE / BD_SIZE;

/// Descriptors usable for buffers
pub const BD_USABLE: usize = BD_TOTAL - 1;

const MAX_BD_IDX: u16 = (BD_TOTAL - 1) as u16;

/// Advance a ring index, skipping the chain slot
#[inline]
pub const fn next_bd(index: u16) -> u16 {
    if (index & MAX_BD_IDX) == MAX_BD_IDX - 1 {
        index.wrapping_add(2)
    } else {
        index.wrapping_add(1)
    }
}

/// Slot selected by a ring index
#[inline]
pub const fn bd_slot(index: u16) -> usize {
    (index & MAX_BD_IDX) as usize
}

/// Move a hardware consumer index off the chain slot
#[inline]
pub const fn normalize_cons(index: u16) -> u16 {
    if (index & MAX_BD_IDX) == MAX_BD_IDX {
        index.wrapping_add(1)
    } else {
        index
    }
}

// ============================================================================
// Transmit Descriptor
// ============================================================================

pub const TX_BD_FLAGS_CONN_FAULT: u16 = 1 << 0;
pub const TX_BD_FLAGS_TCP_UDP_CKSUM: u16 = 1 << 1;
pub const TX_BD_FLAGS_IP_CKSUM: u16 = 1 << 2;
pub const TX_BD_FLAGS_VLAN_TAG: u16 = 1 << 3;
pub const TX_BD_FLAGS_COAL_NOW: u16 = 1 << 4;
pub const TX_BD_FLAGS_DONT_GEN_CRC: u16 = 1 << 5;
pub const TX_BD_FLAGS_END: u16 = 1 << 6;
pub const TX_BD_FLAGS_START: u16 = 1 << 7;

/// Transmit buffer descriptor
///
/// ```text
/// 0x00  haddr_hi   u32
/// 0x04  haddr_lo   u32
/// 0x08  nbytes     u32
/// 0x0C  flags      u16
/// 0x0E  vlan_tag   u16
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxBd {
    pub addr: u64,
    pub nbytes: u32,
    pub flags: u16,
    pub vlan_tag: u16,
}

impl TxBd {
    pub fn encode(&self) -> [u8; BD_SIZE] {
        let mut raw = [0u8; BD_SIZE];
        raw[0..4].copy_from_slice(&((self.addr >> 32) as u32).to_le_bytes());
        raw[4..8].copy_from_slice(&(self.addr as u32).to_le_bytes());
        raw[8..12].copy_from_slice(&self.nbytes.to_le_bytes());
        raw[12..14].copy_from_slice(&self.flags.to_le_bytes());
        raw[14..16].copy_from_slice(&self.vlan_tag.to_le_bytes());
        raw
    }

    pub fn decode(raw: &[u8; BD_SIZE]) -> Self {
        let hi = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let lo = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        Self {
            addr: ((hi as u64) << 32) | lo as u64,
            nbytes: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            flags: u16::from_le_bytes([raw[12], raw[13]]),
            vlan_tag: u16::from_le_bytes([raw[14], raw[15]]),
        }
    }
}

// ============================================================================
// Receive Descriptor
// ============================================================================

pub const RX_BD_FLAGS_NOPUSH: u32 = 1 << 0;
pub const RX_BD_FLAGS_DUMMY: u32 = 1 << 1;
pub const RX_BD_FLAGS_END: u32 = 1 << 2;
pub const RX_BD_FLAGS_START: u32 = 1 << 3;

/// Receive buffer descriptor
///
/// ```text
/// 0x00  haddr_hi   u32
/// 0x04  haddr_lo   u32
/// 0x08  len        u32
/// 0x0C  flags      u32
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxBd {
    pub addr: u64,
    pub len: u32,
    pub flags: u32,
}

impl RxBd {
    pub fn encode(&self) -> [u8; BD_SIZE] {
        let mut raw = [0u8; BD_SIZE];
        raw[0..4].copy_from_slice(&((self.addr >> 32) as u32).to_le_bytes());
        raw[4..8].copy_from_slice(&(self.addr as u32).to_le_bytes());
        raw[8..12].copy_from_slice(&self.len.to_le_bytes());
        raw[12..16].copy_from_slice(&self.flags.to_le_bytes());
        raw
    }

    pub fn decode(raw: &[u8; BD_SIZE]) -> Self {
        let hi = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let lo = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        Self {
            addr: ((hi as u64) << 32) | lo as u64,
            len: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            flags: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    }
}

// ============================================================================
// Ring Page
// ============================================================================

/// One descriptor page with its chain slot installed
pub struct BdPage {
    buffer: DmaBuffer,
}

impl BdPage {
    /// Take ownership of a zeroed page and point its chain slot at itself
    pub fn new(buffer: DmaBuffer) -> Self {
        assert!(buffer.size() >= BD_PAGE_SIZE);
        let page = Self { buffer };
        page.reset();
        page
    }

    /// Clear every descriptor and reinstall the chain pointer
    pub fn reset(&self) {
        self.buffer.zero();
        let chain = BD_USABLE * BD_SIZE;
        self.buffer.write32(chain, self.buffer.bus_addr_hi());
        self.buffer.write32(chain + 4, self.buffer.bus_addr_lo());
    }

    pub fn bus_addr(&self) -> u64 {
        self.buffer.bus_addr()
    }

    pub fn bus_addr_hi(&self) -> u32 {
        self.buffer.bus_addr_hi()
    }

    pub fn bus_addr_lo(&self) -> u32 {
        self.buffer.bus_addr_lo()
    }

    /// Store a descriptor. The chain slot is not writable.
    pub fn write(&self, slot: usize, raw: &[u8; BD_SIZE]) {
        assert!(slot < BD_USABLE, "descriptor slot {} out of range", slot);
        let base = slot * BD_SIZE;
        for (i, chunk) in raw.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.buffer.write32(base + 4 * i, word);
        }
    }

    pub fn read(&self, slot: usize) -> [u8; BD_SIZE] {
        assert!(slot < BD_TOTAL, "descriptor slot {} out of range", slot);
        let mut raw = [0u8; BD_SIZE];
        self.buffer.read_bytes(slot * BD_SIZE, &mut raw);
        raw
    }

    pub fn into_buffer(self) -> DmaBuffer {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::net::ethernet::broadcom::nx2::dma::IdentityDma;

    #[test]
    fn test_geometry() {
        assert_eq!(BD_TOTAL, 1024);
        assert_eq!(BD_USABLE, 1023);
    }

    #[test]
    fn test_next_bd_skips_chain_slot() {
        assert_eq!(next_bd(0), 1);
        assert_eq!(next_bd(1021), 1022);
        assert_eq!(next_bd(1022), 1024);
        assert_eq!(bd_slot(1024), 0);
        assert_eq!(next_bd(2046), 2048);
        assert_eq!(next_bd(u16::MAX - 1), 0);
    }

    #[test]
    fn test_full_cycle_returns_and_never_yields_chain_slot() {
        for start in [0u16, 1, 500, 1021, 1022] {
            let mut index = start;
            for _ in 0..BD_USABLE {
                index = next_bd(index);
                assert_ne!(bd_slot(index), BD_USABLE);
            }
            assert_eq!(bd_slot(index), bd_slot(start));
        }
    }

    #[test]
    fn test_normalize_cons() {
        assert_eq!(normalize_cons(1023), 1024);
        assert_eq!(normalize_cons(2047), 2048);
        assert_eq!(normalize_cons(u16::MAX), 0);
        assert_eq!(normalize_cons(1022), 1022);
        assert_eq!(normalize_cons(0), 0);
    }

    #[test]
    fn test_tx_bd_byte_layout() {
        let bd = TxBd {
            addr: 0x0000_0001_2345_6780,
            nbytes: 60,
            flags: TX_BD_FLAGS_START | TX_BD_FLAGS_END | TX_BD_FLAGS_VLAN_TAG,
            vlan_tag: 0x0064,
        };
        let raw = bd.encode();
        assert_eq!(
            raw,
            [
                0x01, 0x00, 0x00, 0x00, // haddr_hi
                0x80, 0x67, 0x45, 0x23, // haddr_lo
                0x3C, 0x00, 0x00, 0x00, // nbytes
                0xC8, 0x00, // flags
                0x64, 0x00, // vlan
            ]
        );
        assert_eq!(TxBd::decode(&raw), bd);
    }

    #[test]
    fn test_rx_bd_byte_layout() {
        let bd = RxBd {
            addr: 0x8000_1000,
            len: 1600,
            flags: RX_BD_FLAGS_START | RX_BD_FLAGS_END,
        };
        assert_eq!(
            bd.encode(),
            [
                0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x40, 0x06, 0x00, 0x00, 0x0C,
                0x00, 0x00, 0x00,
            ]
        );
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_chain_slot_is_not_writable() {
        let buffer = DmaBuffer::allocate(&IdentityDma, BD_PAGE_SIZE).unwrap();
        let page = BdPage::new(buffer);
        page.write(BD_USABLE, &[0u8; BD_SIZE]);
    }

    #[test]
    fn test_chain_slot_points_at_own_page() {
        let buffer = DmaBuffer::allocate(&IdentityDma, BD_PAGE_SIZE).unwrap();
        let page = BdPage::new(buffer);

        let chain = RxBd::decode(&page.read(BD_USABLE));
        assert_eq!(chain.addr, page.bus_addr());

        page.write(3, &RxBd { addr: 0x42, len: 7, flags: 0 }.encode());
        assert_eq!(RxBd::decode(&page.read(3)).addr, 0x42);

        page.reset();
        assert_eq!(RxBd::decode(&page.read(3)), RxBd::default());
        assert_eq!(RxBd::decode(&page.read(BD_USABLE)).addr, page.bus_addr());

        unsafe { page.into_buffer().release(&IdentityDma) };
    }
}
