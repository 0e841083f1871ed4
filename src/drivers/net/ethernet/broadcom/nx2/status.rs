//! Status block
//!
//! The host coalescing block DMAs this structure into host memory every
//! coalescing interval. Only the fields for the default queue are decoded.
//!
//! With `DMA_CONFIG_CNTL_WORD_SWAP` set and byte swapping off, each 32-bit
//! word lands little-endian, so the two 16-bit indices sharing a word come
//! out with index1 in the low half and index0 in the high half:
//!
//! ```text
//! 0x00  attn_bits             u32
//! 0x04  attn_bits_ack         u32
//! 0x08  tx_quick_cons_index1  u16
//! 0x0A  tx_quick_cons_index0  u16
//! 0x10  rx_quick_cons_index1  u16
//! 0x12  rx_quick_cons_index0  u16
//! 0x30  cmd_consumer_index    u16
//! 0x32  completion_producer   u16
//! 0x34  blk_num               u8
//! 0x36  status_idx            u16
//! ```

use super::dma::DmaBuffer;

pub const STATUS_BLOCK_SIZE: usize = 64;

const SB_ATTN_BITS: usize = 0x00;
const SB_ATTN_BITS_ACK: usize = 0x04;
const SB_TX_CONS0: usize = 0x0A;
const SB_RX_CONS0: usize = 0x12;
const SB_CMD_CONS: usize = 0x30;
const SB_COMPLETION_PROD: usize = 0x32;
const SB_STATUS_IDX: usize = 0x36;

/// Snapshot of the hardware-written status block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusBlock {
    pub attn_bits: u32,
    pub attn_bits_ack: u32,
    pub tx_cons: u16,
    pub rx_cons: u16,
    pub completion_prod: u16,
    pub cmd_cons: u16,
    pub status_idx: u16,
}

impl StatusBlock {
    pub fn decode(buffer: &DmaBuffer) -> Self {
        Self {
            attn_bits: buffer.read32(SB_ATTN_BITS),
            attn_bits_ack: buffer.read32(SB_ATTN_BITS_ACK),
            tx_cons: buffer.read16(SB_TX_CONS0),
            rx_cons: buffer.read16(SB_RX_CONS0),
            completion_prod: buffer.read16(SB_COMPLETION_PROD),
            cmd_cons: buffer.read16(SB_CMD_CONS),
            status_idx: buffer.read16(SB_STATUS_IDX),
        }
    }

    /// True when the link attention bit differs from its acknowledged copy
    #[inline]
    pub fn link_attention(&self, link_bit: u32) -> bool {
        (self.attn_bits & link_bit) != (self.attn_bits_ack & link_bit)
    }
}
