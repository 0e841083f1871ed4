//! NX2 register map
//!
//! Offsets are relative to BAR0 unless noted. Registers below 0x400 mirror
//! PCI configuration space; the two window registers are reached through the
//! real PCI config space so that the extended register file (embedded CPU
//! scratchpads, shared memory) can be addressed beyond the mapped BAR.
//!
//! # References
//!
//! - Linux: drivers/net/ethernet/broadcom/bnx2.h
//! - Broadcom NetXtreme II Programmer's Reference Guide

// ============================================================================
// PCI Configuration Mirror
// ============================================================================

pub const PCICFG_MISC_CONFIG: u32 = 0x68;
pub const PCICFG_MISC_CONFIG_TARGET_BYTE_SWAP: u32 = 1 << 2;
pub const PCICFG_MISC_CONFIG_TARGET_MB_WORD_SWAP: u32 = 1 << 3;
pub const PCICFG_MISC_CONFIG_REG_WINDOW_ENA: u32 = 1 << 7;
pub const PCICFG_MISC_CONFIG_CORE_RST_REQ: u32 = 1 << 8;
pub const PCICFG_MISC_CONFIG_CORE_RST_BSY: u32 = 1 << 9;

/// Indirect window address (PCI config space)
pub const PCICFG_REG_WINDOW_ADDRESS: u32 = 0x78;
/// Indirect window data (PCI config space)
pub const PCICFG_REG_WINDOW: u32 = 0x80;

pub const PCICFG_INT_ACK_CMD: u32 = 0x84;
pub const PCICFG_INT_ACK_CMD_INDEX: u32 = 0xFFFF;
pub const PCICFG_INT_ACK_CMD_INDEX_VALID: u32 = 1 << 16;
pub const PCICFG_INT_ACK_CMD_USE_INT_HC_PARAM: u32 = 1 << 17;
pub const PCICFG_INT_ACK_CMD_MASK_INT: u32 = 1 << 18;

pub const PCICFG_STATUS_BIT_SET_CMD: u32 = 0x88;
pub const PCICFG_STATUS_BIT_CLEAR_CMD: u32 = 0x8C;

pub const PCI_SWAP_DIAG0: u32 = 0x418;
/// Value PCI_SWAP_DIAG0 reads back once reset completed with swapping configured
pub const SWAP_DIAG0_PATTERN: u32 = 0x0102_0304;

// ============================================================================
// Miscellaneous Block
// ============================================================================

pub const MISC_COMMAND: u32 = 0x800;
pub const MISC_COMMAND_SW_RESET: u32 = 1 << 4;

pub const MISC_ID: u32 = 0x808;

pub const MISC_ENABLE_STATUS_BITS: u32 = 0x81C;
pub const MISC_ENABLE_SET_BITS: u32 = 0x820;
pub const MISC_ENABLE_CLR_BITS: u32 = 0x824;

pub const MISC_ENABLE_TX_DMA: u32 = 1 << 4;
pub const MISC_ENABLE_RX_V2P: u32 = 1 << 15;
pub const MISC_ENABLE_RX_DMA: u32 = 1 << 17;
pub const MISC_ENABLE_HOST_COALESCE: u32 = 1 << 19;
pub const MISC_ENABLE_CONTEXT: u32 = 1 << 21;
pub const MISC_ENABLE_DMA_ENGINE: u32 = 1 << 26;

/// Every block enabled (5706/5708)
pub const MISC_ENABLE_DEFAULT: u32 = 0x05FF_FFFF;
/// Every block enabled (5709)
pub const MISC_ENABLE_DEFAULT_XI: u32 = 0x17FF_FFFF;

pub const MISC_NEW_CORE_CTL: u32 = 0x8C8;
pub const MISC_NEW_CORE_CTL_DMA_ENABLE: u32 = 1 << 16;

// ============================================================================
// DMA Engine
// ============================================================================

pub const DMA_CONFIG: u32 = 0xC08;
pub const DMA_CONFIG_DATA_BYTE_SWAP: u32 = 1 << 0;
pub const DMA_CONFIG_DATA_WORD_SWAP: u32 = 1 << 1;
pub const DMA_CONFIG_CNTL_WORD_SWAP: u32 = 1 << 5;
pub const DMA_CONFIG_CNTL_PCI_COMP_DLY: u32 = 1 << 11;
pub const DMA_CONFIG_READ_CHANS_SHIFT: u32 = 12;
pub const DMA_CONFIG_WRITE_CHANS_SHIFT: u32 = 16;

pub const DMA_READ_CHANS: u32 = 5;
pub const DMA_WRITE_CHANS: u32 = 3;

// ============================================================================
// Context Block
// ============================================================================

pub const CTX_COMMAND: u32 = 0x1000;
pub const CTX_COMMAND_ENABLED: u32 = 1 << 0;
pub const CTX_COMMAND_MEM_INIT: u32 = 1 << 13;
pub const CTX_COMMAND_PAGE_SIZE_SHIFT: u32 = 16;

/// Legacy (on-die context RAM) window
pub const CTX_DATA_ADR: u32 = 0x1010;
pub const CTX_DATA: u32 = 0x1014;

pub const CTX_CTX_DATA: u32 = 0x10C0;
pub const CTX_CTX_CTRL: u32 = 0x10C4;
pub const CTX_CTX_CTRL_CTX_ADDR: u32 = 0x000F_FFFF;
pub const CTX_CTX_CTRL_WRITE_REQ: u32 = 1 << 30;
pub const CTX_CTX_CTRL_READ_REQ: u32 = 1 << 31;

pub const CTX_HOST_PAGE_TBL_CTRL: u32 = 0x10C8;
pub const CTX_HOST_PAGE_TBL_CTRL_WRITE_REQ: u32 = 1 << 30;
pub const CTX_HOST_PAGE_TBL_DATA0: u32 = 0x10CC;
pub const CTX_HOST_PAGE_TBL_DATA0_VALID: u32 = 1 << 0;
pub const CTX_HOST_PAGE_TBL_DATA1: u32 = 0x10D0;

// ============================================================================
// EMAC
// ============================================================================

pub const EMAC_MODE: u32 = 0x1400;
pub const EMAC_MODE_HALF_DUPLEX: u32 = 1 << 1;
pub const EMAC_MODE_PORT: u32 = 0x3 << 2;
pub const EMAC_MODE_PORT_MII: u32 = 1 << 2;
pub const EMAC_MODE_PORT_GMII: u32 = 2 << 2;

pub const EMAC_STATUS: u32 = 0x1404;
pub const EMAC_STATUS_LINK_CHANGE: u32 = 1 << 12;

pub const EMAC_ATTENTION_ENA: u32 = 0x1408;
pub const EMAC_ATTENTION_ENA_LINK: u32 = 1 << 11;

pub const EMAC_MAC_MATCH0: u32 = 0x1410;
pub const EMAC_MAC_MATCH1: u32 = 0x1414;

pub const EMAC_MDIO_COMM: u32 = 0x14AC;
pub const EMAC_MDIO_COMM_DATA: u32 = 0xFFFF;
pub const EMAC_MDIO_COMM_REG_SHIFT: u32 = 16;
pub const EMAC_MDIO_COMM_PHY_SHIFT: u32 = 21;
pub const EMAC_MDIO_COMM_COMMAND_WRITE: u32 = 1 << 26;
pub const EMAC_MDIO_COMM_COMMAND_READ: u32 = 2 << 26;
pub const EMAC_MDIO_COMM_START_BUSY: u32 = 1 << 29;
pub const EMAC_MDIO_COMM_DISEXT: u32 = 1 << 30;

pub const EMAC_RX_MODE: u32 = 0x14C8;
pub const EMAC_RX_MODE_PROMISCUOUS: u32 = 1 << 8;
pub const EMAC_RX_MODE_KEEP_VLAN_TAG: u32 = 1 << 10;

pub const EMAC_MULTICAST_HASH0: u32 = 0x14D0;
pub const EMAC_MULTICAST_HASH_COUNT: u32 = 8;

// ============================================================================
// Receive Path Match / Sort
// ============================================================================

pub const RPM_SORT_USER0: u32 = 0x1820;
pub const RPM_SORT_USER0_BC_EN: u32 = 1 << 16;
pub const RPM_SORT_USER0_MC_EN: u32 = 1 << 17;
pub const RPM_SORT_USER0_PROM_EN: u32 = 1 << 19;
pub const RPM_SORT_USER0_ENA: u32 = 1 << 31;

// ============================================================================
// RV2P Sequencers
// ============================================================================

pub const RV2P_COMMAND: u32 = 0x2800;
pub const RV2P_COMMAND_PROC1_RESET: u32 = 1 << 16;
pub const RV2P_COMMAND_PROC2_RESET: u32 = 1 << 17;

pub const RV2P_INSTR_HIGH: u32 = 0x2830;
pub const RV2P_INSTR_LOW: u32 = 0x2834;
pub const RV2P_PROC1_ADDR_CMD: u32 = 0x2838;
pub const RV2P_PROC2_ADDR_CMD: u32 = 0x283C;
pub const RV2P_ADDR_CMD_RDWR: u32 = 1 << 31;

// ============================================================================
// Mailbox Queue / Transmit BD Read
// ============================================================================

pub const MQ_MAP_L2_5: u32 = 0x3D34;
pub const MQ_MAP_L2_5_ARM: u32 = 0x3 << 26;

pub const TBDR_CONFIG: u32 = 0x5004;
pub const TBDR_CONFIG_MAX_BDS: u32 = 0xFF;
pub const TBDR_CONFIG_PAGE_SIZE: u32 = 0xF << 24;
pub const TBDR_CONFIG_PAGE_SIZE_SHIFT: u32 = 24;

// ============================================================================
// Host Coalescing
// ============================================================================

pub const HC_COMMAND: u32 = 0x6800;
pub const HC_COMMAND_COAL_NOW: u32 = 1 << 16;
pub const HC_COMMAND_COAL_NOW_WO_INT: u32 = 1 << 17;

pub const HC_STATUS_ADDR_L: u32 = 0x6808;
pub const HC_STATUS_ADDR_H: u32 = 0x680C;
pub const HC_STATISTICS_ADDR_L: u32 = 0x6810;
pub const HC_STATISTICS_ADDR_H: u32 = 0x6814;
pub const HC_TX_QUICK_CONS_TRIP: u32 = 0x6818;
pub const HC_RX_QUICK_CONS_TRIP: u32 = 0x6820;
pub const HC_RX_TICKS: u32 = 0x6824;
pub const HC_TX_TICKS: u32 = 0x6828;

// ============================================================================
// Embedded Processors (indirect register space)
// ============================================================================

pub const TXP_CPU_BASE: u32 = 0x0004_5000;
pub const TXP_SCRATCH: u32 = 0x0006_0000;
pub const TPAT_CPU_BASE: u32 = 0x0008_5000;
pub const TPAT_SCRATCH: u32 = 0x000A_0000;
pub const RXP_CPU_BASE: u32 = 0x000C_5000;
pub const RXP_SCRATCH: u32 = 0x000E_0000;
pub const COM_CPU_BASE: u32 = 0x0010_5000;
pub const COM_SCRATCH: u32 = 0x0012_0000;
pub const CP_CPU_BASE: u32 = 0x0018_5000;
pub const CP_SCRATCH: u32 = 0x001A_0000;

/// Register offsets within each CPU block
pub const CPU_MODE: u32 = 0x00;
pub const CPU_STATE: u32 = 0x04;
pub const CPU_EVENT_MASK: u32 = 0x10;
pub const CPU_PROGRAM_COUNTER: u32 = 0x1C;
pub const CPU_INSTRUCTION: u32 = 0x20;
pub const CPU_HW_BREAKPOINT: u32 = 0x34;
pub const CPU_REG_FILE: u32 = 0x200;

pub const CPU_MODE_STEP_ENA: u32 = 1 << 7;
pub const CPU_MODE_SOFT_HALT: u32 = 1 << 10;
pub const CPU_STATE_CLEAR: u32 = 0x00FF_FFFF;

/// Virtual address the firmware is linked against
pub const MIPS_VIEW_BASE: u32 = 0x0800_0000;

// ============================================================================
// Shared Memory
// ============================================================================

pub const MCP_SCRATCH: u32 = 0x0016_0000;
pub const SHM_HDR_SIGNATURE: u32 = MCP_SCRATCH;
pub const SHM_HDR_SIGNATURE_SIG_MASK: u32 = 0xFFFF_0000;
pub const SHM_HDR_SIGNATURE_SIG: u32 = 0x5353_0000;
pub const SHM_HDR_ADDR_0: u32 = MCP_SCRATCH + 4;

/// Fixed shared memory base on bootcode without the signature header
pub const HOST_VIEW_SHMEM_BASE: u32 = 0x0016_7C00;

/// Offsets relative to the shared memory base
pub const DRV_RESET_SIGNATURE: u32 = 0x00;
pub const DRV_RESET_SIGNATURE_MAGIC: u32 = 0x4841_564B;
pub const DRV_MB: u32 = 0x04;
pub const FW_MB: u32 = 0x08;
pub const DRV_PULSE_MB: u32 = 0x10;
pub const PORT_HW_CFG_MAC_UPPER: u32 = 0x50;
pub const PORT_HW_CFG_MAC_LOWER: u32 = 0x54;

pub const DRV_MSG_CODE: u32 = 0xFF00_0000;
pub const DRV_MSG_CODE_RESET: u32 = 0x0100_0000;
pub const DRV_MSG_CODE_UNLOAD: u32 = 0x0200_0000;
pub const DRV_MSG_CODE_SHUTDOWN: u32 = 0x0300_0000;
pub const DRV_MSG_CODE_FW_TIMEOUT: u32 = 0x0C00_0000;

pub const DRV_MSG_DATA: u32 = 0x00FF_0000;
pub const DRV_MSG_DATA_WAIT0: u32 = 0x0001_0000;
pub const DRV_MSG_DATA_WAIT1: u32 = 0x0002_0000;
pub const DRV_MSG_DATA_WAIT2: u32 = 0x0003_0000;
pub const DRV_MSG_DATA_PULSE_CODE_ALWAYS_ALIVE: u32 = 0x0008_0000;

pub const DRV_MSG_SEQ: u32 = 0x0000_FFFF;
pub const FW_MSG_ACK: u32 = 0x0000_FFFF;

// ============================================================================
// Kernel Mailboxes and Contexts
// ============================================================================

/// Connection id of the L2 receive queue
pub const RX_CID: u32 = 0;
/// Connection id of the L2 transmit queue
pub const TX_CID: u32 = 16;

/// Byte address of a connection's context
#[inline]
pub const fn cid_addr(cid: u32) -> u32 {
    cid << 7
}

/// BAR0 offset of a connection's kernel mailbox
#[inline]
pub const fn mb_cid_addr(cid: u32) -> u32 {
    0x10000 + (cid << 7)
}

pub const L2MQ_RX_HOST_BDIDX: u32 = 0x04;
pub const L2MQ_RX_HOST_BSEQ: u32 = 0x08;
pub const L2MQ_TX_HOST_BIDX: u32 = 0x88;
pub const L2MQ_TX_HOST_BSEQ: u32 = 0x8C;

/// L2 transmit context (5706/5708)
pub const L2CTX_TX_TYPE: u32 = 0x00;
pub const L2CTX_TX_CMD_TYPE: u32 = 0x88;
pub const L2CTX_TX_TBDR_BHADDR_HI: u32 = 0x90;
pub const L2CTX_TX_TBDR_BHADDR_LO: u32 = 0x94;

/// L2 transmit context (5709)
pub const L2CTX_TX_TYPE_XI: u32 = 0x80;
pub const L2CTX_TX_CMD_TYPE_XI: u32 = 0x240;
pub const L2CTX_TX_TBDR_BHADDR_HI_XI: u32 = 0x258;
pub const L2CTX_TX_TBDR_BHADDR_LO_XI: u32 = 0x25C;

pub const L2CTX_TX_TYPE_TYPE_L2: u32 = 1 << 24;
pub const L2CTX_TX_TYPE_SIZE_L2: u32 = (0xC0 / 0x20) << 16;
pub const L2CTX_TX_CMD_TYPE_TYPE_L2: u32 = 1 << 24;
pub const L2CTX_TX_CMD_TYPE_NBDS_SHIFT: u32 = 16;

/// L2 receive context
pub const L2CTX_RX_CTX_TYPE: u32 = 0x00;
pub const L2CTX_RX_CTX_TYPE_SIZE_L2: u32 = (0x20 / 20) << 16;
pub const L2CTX_RX_CTX_TYPE_BD_CHAIN_VALUE: u32 = 1 << 28;
pub const L2CTX_RX_BD_PRE_READ_SHIFT: u32 = 8;
pub const L2CTX_RX_NX_BDHADDR_HI: u32 = 0x10;
pub const L2CTX_RX_NX_BDHADDR_LO: u32 = 0x14;

// ============================================================================
// Status Block
// ============================================================================

pub const STATUS_ATTN_BITS_LINK_STATE: u32 = 1 << 0;
