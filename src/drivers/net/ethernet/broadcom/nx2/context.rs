//! Connection context memory
//!
//! Every queue the chip services is a "connection" with a block of context
//! state. The 5706/5708 keep context in on-die RAM reached through the
//! CTX_DATA_ADR/CTX_DATA window. The 5709 keeps it in host memory: the driver
//! hands the chip a page table of host pages at init, and each access is a
//! request through CTX_CTX_CTRL that completes asynchronously.

use super::Nx2Host;
use super::dma::{DMA_PAGE_SIZE, DmaBuffer};
use super::mmio::DeviceRegisters;
use super::regs::*;
use core::fmt;

/// Host pages backing 5709 context memory
pub const CTX_PAGE_COUNT: usize = 2;

const CTX_PAGE_BITS: u32 = 12;

const MEM_INIT_POLLS: u32 = 10;
const MEM_INIT_POLL_US: u64 = 2;
const PAGE_WRITE_POLLS: u32 = 10;
const PAGE_WRITE_POLL_US: u64 = 5;
const ACCESS_POLLS: u32 = 5;
const ACCESS_POLL_US: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// CTX_COMMAND memory init never completed
    MemInitTimeout,
    /// The chip never accepted a host page table entry
    PageWriteTimeout { page: usize },
    /// A context read or write request never completed
    AccessTimeout { address: u32 },
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::MemInitTimeout => write!(f, "context memory init timed out"),
            ContextError::PageWriteTimeout { page } => {
                write!(f, "context page {} was not accepted", page)
            }
            ContextError::AccessTimeout { address } => {
                write!(f, "context access at {:#x} timed out", address)
            }
        }
    }
}

/// Which context interface the chip implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// On-die context RAM (5706/5708)
    OnChip,
    /// Host-resident paged context (5709)
    HostPaged,
}

/// Enable host context memory and install the page table.
///
/// Pages must already be allocated and zeroed. Any page the chip does not
/// confirm is fatal: the driver's own TX/RX connections live in these pages.
pub fn init_host_context<H: Nx2Host>(
    regs: &DeviceRegisters<H>,
    pages: &[DmaBuffer],
) -> Result<(), ContextError> {
    let command = CTX_COMMAND_ENABLED
        | CTX_COMMAND_MEM_INIT
        | (1 << 12)
        | ((CTX_PAGE_BITS - 8) << CTX_COMMAND_PAGE_SIZE_SHIFT);
    regs.write32(CTX_COMMAND, command);

    let mut done = false;
    for _ in 0..MEM_INIT_POLLS {
        if (regs.read32(CTX_COMMAND) & CTX_COMMAND_MEM_INIT) == 0 {
            done = true;
            break;
        }
        regs.delay_us(MEM_INIT_POLL_US);
    }
    if !done {
        log::error!("[NX2] Context memory init timed out");
        return Err(ContextError::MemInitTimeout);
    }

    for (index, page) in pages.iter().enumerate() {
        debug_assert_eq!(page.size(), DMA_PAGE_SIZE);
        regs.write32(
            CTX_HOST_PAGE_TBL_DATA0,
            page.bus_addr_lo() | CTX_HOST_PAGE_TBL_DATA0_VALID,
        );
        regs.write32(CTX_HOST_PAGE_TBL_DATA1, page.bus_addr_hi());
        regs.write32(
            CTX_HOST_PAGE_TBL_CTRL,
            index as u32 | CTX_HOST_PAGE_TBL_CTRL_WRITE_REQ,
        );

        let mut accepted = false;
        for _ in 0..PAGE_WRITE_POLLS {
            if (regs.read32(CTX_HOST_PAGE_TBL_CTRL) & CTX_HOST_PAGE_TBL_CTRL_WRITE_REQ) == 0 {
                accepted = true;
                break;
            }
            regs.delay_us(PAGE_WRITE_POLL_US);
        }
        if !accepted {
            log::error!("[NX2] Context page {} write timed out", index);
            return Err(ContextError::PageWriteTimeout { page: index });
        }
    }

    Ok(())
}

fn wait_request<H: Nx2Host>(
    regs: &DeviceRegisters<H>,
    request: u32,
    address: u32,
) -> Result<(), ContextError> {
    for _ in 0..ACCESS_POLLS {
        if (regs.read32(CTX_CTX_CTRL) & request) == 0 {
            return Ok(());
        }
        regs.delay_us(ACCESS_POLL_US);
    }
    Err(ContextError::AccessTimeout { address })
}

/// Write one word of connection `cid`'s context
pub fn write_context32<H: Nx2Host>(
    regs: &DeviceRegisters<H>,
    mode: ContextMode,
    cid: u32,
    offset: u32,
    value: u32,
) -> Result<(), ContextError> {
    let address = cid_addr(cid) + offset;
    match mode {
        ContextMode::HostPaged => {
            regs.write32(CTX_CTX_DATA, value);
            regs.write32(
                CTX_CTX_CTRL,
                (address & CTX_CTX_CTRL_CTX_ADDR) | CTX_CTX_CTRL_WRITE_REQ,
            );
            wait_request(regs, CTX_CTX_CTRL_WRITE_REQ, address)
        }
        ContextMode::OnChip => {
            regs.write32(CTX_DATA_ADR, address);
            regs.write32(CTX_DATA, value);
            Ok(())
        }
    }
}

/// Read one word of connection `cid`'s context
pub fn read_context32<H: Nx2Host>(
    regs: &DeviceRegisters<H>,
    mode: ContextMode,
    cid: u32,
    offset: u32,
) -> Result<u32, ContextError> {
    let address = cid_addr(cid) + offset;
    match mode {
        ContextMode::HostPaged => {
            regs.write32(
                CTX_CTX_CTRL,
                (address & CTX_CTX_CTRL_CTX_ADDR) | CTX_CTX_CTRL_READ_REQ,
            );
            wait_request(regs, CTX_CTX_CTRL_READ_REQ, address)?;
            Ok(regs.read32(CTX_CTX_DATA))
        }
        ContextMode::OnChip => {
            regs.write32(CTX_DATA_ADR, address);
            Ok(regs.read32(CTX_DATA))
        }
    }
}
