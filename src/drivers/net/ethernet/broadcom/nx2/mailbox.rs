//! Bootcode mailbox
//!
//! The on-chip management firmware ("bootcode") watches two words in shared
//! memory. The driver writes a message into DRV_MB, the bootcode answers in
//! FW_MB.
//!
//! # Protocol
//!
//! Message word layout:
//! - Bits 31-24: command code (reset, unload, shutdown, timeout notice)
//! - Bits 23-16: data (reset phase: WAIT0, WAIT1, WAIT2)
//! - Bits 15-0: sequence number, incremented for every message
//!
//! 1. Increment the sequence and OR it into the message
//! 2. Write the message to DRV_MB
//! 3. Poll FW_MB every 10 µs until its low 16 bits equal the sequence
//! 4. On timeout, rewrite the code field as FW_TIMEOUT and send once more so
//!    the bootcode knows the driver gave up (skipped for WAIT0, which the
//!    bootcode may legitimately ignore while it is still coming up)
//!
//! Only an exact sequence match satisfies the wait.

use super::Nx2Host;
use super::mmio::DeviceRegisters;
use super::regs::*;
use core::fmt;

/// How long the bootcode has to acknowledge one message
pub const FW_ACK_TIMEOUT_US: u32 = 50_000;

/// Delay between acknowledgement polls
pub const FW_ACK_POLL_US: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    /// No matching acknowledgement within FW_ACK_TIMEOUT_US
    AckTimeout { message: u32, last_ack: u32 },
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxError::AckTimeout { message, last_ack } => write!(
                f,
                "bootcode did not acknowledge {:#010x} (last ack {:#06x})",
                message, last_ack
            ),
        }
    }
}

/// Reset reason passed to the bootcode with each reset phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCode {
    /// Driver (re)initialization
    Reset,
    /// Interface going down
    Unload,
    /// Driver detaching
    Shutdown,
}

impl ResetCode {
    pub const fn bits(self) -> u32 {
        match self {
            ResetCode::Reset => DRV_MSG_CODE_RESET,
            ResetCode::Unload => DRV_MSG_CODE_UNLOAD,
            ResetCode::Shutdown => DRV_MSG_CODE_SHUTDOWN,
        }
    }
}

/// Driver side of the bootcode mailbox
#[derive(Debug, Default)]
pub struct FirmwareSync {
    sequence: u16,
}

impl FirmwareSync {
    pub const fn new() -> Self {
        Self { sequence: 0 }
    }

    /// Sequence number of the most recent message
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// True when a FW_MB value acknowledges `message`
    #[inline]
    pub fn is_acked(message: u32, fw_mb: u32) -> bool {
        (fw_mb & FW_MSG_ACK) == (message & DRV_MSG_SEQ)
    }

    /// Send one message and wait for the bootcode to acknowledge it.
    pub fn sync<H: Nx2Host>(
        &mut self,
        regs: &DeviceRegisters<H>,
        message: u32,
    ) -> Result<(), MailboxError> {
        self.sequence = self.sequence.wrapping_add(1);
        let message = (message & !DRV_MSG_SEQ) | self.sequence as u32;
        regs.shmem_write(DRV_MB, message);

        let mut ack = 0;
        for _ in 0..(FW_ACK_TIMEOUT_US / FW_ACK_POLL_US) {
            regs.delay_us(FW_ACK_POLL_US as u64);
            ack = regs.shmem_read(FW_MB);
            if Self::is_acked(message, ack) {
                return Ok(());
            }
        }

        if (message & DRV_MSG_DATA) != DRV_MSG_DATA_WAIT0 {
            let notice = (message & !DRV_MSG_CODE) | DRV_MSG_CODE_FW_TIMEOUT;
            regs.shmem_write(DRV_MB, notice);
        }

        log::error!(
            "[NX2] Firmware sync timeout: sent {:#010x}, last ack {:#010x}",
            message,
            ack
        );
        Err(MailboxError::AckTimeout {
            message,
            last_ack: ack & FW_MSG_ACK,
        })
    }
}
