//! Embedded processor loader
//!
//! The chip runs its packet pipeline on seven internal engines:
//!
//! - Two RV2P sequencers (receive virtual-to-physical), loaded through a
//!   64-bit instruction port in direct register space
//! - Five MIPS cores (TXP, TPAT, RXP, COM, CP), each with a register block
//!   and a scratchpad in indirect register space
//!
//! All firmware words are big-endian in the image and written to the chip
//! in host order.

use super::Nx2Host;
use super::firmware::{MipsEntry, Rv2pProc, Section};
use super::mmio::DeviceRegisters;
use super::regs::*;
use super::ring::BD_PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rv2pProcessor {
    Proc1,
    Proc2,
}

impl Rv2pProcessor {
    fn addr_cmd(self) -> u32 {
        match self {
            Rv2pProcessor::Proc1 => RV2P_PROC1_ADDR_CMD,
            Rv2pProcessor::Proc2 => RV2P_PROC2_ADDR_CMD,
        }
    }

    fn reset_bit(self) -> u32 {
        match self {
            Rv2pProcessor::Proc1 => RV2P_COMMAND_PROC1_RESET,
            Rv2pProcessor::Proc2 => RV2P_COMMAND_PROC2_RESET,
        }
    }
}

/// Fixup slot patched with the receive BD page size
const RV2P_P1_FIXUP_PAGE_SIZE_IDX: usize = 0;

/// RV2P encoding of the BD page size: 16-byte units, minus one
const RV2P_P1_PAGE_SIZE: u32 = (BD_PAGE_SIZE / 16) as u32 - 1;

fn rv2p_fixup(processor: Rv2pProcessor, index: usize, code: u32) -> u32 {
    match (processor, index) {
        (Rv2pProcessor::Proc1, RV2P_P1_FIXUP_PAGE_SIZE_IDX) => {
            (code & !0xFFFF) | RV2P_P1_PAGE_SIZE
        }
        _ => code,
    }
}

fn write_rv2p_instruction<H: Nx2Host>(
    regs: &DeviceRegisters<H>,
    processor: Rv2pProcessor,
    slot: u32,
    high: u32,
    low: u32,
) {
    regs.write32(RV2P_INSTR_HIGH, high);
    regs.write32(RV2P_INSTR_LOW, low);
    regs.write32(processor.addr_cmd(), slot | RV2P_ADDR_CMD_RDWR);
}

/// Stream one sequencer's microcode, apply its fixups and reset it
pub fn load_rv2p<H: Nx2Host>(
    regs: &DeviceRegisters<H>,
    processor: Rv2pProcessor,
    fw: &Rv2pProc<'_>,
) {
    let code = &fw.code;

    // One 64-bit instruction per slot: high word first
    for slot in 0..code.word_count() / 2 {
        let high = code.word(2 * slot).unwrap_or(0);
        let low = code.word(2 * slot + 1).unwrap_or(0);
        write_rv2p_instruction(regs, processor, slot as u32, high, low);
    }

    for (index, &loc) in fw.fixups.iter().enumerate() {
        let loc = loc as usize;
        if loc == 0 || loc * 4 >= code.bytes.len() {
            continue;
        }
        let high = code.word(loc - 1).unwrap_or(0);
        let low = rv2p_fixup(processor, index, code.word(loc).unwrap_or(0));
        write_rv2p_instruction(regs, processor, (loc / 2) as u32, high, low);
    }

    regs.write32(RV2P_COMMAND, processor.reset_bit());
}

// ============================================================================
// MIPS Cores
// ============================================================================

/// Register block and scratchpad of one MIPS core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuRegisters {
    pub name: &'static str,
    pub mode: u32,
    pub state: u32,
    pub event_mask: u32,
    pub pc: u32,
    pub instruction: u32,
    pub breakpoint: u32,
    pub spad_base: u32,
    pub mips_view_base: u32,
}

impl CpuRegisters {
    const fn at(name: &'static str, base: u32, spad_base: u32) -> Self {
        Self {
            name,
            mode: base + CPU_MODE,
            state: base + CPU_STATE,
            event_mask: base + CPU_EVENT_MASK,
            pc: base + CPU_PROGRAM_COUNTER,
            instruction: base + CPU_INSTRUCTION,
            breakpoint: base + CPU_HW_BREAKPOINT,
            spad_base,
            mips_view_base: MIPS_VIEW_BASE,
        }
    }
}

pub const CPU_REG_TXP: CpuRegisters = CpuRegisters::at("TXP", TXP_CPU_BASE, TXP_SCRATCH);
pub const CPU_REG_TPAT: CpuRegisters = CpuRegisters::at("TPAT", TPAT_CPU_BASE, TPAT_SCRATCH);
pub const CPU_REG_RXP: CpuRegisters = CpuRegisters::at("RXP", RXP_CPU_BASE, RXP_SCRATCH);
pub const CPU_REG_COM: CpuRegisters = CpuRegisters::at("COM", COM_CPU_BASE, COM_SCRATCH);
pub const CPU_REG_CP: CpuRegisters = CpuRegisters::at("CP", CP_CPU_BASE, CP_SCRATCH);

fn load_section<H: Nx2Host>(regs: &DeviceRegisters<H>, cpu: &CpuRegisters, section: &Section<'_>) {
    if section.bytes.is_empty() {
        return;
    }
    let offset = cpu.spad_base + section.addr.wrapping_sub(cpu.mips_view_base);
    for (j, word) in section.words().enumerate() {
        regs.write_indirect(offset + 4 * j as u32, word);
    }
}

/// Halt a core, copy its text, data and read-only data into the
/// scratchpad, point it at its entry and let it run.
pub fn load_cpu<H: Nx2Host>(regs: &DeviceRegisters<H>, cpu: &CpuRegisters, fw: &MipsEntry<'_>) {
    let mode = regs.read_indirect(cpu.mode);
    regs.write_indirect(cpu.mode, mode | CPU_MODE_SOFT_HALT);
    regs.write_indirect(cpu.state, CPU_STATE_CLEAR);

    load_section(regs, cpu, &fw.text);
    load_section(regs, cpu, &fw.data);
    load_section(regs, cpu, &fw.rodata);

    // Prefetch stays stale after the reload otherwise
    regs.write_indirect(cpu.instruction, 0);
    regs.write_indirect(cpu.pc, fw.start_addr);

    let mode = regs.read_indirect(cpu.mode);
    regs.write_indirect(cpu.state, CPU_STATE_CLEAR);
    regs.write_indirect(cpu.mode, mode & !CPU_MODE_SOFT_HALT);

    log::debug!(
        "[NX2] {} loaded, entry {:#010x}, {} text words",
        cpu.name,
        fw.start_addr,
        fw.text.word_count()
    );
}
