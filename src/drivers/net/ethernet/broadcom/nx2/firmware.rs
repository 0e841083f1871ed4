//! Firmware image layout
//!
//! Two images are supplied by the host, both big-endian throughout:
//!
//! ```text
//! MIPS image:  5 × entry, in order COM, CP, RXP, TPAT, TXP
//!   entry:     start_addr u32
//!              text   { addr u32, len u32, offset u32 }
//!              data   { addr u32, len u32, offset u32 }
//!              rodata { addr u32, len u32, offset u32 }
//!
//! RV2P image:  2 × proc, in order PROC1, PROC2
//!   proc:      code { addr u32, len u32, offset u32 }
//!              fixup[8] u32
//! ```
//!
//! Section offsets are relative to the start of their image. Contents are
//! opaque to the driver; only this header is interpreted.

use core::fmt;

pub const MIPS_ENTRY_SIZE: usize = 4 + 3 * SECTION_HEADER_SIZE;
pub const MIPS_ENTRY_COUNT: usize = 5;
pub const RV2P_FIXUP_COUNT: usize = 8;
pub const RV2P_PROC_SIZE: usize = SECTION_HEADER_SIZE + 4 * RV2P_FIXUP_COUNT;

const SECTION_HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareError {
    /// Image shorter than its header
    Truncated { needed: usize, actual: usize },
    /// A section points outside the image
    SectionOutOfBounds { offset: u32, len: u32 },
    /// A section length is not a whole number of words
    Misaligned { len: u32 },
}

impl fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareError::Truncated { needed, actual } => {
                write!(f, "firmware header needs {} bytes, image has {}", needed, actual)
            }
            FirmwareError::SectionOutOfBounds { offset, len } => {
                write!(f, "section {:#x}+{:#x} outside image", offset, len)
            }
            FirmwareError::Misaligned { len } => {
                write!(f, "section length {:#x} not word aligned", len)
            }
        }
    }
}

#[inline]
pub(crate) fn be32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn check_len(image: &[u8], needed: usize) -> Result<(), FirmwareError> {
    if image.len() < needed {
        return Err(FirmwareError::Truncated {
            needed,
            actual: image.len(),
        });
    }
    Ok(())
}

/// One region of a firmware image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section<'a> {
    /// Address the region is linked at
    pub addr: u32,
    /// Region contents, still big-endian
    pub bytes: &'a [u8],
}

impl<'a> Section<'a> {
    fn parse(image: &'a [u8], header: usize) -> Result<Self, FirmwareError> {
        let addr = be32(image, header);
        let len = be32(image, header + 4);
        let offset = be32(image, header + 8);

        if len % 4 != 0 {
            return Err(FirmwareError::Misaligned { len });
        }
        let start = offset as usize;
        let end = start
            .checked_add(len as usize)
            .filter(|end| *end <= image.len())
            .ok_or(FirmwareError::SectionOutOfBounds { offset, len })?;

        Ok(Self {
            addr,
            bytes: &image[start..end],
        })
    }

    /// Big-endian words converted to host order
    pub fn words(&self) -> impl Iterator<Item = u32> + 'a {
        self.bytes
            .chunks_exact(4)
            .map(|word| u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
    }

    /// Word at index `index` in host order
    pub fn word(&self, index: usize) -> Option<u32> {
        let offset = index.checked_mul(4)?;
        if offset + 4 > self.bytes.len() {
            return None;
        }
        Some(be32(self.bytes, offset))
    }

    pub fn word_count(&self) -> usize {
        self.bytes.len() / 4
    }
}

/// Image for one embedded MIPS processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipsEntry<'a> {
    pub start_addr: u32,
    pub text: Section<'a>,
    pub data: Section<'a>,
    pub rodata: Section<'a>,
}

/// Parsed MIPS firmware image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MipsFirmware<'a> {
    pub com: MipsEntry<'a>,
    pub cp: MipsEntry<'a>,
    pub rxp: MipsEntry<'a>,
    pub tpat: MipsEntry<'a>,
    pub txp: MipsEntry<'a>,
}

impl<'a> MipsFirmware<'a> {
    pub fn parse(image: &'a [u8]) -> Result<Self, FirmwareError> {
        check_len(image, MIPS_ENTRY_SIZE * MIPS_ENTRY_COUNT)?;

        let entry = |index: usize| -> Result<MipsEntry<'a>, FirmwareError> {
            let base = index * MIPS_ENTRY_SIZE;
            Ok(MipsEntry {
                start_addr: be32(image, base),
                text: Section::parse(image, base + 4)?,
                data: Section::parse(image, base + 4 + SECTION_HEADER_SIZE)?,
                rodata: Section::parse(image, base + 4 + 2 * SECTION_HEADER_SIZE)?,
            })
        };

        Ok(Self {
            com: entry(0)?,
            cp: entry(1)?,
            rxp: entry(2)?,
            tpat: entry(3)?,
            txp: entry(4)?,
        })
    }
}

/// Image for one RV2P sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rv2pProc<'a> {
    pub code: Section<'a>,
    /// Word positions to patch; zero means unused
    pub fixups: [u32; RV2P_FIXUP_COUNT],
}

/// Parsed RV2P firmware image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rv2pFirmware<'a> {
    pub proc1: Rv2pProc<'a>,
    pub proc2: Rv2pProc<'a>,
}

impl<'a> Rv2pFirmware<'a> {
    pub fn parse(image: &'a [u8]) -> Result<Self, FirmwareError> {
        check_len(image, 2 * RV2P_PROC_SIZE)?;

        let proc = |index: usize| -> Result<Rv2pProc<'a>, FirmwareError> {
            let base = index * RV2P_PROC_SIZE;
            let mut fixups = [0u32; RV2P_FIXUP_COUNT];
            for (i, fixup) in fixups.iter_mut().enumerate() {
                *fixup = be32(image, base + SECTION_HEADER_SIZE + 4 * i);
            }
            Ok(Rv2pProc {
                code: Section::parse(image, base)?,
                fixups,
            })
        };

        Ok(Self {
            proc1: proc(0)?,
            proc2: proc(1)?,
        })
    }
}

/// Firmware images handed to the controller by the host
#[derive(Debug, Clone, Copy)]
pub struct Nx2Firmware<'a> {
    pub mips: &'a [u8],
    pub rv2p: &'a [u8],
}

// ============================================================================
// Image Builders (tests)
// ============================================================================

#[cfg(test)]
pub(crate) mod build {
    use super::*;
    use alloc::vec::Vec;

    pub struct MipsSpec {
        pub start_addr: u32,
        pub text: (u32, Vec<u32>),
        pub data: (u32, Vec<u32>),
        pub rodata: (u32, Vec<u32>),
    }

    fn put(image: &mut Vec<u8>, at: usize, value: u32) {
        image[at..at + 4].copy_from_slice(&value.to_be_bytes());
    }

    fn append(image: &mut Vec<u8>, header: usize, addr: u32, words: &[u32]) {
        let offset = image.len() as u32;
        for word in words {
            image.extend_from_slice(&word.to_be_bytes());
        }
        put(image, header, addr);
        put(image, header + 4, (words.len() * 4) as u32);
        put(image, header + 8, offset);
    }

    /// Build a MIPS image from five entries in COM, CP, RXP, TPAT, TXP order
    pub fn mips_image(entries: &[MipsSpec; MIPS_ENTRY_COUNT]) -> Vec<u8> {
        let mut image = alloc::vec![0u8; MIPS_ENTRY_SIZE * MIPS_ENTRY_COUNT];
        for (i, entry) in entries.iter().enumerate() {
            let base = i * MIPS_ENTRY_SIZE;
            put(&mut image, base, entry.start_addr);
            append(&mut image, base + 4, entry.text.0, &entry.text.1);
            append(&mut image, base + 16, entry.data.0, &entry.data.1);
            append(&mut image, base + 28, entry.rodata.0, &entry.rodata.1);
        }
        image
    }

    /// Build an RV2P image from (code, fixups) for PROC1 and PROC2
    pub fn rv2p_image(procs: [(&[u32], [u32; RV2P_FIXUP_COUNT]); 2]) -> Vec<u8> {
        let mut image = alloc::vec![0u8; 2 * RV2P_PROC_SIZE];
        for (i, (code, fixups)) in procs.iter().enumerate() {
            let base = i * RV2P_PROC_SIZE;
            append(&mut image, base, 0, code);
            for (j, fixup) in fixups.iter().enumerate() {
                put(&mut image, base + SECTION_HEADER_SIZE + 4 * j, *fixup);
            }
        }
        image
    }

    /// Small but well-formed image for every processor
    pub fn sample_mips() -> Vec<u8> {
        let entry = |tag: u32| MipsSpec {
            start_addr: MIPS_VIEW + 0x80,
            text: (MIPS_VIEW, alloc::vec![tag, tag + 1, tag + 2]),
            data: (MIPS_VIEW + 0x1000, alloc::vec![tag + 0x10]),
            rodata: (MIPS_VIEW + 0x2000, alloc::vec![tag + 0x20, tag + 0x21]),
        };
        mips_image(&[
            entry(0xC0_0000),
            entry(0xC1_0000),
            entry(0xC2_0000),
            entry(0xC3_0000),
            entry(0xC4_0000),
        ])
    }

    pub fn sample_rv2p() -> Vec<u8> {
        let code: Vec<u32> = (0..16).map(|i| 0x1111_0000 + i).collect();
        let mut fixups = [0u32; RV2P_FIXUP_COUNT];
        fixups[0] = 5;
        rv2p_image([(&code, fixups), (&code, [0; RV2P_FIXUP_COUNT])])
    }

    const MIPS_VIEW: u32 = crate::drivers::net::ethernet::broadcom::nx2::regs::MIPS_VIEW_BASE;
}

#[cfg(test)]
mod tests {
    use super::build::*;
    use super::*;

    #[test]
    fn test_header_decoded_big_endian() {
        let image = mips_image(&[
            MipsSpec {
                start_addr: 0x0800_0010,
                text: (0x0800_0000, alloc::vec![0x0102_0304]),
                data: (0x0800_4000, alloc::vec![]),
                rodata: (0x0800_8000, alloc::vec![0xAABB_CCDD, 0x1]),
            },
            MipsSpec {
                start_addr: 0,
                text: (0, alloc::vec![]),
                data: (0, alloc::vec![]),
                rodata: (0, alloc::vec![]),
            },
            MipsSpec {
                start_addr: 0,
                text: (0, alloc::vec![]),
                data: (0, alloc::vec![]),
                rodata: (0, alloc::vec![]),
            },
            MipsSpec {
                start_addr: 0,
                text: (0, alloc::vec![]),
                data: (0, alloc::vec![]),
                rodata: (0, alloc::vec![]),
            },
            MipsSpec {
                start_addr: 0x0800_0020,
                text: (0, alloc::vec![7]),
                data: (0, alloc::vec![]),
                rodata: (0, alloc::vec![]),
            },
        ]);

        // First header word is the COM entry point, big-endian
        assert_eq!(&image[0..4], &[0x08, 0x00, 0x00, 0x10]);

        let fw = MipsFirmware::parse(&image).unwrap();
        assert_eq!(fw.com.start_addr, 0x0800_0010);
        assert_eq!(fw.com.text.addr, 0x0800_0000);
        assert_eq!(fw.com.text.bytes, &[1, 2, 3, 4]);
        assert_eq!(fw.com.text.word(0), Some(0x0102_0304));
        assert_eq!(fw.com.data.word_count(), 0);
        let rodata: alloc::vec::Vec<u32> = fw.com.rodata.words().collect();
        assert_eq!(rodata, alloc::vec![0xAABB_CCDD, 0x1]);
        assert_eq!(fw.txp.start_addr, 0x0800_0020);
        assert_eq!(fw.txp.text.word(0), Some(7));
    }

    #[test]
    fn test_truncated_header_rejected() {
        let image = [0u8; MIPS_ENTRY_SIZE * 4];
        assert_eq!(
            MipsFirmware::parse(&image),
            Err(FirmwareError::Truncated {
                needed: MIPS_ENTRY_SIZE * MIPS_ENTRY_COUNT,
                actual: MIPS_ENTRY_SIZE * 4,
            })
        );
    }

    #[test]
    fn test_section_out_of_bounds_rejected() {
        let mut image = sample_mips();
        // COM text length far past the end
        image[8..12].copy_from_slice(&0x0010_0000u32.to_be_bytes());
        assert!(matches!(
            MipsFirmware::parse(&image),
            Err(FirmwareError::SectionOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_misaligned_section_rejected() {
        let mut image = sample_rv2p();
        image[4..8].copy_from_slice(&6u32.to_be_bytes());
        assert_eq!(
            Rv2pFirmware::parse(&image),
            Err(FirmwareError::Misaligned { len: 6 })
        );
    }

    #[test]
    fn test_rv2p_fixups_parsed() {
        let image = sample_rv2p();
        let fw = Rv2pFirmware::parse(&image).unwrap();
        assert_eq!(fw.proc1.fixups[0], 5);
        assert_eq!(fw.proc1.fixups[1..], [0; 7]);
        assert_eq!(fw.proc1.code.word_count(), 16);
        assert_eq!(fw.proc2.code.word(15), Some(0x1111_000F));
    }
}
