//! Loads an ELF32/ELF64 image's `PT_LOAD` segments into a [`MemoryStorage`].

use crate::memory::{MemoryStorage, MEM_SIZE_WORDS};
use goblin::elf::program_header::PT_LOAD;
use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElfLoadError {
    #[error("failed to parse elf file: {0}")]
    Parse(#[from] goblin::error::Error),
    #[error("segment at physical address {paddr:#010x} of size {size:#x} overflows memory")]
    SegmentOverflows { paddr: u32, size: u32 },
    #[error("segment file range [{start:#x}..{end:#x}) overflows the {len:#x}-byte file")]
    SegmentOverflowsFile { start: usize, end: usize, len: usize },
}

/// Parses `bytes` as an ELF32 or ELF64 image and copies every `PT_LOAD` segment into `storage`,
/// zero-filling the tail between `p_filesz` and `p_memsz`. Returns the image's entry point.
pub fn load_into(storage: &mut MemoryStorage, bytes: &[u8]) -> Result<u32, ElfLoadError> {
    let elf = goblin::elf::Elf::parse(bytes)?;

    let mem_size_bytes = (MEM_SIZE_WORDS * 4) as u64;
    for header in elf.program_headers.iter().filter(|h| h.p_type == PT_LOAD && h.p_memsz > 0) {
        let paddr = header.p_paddr;
        if paddr.saturating_add(header.p_memsz) > mem_size_bytes {
            return Err(ElfLoadError::SegmentOverflows {
                paddr: paddr as u32,
                size: header.p_memsz as u32,
            });
        }

        debug!(
            "loading segment: file range [{:#010x}..{:#010x}] to mem range [{:#010x}..{:#010x})",
            header.p_offset,
            header.p_offset + header.p_filesz,
            paddr,
            paddr + header.p_memsz,
        );

        let file_range = header.file_range();
        if file_range.end > bytes.len() {
            return Err(ElfLoadError::SegmentOverflowsFile {
                start: file_range.start,
                end: file_range.end,
                len: bytes.len(),
            });
        }

        let dest = storage.as_bytes_mut();
        let dest_start = paddr as usize;
        let file_bytes = &bytes[file_range];
        dest[dest_start..dest_start + file_bytes.len()].copy_from_slice(file_bytes);

        let zero_start = dest_start + header.p_filesz as usize;
        let zero_end = dest_start + header.p_memsz as usize;
        dest[zero_start..zero_end].fill(0);
    }

    Ok(elf.entry as u32)
}
