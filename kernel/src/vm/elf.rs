//! Minimal ELF64-LE-RISCV loader: just enough header/program-header parsing
//! to place PT_LOAD segments into guest RAM and discover the entry point.

use log::debug;

use super::error::VmFault;
use super::memory::Memory;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
/// RISC-V's `e_machine` value. Recommended, not asserted: a mismatch here
/// is only ever a hint that the image came from another toolchain's
/// default target, not a sign the file is malformed.
const EM_RISCV: u16 = 243;
const PT_LOAD: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// Loaded for the kernel image itself: no further permission checks beyond parsing.
    Kernel,
    /// Loaded as a user process image: segments must additionally fit a process's
    /// address space, validated by the caller via `kern::page_table`.
    User,
}

#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub vaddr: u64,
    pub file_offset: u64,
    pub file_size: u64,
    pub mem_size: u64,
}

#[derive(Debug, Clone)]
pub struct ElfImage {
    pub entry: u64,
    pub segments: Vec<ProgramHeader>,
}

fn read_u16(buf: &[u8], off: usize) -> Option<u16> {
    buf.get(off..off + 2).map(|b| u16::from_le_bytes(b.try_into().unwrap()))
}
fn read_u32(buf: &[u8], off: usize) -> Option<u32> {
    buf.get(off..off + 4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
}
fn read_u64(buf: &[u8], off: usize) -> Option<u64> {
    buf.get(off..off + 8).map(|b| u64::from_le_bytes(b.try_into().unwrap()))
}

/// Parses an ELF64-LE-RISCV file's header and program-header table.
/// `kind` is recorded only for the caller's own bookkeeping; parsing itself
/// does not differ between kernel and user images.
pub fn parse(bytes: &[u8], _kind: LoadKind) -> Result<ElfImage, VmFault> {
    if bytes.len() < 64 || bytes[0..4] != ELF_MAGIC {
        return Err(VmFault::InvalidInstruction);
    }
    if bytes[4] != ELFCLASS64 || bytes[5] != ELFDATA2LSB {
        return Err(VmFault::InvalidInstruction);
    }
    let machine = read_u16(bytes, 18).ok_or(VmFault::InvalidInstruction)?;
    if machine != EM_RISCV {
        debug!("elf: e_machine {machine} is not EM_RISCV ({EM_RISCV}), loading anyway");
    }
    let entry = read_u64(bytes, 24).ok_or(VmFault::InvalidInstruction)?;
    let phoff = read_u64(bytes, 32).ok_or(VmFault::InvalidInstruction)? as usize;
    let phentsize = read_u16(bytes, 54).ok_or(VmFault::InvalidInstruction)? as usize;
    let phnum = read_u16(bytes, 56).ok_or(VmFault::InvalidInstruction)? as usize;

    let mut segments = Vec::with_capacity(phnum);
    for i in 0..phnum {
        let base = phoff + i * phentsize;
        let p_type = read_u32(bytes, base).ok_or(VmFault::InvalidInstruction)?;
        let file_offset = read_u64(bytes, base + 8).ok_or(VmFault::InvalidInstruction)?;
        let vaddr = read_u64(bytes, base + 16).ok_or(VmFault::InvalidInstruction)?;
        let file_size = read_u64(bytes, base + 32).ok_or(VmFault::InvalidInstruction)?;
        let mem_size = read_u64(bytes, base + 40).ok_or(VmFault::InvalidInstruction)?;
        segments.push(ProgramHeader { p_type, vaddr, file_offset, file_size, mem_size });
    }
    Ok(ElfImage { entry, segments })
}

/// Copies every `PT_LOAD` segment's file bytes into guest memory at its
/// virtual address, zero-filling the `mem_size - file_size` BSS tail.
pub fn load_segments(image: &ElfImage, bytes: &[u8], memory: &mut Memory) -> Result<(), VmFault> {
    for seg in &image.segments {
        if seg.p_type != PT_LOAD {
            continue;
        }
        let start = seg.file_offset as usize;
        let end = start + seg.file_size as usize;
        let data = bytes.get(start..end).ok_or(VmFault::InvalidMemoryAccess)?;
        for (i, chunk) in data.chunks(1).enumerate() {
            memory.write8(seg.vaddr + i as u64, chunk[0])?;
        }
        for i in seg.file_size..seg.mem_size {
            memory.write8(seg.vaddr + i, 0)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_elf(entry: u64, segments: &[(u64, &[u8])]) -> Vec<u8> {
        let phoff = 64u64;
        let phentsize = 56u16;
        let mut header = vec![0u8; 64];
        header[0..4].copy_from_slice(&ELF_MAGIC);
        header[4] = ELFCLASS64;
        header[5] = ELFDATA2LSB;
        header[18..20].copy_from_slice(&EM_RISCV.to_le_bytes());
        header[24..32].copy_from_slice(&entry.to_le_bytes());
        header[32..40].copy_from_slice(&phoff.to_le_bytes());
        header[54..56].copy_from_slice(&phentsize.to_le_bytes());
        header[56..58].copy_from_slice(&(segments.len() as u16).to_le_bytes());

        let mut phdrs = Vec::new();
        let mut data_blob = Vec::new();
        let mut file_offset = phoff + segments.len() as u64 * phentsize as u64;
        for (vaddr, data) in segments {
            let mut ph = vec![0u8; 56];
            ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
            ph[8..16].copy_from_slice(&file_offset.to_le_bytes());
            ph[16..24].copy_from_slice(&vaddr.to_le_bytes());
            ph[32..40].copy_from_slice(&(data.len() as u64).to_le_bytes());
            ph[40..48].copy_from_slice(&(data.len() as u64).to_le_bytes());
            phdrs.extend_from_slice(&ph);
            data_blob.extend_from_slice(data);
            file_offset += data.len() as u64;
        }
        let mut out = header;
        out.extend_from_slice(&phdrs);
        out.extend_from_slice(&data_blob);
        out
    }

    #[test]
    fn parses_entry_and_segment_count() {
        let bytes = minimal_elf(0x1000, &[(0x1000, &[1, 2, 3, 4])]);
        let image = parse(&bytes, LoadKind::User).unwrap();
        assert_eq!(image.entry, 0x1000);
        assert_eq!(image.segments.len(), 1);
        assert_eq!(image.segments[0].vaddr, 0x1000);
    }

    #[test]
    fn accepts_non_riscv_e_machine() {
        let mut bytes = minimal_elf(0x1000, &[(0x1000, &[1, 2, 3, 4])]);
        bytes[18..20].copy_from_slice(&0u16.to_le_bytes());
        assert!(parse(&bytes, LoadKind::User).is_ok());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = minimal_elf(0, &[]);
        bytes[0] = 0;
        assert!(parse(&bytes, LoadKind::User).is_err());
    }

    #[test]
    fn load_segments_copies_bytes_and_zero_fills_bss() {
        let bytes = minimal_elf(0, &[(0x0, &[0xaa, 0xbb])]);
        let image = parse(&bytes, LoadKind::User).unwrap();
        let mut memory = Memory::new();
        load_segments(&image, &bytes, &mut memory).unwrap();
        assert_eq!(memory.read8(0).unwrap(), 0xaa);
        assert_eq!(memory.read8(1).unwrap(), 0xbb);
    }
}
