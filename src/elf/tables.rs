//! Program and section header tables.

use crate::{
    Result,
    elf::{ElfHeader, EntryWriter},
};
use alloc::{string::String, vec::Vec};
use elf::{section::SectionHeader, segment::ProgramHeader};

/// The header tables of an image, decoded once at parse time and
/// re-encoded at their (possibly shifted) offsets on write-back.
#[derive(Clone, Debug, Default)]
pub(crate) struct ElfTables {
    pub(crate) phdrs: Vec<ProgramHeader>,
    pub(crate) shdrs: Vec<SectionHeader>,
    /// Section names resolved through `.shstrtab`, empty when unavailable.
    pub(crate) names: Vec<String>,
}

impl ElfTables {
    /// Serializes every program header into `out`, starting at `offset`.
    pub(crate) fn write_phdrs(
        &self,
        header: &ElfHeader,
        out: &mut [u8],
        offset: usize,
    ) -> Result<()> {
        let entsize = header.class().phentsize();
        for (idx, phdr) in self.phdrs.iter().enumerate() {
            let start = offset + idx * entsize;
            write_phdr(header, &mut out[start..start + entsize], phdr)?;
        }
        Ok(())
    }

    /// Serializes every section header into `out`, starting at `offset`.
    pub(crate) fn write_shdrs(
        &self,
        header: &ElfHeader,
        out: &mut [u8],
        offset: usize,
    ) -> Result<()> {
        let entsize = header.class().shentsize();
        for (idx, shdr) in self.shdrs.iter().enumerate() {
            let start = offset + idx * entsize;
            write_shdr(header, &mut out[start..start + entsize], shdr)?;
        }
        Ok(())
    }
}

/// `p_flags` moves after `p_type` in the 64-bit layout.
fn write_phdr(header: &ElfHeader, buf: &mut [u8], phdr: &ProgramHeader) -> Result<()> {
    let mut writer = EntryWriter::new(buf, header.class(), header.endian());
    writer.u32(phdr.p_type);
    if header.is_64() {
        writer.u32(phdr.p_flags);
    }
    writer.word(phdr.p_offset, "p_offset")?;
    writer.word(phdr.p_vaddr, "p_vaddr")?;
    writer.word(phdr.p_paddr, "p_paddr")?;
    writer.word(phdr.p_filesz, "p_filesz")?;
    writer.word(phdr.p_memsz, "p_memsz")?;
    if !header.is_64() {
        writer.u32(phdr.p_flags);
    }
    writer.word(phdr.p_align, "p_align")?;
    Ok(())
}

fn write_shdr(header: &ElfHeader, buf: &mut [u8], shdr: &SectionHeader) -> Result<()> {
    let mut writer = EntryWriter::new(buf, header.class(), header.endian());
    writer.u32(shdr.sh_name);
    writer.u32(shdr.sh_type);
    writer.word(shdr.sh_flags, "sh_flags")?;
    writer.word(shdr.sh_addr, "sh_addr")?;
    writer.word(shdr.sh_offset, "sh_offset")?;
    writer.word(shdr.sh_size, "sh_size")?;
    writer.u32(shdr.sh_link);
    writer.u32(shdr.sh_info);
    writer.word(shdr.sh_addralign, "sh_addralign")?;
    writer.word(shdr.sh_entsize, "sh_entsize")?;
    Ok(())
}
