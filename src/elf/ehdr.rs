//! ELF header parsing and validation
//!
//! This module wraps the file header decoded by the `elf` crate and adds the
//! checks and range helpers the note editor relies on: header table bounds,
//! entry sizes, and the in-place patching of `e_phoff`/`e_shoff` after a
//! layout change.

use crate::{
    Result,
    elf::{ElfClass, Endian, EntryWriter},
    parse_error,
};
use alloc::format;
use elf::{endian::AnyEndian, file::FileHeader};

/// File offset of `e_phoff` in a 32-bit header.
const E_PHOFF_32: usize = 0x1c;
/// File offset of `e_phoff` in a 64-bit header.
const E_PHOFF_64: usize = 0x20;

/// A validated view of the ELF file header.
///
/// The header tables' entry counts come from the parsed tables themselves,
/// so extended numbering (`e_shnum == 0` with the count in section 0) is
/// already resolved here.
#[derive(Clone, Debug)]
pub struct ElfHeader {
    class: ElfClass,
    endian: Endian,
    e_type: u16,
    e_machine: u16,
    e_phoff: u64,
    e_phentsize: usize,
    e_phnum: usize,
    e_shoff: u64,
    e_shentsize: usize,
    e_shnum: usize,
    e_shstrndx: usize,
}

impl ElfHeader {
    /// Builds the header view from the `elf` crate's decoded header and the
    /// number of entries actually found in each table.
    pub(crate) fn new(ehdr: &FileHeader<AnyEndian>, phnum: usize, shnum: usize) -> Self {
        Self {
            class: ehdr.class.into(),
            endian: ehdr.endianness.into(),
            e_type: ehdr.e_type,
            e_machine: ehdr.e_machine,
            e_phoff: ehdr.e_phoff,
            e_phentsize: ehdr.e_phentsize as usize,
            e_phnum: phnum,
            e_shoff: ehdr.e_shoff,
            e_shentsize: ehdr.e_shentsize as usize,
            e_shnum: shnum,
            e_shstrndx: ehdr.e_shstrndx as usize,
        }
    }

    /// Validates the header tables against the file
    ///
    /// Checks performed:
    /// 1. The ELF header itself fits in the file
    /// 2. Entry sizes match the declared class
    /// 3. Both header tables lie inside the file
    /// 4. The two tables do not overlap each other or the ELF header
    pub(crate) fn validate(&self, file_len: usize) -> Result<()> {
        let file_len = file_len as u64;
        if (self.class.ehdr_size() as u64) > file_len {
            return Err(parse_error("truncated ELF header"));
        }
        if self.e_phnum > 0 && self.e_phentsize != self.class.phentsize() {
            return Err(parse_error(format!(
                "unexpected e_phentsize {}",
                self.e_phentsize
            )));
        }
        if self.e_shnum > 0 && self.e_shentsize != self.class.shentsize() {
            return Err(parse_error(format!(
                "unexpected e_shentsize {}",
                self.e_shentsize
            )));
        }

        let (phdr_start, phdr_end) = self.phdr_range();
        let (shdr_start, shdr_end) = self.shdr_range();
        if self.e_phnum > 0 && phdr_end > file_len {
            return Err(parse_error("truncated program header table"));
        }
        if self.e_shnum > 0 && shdr_end > file_len {
            return Err(parse_error("truncated section header table"));
        }

        let ehdr_end = self.class.ehdr_size() as u64;
        if self.e_phnum > 0 && phdr_start < ehdr_end {
            return Err(parse_error("program header table overlaps the ELF header"));
        }
        if self.e_shnum > 0 && shdr_start < ehdr_end {
            return Err(parse_error("section header table overlaps the ELF header"));
        }
        if self.e_phnum > 0
            && self.e_shnum > 0
            && phdr_start < shdr_end
            && shdr_start < phdr_end
        {
            return Err(parse_error("program and section header tables overlap"));
        }
        Ok(())
    }

    /// Gets the word size of the image.
    #[inline]
    pub fn class(&self) -> ElfClass {
        self.class
    }

    /// Gets the byte order of the image.
    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Checks if the image uses 64-bit words.
    #[inline]
    pub fn is_64(&self) -> bool {
        self.class == ElfClass::Elf64
    }

    /// Gets the object file type (`e_type`).
    #[inline]
    pub fn e_type(&self) -> u16 {
        self.e_type
    }

    /// Gets the target machine (`e_machine`).
    #[inline]
    pub fn e_machine(&self) -> u16 {
        self.e_machine
    }

    /// Gets the number of program headers
    #[inline]
    pub fn e_phnum(&self) -> usize {
        self.e_phnum
    }

    /// Gets the number of section headers
    #[inline]
    pub fn e_shnum(&self) -> usize {
        self.e_shnum
    }

    /// Gets the index of the section name string table
    #[inline]
    pub fn e_shstrndx(&self) -> usize {
        self.e_shstrndx
    }

    /// Gets the file offset of the program header table
    #[inline]
    pub(crate) fn e_phoff(&self) -> u64 {
        self.e_phoff
    }

    /// Gets the file offset of the section header table
    #[inline]
    pub(crate) fn e_shoff(&self) -> u64 {
        self.e_shoff
    }

    /// Calculates the byte range of the program header table
    ///
    /// # Returns
    /// A tuple containing:
    /// 1. The start offset of the program header table
    /// 2. The end offset of the program header table
    #[inline]
    pub(crate) fn phdr_range(&self) -> (u64, u64) {
        let phdrs_size = (self.e_phentsize * self.e_phnum) as u64;
        let phdr_start = self.e_phoff;
        (phdr_start, phdr_start.saturating_add(phdrs_size))
    }

    /// Calculates the byte range of the section header table
    ///
    /// # Returns
    /// A tuple containing:
    /// 1. The start offset of the section header table
    /// 2. The end offset of the section header table
    #[inline]
    pub(crate) fn shdr_range(&self) -> (u64, u64) {
        let shdrs_size = (self.e_shentsize * self.e_shnum) as u64;
        let shdr_start = self.e_shoff;
        (shdr_start, shdr_start.saturating_add(shdrs_size))
    }

    /// Stores new header table offsets into a serialized ELF header.
    ///
    /// `e_phoff` and `e_shoff` are adjacent in both classes, so they are
    /// written as one run starting at `e_phoff`.
    pub(crate) fn write_table_offsets(
        &self,
        out: &mut [u8],
        e_phoff: u64,
        e_shoff: u64,
    ) -> Result<()> {
        let start = match self.class {
            ElfClass::Elf32 => E_PHOFF_32,
            ElfClass::Elf64 => E_PHOFF_64,
        };
        let mut writer = EntryWriter::new(&mut out[start..], self.class, self.endian);
        writer.word(e_phoff, "e_phoff")?;
        writer.word(e_shoff, "e_shoff")?;
        Ok(())
    }
}
