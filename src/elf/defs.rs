//! ELF format definitions and utilities.
//!
//! This module provides the word-size and byte-order aware primitives shared
//! by the header model, the note codec and the layout rebuilder. Header
//! tables are read through the `elf` crate; everything that is written back
//! goes through the encoders defined here.

use crate::{Result, layout_overflow_error};
use alloc::format;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use elf::{endian::AnyEndian, file::Class};

/// Size of the 64-bit ELF header.
pub(crate) const EHDR_SIZE_64: usize = 64;
/// Size of the 32-bit ELF header.
pub(crate) const EHDR_SIZE_32: usize = 52;
/// Size of a 64-bit program header entry.
pub(crate) const PHDR_SIZE_64: usize = 56;
/// Size of a 32-bit program header entry.
pub(crate) const PHDR_SIZE_32: usize = 32;
/// Size of a 64-bit section header entry.
pub(crate) const SHDR_SIZE_64: usize = 64;
/// Size of a 32-bit section header entry.
pub(crate) const SHDR_SIZE_32: usize = 40;

/// Byte order declared by `e_ident[EI_DATA]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endian {
    /// `ELFDATA2LSB`
    Little,
    /// `ELFDATA2MSB`
    Big,
}

impl From<AnyEndian> for Endian {
    fn from(value: AnyEndian) -> Self {
        match value {
            AnyEndian::Little => Endian::Little,
            AnyEndian::Big => Endian::Big,
        }
    }
}

impl Endian {
    #[inline]
    pub(crate) fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(buf),
            Endian::Big => BigEndian::read_u32(buf),
        }
    }

    #[inline]
    pub(crate) fn write_u32(self, buf: &mut [u8], value: u32) {
        match self {
            Endian::Little => LittleEndian::write_u32(buf, value),
            Endian::Big => BigEndian::write_u32(buf, value),
        }
    }

    #[inline]
    pub(crate) fn write_u64(self, buf: &mut [u8], value: u64) {
        match self {
            Endian::Little => LittleEndian::write_u64(buf, value),
            Endian::Big => BigEndian::write_u64(buf, value),
        }
    }
}

/// Word size declared by `e_ident[EI_CLASS]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElfClass {
    /// `ELFCLASS32`
    Elf32,
    /// `ELFCLASS64`
    Elf64,
}

impl From<Class> for ElfClass {
    fn from(value: Class) -> Self {
        match value {
            Class::ELF32 => ElfClass::Elf32,
            Class::ELF64 => ElfClass::Elf64,
        }
    }
}

impl ElfClass {
    /// Size in bytes of an address or offset field.
    #[inline]
    pub fn word_size(self) -> u64 {
        match self {
            ElfClass::Elf32 => 4,
            ElfClass::Elf64 => 8,
        }
    }

    /// Largest file offset or size the class can express.
    #[inline]
    pub fn max_word(self) -> u64 {
        match self {
            ElfClass::Elf32 => u32::MAX as u64,
            ElfClass::Elf64 => u64::MAX,
        }
    }

    #[inline]
    pub(crate) fn ehdr_size(self) -> usize {
        match self {
            ElfClass::Elf32 => EHDR_SIZE_32,
            ElfClass::Elf64 => EHDR_SIZE_64,
        }
    }

    #[inline]
    pub(crate) fn phentsize(self) -> usize {
        match self {
            ElfClass::Elf32 => PHDR_SIZE_32,
            ElfClass::Elf64 => PHDR_SIZE_64,
        }
    }

    #[inline]
    pub(crate) fn shentsize(self) -> usize {
        match self {
            ElfClass::Elf32 => SHDR_SIZE_32,
            ElfClass::Elf64 => SHDR_SIZE_64,
        }
    }
}

/// Sequential encoder for one fixed-size header entry.
///
/// Word fields are checked against the class before they are stored, so a
/// 32-bit image never silently receives a truncated offset.
pub(crate) struct EntryWriter<'buf> {
    buf: &'buf mut [u8],
    pos: usize,
    class: ElfClass,
    endian: Endian,
}

impl<'buf> EntryWriter<'buf> {
    pub(crate) fn new(buf: &'buf mut [u8], class: ElfClass, endian: Endian) -> Self {
        Self {
            buf,
            pos: 0,
            class,
            endian,
        }
    }

    pub(crate) fn u32(&mut self, value: u32) {
        self.endian.write_u32(&mut self.buf[self.pos..], value);
        self.pos += 4;
    }

    /// Writes an `ElfN_Addr`/`ElfN_Off`/`ElfN_Xword` sized field.
    pub(crate) fn word(&mut self, value: u64, field: &'static str) -> Result<()> {
        match self.class {
            ElfClass::Elf64 => {
                self.endian.write_u64(&mut self.buf[self.pos..], value);
                self.pos += 8;
            }
            ElfClass::Elf32 => {
                let value = u32::try_from(value).map_err(|_| {
                    layout_overflow_error(format!(
                        "{field} 0x{value:x} does not fit in a 32-bit ELF image"
                    ))
                })?;
                self.u32(value);
            }
        }
        Ok(())
    }
}

/// Rounds `value` up to a multiple of `align`. An alignment of 0 or 1 means
/// no constraint.
#[inline]
pub(crate) fn align_up(value: u64, align: u64) -> Option<u64> {
    if align <= 1 {
        return Some(value);
    }
    value
        .checked_add(align - 1)
        .map(|value| value / align * align)
}

/// Rounds `value` down to a multiple of `align`.
#[inline]
pub(crate) fn align_down(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    value / align * align
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn elf32_words_reject_values_past_u32() {
        let mut buf = [0u8; 8];
        let mut writer = EntryWriter::new(&mut buf, ElfClass::Elf32, Endian::Little);
        writer.word(u32::MAX as u64, "sh_offset").unwrap();
        let err = writer
            .word(u32::MAX as u64 + 1, "sh_offset")
            .unwrap_err();
        assert!(matches!(err, Error::LayoutOverflow { .. }), "{err}");
        assert_eq!(buf[..4], [0xff; 4]);
    }

    #[test]
    fn elf64_words_take_the_full_range() {
        let mut buf = [0u8; 8];
        EntryWriter::new(&mut buf, ElfClass::Elf64, Endian::Big)
            .word(u32::MAX as u64 + 1, "sh_offset")
            .unwrap();
        assert_eq!(buf, [0, 0, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_up(0x21, 0x10), Some(0x30));
        assert_eq!(align_up(0x21, 0), Some(0x21));
        assert_eq!(align_up(u64::MAX, 8), None);
        assert_eq!(align_down(0x2f, 0x10), 0x20);
    }
}
