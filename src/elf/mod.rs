//! ELF (Executable and Linkable Format) data structures and utilities.

mod defs;
mod ehdr;
mod tables;

// Internal module re-exports for use within the crate
pub(crate) use defs::{EntryWriter, align_down, align_up};
pub(crate) use tables::ElfTables;

// Public API exports
pub use defs::{ElfClass, Endian};
pub use ehdr::ElfHeader;
/// Header table entry types decoded by the elf crate.
pub use elf::{section::SectionHeader, segment::ProgramHeader};
/// ELF ABI constants and definitions from the elf crate.
pub use elf::abi::*;
