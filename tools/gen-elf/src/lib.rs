//! `gen-elf` is a utility for generating small ELF shared objects with
//! configurable note sections and `PT_NOTE` segments, specifically designed
//! for testing ELF note editors.
//!
//! Every generated file is fully described by its section and program
//! headers, so tests can cross-check a rewritten file against the layout
//! reported in [`ElfWriteOutput`].

mod common;
mod writer;

pub use common::{
    Class, Endianness, NT_GNU_ABI_TAG, NT_GNU_BUILD_ID, NT_GNU_GOLD_VERSION,
    NT_GNU_PROPERTY_TYPE_0, NoteDesc, NoteSectionDesc, SectionInfo,
};
pub use writer::{BSS_SIZE, ElfWriteOutput, ElfWriterConfig, NoteElfWriter, RODATA_SIZE};

/// A 20-byte build id with recognisable content.
pub fn sample_build_id() -> Vec<u8> {
    (0..20u8).map(|i| 0xb0 ^ i).collect()
}

/// The note sections of a typical GNU/Linux shared object.
///
/// `.note.gnu.property` (8-aligned on ELF64) gets its own `PT_NOTE`;
/// `.note.gnu.build-id` and `.note.ABI-tag` share one, like the output of
/// common linkers.
pub fn gnu_note_sections(class: Class, endian: Endianness) -> Vec<NoteSectionDesc> {
    let property_align = match class {
        Class::Elf64 => 8,
        Class::Elf32 => 4,
    };
    vec![
        NoteSectionDesc::new(".note.gnu.property", property_align)
            .with_note(NoteDesc::gnu_property(&[
                0x02, 0x00, 0x00, 0xc0, 0x04, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00,
                0x00, 0x00, 0x00,
            ]))
            .in_segment(0),
        NoteSectionDesc::new(".note.gnu.build-id", 4)
            .with_note(NoteDesc::gnu_build_id(&sample_build_id()))
            .in_segment(1),
        NoteSectionDesc::new(".note.ABI-tag", 4)
            .with_note(NoteDesc::gnu_abi_tag(endian, [3, 2, 0]))
            .in_segment(1),
    ]
}
