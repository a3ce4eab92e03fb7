#![allow(dead_code)]

use elf::{
    ElfBytes,
    abi::{PT_LOAD, PT_NOTE, SHF_ALLOC, SHT_NOBITS},
    endian::AnyEndian,
    section::SectionHeader,
    segment::ProgramHeader,
};
use gen_elf::{Class, ElfWriteOutput, ElfWriterConfig, Endianness, NoteElfWriter, NoteSectionDesc};
use std::path::PathBuf;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn tmp_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("elf-notes-tests-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

pub fn config(class: Class, endian: Endianness) -> ElfWriterConfig {
    ElfWriterConfig::default()
        .with_class(class)
        .with_endian(endian)
}

/// A shared object with the usual GNU notes.
pub fn gnu_fixture(class: Class, endian: Endianness) -> ElfWriteOutput {
    NoteElfWriter::new(config(class, endian))
        .write(&gen_elf::gnu_note_sections(class, endian))
        .unwrap()
}

/// The GNU notes at the very end of the read-only `PT_LOAD`, with nothing
/// else mapped behind them in that segment.
pub fn tail_fixture(class: Class, endian: Endianness) -> ElfWriteOutput {
    fixture(
        config(class, endian).with_rodata(false),
        &gen_elf::gnu_note_sections(class, endian),
    )
}

pub fn fixture(config: ElfWriterConfig, sections: &[NoteSectionDesc]) -> ElfWriteOutput {
    NoteElfWriter::new(config).write(sections).unwrap()
}

/// Section headers and names as seen by an independent reader.
pub fn sections(data: &[u8]) -> Vec<(String, SectionHeader)> {
    let file = ElfBytes::<AnyEndian>::minimal_parse(data).unwrap();
    let (shdrs, strtab) = file.section_headers_with_strtab().unwrap();
    let (shdrs, strtab) = (shdrs.unwrap(), strtab.unwrap());
    shdrs
        .iter()
        .map(|shdr| (strtab.get(shdr.sh_name as usize).unwrap().to_string(), shdr))
        .collect()
}

pub fn section(data: &[u8], name: &str) -> SectionHeader {
    sections(data)
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, shdr)| shdr)
        .unwrap_or_else(|| panic!("no section {name}"))
}

pub fn section_bytes<'a>(data: &'a [u8], name: &str) -> &'a [u8] {
    let shdr = section(data, name);
    &data[shdr.sh_offset as usize..(shdr.sh_offset + shdr.sh_size) as usize]
}

pub fn segments(data: &[u8]) -> Vec<ProgramHeader> {
    let file = ElfBytes::<AnyEndian>::minimal_parse(data).unwrap();
    file.segments().unwrap().iter().collect()
}

pub fn build_id_by_elf_crate(data: &[u8]) -> Option<Vec<u8>> {
    let file = ElfBytes::<AnyEndian>::minimal_parse(data).unwrap();
    let shdr = file.section_header_by_name(".note.gnu.build-id").unwrap()?;
    let notes = file.section_data_as_notes(&shdr).unwrap();
    notes.into_iter().find_map(|note| match note {
        elf::note::Note::GnuBuildId(id) => Some(id.0.to_vec()),
        _ => None,
    })
}

fn loaded_by<'a>(loads: &[&'a ProgramHeader], offset: u64, size: u64) -> Option<&'a ProgramHeader> {
    loads
        .iter()
        .find(|load| load.p_offset <= offset && offset + size <= load.p_offset + load.p_filesz)
        .copied()
}

/// Every allocated section and mapped note segment sits in a `PT_LOAD` at
/// the address that segment gives its bytes, and no two `PT_LOAD`s share
/// an address.
pub fn assert_mapped_consistently(data: &[u8]) {
    let phdrs = segments(data);
    let loads: Vec<&ProgramHeader> = phdrs.iter().filter(|phdr| phdr.p_type == PT_LOAD).collect();
    for (name, shdr) in sections(data) {
        if (shdr.sh_flags & SHF_ALLOC as u64) == 0 || shdr.sh_type == SHT_NOBITS {
            continue;
        }
        let load = loaded_by(&loads, shdr.sh_offset, shdr.sh_size)
            .unwrap_or_else(|| panic!("{name} is allocated but not loaded"));
        assert_eq!(
            shdr.sh_addr.wrapping_sub(shdr.sh_offset),
            load.p_vaddr.wrapping_sub(load.p_offset),
            "{name} is mapped at the wrong address"
        );
    }
    for phdr in phdrs.iter().filter(|phdr| phdr.p_type == PT_NOTE && phdr.p_memsz > 0) {
        let load = loaded_by(&loads, phdr.p_offset, phdr.p_filesz)
            .unwrap_or_else(|| panic!("PT_NOTE at 0x{:x} is not loaded", phdr.p_offset));
        assert_eq!(
            phdr.p_vaddr.wrapping_sub(phdr.p_offset),
            load.p_vaddr.wrapping_sub(load.p_offset),
            "PT_NOTE at 0x{:x} is mapped at the wrong address",
            phdr.p_offset
        );
    }
    for (idx, a) in loads.iter().enumerate() {
        for b in &loads[idx + 1..] {
            assert!(
                a.p_vaddr + a.p_memsz <= b.p_vaddr || b.p_vaddr + b.p_memsz <= a.p_vaddr,
                "PT_LOADs at 0x{:x} and 0x{:x} overlap",
                a.p_vaddr,
                b.p_vaddr
            );
        }
    }
}

pub fn loads(data: &[u8]) -> Vec<ProgramHeader> {
    segments(data)
        .into_iter()
        .filter(|phdr| phdr.p_type == PT_LOAD)
        .collect()
}
