mod common;

use common::*;
use elf::abi::{PT_LOAD, PT_NOTE, SHT_NOBITS, SHT_NOTE};
use gen_elf::{BSS_SIZE, Class, Endianness, RODATA_SIZE};
use rstest::rstest;

#[rstest]
#[case(Class::Elf32, Endianness::Little)]
#[case(Class::Elf32, Endianness::Big)]
#[case(Class::Elf64, Endianness::Little)]
#[case(Class::Elf64, Endianness::Big)]
fn generated_layout_matches_report(#[case] class: Class, #[case] endian: Endianness) {
    let output = gnu_fixture(class, endian);
    let data = &output.data;

    // every placed section is where the section headers say
    for info in &output.sections {
        let shdr = section(data, &info.name);
        assert_eq!(shdr.sh_offset, info.offset, "{}", info.name);
        assert_eq!(shdr.sh_size, info.size, "{}", info.name);
        if shdr.sh_type != SHT_NOBITS {
            assert_eq!(
                output.section_data(&info.name).unwrap(),
                section_bytes(data, &info.name)
            );
        }
    }
    let notes: Vec<_> = sections(data)
        .into_iter()
        .filter(|(_, shdr)| shdr.sh_type == SHT_NOTE)
        .collect();
    assert_eq!(notes.len(), 3);
    assert_eq!(section(data, ".bss").sh_size, BSS_SIZE);

    let phdrs = segments(data);
    let note_segments: Vec<_> = phdrs
        .iter()
        .filter(|phdr| phdr.p_type == PT_NOTE)
        .map(|phdr| (phdr.p_offset, phdr.p_filesz))
        .collect();
    assert_eq!(note_segments, output.note_segments);
    for phdr in phdrs.iter().filter(|phdr| phdr.p_type == PT_LOAD) {
        assert_eq!(phdr.p_offset % phdr.p_align, phdr.p_vaddr % phdr.p_align);
    }
    assert_mapped_consistently(data);

    // .rodata follows the notes and closes the read-only PT_LOAD
    let rodata = section(data, ".rodata");
    let abi = section(data, ".note.ABI-tag");
    assert_eq!(rodata.sh_size, RODATA_SIZE);
    assert!(rodata.sh_offset >= abi.sh_offset + abi.sh_size);
    let ro = phdrs
        .iter()
        .find(|phdr| phdr.p_type == PT_LOAD && phdr.p_offset == 0)
        .unwrap();
    assert_eq!(ro.p_filesz, rodata.sh_offset + rodata.sh_size);

    assert_eq!(
        build_id_by_elf_crate(data),
        Some(gen_elf::sample_build_id())
    );
}

#[rstest]
fn generated_without_note_sections() {
    let config = config(Class::Elf64, Endianness::Little).with_note_sections(false);
    let output = fixture(
        config,
        &gen_elf::gnu_note_sections(Class::Elf64, Endianness::Little),
    );
    assert!(
        sections(&output.data)
            .iter()
            .all(|(_, shdr)| shdr.sh_type != SHT_NOTE)
    );
    assert_eq!(output.note_segments.len(), 2);
    assert_eq!(build_id_by_elf_crate(&output.data), None);
}

#[rstest]
fn generated_without_rodata() {
    let output = tail_fixture(Class::Elf32, Endianness::Big);
    assert!(output.section(".rodata").is_none());
    assert!(sections(&output.data).iter().all(|(name, _)| name != ".rodata"));
    let abi = section(&output.data, ".note.ABI-tag");
    let ro = segments(&output.data)
        .into_iter()
        .find(|phdr| phdr.p_type == PT_LOAD && phdr.p_offset == 0)
        .unwrap();
    assert_eq!(ro.p_filesz, abi.sh_offset + abi.sh_size);
    assert_mapped_consistently(&output.data);
}
