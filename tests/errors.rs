mod common;

use common::*;
use elf_notes::{ElfImage, Error, Note, NoteType, WriteOptions};
use gen_elf::{Class, Endianness, NoteDesc, NoteSectionDesc};
use rstest::rstest;

fn build_id_only() -> gen_elf::ElfWriteOutput {
    let sections = [NoteSectionDesc::new(".note.gnu.build-id", 4)
        .with_note(NoteDesc::gnu_build_id(&gen_elf::sample_build_id()))
        .in_segment(0)];
    fixture(config(Class::Elf64, Endianness::Little), &sections)
}

#[rstest]
fn bad_magic_is_a_parse_error() {
    let mut data = gnu_fixture(Class::Elf64, Endianness::Little).data;
    data[1] = b'X';
    let err = ElfImage::parse(data).unwrap_err();
    assert!(matches!(err, Error::Parse { .. }), "{err}");
}

#[rstest]
#[case(10)]
#[case(0x100)]
fn truncated_file_is_a_parse_error(#[case] len: usize) {
    let mut data = gnu_fixture(Class::Elf64, Endianness::Little).data;
    data.truncate(len);
    let err = ElfImage::parse(data).unwrap_err();
    assert!(matches!(err, Error::Parse { .. }), "{err}");
}

#[rstest]
fn missing_file_is_an_io_error() {
    let path = tmp_path("does-not-exist.so");
    let err = ElfImage::parse(path.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, Error::Io { .. }), "{err}");
}

#[rstest]
fn missing_notes_are_not_found() {
    let fixture = gnu_fixture(Class::Elf32, Endianness::Little);
    let mut image = ElfImage::parse(fixture.data.as_slice()).unwrap();
    assert!(matches!(
        image.note(NoteType::GoldVersion),
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        image.note_mut(NoteType::Hwcap),
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        image.remove_note_type(NoteType::GoldVersion),
        Err(Error::NotFound { .. })
    ));
    // same type, different description
    let stranger = Note::new("GNU", NoteType::BuildId, vec![0u8; 20]);
    assert!(matches!(
        image.remove_note(&stranger),
        Err(Error::NotFound { .. })
    ));
    assert_eq!(image.notes().count(), 3);
    assert_eq!(image.to_bytes().unwrap(), fixture.data);
}

#[rstest]
fn add_without_note_region_is_not_found() {
    let fixture = fixture(config(Class::Elf64, Endianness::Little), &[]);
    let mut image = ElfImage::parse(fixture.data.as_slice()).unwrap();
    assert!(image.regions().is_empty());
    let err = image
        .add_note(Note::new("Foo", NoteType::GoldVersion, [123u8]))
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }), "{err}");
}

#[rstest]
fn empty_owner_name_is_malformed() {
    let mut fixture = build_id_only();
    let offset = fixture.section(".note.gnu.build-id").unwrap().offset as usize;
    fixture.data[offset..offset + 4].copy_from_slice(&0u32.to_le_bytes());
    let err = ElfImage::parse(fixture.data).unwrap_err();
    assert!(matches!(err, Error::MalformedNote { .. }), "{err}");
}

#[rstest]
#[case(0)]
#[case(4)]
fn oversized_lengths_are_truncated_notes(#[case] field: usize) {
    let mut fixture = build_id_only();
    let offset = fixture.section(".note.gnu.build-id").unwrap().offset as usize + field;
    fixture.data[offset..offset + 4].copy_from_slice(&0x1000u32.to_le_bytes());
    let err = ElfImage::parse(fixture.data).unwrap_err();
    assert!(matches!(err, Error::TruncatedNote { .. }), "{err}");
}

#[rstest]
fn note_section_outside_the_file_is_a_parse_error() {
    let mut fixture = build_id_only();
    let file = fixture.data.len() as u64;
    // sh_size of the first section header after the null entry
    let shoff = u64::from_le_bytes(fixture.data[0x28..0x30].try_into().unwrap());
    let sh_size = (shoff + 64 + 0x20) as usize;
    fixture.data[sh_size..sh_size + 8].copy_from_slice(&(file * 2).to_le_bytes());
    let err = ElfImage::parse(fixture.data).unwrap_err();
    assert!(matches!(err, Error::Parse { .. }), "{err}");
}

#[rstest]
fn partial_note_segment_is_inconsistent_once_edited() {
    let mut fixture = build_id_only();
    // p_filesz of the PT_NOTE entry: PT_PHDR and three PT_LOADs come first
    let p_filesz = 64 + 4 * 56 + 0x20;
    let size = u64::from_le_bytes(fixture.data[p_filesz..p_filesz + 8].try_into().unwrap());
    fixture.data[p_filesz..p_filesz + 8].copy_from_slice(&(size - 4).to_le_bytes());

    let mut image = ElfImage::parse(fixture.data.as_slice()).unwrap();
    assert_eq!(image.regions().len(), 1);
    assert!(image.regions()[0].segments().is_empty());
    // nothing is repacked, so the odd segment is written back as it was
    assert_eq!(image.to_bytes().unwrap(), fixture.data);

    image
        .note_mut(NoteType::BuildId)
        .unwrap()
        .set_description(vec![1u8; 8]);
    let err = image.to_bytes().unwrap_err();
    assert!(matches!(err, Error::InconsistentHeader { .. }), "{err}");
}

#[rstest]
fn elf32_offsets_past_u32_are_a_layout_overflow() {
    let mut fixture = tail_fixture(Class::Elf32, Endianness::Little);
    let index = sections(&fixture.data)
        .iter()
        .position(|(name, _)| name == ".comment")
        .unwrap();
    // sh_offset of .comment, right below the 4 GiB limit
    let shoff = u32::from_le_bytes(fixture.data[0x20..0x24].try_into().unwrap()) as usize;
    let sh_offset = shoff + index * 40 + 16;
    fixture.data[sh_offset..sh_offset + 4].copy_from_slice(&0xffff_ff00u32.to_le_bytes());

    let mut image = ElfImage::parse(fixture.data.as_slice()).unwrap();
    assert_eq!(image.to_bytes().unwrap(), fixture.data);
    // the growth shifts everything after the notes by a page
    image
        .note_mut(NoteType::BuildId)
        .unwrap()
        .set_description(vec![1u8; 500]);
    let err = image.to_bytes().unwrap_err();
    assert!(matches!(err, Error::LayoutOverflow { .. }), "{err}");
}

#[rstest]
#[case(true)]
#[case(false)]
fn unwritable_destination_is_a_write_error(#[case] atomic: bool) {
    let fixture = gnu_fixture(Class::Elf64, Endianness::Little);
    let image = ElfImage::parse(fixture.data.as_slice()).unwrap();
    let path = tmp_path("missing-dir").join("out.so");
    let options = WriteOptions::new().with_atomic(atomic);
    let err = image.write_with(&path, &options).unwrap_err();
    assert!(matches!(err, Error::Write { .. }), "{err}");
    assert!(!path.exists());
}
