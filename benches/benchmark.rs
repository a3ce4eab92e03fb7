use criterion::{Criterion, criterion_group, criterion_main};
use elf_notes::{ElfImage, NoteType};
use gen_elf::{Class, ElfWriterConfig, Endianness, NoteElfWriter, gnu_note_sections};

fn fixture() -> Vec<u8> {
    NoteElfWriter::new(ElfWriterConfig::default())
        .write(&gnu_note_sections(Class::Elf64, Endianness::Little))
        .unwrap()
        .data
}

fn parse_benchmark(c: &mut Criterion) {
    let data = fixture();
    c.bench_function("elf_notes:parse", |b| {
        b.iter(|| {
            let image = ElfImage::parse(data.as_slice()).unwrap();
            image.note(NoteType::BuildId).unwrap().description().len()
        });
    });
}

fn rebuild_benchmark(c: &mut Criterion) {
    let data = fixture();
    let image = ElfImage::parse(data.as_slice()).unwrap();
    c.bench_function("elf_notes:to_bytes:unchanged", |b| {
        b.iter(|| image.to_bytes().unwrap())
    });

    let mut grown = ElfImage::parse(data.as_slice()).unwrap();
    grown
        .note_mut(NoteType::BuildId)
        .unwrap()
        .set_description(vec![0x5a; 500]);
    c.bench_function("elf_notes:to_bytes:grown", |b| {
        b.iter(|| grown.to_bytes().unwrap())
    });
}

criterion_group!(benches, parse_benchmark, rebuild_benchmark);
criterion_main!(benches);
