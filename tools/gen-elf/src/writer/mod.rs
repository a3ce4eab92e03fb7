use crate::common::{Class, Endianness, NoteSectionDesc, SectionInfo};
use anyhow::{Result, bail};
use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use elf::abi::*;
use layout::ElfLayout;
use std::path::Path;

mod layout;

pub(crate) fn align_up(val: u64, align: u64) -> u64 {
    if align <= 1 {
        return val;
    }
    val.div_ceil(align) * align
}

pub(crate) struct StringTable {
    data: Vec<u8>,
}

impl StringTable {
    pub(crate) fn new() -> Self {
        Self { data: vec![0u8] } // initial null byte
    }

    pub(crate) fn add(&mut self, s: &str) -> u32 {
        let idx = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        idx
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Configuration for ELF writer with customizable parameters.
///
/// This struct allows fine-tuning of ELF generation parameters:
/// - `class`: 32 or 64-bit output
/// - `endian`: byte order of every header and note record
/// - `base_addr`: Virtual address where the ELF will be loaded
/// - `page_size`: Alignment of the `PT_LOAD` segments (typically 0x1000)
/// - `emit_note_sections`: Whether note sections get section headers; without
///   them the notes are only reachable through `PT_NOTE`
/// - `emit_rodata`: Whether a `.rodata` section follows the notes inside the
///   read-only `PT_LOAD`, as the hash and symbol tables do in linked objects
///
/// # Example
///
/// ```ignore
/// let config = ElfWriterConfig::default()
///     .with_class(Class::Elf32)
///     .with_endian(Endianness::Big);
/// let writer = NoteElfWriter::new(config);
/// ```
#[derive(Clone, Debug)]
pub struct ElfWriterConfig {
    /// Word size (default: ELF64)
    pub class: Class,
    /// Byte order (default: little endian)
    pub endian: Endianness,
    /// Base address for memory mapping (default: 0x400000)
    pub base_addr: u64,
    /// Page size for alignment (default: 0x1000)
    pub page_size: u64,
    /// Emit section headers for note sections (default: true)
    pub emit_note_sections: bool,
    /// Place `.rodata` right after the notes (default: true)
    pub emit_rodata: bool,
}

impl Default for ElfWriterConfig {
    fn default() -> Self {
        Self {
            class: Class::Elf64,
            endian: Endianness::Little,
            base_addr: 0x400000,
            page_size: 0x1000,
            emit_note_sections: true,
            emit_rodata: true,
        }
    }
}

impl ElfWriterConfig {
    /// Set the word size
    pub fn with_class(mut self, class: Class) -> Self {
        self.class = class;
        self
    }

    /// Set the byte order
    pub fn with_endian(mut self, endian: Endianness) -> Self {
        self.endian = endian;
        self
    }

    /// Set custom base address
    pub fn with_base_addr(mut self, addr: u64) -> Self {
        self.base_addr = addr;
        self
    }

    /// Set custom page size
    pub fn with_page_size(mut self, size: u64) -> Self {
        self.page_size = size;
        self
    }

    /// Choose whether note sections get section headers
    pub fn with_note_sections(mut self, emit: bool) -> Self {
        self.emit_note_sections = emit;
        self
    }

    /// Choose whether `.rodata` follows the notes; without it the notes end
    /// the read-only `PT_LOAD`
    pub fn with_rodata(mut self, emit: bool) -> Self {
        self.emit_rodata = emit;
        self
    }
}

/// Output of ELF generation containing the file data and layout metadata
#[derive(Clone, Debug)]
pub struct ElfWriteOutput {
    /// Raw ELF file bytes
    pub data: Vec<u8>,
    /// Base address used during ELF generation
    pub base_addr: u64,
    /// Every placed section, note sections first
    pub sections: Vec<SectionInfo>,
    /// `(offset, size)` of every `PT_NOTE` segment
    pub note_segments: Vec<(u64, u64)>,
}

impl ElfWriteOutput {
    /// Find a placed section by name.
    pub fn section(&self, name: &str) -> Option<&SectionInfo> {
        self.sections.iter().find(|section| section.name == name)
    }

    /// The file bytes of a placed section.
    pub fn section_data(&self, name: &str) -> Option<&[u8]> {
        let section = self.section(name)?;
        if section.name == ".bss" {
            return Some(&[]);
        }
        self.data
            .get(section.offset as usize..(section.offset + section.size) as usize)
    }
}

const EHDR_SIZE_64: u64 = 64;
const EHDR_SIZE_32: u64 = 52;
const PHDR_SIZE_64: u64 = 56;
const PHDR_SIZE_32: u64 = 32;
const SHDR_SIZE_64: u64 = 64;
const SHDR_SIZE_32: u64 = 40;

/// Size of the zero-initialised tail of the RW segment.
pub const BSS_SIZE: u64 = 0x100;

/// Size of the `.rodata` section placed after the notes.
pub const RODATA_SIZE: u64 = 0x30;

/// Generates small shared objects whose interesting part is their notes.
///
/// The file layout is: ELF header, program headers, note sections, an
/// optional `.rodata`, then page-aligned `.text` and `.data`, a `.bss` tail,
/// `.comment`, `.shstrtab` and the section header table. Program headers are
/// `PT_PHDR`, a read-only `PT_LOAD` covering everything up to the end of the
/// notes (or of `.rodata`), `PT_LOAD`s for
/// `.text` and `.data`, one `PT_NOTE` per note segment group and
/// `PT_GNU_STACK`.
pub struct NoteElfWriter {
    config: ElfWriterConfig,
}

impl NoteElfWriter {
    pub fn new(config: ElfWriterConfig) -> Self {
        Self { config }
    }

    /// Generate the file in memory.
    pub fn write(&self, sections: &[NoteSectionDesc]) -> Result<ElfWriteOutput> {
        match self.config.endian {
            Endianness::Little => self.write_with::<LittleEndian>(sections),
            Endianness::Big => self.write_with::<BigEndian>(sections),
        }
    }

    /// Generate the file and store it at `path`.
    pub fn write_file(&self, path: &Path, sections: &[NoteSectionDesc]) -> Result<ElfWriteOutput> {
        let output = self.write(sections)?;
        std::fs::write(path, &output.data)?;
        Ok(output)
    }

    fn is_64(&self) -> bool {
        self.config.class == Class::Elf64
    }

    fn write_with<E: ByteOrder>(&self, sections: &[NoteSectionDesc]) -> Result<ElfWriteOutput> {
        let is_64 = self.is_64();
        let (ehdr_size, phent, shent) = if is_64 {
            (EHDR_SIZE_64, PHDR_SIZE_64, SHDR_SIZE_64)
        } else {
            (EHDR_SIZE_32, PHDR_SIZE_32, SHDR_SIZE_32)
        };
        for section in sections {
            if !matches!(section.align, 1 | 2 | 4 | 8) {
                bail!("unsupported alignment {} for {}", section.align, section.name);
            }
        }

        let groups = segment_groups(sections);
        // PT_PHDR, three PT_LOADs, PT_NOTEs and PT_GNU_STACK
        let phnum = 5 + groups.len() as u64;
        let mut layout = ElfLayout::new(&self.config);
        layout.add_header(ehdr_size, phnum * phent);

        let mut placed = Vec::with_capacity(sections.len() + 5);
        for section in sections {
            let size = section.encoded_len();
            let (offset, addr) = layout.add_section(size, section.align);
            placed.push(SectionInfo {
                name: section.name.clone(),
                offset,
                size,
                addr,
            });
        }
        let rodata: Vec<u8> = (0..RODATA_SIZE as u8).map(|i| 0xa0 ^ i).collect();
        let rodata_place = self
            .config
            .emit_rodata
            .then(|| layout.add_section(rodata.len() as u64, 8));
        let ro_end = layout.file_off;

        let text: Vec<u8> = std::iter::repeat_n(0x90u8, 15).chain([0xc3]).collect();
        let data: Vec<u8> = (0..0x40u8).collect();
        let comment = b"gen-elf\0".to_vec();

        layout.align_to_page();
        let (text_off, text_addr) = layout.add_section(text.len() as u64, 16);
        layout.align_to_page();
        let (data_off, data_addr) = layout.add_section(data.len() as u64, 8);
        let bss_addr = data_addr + data.len() as u64;
        let (comment_off, _) = layout.add_section(comment.len() as u64, 1);

        let mut shstrtab = StringTable::new();
        let note_names: Vec<u32> = if self.config.emit_note_sections {
            sections.iter().map(|s| shstrtab.add(&s.name)).collect()
        } else {
            Vec::new()
        };
        let rodata_name = rodata_place.map(|_| shstrtab.add(".rodata"));
        let text_name = shstrtab.add(".text");
        let data_name = shstrtab.add(".data");
        let bss_name = shstrtab.add(".bss");
        let comment_name = shstrtab.add(".comment");
        let shstrtab_name = shstrtab.add(".shstrtab");
        let (shstrtab_off, _) = layout.add_section(shstrtab.data().len() as u64, 1);
        let shoff = align_up(layout.file_off, if is_64 { 8 } else { 4 });

        if let Some((offset, addr)) = rodata_place {
            placed.push(SectionInfo {
                name: ".rodata".into(),
                offset,
                size: rodata.len() as u64,
                addr,
            });
        }
        placed.push(SectionInfo {
            name: ".text".into(),
            offset: text_off,
            size: text.len() as u64,
            addr: text_addr,
        });
        placed.push(SectionInfo {
            name: ".data".into(),
            offset: data_off,
            size: data.len() as u64,
            addr: data_addr,
        });
        placed.push(SectionInfo {
            name: ".bss".into(),
            offset: data_off + data.len() as u64,
            size: BSS_SIZE,
            addr: bss_addr,
        });
        placed.push(SectionInfo {
            name: ".comment".into(),
            offset: comment_off,
            size: comment.len() as u64,
            addr: 0,
        });
        placed.push(SectionInfo {
            name: ".shstrtab".into(),
            offset: shstrtab_off,
            size: shstrtab.data().len() as u64,
            addr: 0,
        });

        // Section headers
        let mut shdrs = vec![SectionHeader::default()];
        for (idx, name) in note_names.iter().enumerate() {
            let info = &placed[idx];
            shdrs.push(SectionHeader {
                name: *name,
                sh_type: SHT_NOTE,
                flags: SHF_ALLOC as u64,
                addr: info.addr,
                offset: info.offset,
                size: info.size,
                addralign: sections[idx].align,
                ..Default::default()
            });
        }
        if let (Some(name), Some((offset, addr))) = (rodata_name, rodata_place) {
            shdrs.push(SectionHeader {
                name,
                sh_type: SHT_PROGBITS,
                flags: SHF_ALLOC as u64,
                addr,
                offset,
                size: rodata.len() as u64,
                addralign: 8,
                ..Default::default()
            });
        }
        shdrs.push(SectionHeader {
            name: text_name,
            sh_type: SHT_PROGBITS,
            flags: (SHF_ALLOC | SHF_EXECINSTR) as u64,
            addr: text_addr,
            offset: text_off,
            size: text.len() as u64,
            addralign: 16,
            ..Default::default()
        });
        shdrs.push(SectionHeader {
            name: data_name,
            sh_type: SHT_PROGBITS,
            flags: (SHF_ALLOC | SHF_WRITE) as u64,
            addr: data_addr,
            offset: data_off,
            size: data.len() as u64,
            addralign: 8,
            ..Default::default()
        });
        shdrs.push(SectionHeader {
            name: bss_name,
            sh_type: SHT_NOBITS,
            flags: (SHF_ALLOC | SHF_WRITE) as u64,
            addr: bss_addr,
            offset: data_off + data.len() as u64,
            size: BSS_SIZE,
            addralign: 8,
            ..Default::default()
        });
        shdrs.push(SectionHeader {
            name: comment_name,
            sh_type: SHT_PROGBITS,
            flags: (SHF_MERGE | SHF_STRINGS) as u64,
            offset: comment_off,
            size: comment.len() as u64,
            addralign: 1,
            entsize: 1,
            ..Default::default()
        });
        shdrs.push(SectionHeader {
            name: shstrtab_name,
            sh_type: SHT_STRTAB,
            offset: shstrtab_off,
            size: shstrtab.data().len() as u64,
            addralign: 1,
            ..Default::default()
        });
        let shnum = shdrs.len() as u64;

        // Program headers
        let word = if is_64 { 8 } else { 4 };
        let page = self.config.page_size;
        let mut phdrs = vec![
            ProgramHeader {
                p_type: PT_PHDR,
                p_flags: PF_R,
                offset: ehdr_size,
                vaddr: layout.vaddr(ehdr_size),
                filesz: phnum * phent,
                memsz: phnum * phent,
                align: word,
            },
            ProgramHeader {
                p_type: PT_LOAD,
                p_flags: PF_R,
                offset: 0,
                vaddr: layout.vaddr(0),
                filesz: ro_end,
                memsz: ro_end,
                align: page,
            },
            ProgramHeader {
                p_type: PT_LOAD,
                p_flags: PF_R | PF_X,
                offset: text_off,
                vaddr: text_addr,
                filesz: text.len() as u64,
                memsz: text.len() as u64,
                align: page,
            },
            ProgramHeader {
                p_type: PT_LOAD,
                p_flags: PF_R | PF_W,
                offset: data_off,
                vaddr: data_addr,
                filesz: data.len() as u64,
                memsz: data.len() as u64 + BSS_SIZE,
                align: page,
            },
        ];
        let mut note_segments = Vec::with_capacity(groups.len());
        for (start, end) in &groups {
            let first = &placed[*start];
            let last = &placed[*end - 1];
            let size = last.offset + last.size - first.offset;
            let align = sections[*start..*end]
                .iter()
                .map(|s| s.align)
                .max()
                .unwrap_or(4);
            note_segments.push((first.offset, size));
            phdrs.push(ProgramHeader {
                p_type: PT_NOTE,
                p_flags: PF_R,
                offset: first.offset,
                vaddr: first.addr,
                filesz: size,
                memsz: size,
                align,
            });
        }
        phdrs.push(ProgramHeader {
            p_type: PT_GNU_STACK,
            p_flags: PF_R | PF_W,
            align: 16,
            ..Default::default()
        });

        let ehdr = ElfHeader {
            ident: self.get_ident(),
            type_: ET_DYN,
            machine: self.get_machine(),
            version: EV_CURRENT as u32,
            entry: text_addr,
            phoff: ehdr_size,
            shoff,
            flags: 0,
            ehsize: ehdr_size as u16,
            phentsize: phent as u16,
            phnum: phnum as u16,
            shentsize: shent as u16,
            shnum: shnum as u16,
            shstrndx: (shnum - 1) as u16,
        };

        let total = shoff + shnum * shent;
        let mut buf = vec![0u8; total as usize];
        let mut header = Vec::new();
        self.write_struct::<E, _>(&mut header, &ehdr)?;
        for phdr in &phdrs {
            self.write_struct::<E, _>(&mut header, phdr)?;
        }
        self.write_at(&mut buf, 0, &header);
        for (section, info) in sections.iter().zip(&placed) {
            self.write_at(&mut buf, info.offset, &section.encode::<E>()?);
        }
        if let Some((offset, _)) = rodata_place {
            self.write_at(&mut buf, offset, &rodata);
        }
        self.write_at(&mut buf, text_off, &text);
        self.write_at(&mut buf, data_off, &data);
        self.write_at(&mut buf, comment_off, &comment);
        self.write_at(&mut buf, shstrtab_off, shstrtab.data());
        let mut table = Vec::new();
        for shdr in &shdrs {
            self.write_struct::<E, _>(&mut table, shdr)?;
        }
        self.write_at(&mut buf, shoff, &table);

        Ok(ElfWriteOutput {
            data: buf,
            base_addr: self.config.base_addr,
            sections: placed,
            note_segments,
        })
    }

    fn get_ident(&self) -> [u8; 16] {
        let mut ident = [0u8; 16];
        ident[0] = 0x7f;
        ident[1] = b'E';
        ident[2] = b'L';
        ident[3] = b'F';
        ident[4] = if self.is_64() { ELFCLASS64 } else { ELFCLASS32 };
        ident[5] = match self.config.endian {
            Endianness::Little => ELFDATA2LSB,
            Endianness::Big => ELFDATA2MSB,
        };
        ident[6] = EV_CURRENT; // Version
        ident[7] = 0; // OS ABI
        ident
    }

    fn write_at(&self, buf: &mut Vec<u8>, offset: u64, data: &[u8]) {
        let offset = offset as usize;
        if buf.len() < offset + data.len() {
            buf.resize(offset + data.len(), 0);
        }
        buf[offset..offset + data.len()].copy_from_slice(data);
    }

    fn write_struct<E: ByteOrder, T: WriteToBuf>(&self, buf: &mut Vec<u8>, item: &T) -> Result<()> {
        item.write::<E>(buf, self.is_64())
    }

    fn get_machine(&self) -> u16 {
        match (self.config.class, self.config.endian) {
            (Class::Elf64, Endianness::Little) => EM_X86_64,
            (Class::Elf32, Endianness::Little) => EM_386,
            (Class::Elf64, Endianness::Big) => EM_PPC64,
            (Class::Elf32, Endianness::Big) => EM_PPC,
        }
    }
}

/// `[start, end)` index ranges of consecutive sections sharing a segment id.
fn segment_groups(sections: &[NoteSectionDesc]) -> Vec<(usize, usize)> {
    let mut groups: Vec<(usize, usize)> = Vec::new();
    for (idx, section) in sections.iter().enumerate() {
        let Some(id) = section.segment else {
            continue;
        };
        match groups.last_mut() {
            Some((_, end)) if *end == idx && sections[idx - 1].segment == Some(id) => {
                *end = idx + 1;
            }
            _ => groups.push((idx, idx + 1)),
        }
    }
    groups
}

struct ElfHeader {
    ident: [u8; 16],
    type_: u16,
    machine: u16,
    version: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

#[derive(Default)]
struct ProgramHeader {
    p_type: u32,
    p_flags: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
    align: u64,
}

#[derive(Default)]
struct SectionHeader {
    name: u32,
    sh_type: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    addralign: u64,
    entsize: u64,
}

trait WriteToBuf {
    fn write<E: ByteOrder>(&self, buf: &mut Vec<u8>, is_64: bool) -> Result<()>;
}

fn write_word<E: ByteOrder>(buf: &mut Vec<u8>, is_64: bool, value: u64) -> Result<()> {
    if is_64 {
        buf.write_u64::<E>(value)?;
    } else {
        buf.write_u32::<E>(value as u32)?;
    }
    Ok(())
}

impl WriteToBuf for ElfHeader {
    fn write<E: ByteOrder>(&self, buf: &mut Vec<u8>, is_64: bool) -> Result<()> {
        buf.extend_from_slice(&self.ident);
        buf.write_u16::<E>(self.type_)?;
        buf.write_u16::<E>(self.machine)?;
        buf.write_u32::<E>(self.version)?;
        write_word::<E>(buf, is_64, self.entry)?;
        write_word::<E>(buf, is_64, self.phoff)?;
        write_word::<E>(buf, is_64, self.shoff)?;
        buf.write_u32::<E>(self.flags)?;
        buf.write_u16::<E>(self.ehsize)?;
        buf.write_u16::<E>(self.phentsize)?;
        buf.write_u16::<E>(self.phnum)?;
        buf.write_u16::<E>(self.shentsize)?;
        buf.write_u16::<E>(self.shnum)?;
        buf.write_u16::<E>(self.shstrndx)?;
        Ok(())
    }
}

impl WriteToBuf for ProgramHeader {
    fn write<E: ByteOrder>(&self, buf: &mut Vec<u8>, is_64: bool) -> Result<()> {
        buf.write_u32::<E>(self.p_type)?;
        if is_64 {
            buf.write_u32::<E>(self.p_flags)?;
        }
        write_word::<E>(buf, is_64, self.offset)?;
        write_word::<E>(buf, is_64, self.vaddr)?;
        write_word::<E>(buf, is_64, self.vaddr)?; // paddr
        write_word::<E>(buf, is_64, self.filesz)?;
        write_word::<E>(buf, is_64, self.memsz)?;
        if !is_64 {
            buf.write_u32::<E>(self.p_flags)?;
        }
        write_word::<E>(buf, is_64, self.align)?;
        Ok(())
    }
}

impl WriteToBuf for SectionHeader {
    fn write<E: ByteOrder>(&self, buf: &mut Vec<u8>, is_64: bool) -> Result<()> {
        buf.write_u32::<E>(self.name)?;
        buf.write_u32::<E>(self.sh_type)?;
        write_word::<E>(buf, is_64, self.flags)?;
        write_word::<E>(buf, is_64, self.addr)?;
        write_word::<E>(buf, is_64, self.offset)?;
        write_word::<E>(buf, is_64, self.size)?;
        buf.write_u32::<E>(self.link)?;
        buf.write_u32::<E>(self.info)?;
        write_word::<E>(buf, is_64, self.addralign)?;
        write_word::<E>(buf, is_64, self.entsize)?;
        Ok(())
    }
}
