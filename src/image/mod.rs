//! ELF image handling
//!
//! [`ElfImage`] is the entry point of the crate: it parses an ELF file,
//! exposes the notes of every note region for reading and editing, and
//! produces the rebuilt file on write.

mod region;

pub use region::NoteRegion;

use crate::{
    Result,
    elf::{ElfHeader, ElfTables, ProgramHeader, SectionHeader},
    input::{ElfReader, IntoElfReader},
    layout::{LayoutRebuilder, RegionPatch},
    not_found_error,
    note::{Note, NoteCollection, NoteType},
    parse_error,
};
use alloc::{
    format,
    string::{String, ToString},
    vec::Vec,
};
use core::fmt::Debug;
use elf::{
    ElfBytes,
    abi::{PT_NOTE, SHT_NOTE},
    endian::AnyEndian,
};

/// A parsed ELF file and its notes.
///
/// All edits happen in memory. Nothing reaches storage until
/// [`ElfImage::write`] (or [`ElfImage::to_bytes`]) is called, and the
/// image itself keeps describing the parsed file afterwards.
///
/// # Examples
/// ```no_run
/// use elf_notes::{ElfImage, Note, NoteType};
///
/// let mut image = ElfImage::parse("/usr/bin/true").unwrap();
/// image
///     .note_mut(NoteType::BuildId)
///     .unwrap()
///     .set_description((0..500u32).map(|i| i as u8).collect::<Vec<_>>());
/// image.add_note(Note::new("Foo", NoteType::GoldVersion, [123u8])).unwrap();
/// image.write("/tmp/true").unwrap();
/// ```
pub struct ElfImage {
    name: String,
    data: Vec<u8>,
    header: ElfHeader,
    tables: ElfTables,
    regions: Vec<NoteRegion>,
}

impl Debug for ElfImage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ElfImage")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .field("regions", &self.regions)
            .finish()
    }
}

impl ElfImage {
    /// Parses an ELF image.
    ///
    /// # Arguments
    /// * `source` - A file path (with the `std` feature), a byte slice, an
    ///   owned buffer, or an [`ElfBinary`](crate::input::ElfBinary) /
    ///   [`ElfFile`](crate::input::ElfFile).
    ///
    /// # Errors
    /// Fails with [`Error::Parse`](crate::Error::Parse) when the container is
    /// invalid and with a note error when a record cannot be decoded. No
    /// partial image is returned.
    pub fn parse<'a>(source: impl IntoElfReader<'a>) -> Result<Self> {
        let mut reader = source.into_reader()?;
        let name = reader.file_name().to_string();
        let data = reader.read_all()?;
        Self::from_parts(name, data)
    }

    fn from_parts(name: String, data: Vec<u8>) -> Result<Self> {
        let (header, tables) = parse_tables(&data)?;
        header.validate(data.len())?;
        let regions = discover_regions(&data, &header, &tables)?;

        #[cfg(feature = "log")]
        log::debug!(
            "[{}] parsed {:?} {:?} image, {} bytes, {} note region(s), {} note(s)",
            name,
            header.class(),
            header.endian(),
            data.len(),
            regions.len(),
            regions.iter().map(|region| region.notes.len()).sum::<usize>()
        );

        Ok(Self {
            name,
            data,
            header,
            tables,
            regions,
        })
    }

    /// Gets the name of the source the image was parsed from.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the ELF header.
    #[inline]
    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    /// Gets the note regions in file order.
    #[inline]
    pub fn regions(&self) -> &[NoteRegion] {
        &self.regions
    }

    /// Gets the note regions for editing a specific one.
    #[inline]
    pub fn regions_mut(&mut self) -> &mut [NoteRegion] {
        &mut self.regions
    }

    /// Gets the program headers as parsed.
    #[inline]
    pub fn program_headers(&self) -> &[ProgramHeader] {
        &self.tables.phdrs
    }

    /// Gets the section headers as parsed.
    #[inline]
    pub fn section_headers(&self) -> &[SectionHeader] {
        &self.tables.shdrs
    }

    /// Gets the name of section `index`, resolved through `.shstrtab`.
    pub fn section_name(&self, index: usize) -> Option<&str> {
        self.tables
            .names
            .get(index)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    /// Gets the bytes the image was parsed from.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Iterates over all notes, region by region in file order.
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.regions.iter().flat_map(|region| region.notes.iter())
    }

    /// Returns the first note of type `note_type`.
    pub fn note(&self, note_type: impl Into<NoteType>) -> Result<&Note> {
        let note_type = note_type.into();
        self.notes()
            .find(|note| note.note_type() == note_type)
            .ok_or_else(|| not_found_error(format!("no {note_type} note in {}", self.name)))
    }

    /// Returns the first note of type `note_type` for in-place editing.
    pub fn note_mut(&mut self, note_type: impl Into<NoteType>) -> Result<&mut Note> {
        let note_type = note_type.into();
        let name = &self.name;
        self.regions
            .iter_mut()
            .flat_map(|region| region.notes.iter_mut())
            .find(|note| note.note_type() == note_type)
            .ok_or_else(|| not_found_error(format!("no {note_type} note in {name}")))
    }

    /// Checks whether the image carries a note of type `note_type`.
    pub fn has_note(&self, note_type: impl Into<NoteType>) -> bool {
        let note_type = note_type.into();
        self.regions
            .iter()
            .any(|region| region.notes.contains(note_type))
    }

    /// Appends `note` to the image.
    ///
    /// The note goes to the end of the last 4-aligned region, or of the last
    /// region when every region is 8-aligned.
    pub fn add_note(&mut self, note: Note) -> Result<()> {
        let idx = self
            .regions
            .iter()
            .rposition(|region| region.align() == 4)
            .or_else(|| self.regions.len().checked_sub(1))
            .ok_or_else(|| not_found_error(format!("{} has no note region", self.name)))?;

        #[cfg(feature = "log")]
        log::debug!(
            "[{}] adding {} note to region at 0x{:x}",
            self.name,
            note.note_type(),
            self.regions[idx].offset
        );

        self.regions[idx].notes.add(note);
        Ok(())
    }

    /// Removes the first note equal to `note`.
    pub fn remove_note(&mut self, note: &Note) -> Result<Note> {
        match self
            .regions
            .iter()
            .position(|region| region.notes.iter().any(|n| n == note))
        {
            Some(idx) => self.regions[idx].notes.remove(note),
            None => Err(not_found_error(format!(
                "no {} note matching {note:?} in {}",
                note.note_type(),
                self.name
            ))),
        }
    }

    /// Removes the first note of type `note_type`.
    pub fn remove_note_type(&mut self, note_type: impl Into<NoteType>) -> Result<Note> {
        let note_type = note_type.into();
        match self
            .regions
            .iter()
            .position(|region| region.notes.contains(note_type))
        {
            Some(idx) => self.regions[idx].notes.remove_type(note_type),
            None => Err(not_found_error(format!(
                "no {note_type} note in {}",
                self.name
            ))),
        }
    }

    /// Re-encodes every note region and rebuilds the file around them.
    ///
    /// An image whose notes were not modified yields exactly the parsed bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let patches = self
            .regions
            .iter()
            .map(|region| {
                Ok(RegionPatch {
                    offset: region.offset,
                    old_size: region.size,
                    align: region.placement_align(),
                    bytes: region.notes.encode_region()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let out = LayoutRebuilder::new(&self.data, &self.header, &self.tables).rebuild(patches)?;

        #[cfg(feature = "log")]
        log::debug!(
            "[{}] rebuilt image: {} -> {} bytes",
            self.name,
            self.data.len(),
            out.len()
        );

        Ok(out)
    }
}

#[cfg(feature = "std")]
mod write {
    use super::ElfImage;
    use crate::{Result, os};
    use std::path::Path;

    /// Options controlling how a rebuilt image reaches storage.
    #[derive(Clone, Debug)]
    pub struct WriteOptions {
        atomic: bool,
    }

    impl Default for WriteOptions {
        fn default() -> Self {
            Self { atomic: true }
        }
    }

    impl WriteOptions {
        #[inline]
        pub fn new() -> Self {
            Self::default()
        }

        /// Writes to a temporary file next to the destination and renames it
        /// over the destination once complete. Enabled by default.
        #[inline]
        pub fn with_atomic(mut self, atomic: bool) -> Self {
            self.atomic = atomic;
            self
        }

        #[inline]
        pub fn atomic(&self) -> bool {
            self.atomic
        }
    }

    impl ElfImage {
        /// Rebuilds the image and writes it to `path`.
        ///
        /// Layout errors abort before anything is written.
        pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
            self.write_with(path, &WriteOptions::default())
        }

        /// Rebuilds the image and writes it to `path` with `options`.
        pub fn write_with(&self, path: impl AsRef<Path>, options: &WriteOptions) -> Result<()> {
            let bytes = self.to_bytes()?;
            os::persist(path.as_ref(), &bytes, options.atomic)?;

            #[cfg(feature = "log")]
            log::debug!(
                "[{}] wrote {} bytes to {}",
                self.name,
                bytes.len(),
                path.as_ref().display()
            );

            Ok(())
        }
    }
}

#[cfg(feature = "std")]
pub use write::WriteOptions;

/// Decodes the header tables and resolves section names.
fn parse_tables(data: &[u8]) -> Result<(ElfHeader, ElfTables)> {
    let file = ElfBytes::<AnyEndian>::minimal_parse(data)
        .map_err(|err| parse_error(format!("{err}")))?;
    let phdrs: Vec<ProgramHeader> = file
        .segments()
        .map(|table| table.iter().collect())
        .unwrap_or_default();
    let (shdrs, strtab) = file
        .section_headers_with_strtab()
        .map_err(|err| parse_error(format!("{err}")))?;
    let shdrs: Vec<SectionHeader> = shdrs
        .map(|table| table.iter().collect())
        .unwrap_or_default();
    let names = match strtab {
        Some(strtab) => shdrs
            .iter()
            .map(|shdr| {
                strtab
                    .get(shdr.sh_name as usize)
                    .map(ToString::to_string)
                    .unwrap_or_default()
            })
            .collect(),
        None => Vec::new(),
    };
    let header = ElfHeader::new(&file.ehdr, phdrs.len(), shdrs.len());
    Ok((
        header,
        ElfTables {
            phdrs,
            shdrs,
            names,
        },
    ))
}

fn checked_range(data: &[u8], offset: u64, size: u64, what: &str) -> Result<(usize, usize)> {
    offset
        .checked_add(size)
        .filter(|end| *end <= data.len() as u64)
        .map(|end| (offset as usize, end as usize))
        .ok_or_else(|| {
            parse_error(format!(
                "{what} [0x{offset:x}, +0x{size:x}) lies outside the file ({} bytes)",
                data.len()
            ))
        })
}

/// Finds the note regions and decodes their notes.
///
/// Every non-empty `SHT_NOTE` section is a region. A non-empty `PT_NOTE`
/// segment is attached to the note sections it contains; one that contains
/// or overlaps no note section is a region of its own.
fn discover_regions(
    data: &[u8],
    header: &ElfHeader,
    tables: &ElfTables,
) -> Result<Vec<NoteRegion>> {
    let mut found: Vec<NoteRegion> = Vec::new();
    for (idx, shdr) in tables.shdrs.iter().enumerate() {
        if shdr.sh_type != SHT_NOTE || shdr.sh_size == 0 {
            continue;
        }
        checked_range(data, shdr.sh_offset, shdr.sh_size, "note section")?;
        found.push(NoteRegion {
            offset: shdr.sh_offset,
            size: shdr.sh_size,
            declared_align: shdr.sh_addralign,
            section: Some(idx),
            section_name: tables.names.get(idx).filter(|name| !name.is_empty()).cloned(),
            segments: Vec::new(),
            notes: NoteCollection::new(header.endian(), shdr.sh_addralign),
        });
    }
    found.sort_by_key(|region| region.offset);
    for pair in found.windows(2) {
        if pair[1].offset < pair[0].end() {
            return Err(parse_error(format!(
                "note sections at 0x{:x} and 0x{:x} overlap",
                pair[0].offset, pair[1].offset
            )));
        }
    }

    let sections = found.len();
    for (idx, phdr) in tables.phdrs.iter().enumerate() {
        if phdr.p_type != PT_NOTE || phdr.p_filesz == 0 {
            continue;
        }
        checked_range(data, phdr.p_offset, phdr.p_filesz, "note segment")?;
        let start = phdr.p_offset;
        let end = start + phdr.p_filesz;

        let mut touches_section = false;
        for region in found[..sections].iter_mut() {
            if start <= region.offset && region.end() <= end {
                region.segments.push(idx);
                touches_section = true;
            } else if region.offset < end && start < region.end() {
                touches_section = true;
            }
        }
        if touches_section {
            continue;
        }

        // several PT_NOTE entries may describe the same bytes
        if let Some(region) = found[sections..]
            .iter_mut()
            .find(|region| region.offset == start && region.size == phdr.p_filesz)
        {
            region.segments.push(idx);
            continue;
        }
        if let Some(region) = found[sections..]
            .iter()
            .find(|region| region.offset < end && start < region.end())
        {
            return Err(parse_error(format!(
                "note segments at 0x{:x} and 0x{start:x} overlap",
                region.offset
            )));
        }
        found.push(NoteRegion {
            offset: start,
            size: phdr.p_filesz,
            declared_align: phdr.p_align,
            section: None,
            section_name: None,
            segments: alloc::vec![idx],
            notes: NoteCollection::new(header.endian(), phdr.p_align),
        });
    }
    found.sort_by_key(|region| region.offset);

    for region in found.iter_mut() {
        let (start, end) = (region.offset as usize, region.end() as usize);
        region.notes =
            NoteCollection::parse_from(&data[start..end], header.endian(), region.declared_align)?;

        #[cfg(feature = "log")]
        log::debug!(
            "note region [0x{:x}, 0x{:x}) {} align {}: {} note(s), segments {:?}",
            start,
            end,
            region.section_name.as_deref().unwrap_or("<segment>"),
            region.align(),
            region.notes.len(),
            region.segments
        );
    }
    Ok(found)
}
