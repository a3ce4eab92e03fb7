use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use clap::ValueEnum;

pub const NT_GNU_ABI_TAG: u32 = 1;
pub const NT_GNU_BUILD_ID: u32 = 3;
pub const NT_GNU_GOLD_VERSION: u32 = 4;
pub const NT_GNU_PROPERTY_TYPE_0: u32 = 5;

/// Word size of the generated file.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Elf32,
    Elf64,
}

/// Byte order of the generated file.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// One note record to be generated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoteDesc {
    /// Owner name, written with a terminating NUL.
    pub name: String,
    /// Note type.
    pub n_type: u32,
    /// Description bytes.
    pub desc: Vec<u8>,
}

impl NoteDesc {
    pub fn new(name: impl Into<String>, n_type: u32, desc: &[u8]) -> Self {
        Self {
            name: name.into(),
            n_type,
            desc: desc.to_vec(),
        }
    }

    /// Create a `GNU` build-id note.
    pub fn gnu_build_id(id: &[u8]) -> Self {
        Self::new("GNU", NT_GNU_BUILD_ID, id)
    }

    /// Create a `GNU` ABI tag note (Linux, given kernel version).
    pub fn gnu_abi_tag(endian: Endianness, version: [u32; 3]) -> Self {
        let mut desc = [0u8; 16];
        for (idx, word) in [0, version[0], version[1], version[2]].into_iter().enumerate() {
            let slot = &mut desc[idx * 4..idx * 4 + 4];
            match endian {
                Endianness::Little => LittleEndian::write_u32(slot, word),
                Endianness::Big => BigEndian::write_u32(slot, word),
            }
        }
        Self::new("GNU", NT_GNU_ABI_TAG, &desc)
    }

    /// Create a `GNU` property note with an opaque payload.
    pub fn gnu_property(payload: &[u8]) -> Self {
        Self::new("GNU", NT_GNU_PROPERTY_TYPE_0, payload)
    }

    /// Size of the record once padded to `align`.
    pub fn encoded_len(&self, align: u64) -> u64 {
        let desc_start = pad(12 + self.name.len() as u64 + 1, align);
        pad(desc_start + self.desc.len() as u64, align)
    }

    pub(crate) fn write<E: ByteOrder>(&self, buf: &mut Vec<u8>, align: u64) -> anyhow::Result<()> {
        let start = buf.len() as u64;
        buf.write_u32::<E>(self.name.len() as u32 + 1)?;
        buf.write_u32::<E>(self.desc.len() as u32)?;
        buf.write_u32::<E>(self.n_type)?;
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(0);
        buf.resize((start + pad(buf.len() as u64 - start, align)) as usize, 0);
        buf.extend_from_slice(&self.desc);
        buf.resize((start + pad(buf.len() as u64 - start, align)) as usize, 0);
        Ok(())
    }
}

fn pad(len: u64, align: u64) -> u64 {
    let align = if align == 8 { 8 } else { 4 };
    len.div_ceil(align) * align
}

/// A `SHT_NOTE` section to be generated.
#[derive(Clone, Debug)]
pub struct NoteSectionDesc {
    /// Section name, e.g. `.note.gnu.build-id`.
    pub name: String,
    /// `sh_addralign`; 8 selects the 8-byte record layout.
    pub align: u64,
    /// Records in order.
    pub notes: Vec<NoteDesc>,
    /// Consecutive sections with the same id share one `PT_NOTE` segment.
    pub segment: Option<u32>,
}

impl NoteSectionDesc {
    pub fn new(name: impl Into<String>, align: u64) -> Self {
        Self {
            name: name.into(),
            align,
            notes: Vec::new(),
            segment: None,
        }
    }

    /// Append a note record.
    pub fn with_note(mut self, note: NoteDesc) -> Self {
        self.notes.push(note);
        self
    }

    /// Cover the section with the `PT_NOTE` segment `id`.
    pub fn in_segment(mut self, id: u32) -> Self {
        self.segment = Some(id);
        self
    }

    pub(crate) fn encoded_len(&self) -> u64 {
        self.notes.iter().map(|note| note.encoded_len(self.align)).sum()
    }

    pub(crate) fn encode<E: ByteOrder>(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len() as usize);
        for note in &self.notes {
            note.write::<E>(&mut buf, self.align)?;
        }
        Ok(buf)
    }
}

/// Placement of one generated section, for verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SectionInfo {
    /// Section name.
    pub name: String,
    /// File offset.
    pub offset: u64,
    /// Size in bytes (in memory for `SHT_NOBITS`).
    pub size: u64,
    /// Virtual address.
    pub addr: u64,
}
