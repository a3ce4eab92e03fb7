use crate::note::NoteCollection;
use alloc::{string::String, vec::Vec};

/// A contiguous run of note records in the file.
///
/// A region is described by a `SHT_NOTE` section, by a `PT_NOTE` segment
/// that covers no note section, or by both. It owns the notes decoded from
/// it; they are written back to the same place when the image is written,
/// unless the region changed size and has to move.
#[derive(Clone, Debug)]
pub struct NoteRegion {
    pub(crate) offset: u64,
    pub(crate) size: u64,
    /// alignment declared by the describing header
    pub(crate) declared_align: u64,
    pub(crate) section: Option<usize>,
    pub(crate) section_name: Option<String>,
    pub(crate) segments: Vec<usize>,
    pub(crate) notes: NoteCollection,
}

impl NoteRegion {
    /// Gets the file offset of the region in the parsed image.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Gets the size of the region in the parsed image.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Gets the record alignment, 4 or 8.
    #[inline]
    pub fn align(&self) -> usize {
        self.notes.align()
    }

    /// Gets the index of the `SHT_NOTE` section describing the region.
    #[inline]
    pub fn section_index(&self) -> Option<usize> {
        self.section
    }

    /// Gets the name of the describing section, e.g. `.note.gnu.build-id`.
    #[inline]
    pub fn section_name(&self) -> Option<&str> {
        self.section_name.as_deref()
    }

    /// Gets the indices of the `PT_NOTE` segments covering the region.
    #[inline]
    pub fn segments(&self) -> &[usize] {
        &self.segments
    }

    #[inline]
    pub fn notes(&self) -> &NoteCollection {
        &self.notes
    }

    #[inline]
    pub fn notes_mut(&mut self) -> &mut NoteCollection {
        &mut self.notes
    }

    #[inline]
    pub(crate) fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Alignment the region start must keep when it is moved.
    #[inline]
    pub(crate) fn placement_align(&self) -> u64 {
        self.declared_align.max(self.notes.align() as u64)
    }
}
