//! ELF notes
//!
//! A note is a small typed record: an owner name such as `GNU`, a 32-bit
//! type number and an opaque description. Notes live in note regions, i.e.
//! `SHT_NOTE` sections and/or `PT_NOTE` segments, as a sequence of
//! alignment-padded records.

mod codec;
mod collection;
mod types;

pub use collection::NoteCollection;
pub use types::*;

pub(crate) use codec::{NOTE_HEADER_SIZE, decode, encode_into, encoded_len, record_align};

use alloc::vec::Vec;
use core::fmt::Debug;

/// A single ELF note.
///
/// Two notes are equal when owner name, type and description are all
/// byte-equal.
///
/// # Examples
/// ```rust
/// use elf_notes::{Note, NoteType};
///
/// let mut note = Note::new("Foo", NoteType::GoldVersion, [123u8]);
/// assert_eq!(note.name(), b"Foo");
/// note.set_description(vec![1u8, 2, 3]);
/// assert_eq!(note.description(), &[1, 2, 3]);
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Note {
    /// owner name, without the terminating NUL
    name: Vec<u8>,
    /// n_type
    type_id: u32,
    /// desc
    description: Vec<u8>,
}

impl Note {
    /// Creates a note from its owner name, type and description.
    ///
    /// A trailing NUL in `name` is not part of the owner name: it is added
    /// back when the note is encoded.
    pub fn new(
        name: impl Into<Vec<u8>>,
        note_type: impl Into<NoteType>,
        description: impl Into<Vec<u8>>,
    ) -> Self {
        let mut name = name.into();
        if name.last() == Some(&0) {
            name.pop();
        }
        Self {
            name,
            type_id: u32::from(note_type.into()),
            description: description.into(),
        }
    }

    /// Gets the owner name, without the terminating NUL.
    #[inline]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Gets the owner name as a string, if it is valid UTF-8.
    #[inline]
    pub fn name_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.name).ok()
    }

    /// Gets the raw type number.
    #[inline]
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    /// Gets the type of the note.
    #[inline]
    pub fn note_type(&self) -> NoteType {
        NoteType::from(self.type_id)
    }

    /// Gets the description bytes.
    #[inline]
    pub fn description(&self) -> &[u8] {
        &self.description
    }

    /// Replaces the description, returning the previous one.
    pub fn set_description(&mut self, description: impl Into<Vec<u8>>) -> Vec<u8> {
        core::mem::replace(&mut self.description, description.into())
    }

    #[inline]
    pub(crate) fn from_raw(name: Vec<u8>, type_id: u32, description: Vec<u8>) -> Self {
        Self {
            name,
            type_id,
            description,
        }
    }
}

impl Debug for Note {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut s = f.debug_struct("Note");
        match self.name_str() {
            Some(name) => s.field("name", &name),
            None => s.field("name", &self.name),
        };
        s.field("type", &self.note_type())
            .field("descsz", &self.description.len())
            .finish()
    }
}
