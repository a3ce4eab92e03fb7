use super::{NOTE_HEADER_SIZE, Note, NoteType, decode, encode_into, encoded_len, record_align};
use crate::{Result, elf::Endian, not_found_error};
use alloc::{format, vec::Vec};
use core::slice::{Iter, IterMut};

/// The ordered notes of one note region.
///
/// Order is significant: it is the on-disk order, the iteration order and
/// the order in which lookups search. Several notes may share a type; lookups
/// return the first one.
///
/// Nothing here touches storage. The region is re-encoded from scratch by
/// [`NoteCollection::encode_region`] when the owning image is written.
#[derive(Clone, Debug)]
pub struct NoteCollection {
    notes: Vec<Note>,
    endian: Endian,
    /// record alignment, 4 or 8
    align: usize,
    /// region bytes as parsed, including trailing padding
    original: Vec<u8>,
}

impl NoteCollection {
    /// Creates an empty collection for a region with the given byte order and
    /// declared alignment.
    pub fn new(endian: Endian, align: u64) -> Self {
        Self {
            notes: Vec::new(),
            endian,
            align: record_align(align),
            original: Vec::new(),
        }
    }

    /// Decodes every record of `region`.
    ///
    /// A remainder too short to hold a record header is treated as trailing
    /// padding. It is kept and written back verbatim as long as the notes
    /// themselves are unchanged.
    pub fn parse_from(region: &[u8], endian: Endian, align: u64) -> Result<Self> {
        let align = record_align(align);
        let mut notes = Vec::new();
        let mut cursor = 0;
        while region.len() - cursor >= NOTE_HEADER_SIZE {
            notes.push(decode(region, &mut cursor, endian, align)?);
        }
        Ok(Self {
            notes,
            endian,
            align,
            original: region.to_vec(),
        })
    }

    /// Gets the byte order records are encoded in.
    #[inline]
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Gets the record alignment (4 or 8).
    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> Iter<'_, Note> {
        self.notes.iter()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> IterMut<'_, Note> {
        self.notes.iter_mut()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Note> {
        self.notes.get(index)
    }

    #[inline]
    pub fn as_slice(&self) -> &[Note] {
        &self.notes
    }

    /// Index of the first note of type `note_type`.
    pub fn position(&self, note_type: impl Into<NoteType>) -> Option<usize> {
        let type_id = u32::from(note_type.into());
        self.notes.iter().position(|note| note.type_id() == type_id)
    }

    /// Checks whether a note of type `note_type` exists.
    #[inline]
    pub fn contains(&self, note_type: impl Into<NoteType>) -> bool {
        self.position(note_type).is_some()
    }

    /// Returns the first note of type `note_type`.
    pub fn lookup(&self, note_type: impl Into<NoteType>) -> Result<&Note> {
        let note_type = note_type.into();
        match self.position(note_type) {
            Some(idx) => Ok(&self.notes[idx]),
            None => Err(not_found_error(format!("no {note_type} note"))),
        }
    }

    /// Returns the first note of type `note_type` for in-place editing.
    pub fn lookup_mut(&mut self, note_type: impl Into<NoteType>) -> Result<&mut Note> {
        let note_type = note_type.into();
        match self.position(note_type) {
            Some(idx) => Ok(&mut self.notes[idx]),
            None => Err(not_found_error(format!("no {note_type} note"))),
        }
    }

    /// Appends `note` after the existing notes. Duplicates are allowed.
    #[inline]
    pub fn add(&mut self, note: Note) {
        self.notes.push(note);
    }

    /// Removes the first note equal to `note`.
    pub fn remove(&mut self, note: &Note) -> Result<Note> {
        match self.notes.iter().position(|n| n == note) {
            Some(idx) => Ok(self.notes.remove(idx)),
            None => Err(not_found_error(format!(
                "no {} note matching {note:?}",
                note.note_type()
            ))),
        }
    }

    /// Removes the first note of type `note_type`.
    pub fn remove_type(&mut self, note_type: impl Into<NoteType>) -> Result<Note> {
        let note_type = note_type.into();
        match self.position(note_type) {
            Some(idx) => Ok(self.notes.remove(idx)),
            None => Err(not_found_error(format!("no {note_type} note"))),
        }
    }

    /// Replaces the description of the first note of type `note_type`,
    /// returning the previous description.
    pub fn replace_description(
        &mut self,
        note_type: impl Into<NoteType>,
        description: impl Into<Vec<u8>>,
    ) -> Result<Vec<u8>> {
        Ok(self.lookup_mut(note_type)?.set_description(description))
    }

    /// Encodes every note in order.
    ///
    /// While the encoding equals the parsed region minus its trailing
    /// padding, the parsed bytes are returned unchanged.
    pub fn encode_region(&self) -> Result<Vec<u8>> {
        let capacity = self
            .notes
            .iter()
            .map(|note| encoded_len(note, self.align))
            .sum();
        let mut out = Vec::with_capacity(capacity);
        for note in &self.notes {
            encode_into(note, self.endian, self.align, &mut out)?;
        }
        if self.original.starts_with(&out) && self.original.len() - out.len() < NOTE_HEADER_SIZE
        {
            return Ok(self.original.clone());
        }
        Ok(out)
    }
}

impl<'a> IntoIterator for &'a NoteCollection {
    type Item = &'a Note;
    type IntoIter = Iter<'a, Note>;

    fn into_iter(self) -> Self::IntoIter {
        self.notes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use alloc::vec;

    fn region(notes: &[Note], endian: Endian) -> Vec<u8> {
        let mut out = Vec::new();
        for note in notes {
            encode_into(note, endian, 4, &mut out).unwrap();
        }
        out
    }

    fn sample() -> Vec<Note> {
        vec![
            Note::new("GNU", NoteType::AbiTag, [0u8, 0, 0, 0, 3, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0]),
            Note::new("GNU", NoteType::BuildId, vec![0x5a; 20]),
            Note::new("GNU", NoteType::BuildId, vec![0xa5; 8]),
        ]
    }

    #[test]
    fn parses_every_record_in_order() {
        let bytes = region(&sample(), Endian::Little);
        let notes = NoteCollection::parse_from(&bytes, Endian::Little, 4).unwrap();
        assert_eq!(notes.as_slice(), &sample()[..]);
        assert_eq!(notes.len(), 3);
    }

    #[test]
    fn lookup_returns_first_duplicate() {
        let bytes = region(&sample(), Endian::Big);
        let notes = NoteCollection::parse_from(&bytes, Endian::Big, 4).unwrap();
        assert_eq!(notes.lookup(NoteType::BuildId).unwrap().description(), &[0x5a; 20]);
        assert_eq!(notes.position(3u32), Some(1));
    }

    #[test]
    fn failed_lookup_leaves_collection_usable() {
        let bytes = region(&sample(), Endian::Little);
        let mut notes = NoteCollection::parse_from(&bytes, Endian::Little, 4).unwrap();
        let err = notes.lookup(NoteType::GoldVersion).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        let err = notes.remove_type(NoteType::Hwcap).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(notes.len(), 3);
        assert_eq!(notes.encode_region().unwrap(), bytes);
    }

    #[test]
    fn add_appends_without_deduplicating() {
        let mut notes = NoteCollection::new(Endian::Little, 4);
        let note = Note::new("Foo", NoteType::GoldVersion, [123u8]);
        notes.add(note.clone());
        notes.add(note.clone());
        assert_eq!(notes.len(), 2);
        assert_eq!(notes.iter().filter(|n| **n == note).count(), 2);
    }

    #[test]
    fn remove_takes_first_match_only() {
        let bytes = region(&sample(), Endian::Little);
        let mut notes = NoteCollection::parse_from(&bytes, Endian::Little, 4).unwrap();
        let removed = notes.remove_type(NoteType::BuildId).unwrap();
        assert_eq!(removed.description(), &[0x5a; 20]);
        assert_eq!(notes.lookup(NoteType::BuildId).unwrap().description(), &[0xa5; 8]);

        let abi = notes.get(0).unwrap().clone();
        assert_eq!(notes.remove(&abi).unwrap(), abi);
        assert!(matches!(notes.remove(&abi), Err(Error::NotFound { .. })));
        assert_eq!(notes.len(), 1);
    }

    #[test]
    fn replace_description_changes_encoded_size() {
        let bytes = region(&sample(), Endian::Little);
        let mut notes = NoteCollection::parse_from(&bytes, Endian::Little, 4).unwrap();
        let old = notes
            .replace_description(NoteType::BuildId, vec![1u8; 21])
            .unwrap();
        assert_eq!(old, vec![0x5a; 20]);
        let encoded = notes.encode_region().unwrap();
        assert_eq!(encoded.len(), bytes.len() + 4);

        let reparsed = NoteCollection::parse_from(&encoded, Endian::Little, 4).unwrap();
        assert_eq!(reparsed.lookup(NoteType::BuildId).unwrap().description(), &[1u8; 21]);
        assert_eq!(reparsed.lookup(NoteType::BuildId).unwrap().name(), b"GNU");
    }

    #[test]
    fn trailing_padding_survives_until_modified() {
        let mut bytes = region(&sample(), Endian::Little);
        bytes.extend_from_slice(&[0u8; 8]);
        let mut notes = NoteCollection::parse_from(&bytes, Endian::Little, 4).unwrap();
        assert_eq!(notes.len(), 3);
        assert_eq!(notes.encode_region().unwrap(), bytes);

        notes.add(Note::new("Foo", NoteType::GoldVersion, [123u8]));
        let encoded = notes.encode_region().unwrap();
        assert_eq!(encoded.len(), bytes.len() - 8 + 20);
    }

    #[test]
    fn bad_record_aborts_parse() {
        let mut bytes = region(&sample(), Endian::Little);
        bytes.extend_from_slice(&[0u8; 12]);
        let err = NoteCollection::parse_from(&bytes, Endian::Little, 4).unwrap_err();
        assert!(matches!(err, Error::MalformedNote { .. }));
    }
}
