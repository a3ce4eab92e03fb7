//! Encoding and decoding of single note records.
//!
//! Record layout, in the byte order of the image:
//!
//! ```text
//! +--------+--------+--------+----------------------+----------------------+
//! | namesz | descsz | n_type | name + NUL, padded   | desc, padded         |
//! |   u32  |   u32  |   u32  | to `align`           | to `align`           |
//! +--------+--------+--------+----------------------+----------------------+
//! ```
//!
//! Padding is measured from the start of the record, so in an 8-aligned
//! region the description always starts on an 8-byte boundary.

use super::Note;
use crate::{
    Result, elf::Endian, layout_overflow_error, malformed_note_error, truncated_note_error,
};
use alloc::{format, vec::Vec};

/// Size of `namesz` + `descsz` + `n_type`.
pub(crate) const NOTE_HEADER_SIZE: usize = 12;

/// Record alignment for a region whose header declares `declared`.
///
/// Only 8 changes the padding rule; 0, 1, 2 and 4 all mean the classic
/// 4-byte layout.
#[inline]
pub(crate) fn record_align(declared: u64) -> usize {
    if declared == 8 { 8 } else { 4 }
}

#[inline]
fn pad(len: usize, align: usize) -> usize {
    (len + align - 1) & !(align - 1)
}

/// Padded size of `note` once encoded.
#[inline]
pub(crate) fn encoded_len(note: &Note, align: usize) -> usize {
    let desc_start = pad(NOTE_HEADER_SIZE + note.name().len() + 1, align);
    pad(desc_start + note.description().len(), align)
}

/// Decodes the record starting at `*cursor` and advances the cursor past its
/// padded end.
///
/// When the final padding of the last record is cut off by the end of the
/// region the cursor stops at the region end.
pub(crate) fn decode(
    region: &[u8],
    cursor: &mut usize,
    endian: Endian,
    align: usize,
) -> Result<Note> {
    let start = *cursor;
    let len = region.len();
    if start + NOTE_HEADER_SIZE > len {
        return Err(truncated_note_error(format!(
            "record header at 0x{start:x} exceeds the region ({len} bytes)"
        )));
    }

    let namesz = endian.read_u32(&region[start..]) as usize;
    let descsz = endian.read_u32(&region[start + 4..]) as usize;
    let type_id = endian.read_u32(&region[start + 8..]);
    if namesz == 0 {
        return Err(malformed_note_error(format!(
            "record at 0x{start:x} has an empty owner name"
        )));
    }

    let name_start = start + NOTE_HEADER_SIZE;
    let name_end = name_start
        .checked_add(namesz)
        .filter(|end| *end <= len)
        .ok_or_else(|| {
            truncated_note_error(format!(
                "namesz {namesz} of record at 0x{start:x} exceeds the region"
            ))
        })?;
    let desc_start = (start + pad(NOTE_HEADER_SIZE + namesz, align)).min(len);
    let desc_end = desc_start
        .checked_add(descsz)
        .filter(|end| *end <= len)
        .ok_or_else(|| {
            truncated_note_error(format!(
                "descsz {descsz} of record at 0x{start:x} exceeds the region"
            ))
        })?;

    let mut name = region[name_start..name_end].to_vec();
    if name.last() == Some(&0) {
        name.pop();
    }
    let description = region[desc_start..desc_end].to_vec();
    *cursor = (start + pad(desc_end - start, align)).min(len);
    Ok(Note::from_raw(name, type_id, description))
}

/// Appends the padded encoding of `note` to `out`.
pub(crate) fn encode_into(
    note: &Note,
    endian: Endian,
    align: usize,
    out: &mut Vec<u8>,
) -> Result<()> {
    let namesz = u32::try_from(note.name().len() + 1)
        .map_err(|_| layout_overflow_error("note owner name is longer than 4 GiB"))?;
    let descsz = u32::try_from(note.description().len())
        .map_err(|_| layout_overflow_error("note description is longer than 4 GiB"))?;

    let start = out.len();
    let mut header = [0u8; NOTE_HEADER_SIZE];
    endian.write_u32(&mut header[0..4], namesz);
    endian.write_u32(&mut header[4..8], descsz);
    endian.write_u32(&mut header[8..12], note.type_id());
    out.extend_from_slice(&header);
    out.extend_from_slice(note.name());
    out.push(0);
    out.resize(start + pad(out.len() - start, align), 0);
    out.extend_from_slice(note.description());
    out.resize(start + pad(out.len() - start, align), 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, NoteType};
    use alloc::vec;

    fn build_id() -> Note {
        Note::new("GNU", NoteType::BuildId, (0..20u8).collect::<Vec<_>>())
    }

    #[test]
    fn encodes_gnu_build_id() {
        let mut out = Vec::new();
        encode_into(&build_id(), Endian::Little, 4, &mut out).unwrap();
        assert_eq!(out.len(), 36);
        assert_eq!(&out[0..12], &[4, 0, 0, 0, 20, 0, 0, 0, 3, 0, 0, 0]);
        assert_eq!(&out[12..16], b"GNU\0");
        assert_eq!(&out[16..], &(0..20u8).collect::<Vec<_>>()[..]);
        assert_eq!(encoded_len(&build_id(), 4), out.len());
    }

    #[test]
    fn encodes_big_endian_header() {
        let mut out = Vec::new();
        encode_into(&build_id(), Endian::Big, 4, &mut out).unwrap();
        assert_eq!(&out[0..12], &[0, 0, 0, 4, 0, 0, 0, 20, 0, 0, 0, 3]);
    }

    #[test]
    fn pads_name_and_description() {
        let note = Note::new("Foo1", NoteType::GoldVersion, [123u8]);
        let mut out = Vec::new();
        encode_into(&note, Endian::Little, 4, &mut out).unwrap();
        // 12 header + "Foo1\0" padded to 8 + 1 desc byte padded to 4
        assert_eq!(out.len(), 12 + 8 + 4);
        assert_eq!(&out[12..20], b"Foo1\0\0\0\0");
        assert_eq!(&out[20..], &[123, 0, 0, 0]);
    }

    #[test]
    fn eight_byte_alignment_is_measured_from_record_start() {
        let note = Note::new("GNU", NoteType::Property, vec![0xaa; 12]);
        let mut out = Vec::new();
        encode_into(&note, Endian::Little, 8, &mut out).unwrap();
        // the description starts right after "GNU\0" at offset 16
        assert_eq!(out[16], 0xaa);
        assert_eq!(out.len(), 32);
        assert_eq!(encoded_len(&note, 8), 32);

        let mut cursor = 0;
        let decoded = decode(&out, &mut cursor, Endian::Little, 8).unwrap();
        assert_eq!(decoded, note);
        assert_eq!(cursor, 32);
    }

    #[test]
    fn decode_advances_past_each_record() {
        let first = build_id();
        let second = Note::new("Foo", NoteType::Unknown(0x100), [1u8, 2, 3, 4, 5]);
        let mut region = Vec::new();
        encode_into(&first, Endian::Big, 4, &mut region).unwrap();
        encode_into(&second, Endian::Big, 4, &mut region).unwrap();

        let mut cursor = 0;
        assert_eq!(decode(&region, &mut cursor, Endian::Big, 4).unwrap(), first);
        assert_eq!(cursor, 36);
        assert_eq!(decode(&region, &mut cursor, Endian::Big, 4).unwrap(), second);
        assert_eq!(cursor, region.len());
    }

    #[test]
    fn missing_final_padding_stops_at_region_end() {
        let note = Note::new("GNU", NoteType::Unknown(7), [9u8]);
        let mut region = Vec::new();
        encode_into(&note, Endian::Little, 4, &mut region).unwrap();
        region.truncate(region.len() - 3);

        let mut cursor = 0;
        assert_eq!(decode(&region, &mut cursor, Endian::Little, 4).unwrap(), note);
        assert_eq!(cursor, region.len());
    }

    #[test]
    fn empty_name_is_malformed() {
        let mut region = vec![0u8; 16];
        region[4] = 4;
        let mut cursor = 0;
        let err = decode(&region, &mut cursor, Endian::Little, 4).unwrap_err();
        assert!(matches!(err, Error::MalformedNote { .. }));
        assert_eq!(cursor, 0);
    }

    #[test]
    fn oversized_fields_are_truncated() {
        let mut region = Vec::new();
        encode_into(&build_id(), Endian::Little, 4, &mut region).unwrap();

        let mut short = region.clone();
        short.truncate(30);
        let err = decode(&short, &mut 0, Endian::Little, 4).unwrap_err();
        assert!(matches!(err, Error::TruncatedNote { .. }));

        let mut huge_name = region.clone();
        huge_name[0..4].copy_from_slice(&0x1000u32.to_le_bytes());
        let err = decode(&huge_name, &mut 0, Endian::Little, 4).unwrap_err();
        assert!(matches!(err, Error::TruncatedNote { .. }));

        let err = decode(&region[..8], &mut 0, Endian::Little, 4).unwrap_err();
        assert!(matches!(err, Error::TruncatedNote { .. }));
    }

    #[test]
    fn unterminated_name_is_kept_whole() {
        let mut region = Vec::new();
        region.extend_from_slice(&4u32.to_le_bytes());
        region.extend_from_slice(&0u32.to_le_bytes());
        region.extend_from_slice(&1u32.to_le_bytes());
        region.extend_from_slice(b"ABCD");
        let note = decode(&region, &mut 0, Endian::Little, 4).unwrap();
        assert_eq!(note.name(), b"ABCD");
        assert!(note.description().is_empty());
    }
}
