//! # elf_notes
//! A `lightweight`, `no_std` friendly library for reading, editing and writing back
//! the notes of ELF files.
//! ## Usage
//! [`ElfImage::parse`] finds every note region of an ELF32 or ELF64 file of either
//! byte order and decodes its notes. Notes can then be looked up, edited, added and
//! removed in memory. On write the regions are re-encoded and the file layout is
//! rebuilt around them, and the section headers, program headers and ELF header are
//! updated to match. Loaded content keeps its addresses; a region that cannot grow
//! where it is loaded is moved behind the end of the file and left unmapped.
//! ## Example
//! ```no_run
//! use elf_notes::{ElfImage, Note, NoteType};
//!
//! let mut image = ElfImage::parse("liba.so").unwrap();
//! if let Ok(build_id) = image.note(NoteType::BuildId) {
//!     println!("build id: {:02x?}", build_id.description());
//! }
//! image.remove_note_type(NoteType::BuildId).unwrap();
//! image.add_note(Note::new("Foo", NoteType::GoldVersion, [123u8])).unwrap();
//! image.write("liba.so").unwrap();
//! ```
#![no_std]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod elf;
mod error;
mod image;
pub mod input;
mod layout;
pub mod note;

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        mod os;
        pub use image::WriteOptions;
    }
}

pub use error::Error;
pub use image::{ElfImage, NoteRegion};
pub use note::{Note, NoteCollection, NoteType};

pub(crate) use error::{
    inconsistent_header_error, io_error, layout_overflow_error, malformed_note_error,
    not_found_error, parse_error, truncated_note_error, write_error,
};

/// A type alias for `Result`s returned by `elf_notes` functions.
///
/// This is a convenience alias that eliminates the need to repeatedly specify
/// the `Error` type in function signatures.
pub type Result<T> = core::result::Result<T, Error>;
