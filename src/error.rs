use alloc::borrow::Cow;
use core::fmt::Display;

/// Error types used throughout the `elf_notes` library.
/// These errors represent the failure conditions that can occur while parsing
/// an ELF image, editing its notes and writing it back.
#[derive(Debug)]
pub enum Error {
    /// An error occurred while opening or reading an ELF source.
    Io {
        /// A descriptive message about the I/O error.
        msg: Cow<'static, str>,
    },

    /// The ELF container is structurally invalid.
    ///
    /// This error typically indicates issues such as:
    /// * Invalid magic bytes or an unsupported class/data encoding
    /// * Truncated ELF header or header tables
    /// * Note regions that lie outside the file or overlap each other
    Parse {
        /// A descriptive message about the parsing error.
        msg: Cow<'static, str>,
    },

    /// A note record claims more bytes than its region holds.
    TruncatedNote {
        /// A descriptive message about the truncated record.
        msg: Cow<'static, str>,
    },

    /// A note record is malformed, e.g. it has an empty owner name.
    MalformedNote {
        /// A descriptive message about the malformed record.
        msg: Cow<'static, str>,
    },

    /// The requested note (or note region) does not exist.
    ///
    /// The collection that reported it is left untouched.
    NotFound {
        /// A descriptive message about what was looked up.
        msg: Cow<'static, str>,
    },

    /// An offset or size computed during write-back does not fit the
    /// word size of the image.
    LayoutOverflow {
        /// A descriptive message about the overflowing value.
        msg: Cow<'static, str>,
    },

    /// A note region is described inconsistently by the section and
    /// program header tables.
    InconsistentHeader {
        /// A descriptive message about the inconsistency.
        msg: Cow<'static, str>,
    },

    /// An error occurred while writing the rebuilt image to storage.
    Write {
        /// A descriptive message about the write error.
        msg: Cow<'static, str>,
    },
}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Io { msg } => write!(f, "I/O error: {msg}"),
            Error::Parse { msg } => write!(f, "ELF parsing error: {msg}"),
            Error::TruncatedNote { msg } => write!(f, "Truncated note: {msg}"),
            Error::MalformedNote { msg } => write!(f, "Malformed note: {msg}"),
            Error::NotFound { msg } => write!(f, "Not found: {msg}"),
            Error::LayoutOverflow { msg } => write!(f, "Layout overflow: {msg}"),
            Error::InconsistentHeader { msg } => write!(f, "Inconsistent header: {msg}"),
            Error::Write { msg } => write!(f, "Write error: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

/// Creates an I/O error with the specified message.
#[cold]
#[inline(never)]
#[allow(unused)]
pub(crate) fn io_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Io { msg: msg.into() }
}

/// Creates a parsing error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn parse_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Parse { msg: msg.into() }
}

/// Creates a truncated note error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn truncated_note_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::TruncatedNote { msg: msg.into() }
}

/// Creates a malformed note error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn malformed_note_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::MalformedNote { msg: msg.into() }
}

/// Creates a not found error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn not_found_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::NotFound { msg: msg.into() }
}

/// Creates a layout overflow error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn layout_overflow_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::LayoutOverflow { msg: msg.into() }
}

/// Creates an inconsistent header error with the specified message.
#[cold]
#[inline(never)]
pub(crate) fn inconsistent_header_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::InconsistentHeader { msg: msg.into() }
}

/// Creates a write error with the specified message.
#[cold]
#[inline(never)]
#[allow(unused)]
pub(crate) fn write_error(msg: impl Into<Cow<'static, str>>) -> Error {
    Error::Write { msg: msg.into() }
}
