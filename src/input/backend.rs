use super::{ElfReader, IntoElfReader};
use crate::{Result, io_error};
use alloc::{
    borrow::Cow,
    string::{String, ToString},
    vec::Vec,
};

/// An ELF source backed by bytes already in memory.
///
/// The bytes are either borrowed (a slice embedded in the binary, a mapped
/// file) or owned (a buffer received over the network).
#[derive(Debug)]
pub struct ElfBinary<'bytes> {
    /// The name assigned to this ELF object.
    name: String,
    /// The raw ELF data.
    bytes: Cow<'bytes, [u8]>,
}

impl<'bytes> ElfBinary<'bytes> {
    /// Creates a new memory-based ELF source.
    ///
    /// # Arguments
    /// - `name` - A string identifier for the ELF object, typically the
    ///            original file path. Used for error reporting and debugging.
    /// - `bytes` - The complete ELF data, borrowed or owned.
    ///
    /// # Examples
    /// ```rust
    /// use elf_notes::input::ElfBinary;
    ///
    /// let data: &[u8] = &[]; // In practice, this would be the bytes of an ELF file
    /// let binary = ElfBinary::new("liba.so", data);
    /// ```
    pub fn new(name: &str, bytes: impl Into<Cow<'bytes, [u8]>>) -> Self {
        Self {
            name: name.to_string(),
            bytes: bytes.into(),
        }
    }
}

impl<'bytes> ElfReader for ElfBinary<'bytes> {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn size(&mut self) -> Result<usize> {
        Ok(self.bytes.len())
    }

    /// Copies `buf.len()` bytes starting at `offset` out of the buffer.
    ///
    /// # Returns
    /// - `Ok(())` - If the read operation was successful.
    /// - `Err` - If the read would go beyond the available data.
    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        let end = offset
            .checked_add(buf.len())
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| io_error("read offset out of bounds"))?;
        buf.copy_from_slice(&self.bytes[offset..end]);
        Ok(())
    }

    fn read_all(&mut self) -> Result<Vec<u8>> {
        Ok(core::mem::take(&mut self.bytes).into_owned())
    }
}

// Implementation for byte slices (in-memory ELF data)
impl<'a> IntoElfReader<'a> for &'a [u8] {
    type Reader = ElfBinary<'a>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(ElfBinary::new("<memory>", self))
    }
}

impl<'a> IntoElfReader<'a> for &'a Vec<u8> {
    type Reader = ElfBinary<'a>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(ElfBinary::new("<memory>", self.as_slice()))
    }
}

// Owned buffers are moved into the image without a copy
impl<'a> IntoElfReader<'a> for Vec<u8> {
    type Reader = ElfBinary<'a>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(ElfBinary::new("<memory>", self))
    }
}

// Implementation for already constructed ElfBinary (pass-through)
impl<'a, 'b> IntoElfReader<'a> for ElfBinary<'b>
where
    'b: 'a,
{
    type Reader = ElfBinary<'b>;

    fn into_reader(self) -> Result<Self::Reader> {
        Ok(self)
    }
}

#[cfg(feature = "std")]
pub use file::ElfFile;

#[cfg(feature = "std")]
mod file {
    use super::*;
    use crate::os::RawFile;

    /// An ELF source backed by a file on the filesystem.
    pub struct ElfFile {
        /// The underlying file handle.
        inner: RawFile,
    }

    impl ElfFile {
        /// Opens the file at `path`.
        ///
        /// # Returns
        /// - `Ok(ElfFile)` - If the file was successfully opened.
        /// - `Err` - If the file could not be opened.
        pub fn from_path(path: impl AsRef<str>) -> Result<Self> {
            Ok(ElfFile {
                inner: RawFile::from_path(path.as_ref())?,
            })
        }
    }

    impl ElfReader for ElfFile {
        fn file_name(&self) -> &str {
            self.inner.file_name()
        }

        fn size(&mut self) -> Result<usize> {
            self.inner.size()
        }

        fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
            self.inner.read(buf, offset)
        }
    }

    // Implementation for string slices (file paths)
    impl<'a> IntoElfReader<'a> for &'a str {
        type Reader = ElfFile;

        fn into_reader(self) -> Result<Self::Reader> {
            ElfFile::from_path(self)
        }
    }

    // Implementation for owned strings (file paths)
    impl<'a> IntoElfReader<'a> for String {
        type Reader = ElfFile;

        fn into_reader(self) -> Result<Self::Reader> {
            ElfFile::from_path(&self)
        }
    }

    impl<'a> IntoElfReader<'a> for &'a std::path::Path {
        type Reader = ElfFile;

        fn into_reader(self) -> Result<Self::Reader> {
            let path = self
                .to_str()
                .ok_or_else(|| io_error("path is not valid UTF-8"))?;
            ElfFile::from_path(path)
        }
    }

    // Implementation for already constructed ElfFile (pass-through)
    impl<'a> IntoElfReader<'a> for ElfFile {
        type Reader = ElfFile;

        fn into_reader(self) -> Result<Self::Reader> {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn memory_reader_serves_positional_reads() {
        let data: &[u8] = &[1, 2, 3, 4, 5];
        let mut reader = data.into_reader().unwrap();
        assert_eq!(reader.file_name(), "<memory>");
        assert_eq!(reader.size().unwrap(), 5);

        let mut buf = [0u8; 2];
        reader.read(&mut buf, 3).unwrap();
        assert_eq!(buf, [4, 5]);
        let err = reader.read(&mut buf, 4).unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "{err}");

        assert_eq!(reader.read_all().unwrap(), data);
    }
}
