use crate::Result;
use alloc::{vec, vec::Vec};

/// A trait for reading ELF data from various sources.
///
/// `ElfReader` abstracts the underlying storage (memory, file system, etc.)
/// providing a unified interface for the image parser to pull the bytes of
/// an ELF file.
pub trait ElfReader {
    /// Returns the full name or path of the ELF object.
    fn file_name(&self) -> &str;

    /// Returns the total size of the ELF source in bytes.
    fn size(&mut self) -> Result<usize>;

    /// Reads a chunk of data from the ELF object into the provided buffer.
    ///
    /// # Arguments
    /// * `buf` - The destination buffer. Its length determines the number of bytes read.
    /// * `offset` - The starting byte offset within the ELF source.
    fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()>;

    /// Reads the whole source into memory.
    fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; self.size()?];
        self.read(&mut bytes, 0)?;
        Ok(bytes)
    }
}

/// A trait for converting various input sources into an `ElfReader`.
///
/// This trait allows different types (like file paths or byte slices) to be
/// converted into a reader that implements `ElfReader`, so
/// [`ElfImage::parse`](crate::ElfImage::parse) accepts all of them.
pub trait IntoElfReader<'a> {
    /// The type of reader produced by this conversion.
    type Reader: ElfReader + 'a;

    /// Converts the input into an `ElfReader`.
    ///
    /// # Returns
    /// * `Ok(reader)` - The converted reader.
    /// * `Err(error)` - If the conversion fails (e.g., file not found).
    fn into_reader(self) -> Result<Self::Reader>;
}
