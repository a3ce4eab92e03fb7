//! Storage backend
//!
//! File sources are read and rebuilt images are persisted through
//! `std::fs`. Failures opening or reading a source map to
//! [`Error::Io`](crate::Error::Io), failures persisting an image to
//! [`Error::Write`](crate::Error::Write).

use crate::{Result, io_error, write_error};
use alloc::format;
use std::{
    fs::{self, File},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    string::{String, ToString},
};

pub(crate) struct RawFile {
    name: String,
    file: File,
}

impl RawFile {
    pub(crate) fn from_path(path: &str) -> Result<Self> {
        let file =
            File::open(path).map_err(|err| io_error(format!("failed to open {path}: {err}")))?;
        Ok(Self {
            name: path.to_string(),
            file,
        })
    }

    #[inline]
    pub(crate) fn file_name(&self) -> &str {
        &self.name
    }

    pub(crate) fn size(&mut self) -> Result<usize> {
        let meta = self
            .file
            .metadata()
            .map_err(|err| io_error(format!("failed to stat {}: {err}", self.name)))?;
        usize::try_from(meta.len()).map_err(|_| io_error(format!("{} is too large", self.name)))
    }

    pub(crate) fn read(&mut self, buf: &mut [u8], offset: usize) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset as u64))
            .and_then(|_| self.file.read_exact(buf))
            .map_err(|err| {
                io_error(format!(
                    "failed to read {} bytes at 0x{offset:x} from {}: {err}",
                    buf.len(),
                    self.name
                ))
            })
    }
}

/// Writes `bytes` to `path`.
///
/// With `atomic` the bytes go to a temporary sibling first, which is then
/// renamed over `path`; the destination is never observed half written.
/// The permissions of an existing destination are carried over.
pub(crate) fn persist(path: &Path, bytes: &[u8], atomic: bool) -> Result<()> {
    let err = |err: std::io::Error| write_error(format!("failed to write {}: {err}", path.display()));
    let permissions = fs::metadata(path).ok().map(|meta| meta.permissions());
    if !atomic {
        fs::write(path, bytes).map_err(err)?;
        return Ok(());
    }

    let tmp = temp_path(path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        if let Some(permissions) = permissions {
            fs::set_permissions(&tmp, permissions)?;
        }
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result.map_err(err)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_persist_replaces_destination() {
        let dir = std::env::temp_dir().join(format!("elf-notes-os-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.bin");
        fs::write(&path, b"old contents").unwrap();

        persist(&path, b"new", true).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!temp_path(&path).exists());

        persist(&path, b"direct", false).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"direct");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_directory_is_a_write_error() {
        let path = std::env::temp_dir()
            .join("elf-notes-missing-dir")
            .join("nested")
            .join("out.bin");
        let err = persist(&path, b"bytes", true).unwrap_err();
        assert!(matches!(err, crate::Error::Write { .. }));
    }

    #[test]
    fn raw_file_reads_at_offset() {
        let path = std::env::temp_dir().join(format!("elf-notes-raw-{}", std::process::id()));
        fs::write(&path, b"0123456789").unwrap();
        let mut file = RawFile::from_path(path.to_str().unwrap()).unwrap();
        assert_eq!(file.size().unwrap(), 10);
        let mut buf = [0u8; 3];
        file.read(&mut buf, 4).unwrap();
        assert_eq!(&buf, b"456");
        assert!(file.read(&mut buf, 9).is_err());
        fs::remove_file(&path).unwrap();
    }
}
