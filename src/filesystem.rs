//! Filesystem seam.
//!
//! The session opens, reads, writes, and seeks files only through [`Vfs`],
//! so embedded hosts can mount flash filesystems or tests can interpose
//! fault injection. Semantics follow POSIX `fopen`: `Read` is `"rb"`,
//! `Write` is `"wb"` (create/truncate), `Append` is `"ab"` (create, writes
//! at end).

use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

/// An open file handle. Everything the protocol needs is covered by the
/// std io traits; partial reads mid-file are allowed and recovered by the
/// sender.
pub trait VfsFile: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> VfsFile for T {}

pub trait Vfs: Send {
    fn open(&mut self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn VfsFile>>;
}

/// Default filesystem backed by `std::fs`.
#[derive(Debug, Default)]
pub struct StdFs;

impl Vfs for StdFs {
    fn open(&mut self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn VfsFile>> {
        let file: File = match mode {
            OpenMode::Read => File::open(path)?,
            OpenMode::Write => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
            OpenMode::Append => OpenOptions::new().append(true).create(true).open(path)?,
        };
        Ok(Box::new(file))
    }
}

/// Size of an already-open file, leaving the cursor at the start.
pub fn file_size(file: &mut dyn VfsFile) -> io::Result<u64> {
    let size = file.seek(io::SeekFrom::End(0))?;
    file.seek(io::SeekFrom::Start(0))?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::SeekFrom;

    #[test]
    fn std_fs_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.bin");
        let mut fs = StdFs;

        let mut f = fs.open(&path, OpenMode::Write).unwrap();
        f.write_all(b"hello").unwrap();
        drop(f);

        let mut f = fs.open(&path, OpenMode::Append).unwrap();
        f.write_all(b" world").unwrap();
        drop(f);

        let mut f = fs.open(&path, OpenMode::Read).unwrap();
        assert_eq!(file_size(f.as_mut()).unwrap(), 11);
        let mut content = String::new();
        f.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello world");

        f.seek(SeekFrom::Start(6)).unwrap();
        let mut tail = String::new();
        f.read_to_string(&mut tail).unwrap();
        assert_eq!(tail, "world");
    }

    #[test]
    fn write_truncates_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trunc.bin");
        let mut fs = StdFs;
        fs.open(&path, OpenMode::Write).unwrap().write_all(b"0123456789").unwrap();
        fs.open(&path, OpenMode::Write).unwrap().write_all(b"ab").unwrap();
        let mut f = fs.open(&path, OpenMode::Read).unwrap();
        assert_eq!(file_size(f.as_mut()).unwrap(), 2);
    }
}
