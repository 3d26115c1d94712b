//! Random-access storage backing an archive

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Raw byte storage an archive lives in
///
/// Offsets are absolute. Writing past the current end grows the storage;
/// reading past it fails with [`io::ErrorKind::UnexpectedEof`].
#[allow(clippy::len_without_is_empty)]
pub trait Storage {
    /// Fill `buf` with the bytes starting at `offset`
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `data` starting at `offset`
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Current length in bytes
    fn len(&mut self) -> io::Result<u64>;

    /// Grow or truncate to exactly `len` bytes
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// Make every previous write durable
    fn sync(&mut self) -> io::Result<()>;
}

impl<T: Storage + ?Sized> Storage for &mut T {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        (**self).write_at(offset, data)
    }

    fn len(&mut self) -> io::Result<u64> {
        (**self).len()
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}

/// In-memory storage
///
/// Nothing is persisted. An optional size limit makes the storage refuse to
/// grow past a given length, like a full disk would.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Vec<u8>,
    limit: Option<u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing bytes (not validated)
    pub fn from_bytes(data: Vec<u8>) -> Self {
        MemoryStorage { data, limit: None }
    }

    /// Refuse to grow beyond `limit` bytes
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    fn check_limit(&self, end: u64) -> io::Result<()> {
        match self.limit {
            Some(limit) if end > limit => Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("storage limit of {} bytes reached (requested {})", limit, end),
            )),
            _ => Ok(()),
        }
    }

    fn range(offset: u64, len: usize) -> io::Result<(usize, usize)> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        let end = start
            .checked_add(len)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "range overflows"))?;
        Ok((start, end))
    }
}

impl Storage for MemoryStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let (start, end) = Self::range(offset, buf.len())?;

        if end > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at {} past end ({})",
                    buf.len(),
                    offset,
                    self.data.len()
                ),
            ));
        }

        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let (start, end) = Self::range(offset, data.len())?;
        self.check_limit(end as u64)?;

        if end > self.data.len() {
            self.data.resize(end, 0);
        }

        self.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.check_limit(len)?;
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length out of range"))?;
        self.data.resize(len, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Disk-backed storage
pub struct FileStorage {
    file: File,
    path: Option<PathBuf>,
}

impl FileStorage {
    /// Create a new, empty file (fails if it already exists)
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        Ok(FileStorage {
            file,
            path: Some(path.as_ref().to_path_buf()),
        })
    }

    /// Open an existing file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(FileStorage {
            file,
            path: Some(path.as_ref().to_path_buf()),
        })
    }

    /// Wrap an already opened file
    pub fn from_file(file: File) -> Self {
        FileStorage { file, path: None }
    }

    /// Get file path, if known
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn into_file(self) -> File {
        self.file
    }
}

impl Storage for FileStorage {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)
    }

    fn len(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }
}
