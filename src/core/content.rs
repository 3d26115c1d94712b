//! Content store: blob I/O and SHA3-256 checksums
//!
//! Blobs are raw bytes anywhere inside the archive extent. Their location and
//! digest live only in the owning file entry.

use crate::allocator::{self, ExtentAllocator, SpaceAllocator};
use crate::error::{BafError, Result};
use crate::header::HEADER_SIZE;
use crate::io::Storage;
use crate::table::ContentRef;
use sha3::{Digest, Sha3_256};
use std::io::{self, Read};

/// Chunk size for streamed reads and writes
pub const CHUNK_SIZE: usize = 4096;

/// SHA3-256 digest of `data`
pub fn checksum(data: &[u8]) -> [u8; 32] {
    Sha3_256::digest(data).into()
}

/// Allocate space for `data`, write it and return where it went
///
/// Empty blobs take no space and are stored at address 0.
pub fn write_blob<S: Storage + ?Sized>(
    storage: &mut S,
    allocator: &mut ExtentAllocator,
    data: &[u8],
) -> Result<ContentRef> {
    let length = data.len() as u64;
    let digest = checksum(data);

    if length == 0 {
        return Ok(ContentRef {
            address: 0,
            length: 0,
            checksum: digest,
        });
    }

    let address = allocator::reserve(allocator, storage, length)?;

    if let Err(e) = storage.write_at(address, data) {
        allocator.free(address, length)?;
        return Err(e.into());
    }

    tracing::debug!("Wrote blob: {} bytes at {}", length, address);

    Ok(ContentRef {
        address,
        length,
        checksum: digest,
    })
}

/// Stream exactly `length` bytes from `reader` into a new blob
///
/// A reader that ends early fails with an `UnexpectedEof` I/O error and the
/// space is returned to the allocator.
pub fn write_blob_from_reader<S, R>(
    storage: &mut S,
    allocator: &mut ExtentAllocator,
    reader: &mut R,
    length: u64,
) -> Result<ContentRef>
where
    S: Storage + ?Sized,
    R: Read + ?Sized,
{
    if length == 0 {
        return Ok(ContentRef {
            address: 0,
            length: 0,
            checksum: checksum(&[]),
        });
    }

    let address = allocator::reserve(allocator, storage, length)?;

    match copy_hashed(storage, reader, address, length) {
        Ok(digest) => {
            tracing::debug!("Streamed blob: {} bytes at {}", length, address);
            Ok(ContentRef {
                address,
                length,
                checksum: digest,
            })
        }
        Err(e) => {
            allocator.free(address, length)?;
            Err(e.into())
        }
    }
}

fn copy_hashed<S, R>(storage: &mut S, reader: &mut R, address: u64, length: u64) -> io::Result<[u8; 32]>
where
    S: Storage + ?Sized,
    R: Read + ?Sized,
{
    let mut hasher = Sha3_256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;

    while written < length {
        let n = (length - written).min(CHUNK_SIZE as u64) as usize;
        reader.read_exact(&mut buf[..n])?;
        storage.write_at(address + written, &buf[..n])?;
        hasher.update(&buf[..n]);
        written += n as u64;
    }

    Ok(hasher.finalize().into())
}

/// Check that a blob lies inside the archive extent
pub fn check_bounds(content: &ContentRef, extent: u64) -> Result<()> {
    if content.length == 0 {
        return Ok(());
    }

    match content.end() {
        Some(end) if content.address >= HEADER_SIZE as u64 && end <= extent => Ok(()),
        _ => Err(BafError::Format(format!(
            "Blob at {} ({} bytes) lies outside archive extent {}",
            content.address, content.length, extent
        ))),
    }
}

/// Read a blob and verify its checksum
pub fn read_blob<S: Storage + ?Sized>(
    storage: &mut S,
    extent: u64,
    content: &ContentRef,
) -> Result<Vec<u8>> {
    check_bounds(content, extent)?;

    let len = usize::try_from(content.length)
        .map_err(|_| BafError::Format(format!("Blob of {} bytes too large", content.length)))?;
    let mut data = vec![0u8; len];

    if len > 0 {
        storage
            .read_at(content.address, &mut data)
            .map_err(|e| BafError::from_decode_io(e, "blob"))?;
    }

    if checksum(&data) != content.checksum {
        return Err(integrity_error(content));
    }

    Ok(data)
}

/// Verify a blob's checksum without keeping its bytes
pub fn verify_blob<S: Storage + ?Sized>(
    storage: &mut S,
    extent: u64,
    content: &ContentRef,
) -> Result<()> {
    let mut reader = BlobReader::new(storage, extent, *content)?;
    io::copy(&mut reader, &mut io::sink()).map_err(|e| reader_error(e, content))?;
    Ok(())
}

/// Return a blob's space to the allocator
pub fn free_blob(allocator: &mut ExtentAllocator, content: &ContentRef) -> Result<()> {
    allocator.free(content.address, content.length)
}

fn integrity_error(content: &ContentRef) -> BafError {
    BafError::Integrity {
        address: content.address,
        length: content.length,
    }
}

/// Map an error from [`BlobReader`] back to an archive error
pub(crate) fn reader_error(err: io::Error, content: &ContentRef) -> BafError {
    if err.kind() == io::ErrorKind::InvalidData {
        integrity_error(content)
    } else {
        BafError::from_decode_io(err, "blob")
    }
}

/// Streaming reader over a blob
///
/// The checksum is verified when the last byte is read. The read that
/// reaches the end fails with [`io::ErrorKind::InvalidData`] if the digest
/// does not match, so a mismatching final chunk is never handed out.
pub struct BlobReader<'a, S: Storage + ?Sized> {
    storage: &'a mut S,
    content: ContentRef,
    position: u64,
    hasher: Sha3_256,
    verified: bool,
}

impl<'a, S: Storage + ?Sized> BlobReader<'a, S> {
    pub fn new(storage: &'a mut S, extent: u64, content: ContentRef) -> Result<Self> {
        check_bounds(&content, extent)?;

        Ok(BlobReader {
            storage,
            content,
            position: 0,
            hasher: Sha3_256::new(),
            verified: false,
        })
    }

    /// Total blob length
    pub fn len(&self) -> u64 {
        self.content.length
    }

    pub fn is_empty(&self) -> bool {
        self.content.length == 0
    }

    /// Bytes not read yet
    pub fn remaining(&self) -> u64 {
        self.content.length - self.position
    }

    fn verify(&mut self) -> io::Result<()> {
        if self.verified {
            return Ok(());
        }

        let digest: [u8; 32] = self.hasher.clone().finalize().into();
        if digest != self.content.checksum {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                integrity_error(&self.content),
            ));
        }

        self.verified = true;
        Ok(())
    }
}

impl<S: Storage + ?Sized> Read for BlobReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 {
            self.verify()?;
            return Ok(0);
        }

        if buf.is_empty() {
            return Ok(0);
        }

        let n = remaining.min(buf.len() as u64) as usize;
        self.storage
            .read_at(self.content.address + self.position, &mut buf[..n])?;
        self.hasher.update(&buf[..n]);
        self.position += n as u64;

        if self.position == self.content.length {
            self.verify()?;
        }

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Extent;
    use crate::io::MemoryStorage;

    fn setup() -> (MemoryStorage, ExtentAllocator) {
        let mut storage = MemoryStorage::new();
        storage.set_len(256).unwrap();
        let alloc = ExtentAllocator::rebuild(256, [Extent::new(0, 256)]).unwrap();
        (storage, alloc)
    }

    #[test]
    fn test_write_and_read_blob() {
        let (mut storage, mut alloc) = setup();
        let content = write_blob(&mut storage, &mut alloc, b"Hello, BAF!").unwrap();

        assert_eq!(content.address, 256);
        assert_eq!(content.length, 11);
        assert_eq!(content.checksum, checksum(b"Hello, BAF!"));

        let data = read_blob(&mut storage, alloc.extent(), &content).unwrap();
        assert_eq!(data, b"Hello, BAF!");
    }

    #[test]
    fn test_known_digest() {
        // SHA3-256 of the empty string
        assert_eq!(
            ContentRef {
                address: 0,
                length: 0,
                checksum: checksum(b"")
            }
            .checksum_hex(),
            "a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a"
        );
    }

    #[test]
    fn test_empty_blob_takes_no_space() {
        let (mut storage, mut alloc) = setup();
        let content = write_blob(&mut storage, &mut alloc, b"").unwrap();

        assert_eq!((content.address, content.length), (0, 0));
        assert_eq!(alloc.extent(), 256);
        assert!(read_blob(&mut storage, 256, &content).unwrap().is_empty());
        free_blob(&mut alloc, &content).unwrap();
    }

    #[test]
    fn test_corruption_is_integrity_error() {
        let (mut storage, mut alloc) = setup();
        let content = write_blob(&mut storage, &mut alloc, b"payload").unwrap();

        storage.as_bytes_mut()[content.address as usize + 3] ^= 0x01;

        let err = read_blob(&mut storage, alloc.extent(), &content).unwrap_err();
        assert!(matches!(err, BafError::Integrity { address: 256, length: 7 }));
        assert!(matches!(
            verify_blob(&mut storage, alloc.extent(), &content),
            Err(BafError::Integrity { .. })
        ));
    }

    #[test]
    fn test_out_of_bounds_is_format_error() {
        let (mut storage, _) = setup();
        let content = ContentRef {
            address: 200,
            length: 100,
            checksum: [0; 32],
        };
        assert!(matches!(
            read_blob(&mut storage, 250, &content),
            Err(BafError::Format(_))
        ));

        let overflow = ContentRef {
            address: u64::MAX,
            length: 2,
            checksum: [0; 32],
        };
        assert!(matches!(
            read_blob(&mut storage, u64::MAX, &overflow),
            Err(BafError::Format(_))
        ));
    }

    #[test]
    fn test_stream_from_reader() {
        let (mut storage, mut alloc) = setup();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let content =
            write_blob_from_reader(&mut storage, &mut alloc, &mut data.as_slice(), 10_000)
                .unwrap();
        assert_eq!(content.checksum, checksum(&data));
        assert_eq!(read_blob(&mut storage, alloc.extent(), &content).unwrap(), data);
    }

    #[test]
    fn test_short_reader_frees_space() {
        let (mut storage, mut alloc) = setup();
        let err = write_blob_from_reader(&mut storage, &mut alloc, &mut &b"abc"[..], 10)
            .unwrap_err();

        assert!(matches!(err, BafError::Io(_)));
        assert_eq!(alloc.free_bytes(), 10);
    }

    #[test]
    fn test_write_failure_frees_space() {
        let mut storage = MemoryStorage::new().with_limit(300);
        storage.set_len(256).unwrap();
        let mut alloc = ExtentAllocator::rebuild(256, [Extent::new(0, 256)]).unwrap();

        let err = write_blob(&mut storage, &mut alloc, &[7u8; 100]).unwrap_err();
        assert!(matches!(err, BafError::Allocation(_)));
        assert_eq!(alloc.extent(), 256);
    }

    #[test]
    fn test_blob_reader_streams_and_verifies() {
        let (mut storage, mut alloc) = setup();
        let data = vec![42u8; 3 * CHUNK_SIZE + 5];
        let content = write_blob(&mut storage, &mut alloc, &data).unwrap();

        let mut reader = BlobReader::new(&mut storage, alloc.extent(), content).unwrap();
        assert_eq!(reader.len(), data.len() as u64);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_blob_reader_fails_on_last_chunk() {
        let (mut storage, mut alloc) = setup();
        let content = write_blob(&mut storage, &mut alloc, b"0123456789").unwrap();
        storage.as_bytes_mut()[content.address as usize] = b'X';

        let mut reader = BlobReader::new(&mut storage, alloc.extent(), content).unwrap();
        let mut first = [0u8; 4];
        reader.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"X123");

        let mut rest = Vec::new();
        let err = reader.read_to_end(&mut rest).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(matches!(
            reader_error(err, &content),
            BafError::Integrity { .. }
        ));
    }
}
