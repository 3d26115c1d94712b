//! File table segments
//!
//! ```text
//! 0..8    next segment address (u64 LE, 0 = last)
//! 8..12   directory slot capacity (u32 LE)
//! 12..16  file slot capacity (u32 LE)
//! 16..    directory slots, then file slots
//! ```

use crate::error::{BafError, Result};
use crate::table::entry::{EntryKind, DIR_SLOT_SIZE, FILE_SLOT_SIZE};

pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Byte size of a segment, `None` if it does not fit in a u64
pub fn segment_size(dir_capacity: u32, file_capacity: u32) -> Option<u64> {
    let dirs = (dir_capacity as u64).checked_mul(DIR_SLOT_SIZE as u64)?;
    let files = (file_capacity as u64).checked_mul(FILE_SLOT_SIZE as u64)?;
    (SEGMENT_HEADER_SIZE as u64).checked_add(dirs)?.checked_add(files)
}

/// Fixed header at the start of every segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub next: u64,
    pub dir_capacity: u32,
    pub file_capacity: u32,
}

impl SegmentHeader {
    pub fn new(dir_capacity: u32, file_capacity: u32) -> Self {
        SegmentHeader {
            next: 0,
            dir_capacity,
            file_capacity,
        }
    }

    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE];
        bytes[0..8].copy_from_slice(&self.next.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.dir_capacity.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.file_capacity.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SEGMENT_HEADER_SIZE {
            return Err(BafError::Format(format!(
                "Truncated segment header: {} bytes",
                bytes.len()
            )));
        }

        let mut next = [0u8; 8];
        next.copy_from_slice(&bytes[0..8]);

        Ok(SegmentHeader {
            next: u64::from_le_bytes(next),
            dir_capacity: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            file_capacity: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        })
    }

    /// Total size of the segment this header describes
    pub fn segment_size(&self) -> Option<u64> {
        segment_size(self.dir_capacity, self.file_capacity)
    }

    pub fn capacity(&self, kind: EntryKind) -> u32 {
        match kind {
            EntryKind::Directory => self.dir_capacity,
            EntryKind::File => self.file_capacity,
        }
    }

    /// Offset of a slot relative to the segment start
    pub fn slot_offset(&self, kind: EntryKind, index: u32) -> u64 {
        let base = SEGMENT_HEADER_SIZE as u64;
        match kind {
            EntryKind::Directory => base + index as u64 * DIR_SLOT_SIZE as u64,
            EntryKind::File => {
                base + self.dir_capacity as u64 * DIR_SLOT_SIZE as u64
                    + index as u64 * FILE_SLOT_SIZE as u64
            }
        }
    }
}

/// A loaded segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Absolute address of the segment header
    pub address: u64,
    pub header: SegmentHeader,
}

impl Segment {
    /// Total size in bytes (validated when the segment was created or decoded)
    pub fn size(&self) -> u64 {
        self.header.segment_size().unwrap_or(u64::MAX)
    }

    /// Absolute address of a slot
    pub fn slot_address(&self, kind: EntryKind, index: u32) -> u64 {
        self.address + self.header.slot_offset(kind, index)
    }

    /// Encode an empty segment: header followed by zeroed slots
    pub fn empty_bytes(header: &SegmentHeader) -> Result<Vec<u8>> {
        let size = header
            .segment_size()
            .and_then(|size| usize::try_from(size).ok())
            .ok_or_else(|| {
                BafError::Allocation(format!(
                    "Segment with {} directory and {} file slots is too large",
                    header.dir_capacity, header.file_capacity
                ))
            })?;

        let mut bytes = vec![0u8; size];
        bytes[..SEGMENT_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        Ok(bytes)
    }
}
