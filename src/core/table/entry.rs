//! Directory and file entries and their fixed slot layout
//!
//! ```text
//! Directory slot (280 bytes)        File slot (328 bytes)
//! 0..8     id (0 = free)            0..280   directory slot fields
//! 8..16    parent id (0 = root)     280..288 content address
//! 16..272  name (len + 255 bytes)   288..296 content length
//! 272..280 modification time        296..328 SHA3-256 checksum
//! ```

use crate::error::{BafError, Result};
use crate::name::ItemName;
use crate::timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parent id of top-level entries (the root is not stored)
pub const ROOT: u64 = 0;

pub const DIR_SLOT_SIZE: usize = 280;
pub const FILE_SLOT_SIZE: usize = 328;
pub const CHECKSUM_SIZE: usize = 32;

pub(crate) const ID_RANGE: std::ops::Range<usize> = 0..8;
pub(crate) const PARENT_RANGE: std::ops::Range<usize> = 8..16;
pub(crate) const NAME_RANGE: std::ops::Range<usize> = 16..272;
pub(crate) const MTIME_RANGE: std::ops::Range<usize> = 272..280;
pub(crate) const ADDRESS_RANGE: std::ops::Range<usize> = 280..288;
pub(crate) const LENGTH_RANGE: std::ops::Range<usize> = 288..296;
pub(crate) const CHECKSUM_RANGE: std::ops::Range<usize> = 296..328;

/// Kind of slot an entry lives in
///
/// Directories sort before files, matching their order inside a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
}

impl EntryKind {
    pub fn slot_size(self) -> usize {
        match self {
            EntryKind::Directory => DIR_SLOT_SIZE,
            EntryKind::File => FILE_SLOT_SIZE,
        }
    }
}

/// Location and digest of a file's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub address: u64,
    pub length: u64,
    pub checksum: [u8; CHECKSUM_SIZE],
}

impl ContentRef {
    /// One past the last content byte, `None` on overflow
    pub fn end(&self) -> Option<u64> {
        self.address.checked_add(self.length)
    }

    pub fn checksum_hex(&self) -> String {
        self.checksum.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// A live directory or file
///
/// Entries handed out by an archive are snapshots; changing one does not
/// touch the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Archive-unique id, never 0
    pub id: u64,

    /// Parent directory id, [`ROOT`] for top-level entries
    pub parent: u64,

    pub name: ItemName,

    /// Modification time (seconds since the Unix epoch)
    pub modified: u64,

    /// Content of a file, `None` for directories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentRef>,
}

impl Entry {
    pub fn directory(id: u64, parent: u64, name: ItemName, modified: u64) -> Self {
        Entry {
            id,
            parent,
            name,
            modified,
            content: None,
        }
    }

    pub fn file(id: u64, parent: u64, name: ItemName, modified: u64, content: ContentRef) -> Self {
        Entry {
            id,
            parent,
            name,
            modified,
            content: Some(content),
        }
    }

    pub fn kind(&self) -> EntryKind {
        if self.content.is_some() {
            EntryKind::File
        } else {
            EntryKind::Directory
        }
    }

    pub fn is_dir(&self) -> bool {
        self.content.is_none()
    }

    pub fn is_file(&self) -> bool {
        self.content.is_some()
    }

    /// Content length, 0 for directories
    pub fn size(&self) -> u64 {
        self.content.map_or(0, |c| c.length)
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        timestamp::to_datetime(self.modified)
    }

    /// Encode into a slot of the matching kind
    pub fn to_slot_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.kind().slot_size()];

        bytes[ID_RANGE].copy_from_slice(&self.id.to_le_bytes());
        bytes[PARENT_RANGE].copy_from_slice(&self.parent.to_le_bytes());

        let mut name = [0u8; ItemName::FIELD_SIZE];
        self.name.encode(&mut name);
        bytes[NAME_RANGE].copy_from_slice(&name);

        bytes[MTIME_RANGE].copy_from_slice(&self.modified.to_le_bytes());

        if let Some(content) = &self.content {
            bytes[ADDRESS_RANGE].copy_from_slice(&content.address.to_le_bytes());
            bytes[LENGTH_RANGE].copy_from_slice(&content.length.to_le_bytes());
            bytes[CHECKSUM_RANGE].copy_from_slice(&content.checksum);
        }

        bytes
    }

    /// Decode a slot
    ///
    /// Returns `None` for a free slot (id 0); the rest of a free slot is
    /// never looked at.
    pub fn from_slot_bytes(kind: EntryKind, bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() < kind.slot_size() {
            return Err(BafError::Format(format!(
                "Truncated {:?} slot: {} bytes",
                kind,
                bytes.len()
            )));
        }

        let id = read_u64(bytes, ID_RANGE);
        if id == 0 {
            return Ok(None);
        }

        let parent = read_u64(bytes, PARENT_RANGE);
        let name = ItemName::decode(&bytes[NAME_RANGE])?;
        let modified = read_u64(bytes, MTIME_RANGE);

        let content = match kind {
            EntryKind::Directory => None,
            EntryKind::File => {
                let mut checksum = [0u8; CHECKSUM_SIZE];
                checksum.copy_from_slice(&bytes[CHECKSUM_RANGE]);

                Some(ContentRef {
                    address: read_u64(bytes, ADDRESS_RANGE),
                    length: read_u64(bytes, LENGTH_RANGE),
                    checksum,
                })
            }
        };

        Ok(Some(Entry {
            id,
            parent,
            name,
            modified,
            content,
        }))
    }
}

fn read_u64(bytes: &[u8], range: std::ops::Range<usize>) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[range]);
    u64::from_le_bytes(buf)
}
