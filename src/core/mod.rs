//! Basic Archive Format core
//!
//! - [`error`] - Error types
//! - [`header`] - 256-byte archive header
//! - [`allocator`] - Free space tracking over the archive's byte range
//! - [`table`] - File table segments, slots and entries
//! - [`content`] - Blob I/O and SHA3-256 verification
//! - [`tree`] - Parent to children index, path resolution
//! - [`archive`] - The operations API tying it all together
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ 0..256: Header                              │
//! │  - Magic "BASICARC", version (u32 LE)       │
//! ├─────────────────────────────────────────────┤
//! │ 256..: First segment                        │
//! │  - next segment address, capacities         │
//! │  - directory slots (280 bytes each)         │
//! │  - file slots (328 bytes each)              │
//! ├─────────────────────────────────────────────┤
//! │ Anywhere after: blobs and further segments  │
//! │  - located only through file slots          │
//! │    and next-segment pointers                │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Free space is never stored. It is whatever the header, the segments and
//! the live blobs do not cover.

pub mod allocator;
pub mod archive;
pub mod config;
pub mod content;
pub mod error;
pub mod header;
pub mod health;
pub mod io;
pub mod name;
pub mod table;
pub mod timestamp;
pub mod tree;

pub use allocator::{Extent, ExtentAllocator, SpaceAllocator};
pub use archive::{Archive, ArchiveStats};
pub use config::ArchiveConfig;
pub use content::BlobReader;
pub use error::{BafError, ErrorKind, Result};
pub use header::{Header, HEADER_SIZE, MAGIC};
pub use health::{Diagnostic, HealthReport, Severity};
pub use io::{FileStorage, MemoryStorage, Storage};
pub use name::{ArchivePath, ItemName};
pub use table::{ContentRef, Entry, EntryKind, TableState, ROOT};
pub use tree::{Children, Walk};
