//! # BAF - Basic Archive Format
//!
//! `baf-rs` reads and writes Basic Archive Format archives: random-access
//! archives where entries can be added, removed, renamed and moved without
//! rewriting the archive.
//!
//! - **Fixed-slot file table** in linked segments, freed slots are reused
//! - **Directory tree** rebuilt from parent pointers on open
//! - **SHA3-256 checksums** verified on every read
//! - **No free list on disk**: free space is derived from what is in use
//!
//! ## Quick Start
//!
//! ```rust
//! use baf_rs::{Archive, MemoryStorage, Result, ROOT};
//!
//! # fn main() -> Result<()> {
//! let mut archive = Archive::create(MemoryStorage::new())?;
//!
//! let docs = archive.add_directory(ROOT, "docs", 0)?;
//! let id = archive.add_file(docs, "report.txt", b"Hello, World!", 0)?;
//!
//! assert_eq!(archive.extract_file(id)?, b"Hello, World!");
//! assert_eq!(archive.resolve_path("/docs/report.txt")?, id);
//!
//! let storage = archive.close()?;
//! let archive = Archive::open(storage)?;
//! assert_eq!(archive.list_directory(docs)?.count(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom configuration
//!
//! ```rust,no_run
//! use baf_rs::{ArchiveBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! let mut archive = ArchiveBuilder::new()
//!     .slots_per_segment(64, 256)
//!     .sync_barriers(false)
//!     .create_file("data.baf")?;
//!
//! archive.add_file_at("/logs/today.txt", b"started", 0)?;
//! archive.close()?;
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core resolve
#[allow(unused_imports)]
pub(crate) use crate::core::{
    allocator, archive, config, content, error, header, health, io, name, table, timestamp, tree,
};

// Re-export core types that users need
pub use crate::core::{
    Archive, ArchiveConfig, ArchivePath, ArchiveStats, BafError, BlobReader, Children,
    ContentRef, Diagnostic, Entry, EntryKind, ErrorKind, FileStorage, Header, HealthReport,
    ItemName, MemoryStorage, Result, Severity, Storage, TableState, Walk, ROOT,
};

use std::path::Path;
use tracing::info;

/// Builder for creating or opening archives with custom settings
///
/// # Examples
///
/// ```rust
/// use baf_rs::{ArchiveBuilder, MemoryStorage};
///
/// # fn main() -> baf_rs::Result<()> {
/// let archive = ArchiveBuilder::new()
///     .slots_per_segment(2, 2)
///     .allow_duplicate_names()
///     .create(MemoryStorage::new())?;
/// assert_eq!(archive.stats().segments, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    config: ArchiveConfig,
}

impl ArchiveBuilder {
    /// Create a new ArchiveBuilder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn with_config(config: ArchiveConfig) -> Self {
        ArchiveBuilder { config }
    }

    /// Load settings from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::with_config(ArchiveConfig::from_toml_str(&text)?))
    }

    /// Header version written on create
    pub fn version(mut self, version: u32) -> Self {
        self.config.version = version;
        self
    }

    /// Slot capacities of segments appended when the table is full
    pub fn slots_per_segment(mut self, dirs: u32, files: u32) -> Self {
        self.config.dirs_per_segment = dirs;
        self.config.files_per_segment = files;
        self
    }

    /// Slot capacities of the segment written on create
    pub fn first_segment_slots(mut self, dirs: u32, files: u32) -> Self {
        self.config.first_segment_dirs = Some(dirs);
        self.config.first_segment_files = Some(files);
        self
    }

    /// Let siblings share a name (the first one in table order wins lookups)
    pub fn allow_duplicate_names(mut self) -> Self {
        self.config.reject_duplicate_names = false;
        self
    }

    /// Sync storage between the write steps of each mutation
    pub fn sync_barriers(mut self, enabled: bool) -> Self {
        self.config.sync_barriers = enabled;
        self
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Create a new archive in `storage`
    pub fn create<S: Storage>(self, storage: S) -> Result<Archive<S>> {
        Archive::create_with_config(storage, self.config)
    }

    /// Open an existing archive in `storage`
    pub fn open<S: Storage>(self, storage: S) -> Result<Archive<S>> {
        Archive::open_with_config(storage, self.config)
    }

    /// Create a new archive file (fails if the file exists)
    pub fn create_file<P: AsRef<Path>>(self, path: P) -> Result<Archive<FileStorage>> {
        info!("Creating archive at {:?}", path.as_ref());
        self.create(FileStorage::create(path)?)
    }

    /// Open an archive file for reading and writing
    pub fn open_file<P: AsRef<Path>>(self, path: P) -> Result<Archive<FileStorage>> {
        info!("Opening archive at {:?}", path.as_ref());
        self.open(FileStorage::open(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_settings() {
        let builder = ArchiveBuilder::new()
            .slots_per_segment(4, 8)
            .first_segment_slots(1, 1)
            .allow_duplicate_names()
            .sync_barriers(false);

        let config = builder.config();
        assert_eq!(config.segment_capacities(), (4, 8));
        assert_eq!(config.first_segment_capacities(), (1, 1));
        assert!(!config.reject_duplicate_names);
        assert!(!config.sync_barriers);
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        let err = ArchiveBuilder::new()
            .slots_per_segment(0, 4)
            .create(MemoryStorage::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = ArchiveBuilder::new()
            .version(9)
            .create(MemoryStorage::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_create_and_open_file() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("test.baf");

        let mut archive = ArchiveBuilder::new()
            .slots_per_segment(4, 4)
            .create_file(&path)?;
        archive.add_file_at("/a/b.txt", b"content", 0)?;
        archive.close()?;

        let mut archive = ArchiveBuilder::new().open_file(&path)?;
        assert_eq!(archive.extract_path("/a/b.txt")?, b"content");
        assert_eq!(archive.stats().segments, 1);
        Ok(())
    }

    #[test]
    fn test_builder_from_toml_file() -> Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("baf.toml");
        std::fs::write(&path, "dirs_per_segment = 3\nfiles_per_segment = 5\n")?;

        let archive = ArchiveBuilder::from_toml_file(&path)?.create(MemoryStorage::new())?;
        assert_eq!(archive.config().segment_capacities(), (3, 5));
        Ok(())
    }
}
