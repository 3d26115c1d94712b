//! Archive operations
//!
//! [`Archive`] owns the storage for the duration of a session together with
//! everything derived from it: the decoded file table, the directory tree
//! index and the free space map. Every mutation writes through to storage
//! in this order:
//!
//! 1. content bytes
//! 2. slot body (parent, name, time, content fields)
//! 3. slot id, which makes the entry live
//!
//! Removal zeroes the id first and releases content afterwards. With
//! `sync_barriers` enabled the storage is synced between the steps.

use crate::allocator::{Extent, ExtentAllocator, SpaceAllocator};
use crate::config::ArchiveConfig;
use crate::content::{self, BlobReader};
use crate::error::{BafError, Result};
use crate::header::{Header, HEADER_SIZE};
use crate::health::{HealthReport, Severity};
use crate::io::Storage;
use crate::name::{ArchivePath, ItemName};
use crate::table::{ContentRef, Entry, EntryKind, FileTable, SegmentHeader, TableState, ROOT};
use crate::tree::{Children, DirectoryTree, Walk};
use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::{debug, info, warn};

/// Archive statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchiveStats {
    /// Logical end of the archive in bytes
    pub extent: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub free_ranges: usize,
    pub segments: usize,
    pub directories: usize,
    pub files: usize,
    /// 0.0 when all free space is one range
    pub fragmentation: f64,
}

/// An open archive session
pub struct Archive<S: Storage> {
    storage: S,
    header: Header,
    config: ArchiveConfig,
    allocator: ExtentAllocator,
    table: FileTable,
    tree: DirectoryTree,
}

impl<S: Storage> Archive<S> {
    /// Create an empty archive with default settings
    ///
    /// Anything already in `storage` is discarded.
    pub fn create(storage: S) -> Result<Self> {
        Self::create_with_config(storage, ArchiveConfig::default())
    }

    /// Create an empty archive: header plus one empty segment
    pub fn create_with_config(mut storage: S, config: ArchiveConfig) -> Result<Self> {
        config.validate()?;
        let header = Header::with_version(config.version)?;

        storage.set_len(0)?;
        storage.write_at(0, &header.to_bytes())?;

        let mut allocator =
            ExtentAllocator::rebuild(HEADER_SIZE as u64, [header_span()])?;
        let mut table = FileTable::new();

        let (dirs, files) = config.first_segment_capacities();
        table.append_segment(
            &mut storage,
            &mut allocator,
            SegmentHeader::new(dirs, files),
        )?;

        storage.sync()?;
        table.mark_flushed();

        info!(
            "Created archive: version {}, first segment {} directory / {} file slots",
            header.version, dirs, files
        );

        Ok(Archive {
            storage,
            header,
            config,
            allocator,
            table,
            tree: DirectoryTree::default(),
        })
    }

    /// Open an existing archive with default settings
    pub fn open(storage: S) -> Result<Self> {
        Self::open_with_config(storage, ArchiveConfig::default())
    }

    /// Open an existing archive
    ///
    /// Decodes and validates the header, the segment chain and every live
    /// slot, then rebuilds the tree index and the free space map.
    pub fn open_with_config(mut storage: S, config: ArchiveConfig) -> Result<Self> {
        config.validate()?;

        let extent = storage.len()?;
        if extent < HEADER_SIZE as u64 {
            return Err(BafError::Format(format!(
                "Truncated archive: {} bytes, header needs {}",
                extent, HEADER_SIZE
            )));
        }

        let mut header_bytes = [0u8; HEADER_SIZE];
        storage
            .read_at(0, &mut header_bytes)
            .map_err(|e| BafError::from_decode_io(e, "header"))?;
        let header = Header::from_bytes(&header_bytes)?;

        let table = FileTable::load(&mut storage, HEADER_SIZE as u64, extent)?;
        let tree = DirectoryTree::build(&table)?;
        let allocator = ExtentAllocator::rebuild(
            extent,
            std::iter::once(header_span()).chain(table.occupied_spans()),
        )?;

        for (parent, name) in tree.duplicate_names(&table) {
            warn!("Duplicate name {:?} under parent {}", name.as_str(), parent);
        }
        for orphan in tree.orphans(&table) {
            warn!(
                "Entry {} ({:?}) is unreachable: parent {} is not a live directory",
                orphan.id,
                orphan.name.as_str(),
                orphan.parent
            );
        }
        if allocator.free_bytes() > 0 {
            debug!(
                "{} bytes free in {} ranges",
                allocator.free_bytes(),
                allocator.extent_count()
            );
        }

        info!(
            "Opened archive: version {}, {} bytes, {} segments, {} entries",
            header.version,
            extent,
            table.segments().len(),
            table.len()
        );

        Ok(Archive {
            storage,
            header,
            config,
            allocator,
            table,
            tree,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Has anything been written since the last flush?
    pub fn is_dirty(&self) -> bool {
        self.table.is_dirty()
    }

    pub fn table_state(&self) -> TableState {
        self.table.state()
    }

    /// Look up a live entry
    pub fn entry(&self, id: u64) -> Result<&Entry> {
        self.table
            .get(id)
            .ok_or_else(|| BafError::NotFound(format!("No live entry with id {}", id)))
    }

    /// All live entries in table order
    pub fn entries(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.table.entries().map(|(_, entry)| entry)
    }

    /// Add an empty directory under `parent`
    pub fn add_directory(&mut self, parent: u64, name: &str, modified: u64) -> Result<u64> {
        let name = self.prepare_child(parent, name)?;
        let id = self.insert_entry(Entry::directory(0, parent, name, modified))?;

        debug!("Added directory {} under {}", id, parent);
        Ok(id)
    }

    /// Add a file under `parent`
    pub fn add_file(&mut self, parent: u64, name: &str, data: &[u8], modified: u64) -> Result<u64> {
        let name = self.prepare_child(parent, name)?;

        let blob = content::write_blob(&mut self.storage, &mut self.allocator, data)?;
        self.commit_file(Entry::file(0, parent, name, modified, blob))
    }

    /// Add a file whose content is streamed from `reader`
    ///
    /// Exactly `length` bytes are read.
    pub fn add_file_from_reader<R: Read>(
        &mut self,
        parent: u64,
        name: &str,
        mut reader: R,
        length: u64,
        modified: u64,
    ) -> Result<u64> {
        let name = self.prepare_child(parent, name)?;

        let blob = content::write_blob_from_reader(
            &mut self.storage,
            &mut self.allocator,
            &mut reader,
            length,
        )?;
        self.commit_file(Entry::file(0, parent, name, modified, blob))
    }

    /// Make a file entry live once its content is written
    fn commit_file(&mut self, entry: Entry) -> Result<u64> {
        let blob = entry.content;
        let parent = entry.parent;

        let result = self.barrier().and_then(|()| self.insert_entry(entry));

        match result {
            Ok(id) => {
                debug!(
                    "Added file {} under {} ({} bytes)",
                    id,
                    parent,
                    blob.map_or(0, |b| b.length)
                );
                Ok(id)
            }
            Err(e) => {
                if let Some(blob) = &blob {
                    content::free_blob(&mut self.allocator, blob)?;
                }
                Err(e)
            }
        }
    }

    fn insert_entry(&mut self, entry: Entry) -> Result<u64> {
        let parent = entry.parent;
        let slot = self.table.allocate_slot(
            &mut self.storage,
            &mut self.allocator,
            entry.kind(),
            self.config.segment_capacities(),
        )?;

        let sync = self.config.sync_barriers;
        let id = self
            .table
            .write_entry(&mut self.storage, slot, entry, |storage: &mut S| {
                sync_if(storage, sync)
            })?;

        self.tree.insert(parent, slot);
        Ok(id)
    }

    /// Remove a file or an empty directory
    pub fn remove_entry(&mut self, id: u64) -> Result<()> {
        let entry = self.entry(id)?;
        if entry.is_dir() && self.tree.has_children(id) {
            return Err(BafError::Conflict(format!(
                "Directory {} ({:?}) is not empty",
                id,
                entry.name.as_str()
            )));
        }

        let slot = self
            .table
            .slot_of(id)
            .ok_or_else(|| BafError::NotFound(format!("No live entry with id {}", id)))?;

        let removed = self.table.remove(&mut self.storage, id)?;
        self.tree.remove(removed.parent, slot);

        // Content is released after the sync, and also when the sync fails:
        // the tombstone is already written and free space is never stored.
        let synced = self.barrier();
        if let Some(blob) = &removed.content {
            content::free_blob(&mut self.allocator, blob)?;
        }
        synced?;

        debug!("Removed entry {} ({:?})", id, removed.name.as_str());
        Ok(())
    }

    /// Rename an entry in place
    ///
    /// Id, parent and content are unchanged.
    pub fn rename_entry(&mut self, id: u64, new_name: &str) -> Result<()> {
        let name = ItemName::new(new_name)?;
        let entry = self.entry(id)?;
        if entry.name == name {
            return Ok(());
        }

        let parent = entry.parent;
        self.check_unique_name(parent, &name, Some(id))?;

        self.table.rename(&mut self.storage, id, name)?;

        debug!("Renamed entry {} to {:?}", id, new_name);
        Ok(())
    }

    /// Move an entry under another directory
    pub fn move_entry(&mut self, id: u64, new_parent: u64) -> Result<()> {
        let entry = self.entry(id)?;
        let old_parent = entry.parent;
        let name = entry.name.clone();

        self.check_directory(new_parent)?;

        if DirectoryTree::is_ancestor(&self.table, id, new_parent) {
            return Err(BafError::Conflict(format!(
                "Moving {} under {} would create a cycle",
                id, new_parent
            )));
        }

        self.check_unique_name(new_parent, &name, Some(id))?;

        let slot = self
            .table
            .slot_of(id)
            .ok_or_else(|| BafError::NotFound(format!("No live entry with id {}", id)))?;

        self.table.set_parent(&mut self.storage, id, new_parent)?;
        self.tree.reparent(old_parent, new_parent, slot);

        debug!("Moved entry {} from {} to {}", id, old_parent, new_parent);
        Ok(())
    }

    /// Replace a file's content, keeping its id, parent and name
    ///
    /// The new content is written before the slot is updated; the old
    /// content is released afterwards.
    pub fn replace_file_content(&mut self, id: u64, data: &[u8], modified: u64) -> Result<()> {
        if !self.entry(id)?.is_file() {
            return Err(BafError::Conflict(format!("Entry {} is not a file", id)));
        }

        let blob = content::write_blob(&mut self.storage, &mut self.allocator, data)?;

        let updated = self
            .barrier()
            .and_then(|()| self.table.set_content(&mut self.storage, id, blob, modified));

        let old = match updated {
            Ok(old) => old,
            Err(e) => {
                content::free_blob(&mut self.allocator, &blob)?;
                return Err(e);
            }
        };

        self.barrier()?;
        content::free_blob(&mut self.allocator, &old)?;

        debug!(
            "Replaced content of {}: {} -> {} bytes",
            id,
            old.length,
            blob.length
        );
        Ok(())
    }

    /// Children of a directory (or the root) in table order
    pub fn list_directory(&self, id: u64) -> Result<Children<'_>> {
        self.check_directory(id)?;
        Ok(self.tree.children(&self.table, id))
    }

    /// Read and verify a file's content
    pub fn extract_file(&mut self, id: u64) -> Result<Vec<u8>> {
        let blob = self.file_content(id)?;
        content::read_blob(&mut self.storage, self.allocator.extent(), &blob)
    }

    /// Stream a file's content; the checksum is verified at the end
    pub fn open_file(&mut self, id: u64) -> Result<BlobReader<'_, S>> {
        let blob = self.file_content(id)?;
        BlobReader::new(&mut self.storage, self.allocator.extent(), blob)
    }

    fn file_content(&self, id: u64) -> Result<ContentRef> {
        self.entry(id)?
            .content
            .ok_or_else(|| BafError::NotFound(format!("Entry {} is a directory", id)))
    }

    /// Resolve a `/`-separated path; `/` is [`ROOT`]
    pub fn resolve_path(&self, path: &str) -> Result<u64> {
        let path = ArchivePath::parse(path)?;
        self.tree.resolve(&self.table, &path)
    }

    pub fn path_of(&self, id: u64) -> Result<ArchivePath> {
        self.tree.path_of(&self.table, id)
    }

    /// Create every missing directory along `path` and return the last one
    pub fn create_dir_all(&mut self, path: &str, modified: u64) -> Result<u64> {
        let path = ArchivePath::parse(path)?;
        self.ensure_dirs(&path, modified)
    }

    fn ensure_dirs(&mut self, path: &ArchivePath, modified: u64) -> Result<u64> {
        let mut current = ROOT;

        for component in path.components() {
            let existing = self
                .tree
                .find_child(&self.table, current, component.as_str())
                .map(|entry| (entry.id, entry.is_dir()));

            current = match existing {
                Some((id, true)) => id,
                Some((id, false)) => {
                    return Err(BafError::Conflict(format!(
                        "{}: {:?} is a file (entry {})",
                        path,
                        component.as_str(),
                        id
                    )))
                }
                None => self.add_directory(current, component.as_str(), modified)?,
            };
        }

        Ok(current)
    }

    /// Add a file by path, creating missing parent directories
    pub fn add_file_at(&mut self, path: &str, data: &[u8], modified: u64) -> Result<u64> {
        let path = ArchivePath::parse(path)?;
        let (name, parent_path) = match (path.file_name(), path.parent()) {
            (Some(name), Some(parent)) => (name.clone(), parent),
            _ => {
                return Err(BafError::InvalidName {
                    name: path.to_string(),
                    reason: "path has no file name",
                })
            }
        };

        let parent = self.ensure_dirs(&parent_path, modified)?;
        self.add_file(parent, name.as_str(), data, modified)
    }

    /// Read a file by path
    pub fn extract_path(&mut self, path: &str) -> Result<Vec<u8>> {
        let id = self.resolve_path(path)?;
        self.extract_file(id)
    }

    /// Replace the content of the file at `path`, or add it if missing
    ///
    /// Missing parent directories are created. Returns the file's id.
    pub fn write_file_at(&mut self, path: &str, data: &[u8], modified: u64) -> Result<u64> {
        match self.resolve_path(path) {
            Ok(id) => {
                if self.entry(id).map_or(true, |entry| entry.is_dir()) {
                    return Err(BafError::Conflict(format!("{} is a directory", path)));
                }
                self.replace_file_content(id, data, modified)?;
                Ok(id)
            }
            Err(BafError::NotFound(_)) => self.add_file_at(path, data, modified),
            Err(e) => Err(e),
        }
    }

    /// Remove a directory with everything below it, or a single file
    ///
    /// Entries are removed children first, each one the way
    /// [`remove_entry`](Self::remove_entry) does, so a failure part way
    /// leaves a smaller but well-formed tree.
    pub fn remove_dir_all(&mut self, id: u64) -> Result<()> {
        if self.entry(id)?.is_file() {
            return self.remove_entry(id);
        }

        let mut order = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }

            stack.push((current, true));
            for child in self.tree.children(&self.table, current) {
                if child.is_dir() {
                    stack.push((child.id, false));
                } else {
                    order.push(child.id);
                }
            }
        }

        let count = order.len();
        for entry_id in order {
            self.remove_entry(entry_id)?;
        }

        debug!("Removed directory {} and {} entries below it", id, count - 1);
        Ok(())
    }

    /// Remove the file or directory tree at `path`
    pub fn remove_path(&mut self, path: &str) -> Result<()> {
        let id = self.resolve_path(path)?;
        if id == ROOT {
            return Err(BafError::InvalidName {
                name: path.to_string(),
                reason: "the root cannot be removed",
            });
        }
        self.remove_dir_all(id)
    }

    /// Depth-first walk over everything reachable from the root
    pub fn walk(&self) -> Walk<'_> {
        self.tree.walk(&self.table)
    }

    pub fn stats(&self) -> ArchiveStats {
        let extent = self.allocator.extent();
        let free_bytes = self.allocator.free_bytes();

        ArchiveStats {
            extent,
            used_bytes: extent - free_bytes,
            free_bytes,
            free_ranges: self.allocator.extent_count(),
            segments: self.table.segments().len(),
            directories: self.table.count(EntryKind::Directory),
            files: self.table.count(EntryKind::File),
            fragmentation: self.allocator.fragmentation_score(),
        }
    }

    /// Report duplicate names, unreachable entries and free space
    ///
    /// With `verify_contents`, every file's checksum is verified as well.
    pub fn check(&mut self, verify_contents: bool) -> HealthReport {
        let mut report = HealthReport::new();

        for (parent, name) in self.tree.duplicate_names(&self.table) {
            report.push(
                Severity::Warning,
                (parent != ROOT).then_some(parent),
                format!("Several entries named {:?} in the same directory", name.as_str()),
            );
        }

        for orphan in self.tree.orphans(&self.table) {
            report.push(
                Severity::Warning,
                Some(orphan.id),
                format!("Unreachable: parent {} is not a live directory", orphan.parent),
            );
        }

        if verify_contents {
            let extent = self.allocator.extent();
            for (_, entry) in self.table.entries() {
                let Some(blob) = &entry.content else {
                    continue;
                };

                if let Err(e) = content::verify_blob(&mut self.storage, extent, blob) {
                    report.push(Severity::Error, Some(entry.id), e.to_string());
                }
            }
        }

        if self.allocator.free_bytes() > 0 {
            report.push(
                Severity::Info,
                None,
                format!(
                    "{} bytes free in {} ranges",
                    self.allocator.free_bytes(),
                    self.allocator.extent_count()
                ),
            );
        }

        report
    }

    /// Make every write so far durable
    pub fn flush(&mut self) -> Result<()> {
        self.storage.sync()?;
        self.table.mark_flushed();
        debug!("Flushed archive");
        Ok(())
    }

    /// Flush and end the session, handing back the storage
    pub fn close(mut self) -> Result<S> {
        self.flush()?;
        info!(
            "Closed archive: {} entries, {} bytes",
            self.table.len(),
            self.allocator.extent()
        );
        Ok(self.storage)
    }

    fn barrier(&mut self) -> Result<()> {
        sync_if(&mut self.storage, self.config.sync_barriers)
    }

    /// Check that `id` is the root or a live directory
    fn check_directory(&self, id: u64) -> Result<()> {
        if id == ROOT {
            return Ok(());
        }

        match self.table.get(id) {
            Some(entry) if entry.is_dir() => Ok(()),
            Some(_) => Err(BafError::NotFound(format!("Entry {} is not a directory", id))),
            None => Err(BafError::NotFound(format!("No live directory with id {}", id))),
        }
    }

    fn prepare_child(&self, parent: u64, name: &str) -> Result<ItemName> {
        let name = ItemName::new(name)?;
        self.check_directory(parent)?;
        self.check_unique_name(parent, &name, None)?;
        Ok(name)
    }

    fn check_unique_name(&self, parent: u64, name: &ItemName, except: Option<u64>) -> Result<()> {
        if !self.config.reject_duplicate_names {
            return Ok(());
        }

        let clash = self
            .tree
            .children(&self.table, parent)
            .find(|entry| &entry.name == name && Some(entry.id) != except);

        match clash {
            Some(existing) => Err(BafError::Conflict(format!(
                "{:?} already exists in directory {} (entry {})",
                name.as_str(),
                parent,
                existing.id
            ))),
            None => Ok(()),
        }
    }
}

fn header_span() -> Extent {
    Extent::new(0, HEADER_SIZE as u64)
}

fn sync_if<S: Storage + ?Sized>(storage: &mut S, sync: bool) -> Result<()> {
    if sync {
        storage.sync()?;
    }
    Ok(())
}
