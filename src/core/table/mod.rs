//! File table manager
//!
//! The table is a linked list of segments starting right after the header.
//! Every segment holds a fixed number of directory slots followed by a fixed
//! number of file slots. A slot with id 0 is free (a tombstone once it has
//! been used).
//!
//! All slot writes go straight to storage. The in-memory view is only
//! updated once the write succeeded, so a failed call leaves it untouched.

pub mod entry;
pub mod segment;

pub use entry::{ContentRef, Entry, EntryKind, ROOT};
pub use segment::{segment_size, Segment, SegmentHeader, SEGMENT_HEADER_SIZE};

use crate::allocator::{self, Extent, ExtentAllocator, SpaceAllocator};
use crate::content;
use crate::error::{BafError, Result};
use crate::header::HEADER_SIZE;
use crate::io::Storage;
use crate::name::ItemName;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Position of a slot in table order
///
/// Ordering follows the segment chain, then directory slots before file
/// slots, then slot index. This is the order duplicate names are resolved in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotRef {
    /// Index of the segment in chain order
    pub segment: usize,
    pub kind: EntryKind,
    pub index: u32,
}

/// Table access state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    /// In sync with the last flush (or open)
    Loaded,
    /// Mutated since the last flush
    Dirty,
}

#[derive(Debug, Clone)]
pub struct FileTable {
    segments: Vec<Segment>,
    entries: BTreeMap<SlotRef, Entry>,
    by_id: HashMap<u64, SlotRef>,
    free_dirs: BTreeSet<SlotRef>,
    free_files: BTreeSet<SlotRef>,
    /// `None` once every id has been issued
    next_id: Option<u64>,
    state: TableState,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    /// Table without any segment
    pub fn new() -> Self {
        FileTable {
            segments: Vec::new(),
            entries: BTreeMap::new(),
            by_id: HashMap::new(),
            free_dirs: BTreeSet::new(),
            free_files: BTreeSet::new(),
            next_id: Some(1),
            state: TableState::Loaded,
        }
    }

    /// Decode the segment chain starting at `start`
    ///
    /// Every segment and every live blob must lie inside `extent`. The chain
    /// must not revisit a segment and live ids must be unique.
    pub fn load<S: Storage + ?Sized>(storage: &mut S, start: u64, extent: u64) -> Result<Self> {
        let mut table = FileTable::new();
        let mut visited = HashSet::new();
        let mut address = start;

        loop {
            if address < HEADER_SIZE as u64 || address >= extent {
                return Err(BafError::Format(format!(
                    "Segment address {} outside archive extent {}..{}",
                    address, HEADER_SIZE, extent
                )));
            }

            if !visited.insert(address) {
                return Err(BafError::Format(format!(
                    "Segment chain revisits address {}",
                    address
                )));
            }

            let segment = table.decode_segment(storage, address, extent)?;
            let next = segment.header.next;
            table.segments.push(segment);

            if next == 0 {
                break;
            }
            address = next;
        }

        let max_id = table.by_id.keys().copied().max().unwrap_or(0);
        table.next_id = max_id.checked_add(1);

        debug!(
            "Loaded file table: {} segments, {} entries, next id {:?}",
            table.segments.len(),
            table.entries.len(),
            table.next_id
        );

        Ok(table)
    }

    fn decode_segment<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        address: u64,
        extent: u64,
    ) -> Result<Segment> {
        let mut header_bytes = [0u8; SEGMENT_HEADER_SIZE];
        storage
            .read_at(address, &mut header_bytes)
            .map_err(|e| BafError::from_decode_io(e, "segment header"))?;
        let header = SegmentHeader::from_bytes(&header_bytes)?;

        let size = header
            .segment_size()
            .filter(|&size| address.checked_add(size).is_some_and(|end| end <= extent))
            .ok_or_else(|| {
                BafError::Format(format!(
                    "Segment at {} ({} directory, {} file slots) exceeds archive extent {}",
                    address, header.dir_capacity, header.file_capacity, extent
                ))
            })?;

        let len = usize::try_from(size)
            .map_err(|_| BafError::Format(format!("Segment at {} too large", address)))?;
        let mut bytes = vec![0u8; len];
        storage
            .read_at(address, &mut bytes)
            .map_err(|e| BafError::from_decode_io(e, "segment"))?;

        let segment = Segment { address, header };
        let segment_index = self.segments.len();

        for kind in [EntryKind::Directory, EntryKind::File] {
            for index in 0..header.capacity(kind) {
                let offset = header.slot_offset(kind, index) as usize;
                let slot_bytes = &bytes[offset..offset + kind.slot_size()];
                let slot = SlotRef {
                    segment: segment_index,
                    kind,
                    index,
                };

                match Entry::from_slot_bytes(kind, slot_bytes)? {
                    Some(entry) => {
                        if let Some(blob) = &entry.content {
                            content::check_bounds(blob, extent)?;
                        }
                        if self.by_id.contains_key(&entry.id) {
                            return Err(BafError::Format(format!(
                                "Duplicate entry id {}",
                                entry.id
                            )));
                        }
                        self.by_id.insert(entry.id, slot);
                        self.entries.insert(slot, entry);
                    }
                    None => {
                        self.free_set_mut(kind).insert(slot);
                    }
                }
            }
        }

        Ok(segment)
    }

    pub fn state(&self) -> TableState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.state == TableState::Dirty
    }

    /// Everything written so far is durable
    pub fn mark_flushed(&mut self) {
        self.state = TableState::Loaded;
    }

    fn mark_dirty(&mut self) {
        self.state = TableState::Dirty;
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn get(&self, id: u64) -> Option<&Entry> {
        self.by_id.get(&id).and_then(|slot| self.entries.get(slot))
    }

    pub fn slot_of(&self, id: u64) -> Option<SlotRef> {
        self.by_id.get(&id).copied()
    }

    pub fn entry_at(&self, slot: SlotRef) -> Option<&Entry> {
        self.entries.get(&slot)
    }

    /// Live entries in table order
    pub fn entries(&self) -> impl Iterator<Item = (SlotRef, &Entry)> + '_ {
        self.entries.iter().map(|(slot, entry)| (*slot, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of live entries of one kind
    pub fn count(&self, kind: EntryKind) -> usize {
        self.entries.keys().filter(|slot| slot.kind == kind).count()
    }

    /// Id the next added entry will get, `None` if the id space is used up
    pub fn peek_next_id(&self) -> Option<u64> {
        self.next_id
    }

    fn free_set_mut(&mut self, kind: EntryKind) -> &mut BTreeSet<SlotRef> {
        match kind {
            EntryKind::Directory => &mut self.free_dirs,
            EntryKind::File => &mut self.free_files,
        }
    }

    fn free_set(&self, kind: EntryKind) -> &BTreeSet<SlotRef> {
        match kind {
            EntryKind::Directory => &self.free_dirs,
            EntryKind::File => &self.free_files,
        }
    }

    /// Lowest free slot of a kind in table order
    pub fn first_free_slot(&self, kind: EntryKind) -> Option<SlotRef> {
        self.free_set(kind).iter().next().copied()
    }

    pub fn free_slot_count(&self, kind: EntryKind) -> usize {
        self.free_set(kind).len()
    }

    /// Absolute address of a slot
    pub fn slot_address(&self, slot: SlotRef) -> Result<u64> {
        let segment = self.segments.get(slot.segment).ok_or_else(|| {
            BafError::NotFound(format!("Segment {} not loaded", slot.segment))
        })?;
        Ok(segment.slot_address(slot.kind, slot.index))
    }

    /// Find a free slot of `kind`, appending a segment when none is left
    ///
    /// New segments get `capacities` (directory, file). Space comes from the
    /// allocator; the segment is written zeroed before the previous tail is
    /// linked to it.
    pub fn allocate_slot<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        allocator: &mut ExtentAllocator,
        kind: EntryKind,
        capacities: (u32, u32),
    ) -> Result<SlotRef> {
        if let Some(slot) = self.first_free_slot(kind) {
            return Ok(slot);
        }

        let (dirs, files) = capacities;
        let header = SegmentHeader::new(dirs, files);
        if header.capacity(kind) == 0 {
            return Err(BafError::Config(format!(
                "New segments have no {:?} slots",
                kind
            )));
        }

        let segment_index = self.append_segment(storage, allocator, header)?;

        self.first_free_slot(kind)
            .filter(|slot| slot.segment == segment_index)
            .ok_or_else(|| BafError::Allocation("New segment has no free slot".to_string()))
    }

    /// Write a new, empty segment and link it at the end of the chain
    ///
    /// Returns the index of the new segment.
    pub fn append_segment<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        allocator: &mut ExtentAllocator,
        header: SegmentHeader,
    ) -> Result<usize> {
        let bytes = Segment::empty_bytes(&header)?;
        let size = bytes.len() as u64;
        let address = allocator::reserve(allocator, storage, size)?;

        let linked = storage.write_at(address, &bytes).and_then(|()| {
            match self.segments.last() {
                Some(tail) => storage.write_at(tail.address, &address.to_le_bytes()),
                None => Ok(()),
            }
        });

        if let Err(e) = linked {
            allocator.free(address, size)?;
            return Err(e.into());
        }

        if let Some(tail) = self.segments.last_mut() {
            tail.header.next = address;
        }

        let segment_index = self.segments.len();
        self.segments.push(Segment { address, header });

        for kind in [EntryKind::Directory, EntryKind::File] {
            for index in 0..header.capacity(kind) {
                self.free_set_mut(kind).insert(SlotRef {
                    segment: segment_index,
                    kind,
                    index,
                });
            }
        }

        self.mark_dirty();

        debug!(
            "Appended segment {} at {} ({} directory, {} file slots)",
            segment_index, address, header.dir_capacity, header.file_capacity
        );

        Ok(segment_index)
    }

    /// Write an entry into a free slot and make it live
    ///
    /// The slot body is written first and the id last. `barrier` runs between
    /// the two writes. A fresh id is issued and returned.
    pub fn write_entry<S, F>(
        &mut self,
        storage: &mut S,
        slot: SlotRef,
        mut entry: Entry,
        barrier: F,
    ) -> Result<u64>
    where
        S: Storage + ?Sized,
        F: FnOnce(&mut S) -> Result<()>,
    {
        if entry.kind() != slot.kind {
            return Err(BafError::Conflict(format!(
                "{:?} entry cannot go into a {:?} slot",
                entry.kind(),
                slot.kind
            )));
        }

        if !self.free_set(slot.kind).contains(&slot) {
            return Err(BafError::Conflict(format!("Slot {:?} is not free", slot)));
        }

        let address = self.slot_address(slot)?;
        let id = self
            .next_id
            .ok_or_else(|| BafError::Allocation("Entry id space exhausted".to_string()))?;
        entry.id = id;

        let bytes = entry.to_slot_bytes();
        storage.write_at(address + 8, &bytes[8..])?;
        barrier(storage)?;
        storage.write_at(address, &bytes[..8])?;

        self.next_id = id.checked_add(1);
        self.free_set_mut(slot.kind).remove(&slot);
        self.by_id.insert(id, slot);
        self.entries.insert(slot, entry);
        self.mark_dirty();

        Ok(id)
    }

    /// Tombstone an entry by zeroing its id field
    ///
    /// The rest of the slot is left as is. Content is not freed here.
    pub fn remove<S: Storage + ?Sized>(&mut self, storage: &mut S, id: u64) -> Result<Entry> {
        let slot = self.live_slot(id)?;
        let address = self.slot_address(slot)?;

        storage.write_at(address, &0u64.to_le_bytes())?;

        self.by_id.remove(&id);
        let entry = self
            .entries
            .remove(&slot)
            .ok_or_else(|| BafError::NotFound(format!("Entry {}", id)))?;
        self.free_set_mut(slot.kind).insert(slot);
        self.mark_dirty();

        Ok(entry)
    }

    /// Rewrite the name field in place
    pub fn rename<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        id: u64,
        name: ItemName,
    ) -> Result<()> {
        let slot = self.live_slot(id)?;
        let address = self.slot_address(slot)?;

        let mut field = [0u8; ItemName::FIELD_SIZE];
        name.encode(&mut field);
        storage.write_at(address + entry::NAME_RANGE.start as u64, &field)?;

        if let Some(entry) = self.entries.get_mut(&slot) {
            entry.name = name;
        }
        self.mark_dirty();

        Ok(())
    }

    /// Rewrite the parent field in place
    pub fn set_parent<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        id: u64,
        parent: u64,
    ) -> Result<()> {
        let slot = self.live_slot(id)?;
        let address = self.slot_address(slot)?;

        storage.write_at(
            address + entry::PARENT_RANGE.start as u64,
            &parent.to_le_bytes(),
        )?;

        if let Some(entry) = self.entries.get_mut(&slot) {
            entry.parent = parent;
        }
        self.mark_dirty();

        Ok(())
    }

    /// Rewrite modification time and content fields of a file in one write
    ///
    /// Returns the previous content.
    pub fn set_content<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        id: u64,
        content: ContentRef,
        modified: u64,
    ) -> Result<ContentRef> {
        let slot = self.live_slot(id)?;
        if slot.kind != EntryKind::File {
            return Err(BafError::Conflict(format!("Entry {} is not a file", id)));
        }
        let address = self.slot_address(slot)?;

        let mut bytes = [0u8; entry::CHECKSUM_RANGE.end - entry::MTIME_RANGE.start];
        bytes[0..8].copy_from_slice(&modified.to_le_bytes());
        bytes[8..16].copy_from_slice(&content.address.to_le_bytes());
        bytes[16..24].copy_from_slice(&content.length.to_le_bytes());
        bytes[24..56].copy_from_slice(&content.checksum);
        storage.write_at(address + entry::MTIME_RANGE.start as u64, &bytes)?;

        let entry = self
            .entries
            .get_mut(&slot)
            .ok_or_else(|| BafError::NotFound(format!("Entry {}", id)))?;
        let old = entry.content.replace(content);
        entry.modified = modified;
        self.mark_dirty();

        old.ok_or_else(|| BafError::Conflict(format!("Entry {} is not a file", id)))
    }

    fn live_slot(&self, id: u64) -> Result<SlotRef> {
        self.slot_of(id)
            .ok_or_else(|| BafError::NotFound(format!("No live entry with id {}", id)))
    }

    /// Byte spans taken by segments and live blobs
    pub fn occupied_spans(&self) -> impl Iterator<Item = Extent> + '_ {
        let segments = self
            .segments
            .iter()
            .map(|segment| Extent::new(segment.address, segment.size()));

        let blobs = self
            .entries
            .values()
            .filter_map(|entry| entry.content)
            .filter(|content| content.length > 0)
            .map(|content| Extent::new(content.address, content.length));

        segments.chain(blobs)
    }
}
