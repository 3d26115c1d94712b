//! Space allocation for the archive's byte address space
//!
//! Nothing about free space is persisted: the allocator is rebuilt on every
//! open by subtracting the occupied spans (header, table segments, live blobs)
//! from the archive's extent.

pub mod extent;

use crate::error::{BafError, Result};
use crate::io::Storage;

pub use extent::{Extent, ExtentAllocator};

/// Byte range allocator trait
pub trait SpaceAllocator {
    /// Allocate `size` contiguous bytes and return their offset
    ///
    /// Grows the logical extent when no free range is large enough.
    fn allocate(&mut self, size: u64) -> Result<u64>;

    /// Return a previously allocated range
    fn free(&mut self, offset: u64, size: u64) -> Result<()>;

    /// Logical end of the archive
    fn extent(&self) -> u64;

    /// Total number of free bytes below the extent
    fn free_bytes(&self) -> u64;

    /// Calculate fragmentation score (0.0 = no fragmentation, higher = more fragmented)
    fn fragmentation_score(&self) -> f64;
}

/// Allocate `size` bytes and grow the storage to cover them
///
/// If the storage refuses to grow, the allocation is undone and
/// `Allocation` is returned.
pub fn reserve<S: Storage + ?Sized>(
    allocator: &mut ExtentAllocator,
    storage: &mut S,
    size: u64,
) -> Result<u64> {
    let old_extent = allocator.extent();
    let offset = allocator.allocate_range(size)?;
    let new_extent = allocator.extent();

    if new_extent > old_extent {
        if let Err(e) = grow_storage(storage, new_extent) {
            allocator.undo_growth(offset, old_extent);
            return Err(BafError::Allocation(format!(
                "Storage cannot grow to {} bytes: {}",
                new_extent, e
            )));
        }
    }

    Ok(offset)
}

fn grow_storage<S: Storage + ?Sized>(storage: &mut S, len: u64) -> std::io::Result<()> {
    if storage.len()? < len {
        storage.set_len(len)?;
    }
    Ok(())
}
