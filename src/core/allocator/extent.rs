//! First-fit extent allocator over byte offsets
//!
//! Free ranges are kept in a B-tree keyed by start offset, so first-fit is a
//! scan in ascending offset order and coalescing only has to look at the two
//! neighbours of a freed range.

use crate::allocator::SpaceAllocator;
use crate::error::{BafError, Result};
use std::collections::BTreeMap;

/// A contiguous byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Extent {
    /// Starting offset
    pub start: u64,
    /// Number of bytes
    pub length: u64,
}

impl Extent {
    pub fn new(start: u64, length: u64) -> Self {
        Extent { start, length }
    }

    /// One past the last byte, `None` on overflow
    pub fn end(&self) -> Option<u64> {
        self.start.checked_add(self.length)
    }

    /// Check if this extent contains an offset
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset - self.start < self.length
    }

    /// Check if this extent is adjacent to another (can be coalesced)
    pub fn is_adjacent(&self, other: &Extent) -> bool {
        self.end() == Some(other.start) || other.end() == Some(self.start)
    }

    /// Coalesce two adjacent extents
    pub fn coalesce(&self, other: &Extent) -> Option<Extent> {
        if !self.is_adjacent(other) {
            return None;
        }

        let new_start = self.start.min(other.start);

        Some(Extent {
            start: new_start,
            length: self.length + other.length,
        })
    }
}

/// Byte-granular allocator
#[derive(Debug, Clone)]
pub struct ExtentAllocator {
    /// Free extents indexed by start offset
    free_extents: BTreeMap<u64, Extent>,

    /// Logical end of the address space
    extent: u64,

    /// Number of free bytes below `extent`
    free_bytes: u64,
}

impl ExtentAllocator {
    /// Create an allocator where everything below `extent` is free
    pub fn new(extent: u64) -> Self {
        let mut free_extents = BTreeMap::new();

        if extent > 0 {
            free_extents.insert(0, Extent::new(0, extent));
        }

        ExtentAllocator {
            free_extents,
            extent,
            free_bytes: extent,
        }
    }

    /// Rebuild the free set from the spans currently in use
    ///
    /// Everything below `extent` not covered by an occupied span is free.
    /// Occupied spans must lie inside the extent and must not overlap.
    pub fn rebuild<I>(extent: u64, occupied: I) -> Result<Self>
    where
        I: IntoIterator<Item = Extent>,
    {
        let mut occupied: Vec<Extent> = occupied.into_iter().filter(|e| e.length > 0).collect();
        occupied.sort_unstable();

        let mut allocator = ExtentAllocator {
            free_extents: BTreeMap::new(),
            extent,
            free_bytes: 0,
        };

        let mut cursor = 0u64;

        for span in occupied {
            let end = span
                .end()
                .filter(|&end| end <= extent)
                .ok_or_else(|| {
                    BafError::Format(format!(
                        "Span {}..+{} lies outside the archive extent ({} bytes)",
                        span.start, span.length, extent
                    ))
                })?;

            if span.start < cursor {
                return Err(BafError::Format(format!(
                    "Span {}..{} overlaps another occupied span ending at {}",
                    span.start, end, cursor
                )));
            }

            if span.start > cursor {
                allocator.push_free(Extent::new(cursor, span.start - cursor));
            }

            cursor = end;
        }

        if cursor < extent {
            allocator.push_free(Extent::new(cursor, extent - cursor));
        }

        Ok(allocator)
    }

    fn push_free(&mut self, extent: Extent) {
        self.free_bytes += extent.length;
        self.free_extents.insert(extent.start, extent);
    }

    /// Allocate using first-fit, lowest offset first
    ///
    /// Zero-sized requests occupy nothing and always return offset 0.
    pub fn allocate_range(&mut self, size: u64) -> Result<u64> {
        if size == 0 {
            return Ok(0);
        }

        let first_fit = self
            .free_extents
            .values()
            .find(|extent| extent.length >= size)
            .copied();

        if let Some(extent) = first_fit {
            self.free_extents.remove(&extent.start);

            let remaining_length = extent.length - size;
            if remaining_length > 0 {
                let remaining_start = extent.start + size;
                self.free_extents.insert(
                    remaining_start,
                    Extent::new(remaining_start, remaining_length),
                );
            }

            self.free_bytes -= size;
            return Ok(extent.start);
        }

        // Nothing fits: grow, reusing a free range that touches the end
        let tail = self
            .free_extents
            .values()
            .next_back()
            .copied()
            .filter(|last| last.end() == Some(self.extent));

        let start = match tail {
            Some(last) => {
                self.free_extents.remove(&last.start);
                self.free_bytes -= last.length;
                last.start
            }
            None => self.extent,
        };

        let new_extent = start.checked_add(size).ok_or_else(|| {
            BafError::Allocation(format!(
                "Cannot grow archive by {} bytes past offset {}",
                size, start
            ))
        })?;

        tracing::debug!(
            "Growing archive extent: {} -> {} bytes",
            self.extent,
            new_extent
        );

        self.extent = new_extent;

        Ok(start)
    }

    /// Revert the growth done by an `allocate_range` that returned `start`
    pub(crate) fn undo_growth(&mut self, start: u64, old_extent: u64) {
        self.extent = old_extent;

        if start < old_extent {
            self.push_free(Extent::new(start, old_extent - start));
        }
    }

    /// Free a range, coalescing with adjacent free ranges
    pub fn free_range(&mut self, offset: u64, size: u64) -> Result<()> {
        if size == 0 {
            return Ok(());
        }

        let freed = Extent::new(offset, size);
        let end = freed
            .end()
            .filter(|&end| end <= self.extent)
            .ok_or_else(|| {
                BafError::Allocation(format!(
                    "Cannot free {}..+{}: beyond archive extent ({} bytes)",
                    offset, size, self.extent
                ))
            })?;

        // Reject ranges that are already (partially) free
        let overlaps_prev = self
            .free_extents
            .range(..=offset)
            .next_back()
            .is_some_and(|(_, prev)| prev.end().is_some_and(|prev_end| prev_end > offset));
        let overlaps_next = self
            .free_extents
            .range(offset..end)
            .next()
            .is_some();

        if overlaps_prev || overlaps_next {
            return Err(BafError::Allocation(format!(
                "Range {}..{} is already free",
                offset, end
            )));
        }

        self.insert_and_coalesce(freed);
        self.free_bytes += size;

        Ok(())
    }

    /// Insert a free extent and coalesce with adjacent extents
    fn insert_and_coalesce(&mut self, mut extent: Extent) {
        let mut to_remove = Vec::new();

        if let Some((&prev_start, &prev_extent)) =
            self.free_extents.range(..extent.start).next_back()
        {
            if let Some(merged) = prev_extent.coalesce(&extent) {
                extent = merged;
                to_remove.push(prev_start);
            }
        }

        if let Some(end) = extent.end() {
            if let Some((&next_start, &next_extent)) = self.free_extents.range(end..).next() {
                if let Some(merged) = extent.coalesce(&next_extent) {
                    extent = merged;
                    to_remove.push(next_start);
                }
            }
        }

        for key in to_remove {
            self.free_extents.remove(&key);
        }

        self.free_extents.insert(extent.start, extent);
    }

    /// Check if a specific offset is inside an allocated range
    pub fn is_allocated(&self, offset: u64) -> bool {
        if offset >= self.extent {
            return false;
        }

        !self
            .free_extents
            .range(..=offset)
            .next_back()
            .is_some_and(|(_, extent)| extent.contains(offset))
    }

    /// Free ranges in ascending offset order
    pub fn free_extents(&self) -> impl Iterator<Item = Extent> + '_ {
        self.free_extents.values().copied()
    }

    /// Get current number of free extents (fragmentation indicator)
    pub fn extent_count(&self) -> usize {
        self.free_extents.len()
    }
}

impl SpaceAllocator for ExtentAllocator {
    fn allocate(&mut self, size: u64) -> Result<u64> {
        self.allocate_range(size)
    }

    fn free(&mut self, offset: u64, size: u64) -> Result<()> {
        self.free_range(offset, size)
    }

    fn extent(&self) -> u64 {
        self.extent
    }

    fn free_bytes(&self) -> u64 {
        self.free_bytes
    }

    fn fragmentation_score(&self) -> f64 {
        if self.free_bytes == 0 {
            return 0.0;
        }

        let extent_count = self.free_extents.len();

        if extent_count == 0 {
            return 0.0;
        }

        // 1 extent = 0.0, every free byte isolated = 1.0
        (extent_count as f64 - 1.0) / (self.free_bytes as f64).max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_contains() {
        let extent = Extent::new(10, 20);
        assert!(!extent.contains(9));
        assert!(extent.contains(10));
        assert!(extent.contains(29));
        assert!(!extent.contains(30));
    }

    #[test]
    fn test_extent_coalesce() {
        let e1 = Extent::new(10, 10);
        let e2 = Extent::new(20, 10);
        let e3 = Extent::new(40, 10);

        assert_eq!(e1.coalesce(&e2), Some(Extent::new(10, 20)));
        assert_eq!(e2.coalesce(&e1), Some(Extent::new(10, 20)));
        assert_eq!(e1.coalesce(&e3), None);
    }

    #[test]
    fn test_allocate_appends_when_empty() {
        let mut alloc = ExtentAllocator::rebuild(100, [Extent::new(0, 100)]).unwrap();
        assert_eq!(alloc.free_bytes(), 0);

        assert_eq!(alloc.allocate(50).unwrap(), 100);
        assert_eq!(alloc.extent(), 150);
        assert_eq!(alloc.allocate(10).unwrap(), 150);
        assert_eq!(alloc.extent(), 160);
    }

    #[test]
    fn test_first_fit_prefers_lowest_offset() {
        let mut alloc = ExtentAllocator::rebuild(
            1000,
            [Extent::new(0, 100), Extent::new(300, 100), Extent::new(450, 550)],
        )
        .unwrap();
        // Free: 100..300 (200 bytes), 400..450 (50 bytes)

        // Both gaps fit 40 bytes: the lowest one wins even though 400..450 fits tighter
        assert_eq!(alloc.allocate(40).unwrap(), 100);
        assert_eq!(alloc.allocate(160).unwrap(), 140);
        assert_eq!(alloc.allocate(50).unwrap(), 400);
        assert_eq!(alloc.free_bytes(), 0);
        assert_eq!(alloc.extent(), 1000);
    }

    #[test]
    fn test_free_and_coalesce() {
        let mut alloc = ExtentAllocator::rebuild(0, []).unwrap();

        let a = alloc.allocate(100).unwrap();
        let b = alloc.allocate(100).unwrap();
        let c = alloc.allocate(100).unwrap();
        let _d = alloc.allocate(100).unwrap();
        assert_eq!((a, b, c), (0, 100, 200));

        alloc.free(b, 100).unwrap();
        assert_eq!(alloc.extent_count(), 1);

        alloc.free(a, 100).unwrap();
        assert_eq!(alloc.extent_count(), 1);

        alloc.free(c, 100).unwrap();
        assert_eq!(alloc.extent_count(), 1);
        assert_eq!(alloc.free_extents().next(), Some(Extent::new(0, 300)));
        assert_eq!(alloc.free_bytes(), 300);
    }

    #[test]
    fn test_tail_free_range_is_reused_when_growing() {
        let mut alloc = ExtentAllocator::rebuild(100, [Extent::new(0, 60)]).unwrap();
        // Free: 60..100

        assert_eq!(alloc.allocate(70).unwrap(), 60);
        assert_eq!(alloc.extent(), 130);
        assert_eq!(alloc.free_bytes(), 0);
    }

    #[test]
    fn test_double_free_rejected() {
        let mut alloc = ExtentAllocator::new(0);
        let offset = alloc.allocate(64).unwrap();
        alloc.free(offset, 64).unwrap();

        assert!(matches!(
            alloc.free(offset, 64),
            Err(BafError::Allocation(_))
        ));
        assert!(matches!(
            alloc.free(offset + 10, 4),
            Err(BafError::Allocation(_))
        ));
    }

    #[test]
    fn test_free_beyond_extent_rejected() {
        let mut alloc = ExtentAllocator::new(10);
        assert!(alloc.free(5, 10).is_err());
        assert!(alloc.free(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_zero_sized_requests() {
        let mut alloc = ExtentAllocator::new(0);
        assert_eq!(alloc.allocate(0).unwrap(), 0);
        assert_eq!(alloc.extent(), 0);
        alloc.free(0, 0).unwrap();
    }

    #[test]
    fn test_rebuild_detects_overlap() {
        let result = ExtentAllocator::rebuild(100, [Extent::new(0, 50), Extent::new(40, 20)]);
        assert!(matches!(result, Err(BafError::Format(_))));
    }

    #[test]
    fn test_rebuild_detects_out_of_bounds() {
        let result = ExtentAllocator::rebuild(100, [Extent::new(90, 20)]);
        assert!(matches!(result, Err(BafError::Format(_))));

        let result = ExtentAllocator::rebuild(100, [Extent::new(u64::MAX, 2)]);
        assert!(matches!(result, Err(BafError::Format(_))));
    }

    #[test]
    fn test_rebuild_gaps_become_free() {
        let alloc =
            ExtentAllocator::rebuild(100, [Extent::new(10, 10), Extent::new(50, 10)]).unwrap();

        let free: Vec<_> = alloc.free_extents().collect();
        assert_eq!(
            free,
            vec![Extent::new(0, 10), Extent::new(20, 30), Extent::new(60, 40)]
        );
        assert_eq!(alloc.free_bytes(), 80);
        assert!(alloc.is_allocated(15));
        assert!(!alloc.is_allocated(25));
        assert!(!alloc.is_allocated(100));
    }

    #[test]
    fn test_allocation_overflow() {
        let mut alloc = ExtentAllocator::new(u64::MAX - 10);
        let _ = alloc.allocate(u64::MAX - 10).unwrap();
        assert!(matches!(
            alloc.allocate(100),
            Err(BafError::Allocation(_))
        ));
    }

    #[test]
    fn test_fragmentation_score() {
        let mut alloc = ExtentAllocator::new(0);
        let score_empty = alloc.fragmentation_score();

        let a = alloc.allocate(100).unwrap();
        let _b = alloc.allocate(100).unwrap();
        let c = alloc.allocate(100).unwrap();
        let _d = alloc.allocate(100).unwrap();

        alloc.free(a, 100).unwrap();
        alloc.free(c, 100).unwrap();

        assert!(alloc.fragmentation_score() > score_empty);
    }
}
