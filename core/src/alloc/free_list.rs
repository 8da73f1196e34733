//! Index free-list allocator.

use parking_lot::{Condvar, Mutex};

use crate::error::AllocError;
use crate::lock_list::LockCoupledList;

/// A run of free indices `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FreeRange {
    /// First free index.
    pub begin: u64,
    /// One past the last free index.
    pub end: u64,
}

impl FreeRange {
    fn len(&self) -> u64 {
        self.end - self.begin
    }
}

/// Thread-safe allocator of indices in `[0, capacity)`.
///
/// Free indices are kept as a sorted list of disjoint, non-adjacent
/// ranges. Allocation always hands out the lowest free index. Freeing
/// coalesces with the neighbouring ranges on both sides, which keeps the
/// list short when slots are returned in roughly allocation order.
///
/// Used for CPU descriptor slots and as the per-class slot allocator of
/// the segregated list.
#[derive(Debug)]
pub struct IndexFreeList {
    ranges: LockCoupledList<FreeRange>,
    capacity: u64,
    generation: Mutex<u64>,
    freed: Condvar,
}

impl IndexFreeList {
    /// Create a free-list with every index in `[0, capacity)` free.
    pub fn new(capacity: u64) -> Self {
        let ranges = LockCoupledList::new();
        if capacity > 0 {
            ranges.push_back(FreeRange {
                begin: 0,
                end: capacity,
            });
        }
        Self {
            ranges,
            capacity,
            generation: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    /// Number of indices managed.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Allocate the lowest free index.
    pub fn try_allocate(&self) -> Option<u64> {
        self.try_allocate_range(1)
    }

    /// Allocate `count` contiguous indices, returning the first.
    ///
    /// First fit: the lowest run long enough is used.
    pub fn try_allocate_range(&self, count: u64) -> Option<u64> {
        if count == 0 {
            return None;
        }
        let mut cursor = self.ranges.cursor();
        loop {
            let range = cursor.current_mut()?;
            if range.len() >= count {
                let index = range.begin;
                range.begin += count;
                if range.begin == range.end {
                    cursor.remove();
                }
                return Some(index);
            }
            cursor.advance();
        }
    }

    /// Block until an index is free, then allocate it.
    pub fn wait_and_allocate(&self) -> u64 {
        loop {
            let seen = *self.generation.lock();
            if let Some(index) = self.try_allocate() {
                return index;
            }
            let mut generation = self.generation.lock();
            while *generation == seen {
                self.freed.wait(&mut generation);
            }
        }
    }

    /// Return a single index.
    pub fn try_free(&self, index: u64) -> bool {
        index
            .checked_add(1)
            .is_some_and(|end| self.try_free_range(index, end))
    }

    /// Return the indices `[begin, end)`.
    ///
    /// Returns false if the range is empty, outside the capacity, or
    /// overlaps indices that are already free.
    pub fn try_free_range(&self, begin: u64, end: u64) -> bool {
        if begin >= end || end > self.capacity {
            return false;
        }

        let mut cursor = self.ranges.cursor();
        loop {
            match cursor.current().copied() {
                Some(range) if range.end < begin => {
                    cursor.advance();
                }
                Some(range) if range.end == begin => {
                    // Touches on the left; the next range may touch on the right.
                    cursor.advance();
                    let next = cursor.current().copied();
                    if next.is_some_and(|n| n.begin < end) {
                        return false;
                    }
                    let merged_end = match next {
                        Some(n) if n.begin == end => {
                            cursor.remove();
                            n.end
                        }
                        _ => end,
                    };
                    if let Some(left) = cursor.prev_mut() {
                        left.end = merged_end;
                    }
                    break;
                }
                Some(range) if range.begin < end => {
                    return false;
                }
                Some(range) if range.begin == end => {
                    if let Some(right) = cursor.current_mut() {
                        right.begin = begin;
                    }
                    break;
                }
                _ => {
                    cursor.insert(FreeRange { begin, end });
                    break;
                }
            }
        }
        drop(cursor);

        self.notify_freed();
        true
    }

    /// [`try_allocate`](Self::try_allocate) with an error on exhaustion.
    pub fn allocate(&self) -> Result<u64, AllocError> {
        self.try_allocate().ok_or(AllocError::OutOfSpace {
            requested: 1,
            capacity: self.capacity,
        })
    }

    /// [`try_free`](Self::try_free) with an error on rejection.
    pub fn free(&self, index: u64) -> Result<(), AllocError> {
        if self.try_free(index) {
            Ok(())
        } else {
            Err(AllocError::InvalidFree {
                offset: index,
                size: 1,
            })
        }
    }

    /// Number of free indices.
    pub fn free_count(&self) -> u64 {
        let mut count = 0;
        self.ranges.for_each(|r| count += r.len());
        count
    }

    /// Snapshot of the free ranges, sorted.
    pub fn free_ranges(&self) -> Vec<FreeRange> {
        self.ranges.snapshot()
    }

    /// Mark every index free again. Must not race with other calls.
    pub fn clear(&self) {
        self.ranges.clear();
        if self.capacity > 0 {
            self.ranges.push_back(FreeRange {
                begin: 0,
                end: self.capacity,
            });
        }
        self.notify_freed();
    }

    fn notify_freed(&self) {
        *self.generation.lock() += 1;
        self.freed.notify_all();
    }
}
