//! Power-of-two buddy allocator.

use crate::error::AllocError;
use crate::lock_list::LockCoupledList;

/// A free block `[start, start + size)`; `size` is always a power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    /// Offset of the block in the arena.
    pub start: u64,
    /// Size of the block.
    pub size: u64,
}

impl Block {
    fn end(&self) -> u64 {
        self.start + self.size
    }

    /// The block this one merges with: flip the size bit of the start.
    fn buddy_start(&self) -> u64 {
        self.start ^ self.size
    }

    fn parent(&self) -> Block {
        Block {
            start: self.start & !self.size,
            size: self.size << 1,
        }
    }
}

/// Thread-safe buddy allocator over a flat power-of-two arena.
///
/// The free list is kept sorted by start offset. Allocation searches for an
/// exact-size block and, failing that, for the next larger level, splitting
/// the found block down and returning the unused upper halves to the list.
/// Freeing merges a block with its buddy for as long as the buddy is free,
/// so releasing every allocation always restores a single block spanning
/// the whole arena.
///
/// # Example
///
/// ```
/// use framewright_core::alloc::BuddyAllocator;
///
/// let buddy = BuddyAllocator::new(1024, 16);
/// let a = buddy.try_allocate(100).unwrap(); // rounds to 128
/// let b = buddy.try_allocate(16).unwrap();
/// assert!(buddy.try_free(a, 100));
/// assert!(buddy.try_free(b, 16));
/// assert_eq!(buddy.free_blocks().len(), 1);
/// ```
#[derive(Debug)]
pub struct BuddyAllocator {
    free: LockCoupledList<Block>,
    capacity: u64,
    min_block: u64,
}

impl BuddyAllocator {
    /// Create a buddy allocator.
    ///
    /// `capacity` is rounded up to a power of two. `min_block` is the
    /// smallest block handed out (and therefore the alignment of every
    /// returned offset).
    pub fn new(capacity: u64, min_block: u64) -> Self {
        let min_block = min_block.max(1).next_power_of_two();
        let capacity = capacity.max(min_block).next_power_of_two();
        let free = LockCoupledList::new();
        free.push_back(Block {
            start: 0,
            size: capacity,
        });
        Self {
            free,
            capacity,
            min_block,
        }
    }

    /// Arena size after rounding.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Smallest block size.
    pub fn min_block(&self) -> u64 {
        self.min_block
    }

    /// Block size a request of `size` occupies, or `None` if it can never fit.
    pub fn block_size(&self, size: u64) -> Option<u64> {
        if size == 0 || size > self.capacity {
            return None;
        }
        Some(size.max(self.min_block).next_power_of_two())
    }

    /// Allocate a block of at least `size`, returning its offset.
    pub fn try_allocate(&self, size: u64) -> Option<u64> {
        let wanted = self.block_size(size)?;

        let mut level = wanted;
        while level <= self.capacity {
            let mut cursor = self.free.cursor();
            while let Some(&block) = cursor.current() {
                if block.size != level {
                    cursor.advance();
                    continue;
                }

                cursor.remove();
                // Split halves go back in ascending order at the removed position.
                let mut half = wanted;
                while half < block.size {
                    cursor.insert(Block {
                        start: block.start + half,
                        size: half,
                    });
                    half <<= 1;
                }
                log::trace!(
                    "buddy: allocated [{}, {}) from level {}",
                    block.start,
                    block.start + wanted,
                    level
                );
                return Some(block.start);
            }
            level <<= 1;
        }
        None
    }

    /// Free a block previously returned for a request of `size`.
    ///
    /// Returns false for ranges outside the arena, misaligned offsets, and
    /// blocks that overlap something already free.
    pub fn try_free(&self, offset: u64, size: u64) -> bool {
        let Some(size) = self.block_size(size) else {
            return false;
        };
        if offset % size != 0 || offset.checked_add(size).map_or(true, |end| end > self.capacity) {
            return false;
        }

        let mut block = Block {
            start: offset,
            size,
        };
        'merge: loop {
            let mut cursor = self.free.cursor();
            loop {
                match cursor.current().copied() {
                    Some(free)
                        if block.size < self.capacity
                            && free.size == block.size
                            && free.start == block.buddy_start() =>
                    {
                        cursor.remove();
                        block = block.parent();
                        continue 'merge;
                    }
                    Some(free) if free.end() <= block.start => {
                        cursor.advance();
                    }
                    Some(free) if free.start < block.end() => {
                        log::warn!(
                            "buddy: rejected free of [{}, {}), overlaps free [{}, {})",
                            block.start,
                            block.end(),
                            free.start,
                            free.end()
                        );
                        return false;
                    }
                    _ => {
                        cursor.insert(block);
                        log::trace!("buddy: freed into [{}, {})", block.start, block.end());
                        return true;
                    }
                }
            }
        }
    }

    /// [`try_allocate`](Self::try_allocate) with an error on exhaustion.
    pub fn allocate(&self, size: u64) -> Result<u64, AllocError> {
        if self.block_size(size).is_none() {
            return Err(AllocError::SizeOutOfRange(size));
        }
        self.try_allocate(size).ok_or(AllocError::OutOfSpace {
            requested: size,
            capacity: self.capacity,
        })
    }

    /// [`try_free`](Self::try_free) with an error on rejection.
    pub fn free(&self, offset: u64, size: u64) -> Result<(), AllocError> {
        if self.try_free(offset, size) {
            Ok(())
        } else {
            Err(AllocError::InvalidFree { offset, size })
        }
    }

    /// Snapshot of the free list, sorted by offset.
    pub fn free_blocks(&self) -> Vec<Block> {
        self.free.snapshot()
    }

    /// Total free bytes.
    pub fn free_size(&self) -> u64 {
        let mut total = 0;
        self.free.for_each(|b| total += b.size);
        total
    }

    /// Reset to a single free block. Must not race with other calls.
    pub fn clear(&self) {
        self.free.clear();
        self.free.push_back(Block {
            start: 0,
            size: self.capacity,
        });
    }
}
