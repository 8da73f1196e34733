//! Segregated free-list allocator.

use crate::error::AllocError;

use super::free_list::IndexFreeList;

/// A block handed out by [`SegregatedListAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegregatedBlock {
    /// Size class the block came from. Each class is a separate arena, so
    /// callers use this to pick the backing heap.
    pub class_index: usize,
    /// Offset inside the class arena.
    pub offset: u64,
    /// Size of the class (always >= the requested size).
    pub size: u64,
}

/// Size-class partitioned allocator.
///
/// Classes are log2-spaced from `min_block` to `max_block`. Class `i`
/// holds blocks of `min_block << i` bytes in its own arena of
/// `arena_size` bytes, tracked by an [`IndexFreeList`] of
/// `arena_size / class_size` slots. A request is rounded up to its class
/// and placed at `slot * class_size`.
#[derive(Debug)]
pub struct SegregatedListAllocator {
    classes: Vec<IndexFreeList>,
    arena_size: u64,
    min_block: u64,
    max_block: u64,
}

impl SegregatedListAllocator {
    /// Create an allocator with one arena of `arena_size` bytes per class.
    pub fn new(arena_size: u64, min_block: u64, max_block: u64) -> Self {
        let min_block = min_block.max(1).next_power_of_two();
        let max_block = max_block.max(min_block).next_power_of_two();
        let class_count = (max_block.trailing_zeros() - min_block.trailing_zeros()) as usize + 1;
        let classes = (0..class_count)
            .map(|i| IndexFreeList::new(arena_size / (min_block << i)))
            .collect();
        Self {
            classes,
            arena_size,
            min_block,
            max_block,
        }
    }

    /// Number of size classes.
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Block size of class `index`.
    pub fn class_size(&self, index: usize) -> u64 {
        self.min_block << index
    }

    /// Bytes per class arena.
    pub fn arena_size(&self) -> u64 {
        self.arena_size
    }

    /// Class a request of `size` falls in.
    ///
    /// Sizes below the minimum use class 0; zero and sizes above the
    /// maximum have no class.
    pub fn class_index(&self, size: u64) -> Option<usize> {
        if size == 0 || size > self.max_block {
            return None;
        }
        let rounded = size.max(self.min_block).next_power_of_two();
        Some((rounded.trailing_zeros() - self.min_block.trailing_zeros()) as usize)
    }

    /// Allocate a block for `size` bytes.
    pub fn try_allocate(&self, size: u64) -> Option<SegregatedBlock> {
        let class_index = self.class_index(size)?;
        let slot = self.classes[class_index].try_allocate()?;
        Some(self.block(class_index, slot))
    }

    /// Block until the class for `size` has a free slot.
    ///
    /// Returns `None` only when `size` has no class.
    pub fn wait_and_allocate(&self, size: u64) -> Option<SegregatedBlock> {
        let class_index = self.class_index(size)?;
        let slot = self.classes[class_index].wait_and_allocate();
        Some(self.block(class_index, slot))
    }

    /// Free a block previously returned for a request of `size`.
    pub fn try_free(&self, offset: u64, size: u64) -> bool {
        let Some(class_index) = self.class_index(size) else {
            return false;
        };
        let class_size = self.class_size(class_index);
        if offset % class_size != 0 {
            return false;
        }
        self.classes[class_index].try_free(offset / class_size)
    }

    /// [`try_allocate`](Self::try_allocate) with an error describing the failure.
    pub fn allocate(&self, size: u64) -> Result<SegregatedBlock, AllocError> {
        let class_index = self
            .class_index(size)
            .ok_or(AllocError::SizeOutOfRange(size))?;
        self.try_allocate(size).ok_or(AllocError::OutOfSpace {
            requested: size,
            capacity: self.classes[class_index].capacity() * self.class_size(class_index),
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

    /// Free slots left in class `index`.
    pub fn free_slots(&self, index: usize) -> u64 {
        self.classes[index].free_count()
    }

    /// Reset every class. Must not race with other calls.
    pub fn clear(&self) {
        for class in &self.classes {
            class.clear();
        }
    }

    fn block(&self, class_index: usize, slot: u64) -> SegregatedBlock {
        let size = self.class_size(class_index);
        log::trace!("seg-list: class {class_index} slot {slot} ({size} bytes)");
        SegregatedBlock {
            class_index,
            offset: slot * size,
            size,
        }
    }
}
