//! Ring allocators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::AllocError;

/// Lock-free ring over `[0, capacity)`.
///
/// `tail` is where the next allocation starts, `head` is the oldest byte
/// still in use. Allocation bumps `tail`, freeing bumps `head`, both with
/// compare-and-swap. One unit of capacity is never handed out so that
/// `head == tail` always means empty.
///
/// Offsets are modular: an allocation that runs past the end continues at
/// zero. Frees must be issued in allocation order.
#[derive(Debug)]
pub struct RingAllocator {
    head: AtomicU64,
    tail: AtomicU64,
    capacity: u64,
}

impl RingAllocator {
    /// Create an empty ring. A capacity below 2 is raised to 2.
    pub fn new(capacity: u64) -> Self {
        Self {
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            capacity: capacity.max(2),
        }
    }

    /// Total size of the ring, including the reserved unit.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Space that can be allocated between `head` and `tail`.
    pub fn available_between(&self, head: u64, tail: u64) -> u64 {
        if tail >= head {
            self.capacity - (tail - head) - 1
        } else {
            head - tail - 1
        }
    }

    /// Space currently available.
    pub fn available(&self) -> u64 {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        self.available_between(head, tail)
    }

    /// Space currently in use.
    pub fn used(&self) -> u64 {
        self.capacity - 1 - self.available()
    }

    /// Allocate `size` units at the tail, returning the start offset.
    pub fn try_allocate(&self, size: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            if self.available_between(head, tail) < size {
                return None;
            }
            let new_tail = (tail + size) % self.capacity;
            if self
                .tail
                .compare_exchange_weak(tail, new_tail, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(tail);
            }
        }
    }

    /// Release the oldest `size` units.
    ///
    /// Returns false when fewer than `size` units are in use.
    pub fn try_free(&self, size: u64) -> bool {
        if size == 0 {
            return true;
        }
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let used = self.capacity - 1 - self.available_between(head, tail);
            if size > used {
                return false;
            }
            let new_head = (head + size) % self.capacity;
            if self
                .head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// [`try_allocate`](Self::try_allocate) with an error on exhaustion.
    pub fn allocate(&self, size: u64) -> Result<u64, AllocError> {
        self.try_allocate(size).ok_or(AllocError::OutOfSpace {
            requested: size,
            capacity: self.capacity,
        })
    }

    /// Reset to empty. Must not race with other calls.
    pub fn clear(&self) {
        self.head.store(0, Ordering::Release);
        self.tail.store(0, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct FrameTotals {
    current: u64,
    completed: VecDeque<u64>,
}

/// A [`RingAllocator`] recycled a whole frame at a time.
///
/// Allocations accumulate into the current frame's total.
/// [`finish_frame_allocation`](Self::finish_frame_allocation) closes the
/// frame and queues its total; [`clear_frame_resource`](Self::clear_frame_resource)
/// frees the oldest queued frame once the GPU is done with it, so frames
/// are recycled in the order they were recorded.
#[derive(Debug)]
pub struct FrameRing {
    ring: RingAllocator,
    totals: Mutex<FrameTotals>,
}

impl FrameRing {
    /// Create a frame ring of `capacity` units.
    pub fn new(capacity: u64) -> Self {
        Self {
            ring: RingAllocator::new(capacity),
            totals: Mutex::new(FrameTotals::default()),
        }
    }

    /// The underlying ring.
    pub fn ring(&self) -> &RingAllocator {
        &self.ring
    }

    /// Allocate `size` units for the frame being recorded.
    pub fn try_allocate(&self, size: u64) -> Option<u64> {
        let offset = self.ring.try_allocate(size)?;
        self.totals.lock().current += size;
        Some(offset)
    }

    /// Close the current frame, queueing its total for a later clear.
    pub fn finish_frame_allocation(&self) {
        let mut totals = self.totals.lock();
        let finished = std::mem::take(&mut totals.current);
        totals.completed.push_back(finished);
    }

    /// Free everything the oldest closed frame allocated.
    ///
    /// Returns the number of units released, or `None` when no closed
    /// frame is pending. Fails if the ring holds less than the frame's
    /// total, which means it was cleared or freed out of band.
    pub fn clear_frame_resource(&self) -> Result<Option<u64>, AllocError> {
        let Some(total) = self.totals.lock().completed.pop_front() else {
            return Ok(None);
        };
        if !self.ring.try_free(total) {
            return Err(AllocError::InvalidFree {
                offset: self.ring.head.load(Ordering::Acquire),
                size: total,
            });
        }
        Ok(Some(total))
    }

    /// Number of closed frames still holding ring space.
    pub fn pending_frames(&self) -> usize {
        self.totals.lock().completed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_unit_is_reserved() {
        let ring = RingAllocator::new(8);
        assert_eq!(ring.available(), 7);
        assert_eq!(ring.try_allocate(8), None);
        assert_eq!(ring.try_allocate(7), Some(0));
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.try_allocate(1), None);
    }

    #[test]
    fn test_wraps_around() {
        let ring = RingAllocator::new(8);
        assert_eq!(ring.try_allocate(6), Some(0));
        assert!(ring.try_free(6));
        assert_eq!(ring.used(), 0);
        assert_eq!(ring.try_allocate(4), Some(6));
        assert_eq!(ring.try_allocate(2), Some(2));
        assert_eq!(ring.used(), 6);
    }

    #[test]
    fn test_free_more_than_used_rejected() {
        let ring = RingAllocator::new(16);
        ring.try_allocate(4);
        assert!(!ring.try_free(5));
        assert!(ring.try_free(4));
        assert!(!ring.try_free(1));
    }

    #[test]
    fn test_available_between_bounds() {
        let ring = RingAllocator::new(10);
        for head in 0..10 {
            for tail in 0..10 {
                let available = ring.available_between(head, tail);
                assert!(available <= 9, "head {head} tail {tail}");
            }
        }
    }

    #[test]
    fn test_frame_ring_fifo() {
        let ring = FrameRing::new(64);
        ring.try_allocate(10).unwrap();
        ring.try_allocate(5).unwrap();
        ring.finish_frame_allocation();
        ring.try_allocate(20).unwrap();
        ring.finish_frame_allocation();
        assert_eq!(ring.pending_frames(), 2);

        assert_eq!(ring.clear_frame_resource(), Ok(Some(15)));
        assert_eq!(ring.ring().used(), 20);
        assert_eq!(ring.clear_frame_resource(), Ok(Some(20)));
        assert_eq!(ring.ring().used(), 0);
        assert_eq!(ring.clear_frame_resource(), Ok(None));
    }

    #[test]
    fn test_frame_ring_empty_frame() {
        let ring = FrameRing::new(16);
        ring.finish_frame_allocation();
        assert_eq!(ring.clear_frame_resource(), Ok(Some(0)));
    }

    #[test]
    fn test_frame_ring_reports_lost_frame() {
        let ring = FrameRing::new(64);
        ring.try_allocate(10).unwrap();
        ring.finish_frame_allocation();
        ring.ring().clear();

        assert_eq!(
            ring.clear_frame_resource(),
            Err(AllocError::InvalidFree {
                offset: 0,
                size: 10
            })
        );
        assert_eq!(ring.pending_frames(), 0);
    }
}
