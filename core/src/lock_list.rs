//! Singly-linked list with per-node locks (hand-over-hand locking).
//!
//! Every node, including the sentinel head, owns its own [`Mutex`]. A
//! traversal always holds the lock of the node it is standing on and
//! acquires the next node's lock before releasing it, so locks are taken
//! strictly in list order and at most two nodes are held at once. Threads
//! working on different parts of the list never contend.
//!
//! The list is navigated with a [`Cursor`], a two-node window:
//!
//! ```text
//! head -> [a] -> [b] -> [c] -> None
//!          ^      ^
//!        prev  current
//! ```
//!
//! Inserting puts a node between `prev` and `current`; removing unlinks
//! `current` and pulls the following node into the window.
//!
//! # Example
//!
//! ```
//! use framewright_core::lock_list::LockCoupledList;
//!
//! let list = LockCoupledList::new();
//! list.push_back(1);
//! list.push_back(2);
//! list.push_back(3);
//!
//! list.retain(|v| *v != 2);
//! assert_eq!(list.snapshot(), vec![1, 3]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

type Link<T> = Arc<Mutex<Node<T>>>;
type Guard<T> = ArcMutexGuard<RawMutex, Node<T>>;

struct Node<T> {
    /// `None` only for the sentinel head.
    value: Option<T>,
    next: Option<Link<T>>,
}

/// Thread-safe singly-linked list using lock coupling.
pub struct LockCoupledList<T> {
    head: Link<T>,
    len: AtomicUsize,
}

impl<T> LockCoupledList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            head: Arc::new(Mutex::new(Node {
                value: None,
                next: None,
            })),
            len: AtomicUsize::new(0),
        }
    }

    /// Open a cursor positioned at the front of the list.
    ///
    /// The cursor holds the head lock until it advances, so keep cursors
    /// short-lived.
    pub fn cursor(&self) -> Cursor<'_, T> {
        let prev = self.head.lock_arc();
        let current = prev.next.as_ref().map(|next| next.lock_arc());
        Cursor {
            list: self,
            prev,
            current,
        }
    }

    /// Number of values in the list.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Returns true if the list holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a value at the front.
    pub fn push_front(&self, value: T) {
        self.cursor().insert(value);
    }

    /// Append a value at the back, walking the list to find the tail.
    pub fn push_back(&self, value: T) {
        let mut cursor = self.cursor();
        while cursor.advance() {}
        cursor.insert(value);
    }

    /// Call `f` on every value in list order.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        let mut cursor = self.cursor();
        while let Some(value) = cursor.current() {
            f(value);
            cursor.advance();
        }
    }

    /// Return the first `Some` produced by `f`, walking in list order.
    pub fn find_map<R>(&self, mut f: impl FnMut(&T) -> Option<R>) -> Option<R> {
        let mut cursor = self.cursor();
        while let Some(value) = cursor.current() {
            if let Some(found) = f(value) {
                return Some(found);
            }
            cursor.advance();
        }
        None
    }

    /// Like [`find_map`](Self::find_map), but when nothing matches, append
    /// the value built by `make` while the tail is still locked.
    ///
    /// Two callers looking for the same value cannot both append it, as
    /// long as every insert goes through the back of the list.
    pub fn find_map_or_push_back<R, E>(
        &self,
        mut f: impl FnMut(&T) -> Option<R>,
        make: impl FnOnce() -> Result<(T, R), E>,
    ) -> Result<R, E> {
        let mut cursor = self.cursor();
        while let Some(value) = cursor.current() {
            if let Some(found) = f(value) {
                return Ok(found);
            }
            cursor.advance();
        }
        let (value, found) = make()?;
        cursor.insert(value);
        Ok(found)
    }

    /// Keep only the values for which `keep` returns true.
    ///
    /// Removed values are returned in list order.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> Vec<T> {
        let mut removed = Vec::new();
        let mut cursor = self.cursor();
        while let Some(value) = cursor.current() {
            if keep(value) {
                cursor.advance();
            } else if let Some(value) = cursor.remove() {
                removed.push(value);
            }
        }
        removed
    }

    /// Remove every value.
    pub fn clear(&self) {
        let mut cursor = self.cursor();
        while cursor.remove().is_some() {}
    }
}

impl<T: Clone> LockCoupledList<T> {
    /// Clone all values into a `Vec`, in list order.
    pub fn snapshot(&self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len());
        self.for_each(|v| values.push(v.clone()));
        values
    }
}

impl<T> Default for LockCoupledList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LockCoupledList<T> {
    fn drop(&mut self) {
        // Unlink iteratively so long lists don't recurse in `Arc` drop.
        let mut next = self.head.lock().next.take();
        while let Some(link) = next {
            next = link.lock().next.take();
        }
    }
}

impl<T> std::fmt::Debug for LockCoupledList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCoupledList")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// A locked two-node window into a [`LockCoupledList`].
pub struct Cursor<'a, T> {
    list: &'a LockCoupledList<T>,
    prev: Guard<T>,
    current: Option<Guard<T>>,
}

impl<T> Cursor<'_, T> {
    /// The value before the window's current node, `None` at the front.
    pub fn prev(&self) -> Option<&T> {
        self.prev.value.as_ref()
    }

    /// Mutable access to the previous value.
    pub fn prev_mut(&mut self) -> Option<&mut T> {
        self.prev.value.as_mut()
    }

    /// The current value, `None` past the end.
    pub fn current(&self) -> Option<&T> {
        self.current.as_ref().and_then(|node| node.value.as_ref())
    }

    /// Mutable access to the current value.
    pub fn current_mut(&mut self) -> Option<&mut T> {
        self.current.as_mut().and_then(|node| node.value.as_mut())
    }

    /// Slide the window one node forward.
    ///
    /// The next node is locked before the old `prev` is released. Returns
    /// false (and does nothing) when already past the end.
    pub fn advance(&mut self) -> bool {
        let Some(current) = self.current.take() else {
            return false;
        };
        let next = current.next.as_ref().map(|next| next.lock_arc());
        self.prev = current;
        self.current = next;
        true
    }

    /// Unlink the current node and return its value.
    ///
    /// The node after it becomes the new current node.
    pub fn remove(&mut self) -> Option<T> {
        let mut current = self.current.take()?;
        let after = current.next.take();
        self.current = after.as_ref().map(|next| next.lock_arc());
        self.prev.next = after;
        self.list.len.fetch_sub(1, Ordering::AcqRel);
        current.value.take()
    }

    /// Insert a value between `prev` and `current`.
    ///
    /// The inserted node becomes the new `prev`, so repeated inserts keep
    /// their call order.
    pub fn insert(&mut self, value: T) {
        let node = Arc::new(Mutex::new(Node {
            value: Some(value),
            next: self.prev.next.take(),
        }));
        // Unreachable by other threads until `prev` is released.
        let guard = node.lock_arc();
        self.prev.next = Some(node);
        self.prev = guard;
        self.list.len.fetch_add(1, Ordering::AcqRel);
    }
}
