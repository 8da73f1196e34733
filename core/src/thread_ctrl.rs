//! Hand-off rendezvous between pipeline threads.

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct Flags {
    slots: Vec<bool>,
    wait_index: usize,
    wake_index: usize,
    closed: bool,
}

/// A ring of wake-up flags guarded by one condition variable.
///
/// [`wake`](Self::wake) raises the flag at the rotating wake index;
/// [`wait`](Self::wait) blocks until the flag at the rotating wait index is
/// raised, then lowers it. Wakes and waits are matched in order, and at
/// most `flag_count` wakes can be banked ahead of the waiter.
///
/// The frame pipeline gives each render thread one `ThreadCtrl`; a thread
/// waits on its own and wakes the next thread's after each phase.
///
/// [`close`](Self::close) releases every waiter for good; waits on a
/// closed control return `false` instead of blocking.
///
/// # Example
///
/// ```
/// use framewright_core::ThreadCtrl;
///
/// let ctrl = ThreadCtrl::new(3, false);
/// ctrl.wake();
/// ctrl.wake();
/// assert!(ctrl.wait());
/// assert!(ctrl.wait());
/// assert!(!ctrl.try_wait());
/// ```
#[derive(Debug)]
pub struct ThreadCtrl {
    flags: Mutex<Flags>,
    condvar: Condvar,
}

impl ThreadCtrl {
    /// Create a control with `flag_count` flags, all raised if `raised`.
    pub fn new(flag_count: usize, raised: bool) -> Self {
        Self {
            flags: Mutex::new(Flags {
                slots: vec![raised; flag_count.max(1)],
                wait_index: 0,
                wake_index: 0,
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Block until the next flag is raised, then consume it.
    ///
    /// Returns `false` without consuming anything once the control is
    /// closed.
    pub fn wait(&self) -> bool {
        let mut flags = self.flags.lock();
        while !flags.closed && !flags.slots[flags.wait_index] {
            self.condvar.wait(&mut flags);
        }
        if flags.closed {
            return false;
        }
        Self::consume(&mut flags);
        true
    }

    /// Consume the next flag if it is raised, without blocking.
    pub fn try_wait(&self) -> bool {
        let mut flags = self.flags.lock();
        if !flags.closed && flags.slots[flags.wait_index] {
            Self::consume(&mut flags);
            true
        } else {
            false
        }
    }

    /// Raise the next flag and wake one waiter.
    pub fn wake(&self) {
        let mut flags = self.flags.lock();
        let index = flags.wake_index;
        flags.slots[index] = true;
        flags.wake_index = (index + 1) % flags.slots.len();
        self.condvar.notify_one();
    }

    /// Raise every flag, rewind both indices, and wake all waiters.
    pub fn wake_all(&self) {
        let mut flags = self.flags.lock();
        flags.slots.fill(true);
        flags.wait_index = 0;
        flags.wake_index = 0;
        self.condvar.notify_all();
    }

    /// Lower every flag, rewind both indices, and reopen a closed control.
    pub fn reset(&self) {
        let mut flags = self.flags.lock();
        flags.slots.fill(false);
        flags.wait_index = 0;
        flags.wake_index = 0;
        flags.closed = false;
    }

    /// Release every current and future waiter.
    pub fn close(&self) {
        self.flags.lock().closed = true;
        self.condvar.notify_all();
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.flags.lock().closed
    }

    fn consume(flags: &mut Flags) {
        let index = flags.wait_index;
        flags.slots[index] = false;
        flags.wait_index = (index + 1) % flags.slots.len();
    }
}
