//! Section records, their registry, and the per-thread slot machinery.
//!
//! A section is measured by every thread that enters it. To keep `start()`
//! and `stop()` free of locks, each section record holds one slot per thread
//! and a thread only ever touches its own slot. Slots are folded into a
//! per-process value by [`Watch::merge_threads`](watch::Watch::merge_threads)
//! once the parallel region has ended.
//!
//! # Thread Slot Assignment
//!
//! ```text
//!                          ┌─────────────────────────────────────┐
//!                          │          Section Record             │
//!                          ├─────────────────────────────────────┤
//!   Thread 0 ──start/stop► │ [Slot 0]  count time work counters  │
//!   Thread 1 ──start/stop► │ [Slot 1]  count time work counters  │
//!        ...               │    ...                              │
//!   Thread 63 ─start/stop► │ [Slot 63] count time work counters  │
//!                          └─────────────────────────────────────┘
//!                                          │
//!                                          ▼
//!                                  merge_threads() folds
//!                                  slots into one value
//! ```
//!
//! A thread leases a slot index the first time it touches any section and
//! keeps it, for every section, until it exits. The lease takes the lowest
//! free index, so no two live threads ever share a slot. When a thread exits
//! its index goes back to the pool and the next new thread picks it up:
//! a thread report row for slot `n` sums the calls of every thread that held
//! `n`, one after the other. A thread that exits inside a section leaves it
//! running on that slot and its successor's first `start()` restarts it.
//!
//! The first [`NUM_SLOTS`] indices are preallocated in every record; past
//! that, slots are created on demand behind a lock.

pub mod registry;
pub mod watch;

use std::fmt::{self, Display};
use std::sync::{Mutex, PoisonError};

/// Number of per-thread slots preallocated in every section record.
pub const NUM_SLOTS: usize = 64;

/// Dense section identifier. Ids are assigned in registration order.
pub type SectionId = usize;

/// Id of the implicit section spanning the whole run.
pub const ROOT_ID: SectionId = 0;

/// Label of the implicit section spanning the whole run.
pub const ROOT_LABEL: &str = "Root Section";

/// Slot indices not held by a live thread.
struct SlotPool {
    /// Recycled indices of exited threads.
    free: Vec<usize>,
    /// Next never used index.
    next: usize,
}

impl SlotPool {
    const fn new() -> Self {
        SlotPool {
            free: Vec::new(),
            next: 0,
        }
    }

    /// Takes the lowest free index.
    fn acquire(&mut self) -> usize {
        let lowest = self
            .free
            .iter()
            .enumerate()
            .min_by_key(|(_, idx)| **idx)
            .map(|(pos, _)| pos);
        match lowest {
            Some(pos) => self.free.swap_remove(pos),
            None => {
                self.next += 1;
                self.next - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        self.free.push(idx);
    }
}

static SLOT_POOL: Mutex<SlotPool> = Mutex::new(SlotPool::new());

/// A slot index held by the current thread, returned to the pool on exit.
struct SlotLease(usize);

impl SlotLease {
    fn acquire() -> Self {
        SlotLease(SLOT_POOL.lock().unwrap_or_else(PoisonError::into_inner).acquire())
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        SLOT_POOL
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .release(self.0);
    }
}

thread_local! {
    static THREAD_SLOT: SlotLease = SlotLease::acquire();
}

/// Returns the slot index of the calling thread.
#[inline]
pub fn current_slot() -> usize {
    THREAD_SLOT.with(|lease| lease.0)
}

/// What a section measures.
///
/// In user mode the kind decides whether the work passed to `stop()` is
/// reported as a transferred volume (bytes/sec) or an operation count
/// (flops).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SectionKind {
    /// Data movement, reported as bandwidth.
    Communication,
    /// Arithmetic, reported as operations per second.
    #[default]
    Computation,
}

impl Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SectionKind::Communication => "COMM",
            SectionKind::Computation => "CALC",
        })
    }
}
