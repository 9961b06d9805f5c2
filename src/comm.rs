//! Collective communication between cooperating processes.
//!
//! The monitor does not talk to MPI (or any other transport) itself. It is
//! handed a [`Communicator`] that knows the rank of the calling process, the
//! number of participants, and how to gather a vector of doubles onto rank 0.
//!
//! Two implementations ship with the crate:
//!
//! | Type | Participants | Use |
//! |------|--------------|-----|
//! | [`SerialComm`] | 1 | Single-process runs (default) |
//! | [`LocalComm`] | N threads | In-process clusters for tests and demos |
//!
//! # Collective contract
//!
//! [`Communicator::gather`] is a collective operation: every participant
//! must call it the same number of times with vectors of the same length.
//! A participant that skips a call leaves the others blocked forever.

use std::sync::{Arc, Barrier, Mutex, PoisonError};

/// Process topology queries and the gather collective.
pub trait Communicator: Send + Sync {
    /// Rank of the calling process, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of participating processes.
    fn size(&self) -> usize;

    /// Gathers `local` from every participant onto rank 0.
    ///
    /// Rank 0 receives the concatenation of all vectors in rank order; every
    /// other rank receives `None`.
    fn gather(&self, local: &[f64]) -> Option<Vec<f64>>;
}

/// The single-process communicator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn gather(&self, local: &[f64]) -> Option<Vec<f64>> {
        Some(local.to_vec())
    }
}

struct ClusterState {
    size: usize,
    barrier: Barrier,
    mailbox: Mutex<Vec<Vec<f64>>>,
}

/// A communicator connecting threads of one process as if they were ranks.
///
/// Each thread owns one `LocalComm`; the collective blocks until every
/// member of the cluster has reached it.
///
/// # Examples
///
/// ```rust
/// use cronometri::comm::{Communicator, LocalComm};
///
/// let comms = LocalComm::cluster(3);
/// let gathered = std::thread::scope(|s| {
///     let handles: Vec<_> = comms
///         .iter()
///         .map(|comm| s.spawn(move || comm.gather(&[comm.rank() as f64])))
///         .collect();
///     handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
/// });
///
/// assert_eq!(gathered[0], Some(vec![0.0, 1.0, 2.0]));
/// assert_eq!(gathered[1], None);
/// ```
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    state: Arc<ClusterState>,
}

impl LocalComm {
    /// Creates a cluster of `size` communicators, one per rank.
    ///
    /// A `size` of zero is treated as one.
    pub fn cluster(size: usize) -> Vec<LocalComm> {
        let size = size.max(1);
        let state = Arc::new(ClusterState {
            size,
            barrier: Barrier::new(size),
            mailbox: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                state: Arc::clone(&state),
            })
            .collect()
    }
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.state.size)
            .finish()
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.state.size
    }

    fn gather(&self, local: &[f64]) -> Option<Vec<f64>> {
        {
            let mut mailbox = self
                .state
                .mailbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            mailbox[self.rank] = local.to_vec();
        }
        self.state.barrier.wait();

        let gathered = (self.rank == 0).then(|| {
            let mailbox = self
                .state
                .mailbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            mailbox.concat()
        });

        // Nobody may post the next round before rank 0 has read this one.
        self.state.barrier.wait();
        gathered
    }
}
