//! Process and thread layout of a run.

use std::fmt::{self, Display};

use crate::comm::Communicator;

/// How a run is parallelized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParallelMode {
    /// One process, one thread.
    #[default]
    Serial,
    /// One process, several threads.
    Threaded,
    /// Several single threaded processes.
    MultiProcess,
    /// Several processes with several threads each.
    Hybrid,
}

impl ParallelMode {
    /// Classifies a layout.
    pub fn classify(multi_process: bool, multi_thread: bool) -> Self {
        match (multi_process, multi_thread) {
            (false, false) => ParallelMode::Serial,
            (false, true) => ParallelMode::Threaded,
            (true, false) => ParallelMode::MultiProcess,
            (true, true) => ParallelMode::Hybrid,
        }
    }
}

impl Display for ParallelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParallelMode::Serial => "Serial",
            ParallelMode::Threaded => "OpenMP",
            ParallelMode::MultiProcess => "FlatMPI",
            ParallelMode::Hybrid => "Hybrid",
        })
    }
}

/// Rank, process count and thread count captured at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    pub rank: usize,
    pub num_process: usize,
    pub num_threads: usize,
    pub mode: ParallelMode,
}

impl Topology {
    /// Measures the topology from a communicator and a thread count.
    pub fn detect(comm: &dyn Communicator, num_threads: usize) -> Self {
        let num_process = comm.size().max(1);
        let num_threads = num_threads.max(1);
        Self {
            rank: comm.rank(),
            num_process,
            num_threads,
            mode: ParallelMode::classify(num_process > 1, num_threads > 1),
        }
    }

    /// Returns `true` on the reporting rank.
    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    /// Human readable layout, as shown in report headers.
    pub fn describe(&self) -> String {
        let plural = |n: usize, what: &str| {
            if n == 1 {
                format!("{n} {what}")
            } else {
                format!("{n} {what}es")
            }
        };
        match self.mode {
            ParallelMode::Serial => "Serial".to_string(),
            ParallelMode::Threaded => format!("OpenMP ({} threads)", self.num_threads),
            ParallelMode::MultiProcess => {
                format!("FlatMPI ({})", plural(self.num_process, "process"))
            }
            ParallelMode::Hybrid => format!(
                "Hybrid ({} x {} threads)",
                plural(self.num_process, "process"),
                self.num_threads
            ),
        }
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            rank: 0,
            num_process: 1,
            num_threads: 1,
            mode: ParallelMode::Serial,
        }
    }
}
