//! # Cronometri - Section Timing for Parallel Scientific Codes
//!
//! A Rust library that measures named sections of a program, accumulates
//! elapsed time and declared (or hardware counted) work per section across
//! threads and processes, and produces ranked statistical reports.
//!
//! ## The Model
//!
//! A program marks **sections** with `start` / `stop` pairs. Each section
//! carries a label, a kind ([`SectionKind::Communication`] or
//! [`SectionKind::Computation`]) and an *exclusive* flag: exclusive sections
//! do not overlap each other and their times add up to the job total, while
//! inclusive ones (marked `(*)` in the reports) may wrap other sections.
//!
//! An implicit `Root Section` spans the run from [`Monitor::initialize`] to
//! the first aggregation and is the denominator of the percentage column.
//!
//! ### Design Principles
//!
//! 1. **Per-Thread Slots**: every section holds 64 preallocated
//!    cache-padded slots and a thread only touches its own, leased through a
//!    `thread_local!` for as long as the thread lives. Timing from up to 64
//!    live threads needs no lock; further threads get slots created on
//!    demand.
//!
//! 2. **Aggregation on Demand**: slots are folded, gathered on rank 0 and
//!    reduced to mean and standard deviation only when a report is asked
//!    for. The accumulators are never consumed, so aggregation can be
//!    repeated.
//!
//! 3. **Pluggable Collaborators**: the collective layer ([`comm::Communicator`]),
//!    the hardware counters ([`hwpc::CounterBackend`]), the trace sink
//!    ([`trace::TraceSink`]) and the time source ([`clock::Clock`]) are
//!    traits. The crate ships a serial communicator, an in-process cluster
//!    for tests, and no hardware backend.
//!
//! ## Aggregation Levels
//!
//! ```text
//!   thread slots ──merge_threads──► process totals ──gather──► rank 0
//!                                                               │
//!                                          mean / sample deviation over
//!                                          ranks that entered the section
//!                                                               │
//!                                                   display order (time ↓)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use cronometri::{Monitor, MonitorConfig, SectionKind, SortMode};
//!
//! let mut monitor = Monitor::initialize(MonitorConfig::from_env());
//! monitor.declare("halo", SectionKind::Communication, true).unwrap();
//!
//! monitor.start("halo").unwrap();
//! // ... exchange 4 KiB with each of 6 neighbours ...
//! monitor.stop("halo", 4096.0, 6).unwrap();
//!
//! // Undeclared sections are added on first start.
//! monitor.start("update").unwrap();
//! monitor.stop("update", 2.0e6, 1).unwrap();
//!
//! monitor
//!     .print(&mut std::io::stdout(), "", "quick start", SortMode::Elapsed)
//!     .unwrap();
//! ```
//!
//! ## Reports
//!
//! | Method | Content |
//! |--------|---------|
//! | [`Monitor::print`] | One row per section, category subtotals |
//! | [`Monitor::print_progress`] | Same rows mid-run, root left running |
//! | [`Monitor::print_detail`] | One row per rank, counter tables with a backend |
//! | [`Monitor::print_threads`] | One row per thread slot of a rank |
//! | [`Monitor::print_group`] | Per-rank rows for a subset of ranks |
//! | [`Monitor::print_comm`] | One group report per color |
//! | [`Monitor::print_legend`] | Counter symbols of the backend |
//!
//! The same data is available as plain structs ([`report`]) and as a
//! [`MonitorSnapshot`] for the exporters.
//!
//! ## Observers
//!
//! | Feature | Module | Description |
//! |---------|--------|-------------|
//! | (always) | [`observers::table`] | Text tables in a selectable style |
//! | `json` | `observers::json` | Snapshots and reports as JSON |
//! | `prometheus` | `observers::prometheus` | Prometheus exposition format |
//! | `full` | All observers | Enables all observer modules |
//!
//! ## Diagnostics
//!
//! Usage errors are returned as [`MonitorError`] and logged through the
//! [`log`] facade on rank 0 only. Install any logger (e.g. `env_logger`) to
//! see them. Setting `CRONOMETRI_DISABLE` turns every call of a monitor
//! created with [`MonitorConfig::from_env`] into a no-op.

pub mod aggregate;
pub mod clock;
pub mod comm;
pub mod config;
pub mod error;
pub mod hwpc;
pub mod monitor;
pub mod observers;
pub mod report;
pub mod sections;
pub mod snapshot;
pub mod topology;
pub mod trace;

pub use aggregate::SortMode;
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use hwpc::HwpcMode;
pub use monitor::{Monitor, MonitorBuilder, SectionHandle};
pub use sections::SectionKind;
pub use snapshot::{MonitorSnapshot, SectionSnapshot};
pub use topology::{ParallelMode, Topology};

/// Version of the library, as printed in report headers.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version.
pub fn version() -> &'static str {
    VERSION
}
