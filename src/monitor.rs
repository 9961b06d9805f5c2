//! The public entry point: one [`Monitor`] per process.
//!
//! A monitor owns the section registry, the display order and the
//! collaborators of a run (communicator, clock, optional counter backend and
//! trace sink). Sections are timed with [`Monitor::start`] and
//! [`Monitor::stop`]; reports are produced on rank 0 after an aggregation.
//!
//! # Collective calls
//!
//! [`aggregate`](Monitor::aggregate), [`post_trace`](Monitor::post_trace)
//! and every `print*` / `*_report` method except the group reports gather
//! data onto rank 0. Every rank must make the same sequence of these calls.
//!
//! # Examples
//!
//! ```rust
//! use cronometri::{Monitor, MonitorConfig, SectionKind, SortMode};
//!
//! let mut monitor = Monitor::initialize(MonitorConfig::default().with_threads(1));
//! monitor.declare("exchange", SectionKind::Communication, true).unwrap();
//!
//! for _ in 0..3 {
//!     monitor.start("exchange").unwrap();
//!     monitor.stop("exchange", 8.0 * 1024.0, 2).unwrap();
//! }
//!
//! let mut out = Vec::new();
//! monitor.print(&mut out, "", "three exchanges", SortMode::Elapsed).unwrap();
//! assert!(String::from_utf8(out).unwrap().contains("exchange"));
//! ```

use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::aggregate::{Aggregator, SortMode};
use crate::clock::{Clock, SystemClock};
use crate::comm::{Communicator, SerialComm};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::hwpc::{CounterBackend, HwpcMode};
use crate::observers::table::TableObserver;
use crate::report::{self, BasicReport, DetailReport, Frame, ReportHeader, ThreadReport};
use crate::sections::registry::Registry;
use crate::sections::{current_slot, SectionId, SectionKind, ROOT_ID, ROOT_LABEL};
use crate::snapshot::{now_ms, MonitorSnapshot, SectionSnapshot};
use crate::topology::{ParallelMode, Topology};
use crate::trace::TraceSink;

/// Collects the collaborators of a monitor before initializing it.
///
/// ```rust
/// use cronometri::clock::ManualClock;
/// use cronometri::comm::SerialComm;
/// use cronometri::{Monitor, MonitorConfig};
///
/// let monitor = Monitor::builder(MonitorConfig::default())
///     .with_communicator(SerialComm)
///     .with_clock(ManualClock::new())
///     .initialize();
/// assert!(monitor.is_enabled());
/// ```
pub struct MonitorBuilder {
    config: MonitorConfig,
    comm: Arc<dyn Communicator>,
    clock: Arc<dyn Clock>,
    backend: Option<Arc<dyn CounterBackend>>,
    tracer: Option<Arc<dyn TraceSink>>,
}

impl MonitorBuilder {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            comm: Arc::new(SerialComm),
            clock: Arc::new(SystemClock),
            backend: None,
            tracer: None,
        }
    }

    /// Communicator used for the gather collective.
    pub fn with_communicator<C: Communicator + 'static>(mut self, comm: C) -> Self {
        self.comm = Arc::new(comm);
        self
    }

    /// Time source for every start and stop.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Hardware counter backend. Without one the monitor runs in `USER` mode.
    pub fn with_backend<B: CounterBackend + 'static>(mut self, backend: B) -> Self {
        self.backend = Some(Arc::new(backend));
        self
    }

    /// Sink receiving every start and stop event.
    pub fn with_tracer<T: TraceSink + 'static>(mut self, tracer: Arc<T>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Creates the monitor and starts the root section on the calling thread.
    pub fn initialize(self) -> Monitor {
        let MonitorBuilder {
            config,
            comm,
            clock,
            backend,
            tracer,
        } = self;

        let topology = Topology::detect(comm.as_ref(), config.resolved_threads());
        let epoch = clock.now();
        let mut monitor = Monitor {
            enabled: config.enabled,
            topology,
            mode: HwpcMode::User,
            registry: Registry::new(config.initial_capacity),
            aggregator: Aggregator::new(),
            root_active: false,
            root_slot: current_slot(),
            epoch,
            comm,
            clock,
            backend,
            tracer,
            renderer: TableObserver::new().with_style(config.table_style),
        };
        if !monitor.enabled {
            return monitor;
        }

        monitor.mode = monitor.select_mode(&config.hwpc_mode);
        if !monitor.mode.is_hardware() {
            monitor.backend = None;
        }

        let registered = monitor
            .registry
            .register(ROOT_LABEL, SectionKind::Computation, false);
        if let Err(err) = registered {
            monitor.diagnose(err);
            return monitor;
        }
        if let Some(backend) = &monitor.backend {
            backend.open(ROOT_LABEL);
        }
        monitor.start_root();

        if monitor.topology.is_root() {
            log::debug!(
                "monitor initialized: {}, HWPC mode {}",
                monitor.topology.describe(),
                monitor.mode
            );
        }
        monitor
    }
}

/// Section timing and statistics for one process.
pub struct Monitor {
    enabled: bool,
    topology: Topology,
    mode: HwpcMode,
    registry: Registry,
    aggregator: Aggregator,
    root_active: bool,
    root_slot: usize,
    epoch: Instant,
    comm: Arc<dyn Communicator>,
    clock: Arc<dyn Clock>,
    backend: Option<Arc<dyn CounterBackend>>,
    tracer: Option<Arc<dyn TraceSink>>,
    renderer: TableObserver,
}

/// A declared section, timed through a shared reference to the monitor.
///
/// Handles let several threads time sections concurrently: each thread
/// measures into its own slot.
///
/// ```rust
/// use cronometri::{Monitor, MonitorConfig, SectionKind};
///
/// let mut monitor = Monitor::initialize(MonitorConfig::default());
/// monitor.declare("kernel", SectionKind::Computation, true).unwrap();
///
/// std::thread::scope(|s| {
///     for _ in 0..2 {
///         let kernel = monitor.section("kernel").unwrap();
///         s.spawn(move || {
///             kernel.start().unwrap();
///             kernel.stop(1.0e3, 1).unwrap();
///         });
///     }
/// });
///
/// monitor.aggregate();
/// assert_eq!(monitor.snapshot().unwrap().get("kernel").unwrap().count_sum, 2);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SectionHandle<'a> {
    monitor: &'a Monitor,
    id: SectionId,
}

impl SectionHandle<'_> {
    pub fn id(&self) -> SectionId {
        self.id
    }

    pub fn label(&self) -> &str {
        self.monitor
            .registry
            .get(self.id)
            .map_or("", |watch| watch.label())
    }

    /// Starts the section on the calling thread.
    pub fn start(&self) -> Result<()> {
        if !self.monitor.enabled {
            return Ok(());
        }
        self.monitor
            .start_id(self.id)
            .map_err(|err| self.monitor.diagnose(err))
    }

    /// Stops the section on the calling thread; see [`Monitor::stop`].
    pub fn stop(&self, work: f64, multiplier: u32) -> Result<()> {
        if !self.monitor.enabled {
            return Ok(());
        }
        self.monitor
            .stop_id(self.id, work, multiplier)
            .map_err(|err| self.monitor.diagnose(err))
    }
}

impl Monitor {
    /// Initializes a monitor with the default collaborators: a single
    /// process, the system clock, no counter backend and no trace sink.
    pub fn initialize(config: MonitorConfig) -> Self {
        MonitorBuilder::new(config).initialize()
    }

    pub fn builder(config: MonitorConfig) -> MonitorBuilder {
        MonitorBuilder::new(config)
    }

    fn select_mode(&self, name: &str) -> HwpcMode {
        let mode = match name.parse::<HwpcMode>() {
            Ok(mode) => mode,
            Err(err) => {
                self.diagnose(err);
                HwpcMode::User
            }
        };
        if mode.is_hardware() && self.backend.is_none() {
            if self.topology.is_root() {
                log::warn!("HWPC mode {mode} needs a counter backend, falling back to USER");
            }
            return HwpcMode::User;
        }
        mode
    }

    /// Logs a usage error on the reporting rank and hands it back.
    fn diagnose(&self, err: MonitorError) -> MonitorError {
        if self.topology.is_root() {
            log::warn!("{err}");
        }
        err
    }

    /// Starts the root section on the calling thread.
    fn start_root(&mut self) {
        self.root_slot = current_slot();
        match self.start_id(ROOT_ID) {
            Ok(()) => self.root_active = true,
            Err(err) => {
                self.diagnose(err);
            }
        }
    }

    fn now(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.epoch)
    }

    fn start_id(&self, id: SectionId) -> Result<()> {
        let watch = self
            .registry
            .get(id)
            .ok_or_else(|| MonitorError::UnknownLabel(id.to_string()))?;
        let slot = current_slot();
        let at = self.now();
        let result = watch.start(slot, at, self.backend.as_deref());
        if let Some(tracer) = &self.tracer {
            tracer.record_start(id, slot, at);
        }
        result
    }

    fn stop_id(&self, id: SectionId, work: f64, multiplier: u32) -> Result<()> {
        let watch = self
            .registry
            .get(id)
            .ok_or_else(|| MonitorError::UnknownLabel(id.to_string()))?;
        let slot = current_slot();
        let at = self.now();
        watch.stop(slot, at, work, multiplier, self.backend.as_deref())?;
        if let Some(tracer) = &self.tracer {
            tracer.record_stop(id, slot, at, work * f64::from(multiplier));
        }
        Ok(())
    }

    /// Registers a section.
    ///
    /// `exclusive` sections must not overlap other exclusive sections on the
    /// same thread; their times are summed in the report trailer.
    pub fn declare(&mut self, label: &str, kind: SectionKind, exclusive: bool) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        match self.registry.register(label, kind, exclusive) {
            Ok(id) => {
                if let Some(backend) = &self.backend {
                    backend.open(label);
                }
                if self.topology.is_root() {
                    log::debug!("declared section [{label}] id={id} {kind}");
                }
                Ok(())
            }
            Err(err) => Err(self.diagnose(err)),
        }
    }

    /// Starts a section on the calling thread.
    ///
    /// An undeclared label is declared on the fly as an exclusive
    /// computation section. A section that is already running is restarted
    /// and [`MonitorError::AlreadyRunning`] is returned.
    pub fn start(&mut self, label: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if label.is_empty() {
            return Err(self.diagnose(MonitorError::EmptyLabel));
        }
        let id = match self.registry.resolve(label) {
            Some(id) => id,
            None => {
                if self.topology.is_root() {
                    log::debug!("start: section [{label}] is not declared, adding it");
                }
                self.declare(label, SectionKind::Computation, true)?;
                self.registry
                    .resolve(label)
                    .ok_or_else(|| MonitorError::UnknownLabel(label.to_string()))?
            }
        };
        self.start_id(id).map_err(|err| self.diagnose(err))
    }

    /// Stops a section on the calling thread.
    ///
    /// `work * multiplier` is added to the section's declared work: bytes
    /// for communication sections, operations for computation sections.
    /// Stopping an unknown or idle section changes nothing.
    pub fn stop(&self, label: &str, work: f64, multiplier: u32) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if label.is_empty() {
            return Err(self.diagnose(MonitorError::EmptyLabel));
        }
        let Some(id) = self.registry.resolve(label) else {
            return Err(self.diagnose(MonitorError::UnknownLabel(label.to_string())));
        };
        self.stop_id(id, work, multiplier)
            .map_err(|err| self.diagnose(err))
    }

    /// Handle to a declared section, usable from several threads.
    pub fn section(&self, label: &str) -> Option<SectionHandle<'_>> {
        let id = self.registry.resolve(label)?;
        Some(SectionHandle { monitor: self, id })
    }

    /// Zeroes the accumulators of one section.
    ///
    /// Resetting the root section while it runs restarts it, so the
    /// percentages of the next report are relative to the time since the
    /// reset.
    pub fn reset(&mut self, label: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if label.is_empty() {
            return Err(self.diagnose(MonitorError::EmptyLabel));
        }
        let Some(id) = self.registry.resolve(label) else {
            return Err(self.diagnose(MonitorError::UnknownLabel(label.to_string())));
        };
        if let Some(watch) = self.registry.get_mut(id) {
            watch.reset();
        }
        if id == ROOT_ID {
            self.restart_root();
        }
        Ok(())
    }

    /// Zeroes the accumulators of every section, root included.
    ///
    /// A running root section is restarted at the reset, as with
    /// [`reset`](Self::reset).
    pub fn reset_all(&mut self) {
        if !self.enabled {
            return;
        }
        self.registry.reset_all();
        self.restart_root();
    }

    /// Root was zeroed: start it again if it had not been stopped yet.
    fn restart_root(&mut self) {
        if self.root_active {
            self.root_active = false;
            self.start_root();
        }
    }

    /// Declares the intended parallel layout.
    ///
    /// The layout measured at initialization is kept; a mismatch is only
    /// reported.
    pub fn set_parallel_mode(&mut self, mode: ParallelMode, threads: usize, processes: usize) {
        if !self.enabled {
            return;
        }
        let measured = self.topology;
        let matches = mode == measured.mode
            && threads == measured.num_threads
            && processes == measured.num_process;
        if !matches && measured.is_root() {
            log::warn!(
                "parallel mode {mode} with {threads} threads and {processes} processes \
                 does not match the measured layout {}, keeping the measured one",
                measured.describe()
            );
        }
    }

    fn stop_root(&mut self) {
        if !self.root_active {
            return;
        }
        self.root_active = false;
        let at = self.now();
        if let Some(root) = self.registry.get(ROOT_ID) {
            let backend = self.backend.as_deref();
            if root.stop(self.root_slot, at, 0.0, 1, backend).is_ok() {
                if let Some(tracer) = &self.tracer {
                    tracer.record_stop(ROOT_ID, self.root_slot, at, 0.0);
                }
            }
        }
    }

    fn gather_and_stats(&mut self) {
        self.aggregator.gather_and_stats(
            &mut self.registry,
            self.comm.as_ref(),
            self.mode,
            self.backend.as_deref(),
        );
    }

    /// Stops the root section on first use, merges thread slots, gathers on
    /// rank 0, computes statistics and rebuilds the display order.
    ///
    /// Collective. Running it again without timing anything in between
    /// leaves the statistics unchanged.
    pub fn aggregate(&mut self) {
        if !self.enabled {
            return;
        }
        self.stop_root();
        self.aggregator.merge_threads(&mut self.registry);
        self.gather_and_stats();
        self.aggregator.sort(&self.registry);
    }

    /// Section ids in display order, from the last aggregation.
    pub fn display_order(&self) -> &[SectionId] {
        self.aggregator.order()
    }

    fn frame(&self, sort: SortMode) -> Frame<'_> {
        Frame {
            registry: &self.registry,
            order: self.aggregator.ids(sort, &self.registry),
            mode: self.mode,
            topology: &self.topology,
        }
    }

    fn header(&self, hostname: &str, comment: &str, total_time: f64) -> ReportHeader {
        ReportHeader::new(
            &self.topology,
            self.mode,
            self.backend.is_some(),
            hostname,
            comment,
            total_time,
            self.registry.len(),
        )
    }

    fn reports_here(&self) -> bool {
        self.enabled && self.topology.is_root()
    }

    /// Aggregates and builds the basic report. `None` off rank 0.
    ///
    /// Percentages are relative to the root section, the time from
    /// initialization to the first aggregation. An empty `hostname` is
    /// replaced by the name of the host.
    pub fn basic_report(
        &mut self,
        hostname: &str,
        comment: &str,
        sort: SortMode,
    ) -> Option<BasicReport> {
        self.aggregate();
        if !self.reports_here() {
            return None;
        }
        let frame = self.frame(sort);
        let header = self.header(hostname, comment, frame.root_time());
        Some(report::basic(&frame, header, false))
    }

    /// Builds a mid-run report. The root section keeps running and
    /// percentages are relative to the sum of the exclusive sections.
    pub fn progress_report(&mut self, comment: &str, sort: SortMode) -> Option<BasicReport> {
        if !self.enabled {
            return None;
        }
        self.aggregator.merge_threads(&mut self.registry);
        self.gather_and_stats();
        self.aggregator.sort(&self.registry);
        if !self.reports_here() {
            return None;
        }
        let frame = self.frame(sort);
        let header = self.header("", comment, frame.exclusive_time());
        Some(report::basic(&frame, header, true))
    }

    /// Aggregates and builds the per-rank report of every exclusive section.
    pub fn detail_report(&mut self, legend: bool, sort: SortMode) -> Option<DetailReport> {
        self.aggregate();
        if !self.reports_here() {
            return None;
        }
        let title = if self.topology.num_process > 1 {
            "Process Report --- Elapsed time for individual ranks".to_string()
        } else {
            "Process Report".to_string()
        };
        Some(report::detail(
            &self.frame(sort),
            title,
            None,
            self.backend.as_deref(),
            legend,
        ))
    }

    /// Builds the per-thread report of the calling rank.
    ///
    /// Collective: statistics are refreshed on every rank, the display
    /// order is kept.
    pub fn thread_report(&mut self, sort: SortMode) -> Option<ThreadReport> {
        if !self.enabled {
            return None;
        }
        self.aggregator.merge_threads(&mut self.registry);
        self.gather_and_stats();
        let title = if self.topology.num_process > 1 {
            format!("Thread Report for rank {}", self.topology.rank)
        } else {
            "Thread Report for the single process run".to_string()
        };
        Some(report::threads(&self.frame(sort), title))
    }

    /// Per-rank report restricted to `members`, from the statistics of the
    /// last aggregation. Not collective.
    pub fn group_report(
        &self,
        members: &[usize],
        group: usize,
        legend: bool,
        sort: SortMode,
    ) -> Option<DetailReport> {
        if !self.reports_here() {
            return None;
        }
        Some(report::detail(
            &self.frame(sort),
            format!("Process Group [{group:5}] Elapsed time for individual ranks"),
            Some(members),
            self.backend.as_deref(),
            legend,
        ))
    }

    /// Writes the basic report on rank 0.
    pub fn print<W: Write>(
        &mut self,
        out: &mut W,
        hostname: &str,
        comment: &str,
        sort: SortMode,
    ) -> Result<()> {
        if let Some(report) = self.basic_report(hostname, comment, sort) {
            out.write_all(self.renderer.render_basic(&report).as_bytes())?;
        }
        Ok(())
    }

    /// Writes the per-rank report on rank 0, followed by the counter legend
    /// when `legend` is set and a backend is active.
    pub fn print_detail<W: Write>(&mut self, out: &mut W, legend: bool, sort: SortMode) -> Result<()> {
        if let Some(report) = self.detail_report(legend, sort) {
            out.write_all(self.renderer.render_detail(&report).as_bytes())?;
        }
        Ok(())
    }

    /// Writes the per-thread report of `rank`. Collective; only that rank
    /// writes.
    pub fn print_threads<W: Write>(&mut self, out: &mut W, rank: usize, sort: SortMode) -> Result<()> {
        if let Some(report) = self.thread_report(sort) {
            if report.rank == rank {
                out.write_all(self.renderer.render_threads(&report).as_bytes())?;
            }
        }
        Ok(())
    }

    /// Writes the progress report on rank 0.
    pub fn print_progress<W: Write>(&mut self, out: &mut W, comment: &str, sort: SortMode) -> Result<()> {
        if let Some(report) = self.progress_report(comment, sort) {
            out.write_all(self.renderer.render_basic(&report).as_bytes())?;
        }
        Ok(())
    }

    /// Writes the report of one group of ranks on rank 0.
    pub fn print_group<W: Write>(
        &self,
        out: &mut W,
        members: &[usize],
        group: usize,
        legend: bool,
        sort: SortMode,
    ) -> Result<()> {
        if let Some(report) = self.group_report(members, group, legend, sort) {
            out.write_all(self.renderer.render_detail(&report).as_bytes())?;
        }
        Ok(())
    }

    /// Splits the ranks by `color` and writes one group report per distinct
    /// color, in ascending color order. Group numbers are the position of
    /// the color in that order.
    ///
    /// Collective: every rank passes its own color.
    pub fn print_comm<W: Write>(
        &self,
        out: &mut W,
        color: i64,
        legend: bool,
        sort: SortMode,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        // Colors travel through the f64 gather; they are small integers.
        let Some(gathered) = self.comm.gather(&[color as f64]) else {
            return Ok(());
        };
        if !self.topology.is_root() {
            return Ok(());
        }
        let colors: Vec<i64> = gathered.iter().map(|&c| c as i64).collect();
        let mut distinct = colors.clone();
        distinct.sort_unstable();
        distinct.dedup();

        for (group, color) in distinct.iter().enumerate() {
            let members: Vec<usize> = colors
                .iter()
                .enumerate()
                .filter(|(_, c)| *c == color)
                .map(|(rank, _)| rank)
                .collect();
            self.print_group(out, &members, group, legend, sort)?;
        }
        Ok(())
    }

    /// Writes the counter legend on rank 0 when a backend is active.
    pub fn print_legend<W: Write>(&self, out: &mut W) -> Result<()> {
        if !self.reports_here() {
            return Ok(());
        }
        if let Some(backend) = &self.backend {
            out.write_all(self.renderer.render_legend(&backend.legend()).as_bytes())?;
        }
        Ok(())
    }

    /// Refreshes the statistics, labels every section in the trace sink and
    /// finalizes it. Collective.
    pub fn post_trace(&mut self) -> Result<()> {
        if !self.enabled || self.registry.is_empty() {
            return Ok(());
        }
        self.gather_and_stats();
        if let Some(tracer) = &self.tracer {
            for watch in self.registry.iter() {
                tracer.define_label(watch.id(), watch.label());
            }
            tracer.finalize()?;
        }
        Ok(())
    }

    /// Copies the statistics of the last aggregation.
    ///
    /// On rank 0 they describe the whole job, elsewhere the calling rank.
    pub fn snapshot(&self) -> Option<MonitorSnapshot> {
        if !self.enabled {
            return None;
        }
        Some(MonitorSnapshot {
            timestamp_ms: now_ms(),
            rank: self.topology.rank,
            num_process: self.topology.num_process,
            num_threads: self.topology.num_threads,
            hwpc: self.mode,
            sections: self
                .registry
                .iter()
                .map(SectionSnapshot::from_watch)
                .collect(),
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The counter mode in effect after fallbacks.
    pub fn hwpc_mode(&self) -> HwpcMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("enabled", &self.enabled)
            .field("topology", &self.topology)
            .field("mode", &self.mode)
            .field("sections", &self.registry.len())
            .field("root_active", &self.root_active)
            .field("backend", &self.backend.is_some())
            .field("tracer", &self.tracer.is_some())
            .finish()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(backend) = &self.backend {
            for watch in self.registry.iter() {
                backend.close(watch.label());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::hwpc::{CounterEvent, DerivedMetrics};
    use crate::sections::ROOT_LABEL;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn manual() -> (Monitor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let monitor = Monitor::builder(MonitorConfig::default().with_threads(1))
            .with_clock(Arc::clone(&clock))
            .initialize();
        (monitor, clock)
    }

    #[test]
    fn test_root_is_registered_and_running() {
        let (monitor, _) = manual();
        let root = monitor.registry().get(ROOT_ID).unwrap();
        assert_eq!(root.label(), ROOT_LABEL);
        assert!(!root.is_exclusive());
        assert!(root.is_running(current_slot()));
    }

    #[test]
    fn test_root_stopped_once() {
        let (mut monitor, clock) = manual();
        clock.advance(Duration::from_millis(20));
        monitor.aggregate();
        clock.advance(Duration::from_millis(20));
        monitor.aggregate();
        let root = monitor.registry().get(ROOT_ID).unwrap();
        assert_eq!(root.stats().count_sum, 1);
        assert!((root.stats().time_av - 0.020).abs() < 1e-9);
    }

    #[test]
    fn test_start_twice_restarts() {
        let (mut monitor, clock) = manual();
        monitor.start("a").unwrap();
        clock.advance(Duration::from_millis(5));
        let err = monitor.start("a").unwrap_err();
        assert!(matches!(err, MonitorError::AlreadyRunning(_)));
        clock.advance(Duration::from_millis(1));
        monitor.stop("a", 0.0, 1).unwrap();
        monitor.aggregate();
        let a = monitor.snapshot().unwrap();
        assert!((a.get("a").unwrap().time_av - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_stop_idle_is_rejected() {
        let (mut monitor, _) = manual();
        monitor
            .declare("a", SectionKind::Computation, true)
            .unwrap();
        assert!(matches!(
            monitor.stop("a", 1.0, 1),
            Err(MonitorError::NotRunning(_))
        ));
        assert!(matches!(monitor.stop("", 1.0, 1), Err(MonitorError::EmptyLabel)));
    }

    #[test]
    fn test_declare_errors() {
        let (mut monitor, _) = manual();
        assert!(matches!(
            monitor.declare("", SectionKind::Computation, true),
            Err(MonitorError::EmptyLabel)
        ));
        monitor
            .declare("x", SectionKind::Communication, true)
            .unwrap();
        assert!(matches!(
            monitor.declare("x", SectionKind::Computation, false),
            Err(MonitorError::DuplicateLabel(_))
        ));
        let x = monitor.registry().find("x").unwrap();
        assert_eq!(x.kind(), SectionKind::Communication);
        assert!(x.is_exclusive());
    }

    #[test]
    fn test_unknown_mode_falls_back() {
        let monitor = Monitor::initialize(MonitorConfig::default().with_hwpc_mode("TURBO"));
        assert_eq!(monitor.hwpc_mode(), HwpcMode::User);
        let monitor = Monitor::initialize(MonitorConfig::default().with_hwpc_mode("FLOPS"));
        assert_eq!(monitor.hwpc_mode(), HwpcMode::User);
    }

    struct Backend {
        events: Vec<CounterEvent>,
        opened: Arc<AtomicUsize>,
        closed: Arc<Mutex<Vec<String>>>,
    }

    impl CounterBackend for Backend {
        fn events(&self) -> &[CounterEvent] {
            &self.events
        }
        fn open(&self, _label: &str) {
            self.opened.fetch_add(1, Ordering::Relaxed);
        }
        fn close(&self, label: &str) {
            self.closed
                .lock()
                .unwrap()
                .push(label.to_string());
        }
        fn read(&self, values: &mut [f64]) {
            values.iter_mut().for_each(|v| *v = 1.0);
        }
        fn derive(&self, _mode: HwpcMode, _sums: &[f64], _elapsed: f64) -> DerivedMetrics {
            DerivedMetrics {
                work: 42.0,
                percentage: 0.0,
            }
        }
    }

    #[test]
    fn test_backend_lifecycle() {
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(Mutex::new(Vec::new()));
        let backend = Backend {
            events: vec![CounterEvent::new("FP_OPS", "floating point operations")],
            opened: Arc::clone(&opened),
            closed: Arc::clone(&closed),
        };
        {
            let mut monitor = Monitor::builder(MonitorConfig::default().with_hwpc_mode("flops"))
                .with_backend(backend)
                .initialize();
            assert_eq!(monitor.hwpc_mode(), HwpcMode::Flops);
            monitor.start("kernel").unwrap();
            monitor.stop("kernel", 0.0, 1).unwrap();
            monitor.aggregate();
            let snapshot = monitor.snapshot().unwrap();
            assert_eq!(snapshot.get("kernel").unwrap().work_av, 42.0);

            let mut out = Vec::new();
            monitor.print_legend(&mut out).unwrap();
            assert!(String::from_utf8(out).unwrap().contains("FP_OPS"));
        }
        assert_eq!(opened.load(Ordering::Relaxed), 2);
        assert_eq!(
            *closed.lock().unwrap(),
            vec![ROOT_LABEL.to_string(), "kernel".to_string()]
        );
    }

    #[test]
    fn test_user_mode_drops_backend() {
        let backend = Backend {
            events: vec![],
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(Mutex::new(Vec::new())),
        };
        let monitor = Monitor::builder(MonitorConfig::default())
            .with_backend(backend)
            .initialize();
        let mut out = Vec::new();
        monitor.print_legend(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_reset_unknown() {
        let (mut monitor, _) = manual();
        assert!(matches!(
            monitor.reset("nope"),
            Err(MonitorError::UnknownLabel(_))
        ));
    }

    #[test]
    fn test_reset_all_restarts_running_root() {
        let (mut monitor, clock) = manual();
        monitor.start("warm up").unwrap();
        clock.advance(Duration::from_millis(5));
        monitor.stop("warm up", 0.0, 1).unwrap();

        monitor.reset_all();
        assert!(monitor
            .registry()
            .get(ROOT_ID)
            .unwrap()
            .is_running(current_slot()));

        monitor.start("a").unwrap();
        clock.advance(Duration::from_millis(2));
        monitor.stop("a", 0.0, 1).unwrap();
        clock.advance(Duration::from_millis(2));

        let report = monitor.basic_report("host", "", SortMode::Elapsed).unwrap();
        assert!((report.header.total_time - 0.004).abs() < 1e-9);
        let a = report.row("a").unwrap();
        assert!((a.time_pct - 50.0).abs() < 1e-6);
        assert!(report.row("warm up").is_none());
    }

    #[test]
    fn test_reset_of_stopped_root_keeps_it_stopped() {
        let (mut monitor, clock) = manual();
        clock.advance(Duration::from_millis(3));
        monitor.aggregate();

        monitor.reset(ROOT_LABEL).unwrap();
        clock.advance(Duration::from_millis(3));
        monitor.aggregate();

        let root = monitor.registry().get(ROOT_ID).unwrap();
        assert!(!root.is_running(current_slot()));
        assert_eq!(root.stats().count_sum, 0);
    }

    #[test]
    fn test_progress_keeps_root_running() {
        let (mut monitor, clock) = manual();
        monitor.start("a").unwrap();
        clock.advance(Duration::from_millis(3));
        monitor.stop("a", 0.0, 1).unwrap();
        let report = monitor.progress_report("step 1", SortMode::Elapsed).unwrap();
        assert!(report.progress);
        assert!((report.header.total_time - 0.003).abs() < 1e-9);
        assert!(monitor
            .registry()
            .get(ROOT_ID)
            .unwrap()
            .is_running(current_slot()));
    }

    #[test]
    fn test_set_parallel_mode_keeps_measured() {
        let (mut monitor, _) = manual();
        let before = *monitor.topology();
        monitor.set_parallel_mode(ParallelMode::Hybrid, 8, 4);
        assert_eq!(*monitor.topology(), before);
    }

    #[test]
    fn test_print_comm_single_rank() {
        let (mut monitor, clock) = manual();
        monitor.start("a").unwrap();
        clock.advance(Duration::from_millis(2));
        monitor.stop("a", 0.0, 1).unwrap();
        monitor.aggregate();
        let mut out = Vec::new();
        monitor
            .print_comm(&mut out, 7, false, SortMode::Elapsed)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Process Group [    0]"));
        assert!(text.contains("Label  a"));
    }

    #[test]
    fn test_print_threads_only_for_requested_rank() {
        let (mut monitor, _) = manual();
        monitor.start("a").unwrap();
        monitor.stop("a", 0.0, 1).unwrap();
        let mut out = Vec::new();
        monitor.print_threads(&mut out, 3, SortMode::Elapsed).unwrap();
        assert!(out.is_empty());
        monitor.print_threads(&mut out, 0, SortMode::Elapsed).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Thread Report"));
    }
}
