//! A single measured section.
//!
//! [`Watch`] owns the start/stop state machine of one section for every
//! thread of the process, and the statistics derived from it. Updates on the
//! measurement path go through `&self` and only touch the caller's slot;
//! aggregation steps take `&mut self` and run once the threads are done.
//!
//! The first [`NUM_SLOTS`] slots are preallocated. Higher slot indices live
//! in an overflow map created on first use, so every live thread keeps a
//! record of its own however many threads the process runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use atomic_time::AtomicOptionDuration;
use crossbeam_utils::CachePadded;

use super::{SectionId, SectionKind, NUM_SLOTS};
use crate::aggregate::mean_sd;
use crate::comm::Communicator;
use crate::error::{MonitorError, Result};
use crate::hwpc::{CounterBackend, HwpcMode};

/// Number of leading fields of a gathered record before the counters.
pub(crate) const GATHER_HEADER: usize = 4;

#[derive(Debug, Default)]
struct CounterState {
    at_start: Vec<f64>,
    sums: Vec<f64>,
}

/// Measurement state of one section on one thread.
struct Slot {
    /// Offset of the pending `start()` from the monitor epoch.
    started_at: AtomicOptionDuration,
    count: AtomicU64,
    elapsed_ns: AtomicU64,
    work: AtomicU64,
    last_work: AtomicU64,
    last_multiplier: AtomicU32,
    counters: Mutex<CounterState>,
}

impl Slot {
    fn idle() -> Self {
        Slot {
            started_at: AtomicOptionDuration::new(None),
            count: AtomicU64::new(0),
            elapsed_ns: AtomicU64::new(0),
            work: AtomicU64::new(0.0_f64.to_bits()),
            last_work: AtomicU64::new(0.0_f64.to_bits()),
            last_multiplier: AtomicU32::new(1),
            counters: Mutex::new(CounterState::default()),
        }
    }

    fn lock_counters(&self) -> MutexGuard<'_, CounterState> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn add_work(&self, amount: f64) {
        // Only the owning thread writes here, the loop never spins in practice.
        let _ = self
            .work
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + amount).to_bits())
            });
    }

    fn totals(&self) -> Totals {
        Totals {
            count: self.count.load(Ordering::Relaxed),
            time: Duration::from_nanos(self.elapsed_ns.load(Ordering::Relaxed)).as_secs_f64(),
            work: f64::from_bits(self.work.load(Ordering::Relaxed)),
            percentage: 0.0,
            counters: self.lock_counters().sums.clone(),
        }
    }

    fn clear(&mut self) {
        *self = Slot::idle();
    }
}

/// Accumulated values of a section, for one thread, one process or one rank.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Totals {
    /// Completed `start()`/`stop()` pairs.
    pub count: u64,
    /// Accumulated elapsed time in seconds.
    pub time: f64,
    /// Accumulated work: declared by the caller, or derived from counters.
    pub work: f64,
    /// Derived ratio for the percentage units.
    pub percentage: f64,
    /// Accumulated counter deltas, one per backend event.
    pub counters: Vec<f64>,
}

impl Totals {
    fn to_record(&self, width: usize) -> Vec<f64> {
        let mut record = Vec::with_capacity(width);
        record.extend([self.count as f64, self.time, self.work, self.percentage]);
        record.extend(self.counters.iter().copied());
        record.resize(width, 0.0);
        record
    }

    fn from_record(record: &[f64]) -> Self {
        let field = |i: usize| record.get(i).copied().unwrap_or_default();
        Totals {
            count: field(0).max(0.0).round() as u64,
            time: field(1),
            work: field(2),
            percentage: field(3),
            counters: record.get(GATHER_HEADER..).unwrap_or_default().to_vec(),
        }
    }

    fn fold(&mut self, other: &Totals) {
        self.count += other.count;
        self.time = self.time.max(other.time);
        self.work += other.work;
        if self.counters.len() < other.counters.len() {
            self.counters.resize(other.counters.len(), 0.0);
        }
        for (sum, value) in self.counters.iter_mut().zip(&other.counters) {
            *sum += value;
        }
    }
}

/// Statistics across ranks, valid after aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SectionStats {
    /// Mean time over ranks that entered the section.
    pub time_av: f64,
    /// Sample standard deviation of the time.
    pub time_sd: f64,
    /// Mean call count, rounded.
    pub count_av: u64,
    /// Total calls over all ranks.
    pub count_sum: u64,
    pub work_av: f64,
    pub work_sd: f64,
    /// Mean derived ratio.
    pub percentage: f64,
    /// Ranks with at least one call.
    pub active_ranks: usize,
}

/// One registered section.
pub struct Watch {
    id: SectionId,
    label: String,
    kind: SectionKind,
    exclusive: bool,
    slots: Box<[CachePadded<Slot>]>,
    overflow: Mutex<BTreeMap<usize, Arc<CachePadded<Slot>>>>,
    merged: Totals,
    ranks: Vec<Totals>,
    stats: SectionStats,
}

impl Watch {
    pub fn new(id: SectionId, label: impl Into<String>, kind: SectionKind, exclusive: bool) -> Self {
        Watch {
            id,
            label: label.into(),
            kind,
            exclusive,
            slots: (0..NUM_SLOTS)
                .map(|_| CachePadded::new(Slot::idle()))
                .collect(),
            overflow: Mutex::new(BTreeMap::new()),
            merged: Totals::default(),
            ranks: Vec::new(),
            stats: SectionStats::default(),
        }
    }

    fn lock_overflow(&self) -> MutexGuard<'_, BTreeMap<usize, Arc<CachePadded<Slot>>>> {
        self.overflow.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` on the slot with index `slot`, creating an overflow slot if
    /// the index is past the preallocated ones.
    fn with_slot<R>(&self, slot: usize, f: impl FnOnce(&Slot) -> R) -> R {
        if let Some(s) = self.slots.get(slot) {
            return f(&**s);
        }
        let s = Arc::clone(
            self.lock_overflow()
                .entry(slot)
                .or_insert_with(|| Arc::new(CachePadded::new(Slot::idle()))),
        );
        f(&**s)
    }

    /// Totals of every slot that recorded calls, by slot index.
    fn slot_totals(&self) -> Vec<(usize, Totals)> {
        let mut all: Vec<(usize, Totals)> = self
            .slots
            .iter()
            .enumerate()
            .map(|(idx, slot)| (idx, slot.totals()))
            .collect();
        all.extend(
            self.lock_overflow()
                .iter()
                .map(|(&idx, slot)| (idx, slot.totals())),
        );
        all.retain(|(_, totals)| totals.count > 0);
        all
    }

    pub fn id(&self) -> SectionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    /// Returns `true` if the section's time counts toward the job total.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Returns `true` if a `start()` is pending on the given slot.
    pub fn is_running(&self, slot: usize) -> bool {
        self.with_slot(slot, |s| s.started_at.load(Ordering::Relaxed).is_some())
    }

    /// Work and multiplier passed to the last `stop()` on the given slot.
    pub fn last_call(&self, slot: usize) -> (f64, u32) {
        self.with_slot(slot, |s| {
            (
                f64::from_bits(s.last_work.load(Ordering::Relaxed)),
                s.last_multiplier.load(Ordering::Relaxed),
            )
        })
    }

    /// Per-process totals from the last [`merge_threads`](Self::merge_threads).
    pub fn merged(&self) -> &Totals {
        &self.merged
    }

    /// Per-rank totals from the last [`gather`](Self::gather).
    ///
    /// On rank 0 there is one entry per rank; elsewhere only the local one.
    pub fn ranks(&self) -> &[Totals] {
        &self.ranks
    }

    pub fn stats(&self) -> &SectionStats {
        &self.stats
    }

    /// Starts the clock on `slot`.
    ///
    /// A section already running on that slot is restarted and
    /// [`MonitorError::AlreadyRunning`] is returned.
    pub fn start(
        &self,
        slot: usize,
        now: Duration,
        backend: Option<&dyn CounterBackend>,
    ) -> Result<()> {
        self.with_slot(slot, |s| self.start_slot(s, now, backend))
    }

    fn start_slot(&self, s: &Slot, now: Duration, backend: Option<&dyn CounterBackend>) -> Result<()> {
        let was_running = s.started_at.load(Ordering::Relaxed).is_some();

        if let Some(backend) = backend {
            let mut state = s.lock_counters();
            state.at_start.resize(backend.events().len(), 0.0);
            backend.read(&mut state.at_start);
        }
        s.started_at.store(Some(now), Ordering::Relaxed);

        if was_running {
            Err(MonitorError::AlreadyRunning(self.label.clone()))
        } else {
            Ok(())
        }
    }

    /// Stops the clock on `slot` and accumulates the call.
    ///
    /// `work * multiplier` is added to the declared work. Returns the
    /// elapsed time of this call.
    pub fn stop(
        &self,
        slot: usize,
        now: Duration,
        work: f64,
        multiplier: u32,
        backend: Option<&dyn CounterBackend>,
    ) -> Result<Duration> {
        self.with_slot(slot, |s| self.stop_slot(s, now, work, multiplier, backend))
    }

    fn stop_slot(
        &self,
        s: &Slot,
        now: Duration,
        work: f64,
        multiplier: u32,
        backend: Option<&dyn CounterBackend>,
    ) -> Result<Duration> {
        let Some(started) = s.started_at.load(Ordering::Relaxed) else {
            return Err(MonitorError::NotRunning(self.label.clone()));
        };
        let elapsed = now.saturating_sub(started);

        if let Some(backend) = backend {
            let n = backend.events().len();
            let mut current = vec![0.0; n];
            backend.read(&mut current);
            let mut state = s.lock_counters();
            let CounterState { at_start, sums } = &mut *state;
            at_start.resize(n, 0.0);
            sums.resize(n, 0.0);
            for ((sum, after), before) in sums.iter_mut().zip(&current).zip(at_start.iter()) {
                *sum += after - before;
            }
        }

        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        s.count.fetch_add(1, Ordering::Relaxed);
        s.elapsed_ns.fetch_add(nanos, Ordering::Relaxed);
        s.last_work.store(work.to_bits(), Ordering::Relaxed);
        s.last_multiplier.store(multiplier, Ordering::Relaxed);
        s.add_work(work * f64::from(multiplier));
        s.started_at.store(None, Ordering::Relaxed);
        Ok(elapsed)
    }

    /// Zeroes every accumulator. Identity and classification are kept.
    pub fn reset(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.clear();
        }
        self.overflow
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.merged = Totals::default();
        self.ranks.clear();
        self.stats = SectionStats::default();
    }

    /// Folds the thread slots into one per-process value.
    ///
    /// Calls and work add up; the elapsed time is that of the slowest
    /// thread, since threads of one region share the wall clock.
    pub fn merge_threads(&mut self) {
        let mut merged = Totals::default();
        for (_, totals) in self.slot_totals() {
            merged.fold(&totals);
        }
        self.merged = merged;
    }

    /// Per-slot totals of the slots that recorded calls.
    pub fn thread_totals(&self) -> Vec<(usize, Totals)> {
        self.slot_totals()
    }

    /// Replaces the declared work by the backend's derived quantity.
    pub fn derive_counters(&mut self, mode: HwpcMode, backend: Option<&dyn CounterBackend>) {
        match backend {
            Some(backend) if mode.is_hardware() => {
                let derived = backend.derive(mode, &self.merged.counters, self.merged.time);
                self.merged.work = derived.work;
                self.merged.percentage = derived.percentage;
            }
            _ => self.merged.percentage = 0.0,
        }
    }

    /// Collects the per-process totals of every rank on rank 0.
    ///
    /// Collective: every rank must call it with the same `width`.
    pub fn gather(&mut self, comm: &dyn Communicator, width: usize) {
        let record = self.merged.to_record(width.max(GATHER_HEADER));
        self.ranks = match comm.gather(&record) {
            Some(all) => all
                .chunks(record.len())
                .map(Totals::from_record)
                .collect(),
            None => vec![self.merged.clone()],
        };
    }

    /// Mean and standard deviation over the ranks that entered the section.
    pub fn stats_average(&mut self) {
        let active: Vec<&Totals> = self.ranks.iter().filter(|r| r.count > 0).collect();
        let n = active.len();

        let (time_av, time_sd) = mean_sd(active.iter().map(|r| r.time));
        let (work_av, work_sd) = mean_sd(active.iter().map(|r| r.work));
        let (percentage, _) = mean_sd(active.iter().map(|r| r.percentage));
        let count_sum: u64 = active.iter().map(|r| r.count).sum();
        let count_av = if n == 0 {
            0
        } else {
            (count_sum as f64 / n as f64).round() as u64
        };

        self.stats = SectionStats {
            time_av,
            time_sd,
            count_av,
            count_sum,
            work_av,
            work_sd,
            percentage,
            active_ranks: n,
        };
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("exclusive", &self.exclusive)
            .field("stats", &self.stats)
            .finish()
    }
}
