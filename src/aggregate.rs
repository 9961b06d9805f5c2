//! Thread merge, cross-process gather, statistics and display order.
//!
//! Aggregation runs in a fixed order, each step feeding the next:
//!
//! 1. [`Aggregator::merge_threads`] folds the thread slots of every section
//!    into a per-process value.
//! 2. [`Aggregator::gather_and_stats`] derives backend metrics, gathers the
//!    per-process values on rank 0 and computes mean and deviation.
//! 3. [`Aggregator::sort`] rebuilds the display order.
//!
//! Every step reads the accumulators without consuming them, so the
//! pipeline can be re-run at any time and yields the same result when no
//! section was timed in between.

use num_traits::Float;

use crate::comm::Communicator;
use crate::error::resource_exhausted;
use crate::hwpc::{CounterBackend, HwpcMode};
use crate::sections::registry::Registry;
use crate::sections::watch::GATHER_HEADER;
use crate::sections::SectionId;

/// Row order of the reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SortMode {
    /// Descending average time.
    #[default]
    Elapsed,
    /// Registration order.
    Registration,
}

impl SortMode {
    /// Maps the numeric selector used by report calls: 0 is elapsed time,
    /// anything else is registration order.
    pub fn from_index(index: u32) -> Self {
        if index == 0 {
            SortMode::Elapsed
        } else {
            SortMode::Registration
        }
    }
}

/// Mean and sample standard deviation.
///
/// An empty input yields zeros; a single value has no deviation.
pub fn mean_sd<T, I>(values: I) -> (T, T)
where
    T: Float,
    I: IntoIterator<Item = T>,
{
    let mut n = T::zero();
    let mut sum = T::zero();
    let mut sum_sq = T::zero();
    for v in values {
        n = n + T::one();
        sum = sum + v;
        sum_sq = sum_sq + v * v;
    }
    if n == T::zero() {
        return (T::zero(), T::zero());
    }
    let mean = sum / n;
    if n == T::one() {
        return (mean, T::zero());
    }
    let var = (sum_sq - n * mean * mean) / (n - T::one());
    (mean, var.max(T::zero()).sqrt())
}

/// Owns the display order and drives the aggregation passes.
#[derive(Debug, Default, Clone)]
pub struct Aggregator {
    order: Vec<SectionId>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds thread slots of every section.
    pub fn merge_threads(&self, registry: &mut Registry) {
        for watch in registry.iter_mut() {
            watch.merge_threads();
        }
    }

    /// Derives counter metrics, gathers on rank 0 and computes statistics.
    ///
    /// Collective over `comm`.
    pub fn gather_and_stats(
        &self,
        registry: &mut Registry,
        comm: &dyn Communicator,
        mode: HwpcMode,
        backend: Option<&dyn CounterBackend>,
    ) {
        if registry.is_empty() {
            return;
        }
        let width = GATHER_HEADER + backend.map_or(0, |b| b.events().len());

        for watch in registry.iter_mut() {
            watch.derive_counters(mode, backend);
        }
        for watch in registry.iter_mut() {
            watch.gather(comm, width);
        }
        for watch in registry.iter_mut() {
            watch.stats_average();
        }
    }

    /// Rebuilds the display order: descending average time, sections never
    /// called weigh zero, ties keep registration order.
    pub fn sort(&mut self, registry: &Registry) {
        self.order = ranked(registry);
    }

    /// The display order from the last sort.
    pub fn order(&self) -> &[SectionId] {
        &self.order
    }

    /// Ids in the requested order.
    ///
    /// When sections were registered after the last sort, the elapsed
    /// order is recomputed from the current statistics.
    pub fn ids(&self, mode: SortMode, registry: &Registry) -> Vec<SectionId> {
        match mode {
            SortMode::Elapsed if self.order.len() == registry.len() => self.order.clone(),
            SortMode::Elapsed => ranked(registry),
            SortMode::Registration => (0..registry.len()).collect(),
        }
    }
}

/// Section ids by descending average time. Ties keep registration order.
fn ranked(registry: &Registry) -> Vec<SectionId> {
    let n = registry.len();
    let mut order = Vec::new();
    if let Err(err) = order.try_reserve_exact(n) {
        resource_exhausted("section order", err);
    }
    order.extend(0..n);

    let cost = |id: &SectionId| {
        registry
            .get(*id)
            .map(|w| w.stats())
            .filter(|s| s.count_sum > 0)
            .map_or(0.0, |s| s.time_av)
    };
    order.sort_by(|a, b| cost(b).total_cmp(&cost(a)));
    order
}
