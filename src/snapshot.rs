//! Point-in-time copies of aggregated section statistics.
//!
//! A [`MonitorSnapshot`] is plain owned data, detached from the monitor. It
//! is what the JSON and Prometheus observers export, and with the `serde`
//! feature it can be written with any serde format.
//!
//! # Examples
//!
//! ```rust
//! use cronometri::{Monitor, MonitorConfig};
//!
//! let mut monitor = Monitor::initialize(MonitorConfig::default().with_threads(1));
//! monitor.start("step").unwrap();
//! monitor.stop("step", 1.0e6, 1).unwrap();
//! monitor.aggregate();
//!
//! let snapshot = monitor.snapshot().unwrap();
//! assert_eq!(snapshot.get("step").unwrap().count_sum, 1);
//! ```

use crate::hwpc::HwpcMode;
use crate::sections::watch::Watch;
use crate::sections::{SectionId, SectionKind};

/// Statistics of one section.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectionSnapshot {
    pub id: SectionId,
    pub label: String,
    pub kind: SectionKind,
    pub exclusive: bool,
    /// Average calls per active rank.
    pub calls: u64,
    pub count_sum: u64,
    pub time_av: f64,
    pub time_sd: f64,
    pub work_av: f64,
    pub work_sd: f64,
    pub percentage: f64,
    pub active_ranks: usize,
}

impl SectionSnapshot {
    pub(crate) fn from_watch(watch: &Watch) -> Self {
        let stats = watch.stats();
        Self {
            id: watch.id(),
            label: watch.label().to_string(),
            kind: watch.kind(),
            exclusive: watch.is_exclusive(),
            calls: stats.count_av,
            count_sum: stats.count_sum,
            time_av: stats.time_av,
            time_sd: stats.time_sd,
            work_av: stats.work_av,
            work_sd: stats.work_sd,
            percentage: stats.percentage,
            active_ranks: stats.active_ranks,
        }
    }
}

/// Statistics of every section of a monitor, in registration order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MonitorSnapshot {
    /// Milliseconds since the Unix epoch.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub timestamp_ms: Option<u64>,
    pub rank: usize,
    pub num_process: usize,
    pub num_threads: usize,
    pub hwpc: HwpcMode,
    pub sections: Vec<SectionSnapshot>,
}

impl MonitorSnapshot {
    /// Looks a section up by label.
    pub fn get(&self, label: &str) -> Option<&SectionSnapshot> {
        self.sections.iter().find(|s| s.label == label)
    }

    /// Sections that recorded at least one call.
    pub fn active(&self) -> impl Iterator<Item = &SectionSnapshot> {
        self.sections.iter().filter(|s| s.count_sum > 0)
    }

    /// Drops the timestamp, for reproducible output.
    pub fn without_timestamp(mut self) -> Self {
        self.timestamp_ms = None;
        self
    }
}

pub(crate) fn now_ms() -> Option<u64> {
    u64::try_from(chrono::Utc::now().timestamp_millis()).ok()
}
