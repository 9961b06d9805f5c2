//! Hardware performance counter modes and the pluggable counter backend.
//!
//! The monitor never reads hardware counters itself. A [`CounterBackend`]
//! snapshots its events when a section starts and stops, and turns the
//! accumulated deltas into a reported quantity at aggregation time. Without a
//! backend every run is in [`HwpcMode::User`] and the work reported for a
//! section is whatever the caller passed to `stop()`.
//!
//! # Units
//!
//! Every section reports its rate in one of eight interpretations, selected
//! by [`UnitKind`]:
//!
//! | Index | Unit | Source | Rate |
//! |-------|------|--------|------|
//! | 0 | [`UserBandwidth`](UnitKind::UserBandwidth) | `stop()` argument, COMM section | B/sec |
//! | 1 | [`UserFlops`](UnitKind::UserFlops) | `stop()` argument, CALC section | flops |
//! | 2 | [`Bandwidth`](UnitKind::Bandwidth) | backend | B/sec |
//! | 3 | [`Flops`](UnitKind::Flops) | backend | flops |
//! | 4 | [`Vector`](UnitKind::Vector) | backend | % |
//! | 5 | [`Cache`](UnitKind::Cache) | backend | % |
//! | 6 | [`Cycle`](UnitKind::Cycle) | backend | ips |
//! | 7 | [`LoadStore`](UnitKind::LoadStore) | backend | % |
//!
//! The unit is uniform across a run except in user mode, where the section
//! kind decides between 0 and 1.

use std::fmt::{self, Display};
use std::str::FromStr;

use crate::error::MonitorError;
use crate::sections::SectionKind;

const MEGA: f64 = 1.0e6;
const GIGA: f64 = 1.0e9;
const TERA: f64 = 1.0e12;
const PETA: f64 = 1.0e15;

/// The counter mode selected for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "UPPERCASE"))]
pub enum HwpcMode {
    /// Work is declared by the caller.
    #[default]
    User,
    /// Floating point operations.
    Flops,
    /// Memory and last level cache traffic.
    Bandwidth,
    /// Share of vectorized floating point operations.
    Vector,
    /// L1 and L2 hit ratio.
    Cache,
    /// Instructions per second.
    Cycle,
    /// Share of vectorized load and store instructions.
    #[cfg_attr(feature = "serde", serde(rename = "LOADSTORE"))]
    LoadStore,
}

impl HwpcMode {
    /// All modes, in the order they are listed in reports.
    pub const ALL: [HwpcMode; 7] = [
        HwpcMode::User,
        HwpcMode::Flops,
        HwpcMode::Bandwidth,
        HwpcMode::Vector,
        HwpcMode::Cache,
        HwpcMode::Cycle,
        HwpcMode::LoadStore,
    ];

    /// Returns `true` if the mode needs a counter backend.
    pub fn is_hardware(&self) -> bool {
        !matches!(self, HwpcMode::User)
    }

    /// Returns the reporting unit of a section of the given kind.
    pub fn unit_for(&self, kind: SectionKind) -> UnitKind {
        match self {
            HwpcMode::User => match kind {
                SectionKind::Communication => UnitKind::UserBandwidth,
                SectionKind::Computation => UnitKind::UserFlops,
            },
            HwpcMode::Bandwidth => UnitKind::Bandwidth,
            HwpcMode::Flops => UnitKind::Flops,
            HwpcMode::Vector => UnitKind::Vector,
            HwpcMode::Cache => UnitKind::Cache,
            HwpcMode::Cycle => UnitKind::Cycle,
            HwpcMode::LoadStore => UnitKind::LoadStore,
        }
    }

    /// Returns the canonical upper case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HwpcMode::User => "USER",
            HwpcMode::Flops => "FLOPS",
            HwpcMode::Bandwidth => "BANDWIDTH",
            HwpcMode::Vector => "VECTOR",
            HwpcMode::Cache => "CACHE",
            HwpcMode::Cycle => "CYCLE",
            HwpcMode::LoadStore => "LOADSTORE",
        }
    }
}

impl Display for HwpcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HwpcMode {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        HwpcMode::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| MonitorError::UnknownHwpcMode(wanted.to_string()))
    }
}

/// Trailer category a section's subtotal is booked under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Category {
    /// User declared communication volume.
    Comm,
    /// User declared operation counts.
    Calc,
    /// Backend counted events.
    Hwpc,
}

impl Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Comm => "COMM",
            Category::Calc => "CALC",
            Category::Hwpc => "HWPC",
        })
    }
}

/// How a section's work and rate are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum UnitKind {
    UserBandwidth = 0,
    UserFlops = 1,
    Bandwidth = 2,
    Flops = 3,
    Vector = 4,
    Cache = 5,
    Cycle = 6,
    LoadStore = 7,
}

impl UnitKind {
    /// Numeric selector, 0 to 7.
    pub fn index(&self) -> u8 {
        *self as u8
    }

    /// Returns `true` when the rate is a percentage rather than a throughput.
    pub fn is_percentage(&self) -> bool {
        matches!(self, UnitKind::Vector | UnitKind::Cache | UnitKind::LoadStore)
    }

    /// Returns the trailer category.
    pub fn category(&self) -> Category {
        match self {
            UnitKind::UserBandwidth => Category::Comm,
            UnitKind::UserFlops => Category::Calc,
            _ => Category::Hwpc,
        }
    }

    /// Scales a raw rate and names its unit.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cronometri::hwpc::UnitKind;
    ///
    /// assert_eq!(UnitKind::UserFlops.scale(2.5e9), (2.5, "Gflops"));
    /// assert_eq!(UnitKind::UserBandwidth.scale(3.0e6), (3.0, "MB/sec"));
    /// assert_eq!(UnitKind::Vector.scale(42.0), (42.0, "(%)"));
    /// ```
    pub fn scale(&self, rate: f64) -> (f64, &'static str) {
        if self.is_percentage() {
            return (rate, "(%)");
        }
        let units: [&'static str; 4] = match self {
            UnitKind::UserBandwidth | UnitKind::Bandwidth => {
                ["MB/sec", "GB/sec", "TB/sec", "PB/sec"]
            }
            UnitKind::Cycle => ["Mips", "Gips", "Tips", "Pips"],
            _ => ["Mflops", "Gflops", "Tflops", "Pflops"],
        };
        if rate > PETA {
            (rate / PETA, units[3])
        } else if rate > TERA {
            (rate / TERA, units[2])
        } else if rate > GIGA {
            (rate / GIGA, units[1])
        } else {
            (rate / MEGA, units[0])
        }
    }

    /// Header describing what the work column holds.
    pub fn column_header(&self) -> &'static str {
        match self {
            UnitKind::UserBandwidth | UnitKind::UserFlops => "user defined numerical performance",
            UnitKind::Bandwidth => "hardware counted data access events",
            UnitKind::Flops => "hardware counted floating point ops.",
            UnitKind::Vector => "hardware vectorized floating point ops.",
            UnitKind::Cache => "hardware counted cache utilization",
            UnitKind::Cycle => "hardware counted total instructions",
            UnitKind::LoadStore => "memory load and store instruction type",
        }
    }

    /// Name of the work column.
    pub fn work_header(&self) -> &'static str {
        match self {
            UnitKind::UserBandwidth | UnitKind::UserFlops => "operations",
            UnitKind::Bandwidth => "Bytes",
            UnitKind::Flops | UnitKind::Vector => "f.p.ops",
            UnitKind::Cache | UnitKind::LoadStore => "load+store",
            UnitKind::Cycle => "instructions",
        }
    }

    /// Name of the rate column.
    pub fn rate_header(&self) -> &'static str {
        match self {
            UnitKind::Bandwidth => "Mem+LLC bandwidth",
            UnitKind::Vector | UnitKind::LoadStore => "vectorized%",
            UnitKind::Cache => "L1+L2 hit%",
            _ => "performance",
        }
    }
}

impl TryFrom<u8> for UnitKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => UnitKind::UserBandwidth,
            1 => UnitKind::UserFlops,
            2 => UnitKind::Bandwidth,
            3 => UnitKind::Flops,
            4 => UnitKind::Vector,
            5 => UnitKind::Cache,
            6 => UnitKind::Cycle,
            7 => UnitKind::LoadStore,
            other => return Err(other),
        })
    }
}

/// One event a backend reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterEvent {
    /// Short name shown in table headers.
    pub name: String,
    /// Legend text.
    pub description: String,
}

impl CounterEvent {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// What a backend derives from a section's accumulated counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DerivedMetrics {
    /// Replaces the caller declared work.
    pub work: f64,
    /// Ratio reported by the percentage units.
    pub percentage: f64,
}

/// A source of hardware performance counters.
///
/// `read` fills one value per entry of [`events`](CounterBackend::events).
/// The monitor reads at `start()` and `stop()` and accumulates the
/// difference for the calling thread.
pub trait CounterBackend: Send + Sync {
    /// Events read by this backend, in `read` order.
    fn events(&self) -> &[CounterEvent];

    /// Called once when a section is declared.
    fn open(&self, _label: &str) {}

    /// Called once per section when the monitor is dropped.
    fn close(&self, _label: &str) {}

    /// Reads the current value of every event.
    fn read(&self, values: &mut [f64]);

    /// Turns accumulated counter deltas into the reported quantities.
    fn derive(&self, mode: HwpcMode, sums: &[f64], elapsed: f64) -> DerivedMetrics;

    /// Legend lines describing the events and derived quantities.
    fn legend(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|event| format!("{:<12} : {}", event.name, event.description))
            .collect()
    }
}
