//! Structured reports assembled from aggregated sections.
//!
//! The builders here only compute: they turn the registry, the display order
//! and the run configuration into plain data. Rendering to text is the job
//! of [`TableObserver`](crate::observers::table::TableObserver); the same
//! data can be inspected directly or serialized.
//!
//! | Report | Rows | Denominator |
//! |--------|------|-------------|
//! | [`BasicReport`] | every section with calls, root excluded | root average time |
//! | [`BasicReport`] (progress) | same | sum of exclusive average times |
//! | [`DetailReport`] | exclusive sections, one row per rank | root average time |
//! | [`ThreadReport`] | exclusive sections with calls, one row per thread slot | root average time |

use std::fmt::{self, Display};

use crate::hwpc::{Category, CounterBackend, HwpcMode, UnitKind};
use crate::sections::registry::Registry;
use crate::sections::watch::{Totals, Watch};
use crate::sections::{SectionId, SectionKind, ROOT_ID};
use crate::topology::{ParallelMode, Topology};

/// Run description printed above the section table.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ReportHeader {
    pub version: String,
    /// Optional capabilities compiled in or active for this run.
    pub features: Vec<String>,
    pub hostname: String,
    /// Local time the report was produced.
    pub timestamp: String,
    pub comment: String,
    pub parallel_mode: ParallelMode,
    /// Process and thread layout, e.g. `Hybrid (4 processes x 8 threads)`.
    pub layout: String,
    pub hwpc: HwpcMode,
    /// Denominator of the percentage column, in seconds.
    pub total_time: f64,
    /// Registered sections, root included.
    pub sections: usize,
}

impl ReportHeader {
    pub(crate) fn new(
        topology: &Topology,
        hwpc: HwpcMode,
        backend_active: bool,
        hostname: &str,
        comment: &str,
        total_time: f64,
        sections: usize,
    ) -> Self {
        let mut features = Vec::new();
        if cfg!(feature = "json") {
            features.push("json".to_string());
        }
        if cfg!(feature = "prometheus") {
            features.push("prometheus".to_string());
        }
        if backend_active {
            features.push("hwpc".to_string());
        }
        if topology.num_threads > 1 {
            features.push("threads".to_string());
        }
        if topology.num_process > 1 {
            features.push("multi-process".to_string());
        }

        ReportHeader {
            version: crate::VERSION.to_string(),
            features,
            hostname: if hostname.is_empty() {
                detect_hostname()
            } else {
                hostname.to_string()
            },
            timestamp: chrono::Local::now().format("%Y/%m/%d : %H:%M:%S").to_string(),
            comment: comment.to_string(),
            parallel_mode: topology.mode,
            layout: topology.describe(),
            hwpc,
            total_time,
            sections,
        }
    }
}

/// Best effort host name: `$HOSTNAME`, then `/etc/hostname`.
pub fn detect_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// One line of the basic report.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SectionRow {
    pub id: SectionId,
    pub label: String,
    pub kind: SectionKind,
    pub exclusive: bool,
    pub unit: UnitKind,
    /// Average calls per active rank.
    pub calls: u64,
    pub time_av: f64,
    /// Share of the report denominator, in percent.
    pub time_pct: f64,
    pub time_sd: f64,
    pub time_per_call: f64,
    pub work_av: f64,
    pub work_sd: f64,
    /// Rate after unit scaling.
    pub rate: f64,
    pub rate_unit: &'static str,
}

impl SectionRow {
    /// Label as printed, with `(*)` marking non-exclusive sections.
    pub fn display_label(&self) -> String {
        if self.exclusive {
            self.label.clone()
        } else {
            format!("{}(*)", self.label)
        }
    }
}

/// Whether a subtotal covers one process or the whole job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Scope {
    PerProcess,
    Job,
}

impl Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::PerProcess => "Sections per process",
            Scope::Job => "Sections total job",
        })
    }
}

/// Trailer line summing the exclusive sections of one category.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Subtotal {
    pub scope: Scope,
    pub category: Category,
    pub time: f64,
    pub work: f64,
    pub rate: f64,
    pub rate_unit: &'static str,
}

/// Raw sums of the exclusive rows, before the trailer is laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CategorySums {
    pub time_comm: f64,
    pub work_comm: f64,
    /// Time of every non-communication exclusive section.
    pub time_flop: f64,
    pub work_flop: f64,
    /// Work weighted by percentage, for the percentage units.
    pub other: f64,
}

/// Summary of all sections.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BasicReport {
    pub header: ReportHeader,
    /// `true` for a mid-run report that left the root section running.
    pub progress: bool,
    /// Unit of the run, used for column headers.
    pub unit: UnitKind,
    pub rows: Vec<SectionRow>,
    pub sums: CategorySums,
    pub subtotals: Vec<Subtotal>,
}

impl BasicReport {
    /// Looks a row up by label.
    pub fn row(&self, label: &str) -> Option<&SectionRow> {
        self.rows.iter().find(|row| row.label == label)
    }

    /// Per-process subtotal of a category, if it was emitted.
    pub fn subtotal(&self, scope: Scope, category: Category) -> Option<&Subtotal> {
        self.subtotals
            .iter()
            .find(|s| s.scope == scope && s.category == category)
    }
}

/// One rank of one section in the detail report.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RankRow {
    pub rank: usize,
    pub calls: u64,
    pub time: f64,
    pub time_pct: f64,
    pub time_per_call: f64,
    pub work: f64,
    pub rate: f64,
    pub rate_unit: &'static str,
}

/// Accumulated counter values per rank for one section.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CounterTable {
    pub events: Vec<String>,
    /// `(rank, values)` in event order.
    pub rows: Vec<(usize, Vec<f64>)>,
}

/// Per-rank breakdown of one section.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SectionDetail {
    pub label: String,
    pub unit: UnitKind,
    pub ranks: Vec<RankRow>,
    pub counters: Option<CounterTable>,
}

/// Per-rank report, for the whole job or a group of ranks.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DetailReport {
    pub title: String,
    /// Ranks included, in ascending order.
    pub members: Vec<usize>,
    pub sections: Vec<SectionDetail>,
    pub legend: Option<Vec<String>>,
}

impl DetailReport {
    pub fn section(&self, label: &str) -> Option<&SectionDetail> {
        self.sections.iter().find(|s| s.label == label)
    }
}

/// One thread slot of one section.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ThreadRow {
    pub slot: usize,
    pub calls: u64,
    pub time: f64,
    pub time_pct: f64,
    pub work: f64,
    pub rate: f64,
    pub rate_unit: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ThreadSection {
    pub label: String,
    pub threads: Vec<ThreadRow>,
}

/// Per-thread breakdown of the calling rank.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ThreadReport {
    pub title: String,
    pub rank: usize,
    pub sections: Vec<ThreadSection>,
}

/// Inputs shared by every builder.
pub(crate) struct Frame<'a> {
    pub registry: &'a Registry,
    pub order: Vec<SectionId>,
    pub mode: HwpcMode,
    pub topology: &'a Topology,
}

impl<'a> Frame<'a> {
    fn watches(&self) -> impl Iterator<Item = &'a Watch> + '_ {
        let registry = self.registry;
        self.order
            .iter()
            .filter(|&&id| id != ROOT_ID)
            .filter_map(move |&id| registry.get(id))
    }

    fn unit_of(&self, watch: &Watch) -> UnitKind {
        self.mode.unit_for(watch.kind())
    }

    /// Average time of the root section.
    pub fn root_time(&self) -> f64 {
        self.registry
            .get(ROOT_ID)
            .map_or(0.0, |root| root.stats().time_av)
    }

    /// Sum of the average times of the exclusive sections.
    pub fn exclusive_time(&self) -> f64 {
        self.registry
            .iter()
            .filter(|w| w.id() != ROOT_ID && w.is_exclusive())
            .map(|w| w.stats().time_av)
            .sum()
    }
}

fn percent(part: f64, total: f64) -> f64 {
    if total > 0.0 {
        100.0 * part / total
    } else {
        0.0
    }
}

/// Unscaled rate of one set of totals.
fn raw_rate(unit: UnitKind, calls: u64, time: f64, work: f64, percentage: f64) -> f64 {
    if time == 0.0 {
        0.0
    } else if unit.is_percentage() {
        percentage
    } else if calls == 0 {
        0.0
    } else {
        work / time
    }
}

/// Builds the summary table.
pub(crate) fn basic(frame: &Frame<'_>, header: ReportHeader, progress: bool) -> BasicReport {
    let tot = header.total_time;
    let num_process = frame.topology.num_process as f64;
    let mut sums = CategorySums::default();
    let mut rows = Vec::new();

    for watch in frame.watches() {
        let stats = watch.stats();
        if stats.count_sum == 0 {
            continue;
        }
        let unit = frame.unit_of(watch);

        let time_per_call = if stats.count_av != 0 {
            stats.time_av / stats.count_av as f64
        } else {
            num_process * stats.time_av / stats.count_sum as f64
        };
        let raw = raw_rate(
            unit,
            stats.count_av,
            stats.time_av,
            stats.work_av,
            stats.percentage,
        );
        let (rate, rate_unit) = unit.scale(raw);

        if watch.is_exclusive() {
            match unit.category() {
                Category::Comm => {
                    sums.time_comm += stats.time_av;
                    sums.work_comm += stats.work_av;
                }
                Category::Calc | Category::Hwpc => {
                    sums.time_flop += stats.time_av;
                    sums.work_flop += stats.work_av;
                    if unit.is_percentage() {
                        sums.other += stats.work_av * rate;
                    }
                }
            }
        }

        rows.push(SectionRow {
            id: watch.id(),
            label: watch.label().to_string(),
            kind: watch.kind(),
            exclusive: watch.is_exclusive(),
            unit,
            calls: stats.count_av,
            time_av: stats.time_av,
            time_pct: percent(stats.time_av, tot),
            time_sd: stats.time_sd,
            time_per_call,
            work_av: stats.work_av,
            work_sd: stats.work_sd,
            rate,
            rate_unit,
        });
    }

    let unit = frame.mode.unit_for(SectionKind::Computation);
    let subtotals = subtotals(unit, &sums, frame.topology.num_process);
    BasicReport {
        header,
        progress,
        unit,
        rows,
        sums,
        subtotals,
    }
}

/// Lays out the trailer: one line per category with time, per process and
/// for the whole job.
fn subtotals(unit: UnitKind, sums: &CategorySums, num_process: usize) -> Vec<Subtotal> {
    let np = num_process as f64;
    let mut lines = Vec::new();

    for scope in [Scope::PerProcess, Scope::Job] {
        let factor = if scope == Scope::Job { np } else { 1.0 };
        match unit.category() {
            Category::Comm | Category::Calc => {
                let buckets = [
                    (Category::Comm, UnitKind::UserBandwidth, sums.time_comm, sums.work_comm),
                    (Category::Calc, UnitKind::UserFlops, sums.time_flop, sums.work_flop),
                ];
                for (category, bucket_unit, time, work) in buckets {
                    if time > 0.0 {
                        let work = factor * work;
                        let (rate, rate_unit) = bucket_unit.scale(work / time);
                        lines.push(Subtotal {
                            scope,
                            category,
                            time,
                            work,
                            rate,
                            rate_unit,
                        });
                    }
                }
            }
            Category::Hwpc => {
                if sums.time_flop > 0.0 {
                    let work = factor * sums.work_flop;
                    let raw = if unit.is_percentage() {
                        if sums.work_flop > 0.0 {
                            sums.other / sums.work_flop
                        } else {
                            0.0
                        }
                    } else {
                        work / sums.time_flop
                    };
                    let (rate, rate_unit) = unit.scale(raw);
                    lines.push(Subtotal {
                        scope,
                        category: Category::Hwpc,
                        time: sums.time_flop,
                        work,
                        rate,
                        rate_unit,
                    });
                }
            }
        }
    }
    lines
}

fn rank_row(unit: UnitKind, rank: usize, totals: &Totals, tot: f64) -> RankRow {
    let raw = raw_rate(
        unit,
        totals.count,
        totals.time,
        totals.work,
        totals.percentage,
    );
    let (rate, rate_unit) = unit.scale(raw);
    RankRow {
        rank,
        calls: totals.count,
        time: totals.time,
        time_pct: percent(totals.time, tot),
        time_per_call: if totals.count > 0 {
            totals.time / totals.count as f64
        } else {
            0.0
        },
        work: totals.work,
        rate,
        rate_unit,
    }
}

/// Builds the per-rank report, restricted to `members` when given.
pub(crate) fn detail(
    frame: &Frame<'_>,
    title: String,
    members: Option<&[usize]>,
    backend: Option<&dyn CounterBackend>,
    legend: bool,
) -> DetailReport {
    let tot = frame.root_time();
    let hwpc = backend.filter(|_| frame.mode.is_hardware());
    let included = |rank: usize| members.map_or(true, |m| m.contains(&rank));

    let sections = frame
        .watches()
        .filter(|w| w.is_exclusive())
        .map(|watch| {
            let unit = frame.unit_of(watch);
            let ranks = watch
                .ranks()
                .iter()
                .enumerate()
                .filter(|(rank, _)| included(*rank))
                .map(|(rank, totals)| rank_row(unit, rank, totals, tot))
                .collect();
            let counters = hwpc.map(|backend| CounterTable {
                events: backend.events().iter().map(|e| e.name.clone()).collect(),
                rows: watch
                    .ranks()
                    .iter()
                    .enumerate()
                    .filter(|(rank, _)| included(*rank))
                    .map(|(rank, totals)| (rank, totals.counters.clone()))
                    .collect(),
            });
            SectionDetail {
                label: watch.label().to_string(),
                unit,
                ranks,
                counters,
            }
        })
        .collect();

    let members = match members {
        Some(m) => {
            let mut m = m.to_vec();
            m.sort_unstable();
            m.dedup();
            m
        }
        None => (0..frame.topology.num_process).collect(),
    };

    DetailReport {
        title,
        members,
        sections,
        legend: hwpc.filter(|_| legend).map(|b| b.legend()),
    }
}

/// Builds the per-thread report of the calling rank.
pub(crate) fn threads(frame: &Frame<'_>, title: String) -> ThreadReport {
    let tot = frame.root_time();
    let sections = frame
        .watches()
        .filter(|w| w.is_exclusive() && w.stats().count_sum > 0)
        .map(|watch| {
            let unit = frame.unit_of(watch);
            let threads = watch
                .thread_totals()
                .into_iter()
                .map(|(slot, totals)| {
                    let row = rank_row(unit, slot, &totals, tot);
                    ThreadRow {
                        slot,
                        calls: row.calls,
                        time: row.time,
                        time_pct: row.time_pct,
                        work: row.work,
                        rate: row.rate,
                        rate_unit: row.rate_unit,
                    }
                })
                .collect();
            ThreadSection {
                label: watch.label().to_string(),
                threads,
            }
        })
        .collect();

    ThreadReport {
        title,
        rank: frame.topology.rank,
        sections,
    }
}
