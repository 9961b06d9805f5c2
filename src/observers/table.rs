//! Text rendering of the reports.
//!
//! [`TableObserver`] turns the structured reports of [`crate::report`] into
//! the text printed by the monitor: a header block followed by tables drawn
//! with the `tabled` crate in a selectable [`TableStyle`].
//!
//! # Examples
//!
//! ```rust
//! use cronometri::observers::table::{TableObserver, TableStyle};
//! use cronometri::{Monitor, MonitorConfig, SortMode};
//!
//! let mut monitor = Monitor::initialize(MonitorConfig::default().with_threads(1));
//! monitor.start("solve").unwrap();
//! monitor.stop("solve", 2.0e9, 1).unwrap();
//! monitor.aggregate();
//!
//! let report = monitor.basic_report("", "nightly run", SortMode::Elapsed).unwrap();
//! let text = TableObserver::new()
//!     .with_style(TableStyle::Ascii)
//!     .render_basic(&report);
//! assert!(text.contains("solve"));
//! assert!(text.contains("nightly run"));
//! ```

use std::fmt::Write as _;

use tabled::{
    builder::Builder,
    settings::{object::Rows, Remove, Style},
    Table,
};

use crate::report::{BasicReport, DetailReport, ReportHeader, ThreadReport};

/// Available table styles for rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TableStyle {
    /// ASCII table with simple characters: +, -, |
    Ascii,
    /// Modern rounded corners (default)
    #[default]
    Rounded,
    /// Sharp corners with box-drawing characters
    Sharp,
    /// Modern style with clean lines
    Modern,
    /// Extended ASCII characters
    Extended,
    /// GitHub-flavored Markdown table
    Markdown,
    /// ReStructuredText table
    ReStructuredText,
    /// Dots for borders
    Dots,
    /// No borders, just spacing
    Blank,
}

/// Configuration for the table observer.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// The style to use for rendering.
    pub style: TableStyle,
    /// Whether to show the column names of each table.
    pub show_header: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            style: TableStyle::default(),
            show_header: true,
        }
    }
}

/// Renders reports as text tables.
#[derive(Debug, Clone, Default)]
pub struct TableObserver {
    config: TableConfig,
}

fn sci(value: f64) -> String {
    format!("{value:.3e}")
}

fn fixed(value: f64) -> String {
    format!("{value:.2}")
}

fn banner(title: &str) -> String {
    let rule = 72usize.saturating_sub(title.len() + 3);
    format!("\n# {title} {}\n", "-".repeat(rule))
}

impl TableObserver {
    /// Creates a new table observer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new table observer with the specified configuration.
    pub fn with_config(config: TableConfig) -> Self {
        Self { config }
    }

    /// Sets the table style.
    pub fn with_style(mut self, style: TableStyle) -> Self {
        self.config.style = style;
        self
    }

    /// Sets whether to show the column names.
    pub fn with_header(mut self, show: bool) -> Self {
        self.config.show_header = show;
        self
    }

    /// Applies the configured style to a table.
    fn apply_style(&self, table: &mut Table) {
        match self.config.style {
            TableStyle::Ascii => {
                table.with(Style::ascii());
            }
            TableStyle::Rounded => {
                table.with(Style::rounded());
            }
            TableStyle::Sharp => {
                table.with(Style::sharp());
            }
            TableStyle::Modern => {
                table.with(Style::modern());
            }
            TableStyle::Extended => {
                table.with(Style::extended());
            }
            TableStyle::Markdown => {
                table.with(Style::markdown());
            }
            TableStyle::ReStructuredText => {
                table.with(Style::re_structured_text());
            }
            TableStyle::Dots => {
                table.with(Style::dots());
            }
            TableStyle::Blank => {
                table.with(Style::blank());
            }
        }
    }

    /// Builds a styled table from a header row and data rows.
    fn table(&self, header: Vec<String>, rows: Vec<Vec<String>>) -> String {
        let mut builder = Builder::default();
        builder.push_record(header);
        for row in rows {
            builder.push_record(row);
        }

        let mut table = builder.build();
        self.apply_style(&mut table);
        if !self.config.show_header {
            table.with(Remove::row(Rows::first()));
        }
        table.to_string()
    }

    fn render_header(&self, out: &mut String, header: &ReportHeader, progress: bool) {
        let title = if progress {
            "Progress Report"
        } else {
            "Basic Report"
        };
        out.push_str(&banner(title));
        let features = if header.features.is_empty() {
            "none".to_string()
        } else {
            header.features.join(", ")
        };
        let _ = writeln!(
            out,
            "\tTiming Statistics Report from cronometri version {}",
            header.version
        );
        let _ = writeln!(out, "\tLinked cronometri supports: {features}");
        let _ = writeln!(out, "\tHost name : {}", header.hostname);
        let _ = writeln!(out, "\tDate      : {}", header.timestamp);
        if !header.comment.is_empty() {
            let _ = writeln!(out, "\t{}", header.comment);
        }
        let _ = writeln!(out, "\tParallel Mode:   {}", header.layout);
        let _ = writeln!(out, "\tHWPC mode:       {}", header.hwpc);
        out.push('\n');
        if progress {
            let _ = writeln!(
                out,
                "\tTotal time of exclusive sections = {} [sec]",
                sci(header.total_time)
            );
        } else {
            let _ = writeln!(
                out,
                "\tElapsed time from initialize to report = {} [sec]",
                sci(header.total_time)
            );
        }
        out.push_str("\tExclusive sections and inclusive sections are reported below.\n");
        out.push_str(
            "\tInclusive sections, marked with (*), are not added in the statistics total.\n\n",
        );
    }

    /// Renders the basic or progress report.
    pub fn render_basic(&self, report: &BasicReport) -> String {
        let mut out = String::new();
        self.render_header(&mut out, &report.header, report.progress);

        let unit = report.unit;
        let _ = writeln!(out, "\t{}", unit.column_header());
        let header = [
            "Label",
            "call",
            "avr[sec]",
            "avr[%]",
            "sdv[sec]",
            "avr/call[sec]",
            unit.work_header(),
            "sdv",
            unit.rate_header(),
        ]
        .map(String::from)
        .to_vec();
        let rows = report
            .rows
            .iter()
            .map(|row| {
                let rate_unit = if row.exclusive {
                    row.rate_unit.to_string()
                } else {
                    format!("{}(*)", row.rate_unit)
                };
                vec![
                    row.display_label(),
                    row.calls.to_string(),
                    sci(row.time_av),
                    fixed(row.time_pct),
                    sci(row.time_sd),
                    sci(row.time_per_call),
                    sci(row.work_av),
                    sci(row.work_sd),
                    format!("{} {rate_unit}", fixed(row.rate)),
                ]
            })
            .collect();
        out.push_str(&self.table(header, rows));
        out.push('\n');

        if !report.subtotals.is_empty() {
            let header = ["", "Exclusive sections", "time[sec]", unit.work_header(), "rate"]
                .map(String::from)
                .to_vec();
            let rows = report
                .subtotals
                .iter()
                .map(|s| {
                    vec![
                        s.scope.to_string(),
                        s.category.to_string(),
                        sci(s.time),
                        sci(s.work),
                        format!("{} {}", fixed(s.rate), s.rate_unit),
                    ]
                })
                .collect();
            out.push_str(&self.table(header, rows));
            out.push('\n');
        }
        out
    }

    /// Renders a per-rank or process group report.
    pub fn render_detail(&self, report: &DetailReport) -> String {
        let mut out = banner(&report.title);
        if report.sections.is_empty() {
            out.push_str("\tNo exclusive section has been measured.\n");
        }
        for section in &report.sections {
            let _ = writeln!(out, "\n\tLabel  {}", section.label);
            let header = [
                "Rank",
                "call",
                "time[sec]",
                "time[%]",
                "t/call[sec]",
                section.unit.work_header(),
                section.unit.rate_header(),
            ]
            .map(String::from)
            .to_vec();
            let rows = section
                .ranks
                .iter()
                .map(|r| {
                    vec![
                        format!("#{}", r.rank),
                        r.calls.to_string(),
                        sci(r.time),
                        fixed(r.time_pct),
                        sci(r.time_per_call),
                        sci(r.work),
                        format!("{} {}", fixed(r.rate), r.rate_unit),
                    ]
                })
                .collect();
            out.push_str(&self.table(header, rows));
            out.push('\n');

            if let Some(counters) = &section.counters {
                let mut header = vec!["Rank".to_string()];
                header.extend(counters.events.iter().cloned());
                let rows = counters
                    .rows
                    .iter()
                    .map(|(rank, values)| {
                        let mut row = vec![format!("#{rank}")];
                        row.extend(values.iter().map(|v| sci(*v)));
                        row
                    })
                    .collect();
                out.push_str(&self.table(header, rows));
                out.push('\n');
            }
        }
        if let Some(legend) = &report.legend {
            out.push_str(&self.render_legend(legend));
        }
        out
    }

    /// Renders the per-thread report of one rank.
    pub fn render_threads(&self, report: &ThreadReport) -> String {
        let mut out = banner(&report.title);
        for section in &report.sections {
            let _ = writeln!(out, "\n\tLabel  {}", section.label);
            let header = ["Thread", "call", "time[sec]", "time[%]", "work", "rate"]
                .map(String::from)
                .to_vec();
            let rows = section
                .threads
                .iter()
                .map(|t| {
                    vec![
                        format!("#{}", t.slot),
                        t.calls.to_string(),
                        sci(t.time),
                        fixed(t.time_pct),
                        sci(t.work),
                        format!("{} {}", fixed(t.rate), t.rate_unit),
                    ]
                })
                .collect();
            out.push_str(&self.table(header, rows));
            out.push('\n');
        }
        out
    }

    /// Renders the counter legend.
    pub fn render_legend(&self, legend: &[String]) -> String {
        let mut out = banner("Legend - HWPC symbols used in the report");
        for line in legend {
            let _ = writeln!(out, "\t{line}");
        }
        out
    }
}
