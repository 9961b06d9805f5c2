//! Prometheus observer for exporting section statistics using the official
//! `prometheus` crate.
//!
//! [`PrometheusObserver`] turns a [`MonitorSnapshot`] into a family of
//! metrics labelled by section and renders them with the
//! [`TextEncoder`](prometheus::TextEncoder):
//!
//! | Metric | Type | Value |
//! |--------|------|-------|
//! | `section_calls_total` | counter | calls summed over ranks |
//! | `section_time_seconds` | gauge | average time over active ranks |
//! | `section_time_stddev_seconds` | gauge | sample deviation of the time |
//! | `section_work` | gauge | average declared or derived work |
//! | `section_active_ranks` | gauge | ranks that entered the section |
//!
//! Every metric carries the labels `section` and `kind` (`COMM` or `CALC`).
//!
//! # Feature Flag
//!
//! This module requires the `prometheus` feature:
//!
//! ```toml
//! [dependencies]
//! cronometri = { version = "0.1", features = ["prometheus"] }
//! ```
//!
//! # Examples
//!
//! ```rust
//! use cronometri::observers::prometheus::PrometheusObserver;
//! use cronometri::{Monitor, MonitorConfig};
//!
//! let mut monitor = Monitor::initialize(MonitorConfig::default().with_threads(1));
//! monitor.start("solve").unwrap();
//! monitor.stop("solve", 0.0, 1).unwrap();
//! monitor.aggregate();
//!
//! let output = PrometheusObserver::new()
//!     .with_namespace("cfd")
//!     .with_const_label("case", "cavity")
//!     .render(&monitor.snapshot().unwrap())
//!     .unwrap();
//! assert!(output.contains("cfd_section_calls_total"));
//! ```

use std::collections::HashMap;

use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::Result;
use crate::snapshot::MonitorSnapshot;

const SECTION_LABELS: [&str; 2] = ["section", "kind"];

/// Observer that exports section statistics in the Prometheus text format.
#[derive(Debug, Clone, Default)]
pub struct PrometheusObserver {
    /// Namespace (prefix) for all metrics.
    namespace: Option<String>,
    /// Subsystem for all metrics.
    subsystem: Option<String>,
    /// Constant labels applied to all metrics.
    const_labels: HashMap<String, String>,
}

impl PrometheusObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the namespace (prefix) for all metrics.
    ///
    /// For example, namespace "cfd" + metric "section_work" = "cfd_section_work".
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Sets the subsystem, placed between namespace and metric name.
    pub fn with_subsystem(mut self, subsystem: &str) -> Self {
        self.subsystem = Some(subsystem.to_string());
        self
    }

    /// Adds a constant label to all metrics.
    pub fn with_const_label(mut self, name: &str, value: &str) -> Self {
        self.const_labels
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Sanitizes a name component to match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
    fn sanitize_name(name: &str) -> String {
        let mut result: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if result.is_empty() {
            result.push_str("unnamed");
        }
        if result.starts_with(|c: char| c.is_ascii_digit()) {
            result.insert(0, '_');
        }
        result
    }

    /// Builds the full metric name with namespace and subsystem.
    fn build_full_name(&self, name: &str) -> String {
        let prefix: Vec<String> = [&self.namespace, &self.subsystem]
            .into_iter()
            .flatten()
            .map(|part| Self::sanitize_name(part))
            .collect();
        if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{name}", prefix.join("_"))
        }
    }

    fn opts(&self, name: &str, help: &str) -> Opts {
        Opts::new(self.build_full_name(name), help).const_labels(self.const_labels.clone())
    }

    fn gauge(&self, registry: &Registry, name: &str, help: &str) -> Result<GaugeVec> {
        let gauge = GaugeVec::new(self.opts(name, help), &SECTION_LABELS)?;
        registry.register(Box::new(gauge.clone()))?;
        Ok(gauge)
    }

    /// Renders the snapshot to Prometheus exposition format.
    ///
    /// A fresh registry is built on every call, so repeated renders never
    /// collide with metrics registered earlier.
    pub fn render(&self, snapshot: &MonitorSnapshot) -> Result<String> {
        let registry = Registry::new();

        let calls = IntCounterVec::new(
            self.opts("section_calls_total", "Calls of the section summed over ranks"),
            &SECTION_LABELS,
        )?;
        registry.register(Box::new(calls.clone()))?;
        let time = self.gauge(
            &registry,
            "section_time_seconds",
            "Average time spent in the section",
        )?;
        let time_sd = self.gauge(
            &registry,
            "section_time_stddev_seconds",
            "Standard deviation of the section time over ranks",
        )?;
        let work = self.gauge(&registry, "section_work", "Average work of the section")?;
        let ranks = self.gauge(
            &registry,
            "section_active_ranks",
            "Ranks that entered the section",
        )?;

        for section in &snapshot.sections {
            let kind = section.kind.to_string();
            let labels = [section.label.as_str(), kind.as_str()];
            calls.with_label_values(&labels).inc_by(section.count_sum);
            time.with_label_values(&labels).set(section.time_av);
            time_sd.with_label_values(&labels).set(section.time_sd);
            work.with_label_values(&labels).set(section.work_av);
            ranks
                .with_label_values(&labels)
                .set(section.active_ranks as f64);
        }

        Self::encode_registry(&registry)
    }

    /// Renders the snapshot to bytes (useful for HTTP responses).
    pub fn render_bytes(&self, snapshot: &MonitorSnapshot) -> Result<Vec<u8>> {
        Ok(self.render(snapshot)?.into_bytes())
    }

    fn encode_registry(registry: &Registry) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
