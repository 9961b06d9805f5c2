//! JSON observer for serializing section statistics.
//!
//! This module provides [`JsonObserver`], which serializes a
//! [`MonitorSnapshot`] or any of the structured reports to JSON using serde.
//!
//! # Feature Flag
//!
//! This module requires the `json` feature:
//!
//! ```toml
//! [dependencies]
//! cronometri = { version = "0.1", features = ["json"] }
//! ```
//!
//! # Examples
//!
//! ```rust
//! use cronometri::observers::json::JsonObserver;
//! use cronometri::{Monitor, MonitorConfig};
//!
//! let mut monitor = Monitor::initialize(MonitorConfig::default().with_threads(1));
//! monitor.start("assemble").unwrap();
//! monitor.stop("assemble", 0.0, 1).unwrap();
//! monitor.aggregate();
//!
//! let snapshot = monitor.snapshot().unwrap();
//! let json = JsonObserver::new().to_json(&snapshot).unwrap();
//! assert!(json.contains("\"assemble\""));
//! ```

use serde::Serialize;

use crate::error::Result;
use crate::snapshot::MonitorSnapshot;

/// Configuration for the JSON observer.
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    /// Whether to pretty-print the JSON output.
    pub pretty: bool,
    /// Whether to keep the snapshot timestamp in the output.
    pub include_timestamp: bool,
}

/// An observer that serializes snapshots and reports to JSON.
///
/// ```rust
/// use cronometri::observers::json::JsonObserver;
///
/// let observer = JsonObserver::new().pretty(true).include_timestamp(true);
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonObserver {
    config: JsonConfig,
}

impl JsonObserver {
    /// Creates a new JSON observer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new JSON observer with the specified configuration.
    pub fn with_config(config: JsonConfig) -> Self {
        Self { config }
    }

    /// Enables or disables pretty-printing.
    pub fn pretty(mut self, enabled: bool) -> Self {
        self.config.pretty = enabled;
        self
    }

    /// Enables or disables timestamp inclusion.
    pub fn include_timestamp(mut self, enabled: bool) -> Self {
        self.config.include_timestamp = enabled;
        self
    }

    /// Serializes a snapshot to a JSON string.
    pub fn to_json(&self, snapshot: &MonitorSnapshot) -> Result<String> {
        if self.config.include_timestamp {
            self.render(snapshot)
        } else {
            self.render(&snapshot.clone().without_timestamp())
        }
    }

    /// Serializes a snapshot to a JSON byte vector.
    pub fn to_json_bytes(&self, snapshot: &MonitorSnapshot) -> Result<Vec<u8>> {
        Ok(self.to_json(snapshot)?.into_bytes())
    }

    /// Serializes a report, e.g. a [`BasicReport`](crate::report::BasicReport).
    pub fn report_to_json<T: Serialize>(&self, report: &T) -> Result<String> {
        self.render(report)
    }

    /// Parses a snapshot written by [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<MonitorSnapshot> {
        Ok(serde_json::from_str(json)?)
    }

    fn render<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        let json = if self.config.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hwpc::HwpcMode;
    use crate::sections::SectionKind;
    use crate::snapshot::SectionSnapshot;

    fn snapshot() -> MonitorSnapshot {
        MonitorSnapshot {
            timestamp_ms: Some(1_700_000_000_000),
            rank: 0,
            num_process: 2,
            num_threads: 4,
            hwpc: HwpcMode::LoadStore,
            sections: vec![SectionSnapshot {
                id: 1,
                label: "halo exchange".into(),
                kind: SectionKind::Communication,
                exclusive: true,
                calls: 10,
                count_sum: 20,
                time_av: 0.25,
                time_sd: 0.01,
                work_av: 4096.0,
                work_sd: 0.0,
                percentage: 0.0,
                active_ranks: 2,
            }],
        }
    }

    #[test]
    fn test_to_json_fields() {
        let json = JsonObserver::new().to_json(&snapshot()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["hwpc"], "LOADSTORE");
        assert_eq!(value["num_process"], 2);
        assert_eq!(value["sections"][0]["label"], "halo exchange");
        assert_eq!(value["sections"][0]["kind"], "Communication");
        assert_eq!(value["sections"][0]["count_sum"], 20);
        assert!(value.get("timestamp_ms").is_none());
    }

    #[test]
    fn test_include_timestamp() {
        let json = JsonObserver::new()
            .include_timestamp(true)
            .to_json(&snapshot())
            .unwrap();
        assert!(json.contains("\"timestamp_ms\":1700000000000"));
    }

    #[test]
    fn test_pretty_print() {
        let json = JsonObserver::new().pretty(true).to_json(&snapshot()).unwrap();
        assert!(json.contains('\n'));
        assert!(json.contains("  "));
    }

    #[test]
    fn test_parse_back() {
        let original = snapshot();
        let json = JsonObserver::new()
            .include_timestamp(true)
            .to_json(&original)
            .unwrap();
        assert_eq!(JsonObserver::from_json(&json).unwrap(), original);
    }

    #[test]
    fn test_bytes_match_string() {
        let observer = JsonObserver::new();
        let bytes = observer.to_json_bytes(&snapshot()).unwrap();
        assert_eq!(bytes, observer.to_json(&snapshot()).unwrap().into_bytes());
    }

    #[test]
    fn test_with_config() {
        let observer = JsonObserver::with_config(JsonConfig {
            pretty: false,
            include_timestamp: true,
        });
        assert!(observer.to_json(&snapshot()).unwrap().contains("timestamp_ms"));
    }
}
