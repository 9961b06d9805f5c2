//! Run configuration of a [`Monitor`](crate::Monitor).
//!
//! A configuration is fixed when the monitor is initialized. It can be built
//! in code, read from the environment with [`MonitorConfig::from_env`], or,
//! with the `serde` feature, deserialized from any serde format.
//!
//! # Environment
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `CRONOMETRI_DISABLE` | When set, to any value, every monitor call is a no-op |
//! | `HWPC_CHOOSER` | Counter mode: `USER`, `FLOPS`, `BANDWIDTH`, `VECTOR`, `CACHE`, `CYCLE` or `LOADSTORE` |
//!
//! # Example
//!
//! ```rust
//! use cronometri::MonitorConfig;
//!
//! let config = MonitorConfig::default()
//!     .with_initial_capacity(16)
//!     .with_hwpc_mode("FLOPS")
//!     .with_threads(4);
//!
//! assert!(config.enabled);
//! assert_eq!(config.initial_capacity, 16);
//! ```

use crate::observers::table::TableStyle;

/// Environment variable disabling the monitor.
pub const DISABLE_ENV: &str = "CRONOMETRI_DISABLE";

/// Environment variable selecting the counter mode.
pub const HWPC_ENV: &str = "HWPC_CHOOSER";

/// Monitor settings.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MonitorConfig {
    /// When `false` every public monitor operation returns immediately.
    pub enabled: bool,
    /// Sections allocated up front, and the growth step of the registry.
    pub initial_capacity: usize,
    /// Counter mode name, parsed at initialization.
    pub hwpc_mode: String,
    /// Threads per process; `None` asks the operating system.
    pub threads: Option<usize>,
    /// Border style of the printed reports.
    pub table_style: TableStyle,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_capacity: 100,
            hwpc_mode: "USER".to_string(),
            threads: None,
            table_style: TableStyle::default(),
        }
    }
}

impl MonitorConfig {
    /// Reads [`DISABLE_ENV`] and [`HWPC_ENV`] on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if std::env::var_os(DISABLE_ENV).is_some() {
            config.enabled = false;
        }
        if let Ok(mode) = std::env::var(HWPC_ENV) {
            config.hwpc_mode = mode;
        }
        config
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Values below 1 are treated as 1.
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity.max(1);
        self
    }

    pub fn with_hwpc_mode(mut self, mode: impl Into<String>) -> Self {
        self.hwpc_mode = mode.into();
        self
    }

    /// Fixes the thread count reported in the topology.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads.max(1));
        self
    }

    pub fn with_table_style(mut self, style: TableStyle) -> Self {
        self.table_style = style;
        self
    }

    /// Thread count to report: the configured one, or what the operating
    /// system makes available.
    pub(crate) fn resolved_threads(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
