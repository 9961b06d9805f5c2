//! Observers rendering and exporting section statistics.
//!
//! - [`table`] - Render the reports as text tables using the `tabled` crate
//! - [`json`] - Serialize snapshots and reports to JSON
//! - [`prometheus`] - Export snapshots in Prometheus exposition format
//!
//! All observers return the unified [`MonitorError`](crate::MonitorError),
//! so switching between them does not change error handling code.
//!
//! # Feature Flags
//!
//! - `json` - Enables the [`json`] module
//! - `prometheus` - Enables the [`prometheus`] module
//! - `full` - Enables all observer modules
//!
//! The [`table`] observer is always available: the monitor prints through it.

pub mod table;

#[cfg(feature = "json")]
pub mod json;

#[cfg(feature = "prometheus")]
pub mod prometheus;
