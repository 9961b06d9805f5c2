//! Post-mortem trace emission.
//!
//! A [`TraceSink`] receives every start and stop of every section, and the
//! id to label table once [`Monitor::post_trace`](crate::Monitor::post_trace)
//! is called. The monitor does not interpret the trace in any way.
//!
//! With the `json` feature, [`ChromeTraceRecorder`] writes the events in the
//! Chrome trace event format, which `chrome://tracing` and Perfetto open
//! directly.

use std::time::Duration;

use crate::error::Result;
use crate::sections::SectionId;

/// Receiver of section events.
pub trait TraceSink: Send + Sync {
    /// A section started on `slot` at offset `at` from the monitor epoch.
    fn record_start(&self, id: SectionId, slot: usize, at: Duration);

    /// A section stopped; `work` is the declared work of the call.
    fn record_stop(&self, id: SectionId, slot: usize, at: Duration, work: f64);

    /// Associates a label with an id.
    fn define_label(&self, id: SectionId, label: &str);

    /// Flushes the trace.
    fn finalize(&self) -> Result<()>;
}

#[cfg(feature = "json")]
pub use chrome::ChromeTraceRecorder;

#[cfg(feature = "json")]
mod chrome {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    use serde::Serialize;

    use super::TraceSink;
    use crate::error::Result;
    use crate::sections::SectionId;

    #[derive(Debug, Clone, Copy)]
    enum Phase {
        Begin,
        End,
    }

    #[derive(Debug, Clone)]
    struct Event {
        id: SectionId,
        slot: usize,
        at: Duration,
        phase: Phase,
        work: Option<f64>,
    }

    #[derive(Debug, Default)]
    struct State {
        events: Vec<Event>,
        labels: HashMap<SectionId, String>,
    }

    #[derive(Serialize)]
    struct TraceEvent<'a> {
        name: &'a str,
        cat: &'static str,
        ph: &'static str,
        ts: f64,
        pid: u32,
        tid: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<serde_json::Value>,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct TraceFile<'a> {
        trace_events: Vec<TraceEvent<'a>>,
        display_time_unit: &'static str,
    }

    /// Collects section events in memory and renders them as a Chrome trace.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cronometri::trace::{ChromeTraceRecorder, TraceSink};
    /// use std::time::Duration;
    ///
    /// let recorder = ChromeTraceRecorder::new();
    /// recorder.record_start(1, 0, Duration::from_micros(10));
    /// recorder.record_stop(1, 0, Duration::from_micros(25), 0.0);
    /// recorder.define_label(1, "solve");
    ///
    /// let json = recorder.to_json().unwrap();
    /// assert!(json.contains("\"solve\""));
    /// ```
    #[derive(Debug, Default)]
    pub struct ChromeTraceRecorder {
        rank: u32,
        output: Option<PathBuf>,
        state: Mutex<State>,
    }

    impl ChromeTraceRecorder {
        pub fn new() -> Self {
            Self::default()
        }

        /// Writes the trace to `path` on [`finalize`](TraceSink::finalize).
        pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
            self.output = Some(path.into());
            self
        }

        /// Process id recorded in every event.
        pub fn with_rank(mut self, rank: u32) -> Self {
            self.rank = rank;
            self
        }

        fn lock(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Number of recorded begin and end events.
        pub fn len(&self) -> usize {
            self.lock().events.len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Renders the recorded events.
        pub fn to_json(&self) -> Result<String> {
            let state = self.lock();
            let trace_events = state
                .events
                .iter()
                .map(|event| TraceEvent {
                    name: state
                        .labels
                        .get(&event.id)
                        .map_or("unknown", String::as_str),
                    cat: "section",
                    ph: match event.phase {
                        Phase::Begin => "B",
                        Phase::End => "E",
                    },
                    ts: event.at.as_secs_f64() * 1.0e6,
                    pid: self.rank,
                    tid: event.slot,
                    args: event.work.map(|work| serde_json::json!({ "work": work })),
                })
                .collect();
            let file = TraceFile {
                trace_events,
                display_time_unit: "ms",
            };
            Ok(serde_json::to_string(&file)?)
        }
    }

    impl TraceSink for ChromeTraceRecorder {
        fn record_start(&self, id: SectionId, slot: usize, at: Duration) {
            self.lock().events.push(Event {
                id,
                slot,
                at,
                phase: Phase::Begin,
                work: None,
            });
        }

        fn record_stop(&self, id: SectionId, slot: usize, at: Duration, work: f64) {
            self.lock().events.push(Event {
                id,
                slot,
                at,
                phase: Phase::End,
                work: Some(work),
            });
        }

        fn define_label(&self, id: SectionId, label: &str) {
            self.lock().labels.insert(id, label.to_string());
        }

        fn finalize(&self) -> Result<()> {
            if let Some(path) = &self.output {
                let json = self.to_json()?;
                std::fs::write(path, json)?;
                log::debug!("trace written to {}", path.display());
            }
            Ok(())
        }
    }

}
