//! Structured replay lifecycle records.
//!
//! The session accumulates one [`ReplayLogRecord`] per notable decision and
//! the caller drains them. Records below the configured minimum level are
//! never built, and once `capacity` records are held further ones are only
//! counted.

use std::fmt;

use serde::Serialize;

use crate::config::ReplayMode;
use crate::event::ObjectId;

/// Replay log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl ReplayLogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ReplayLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured replay lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayLogRecord {
    /// Monotonic decision id.
    pub decision_id: u64,
    /// `replay::<mode>::<symbol>::<hex decision id>`.
    pub trace_id: String,
    pub level: ReplayLogLevel,
    pub mode: ReplayMode,
    /// Operation (`allocate`, `deallocate`, `collect`, `drain`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `unknown_free`, `final_collection`, ...).
    pub event: &'static str,
    pub object_id: Option<ObjectId>,
    pub size: Option<u64>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    pub details: String,
    /// Snapshot: current live bytes.
    pub live_bytes: u64,
    /// Snapshot: live object count.
    pub live_objects: usize,
}

/// Record sink owned by one session.
#[derive(Debug)]
pub struct ReplayLog {
    mode: ReplayMode,
    min_level: ReplayLogLevel,
    next_decision_id: u64,
    records: Vec<ReplayLogRecord>,
    capacity: usize,
    dropped: u64,
}

/// Fields of a record that vary per call site.
#[derive(Debug, Clone, Copy)]
pub struct LogFields {
    pub symbol: &'static str,
    pub event: &'static str,
    pub object_id: Option<ObjectId>,
    pub size: Option<u64>,
    pub outcome: &'static str,
}

impl LogFields {
    #[must_use]
    pub fn new(symbol: &'static str, event: &'static str, outcome: &'static str) -> Self {
        Self {
            symbol,
            event,
            object_id: None,
            size: None,
            outcome,
        }
    }

    #[must_use]
    pub fn object(mut self, id: ObjectId) -> Self {
        self.object_id = Some(id);
        self
    }

    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

impl ReplayLog {
    #[must_use]
    pub fn new(mode: ReplayMode, min_level: ReplayLogLevel) -> Self {
        Self {
            mode,
            min_level,
            next_decision_id: 1,
            records: Vec::new(),
            capacity: usize::MAX,
            dropped: 0,
        }
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Records that passed the level filter while the log was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    #[must_use]
    pub fn enabled(&self, level: ReplayLogLevel) -> bool {
        level >= self.min_level
    }

    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    /// Append a record. `details` is only evaluated when the level passes.
    pub fn record<D: Into<String>>(
        &mut self,
        level: ReplayLogLevel,
        fields: LogFields,
        details: impl FnOnce() -> D,
        live_bytes: u64,
        live_objects: usize,
    ) {
        if !self.enabled(level) {
            return;
        }
        if self.records.len() >= self.capacity {
            self.dropped += 1;
            return;
        }
        let decision_id = self.next_log_decision_id();
        let trace_id = format!(
            "replay::{}::{}::{:016x}",
            self.mode, fields.symbol, decision_id
        );
        self.records.push(ReplayLogRecord {
            decision_id,
            trace_id,
            level,
            mode: self.mode,
            symbol: fields.symbol,
            event: fields.event,
            object_id: fields.object_id,
            size: fields.size,
            outcome: fields.outcome,
            details: details().into(),
            live_bytes,
            live_objects,
        });
    }

    #[must_use]
    pub fn records(&self) -> &[ReplayLogRecord] {
        &self.records
    }

    /// Drain accumulated records.
    pub fn drain(&mut self) -> Vec<ReplayLogRecord> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_below_min_level_are_dropped() {
        let mut log = ReplayLog::new(ReplayMode::Gc, ReplayLogLevel::Info);
        let mut evaluated = false;
        log.record(
            ReplayLogLevel::Trace,
            LogFields::new("allocate", "alloc", "success"),
            || {
                evaluated = true;
                String::new()
            },
            0,
            0,
        );
        assert!(!evaluated);
        assert!(log.records().is_empty());
    }

    #[test]
    fn trace_ids_carry_mode_symbol_and_decision_id() {
        let mut log = ReplayLog::new(ReplayMode::Oracle, ReplayLogLevel::Trace);
        log.record(
            ReplayLogLevel::Warn,
            LogFields::new("drain", "unknown_free", "discarded").object(42),
            || "object_not_live",
            128,
            3,
        );
        log.record(
            ReplayLogLevel::Info,
            LogFields::new("finish", "end_of_trace_drain", "drained"),
            || "pending=0",
            0,
            0,
        );
        let records = log.drain();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].decision_id, 1);
        assert_eq!(records[0].trace_id, "replay::oracle::drain::0000000000000001");
        assert_eq!(records[0].object_id, Some(42));
        assert_eq!(records[0].live_bytes, 128);
        assert_eq!(records[1].trace_id, "replay::oracle::finish::0000000000000002");
        assert!(log.records().is_empty());
    }

    #[test]
    fn full_log_counts_instead_of_growing() {
        let mut log = ReplayLog::new(ReplayMode::Explicit, ReplayLogLevel::Debug).with_capacity(3);
        for id in 0..10 {
            log.record(
                ReplayLogLevel::Warn,
                LogFields::new("deallocate", "unknown_free", "ignored").object(id),
                || "object_not_live",
                0,
                0,
            );
        }
        assert_eq!(log.records().len(), 3);
        assert_eq!(log.dropped(), 7);
        assert_eq!(log.records()[2].decision_id, 3);

        // draining frees room again; decision ids stay monotonic
        assert_eq!(log.drain().len(), 3);
        log.record(
            ReplayLogLevel::Info,
            LogFields::new("finish", "teardown_release", "released"),
            || "objects=0",
            0,
            0,
        );
        assert_eq!(log.records()[0].decision_id, 4);
        assert_eq!(log.dropped(), 7);
    }

    #[test]
    fn levels_order_from_trace_to_error() {
        assert!(ReplayLogLevel::Trace < ReplayLogLevel::Debug);
        assert!(ReplayLogLevel::Warn < ReplayLogLevel::Error);
        assert_eq!(ReplayLogLevel::Warn.to_string(), "warn");
    }
}
