//! Structured JSONL log for replay runs.
//!
//! Provides:
//! - [`LogEntry`]: canonical JSONL record with required + optional fields.
//! - [`LogEmitter`]: writes JSONL lines to a file or any writer.
//! - [`validate_log_line`]: validates a single JSONL line against the schema.
//! - [`validate_log_file`]: validates an entire JSONL file.
//!
//! Replay lifecycle records drained from a session are converted with
//! [`LogEntry::from_record`]; run-level entries (`replay_start`,
//! `replay_complete`) get emitter-assigned trace ids.

use std::io::Write;
use std::path::Path;

use heapreplay_core::{ReplayLogLevel, ReplayLogRecord, ReplayMode};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<ReplayLogLevel> for LogLevel {
    fn from(level: ReplayLogLevel) -> Self {
        match level {
            ReplayLogLevel::Trace => Self::Trace,
            ReplayLogLevel::Debug => Self::Debug,
            ReplayLogLevel::Info => Self::Info,
            ReplayLogLevel::Warn => Self::Warn,
            ReplayLogLevel::Error => Self::Error,
        }
    }
}

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Replay operation (`allocate`, `collect`, `drain`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Machine-readable outcome label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_objects: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            run_id: None,
            mode: None,
            symbol: None,
            decision_id: None,
            object_id: None,
            size: None,
            outcome: None,
            live_bytes: None,
            live_objects: None,
            backend: None,
            duration_ms: None,
            details: None,
        }
    }

    /// Convert a drained replay lifecycle record.
    #[must_use]
    pub fn from_record(record: &ReplayLogRecord) -> Self {
        let mut entry = Self::new(&record.trace_id, record.level.into(), record.event)
            .with_mode(record.mode)
            .with_outcome(record.outcome);
        entry.symbol = Some(record.symbol.to_string());
        entry.decision_id = Some(record.decision_id);
        entry.object_id = record.object_id;
        entry.size = record.size;
        entry.live_bytes = Some(record.live_bytes);
        entry.live_objects = Some(record.live_objects as u64);
        if !record.details.is_empty() {
            entry.details = Some(serde_json::Value::String(record.details.clone()));
        }
        entry
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ReplayMode) -> Self {
        self.mode = Some(mode.as_str().to_string());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// Writes structured JSONL log entries.
pub struct LogEmitter {
    writer: Box<dyn Write>,
    seq: u64,
    run_id: String,
    lines: u64,
}

impl LogEmitter {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::to_writer(std::io::BufWriter::new(file), run_id))
    }

    /// Create an emitter over any writer.
    #[must_use]
    pub fn to_writer(writer: impl Write + 'static, run_id: &str) -> Self {
        Self {
            writer: Box::new(writer),
            seq: 0,
            run_id: run_id.to_string(),
            lines: 0,
        }
    }

    /// Generate the next run-level trace id.
    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("heapreplay::{}::{:03}", self.run_id, self.seq)
    }

    /// Emit a run-level entry with an emitter-assigned trace id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let trace_id = self.next_trace_id();
        let entry = LogEntry::new(trace_id, level, event);
        self.emit_entry(entry.clone())?;
        Ok(entry)
    }

    /// Emit a fully-populated log entry.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.run_id.is_none() {
            entry.run_id = Some(self.run_id.clone());
        }
        let line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        self.lines += 1;
        Ok(())
    }

    /// Emit every drained replay record, in order.
    pub fn emit_records(&mut self, records: &[ReplayLogRecord]) -> std::io::Result<()> {
        for record in records {
            self.emit_entry(LogEntry::from_record(record))?;
        }
        Ok(())
    }

    /// Lines written so far.
    #[must_use]
    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();
    let error = |field: &str, message: String| LogValidationError {
        line_number,
        field: field.to_string(),
        message,
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            errors.push(error("<json>", format!("invalid JSON: {e}")));
            return Err(errors);
        }
    };

    let Some(obj) = value.as_object() else {
        errors.push(error("<root>", "expected JSON object".to_string()));
        return Err(errors);
    };

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(error(field, "required field missing".to_string()));
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !LEVELS.contains(&level)
    {
        errors.push(error("level", format!("invalid level: '{level}'")));
    }

    if let Some(mode) = obj.get("mode").and_then(|v| v.as_str())
        && !ReplayMode::ALL.iter().any(|m| m.as_str() == mode)
    {
        errors.push(error("mode", format!("invalid mode: '{mode}'")));
    }

    if let Some(outcome) = obj.get("outcome").and_then(|v| v.as_str())
        && outcome.trim().is_empty()
    {
        errors.push(error("outcome", "outcome must be non-empty".to_string()));
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && trace_id.split("::").filter(|part| !part.is_empty()).count() < 3
    {
        errors.push(error(
            "trace_id",
            format!("trace_id should have at least three '::'-separated parts, got: '{trace_id}'"),
        ));
    }

    // Replay records carry their decision id as the last trace id segment.
    if let (Some(decision_id), Some(trace_id)) = (
        obj.get("decision_id").and_then(serde_json::Value::as_u64),
        obj.get("trace_id").and_then(|v| v.as_str()),
    ) && trace_id.starts_with("replay::")
    {
        let suffix = trace_id.rsplit("::").next().unwrap_or_default();
        if u64::from_str_radix(suffix, 16).ok() != Some(decision_id) {
            errors.push(error(
                "decision_id",
                format!("decision_id {decision_id} does not match trace_id '{trace_id}'"),
            ));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    match serde_json::from_value::<LogEntry>(value) {
        Ok(entry) => Ok(entry),
        Err(e) => {
            errors.push(error("<deserialization>", format!("failed to deserialize: {e}")));
            Err(errors)
        }
    }
}

/// Validate an entire JSONL file.
///
/// Returns the total line count and any validation errors found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// RFC 3339 UTC timestamp with millisecond precision.
#[must_use]
pub fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

fn format_utc(secs: u64, millis: u32) -> String {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
    )
}

/// Days since 1970-01-01 to (year, month, day), proleptic Gregorian.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z % 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}
