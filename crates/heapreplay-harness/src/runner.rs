//! One CLI invocation: load, replay, report.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use heapreplay_alloc::select_backend;
use heapreplay_core::{
    BackendInfo, ReplayConfig, ReplayError, ReplayLogLevel, ReplayLogRecord, ReplayMode,
    ReplayReport, ReplaySession,
};
use thiserror::Error;

use crate::provenance::load_trace_with_digest;
use crate::structured_log::{LogEmitter, LogEntry, LogLevel};
use crate::summary::render_summary;

/// Fatal harness failures. Anything here ends the process with status 1.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("cannot write '{path}': {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

/// Resolved command-line options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub trace: PathBuf,
    pub mode: ReplayMode,
    pub allocator: String,
    pub gc_byte_threshold: Option<u64>,
    pub gc_alloc_count: Option<u64>,
    pub allocator_stats: bool,
    pub heap_limit: Option<u64>,
    pub sample_reads: Option<u64>,
    pub log_path: Option<PathBuf>,
    pub json_path: Option<PathBuf>,
    pub verbose: bool,
}

impl RunOptions {
    #[must_use]
    pub fn new(trace: impl Into<PathBuf>, mode: ReplayMode) -> Self {
        Self {
            trace: trace.into(),
            mode,
            allocator: heapreplay_alloc::BASELINE_BACKEND.to_string(),
            gc_byte_threshold: None,
            gc_alloc_count: None,
            allocator_stats: false,
            heap_limit: None,
            sample_reads: None,
            log_path: None,
            json_path: None,
            verbose: false,
        }
    }

    #[must_use]
    pub fn replay_config(&self) -> ReplayConfig {
        let mut config = ReplayConfig::new(self.mode);
        if let Some(bytes) = self.gc_byte_threshold {
            config = config.with_gc_byte_threshold(bytes);
        }
        if let Some(count) = self.gc_alloc_count {
            config = config.with_gc_alloc_count_threshold(count);
        }
        if let Some(every) = self.sample_reads {
            config = config.with_working_set_sampling(every);
        }
        config
    }
}

/// What a run produced.
#[derive(Debug)]
pub struct RunArtifacts {
    pub report: ReplayReport,
    /// Text rendered for stdout.
    pub summary: String,
    /// Lines worth echoing to stderr in verbose mode.
    pub notices: Vec<String>,
    pub log_lines: u64,
}

/// Load the trace, replay it and write the requested outputs.
pub fn execute(options: &RunOptions) -> Result<RunArtifacts, HarnessError> {
    let (trace, digest) = load_trace_with_digest(&options.trace)?;

    let mut selection = select_backend(&options.allocator);
    if let Some(limit) = options.heap_limit {
        selection = selection.bounded(limit);
    }

    let config = options.replay_config();
    let mut session = ReplaySession::new(config, selection.backend.as_ref());
    if selection.fell_back {
        session.record_backend_fallback(&selection.requested, selection.resolved);
    }
    session.record_ingest(&trace.summary);
    session.run(&trace.events);
    session.finish(trace.end_time);
    let outcome = session.into_outcome();

    let backend = BackendInfo::from_selection(&selection, options.heap_limit);
    let report = ReplayReport::new(&outcome, &trace, backend)
        .with_trace_source(options.trace.display().to_string(), digest)
        .with_gc_config(config.gc);

    let notices = outcome
        .logs
        .iter()
        .filter(|r| is_notice(r))
        .map(format_notice)
        .collect();

    let mut log_lines = 0;
    if let Some(path) = &options.log_path {
        log_lines = write_log(path, &report, &outcome.logs).map_err(|source| {
            HarnessError::Output {
                path: path.clone(),
                source,
            }
        })?;
    }

    if let Some(path) = &options.json_path {
        let body = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, body + "\n").map_err(|source| HarnessError::Output {
            path: path.clone(),
            source,
        })?;
    }

    let summary = render_summary(&report, options.allocator_stats);
    Ok(RunArtifacts {
        report,
        summary,
        notices,
        log_lines,
    })
}

fn is_notice(record: &ReplayLogRecord) -> bool {
    record.level >= ReplayLogLevel::Warn || record.event == "final_collection"
}

fn format_notice(record: &ReplayLogRecord) -> String {
    let mut line = format!("[{}] {}: {}", record.level, record.symbol, record.event);
    if let Some(id) = record.object_id {
        line.push_str(&format!(" object={id}"));
    }
    if !record.details.is_empty() {
        line.push_str(&format!(" ({})", record.details));
    }
    line
}

fn write_log(
    path: &Path,
    report: &ReplayReport,
    records: &[ReplayLogRecord],
) -> std::io::Result<u64> {
    let run_id = run_id(report.mode);
    let mut emitter = LogEmitter::to_file(path, &run_id)?;
    let backend = report.backend.name.clone();

    emitter.emit_entry(
        LogEntry::new("", LogLevel::Info, "replay_start")
            .with_mode(report.mode)
            .with_backend(backend.clone())
            .with_details(serde_json::json!({
                "trace": report.trace.path,
                "sha256": report.trace.sha256,
                "requested_backend": report.backend.requested,
                "fell_back": report.backend.fell_back,
            })),
    )?;
    emitter.emit_records(records)?;

    let stats = &report.statistics;
    emitter.emit_entry(
        LogEntry::new("", LogLevel::Info, "replay_complete")
            .with_mode(report.mode)
            .with_backend(backend)
            .with_outcome("completed")
            .with_duration_ms(report.replay_time_ns / 1_000_000)
            .with_details(serde_json::json!({
                "events": report.events_processed,
                "total_allocations": stats.total_allocations,
                "total_frees": stats.total_frees,
                "failed_allocations": stats.failed_allocations,
                "failed_frees": stats.failed_frees,
                "peak_live_bytes": stats.peak_live_bytes,
                "current_live_bytes": stats.current_live_bytes,
                "log_records_dropped": report.log_records_dropped,
            })),
    )?;
    emitter.flush()?;
    Ok(emitter.lines_written())
}

fn run_id(mode: ReplayMode) -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{mode}-{secs}-{}", std::process::id())
}
