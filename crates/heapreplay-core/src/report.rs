//! Serializable replay report.

use heapreplay_alloc::{BackendSelection, BackendStats};
use serde::Serialize;

use crate::config::{GcConfig, ReplayMode};
use crate::session::ReplayOutcome;
use crate::stats::{HOT_SITE_LIMIT, SiteStats, Statistics};
use crate::trace::{IngestSummary, Trace};

/// Which backend ran and how it was chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    pub name: String,
    pub requested: String,
    pub resolved: String,
    pub fell_back: bool,
    pub heap_limit: Option<u64>,
    pub stats: Option<BackendStats>,
}

impl BackendInfo {
    /// Capture selection details. Call after the replay so `stats` is final.
    #[must_use]
    pub fn from_selection(selection: &BackendSelection, heap_limit: Option<u64>) -> Self {
        Self {
            name: selection.backend.name().to_string(),
            requested: selection.requested.clone(),
            resolved: selection.resolved.to_string(),
            fell_back: selection.fell_back,
            heap_limit,
            stats: selection.backend.stats(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceInfo {
    pub path: Option<String>,
    pub sha256: Option<String>,
    pub end_time: u64,
    pub ingest: IngestSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LifetimeSummary {
    pub reclaimed: u64,
    pub mean: Option<f64>,
    pub min: Option<u64>,
    pub max: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub mode: ReplayMode,
    /// Thresholds in effect; only present for GC replays.
    pub gc_config: Option<GcConfig>,
    pub backend: BackendInfo,
    pub trace: TraceInfo,
    pub events_processed: u64,
    pub replay_time_ns: u64,
    /// Log records lost to the retention cap.
    pub log_records_dropped: u64,
    pub statistics: Statistics,
    pub hot_sites: Vec<SiteStats>,
    pub lifetime: LifetimeSummary,
}

impl ReplayReport {
    #[must_use]
    pub fn new(outcome: &ReplayOutcome, trace: &Trace, backend: BackendInfo) -> Self {
        let lifetimes = outcome.statistics.lifetimes;
        Self {
            mode: outcome.mode,
            gc_config: None,
            backend,
            trace: TraceInfo {
                path: None,
                sha256: None,
                end_time: trace.end_time,
                ingest: trace.summary.clone(),
            },
            events_processed: outcome.events_processed,
            replay_time_ns: u64::try_from(outcome.elapsed.as_nanos()).unwrap_or(u64::MAX),
            log_records_dropped: outcome.logs_dropped,
            hot_sites: outcome.statistics.hot_sites(HOT_SITE_LIMIT),
            statistics: outcome.statistics.clone(),
            lifetime: LifetimeSummary {
                reclaimed: lifetimes.count,
                mean: lifetimes.mean(),
                min: lifetimes.min,
                max: lifetimes.max,
            },
        }
    }

    #[must_use]
    pub fn with_trace_source(mut self, path: impl Into<String>, sha256: impl Into<String>) -> Self {
        self.trace.path = Some(path.into());
        self.trace.sha256 = Some(sha256.into());
        self
    }

    #[must_use]
    pub fn with_gc_config(mut self, gc: GcConfig) -> Self {
        if self.mode == ReplayMode::Gc {
            self.gc_config = Some(gc);
        }
        self
    }

    /// Objects the trace never freed (released only at teardown).
    #[must_use]
    pub fn never_freed(&self) -> u64 {
        self.statistics.teardown_released_objects
    }
}
