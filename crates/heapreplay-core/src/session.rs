//! Replay driver.
//!
//! A [`ReplaySession`] owns the manager chosen by the configured mode and
//! feeds it events strictly in order. The backend is borrowed and must
//! outlive the session.

use std::time::{Duration, Instant};

use heapreplay_alloc::AllocatorBackend;

use crate::config::{ReplayConfig, ReplayMode};
use crate::event::{Event, EventKind, ObjectId};
use crate::log::{LogFields, ReplayLogLevel, ReplayLogRecord};
use crate::manager::{AllocRequest, MemoryManager, build_manager};
use crate::stats::Statistics;
use crate::trace::{IngestSummary, Trace};

pub struct ReplaySession<'b> {
    config: ReplayConfig,
    manager: Box<dyn MemoryManager<'b> + 'b>,
    events_processed: u64,
    last_time: u64,
    elapsed: Duration,
    finished: bool,
}

impl<'b> ReplaySession<'b> {
    #[must_use]
    pub fn new(config: ReplayConfig, backend: &'b dyn AllocatorBackend) -> Self {
        let manager = build_manager(&config, backend);
        Self {
            config,
            manager,
            events_processed: 0,
            last_time: 0,
            elapsed: Duration::ZERO,
            finished: false,
        }
    }

    #[must_use]
    pub fn mode(&self) -> ReplayMode {
        self.config.mode
    }

    #[must_use]
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Dispatch one event to the active manager.
    pub fn apply(&mut self, event: &Event) {
        self.events_processed += 1;
        self.last_time = self.last_time.max(event.time);
        match event.kind {
            EventKind::Alloc { .. } => {
                if let Some(request) = AllocRequest::from_event(event) {
                    self.manager.allocate(request);
                }
            }
            EventKind::Free => self.manager.deallocate(event.object_id, event.time),
            EventKind::FieldUpdate { source_id, .. } => {
                self.manager.update_field(event.object_id, source_id);
            }
            EventKind::MethodEntry { .. } => self.manager.method_entry(),
            EventKind::MethodExit { .. } => self.manager.method_exit(),
        }
    }

    /// Replay `events` in order, accumulating wall-clock replay time.
    pub fn run(&mut self, events: &[Event]) {
        let started = Instant::now();
        for event in events {
            self.apply(event);
        }
        self.elapsed += started.elapsed();
    }

    /// Mode-specific end-of-trace finalization. Idempotent.
    pub fn finish(&mut self, end_time: u64) {
        if self.finished {
            return;
        }
        self.finished = true;
        let started = Instant::now();
        self.manager.finish(end_time.max(self.last_time));
        self.elapsed += started.elapsed();
    }

    /// Log dropped trace lines.
    pub fn record_ingest(&mut self, summary: &IngestSummary) {
        let heap = self.manager.heap_mut();
        for failure in &summary.failure_sample {
            heap.note(
                ReplayLogLevel::Warn,
                LogFields::new("ingest", "parse_failure", "dropped"),
                || format!("line={};error={}", failure.line, failure.error),
            );
        }
        let unsampled = summary
            .parse_failures
            .saturating_sub(summary.failure_sample.len());
        if unsampled > 0 {
            heap.note(
                ReplayLogLevel::Warn,
                LogFields::new("ingest", "parse_failures_unsampled", "dropped"),
                || format!("count={unsampled}"),
            );
        }
    }

    /// Record that the requested backend name was unknown.
    pub fn record_backend_fallback(&mut self, requested: &str, resolved: &str) {
        self.manager.heap_mut().note(
            ReplayLogLevel::Debug,
            LogFields::new("backend", "backend_fallback", "defaulted"),
            || format!("requested={requested};resolved={resolved}"),
        );
    }

    #[must_use]
    pub fn statistics(&self) -> &Statistics {
        self.manager.heap().stats()
    }

    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.manager.heap().table().len()
    }

    #[must_use]
    pub fn is_live(&self, id: ObjectId) -> bool {
        self.manager.heap().table().contains(id)
    }

    /// Sum of recorded sizes in the live table.
    #[must_use]
    pub fn table_live_bytes(&self) -> u64 {
        self.manager.heap().table().live_bytes()
    }

    #[must_use]
    pub fn pending_frees(&self) -> usize {
        self.manager.pending_frees()
    }

    #[must_use]
    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    #[must_use]
    pub fn log_records(&self) -> &[ReplayLogRecord] {
        self.manager.heap().log_records()
    }

    pub fn drain_logs(&mut self) -> Vec<ReplayLogRecord> {
        self.manager.heap_mut().drain_logs()
    }

    /// Log records lost to the retention cap.
    #[must_use]
    pub fn logs_dropped(&self) -> u64 {
        self.manager.heap().logs_dropped()
    }

    /// Finish if needed and hand back everything the caller reports on.
    pub fn into_outcome(mut self) -> ReplayOutcome {
        let end = self.last_time;
        self.finish(end);
        ReplayOutcome {
            mode: self.config.mode,
            statistics: self.manager.heap().stats().clone(),
            logs: self.drain_logs(),
            logs_dropped: self.logs_dropped(),
            events_processed: self.events_processed,
            elapsed: self.elapsed,
        }
    }
}

impl std::fmt::Debug for ReplaySession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplaySession")
            .field("mode", &self.config.mode)
            .field("events_processed", &self.events_processed)
            .field("live_objects", &self.live_objects())
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Result of a whole-trace replay.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub mode: ReplayMode,
    pub statistics: Statistics,
    pub logs: Vec<ReplayLogRecord>,
    pub logs_dropped: u64,
    pub events_processed: u64,
    pub elapsed: Duration,
}

/// Replay a loaded trace from start to finish.
pub fn replay(
    trace: &Trace,
    config: ReplayConfig,
    backend: &dyn AllocatorBackend,
) -> ReplayOutcome {
    let mut session = ReplaySession::new(config, backend);
    session.record_ingest(&trace.summary);
    session.run(&trace.events);
    session.finish(trace.end_time);
    session.into_outcome()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::parse_trace;
    use heapreplay_alloc::SystemBackend;

    #[test]
    fn dispatch_routes_each_kind() {
        let backend = SystemBackend::new();
        let mut session = ReplaySession::new(ReplayConfig::new(ReplayMode::Explicit), &backend);
        session.apply(&Event::alloc(0, 1, 64, 2));
        session.apply(&Event::alloc(1, 2, 64, 2));
        session.apply(&Event::field_update(2, 1, 2));
        session.apply(&Event::free(3, 1));
        let stats = session.statistics();
        assert_eq!(stats.total_allocations, 2);
        assert_eq!(stats.field_updates, 1);
        assert_eq!(stats.total_frees, 1);
        assert_eq!(session.live_objects(), 1);
        assert_eq!(session.events_processed(), 4);
    }

    #[test]
    fn finish_is_idempotent() {
        let backend = SystemBackend::new();
        let mut session = ReplaySession::new(ReplayConfig::new(ReplayMode::Gc), &backend);
        session.apply(&Event::alloc(0, 1, 64, 2));
        session.finish(5);
        session.finish(5);
        assert!(session.is_finished());
        let gc = session.statistics().gc;
        assert_eq!(gc.final_collection.map(|f| f.reclaimed_objects), Some(1));
    }

    #[test]
    fn parse_failures_become_warnings() {
        let backend = SystemBackend::new();
        let trace = parse_trace("N 1 8 0 0 0 0\nQ 1\nN 2 8 0\n");
        let outcome = replay(&trace, ReplayConfig::new(ReplayMode::Explicit), &backend);
        let warnings: Vec<&ReplayLogRecord> = outcome
            .logs
            .iter()
            .filter(|r| r.event == "parse_failure")
            .collect();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].details.starts_with("line=2;"));
        assert_eq!(outcome.statistics.total_allocations, 1);
        assert_eq!(outcome.statistics.teardown_released_objects, 1);
    }

    #[test]
    fn empty_trace_replays_to_zero_statistics() {
        let backend = SystemBackend::new();
        for mode in ReplayMode::ALL {
            let outcome = replay(&Trace::default(), ReplayConfig::new(mode), &backend);
            assert_eq!(outcome.statistics.total_allocations, 0);
            assert_eq!(outcome.statistics.peak_live_bytes, 0);
            assert_eq!(outcome.events_processed, 0);
        }
    }

    #[test]
    fn dropping_an_unfinished_session_releases_memory() {
        let backend = SystemBackend::new();
        {
            let mut session =
                ReplaySession::new(ReplayConfig::new(ReplayMode::Oracle), &backend);
            session.apply(&Event::alloc(0, 1, 256, 0));
            session.apply(&Event::alloc(1, 2, 256, 0));
        }
        let stats = backend.stats().expect("stats");
        assert_eq!(stats.outstanding_bytes, 0);
    }
}
