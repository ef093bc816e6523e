//! State shared by every memory manager: the borrowed backend, the live
//! object table, statistics and the replay log.

use std::hint::black_box;

use heapreplay_alloc::{AllocatorBackend, Region};

use crate::config::ReplayConfig;
use crate::event::{Event, EventKind, ObjectId, SiteId};
use crate::log::{LogFields, ReplayLog, ReplayLogLevel, ReplayLogRecord};
use crate::stats::Statistics;
use crate::table::{AllocatedObject, LiveObjectTable};

/// Bytes touched before an object is released.
pub const RELEASE_TOUCH_BYTES: usize = 64;
/// Stride of the last-use touch on explicit release.
pub const FREE_TOUCH_STRIDE: usize = 1;
/// Stride of the traversal touch during a sweep.
pub const SWEEP_TOUCH_STRIDE: usize = 8;

/// Share of the live set read by one working-set sample, in percent.
const WORKING_SET_SAMPLE_PERCENT: usize = 10;

/// An allocation to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRequest {
    pub id: ObjectId,
    pub size: u64,
    pub site_id: SiteId,
    pub time: u64,
}

impl AllocRequest {
    #[must_use]
    pub fn new(id: ObjectId, size: u64, site_id: SiteId, time: u64) -> Self {
        Self {
            id,
            size,
            site_id,
            time,
        }
    }

    /// Build from an `Alloc` event; `None` for any other kind.
    #[must_use]
    pub fn from_event(event: &Event) -> Option<Self> {
        match event.kind {
            EventKind::Alloc { size, site_id, .. } => {
                Some(Self::new(event.object_id, size, site_id, event.time))
            }
            _ => None,
        }
    }
}

/// Result of a single backend attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocAttempt {
    Allocated,
    /// Id already live; nothing was requested from the backend.
    Duplicate,
    /// Backend returned null. Not yet counted as a failure.
    BackendFailed,
}

pub struct Heap<'b> {
    backend: &'b dyn AllocatorBackend,
    table: LiveObjectTable,
    stats: Statistics,
    log: ReplayLog,
    sample_interval: u64,
    allocs_since_sample: u64,
}

impl<'b> Heap<'b> {
    #[must_use]
    pub fn new(backend: &'b dyn AllocatorBackend, config: &ReplayConfig) -> Self {
        Self {
            backend,
            table: LiveObjectTable::new(),
            stats: Statistics::new(),
            log: ReplayLog::new(config.mode, config.log_level).with_capacity(config.log_capacity),
            sample_interval: config.working_set_sample_interval,
            allocs_since_sample: 0,
        }
    }

    #[must_use]
    pub fn backend(&self) -> &'b dyn AllocatorBackend {
        self.backend
    }

    #[must_use]
    pub fn table(&self) -> &LiveObjectTable {
        &self.table
    }

    #[must_use]
    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut Statistics {
        &mut self.stats
    }

    #[must_use]
    pub fn log_records(&self) -> &[ReplayLogRecord] {
        self.log.records()
    }

    pub fn drain_logs(&mut self) -> Vec<ReplayLogRecord> {
        self.log.drain()
    }

    /// Records that passed the level filter but exceeded the retention cap.
    #[must_use]
    pub fn logs_dropped(&self) -> u64 {
        self.log.dropped()
    }

    pub(crate) fn note<D: Into<String>>(
        &mut self,
        level: ReplayLogLevel,
        fields: LogFields,
        details: impl FnOnce() -> D,
    ) {
        self.log.record(
            level,
            fields,
            details,
            self.stats.current_live_bytes,
            self.table.len(),
        );
    }

    /// One backend attempt. Touches and tracks the region on success.
    pub(crate) fn try_allocate(&mut self, request: AllocRequest) -> AllocAttempt {
        if self.table.contains(request.id) {
            self.stats.duplicate_allocations += 1;
            self.note(
                ReplayLogLevel::Warn,
                LogFields::new("allocate", "duplicate_alloc", "rejected")
                    .object(request.id)
                    .size(request.size),
                || "object_already_live",
            );
            return AllocAttempt::Duplicate;
        }

        let region = usize::try_from(request.size)
            .ok()
            .and_then(|size| self.backend.allocate(size));
        let Some(region) = region else {
            return AllocAttempt::BackendFailed;
        };
        self.admit(request, region);
        AllocAttempt::Allocated
    }

    fn admit(&mut self, request: AllocRequest, mut region: Region) {
        let stores = region.touch_fresh();
        let object = AllocatedObject {
            id: request.id,
            region,
            size: request.size,
            alloc_time: request.time,
            site_id: request.site_id,
        };
        if let Err(object) = self.table.insert(object) {
            // try_allocate checked the id; keep the table authoritative anyway
            self.backend.deallocate(object.region);
            self.stats.duplicate_allocations += 1;
            return;
        }
        self.stats.record_allocation(request.site_id, request.size);
        self.note(
            ReplayLogLevel::Trace,
            LogFields::new("allocate", "alloc", "success")
                .object(request.id)
                .size(request.size),
            || format!("site={};touch_stores={stores}", request.site_id),
        );
        self.maybe_sample_working_set();
    }

    /// Count a final allocation failure.
    pub(crate) fn record_allocation_failure(&mut self, request: AllocRequest) {
        self.stats.failed_allocations += 1;
        let backend = self.backend.name();
        self.note(
            ReplayLogLevel::Warn,
            LogFields::new("allocate", "alloc", "oom")
                .object(request.id)
                .size(request.size),
            || format!("backend={backend}"),
        );
    }

    /// Remove `id` from the table, touch its prefix with `stride`, release it
    /// and account a reclamation at `free_time`. Returns the recorded size, or
    /// `None` if `id` is not live (nothing is counted in that case).
    pub(crate) fn release(
        &mut self,
        id: ObjectId,
        free_time: u64,
        stride: usize,
        symbol: &'static str,
    ) -> Option<u64> {
        let mut object = self.table.remove(id)?;
        object.region.touch_prefix(RELEASE_TOUCH_BYTES, stride);
        let lifetime = object.lifetime_at(free_time);
        let size = object.size;
        self.backend.deallocate(object.region);
        if !self.stats.record_free(size, lifetime) {
            self.note_underflow(symbol, id, size);
        }
        self.note(
            ReplayLogLevel::Trace,
            LogFields::new(symbol, "free", "released").object(id).size(size),
            || format!("lifetime={lifetime}"),
        );
        Some(size)
    }

    /// Count and log a free/death for an id that is not live.
    pub(crate) fn record_unknown_free(&mut self, id: ObjectId, symbol: &'static str) {
        self.stats.failed_frees += 1;
        self.note(
            ReplayLogLevel::Warn,
            LogFields::new(symbol, "unknown_free", "ignored").object(id),
            || "object_not_live",
        );
    }

    fn note_underflow(&mut self, symbol: &'static str, id: ObjectId, size: u64) {
        self.note(
            ReplayLogLevel::Error,
            LogFields::new(symbol, "invariant_live_bytes_underflow", "recovered")
                .object(id)
                .size(size),
            || "checked_sub_failed",
        );
    }

    /// Write a reference to `source` into `target`. Both must be live.
    pub fn update_field(&mut self, target: ObjectId, source: ObjectId) -> bool {
        let source_addr = self.table.get(source).map(|o| o.region.addr());
        let written = match (self.table.get_mut(target), source_addr) {
            (Some(object), Some(addr)) => {
                object.region.write_reference(addr);
                true
            }
            _ => false,
        };
        if written {
            self.stats.field_updates += 1;
        } else {
            self.stats.failed_updates += 1;
            self.note(
                ReplayLogLevel::Trace,
                LogFields::new("update_field", "unknown_object", "ignored").object(target),
                || format!("source={source}"),
            );
        }
        written
    }

    pub fn method_entry(&mut self) {
        self.stats.method_entries += 1;
    }

    pub fn method_exit(&mut self) {
        self.stats.method_exits += 1;
    }

    /// Release every remaining live object. These count as teardown
    /// releases, not frees. Returns how many were released.
    pub(crate) fn teardown(&mut self, symbol: &'static str) -> u64 {
        let residual = self.table.drain_sorted();
        let count = residual.len() as u64;
        let mut bytes = 0_u64;
        for object in residual {
            bytes = bytes.saturating_add(object.size);
            let (id, size) = (object.id, object.size);
            self.backend.deallocate(object.region);
            if !self.stats.record_teardown_release(size) {
                self.note_underflow(symbol, id, size);
            }
        }
        if count > 0 {
            self.note(
                ReplayLogLevel::Info,
                LogFields::new(symbol, "teardown_release", "released").size(bytes),
                || format!("objects={count}"),
            );
        }
        count
    }

    fn maybe_sample_working_set(&mut self) {
        if self.sample_interval == 0 {
            return;
        }
        self.allocs_since_sample += 1;
        if self.allocs_since_sample < self.sample_interval {
            return;
        }
        self.allocs_since_sample = 0;
        let reads = (self.table.len() * WORKING_SET_SAMPLE_PERCENT / 100).max(1);
        let mut checksum = 0_u64;
        let mut done = 0_u64;
        for object in self.table.values().take(reads) {
            checksum = checksum.wrapping_add(u64::from(object.region.read_first()));
            done += 1;
        }
        black_box(checksum);
        self.stats.working_set_samples += 1;
        self.stats.working_set_reads += done;
    }
}

impl Drop for Heap<'_> {
    fn drop(&mut self) {
        for object in self.table.drain_sorted() {
            self.backend.deallocate(object.region);
        }
    }
}

impl std::fmt::Debug for Heap<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("backend", &self.backend.name())
            .field("live_objects", &self.table.len())
            .field("live_bytes", &self.table.live_bytes())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplayMode;
    use heapreplay_alloc::{BoundedBackend, SystemBackend};

    fn config() -> ReplayConfig {
        ReplayConfig::new(ReplayMode::Explicit).with_log_level(ReplayLogLevel::Trace)
    }

    #[test]
    fn zero_size_allocation_is_tracked_at_recorded_size() {
        let backend = SystemBackend::new();
        let mut heap = Heap::new(&backend, &config());
        assert_eq!(
            heap.try_allocate(AllocRequest::new(1, 0, 0, 0)),
            AllocAttempt::Allocated
        );
        assert_eq!(heap.stats().current_live_bytes, 0);
        assert_eq!(heap.table().get(1).map(|o| o.region.len()), Some(1));
        assert_eq!(heap.release(1, 5, FREE_TOUCH_STRIDE, "deallocate"), Some(0));
        assert_eq!(heap.stats().total_frees, 1);
    }

    #[test]
    fn backend_failure_is_not_counted_by_the_attempt() {
        let bounded = BoundedBackend::new(Box::new(SystemBackend::new()), 16);
        let mut heap = Heap::new(&bounded, &config());
        let request = AllocRequest::new(1, 64, 0, 0);
        assert_eq!(heap.try_allocate(request), AllocAttempt::BackendFailed);
        assert_eq!(heap.stats().failed_allocations, 0);
        heap.record_allocation_failure(request);
        assert_eq!(heap.stats().failed_allocations, 1);
        assert!(heap.table().is_empty());
        assert!(
            heap.log_records()
                .iter()
                .any(|r| r.level == ReplayLogLevel::Warn && r.outcome == "oom")
        );
    }

    #[test]
    fn update_field_requires_both_objects_live() {
        let backend = SystemBackend::new();
        let mut heap = Heap::new(&backend, &config());
        heap.try_allocate(AllocRequest::new(1, 32, 0, 0));
        heap.try_allocate(AllocRequest::new(2, 32, 0, 0));
        assert!(heap.update_field(1, 2));
        let source_addr = heap.table().get(2).map(|o| o.region.addr());
        assert_eq!(
            heap.table().get(1).and_then(|o| o.region.read_reference()),
            source_addr
        );
        assert!(!heap.update_field(1, 99));
        assert!(!heap.update_field(99, 1));
        assert_eq!(heap.stats().field_updates, 1);
        assert_eq!(heap.stats().failed_updates, 2);
    }

    #[test]
    fn teardown_counts_residuals_separately_from_frees() {
        let backend = SystemBackend::new();
        let mut heap = Heap::new(&backend, &config());
        heap.try_allocate(AllocRequest::new(1, 10, 0, 0));
        heap.try_allocate(AllocRequest::new(2, 20, 0, 0));
        assert_eq!(heap.teardown("finish"), 2);
        let stats = heap.stats();
        assert_eq!(stats.total_frees, 0);
        assert_eq!(stats.teardown_released_objects, 2);
        assert_eq!(stats.teardown_released_bytes, 30);
        assert_eq!(stats.current_live_bytes, 0);
        assert_eq!(backend.stats().map(|s| s.outstanding_bytes), Some(0));
    }

    #[test]
    fn dropping_the_heap_releases_live_regions() {
        let backend = SystemBackend::new();
        {
            let mut heap = Heap::new(&backend, &config());
            heap.try_allocate(AllocRequest::new(7, 100, 0, 0));
        }
        let stats = backend.stats().expect("stats");
        assert_eq!(stats.allocations, stats.deallocations);
    }

    #[test]
    fn working_set_sampling_reads_a_tenth_of_live_objects() {
        let backend = SystemBackend::new();
        let mut heap = Heap::new(&backend, &config().with_working_set_sampling(20));
        for id in 0..40 {
            heap.try_allocate(AllocRequest::new(id, 16, 0, id));
        }
        // samples at 20 live (2 reads) and 40 live (4 reads)
        assert_eq!(heap.stats().working_set_samples, 2);
        assert_eq!(heap.stats().working_set_reads, 6);
    }
}
