//! Statistics aggregator.
//!
//! Counters are additive. `current_live_bytes` is the only value that goes
//! down; it is maintained with checked arithmetic and clamps at zero if an
//! accounting bug would ever push it negative (the caller logs that).

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use crate::event::SiteId;

/// How many hot sites the report carries.
pub const HOT_SITE_LIMIT: usize = 10;

/// Per-allocation-site aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SiteStats {
    pub site_id: SiteId,
    pub allocations: u64,
    pub bytes: u64,
}

/// Sum/min/max of reclaimed object lifetimes, in trace time units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifetimeStats {
    pub count: u64,
    pub sum: u64,
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl LifetimeStats {
    pub fn record(&mut self, lifetime: u64) {
        self.count += 1;
        self.sum = self.sum.saturating_add(lifetime);
        self.min = Some(self.min.map_or(lifetime, |m| m.min(lifetime)));
        self.max = Some(self.max.map_or(lifetime, |m| m.max(lifetime)));
    }

    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

/// What triggered a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionTrigger {
    ByteThreshold,
    AllocationCount,
    AllocationFailure,
    Final,
}

/// Outcome of the end-of-trace collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FinalCollection {
    /// Residual live objects marked dead before the sweep.
    pub marked_dead: u64,
    pub reclaimed_objects: u64,
    pub reclaimed_bytes: u64,
    pub duration_ns: u64,
}

/// Collector counters. In-trace collections and the final collection are
/// kept apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcStats {
    pub collections: u64,
    pub byte_triggered: u64,
    pub count_triggered: u64,
    pub failure_triggered: u64,
    pub reclaimed_objects: u64,
    pub reclaimed_bytes: u64,
    /// Dead-set entries that were no longer live at sweep time.
    pub absent_at_sweep: u64,
    pub gc_time_ns: u64,
    pub allocation_retries: u64,
    pub retry_successes: u64,
    pub final_collection: Option<FinalCollection>,
}

impl GcStats {
    pub fn record_collection(&mut self, trigger: CollectionTrigger, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        match trigger {
            CollectionTrigger::Final => return,
            CollectionTrigger::ByteThreshold => self.byte_triggered += 1,
            CollectionTrigger::AllocationCount => self.count_triggered += 1,
            CollectionTrigger::AllocationFailure => self.failure_triggered += 1,
        }
        self.collections += 1;
        self.gc_time_ns = self.gc_time_ns.saturating_add(nanos);
    }
}

/// Oracle protocol counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OracleStats {
    pub queued_frees: u64,
    pub drained_frees: u64,
    /// Drains that executed at least one free ahead of an allocation.
    pub drains_before_alloc: u64,
    pub end_of_trace_drained: u64,
    /// Queued ids that were not live when drained.
    pub discarded_unknown: u64,
    pub max_queue_len: u64,
}

/// Session statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub total_allocations: u64,
    pub total_frees: u64,
    pub bytes_allocated: u64,
    pub bytes_freed: u64,
    pub failed_allocations: u64,
    pub failed_frees: u64,
    pub duplicate_allocations: u64,
    pub redundant_deaths: u64,
    pub field_updates: u64,
    pub failed_updates: u64,
    pub method_entries: u64,
    pub method_exits: u64,
    pub current_live_bytes: u64,
    pub peak_live_bytes: u64,
    /// Objects never freed by the trace and released at session teardown.
    pub teardown_released_objects: u64,
    pub teardown_released_bytes: u64,
    pub working_set_samples: u64,
    pub working_set_reads: u64,
    pub lifetimes: LifetimeStats,
    pub gc: GcStats,
    pub oracle: OracleStats,
    #[serde(skip)]
    sites: Vec<SiteStats>,
    #[serde(skip)]
    site_index: HashMap<SiteId, usize>,
}

impl Statistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_allocation(&mut self, site_id: SiteId, size: u64) {
        self.total_allocations += 1;
        self.bytes_allocated = self.bytes_allocated.saturating_add(size);
        self.current_live_bytes = self.current_live_bytes.saturating_add(size);
        self.peak_live_bytes = self.peak_live_bytes.max(self.current_live_bytes);

        let idx = *self.site_index.entry(site_id).or_insert_with(|| {
            self.sites.push(SiteStats {
                site_id,
                allocations: 0,
                bytes: 0,
            });
            self.sites.len() - 1
        });
        let site = &mut self.sites[idx];
        site.allocations += 1;
        site.bytes = site.bytes.saturating_add(size);
    }

    /// Account a reclamation. Returns `false` if live bytes would have gone
    /// negative (clamped to zero).
    #[must_use = "an underflow signals an accounting bug and should be logged"]
    pub fn record_free(&mut self, size: u64, lifetime: u64) -> bool {
        self.total_frees += 1;
        self.bytes_freed = self.bytes_freed.saturating_add(size);
        self.lifetimes.record(lifetime);
        self.drop_live_bytes(size)
    }

    /// Account an object released by teardown rather than by the trace.
    #[must_use = "an underflow signals an accounting bug and should be logged"]
    pub fn record_teardown_release(&mut self, size: u64) -> bool {
        self.teardown_released_objects += 1;
        self.teardown_released_bytes = self.teardown_released_bytes.saturating_add(size);
        self.drop_live_bytes(size)
    }

    fn drop_live_bytes(&mut self, size: u64) -> bool {
        match self.current_live_bytes.checked_sub(size) {
            Some(next) => {
                self.current_live_bytes = next;
                true
            }
            None => {
                self.current_live_bytes = 0;
                false
            }
        }
    }

    /// Sites in first-seen order.
    #[must_use]
    pub fn sites(&self) -> &[SiteStats] {
        &self.sites
    }

    /// Top `n` sites by allocation count, ties broken by first-seen order.
    #[must_use]
    pub fn hot_sites(&self, n: usize) -> Vec<SiteStats> {
        let mut ranked = self.sites.clone();
        // stable sort keeps first-seen order among equal counts
        ranked.sort_by(|a, b| b.allocations.cmp(&a.allocations));
        ranked.truncate(n);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_is_running_maximum() {
        let mut stats = Statistics::new();
        stats.record_allocation(1, 10);
        stats.record_allocation(1, 20);
        assert!(stats.record_free(10, 5));
        stats.record_allocation(2, 5);
        assert_eq!(stats.current_live_bytes, 25);
        assert_eq!(stats.peak_live_bytes, 30);
    }

    #[test]
    fn underflow_clamps_and_reports() {
        let mut stats = Statistics::new();
        stats.record_allocation(1, 8);
        assert!(!stats.record_free(16, 0));
        assert_eq!(stats.current_live_bytes, 0);
    }

    #[test]
    fn hot_sites_rank_by_count_then_first_seen() {
        let mut stats = Statistics::new();
        for site in [9, 4, 4, 7, 9, 7] {
            stats.record_allocation(site, 1);
        }
        stats.record_allocation(5, 100);
        let ranked: Vec<(u64, u64)> = stats
            .hot_sites(HOT_SITE_LIMIT)
            .iter()
            .map(|s| (s.site_id, s.allocations))
            .collect();
        assert_eq!(ranked, vec![(9, 2), (4, 2), (7, 2), (5, 1)]);
        assert_eq!(stats.hot_sites(1).len(), 1);
    }

    #[test]
    fn lifetime_summary_tracks_extremes() {
        let mut lifetimes = LifetimeStats::default();
        assert_eq!(lifetimes.mean(), None);
        for lifetime in [4, 0, 10] {
            lifetimes.record(lifetime);
        }
        assert_eq!(lifetimes.count, 3);
        assert_eq!(lifetimes.min, Some(0));
        assert_eq!(lifetimes.max, Some(10));
        assert_eq!(lifetimes.mean(), Some(14.0 / 3.0));
    }

    #[test]
    fn final_collection_is_not_counted_as_in_trace() {
        let mut gc = GcStats::default();
        gc.record_collection(CollectionTrigger::AllocationCount, Duration::from_micros(3));
        gc.record_collection(CollectionTrigger::Final, Duration::from_micros(5));
        assert_eq!(gc.collections, 1);
        assert_eq!(gc.count_triggered, 1);
        assert_eq!(gc.gc_time_ns, 3_000);
    }
}
