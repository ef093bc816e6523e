//! Simulated garbage collector.
//!
//! Death records only mark an id dead. Physical release happens in a sweep,
//! triggered after a successful allocation once live bytes exceed the byte
//! threshold or allocations since the last sweep exceed the count threshold.
//! Reachability is never computed: field updates do not keep anything alive.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use heapreplay_alloc::AllocatorBackend;

use super::heap::{AllocAttempt, AllocRequest, Heap, SWEEP_TOUCH_STRIDE};
use super::MemoryManager;
use crate::config::{GcConfig, ReplayConfig, ReplayMode};
use crate::event::ObjectId;
use crate::log::{LogFields, ReplayLogLevel};
use crate::stats::{CollectionTrigger, FinalCollection};

/// Result of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionOutcome {
    pub trigger: CollectionTrigger,
    pub reclaimed_objects: u64,
    pub reclaimed_bytes: u64,
    /// Dead ids that were no longer live.
    pub absent: u64,
    pub duration: Duration,
}

#[derive(Debug)]
pub struct GcManager<'b> {
    heap: Heap<'b>,
    config: GcConfig,
    /// Dead id to the timestamp of its (first) death record.
    dead: HashMap<ObjectId, u64>,
    allocs_since_collection: u64,
}

impl<'b> GcManager<'b> {
    #[must_use]
    pub fn new(backend: &'b dyn AllocatorBackend, config: &ReplayConfig) -> Self {
        Self {
            heap: Heap::new(backend, config),
            config: config.gc,
            dead: HashMap::new(),
            allocs_since_collection: 0,
        }
    }

    #[must_use]
    pub fn dead_count(&self) -> usize {
        self.dead.len()
    }

    #[must_use]
    pub fn is_dead(&self, id: ObjectId) -> bool {
        self.dead.contains_key(&id)
    }

    #[must_use]
    pub fn allocs_since_collection(&self) -> u64 {
        self.allocs_since_collection
    }

    /// Sweep the dead set: release every dead id that is still live, then
    /// clear the set and reset the allocation counter.
    pub fn collect(&mut self, trigger: CollectionTrigger) -> CollectionOutcome {
        let started = Instant::now();
        let mut dead: Vec<(ObjectId, u64)> = self.dead.drain().collect();
        dead.sort_unstable();

        let mut outcome = CollectionOutcome {
            trigger,
            reclaimed_objects: 0,
            reclaimed_bytes: 0,
            absent: 0,
            duration: Duration::ZERO,
        };
        for (id, death_time) in dead {
            match self.heap.release(id, death_time, SWEEP_TOUCH_STRIDE, "collect") {
                Some(size) => {
                    outcome.reclaimed_objects += 1;
                    outcome.reclaimed_bytes = outcome.reclaimed_bytes.saturating_add(size);
                }
                None => outcome.absent += 1,
            }
        }
        self.allocs_since_collection = 0;
        outcome.duration = started.elapsed();

        let gc = &mut self.heap.stats_mut().gc;
        gc.record_collection(trigger, outcome.duration);
        gc.absent_at_sweep += outcome.absent;
        if trigger != CollectionTrigger::Final {
            gc.reclaimed_objects += outcome.reclaimed_objects;
            gc.reclaimed_bytes = gc.reclaimed_bytes.saturating_add(outcome.reclaimed_bytes);
        }

        let (level, event) = match trigger {
            CollectionTrigger::Final => (ReplayLogLevel::Info, "final_collection"),
            _ => (ReplayLogLevel::Trace, "collection"),
        };
        self.heap.note(
            level,
            LogFields::new("collect", event, "swept").size(outcome.reclaimed_bytes),
            || {
                format!(
                    "trigger={trigger:?};reclaimed={};absent={};duration_ns={}",
                    outcome.reclaimed_objects,
                    outcome.absent,
                    outcome.duration.as_nanos()
                )
            },
        );
        outcome
    }

    fn collection_due(&self) -> Option<CollectionTrigger> {
        if self.heap.stats().current_live_bytes > self.config.byte_threshold {
            Some(CollectionTrigger::ByteThreshold)
        } else if self.allocs_since_collection > self.config.alloc_count_threshold {
            Some(CollectionTrigger::AllocationCount)
        } else {
            None
        }
    }

    /// An id being allocated again is no longer subject to an earlier death.
    /// If the old incarnation is still live it is reclaimed now.
    fn retire_reused_id(&mut self, id: ObjectId) {
        let Some(death_time) = self.dead.remove(&id) else {
            return;
        };
        if self
            .heap
            .release(id, death_time, SWEEP_TOUCH_STRIDE, "allocate")
            .is_some()
        {
            self.heap.note(
                ReplayLogLevel::Trace,
                LogFields::new("allocate", "reclaim_before_reuse", "released").object(id),
                || format!("death_time={death_time}"),
            );
        }
    }
}

impl<'b> MemoryManager<'b> for GcManager<'b> {
    fn mode(&self) -> ReplayMode {
        ReplayMode::Gc
    }

    fn allocate(&mut self, request: AllocRequest) -> bool {
        self.retire_reused_id(request.id);

        match self.heap.try_allocate(request) {
            AllocAttempt::Allocated => {}
            AllocAttempt::Duplicate => return false,
            AllocAttempt::BackendFailed => {
                self.heap.note(
                    ReplayLogLevel::Info,
                    LogFields::new("allocate", "collect_on_failure", "retry")
                        .object(request.id)
                        .size(request.size),
                    || "backend_returned_null",
                );
                self.heap.stats_mut().gc.allocation_retries += 1;
                self.collect(CollectionTrigger::AllocationFailure);
                if self.heap.try_allocate(request) != AllocAttempt::Allocated {
                    self.heap.record_allocation_failure(request);
                    return false;
                }
                self.heap.stats_mut().gc.retry_successes += 1;
            }
        }

        self.allocs_since_collection += 1;
        if let Some(trigger) = self.collection_due() {
            self.collect(trigger);
        }
        true
    }

    fn deallocate(&mut self, id: ObjectId, time: u64) {
        if self.dead.contains_key(&id) {
            self.heap.stats_mut().redundant_deaths += 1;
            self.heap.note(
                ReplayLogLevel::Trace,
                LogFields::new("deallocate", "redundant_death", "ignored").object(id),
                || "already_in_dead_set",
            );
            return;
        }
        if !self.heap.table().contains(id) {
            self.heap.record_unknown_free(id, "deallocate");
        }
        self.dead.insert(id, time);
        self.heap.note(
            ReplayLogLevel::Trace,
            LogFields::new("deallocate", "mark_dead", "deferred").object(id),
            || format!("dead_set={}", self.dead.len()),
        );
    }

    fn finish(&mut self, end_time: u64) {
        let mut marked_dead = 0_u64;
        for id in self.heap.table().ids() {
            if let std::collections::hash_map::Entry::Vacant(slot) = self.dead.entry(id) {
                slot.insert(end_time);
                marked_dead += 1;
            }
        }
        let outcome = self.collect(CollectionTrigger::Final);
        self.heap.stats_mut().gc.final_collection = Some(FinalCollection {
            marked_dead,
            reclaimed_objects: outcome.reclaimed_objects,
            reclaimed_bytes: outcome.reclaimed_bytes,
            duration_ns: u64::try_from(outcome.duration.as_nanos()).unwrap_or(u64::MAX),
        });
        self.heap.teardown("finish");
    }

    fn heap(&self) -> &Heap<'b> {
        &self.heap
    }

    fn heap_mut(&mut self) -> &mut Heap<'b> {
        &mut self.heap
    }
}
