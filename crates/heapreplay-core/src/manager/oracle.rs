//! Oracle protocol: frees are queued and the queue is drained in full right
//! before every allocation, so reclamation always precedes the allocation
//! that follows it in the recorded order.

use std::collections::VecDeque;

use heapreplay_alloc::AllocatorBackend;

use super::heap::{AllocAttempt, AllocRequest, FREE_TOUCH_STRIDE, Heap};
use super::MemoryManager;
use crate::config::{ReplayConfig, ReplayMode};
use crate::event::ObjectId;
use crate::log::{LogFields, ReplayLogLevel};

/// Next-allocation size passed when draining without an allocation to gate.
pub const NO_ALLOCATION: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingFree {
    id: ObjectId,
    time: u64,
}

#[derive(Debug)]
pub struct OracleManager<'b> {
    heap: Heap<'b>,
    pending: VecDeque<PendingFree>,
}

impl<'b> OracleManager<'b> {
    #[must_use]
    pub fn new(backend: &'b dyn AllocatorBackend, config: &ReplayConfig) -> Self {
        Self {
            heap: Heap::new(backend, config),
            pending: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Execute every queued free in insertion order. `next_alloc_size` is
    /// the allocation being gated, or [`NO_ALLOCATION`]. Returns how many
    /// queue entries were processed.
    pub fn drain(&mut self, next_alloc_size: u64) -> u64 {
        let mut processed = 0_u64;
        while let Some(free) = self.pending.pop_front() {
            processed += 1;
            if self
                .heap
                .release(free.id, free.time, FREE_TOUCH_STRIDE, "drain")
                .is_some()
            {
                self.heap.stats_mut().oracle.drained_frees += 1;
            } else {
                self.heap.stats_mut().oracle.discarded_unknown += 1;
                self.heap.record_unknown_free(free.id, "drain");
            }
        }
        if processed > 0 {
            self.heap.note(
                ReplayLogLevel::Trace,
                LogFields::new("drain", "drain", "drained").size(next_alloc_size),
                || format!("processed={processed}"),
            );
        }
        processed
    }
}

impl<'b> MemoryManager<'b> for OracleManager<'b> {
    fn mode(&self) -> ReplayMode {
        ReplayMode::Oracle
    }

    fn allocate(&mut self, request: AllocRequest) -> bool {
        if self.drain(request.size) > 0 {
            self.heap.stats_mut().oracle.drains_before_alloc += 1;
        }
        debug_assert!(self.pending.is_empty());
        match self.heap.try_allocate(request) {
            AllocAttempt::Allocated => true,
            AllocAttempt::Duplicate => false,
            AllocAttempt::BackendFailed => {
                self.heap.record_allocation_failure(request);
                false
            }
        }
    }

    fn deallocate(&mut self, id: ObjectId, time: u64) {
        self.pending.push_back(PendingFree { id, time });
        let queued = self.pending.len() as u64;
        let oracle = &mut self.heap.stats_mut().oracle;
        oracle.queued_frees += 1;
        oracle.max_queue_len = oracle.max_queue_len.max(queued);
    }

    fn finish(&mut self, _end_time: u64) {
        let residual = self.drain(NO_ALLOCATION);
        self.heap.stats_mut().oracle.end_of_trace_drained = residual;
        if residual > 0 {
            self.heap.note(
                ReplayLogLevel::Info,
                LogFields::new("finish", "end_of_trace_drain", "drained"),
                || format!("pending={residual}"),
            );
        }
        self.heap.teardown("finish");
    }

    fn pending_frees(&self) -> usize {
        self.pending.len()
    }

    fn heap(&self) -> &Heap<'b> {
        &self.heap
    }

    fn heap_mut(&mut self) -> &mut Heap<'b> {
        &mut self.heap
    }
}
