//! Explicit manager: release on the death event.

use heapreplay_alloc::AllocatorBackend;

use super::heap::{AllocAttempt, AllocRequest, FREE_TOUCH_STRIDE, Heap};
use super::MemoryManager;
use crate::config::{ReplayConfig, ReplayMode};
use crate::event::ObjectId;

#[derive(Debug)]
pub struct ExplicitManager<'b> {
    heap: Heap<'b>,
}

impl<'b> ExplicitManager<'b> {
    #[must_use]
    pub fn new(backend: &'b dyn AllocatorBackend, config: &ReplayConfig) -> Self {
        Self {
            heap: Heap::new(backend, config),
        }
    }
}

impl<'b> MemoryManager<'b> for ExplicitManager<'b> {
    fn mode(&self) -> ReplayMode {
        ReplayMode::Explicit
    }

    fn allocate(&mut self, request: AllocRequest) -> bool {
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
        if self
            .heap
            .release(id, time, FREE_TOUCH_STRIDE, "deallocate")
            .is_none()
        {
            self.heap.record_unknown_free(id, "deallocate");
        }
    }

    fn finish(&mut self, _end_time: u64) {
        self.heap.teardown("finish");
    }

    fn heap(&self) -> &Heap<'b> {
        &self.heap
    }

    fn heap_mut(&mut self) -> &mut Heap<'b> {
        &mut self.heap
    }
}
