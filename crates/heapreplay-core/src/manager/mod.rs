//! Memory managers: the three reclamation policies.
//!
//! Each manager owns a [`Heap`] (table, statistics, log) and borrows the
//! backend for its whole lifetime. The replay driver picks one at session
//! start and drives it through [`MemoryManager`].

mod explicit;
mod gc;
mod heap;
mod oracle;

pub use explicit::ExplicitManager;
pub use gc::{CollectionOutcome, GcManager};
pub use heap::{
    AllocAttempt, AllocRequest, FREE_TOUCH_STRIDE, Heap, RELEASE_TOUCH_BYTES, SWEEP_TOUCH_STRIDE,
};
pub use oracle::{NO_ALLOCATION, OracleManager};

use heapreplay_alloc::AllocatorBackend;

use crate::config::{ReplayConfig, ReplayMode};
use crate::event::ObjectId;

/// Operations the replay driver dispatches to.
pub trait MemoryManager<'b> {
    fn mode(&self) -> ReplayMode;

    /// Handle an allocation. Returns `true` if the object is now live.
    fn allocate(&mut self, request: AllocRequest) -> bool;

    /// Handle a free/death record for `id` at `time`.
    fn deallocate(&mut self, id: ObjectId, time: u64);

    /// Simulated reference write from `source` into `target`.
    fn update_field(&mut self, target: ObjectId, source: ObjectId) -> bool {
        self.heap_mut().update_field(target, source)
    }

    fn method_entry(&mut self) {
        self.heap_mut().method_entry();
    }

    fn method_exit(&mut self) {
        self.heap_mut().method_exit();
    }

    /// End-of-trace finalization. Leaves the live table empty.
    fn finish(&mut self, end_time: u64);

    /// Frees queued but not yet executed.
    fn pending_frees(&self) -> usize {
        0
    }

    fn heap(&self) -> &Heap<'b>;

    fn heap_mut(&mut self) -> &mut Heap<'b>;
}

/// Construct the manager selected by `config.mode`.
#[must_use]
pub fn build_manager<'b>(
    config: &ReplayConfig,
    backend: &'b dyn AllocatorBackend,
) -> Box<dyn MemoryManager<'b> + 'b> {
    match config.mode {
        ReplayMode::Explicit => Box::new(ExplicitManager::new(backend, config)),
        ReplayMode::Gc => Box::new(GcManager::new(backend, config)),
        ReplayMode::Oracle => Box::new(OracleManager::new(backend, config)),
    }
}
