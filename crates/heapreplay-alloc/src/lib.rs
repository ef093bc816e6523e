//! # heapreplay-alloc
//!
//! Allocator backends for trace replay.
//!
//! A backend wraps one underlying allocation primitive behind the
//! [`AllocatorBackend`] capability set. Memory managers receive a backend by
//! reference and never name the primitive themselves. Live memory is handed
//! out as an owned [`Region`], which carries the raw-memory touch helpers used
//! to generate realistic access traffic.
//!
//! All `unsafe` in the replay workspace lives in this crate.

pub mod backend;
pub mod region;
pub mod registry;

pub use backend::{AllocatorBackend, BackendStats, BoundedBackend, LibcBackend, SystemBackend};
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
pub use backend::JemallocBackend;
#[cfg(feature = "mimalloc")]
pub use backend::MimallocBackend;
pub use region::{CACHE_LINE, MAX_TOUCH_LINES, Region};
pub use registry::{
    BASELINE_BACKEND, BackendRegistry, BackendSelection, RegistryError, select_backend,
};
