//! Allocator backend capability and the concrete backends.
//!
//! Every backend forwards to an underlying allocation primitive and keeps its
//! own call counters. Backends are single-threaded (`Cell` counters): a replay
//! session owns exactly one and lends it to its memory manager.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::cell::Cell;
use std::ptr::NonNull;

use serde::Serialize;

use crate::region::Region;

/// Alignment requested from layout-based primitives.
pub const REGION_ALIGN: usize = 16;

/// Uniform capability set over an allocation primitive.
pub trait AllocatorBackend {
    /// Allocate `size` bytes. Zero-size requests are served as one byte.
    fn allocate(&self, size: usize) -> Option<Region>;

    /// Return a region to the primitive it came from.
    fn deallocate(&self, region: Region);

    /// Resize a region. On failure the original region is handed back intact.
    fn reallocate(&self, region: Region, new_size: usize) -> Result<Region, Region>;

    /// Human-readable backend name.
    fn name(&self) -> &'static str;

    /// Backend-specific statistics, if the backend keeps any.
    fn stats(&self) -> Option<BackendStats> {
        None
    }
}

/// Call counters reported by [`AllocatorBackend::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendStats {
    pub allocations: u64,
    pub deallocations: u64,
    pub reallocations: u64,
    pub failures: u64,
    pub outstanding_bytes: u64,
    pub peak_outstanding_bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    allocations: Cell<u64>,
    deallocations: Cell<u64>,
    reallocations: Cell<u64>,
    failures: Cell<u64>,
    outstanding: Cell<u64>,
    peak: Cell<u64>,
}

impl Counters {
    fn on_alloc(&self, len: usize) {
        self.allocations.set(self.allocations.get() + 1);
        let outstanding = self.outstanding.get().saturating_add(len as u64);
        self.outstanding.set(outstanding);
        if outstanding > self.peak.get() {
            self.peak.set(outstanding);
        }
    }

    fn on_dealloc(&self, len: usize) {
        self.deallocations.set(self.deallocations.get() + 1);
        self.outstanding
            .set(self.outstanding.get().saturating_sub(len as u64));
    }

    fn on_realloc(&self, old_len: usize, new_len: usize) {
        self.reallocations.set(self.reallocations.get() + 1);
        let outstanding = self
            .outstanding
            .get()
            .saturating_sub(old_len as u64)
            .saturating_add(new_len as u64);
        self.outstanding.set(outstanding);
        if outstanding > self.peak.get() {
            self.peak.set(outstanding);
        }
    }

    fn on_failure(&self) {
        self.failures.set(self.failures.get() + 1);
    }

    fn snapshot(&self) -> BackendStats {
        BackendStats {
            allocations: self.allocations.get(),
            deallocations: self.deallocations.get(),
            reallocations: self.reallocations.get(),
            failures: self.failures.get(),
            outstanding_bytes: self.outstanding.get(),
            peak_outstanding_bytes: self.peak.get(),
        }
    }
}

fn request_len(size: usize) -> usize {
    size.max(1)
}

// ---------------------------------------------------------------------------
// libc malloc/free
// ---------------------------------------------------------------------------

/// Baseline backend: the C library's `malloc`/`free`/`realloc`.
#[derive(Debug, Default)]
pub struct LibcBackend {
    counters: Counters,
}

impl LibcBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AllocatorBackend for LibcBackend {
    fn allocate(&self, size: usize) -> Option<Region> {
        let len = request_len(size);
        // SAFETY: malloc has no preconditions; a null return is handled below.
        let raw = unsafe { libc::malloc(len) }.cast::<u8>();
        let Some(ptr) = NonNull::new(raw) else {
            self.counters.on_failure();
            return None;
        };
        self.counters.on_alloc(len);
        // SAFETY: malloc returned `len` writable bytes, released only via `deallocate`.
        Some(unsafe { Region::from_raw(ptr, len) })
    }

    fn deallocate(&self, region: Region) {
        let (ptr, len) = region.into_raw();
        // SAFETY: every Region handed to this backend was produced by `malloc`
        // or `realloc` above and is released exactly once (Region is consumed).
        unsafe { libc::free(ptr.as_ptr().cast()) };
        self.counters.on_dealloc(len);
    }

    fn reallocate(&self, region: Region, new_size: usize) -> Result<Region, Region> {
        let new_len = request_len(new_size);
        let old_len = region.len();
        let old_ptr = region.addr() as *mut libc::c_void;
        // SAFETY: `old_ptr` came from this backend and is still live.
        let raw = unsafe { libc::realloc(old_ptr, new_len) }.cast::<u8>();
        match NonNull::new(raw) {
            Some(ptr) => {
                let (_, _) = region.into_raw();
                self.counters.on_realloc(old_len, new_len);
                // SAFETY: realloc returned `new_len` writable bytes; the old block is gone.
                Ok(unsafe { Region::from_raw(ptr, new_len) })
            }
            None => {
                self.counters.on_failure();
                Err(region)
            }
        }
    }

    fn name(&self) -> &'static str {
        "standard (libc malloc)"
    }

    fn stats(&self) -> Option<BackendStats> {
        Some(self.counters.snapshot())
    }
}

// ---------------------------------------------------------------------------
// Rust global allocator
// ---------------------------------------------------------------------------

/// Backend over `std::alloc`, i.e. whatever `#[global_allocator]` is linked.
#[derive(Debug, Default)]
pub struct SystemBackend {
    counters: Counters,
}

impl SystemBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn region_layout(len: usize) -> Option<Layout> {
    Layout::from_size_align(len, REGION_ALIGN).ok()
}

impl AllocatorBackend for SystemBackend {
    fn allocate(&self, size: usize) -> Option<Region> {
        let len = request_len(size);
        let Some(layout) = region_layout(len) else {
            self.counters.on_failure();
            return None;
        };
        // SAFETY: layout has non-zero size.
        let raw = unsafe { std::alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            self.counters.on_failure();
            return None;
        };
        self.counters.on_alloc(len);
        // SAFETY: `alloc` returned `len` writable bytes.
        Some(unsafe { Region::from_raw(ptr, len) })
    }

    fn deallocate(&self, region: Region) {
        let (ptr, len) = region.into_raw();
        let Some(layout) = region_layout(len) else {
            // Unreachable for regions produced by `allocate`; leak rather than
            // dealloc with a mismatched layout.
            return;
        };
        // SAFETY: the region was allocated by this backend with exactly this layout.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        self.counters.on_dealloc(len);
    }

    fn reallocate(&self, region: Region, new_size: usize) -> Result<Region, Region> {
        let new_len = request_len(new_size);
        let old_len = region.len();
        let (Some(layout), Some(_)) = (region_layout(old_len), region_layout(new_len)) else {
            self.counters.on_failure();
            return Err(region);
        };
        let old_ptr = region.addr() as *mut u8;
        // SAFETY: `old_ptr` was allocated with `layout`; `new_len` is non-zero
        // and does not overflow when rounded to REGION_ALIGN (checked above).
        let raw = unsafe { std::alloc::realloc(old_ptr, layout, new_len) };
        match NonNull::new(raw) {
            Some(ptr) => {
                let (_, _) = region.into_raw();
                self.counters.on_realloc(old_len, new_len);
                // SAFETY: realloc returned `new_len` writable bytes.
                Ok(unsafe { Region::from_raw(ptr, new_len) })
            }
            None => {
                self.counters.on_failure();
                Err(region)
            }
        }
    }

    fn name(&self) -> &'static str {
        "system (rust global allocator)"
    }

    fn stats(&self) -> Option<BackendStats> {
        Some(self.counters.snapshot())
    }
}

// ---------------------------------------------------------------------------
// GlobalAlloc-based primitives (optional)
// ---------------------------------------------------------------------------

/// Allocate through a `GlobalAlloc` implementation called directly rather
/// than installed as the global allocator.
#[cfg(any(
    feature = "mimalloc",
    all(feature = "jemalloc", not(target_env = "msvc"))
))]
fn global_allocate<A: std::alloc::GlobalAlloc>(
    alloc: &A,
    counters: &Counters,
    size: usize,
) -> Option<Region> {
    let len = request_len(size);
    let Some(layout) = region_layout(len) else {
        counters.on_failure();
        return None;
    };
    // SAFETY: layout has non-zero size.
    let raw = unsafe { alloc.alloc(layout) };
    let Some(ptr) = NonNull::new(raw) else {
        counters.on_failure();
        return None;
    };
    counters.on_alloc(len);
    // SAFETY: the allocator returned `len` writable bytes.
    Some(unsafe { Region::from_raw(ptr, len) })
}

#[cfg(any(
    feature = "mimalloc",
    all(feature = "jemalloc", not(target_env = "msvc"))
))]
fn global_deallocate<A: std::alloc::GlobalAlloc>(alloc: &A, counters: &Counters, region: Region) {
    let (ptr, len) = region.into_raw();
    let Some(layout) = region_layout(len) else {
        return;
    };
    // SAFETY: allocated by `global_allocate` on the same allocator with this layout.
    unsafe { alloc.dealloc(ptr.as_ptr(), layout) };
    counters.on_dealloc(len);
}

#[cfg(any(
    feature = "mimalloc",
    all(feature = "jemalloc", not(target_env = "msvc"))
))]
fn global_reallocate<A: std::alloc::GlobalAlloc>(
    alloc: &A,
    counters: &Counters,
    region: Region,
    new_size: usize,
) -> Result<Region, Region> {
    let new_len = request_len(new_size);
    let old_len = region.len();
    let (Some(layout), Some(_)) = (region_layout(old_len), region_layout(new_len)) else {
        counters.on_failure();
        return Err(region);
    };
    let old_ptr = region.addr() as *mut u8;
    // SAFETY: `old_ptr` was allocated by this allocator with `layout`.
    let raw = unsafe { alloc.realloc(old_ptr, layout, new_len) };
    match NonNull::new(raw) {
        Some(ptr) => {
            let (_, _) = region.into_raw();
            counters.on_realloc(old_len, new_len);
            // SAFETY: realloc returned `new_len` writable bytes.
            Ok(unsafe { Region::from_raw(ptr, new_len) })
        }
        None => {
            counters.on_failure();
            Err(region)
        }
    }
}

/// jemalloc through `tikv-jemallocator`.
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[derive(Debug, Default)]
pub struct JemallocBackend {
    counters: Counters,
}

#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
impl JemallocBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
impl AllocatorBackend for JemallocBackend {
    fn allocate(&self, size: usize) -> Option<Region> {
        global_allocate(&tikv_jemallocator::Jemalloc, &self.counters, size)
    }

    fn deallocate(&self, region: Region) {
        global_deallocate(&tikv_jemallocator::Jemalloc, &self.counters, region);
    }

    fn reallocate(&self, region: Region, new_size: usize) -> Result<Region, Region> {
        global_reallocate(&tikv_jemallocator::Jemalloc, &self.counters, region, new_size)
    }

    fn name(&self) -> &'static str {
        "jemalloc"
    }

    fn stats(&self) -> Option<BackendStats> {
        Some(self.counters.snapshot())
    }
}

/// mimalloc through the `mimalloc` crate.
#[cfg(feature = "mimalloc")]
#[derive(Debug, Default)]
pub struct MimallocBackend {
    counters: Counters,
}

#[cfg(feature = "mimalloc")]
impl MimallocBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(feature = "mimalloc")]
impl AllocatorBackend for MimallocBackend {
    fn allocate(&self, size: usize) -> Option<Region> {
        global_allocate(&mimalloc::MiMalloc, &self.counters, size)
    }

    fn deallocate(&self, region: Region) {
        global_deallocate(&mimalloc::MiMalloc, &self.counters, region);
    }

    fn reallocate(&self, region: Region, new_size: usize) -> Result<Region, Region> {
        global_reallocate(&mimalloc::MiMalloc, &self.counters, region, new_size)
    }

    fn name(&self) -> &'static str {
        "mimalloc"
    }

    fn stats(&self) -> Option<BackendStats> {
        Some(self.counters.snapshot())
    }
}

// ---------------------------------------------------------------------------
// Bounded wrapper
// ---------------------------------------------------------------------------

/// Wraps another backend and refuses requests that would push outstanding
/// bytes past `capacity`. Models memory pressure.
pub struct BoundedBackend {
    inner: Box<dyn AllocatorBackend>,
    capacity: u64,
    outstanding: Cell<u64>,
    rejected: Cell<u64>,
}

impl BoundedBackend {
    #[must_use]
    pub fn new(inner: Box<dyn AllocatorBackend>, capacity: u64) -> Self {
        Self {
            inner,
            capacity,
            outstanding: Cell::new(0),
            rejected: Cell::new(0),
        }
    }

    /// Requests refused because of the ceiling.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.get()
    }

    /// Bytes currently held through this wrapper.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.outstanding.get()
    }

    fn fits(&self, extra: u64) -> bool {
        self.outstanding
            .get()
            .checked_add(extra)
            .is_some_and(|total| total <= self.capacity)
    }
}

impl std::fmt::Debug for BoundedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedBackend")
            .field("inner", &self.inner.name())
            .field("capacity", &self.capacity)
            .field("outstanding", &self.outstanding.get())
            .finish()
    }
}

impl AllocatorBackend for BoundedBackend {
    fn allocate(&self, size: usize) -> Option<Region> {
        let len = request_len(size) as u64;
        if !self.fits(len) {
            self.rejected.set(self.rejected.get() + 1);
            return None;
        }
        let region = self.inner.allocate(size)?;
        self.outstanding.set(self.outstanding.get() + region.len() as u64);
        Some(region)
    }

    fn deallocate(&self, region: Region) {
        let len = region.len() as u64;
        self.inner.deallocate(region);
        self.outstanding
            .set(self.outstanding.get().saturating_sub(len));
    }

    fn reallocate(&self, region: Region, new_size: usize) -> Result<Region, Region> {
        let old_len = region.len() as u64;
        let new_len = request_len(new_size) as u64;
        if new_len > old_len && !self.fits(new_len - old_len) {
            self.rejected.set(self.rejected.get() + 1);
            return Err(region);
        }
        let resized = self.inner.reallocate(region, new_size)?;
        self.outstanding.set(
            self.outstanding
                .get()
                .saturating_sub(old_len)
                .saturating_add(resized.len() as u64),
        );
        Ok(resized)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn stats(&self) -> Option<BackendStats> {
        let mut stats = self.inner.stats()?;
        stats.failures += self.rejected.get();
        Some(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(backend: &dyn AllocatorBackend) {
        let mut region = backend.allocate(48).expect("allocate");
        assert_eq!(region.len(), 48);
        region.touch_fresh();
        let region = backend.reallocate(region, 4096).expect("grow");
        assert_eq!(region.len(), 4096);
        let region = backend.reallocate(region, 8).expect("shrink");
        assert_eq!(region.len(), 8);
        backend.deallocate(region);

        let stats = backend.stats().expect("stats");
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.reallocations, 2);
        assert_eq!(stats.deallocations, 1);
        assert_eq!(stats.outstanding_bytes, 0);
        assert_eq!(stats.peak_outstanding_bytes, 4096);
    }

    #[test]
    fn libc_backend_allocate_resize_release() {
        exercise(&LibcBackend::new());
    }

    #[test]
    fn system_backend_allocate_resize_release() {
        exercise(&SystemBackend::new());
    }

    #[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
    #[test]
    fn jemalloc_backend_allocate_resize_release() {
        exercise(&JemallocBackend::new());
    }

    #[cfg(feature = "mimalloc")]
    #[test]
    fn mimalloc_backend_allocate_resize_release() {
        let backend = MimallocBackend::new();
        exercise(&backend);
        assert_eq!(backend.name(), "mimalloc");
        assert_eq!(backend.stats().map(|s| s.outstanding_bytes), Some(0));
    }

    #[test]
    fn zero_size_is_served_as_one_byte() {
        let backend = SystemBackend::new();
        let region = backend.allocate(0).expect("zero-size allocation");
        assert_eq!(region.len(), 1);
        backend.deallocate(region);
    }

    #[test]
    fn bounded_backend_rejects_past_capacity() {
        let bounded = BoundedBackend::new(Box::new(SystemBackend::new()), 100);
        let a = bounded.allocate(60).expect("fits");
        assert!(bounded.allocate(60).is_none());
        assert_eq!(bounded.rejected(), 1);
        bounded.deallocate(a);
        assert_eq!(bounded.outstanding(), 0);
        let b = bounded.allocate(60).expect("fits after release");
        bounded.deallocate(b);
        assert_eq!(bounded.stats().map(|s| s.failures), Some(1));
    }

    #[test]
    fn bounded_backend_refuses_growth_and_returns_original() {
        let bounded = BoundedBackend::new(Box::new(LibcBackend::new()), 64);
        let region = bounded.allocate(32).expect("fits");
        let region = bounded
            .reallocate(region, 128)
            .expect_err("growth beyond capacity must fail");
        assert_eq!(region.len(), 32);
        bounded.deallocate(region);
    }

    #[test]
    fn zero_capacity_always_fails() {
        let bounded = BoundedBackend::new(Box::new(SystemBackend::new()), 0);
        assert!(bounded.allocate(1).is_none());
        assert!(bounded.allocate(0).is_none());
    }
}
