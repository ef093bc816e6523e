//! Owned handle to a live allocation obtained from a backend.
//!
//! A [`Region`] is produced only by an [`AllocatorBackend`](crate::AllocatorBackend)
//! and is consumed when handed back to it. It is deliberately neither `Copy`
//! nor `Clone`: holding a `Region` is the proof that the memory behind it is
//! still allocated, which is what makes the touch helpers below sound.
//!
//! The touch helpers use volatile accesses so the compiler cannot elide them.
//! Their only purpose is to generate realistic cache/TLB traffic.

#![allow(unsafe_code)]

use std::fmt;
use std::ptr::NonNull;

/// Cache line stride used by the allocation touch pattern.
pub const CACHE_LINE: usize = 64;

/// Upper bound on cache-line strides visited when initializing a region.
pub const MAX_TOUCH_LINES: usize = 16_384;

const FIRST_BYTE: u8 = 0xAA;
const LAST_BYTE: u8 = 0xBB;
const STRIDE_BYTE: u8 = 0xCC;
const FIELD_ONE: u64 = 0x1234_5678_9ABC_DEF0;
const FIELD_TWO: u64 = 0xFEDC_BA98_7654_3210;

/// A live allocation: base pointer plus usable length.
pub struct Region {
    ptr: NonNull<u8>,
    len: usize,
}

impl Region {
    /// Wrap a raw allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `len` writable bytes that stay allocated
    /// until the returned region is passed back to the backend that created it.
    /// `len` must be non-zero.
    pub(crate) unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> Self {
        debug_assert!(len > 0);
        Self { ptr, len }
    }

    /// Decompose into the raw parts for release or resize.
    pub(crate) fn into_raw(self) -> (NonNull<u8>, usize) {
        (self.ptr, self.len)
    }

    /// Usable length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Regions are never empty; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address, used as the simulated reference value written by field updates.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Write the object-initialization pattern.
    ///
    /// First byte, last byte, every 64-byte stride (capped at
    /// [`MAX_TOUCH_LINES`]) and, for regions of at least 32 bytes, two
    /// 8-byte "fields" at the start. Returns the number of stores issued.
    pub fn touch_fresh(&mut self) -> usize {
        let base = self.ptr.as_ptr();
        let mut stores = 0;

        // SAFETY: offset 0 is within the `len >= 1` bytes owned by this region.
        unsafe { base.write_volatile(FIRST_BYTE) };
        stores += 1;

        if self.len > 1 {
            // SAFETY: `len - 1` is the last byte owned by this region.
            unsafe { base.add(self.len - 1).write_volatile(LAST_BYTE) };
            stores += 1;
        }

        let mut offset = CACHE_LINE;
        let mut lines = 0;
        while offset < self.len && lines < MAX_TOUCH_LINES {
            // SAFETY: `offset < len`, checked by the loop condition.
            unsafe { base.add(offset).write_volatile(STRIDE_BYTE) };
            offset += CACHE_LINE;
            lines += 1;
            stores += 1;
        }

        if self.len >= 4 * size_of::<u64>() {
            let fields = base.cast::<u64>();
            // SAFETY: the region holds at least 32 bytes, so both 8-byte slots
            // are in bounds. Backends do not promise 8-byte alignment for every
            // size, hence the unaligned stores.
            unsafe {
                fields.write_unaligned(FIELD_ONE);
                fields.add(1).write_unaligned(FIELD_TWO);
            }
            stores += 2;
        }

        stores
    }

    /// Zero every `stride`-th byte of the first `limit` bytes.
    ///
    /// Models last-use traffic before release (`stride = 1`) and the traversal
    /// cost of a sweep (`stride = 8`). Returns the number of stores issued.
    pub fn touch_prefix(&mut self, limit: usize, stride: usize) -> usize {
        let stride = stride.max(1);
        let end = limit.min(self.len);
        let base = self.ptr.as_ptr();
        let mut stores = 0;
        let mut offset = 0;
        while offset < end {
            // SAFETY: `offset < end <= len`.
            unsafe { base.add(offset).write_volatile(0) };
            offset += stride;
            stores += 1;
        }
        stores
    }

    /// Overwrite the first pointer-sized slot with `target`.
    ///
    /// Returns `false` when the region is too small to hold a pointer; nothing
    /// is written in that case.
    pub fn write_reference(&mut self, target: usize) -> bool {
        if self.len < size_of::<usize>() {
            return false;
        }
        // SAFETY: at least `size_of::<usize>()` bytes are owned by this region.
        unsafe {
            self.ptr
                .as_ptr()
                .cast::<usize>()
                .write_unaligned(target);
        }
        true
    }

    /// Volatile read of the first byte (mutator read traffic).
    #[must_use]
    pub fn read_first(&self) -> u8 {
        // SAFETY: offset 0 is within the region.
        unsafe { self.ptr.as_ptr().read_volatile() }
    }

    /// Read back the first pointer-sized slot. Returns `None` for regions too
    /// small to hold one.
    #[must_use]
    pub fn read_reference(&self) -> Option<usize> {
        if self.len < size_of::<usize>() {
            return None;
        }
        // SAFETY: bounds checked above.
        Some(unsafe { self.ptr.as_ptr().cast::<usize>().read_unaligned() })
    }

    /// Read one byte at `offset`, if in bounds.
    #[must_use]
    pub fn byte_at(&self, offset: usize) -> Option<u8> {
        if offset >= self.len {
            return None;
        }
        // SAFETY: bounds checked above.
        Some(unsafe { self.ptr.as_ptr().add(offset).read_volatile() })
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("addr", &format_args!("{:#x}", self.addr()))
            .field("len", &self.len)
            .finish()
    }
}
