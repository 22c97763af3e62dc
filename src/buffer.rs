//! An owned, zero-initialized byte buffer with a caller-chosen alignment.
//!
//! This is the default payload of a [crate::Cache].  Decoders like to run SIMD over these, so the start of the buffer
//! is aligned to at least the requested boundary.
use std::alloc::{self, Layout};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::{CacheError, EstimateCost};

pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    align: usize,
}

// SAFETY: the buffer uniquely owns its allocation, like a `Box<[u8]>`.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes aligned to `align`, which must be a power of two.
    pub fn zeroed(len: usize, align: usize) -> Result<AlignedBuffer, CacheError> {
        let layout = Layout::from_size_align(len, align)
            .map_err(|_| CacheError::Alloc { size: len, align })?;

        if len == 0 {
            // Zero-sized layouts may not be passed to the allocator.  Any non-null, aligned pointer works for an empty
            // slice.
            let ptr = NonNull::new(align as *mut u8).ok_or(CacheError::Alloc { size: len, align })?;
            return Ok(AlignedBuffer { ptr, len, align });
        }

        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(CacheError::Alloc { size: len, align })?;
        Ok(AlignedBuffer { ptr, len, align })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alignment(&self) -> usize {
        self.align
    }
}

impl Deref for AlignedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialized bytes for as long as self lives.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }

        // SAFETY: this is the layout we allocated with, and it was validated then.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.len, self.align);
            alloc::dealloc(self.ptr.as_ptr(), layout);
        }
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("align", &self.align)
            .finish()
    }
}

impl EstimateCost for AlignedBuffer {
    fn estimate_cost(&self) -> usize {
        self.len
    }
}
