//! Kernel Heap
//!
//! Spinlocked wrapper around the free-list allocator, serving the task
//! structures, stacks and page-table blocks of the core. Exhaustion is
//! reported to the caller with `None`; the heap never halts the machine
//! on its own.

use core::ptr::NonNull;

use astral_alloc::FreeList;
use astral_arch::sync::SpinLock;

/// The kernel heap.
///
/// Construction is `const` so the kernel binary can hold one in a static;
/// tests construct their own over an arena.
pub struct KernelHeap {
    inner: SpinLock<FreeList>,
}

impl KernelHeap {
    /// Create a heap with no memory attached.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(FreeList::empty()),
        }
    }

    /// Attach the heap to its backing region.
    ///
    /// # Safety
    ///
    /// `base..base+size` must be valid, writable memory reserved for the
    /// heap for the rest of the kernel's lifetime.
    pub unsafe fn init(&self, base: *mut u8, size: usize) {
        let mut inner = self.inner.lock();
        // SAFETY: Contract forwarded to the caller
        match unsafe { inner.init(base, size) } {
            Ok(()) => {
                log::info!("kernel heap: {} KiB at {:#x}", size / 1024, base as usize);
            }
            Err(err) => log::warn!("kernel heap init rejected: {}", err),
        }
    }

    /// Allocate `size` bytes, 8-byte aligned.
    ///
    /// Failure is a sentinel, not a halt: the caller decides what running
    /// dry means.
    pub fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        self.inner.lock().allocate(size).ok()
    }

    /// Allocate `size` bytes at a `align`-byte boundary.
    pub fn allocate_aligned(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        self.inner.lock().allocate_aligned(size, align).ok()
    }

    /// Return an allocation to the heap.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this heap and not been released since.
    pub unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: Contract forwarded to the caller
        unsafe {
            self.inner.lock().release(ptr);
        }
    }

    /// Total free bytes remaining.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.inner.lock().free_bytes()
    }
}

impl Default for KernelHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(4096))]
    struct Arena([u8; 64 * 1024]);

    #[test]
    fn test_allocate_release_cycle() {
        let mut arena = Arena([0; 64 * 1024]);
        let heap = KernelHeap::new();
        // SAFETY: arena outlives the heap within this test
        unsafe {
            heap.init(arena.0.as_mut_ptr(), arena.0.len());
        }

        let before = heap.free_bytes();
        let a = heap.allocate(512).expect("allocation failed");
        assert!(heap.free_bytes() < before);

        // SAFETY: a came from this heap
        unsafe {
            heap.release(a);
        }
        assert_eq!(heap.free_bytes(), before);
    }

    #[test]
    fn test_unattached_heap_fails_cleanly() {
        let heap = KernelHeap::new();
        assert!(heap.allocate(64).is_none());
        assert_eq!(heap.free_bytes(), 0);
    }
}
