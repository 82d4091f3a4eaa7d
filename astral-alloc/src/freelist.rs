//! First-fit free list over a contiguous region
//!
//! Every block is preceded by an in-band [`BlockHeader`] carrying its
//! payload size, a link to the next block in address order, and a free
//! flag. Allocation walks the list for the first free block that fits,
//! splitting off the tail when the remainder can hold a header and at
//! least one alignment unit of payload. Freeing marks the block and then
//! coalesces every run of address-adjacent free blocks into one.

use core::ptr::NonNull;

use crate::error::AllocError;

/// Minimum payload alignment and size rounding unit.
pub const ALIGN: usize = 8;

/// In-band block header.
///
/// `next` links blocks in address order; splitting and coalescing keep
/// that invariant.
#[repr(C)]
struct BlockHeader {
    /// Payload size in bytes, always a multiple of [`ALIGN`]
    size: usize,
    /// Next block in address order, null at the end of the region
    next: *mut BlockHeader,
    /// Whether the payload is available
    free: bool,
}

/// Size of the header, rounded so payloads stay [`ALIGN`]-aligned.
pub const HEADER_SIZE: usize =
    (core::mem::size_of::<BlockHeader>() + ALIGN - 1) & !(ALIGN - 1);

#[inline]
const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// A first-fit free-list allocator over one contiguous memory region.
///
/// Carries no interior lock; the owner serialises access.
pub struct FreeList {
    head: *mut BlockHeader,
    region_size: usize,
}

// SAFETY: FreeList owns its region exclusively; it is the caller's job to
// serialise access (the kernel wraps it in a spinlock).
unsafe impl Send for FreeList {}

impl FreeList {
    /// Create an allocator with no region attached.
    ///
    /// Every allocation fails until [`init`](Self::init) is called.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            head: core::ptr::null_mut(),
            region_size: 0,
        }
    }

    /// Attach the allocator to `region`.
    ///
    /// The usable start is rounded up to [`ALIGN`]; the whole region
    /// becomes a single free block.
    ///
    /// # Safety
    ///
    /// - `start..start+size` must be valid, writable memory owned by the
    ///   caller for the allocator's whole lifetime
    /// - No other code may touch the region while the allocator lives
    pub unsafe fn init(&mut self, start: *mut u8, size: usize) -> Result<(), AllocError> {
        if self.is_initialised() {
            return Err(AllocError::AlreadyInitialised);
        }

        let base = round_up(start as usize, ALIGN);
        let slack = base - start as usize;
        if size < slack + HEADER_SIZE + ALIGN {
            return Err(AllocError::InvalidRequest);
        }
        let usable = size - slack;

        let head = base as *mut BlockHeader;
        // SAFETY: Caller guarantees the region is valid and writable
        unsafe {
            head.write(BlockHeader {
                size: usable - HEADER_SIZE,
                next: core::ptr::null_mut(),
                free: true,
            });
        }
        self.head = head;
        self.region_size = usable;
        Ok(())
    }

    /// Whether a region has been attached.
    #[must_use]
    pub fn is_initialised(&self) -> bool {
        !self.head.is_null()
    }

    /// Allocate `size` bytes with the default [`ALIGN`] alignment.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.allocate_aligned(size, ALIGN)
    }

    /// Allocate `size` bytes whose payload address is a multiple of
    /// `align` (a power of two, at least [`ALIGN`]).
    ///
    /// When the first fitting block's payload is not already aligned, the
    /// misaligned front is split off as its own free block so the
    /// allocated payload keeps a header immediately before it.
    pub fn allocate_aligned(
        &mut self,
        size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if !self.is_initialised() {
            return Err(AllocError::NotInitialised);
        }
        if size == 0 || !align.is_power_of_two() || align < ALIGN {
            return Err(AllocError::InvalidRequest);
        }
        let size = round_up(size, ALIGN);

        let mut current = self.head;
        while let Some(block) = NonNull::new(current) {
            // SAFETY: All block pointers in the list point into the region
            let header = unsafe { block.as_ptr().read() };
            if header.free {
                if let Some(payload) = self.try_carve(block.as_ptr(), &header, size, align) {
                    return Ok(payload);
                }
            }
            current = header.next;
        }
        Err(AllocError::OutOfMemory)
    }

    /// Try to carve an aligned allocation out of `block`.
    fn try_carve(
        &mut self,
        block: *mut BlockHeader,
        header: &BlockHeader,
        size: usize,
        align: usize,
    ) -> Option<NonNull<u8>> {
        let payload = block as usize + HEADER_SIZE;
        let block_end = payload + header.size;

        // First payload address that is aligned and leaves room for a
        // front block when padding is needed at all.
        let mut aligned = round_up(payload, align);
        if aligned != payload && aligned - payload < HEADER_SIZE + ALIGN {
            aligned = round_up(payload + HEADER_SIZE + ALIGN, align);
        }

        if aligned + size > block_end {
            return None;
        }

        let target = if aligned == payload {
            block
        } else {
            // Split the misaligned front off as its own free block.
            let target = (aligned - HEADER_SIZE) as *mut BlockHeader;
            // SAFETY: target lies inside `block`'s payload with room for a
            // header plus `size` bytes, checked above
            unsafe {
                target.write(BlockHeader {
                    size: block_end - aligned,
                    next: header.next,
                    free: true,
                });
                (*block).size = (aligned - HEADER_SIZE) - payload;
                (*block).next = target;
            }
            target
        };

        // SAFETY: target is a valid header for at least `size` payload bytes
        unsafe {
            let remaining = (*target).size;
            if remaining > size + HEADER_SIZE {
                let tail = (aligned + size) as *mut BlockHeader;
                tail.write(BlockHeader {
                    size: remaining - size - HEADER_SIZE,
                    next: (*target).next,
                    free: true,
                });
                (*target).next = tail;
                (*target).size = size;
            }
            (*target).free = false;
        }

        NonNull::new(aligned as *mut u8)
    }

    /// Return a payload previously handed out by this allocator.
    ///
    /// The block is marked free and every run of address-adjacent free
    /// blocks is merged, so repeated allocate/release at a boundary never
    /// accumulates fragmentation.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate`](Self::allocate) or
    /// [`allocate_aligned`](Self::allocate_aligned) of this allocator and
    /// not released since.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) {
        let block = (ptr.as_ptr() as usize - HEADER_SIZE) as *mut BlockHeader;
        // SAFETY: Caller guarantees ptr came from this allocator, so a
        // header sits immediately before the payload
        unsafe {
            (*block).free = true;
        }

        let mut current = self.head;
        while !current.is_null() {
            // SAFETY: List links only point at headers inside the region
            unsafe {
                while (*current).free {
                    let next = (*current).next;
                    if next.is_null() || !(*next).free {
                        break;
                    }
                    let contiguous =
                        current as usize + HEADER_SIZE + (*current).size == next as usize;
                    if !contiguous {
                        break;
                    }
                    (*current).size += HEADER_SIZE + (*next).size;
                    (*current).next = (*next).next;
                }
                current = (*current).next;
            }
        }
    }

    /// Number of free blocks in the list.
    #[must_use]
    pub fn free_block_count(&self) -> usize {
        let mut count = 0;
        let mut current = self.head;
        while !current.is_null() {
            // SAFETY: List links only point at headers inside the region
            unsafe {
                if (*current).free {
                    count += 1;
                }
                current = (*current).next;
            }
        }
        count
    }

    /// Payload size of the largest free block.
    #[must_use]
    pub fn largest_free_block(&self) -> usize {
        let mut largest = 0;
        let mut current = self.head;
        while !current.is_null() {
            // SAFETY: List links only point at headers inside the region
            unsafe {
                if (*current).free && (*current).size > largest {
                    largest = (*current).size;
                }
                current = (*current).next;
            }
        }
        largest
    }

    /// Total free payload bytes.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        let mut total = 0;
        let mut current = self.head;
        while !current.is_null() {
            // SAFETY: List links only point at headers inside the region
            unsafe {
                if (*current).free {
                    total += (*current).size;
                }
                current = (*current).next;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(4096))]
    struct Arena([u8; 32 * 1024]);

    fn fresh(arena: &mut Arena) -> FreeList {
        let mut list = FreeList::empty();
        // SAFETY: The arena outlives the allocator within each test
        unsafe {
            list.init(arena.0.as_mut_ptr(), arena.0.len())
                .expect("init failed");
        }
        list
    }

    #[test]
    fn test_allocate_and_write() {
        let mut arena = Arena([0; 32 * 1024]);
        let mut list = fresh(&mut arena);

        let a = list.allocate(64).expect("allocation failed");
        // SAFETY: a points at 64 usable bytes
        unsafe {
            core::ptr::write_bytes(a.as_ptr(), 0xAB, 64);
        }
        assert_eq!(a.as_ptr() as usize % ALIGN, 0);
    }

    #[test]
    fn test_zero_size_fails() {
        let mut arena = Arena([0; 32 * 1024]);
        let mut list = fresh(&mut arena);
        assert_eq!(list.allocate(0), Err(AllocError::InvalidRequest));
    }

    #[test]
    fn test_uninitialised_fails() {
        let mut list = FreeList::empty();
        assert!(!list.is_initialised());
        assert_eq!(list.allocate(16), Err(AllocError::NotInitialised));
    }

    #[test]
    fn test_double_init_rejected() {
        let mut arena = Arena([0; 32 * 1024]);
        let mut list = fresh(&mut arena);
        // SAFETY: Same arena, second attempt must be refused before any write
        let result = unsafe { list.init(arena.0.as_mut_ptr(), arena.0.len()) };
        assert_eq!(result, Err(AllocError::AlreadyInitialised));
    }

    #[test]
    fn test_exhaustion_then_recovery() {
        let mut arena = Arena([0; 32 * 1024]);
        let mut list = fresh(&mut arena);

        let big = list.largest_free_block();
        let a = list.allocate(big).expect("exact fit failed");
        assert_eq!(list.allocate(ALIGN), Err(AllocError::OutOfMemory));

        // SAFETY: a came from this allocator
        unsafe {
            list.release(a);
        }
        assert!(list.allocate(ALIGN).is_ok());
    }

    #[test]
    fn test_first_fit_reuses_freed_slot() {
        let mut arena = Arena([0; 32 * 1024]);
        let mut list = fresh(&mut arena);

        let a = list.allocate(128).expect("allocation failed");
        let _b = list.allocate(128).expect("allocation failed");
        // SAFETY: a came from this allocator
        unsafe {
            list.release(a);
        }
        let c = list.allocate(128).expect("allocation failed");
        assert_eq!(a.as_ptr(), c.as_ptr());
    }

    #[test]
    fn test_adjacent_free_blocks_coalesce() {
        const A: usize = 256;
        const B: usize = 512;
        let mut arena = Arena([0; 32 * 1024]);

        // Region sized so A and B tile it exactly: [hdr A][hdr B]
        let mut list = FreeList::empty();
        // SAFETY: The arena outlives the allocator
        unsafe {
            list.init(arena.0.as_mut_ptr(), HEADER_SIZE + A + HEADER_SIZE + B)
                .expect("init failed");
        }

        let a = list.allocate(A).expect("allocation failed");
        let b = list.allocate(B).expect("allocation failed");
        assert_eq!(
            b.as_ptr() as usize - a.as_ptr() as usize,
            A + HEADER_SIZE,
            "blocks must be adjacent"
        );
        assert_eq!(list.free_block_count(), 0);

        // SAFETY: both pointers came from this allocator
        unsafe {
            list.release(a);
            list.release(b);
        }

        // One free block spanning A, B and the header between them.
        assert_eq!(list.free_block_count(), 1);
        assert_eq!(list.largest_free_block(), A + HEADER_SIZE + B);
    }

    #[test]
    fn test_release_order_does_not_matter() {
        let mut arena = Arena([0; 32 * 1024]);
        let mut list = fresh(&mut arena);
        let before = list.free_bytes();

        let a = list.allocate(64).expect("allocation failed");
        let b = list.allocate(96).expect("allocation failed");
        let c = list.allocate(160).expect("allocation failed");

        // SAFETY: all pointers came from this allocator
        unsafe {
            list.release(b);
            list.release(c);
            list.release(a);
        }

        assert_eq!(list.free_block_count(), 1);
        assert_eq!(list.free_bytes(), before);
    }

    #[test]
    fn test_aligned_allocation() {
        let mut arena = Arena([0; 32 * 1024]);
        let mut list = fresh(&mut arena);

        // Skew the region so a 4 KiB request cannot be satisfied at the
        // front of the first free block.
        let skew = list.allocate(24).expect("allocation failed");
        let table = list
            .allocate_aligned(4096, 4096)
            .expect("aligned allocation failed");
        assert_eq!(table.as_ptr() as usize % 4096, 0);

        // SAFETY: both pointers came from this allocator
        unsafe {
            list.release(table);
            list.release(skew);
        }
        assert_eq!(list.free_block_count(), 1);
    }

    #[test]
    fn test_split_leaves_usable_tail() {
        let mut arena = Arena([0; 32 * 1024]);
        let mut list = fresh(&mut arena);
        let before = list.largest_free_block();

        let a = list.allocate(64).expect("allocation failed");
        assert_eq!(list.largest_free_block(), before - 64 - HEADER_SIZE);

        // SAFETY: a came from this allocator
        unsafe {
            list.release(a);
        }
        assert_eq!(list.largest_free_block(), before);
    }
}
