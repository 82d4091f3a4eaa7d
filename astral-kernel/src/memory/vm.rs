//! Virtual Memory Map
//!
//! [`VmMap`] tracks logical address-range mappings in a fixed-capacity
//! table and owns the kernel's two-level hardware translation tables: a
//! root table of 1 GiB entries pointing at second-level tables of 2 MiB
//! block descriptors.
//!
//! # Granularity
//!
//! The bookkeeping table records ranges at byte granularity; the hardware
//! tables are fixed at 2 MiB blocks and only the boot-built ranges (the
//! low-memory identity gigabyte and the framebuffer window) are actually
//! enforced. `map` on any other range produces a bookkeeping record, not
//! hardware enforcement. This asymmetry is part of the design.
//!
//! # Concurrency
//!
//! The map carries no lock. All mutation happens through `&mut self` from
//! the boot core, during bring-up and task creation, before or between
//! dispatches. It must not be shared with interrupt context or other
//! cores.

use astral_arch::mmu::{self, flags, PageTable, BLOCK_SIZE_2M, ENTRIES_PER_TABLE, REGION_SIZE_1G};
use astral_common::{PhysAddr, VirtAddr};
use astral_pal::FramebufferConfig;
use core::fmt;

use super::heap::KernelHeap;
use super::protection::Protection;

/// Capacity of the mapping table.
pub const MAP_CAPACITY: usize = 64;

/// Base virtual address handed out by [`VmMap::allocate`].
pub const ALLOC_BASE: u64 = 0x4000_0000;

/// Fixed per-slot stride for [`VmMap::allocate`].
pub const ALLOC_STRIDE: u64 = 0x10_0000;

/// Size of the boot identity mapping.
pub const IDENTITY_SIZE: u64 = REGION_SIZE_1G;

/// One recorded address-range mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MapEntry {
    /// Mapped virtual base
    pub virt: VirtAddr,
    /// Backing physical base
    pub phys: PhysAddr,
    /// Range length in bytes
    pub size: u64,
    /// Logical protection flags
    pub prot: Protection,
}

impl MapEntry {
    /// One past the last mapped virtual address.
    #[inline]
    #[must_use]
    pub fn end(&self) -> u64 {
        self.virt.as_u64() + self.size
    }

    /// Half-open interval overlap test. Touching endpoints do not overlap.
    #[inline]
    #[must_use]
    pub fn overlaps(&self, virt: VirtAddr, size: u64) -> bool {
        virt.as_u64() < self.end() && virt.as_u64() + size > self.virt.as_u64()
    }
}

/// Errors reported by mapping operations.
///
/// All of these are locally recoverable; the map never halts the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No active entry with the requested virtual base
    NotFound,
    /// Requested range overlaps an active entry
    RangeConflict,
    /// No free mapping-table slot
    TableFull,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no mapping at the requested address"),
            Self::RangeConflict => write!(f, "range overlaps an existing mapping"),
            Self::TableFull => write!(f, "mapping table full"),
        }
    }
}

/// The virtual memory map: bookkeeping table plus the kernel's hardware
/// translation tables.
///
/// An owned instance; the kernel binary keeps one alive for the machine's
/// lifetime, tests construct their own.
#[repr(C)]
pub struct VmMap {
    entries: [Option<MapEntry>; MAP_CAPACITY],
    /// Kernel root table: 512 entries of 1 GiB each
    root: PageTable,
    /// Second-level table for the identity gigabyte: 512 blocks of 2 MiB
    low_table: PageTable,
}

impl VmMap {
    /// Create an empty map. Nothing is recorded or built until
    /// [`init`](Self::init) and [`enable_translation`](Self::enable_translation).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [None; MAP_CAPACITY],
            root: PageTable::empty(),
            low_table: PageTable::empty(),
        }
    }

    /// Mark every slot free and record the low-memory identity range with
    /// kernel read/write/execute permissions.
    pub fn init(&mut self) {
        self.entries = [None; MAP_CAPACITY];
        if self
            .map(
                VirtAddr::new(0),
                PhysAddr::new(0),
                IDENTITY_SIZE,
                Protection::RWX | Protection::KERNEL,
            )
            .is_err()
        {
            // Unreachable on an empty table; keep the diagnostic anyway
            log::error!("vm: failed to record the identity mapping");
        }
    }

    /// First free slot in table order.
    fn find_free_slot(&self) -> Option<usize> {
        self.entries.iter().position(Option::is_none)
    }

    /// Whether `virt..virt+size` overlaps any active entry.
    fn conflicts(&self, virt: VirtAddr, size: u64) -> bool {
        self.entries
            .iter()
            .flatten()
            .any(|entry| entry.overlaps(virt, size))
    }

    /// Record a mapping of `virt..virt+size` onto `phys` with `prot`.
    ///
    /// Rejects overlapping ranges and a full table without mutating
    /// anything. Invalidates the translation cache on success.
    pub fn map(
        &mut self,
        virt: VirtAddr,
        phys: PhysAddr,
        size: u64,
        prot: Protection,
    ) -> Result<(), VmError> {
        if self.conflicts(virt, size) {
            log::warn!("vm: mapping overlap detected at {}", virt);
            return Err(VmError::RangeConflict);
        }

        let Some(index) = self.find_free_slot() else {
            log::warn!("vm: no free mapping entries");
            return Err(VmError::TableFull);
        };

        self.entries[index] = Some(MapEntry {
            virt,
            phys,
            size,
            prot,
        });
        mmu::mmu().invalidate_tlb_all();
        Ok(())
    }

    /// Release the entry whose virtual base equals `virt`.
    ///
    /// The whole recorded range is released; `size` is accepted for
    /// interface symmetry but not consulted.
    pub fn unmap(&mut self, virt: VirtAddr, _size: u64) -> Result<(), VmError> {
        for slot in self.entries.iter_mut() {
            if let Some(entry) = slot {
                if entry.virt == virt {
                    *slot = None;
                    mmu::mmu().invalidate_tlb_all();
                    return Ok(());
                }
            }
        }
        Err(VmError::NotFound)
    }

    /// Overwrite the protection flags of the entry whose virtual base
    /// equals `virt`.
    pub fn protect(
        &mut self,
        virt: VirtAddr,
        _size: u64,
        new_prot: Protection,
    ) -> Result<(), VmError> {
        for slot in self.entries.iter_mut() {
            if let Some(entry) = slot {
                if entry.virt == virt {
                    entry.prot = new_prot;
                    mmu::mmu().invalidate_tlb_all();
                    return Ok(());
                }
            }
        }
        Err(VmError::NotFound)
    }

    /// Allocate a fresh range: the first free slot determines the address,
    /// `ALLOC_BASE + slot * ALLOC_STRIDE`, identity-backed.
    ///
    /// Returns [`VirtAddr::NULL`] on exhaustion; the null address is never
    /// a valid allocation in this scheme, so callers treat it as failure.
    pub fn allocate(&mut self, size: u64, prot: Protection) -> VirtAddr {
        let Some(index) = self.find_free_slot() else {
            log::warn!("vm: no free mapping slots available");
            return VirtAddr::NULL;
        };

        let virt = VirtAddr::new(ALLOC_BASE + index as u64 * ALLOC_STRIDE);
        match self.map(virt, PhysAddr::new(virt.as_u64()), size, prot) {
            Ok(()) => virt,
            Err(_) => VirtAddr::NULL,
        }
    }

    /// Release an allocated range. Equivalent to `unmap(virt, 0)`.
    pub fn deallocate(&mut self, virt: VirtAddr) -> Result<(), VmError> {
        self.unmap(virt, 0)
    }

    /// The active entry whose virtual base equals `virt`, if any.
    #[must_use]
    pub fn lookup(&self, virt: VirtAddr) -> Option<&MapEntry> {
        self.entries
            .iter()
            .flatten()
            .find(|entry| entry.virt == virt)
    }

    /// Number of active entries.
    #[must_use]
    pub fn active_entries(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    /// Build the hardware tables and switch translation on.
    ///
    /// Zeroes both owned tables, installs 512 two-MiB kernel blocks over
    /// the identity gigabyte, overlays the framebuffer window as
    /// non-executable device memory (allocating that gigabyte's
    /// second-level table from `heap` when it does not exist yet),
    /// programs the attribute/control registers and sets the enable bit.
    ///
    /// One-time, single-core boot action. Table bookkeeping ([`init`](Self::init))
    /// is deliberately separate from this hardware step.
    pub fn enable_translation(&mut self, fb: &FramebufferConfig, heap: &KernelHeap) {
        self.root.clear();
        self.low_table.clear();

        self.root
            .set(0, self.low_table.base().as_u64() | flags::TABLE_DESC);
        for i in 0..ENTRIES_PER_TABLE {
            let phys = i as u64 * BLOCK_SIZE_2M;
            self.low_table.set(i, phys | flags::KERNEL_BLOCK);
        }

        if fb.is_valid() {
            self.overlay_framebuffer(fb, heap);
        }

        let root_base = self.root.base();
        mmu::mmu().enable(root_base);
        log::info!("vm: translation enabled, root at {}", root_base);
    }

    /// Rewrite the framebuffer's 2 MiB blocks as device memory.
    fn overlay_framebuffer(&mut self, fb: &FramebufferConfig, heap: &KernelHeap) {
        let root_index = ((fb.base.as_u64() >> 30) & 0x1FF) as usize;

        if !self.root.is_valid(root_index) {
            let Some(block) = heap.allocate_aligned(
                core::mem::size_of::<PageTable>(),
                core::mem::align_of::<PageTable>(),
            ) else {
                log::error!("vm: no memory for the framebuffer table, window stays cacheable");
                return;
            };
            // SAFETY: block is a fresh table-sized, table-aligned allocation
            unsafe {
                core::ptr::write_bytes(block.as_ptr(), 0, core::mem::size_of::<PageTable>());
            }
            self.root
                .set(root_index, block.as_ptr() as u64 | flags::TABLE_DESC);
        }

        let table = self.root.table_address(root_index).as_u64() as *mut PageTable;
        let start = fb.base.as_u64() & !(BLOCK_SIZE_2M - 1);
        let end = fb.base.as_u64() + fb.size_bytes();

        let mut phys = start;
        while phys < end {
            let index = ((phys >> 21) & 0x1FF) as usize;
            // SAFETY: table points at a live second-level table (either
            // low_table or the block installed above) and index < 512
            unsafe {
                (*table).set(index, phys | flags::DEVICE_BLOCK);
            }
            phys += BLOCK_SIZE_2M;
        }
    }

    /// Allocate a private address-space root for a new task: a copy of all
    /// 512 kernel root entries, by value.
    ///
    /// Later changes to the kernel tables are not propagated to the copy.
    /// Returns [`PhysAddr::NULL`] when the heap is exhausted.
    #[must_use]
    pub fn create_task_address_space(&self, heap: &KernelHeap) -> PhysAddr {
        let Some(block) = heap.allocate_aligned(
            core::mem::size_of::<PageTable>(),
            core::mem::align_of::<PageTable>(),
        ) else {
            log::error!("vm: failed to allocate a task root table");
            return PhysAddr::NULL;
        };

        // SAFETY: block is a fresh table-sized, table-aligned allocation
        // disjoint from the kernel root table
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.root.entries().as_ptr(),
                block.as_ptr() as *mut u64,
                ENTRIES_PER_TABLE,
            );
        }

        PhysAddr::new(block.as_ptr() as u64)
    }
}

impl Default for VmMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(4096))]
    struct Arena([u8; 64 * 1024]);

    fn test_heap(arena: &mut Arena) -> KernelHeap {
        let heap = KernelHeap::new();
        // SAFETY: arena outlives the heap within each test
        unsafe {
            heap.init(arena.0.as_mut_ptr(), arena.0.len());
        }
        heap
    }

    fn mapped(size: u64) -> (VirtAddr, PhysAddr, u64) {
        (VirtAddr::new(0x8000_0000), PhysAddr::new(0x8000_0000), size)
    }

    #[test]
    fn test_init_records_identity_range() {
        let mut vm = VmMap::new();
        vm.init();

        assert_eq!(vm.active_entries(), 1);
        let entry = vm.lookup(VirtAddr::new(0)).expect("identity entry missing");
        assert_eq!(entry.size, IDENTITY_SIZE);
        assert!(entry.prot.contains(Protection::RWX | Protection::KERNEL));
    }

    #[test]
    fn test_non_overlapping_maps_succeed() {
        let mut vm = VmMap::new();
        vm.init();

        let (virt, phys, _) = mapped(0x1000);
        assert!(vm.map(virt, phys, 0x1000, Protection::RW).is_ok());
        // Touching endpoints: new_end == existing_start is not an overlap
        assert!(vm
            .map(
                VirtAddr::new(virt.as_u64() + 0x1000),
                PhysAddr::new(phys.as_u64() + 0x1000),
                0x1000,
                Protection::RW,
            )
            .is_ok());
        assert_eq!(vm.active_entries(), 3);
    }

    #[test]
    fn test_overlapping_map_rejected_without_mutation() {
        let mut vm = VmMap::new();
        vm.init();

        let (virt, phys, size) = mapped(0x4000);
        vm.map(virt, phys, size, Protection::RW).expect("first map failed");
        let before = vm.active_entries();

        let overlapping = VirtAddr::new(virt.as_u64() + 0x2000);
        assert_eq!(
            vm.map(overlapping, phys, size, Protection::RW),
            Err(VmError::RangeConflict)
        );
        assert_eq!(vm.active_entries(), before);
        assert!(vm.lookup(overlapping).is_none());
        assert_eq!(vm.lookup(virt).expect("original entry lost").size, size);
    }

    #[test]
    fn test_unmap_releases_whole_entry() {
        let mut vm = VmMap::new();
        vm.init();

        let (virt, phys, size) = mapped(0x4000);
        vm.map(virt, phys, size, Protection::RW).expect("map failed");

        // Requested size is not consulted
        assert!(vm.unmap(virt, 1).is_ok());
        assert!(vm.lookup(virt).is_none());
    }

    #[test]
    fn test_unmap_unknown_address_is_not_found() {
        let mut vm = VmMap::new();
        vm.init();
        let before = vm.active_entries();

        assert_eq!(
            vm.unmap(VirtAddr::new(0xDEAD_0000), 0x1000),
            Err(VmError::NotFound)
        );
        assert_eq!(vm.active_entries(), before);
    }

    #[test]
    fn test_protect_rewrites_flags_in_place() {
        let mut vm = VmMap::new();
        vm.init();

        let (virt, phys, size) = mapped(0x2000);
        vm.map(virt, phys, size, Protection::RWX).expect("map failed");
        vm.protect(virt, size, Protection::RW).expect("protect failed");

        let entry = vm.lookup(virt).expect("entry missing");
        assert_eq!(entry.prot, Protection::RW);
        assert_eq!(entry.size, size);

        assert_eq!(
            vm.protect(VirtAddr::new(0xDEAD_0000), 0, Protection::RW),
            Err(VmError::NotFound)
        );
    }

    #[test]
    fn test_allocate_uses_slot_stride() {
        let mut vm = VmMap::new();
        vm.init();

        // Slot 0 holds the identity entry, so the first free slot is 1
        let first = vm.allocate(0x1000, Protection::RW);
        assert_eq!(first.as_u64(), ALLOC_BASE + ALLOC_STRIDE);
        let second = vm.allocate(0x1000, Protection::RW);
        assert_eq!(second.as_u64(), ALLOC_BASE + 2 * ALLOC_STRIDE);
    }

    #[test]
    fn test_allocate_reuses_freed_slot() {
        let mut vm = VmMap::new();
        vm.init();

        let first = vm.allocate(0x1000, Protection::RW);
        let second = vm.allocate(0x1000, Protection::RW);
        assert!(!second.is_null());

        vm.deallocate(first).expect("deallocate failed");
        let third = vm.allocate(0x1000, Protection::RW);
        assert_eq!(third, first);
    }

    #[test]
    fn test_allocate_exhaustion_returns_null() {
        let mut vm = VmMap::new();
        vm.init();

        for _ in 0..MAP_CAPACITY - 1 {
            assert!(!vm.allocate(0x1000, Protection::RW).is_null());
        }
        assert_eq!(vm.active_entries(), MAP_CAPACITY);
        assert!(vm.allocate(0x1000, Protection::RW).is_null());
    }

    #[test]
    fn test_enable_translation_builds_identity_blocks() {
        let mut arena = Arena([0; 64 * 1024]);
        let heap = test_heap(&mut arena);
        let mut vm = VmMap::new();
        vm.init();

        let fb = FramebufferConfig {
            base: PhysAddr::new(0x4000_0000),
            width: 1024,
            height: 768,
            pitch: 1024 * 4,
        };
        vm.enable_translation(&fb, &heap);

        assert_eq!(
            vm.root.get(0),
            vm.low_table.base().as_u64() | flags::TABLE_DESC
        );
        assert_eq!(vm.low_table.get(0), flags::KERNEL_BLOCK);
        assert_eq!(
            vm.low_table.get(511),
            511 * BLOCK_SIZE_2M | flags::KERNEL_BLOCK
        );
    }

    #[test]
    fn test_enable_translation_overlays_framebuffer_as_device() {
        let mut arena = Arena([0; 64 * 1024]);
        let heap = test_heap(&mut arena);
        let mut vm = VmMap::new();
        vm.init();

        let fb = FramebufferConfig {
            base: PhysAddr::new(0x4000_0000),
            width: 1024,
            height: 768,
            pitch: 1024 * 4,
        };
        vm.enable_translation(&fb, &heap);

        // The framebuffer gigabyte got its own second-level table
        assert!(vm.root.is_valid(1));
        let table = vm.root.table_address(1).as_u64() as *const PageTable;

        // 3 MiB of framebuffer spans two 2 MiB blocks
        // SAFETY: the table was allocated from the test heap just above
        let (first, second, third) =
            unsafe { ((*table).get(0), (*table).get(1), (*table).get(2)) };
        assert_eq!(first, 0x4000_0000 | flags::DEVICE_BLOCK);
        assert_eq!(second, 0x4020_0000 | flags::DEVICE_BLOCK);
        assert_eq!(third, 0);
    }

    #[test]
    fn test_task_address_space_is_a_root_copy() {
        let mut arena = Arena([0; 64 * 1024]);
        let heap = test_heap(&mut arena);
        let mut vm = VmMap::new();
        vm.init();

        let fb = FramebufferConfig {
            base: PhysAddr::new(0x4000_0000),
            width: 1024,
            height: 768,
            pitch: 1024 * 4,
        };
        vm.enable_translation(&fb, &heap);

        let root = vm.create_task_address_space(&heap);
        assert!(!root.is_null());
        assert_eq!(root.as_u64() % 4096, 0);

        let copy = root.as_u64() as *const PageTable;
        for i in 0..ENTRIES_PER_TABLE {
            // SAFETY: copy points at the table allocated just above
            let entry = unsafe { (*copy).get(i) };
            assert_eq!(entry, vm.root.get(i));
        }

        // Later kernel-table mutation is not visible in the copy
        let before = vm.root.get(7);
        vm.root.set(7, 0xAAAA | flags::TABLE_DESC);
        // SAFETY: same live table as above
        assert_eq!(unsafe { (*copy).get(7) }, before);
    }

    #[test]
    fn test_task_address_space_exhaustion_is_null() {
        let mut arena = Arena([0; 64 * 1024]);
        let heap = test_heap(&mut arena);
        let vm = VmMap::new();

        // Drain the heap so the table allocation must fail
        while heap.allocate(4096).is_some() {}
        assert_eq!(vm.create_task_address_space(&heap), PhysAddr::NULL);
    }
}
