//! MMU Support
//!
//! Page table type, descriptor flags and translation-control register
//! access for the two-level block mapping scheme: a root table whose
//! entries each cover 1 GiB, pointing at second-level tables of 2 MiB
//! block descriptors. 4 KiB granule, 48-bit addresses.
//!
//! This module owns the *registers*; the mapping policy (which ranges are
//! built, bookkeeping, per-task copies) lives in the kernel's memory
//! module.

use astral_common::PhysAddr;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use aarch64_cpu::registers::{Readable, Writeable, MAIR_EL1, SCTLR_EL1, TCR_EL1, TTBR0_EL1};
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use core::arch::asm;

use spin::Mutex;

/// Number of entries per translation table.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Bytes covered by one root-table entry.
pub const REGION_SIZE_1G: u64 = 1 << 30;

/// Bytes covered by one second-level block descriptor.
pub const BLOCK_SIZE_2M: u64 = 2 << 20;

/// Physical address mask for table and block descriptors.
pub const PHYS_ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;

/// Memory attribute indices, matching the MAIR programming below.
pub mod attr {
    /// Device-nGnRnE
    pub const DEVICE_NGNRNE: u64 = 0;
    /// Normal non-cacheable
    pub const NORMAL_NC: u64 = 1;
    /// Normal write-back cacheable
    pub const NORMAL: u64 = 2;
}

/// Translation table descriptor flags.
pub mod flags {
    use super::attr;

    /// Descriptor is valid
    pub const VALID: u64 = 1 << 0;
    /// Points at a next-level table
    pub const TABLE: u64 = 1 << 1;
    /// Block descriptor (bit 1 clear)
    pub const BLOCK: u64 = 0 << 1;
    /// Access flag
    pub const AF: u64 = 1 << 10;
    /// Inner shareable
    pub const SH_INNER: u64 = 0x3 << 8;
    /// Read/write at EL1, no EL0 access
    pub const AP_RW_EL1: u64 = 0x0 << 6;
    /// Privileged execute never
    pub const PXN: u64 = 1 << 53;
    /// Unprivileged execute never
    pub const UXN: u64 = 1 << 54;

    /// Attribute index shift within a descriptor
    pub const ATTR_INDEX_SHIFT: u64 = 2;

    /// Table descriptor pointing at a second-level table
    pub const TABLE_DESC: u64 = VALID | TABLE;
    /// Kernel RW block of normal cacheable memory
    pub const KERNEL_BLOCK: u64 =
        VALID | BLOCK | AF | SH_INNER | AP_RW_EL1 | (attr::NORMAL << ATTR_INDEX_SHIFT);
    /// Non-executable device memory block
    pub const DEVICE_BLOCK: u64 = VALID
        | BLOCK
        | AF
        | SH_INNER
        | AP_RW_EL1
        | PXN
        | UXN
        | (attr::DEVICE_NGNRNE << ATTR_INDEX_SHIFT);
}

/// MAIR_EL1 value: attr 0 device-nGnRnE (0x00), attr 1 normal
/// non-cacheable (0x44), attr 2 normal write-back (0xFF).
pub const MAIR_VALUE: u64 = (0x00 << (attr::DEVICE_NGNRNE * 8))
    | (0x44 << (attr::NORMAL_NC * 8))
    | (0xFF << (attr::NORMAL * 8));

/// TCR_EL1 value: 48-bit VA on TTBR0, 4 KiB granule, inner-shareable
/// write-back walks, 48-bit physical addresses.
pub const TCR_VALUE: u64 = {
    const T0SZ_48BIT: u64 = 64 - 48;
    const IRGN0_WBWA: u64 = 0x1 << 8;
    const ORGN0_WBWA: u64 = 0x1 << 10;
    const SH0_INNER: u64 = 0x3 << 12;
    const TG0_4KB: u64 = 0x0 << 14;
    const PS_48BIT: u64 = 0x5 << 16;
    T0SZ_48BIT | IRGN0_WBWA | ORGN0_WBWA | SH0_INNER | TG0_4KB | PS_48BIT
};

/// A single translation table: 512 descriptors, 4 KiB, page-aligned as the
/// hardware requires of a table base.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [u64; ENTRIES_PER_TABLE],
}

impl PageTable {
    /// Create a table of invalid descriptors.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            entries: [0; ENTRIES_PER_TABLE],
        }
    }

    /// Get a descriptor by index.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> u64 {
        self.entries[index]
    }

    /// Set a descriptor by index.
    #[inline]
    pub fn set(&mut self, index: usize, value: u64) {
        self.entries[index] = value;
    }

    /// Check if a descriptor is valid.
    #[inline]
    #[must_use]
    pub fn is_valid(&self, index: usize) -> bool {
        self.entries[index] & flags::VALID != 0
    }

    /// Get the next-level table address out of a table descriptor.
    #[inline]
    #[must_use]
    pub fn table_address(&self, index: usize) -> PhysAddr {
        PhysAddr::new(self.entries[index] & PHYS_ADDR_MASK)
    }

    /// Invalidate every descriptor.
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = 0;
        }
    }

    /// The physical base of this table, assuming identity-mapped kernel
    /// memory.
    #[inline]
    #[must_use]
    pub fn base(&self) -> PhysAddr {
        PhysAddr::new(self as *const Self as u64)
    }

    /// Raw view of all descriptors.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[u64; ENTRIES_PER_TABLE] {
        &self.entries
    }
}

/// MMU controller.
pub struct Mmu {
    enabled: bool,
}

impl Mmu {
    const fn new() -> Self {
        Self { enabled: false }
    }

    /// Check if translation is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        {
            self.enabled || (SCTLR_EL1.get() & 1) != 0
        }
        #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
        {
            self.enabled
        }
    }

    /// Program the attribute/control registers, install `ttbr0` and set
    /// the enable bit. One-time, single-core boot action.
    pub fn enable(&mut self, ttbr0: PhysAddr) {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        {
            MAIR_EL1.set(MAIR_VALUE);
            TCR_EL1.set(TCR_VALUE);
            TTBR0_EL1.set(ttbr0.as_u64());

            self.invalidate_tlb_all();

            SCTLR_EL1.set(SCTLR_EL1.get() | 1);
            // SAFETY: ISB is always safe
            unsafe {
                asm!("isb", options(nostack));
            }
        }
        #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
        let _ = ttbr0;

        self.enabled = true;
    }

    /// Invalidate the whole translation cache.
    pub fn invalidate_tlb_all(&self) {
        // SAFETY: TLB invalidation is safe
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        unsafe {
            asm!("tlbi vmalle1is", "dsb sy", "isb", options(nostack));
        }
    }

    /// Install a new translation root.
    pub fn set_ttbr0(&self, ttbr0: PhysAddr) {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        {
            TTBR0_EL1.set(ttbr0.as_u64());
            // SAFETY: ISB is always safe
            unsafe {
                asm!("isb", options(nostack));
            }
        }
        #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
        let _ = ttbr0;
    }

    /// Read the active translation root.
    #[must_use]
    pub fn ttbr0(&self) -> PhysAddr {
        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        {
            PhysAddr::new(TTBR0_EL1.get())
        }
        #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
        {
            PhysAddr::NULL
        }
    }
}

/// Global MMU instance.
static MMU: Mutex<Mmu> = Mutex::new(Mmu::new());

/// Get access to the global MMU.
pub fn mmu() -> spin::MutexGuard<'static, Mmu> {
    MMU.lock()
}
