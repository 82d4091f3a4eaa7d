//! Context Hardware Seam
//!
//! The scheduler touches hardware through exactly two operations: swapping
//! register contexts and activating an address-space root. Keeping the
//! seam this narrow lets the dispatch logic run against a software double,
//! so rotation order and save/restore bookkeeping are testable without a
//! machine.

use astral_arch::context::{self, CpuContext};
use astral_arch::mmu;
use astral_common::PhysAddr;

/// The two hardware operations the scheduler depends on.
pub trait ContextHw {
    /// Save the running task's callee-saved state into `prev` and resume
    /// `next` at its saved stack/resume point.
    ///
    /// # Safety
    ///
    /// - `prev` must point at valid, writable context storage
    /// - `next` must point at a context that was previously saved or
    ///   freshly built over a live stack
    /// - No spinlock may be held across the call
    unsafe fn switch_context(&self, prev: *mut CpuContext, next: *const CpuContext);

    /// Install `root` as the active translation root.
    fn activate_address_space(&self, root: PhysAddr);
}

/// The real hardware: register switch plus TTBR0 install with a full
/// translation-cache invalidation (no address-space identifiers in this
/// design, so stale entries must not survive the switch).
pub struct HwContext;

impl ContextHw for HwContext {
    unsafe fn switch_context(&self, prev: *mut CpuContext, next: *const CpuContext) {
        // SAFETY: Contract forwarded to the caller
        unsafe { context::context_switch(prev, next) }
    }

    fn activate_address_space(&self, root: PhysAddr) {
        let mmu = mmu::mmu();
        mmu.set_ttbr0(root);
        mmu.invalidate_tlb_all();
    }
}
