//! Hardware Execution Context
//!
//! The per-task register context and the switch primitive. Only the
//! callee-saved set is stored: a context switch happens at a call boundary
//! (an explicit yield or the tail of an interrupt handler), so the
//! caller-saved registers are dead by the AAPCS64 calling convention.
//!
//! Exactly one context is live in the CPU at any instant; every other
//! context is a frozen snapshot owned by its task.

use astral_common::VirtAddr;

/// Callee-saved register context of a suspended task.
///
/// Field order matches the store layout of the switch assembly; do not
/// reorder.
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuContext {
    pub x19: u64,
    pub x20: u64,
    pub x21: u64,
    pub x22: u64,
    pub x23: u64,
    pub x24: u64,
    pub x25: u64,
    pub x26: u64,
    pub x27: u64,
    pub x28: u64,
    /// Frame pointer (x29)
    pub fp: u64,
    /// Link register (x30), the address execution resumes at
    pub lr: u64,
    /// Stack pointer
    pub sp: u64,
}

impl CpuContext {
    /// An all-zero context.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            x19: 0,
            x20: 0,
            x21: 0,
            x22: 0,
            x23: 0,
            x24: 0,
            x25: 0,
            x26: 0,
            x27: 0,
            x28: 0,
            fp: 0,
            lr: 0,
            sp: 0,
        }
    }

    /// Create a context that will start executing at `entry` on the stack
    /// topped at `stack_top`.
    ///
    /// The frame pointer starts equal to the stack pointer, giving the new
    /// task an empty initial call frame.
    #[must_use]
    pub fn new_at(entry: fn() -> !, stack_top: VirtAddr) -> Self {
        Self {
            lr: entry as usize as u64,
            sp: stack_top.as_u64(),
            fp: stack_top.as_u64(),
            ..Self::zeroed()
        }
    }

    /// The stack pointer this context will resume on.
    #[inline]
    #[must_use]
    pub fn stack_pointer(&self) -> VirtAddr {
        VirtAddr::new(self.sp)
    }
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Switch from `prev` to `next`.
///
/// Saves the callee-saved set and stack pointer of the running task into
/// `prev`, restores the same set from `next`, and returns on `next`'s
/// stack at `next`'s saved link register. The call "returns" only when
/// some later switch restores `prev`.
///
/// # Safety
///
/// - `prev` must point to valid, writable context storage
/// - `next` must point to a context previously saved by this function or
///   built by [`CpuContext::new_at`] over a live stack
/// - The caller must not hold any lock the resumed task may try to acquire
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
pub unsafe fn context_switch(prev: *mut CpuContext, next: *const CpuContext) {
    // SAFETY: Contract forwarded to the caller
    unsafe { __astral_context_switch(prev, next) }
}

/// Hosted fallback; the real primitive only exists on bare-metal AArch64.
#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
pub unsafe fn context_switch(_prev: *mut CpuContext, _next: *const CpuContext) {
    unimplemented!("register context switching requires bare-metal aarch64")
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
extern "C" {
    fn __astral_context_switch(prev: *mut CpuContext, next: *const CpuContext);
}

// Save slots: x19..x28 at 0..80, fp at 80, lr at 88, sp at 96.
// The dsb/isb pair makes the outgoing task's stores visible before any
// code of the incoming task runs.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
core::arch::global_asm!(
    r#"
.global __astral_context_switch
.type __astral_context_switch, @function
__astral_context_switch:
    dsb     sy

    stp     x19, x20, [x0, #0]
    stp     x21, x22, [x0, #16]
    stp     x23, x24, [x0, #32]
    stp     x25, x26, [x0, #48]
    stp     x27, x28, [x0, #64]
    stp     x29, x30, [x0, #80]
    mov     x9, sp
    str     x9, [x0, #96]

    ldp     x19, x20, [x1, #0]
    ldp     x21, x22, [x1, #16]
    ldp     x23, x24, [x1, #32]
    ldp     x25, x26, [x1, #48]
    ldp     x27, x28, [x1, #64]
    ldp     x29, x30, [x1, #80]
    ldr     x9, [x1, #96]
    mov     sp, x9

    dsb     sy
    isb

    ret
"#
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_switch_offsets() {
        assert_eq!(core::mem::size_of::<CpuContext>(), 13 * 8);
        assert_eq!(core::mem::offset_of!(CpuContext, fp), 80);
        assert_eq!(core::mem::offset_of!(CpuContext, lr), 88);
        assert_eq!(core::mem::offset_of!(CpuContext, sp), 96);
    }

    #[test]
    fn test_new_at_seeds_resume_point() {
        fn entry() -> ! {
            unreachable!()
        }
        let ctx = CpuContext::new_at(entry, VirtAddr::new(0x8_0000));
        assert_eq!(ctx.lr, entry as usize as u64);
        assert_eq!(ctx.sp, 0x8_0000);
        assert_eq!(ctx.fp, ctx.sp);
        assert_eq!(ctx.x19, 0);
    }
}
