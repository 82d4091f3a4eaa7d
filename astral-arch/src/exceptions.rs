//! Exception Handling
//!
//! EL1 exception vector table and handler dispatch. Each vector stub saves
//! the full general-purpose register frame plus ELR/SPSR/ESR/FAR, then
//! calls a registered handler with a mutable view of that frame; on return
//! the frame is restored and `eret` resumes the interrupted code.
//!
//! Handlers are installed through atomically-swapped function pointers so
//! the kernel can wire its timer tick in after boot without any locking in
//! the exception path.

use core::sync::atomic::{AtomicPtr, Ordering};

/// Exception context saved on the stack by the vector stubs.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct ExceptionContext {
    /// General purpose registers x0-x30
    pub gpr: [u64; 31],
    /// Stack pointer at the point of the exception
    pub sp: u64,
    /// Exception Link Register (return address)
    pub elr: u64,
    /// Saved Program Status Register
    pub spsr: u64,
    /// Exception Syndrome Register
    pub esr: u64,
    /// Fault Address Register
    pub far: u64,
}

impl ExceptionContext {
    /// Exception class field of the syndrome register.
    #[must_use]
    pub fn exception_class(&self) -> u8 {
        ((self.esr >> 26) & 0x3F) as u8
    }
}

/// Exception handler function type.
pub type ExceptionHandler = fn(&mut ExceptionContext);

static SYNC_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_sync_handler as *mut ());
static IRQ_HANDLER: AtomicPtr<()> = AtomicPtr::new(default_irq_handler as *mut ());

/// Set the synchronous exception handler.
///
/// Takes effect on the next synchronous exception.
pub fn set_sync_handler(handler: ExceptionHandler) {
    SYNC_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Set the IRQ handler.
///
/// Takes effect on the next IRQ.
pub fn set_irq_handler(handler: ExceptionHandler) {
    IRQ_HANDLER.store(handler as *mut (), Ordering::Release);
}

/// Load a handler previously stored by one of the `set_*_handler`
/// functions.
#[inline]
fn load_handler(slot: &AtomicPtr<()>) -> ExceptionHandler {
    let ptr = slot.load(Ordering::Acquire);
    // SAFETY: The pointer was stored as a valid `ExceptionHandler`
    unsafe { core::mem::transmute(ptr) }
}

/// Default synchronous handler: nothing recoverable at this level.
fn default_sync_handler(ctx: &mut ExceptionContext) {
    panic!(
        "unhandled synchronous exception: EC={:#x} ELR={:#x} FAR={:#x} ESR={:#x}",
        ctx.exception_class(),
        ctx.elr,
        ctx.far,
        ctx.esr
    );
}

/// Default IRQ handler: an interrupt before the kernel wired one up.
fn default_irq_handler(ctx: &mut ExceptionContext) {
    panic!("unhandled IRQ at ELR={:#x}", ctx.elr);
}

/// Install the vector table into VBAR_EL1.
///
/// One-time boot action; no-op on hosted builds.
pub fn install() {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    {
        extern "C" {
            fn __astral_vectors();
        }
        // SAFETY: __astral_vectors is the 2 KiB-aligned table defined below
        unsafe {
            core::arch::asm!(
                "msr vbar_el1, {}",
                "isb",
                in(reg) __astral_vectors as usize as u64,
                options(nostack)
            );
        }
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[no_mangle]
extern "C" fn __astral_handle_sync(ctx: *mut ExceptionContext) {
    // SAFETY: The stub passes a pointer to the frame it just saved
    let ctx = unsafe { &mut *ctx };
    load_handler(&SYNC_HANDLER)(ctx);
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[no_mangle]
extern "C" fn __astral_handle_irq(ctx: *mut ExceptionContext) {
    // SAFETY: The stub passes a pointer to the frame it just saved
    let ctx = unsafe { &mut *ctx };
    load_handler(&IRQ_HANDLER)(ctx);
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
#[no_mangle]
extern "C" fn __astral_handle_unexpected(ctx: *mut ExceptionContext) {
    // SAFETY: The stub passes a pointer to the frame it just saved
    let ctx = unsafe { &mut *ctx };
    panic!(
        "unexpected exception route: ELR={:#x} ESR={:#x}",
        ctx.elr, ctx.esr
    );
}

// Vector table: 16 entries of 128 bytes. Every entry branches to a
// trampoline that saves a 36-slot frame (x0-x30, sp, ELR, SPSR, ESR, FAR,
// matching ExceptionContext), dispatches, restores and erets. Frames from
// lower exception levels and FIQ/SError routes are funnelled into the
// "unexpected" handler: this kernel runs everything at EL1.
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
core::arch::global_asm!(
    r#"
.macro ASTRAL_TRAMP name, continuation
.balign 0x80
\name:
    sub     sp, sp, #(36 * 8)
    stp     x0, x1, [sp, #(0 * 16)]
    stp     x2, x3, [sp, #(1 * 16)]
    stp     x4, x5, [sp, #(2 * 16)]
    stp     x6, x7, [sp, #(3 * 16)]
    stp     x8, x9, [sp, #(4 * 16)]
    stp     x10, x11, [sp, #(5 * 16)]
    stp     x12, x13, [sp, #(6 * 16)]
    stp     x14, x15, [sp, #(7 * 16)]
    stp     x16, x17, [sp, #(8 * 16)]
    stp     x18, x19, [sp, #(9 * 16)]
    stp     x20, x21, [sp, #(10 * 16)]
    stp     x22, x23, [sp, #(11 * 16)]
    stp     x24, x25, [sp, #(12 * 16)]
    stp     x26, x27, [sp, #(13 * 16)]
    stp     x28, x29, [sp, #(14 * 16)]
    str     x30, [sp, #(30 * 8)]
    add     x9, sp, #(36 * 8)
    str     x9, [sp, #(31 * 8)]
    mrs     x9, elr_el1
    str     x9, [sp, #(32 * 8)]
    mrs     x9, spsr_el1
    str     x9, [sp, #(33 * 8)]
    mrs     x9, esr_el1
    str     x9, [sp, #(34 * 8)]
    mrs     x9, far_el1
    str     x9, [sp, #(35 * 8)]

    mov     x0, sp
    bl      \continuation

    ldr     x9, [sp, #(32 * 8)]
    msr     elr_el1, x9
    ldr     x9, [sp, #(33 * 8)]
    msr     spsr_el1, x9
    ldp     x0, x1, [sp, #(0 * 16)]
    ldp     x2, x3, [sp, #(1 * 16)]
    ldp     x4, x5, [sp, #(2 * 16)]
    ldp     x6, x7, [sp, #(3 * 16)]
    ldp     x8, x9, [sp, #(4 * 16)]
    ldp     x10, x11, [sp, #(5 * 16)]
    ldp     x12, x13, [sp, #(6 * 16)]
    ldp     x14, x15, [sp, #(7 * 16)]
    ldp     x16, x17, [sp, #(8 * 16)]
    ldp     x18, x19, [sp, #(9 * 16)]
    ldp     x20, x21, [sp, #(10 * 16)]
    ldp     x22, x23, [sp, #(11 * 16)]
    ldp     x24, x25, [sp, #(12 * 16)]
    ldp     x26, x27, [sp, #(13 * 16)]
    ldp     x28, x29, [sp, #(14 * 16)]
    ldr     x30, [sp, #(30 * 8)]
    add     sp, sp, #(36 * 8)
    eret
.endm

.section .text
ASTRAL_TRAMP __astral_tramp_sync, __astral_handle_sync
ASTRAL_TRAMP __astral_tramp_irq, __astral_handle_irq
ASTRAL_TRAMP __astral_tramp_unexpected, __astral_handle_unexpected

.macro ASTRAL_VECTOR target
.balign 0x80
    b       \target
.endm

.balign 0x800
.global __astral_vectors
__astral_vectors:
    // Current EL with SP_EL0
    ASTRAL_VECTOR __astral_tramp_sync
    ASTRAL_VECTOR __astral_tramp_irq
    ASTRAL_VECTOR __astral_tramp_unexpected
    ASTRAL_VECTOR __astral_tramp_unexpected
    // Current EL with SP_ELx
    ASTRAL_VECTOR __astral_tramp_sync
    ASTRAL_VECTOR __astral_tramp_irq
    ASTRAL_VECTOR __astral_tramp_unexpected
    ASTRAL_VECTOR __astral_tramp_unexpected
    // Lower EL, AArch64
    ASTRAL_VECTOR __astral_tramp_unexpected
    ASTRAL_VECTOR __astral_tramp_unexpected
    ASTRAL_VECTOR __astral_tramp_unexpected
    ASTRAL_VECTOR __astral_tramp_unexpected
    // Lower EL, AArch32
    ASTRAL_VECTOR __astral_tramp_unexpected
    ASTRAL_VECTOR __astral_tramp_unexpected
    ASTRAL_VECTOR __astral_tramp_unexpected
    ASTRAL_VECTOR __astral_tramp_unexpected
"#
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout_matches_stub_offsets() {
        assert_eq!(core::mem::size_of::<ExceptionContext>(), 36 * 8);
        assert_eq!(core::mem::offset_of!(ExceptionContext, sp), 31 * 8);
        assert_eq!(core::mem::offset_of!(ExceptionContext, elr), 32 * 8);
        assert_eq!(core::mem::offset_of!(ExceptionContext, far), 35 * 8);
    }

    #[test]
    fn test_handler_registration() {
        fn probe(_ctx: &mut ExceptionContext) {}
        set_irq_handler(probe);
        let loaded = load_handler(&IRQ_HANDLER);
        assert_eq!(loaded as usize, probe as usize);
    }

    #[test]
    fn test_exception_class_extraction() {
        let mut ctx = ExceptionContext {
            gpr: [0; 31],
            sp: 0,
            elr: 0,
            spsr: 0,
            esr: 0x5600_0000,
            far: 0,
        };
        assert_eq!(ctx.exception_class(), 0x15);
        ctx.esr = 0;
        assert_eq!(ctx.exception_class(), 0);
    }
}
