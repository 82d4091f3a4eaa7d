//! CPU Control and Information
//!
//! Low-level CPU operations plus the per-core run-state machine. A core is
//! `Running` while executing kernel or task code, `Idle` while parked
//! waiting for work, and `Halted` once it has been taken out of service.
//! Halting is a one-way transition that masks interrupts and parks the
//! core in a wait-for-interrupt loop forever.

use core::sync::atomic::{AtomicU8, Ordering};

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use aarch64_cpu::registers::{Readable, DAIF, MPIDR_EL1};
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use core::arch::asm;

/// Maximum number of cores tracked by the run-state machine.
pub const MAX_CORES: usize = 8;

/// Per-core run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuState {
    /// Parked, waiting for an interrupt to bring work.
    Idle = 0,
    /// Executing kernel or task code.
    Running = 1,
    /// Out of service; interrupts masked, never leaves the wait loop.
    Halted = 2,
}

impl CpuState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            2 => Self::Halted,
            _ => Self::Running,
        }
    }
}

/// Run state of every core, indexed by core id.
const INIT_STATE: AtomicU8 = AtomicU8::new(CpuState::Running as u8);
static CPU_STATES: [AtomicU8; MAX_CORES] = [INIT_STATE; MAX_CORES];

/// Get the current core id (MPIDR_EL1 Aff0/Aff1 fields).
#[must_use]
pub fn core_id() -> usize {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    {
        let mpidr = MPIDR_EL1.get();
        ((mpidr & 0xFF) | ((mpidr >> 8) & 0xFF00)) as usize
    }
    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    {
        0
    }
}

/// Wait for interrupt (WFI instruction).
#[inline]
pub fn wait_for_interrupt() {
    // SAFETY: WFI is always safe to call
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    unsafe {
        asm!("wfi", options(nomem, nostack));
    }
}

/// Wait for event (WFE instruction).
#[inline]
pub fn wait_for_event() {
    // SAFETY: WFE is always safe to call
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    unsafe {
        asm!("wfe", options(nomem, nostack));
    }
}

/// Send event (SEV instruction).
#[inline]
pub fn send_event() {
    // SAFETY: SEV is always safe to call
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    unsafe {
        asm!("sev", options(nomem, nostack));
    }
}

/// Data synchronization barrier.
#[inline]
pub fn dsb_sy() {
    // SAFETY: Memory barrier is always safe
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    unsafe {
        asm!("dsb sy", options(nostack));
    }
}

/// Instruction synchronization barrier.
#[inline]
pub fn isb() {
    // SAFETY: ISB is always safe
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    unsafe {
        asm!("isb", options(nostack));
    }
}

/// Mask IRQs and return the previous DAIF state.
#[must_use]
#[inline]
pub fn disable_interrupts() -> u64 {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    {
        let daif = DAIF.get();
        // SAFETY: Modifying DAIF is safe in kernel mode
        unsafe {
            asm!("msr daifset, #2", options(nomem, nostack));
        }
        daif
    }
    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    {
        0
    }
}

/// Unmask IRQs.
#[inline]
pub fn enable_interrupts() {
    // SAFETY: Modifying DAIF is safe in kernel mode
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    unsafe {
        asm!("msr daifclr, #2", options(nomem, nostack));
    }
}

/// Restore a DAIF state previously returned by [`disable_interrupts`].
#[inline]
pub fn restore_interrupts(daif: u64) {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    // SAFETY: Restoring a previously read DAIF value is safe in kernel mode
    unsafe {
        asm!("msr daif, {}", in(reg) daif, options(nomem, nostack));
    }
    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    let _ = daif;
}

/// Transition the calling core to `state`.
///
/// `Idle` parks the core in a WFI loop until another agent moves it back to
/// `Running`. `Halted` masks interrupts and parks the core permanently.
/// Hosted builds record the state only.
pub fn set_state(state: CpuState) {
    let id = core_id();
    if id >= MAX_CORES {
        return;
    }

    CPU_STATES[id].store(state as u8, Ordering::Release);

    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    match state {
        CpuState::Idle => {
            while CPU_STATES[id].load(Ordering::Acquire) == CpuState::Idle as u8 {
                wait_for_interrupt();
            }
        }
        CpuState::Halted => {
            let _ = disable_interrupts();
            loop {
                wait_for_interrupt();
            }
        }
        CpuState::Running => {}
    }
}

/// Get the calling core's run state.
#[must_use]
pub fn state() -> CpuState {
    let id = core_id();
    if id >= MAX_CORES {
        return CpuState::Running;
    }
    CpuState::from_u8(CPU_STATES[id].load(Ordering::Acquire))
}

/// Park the core forever without touching the run-state machine.
///
/// Used by the panic handler, where the state array may itself be suspect.
#[inline]
pub fn halt() -> ! {
    let _ = disable_interrupts();
    loop {
        wait_for_interrupt();
        #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
        core::hint::spin_loop();
    }
}
