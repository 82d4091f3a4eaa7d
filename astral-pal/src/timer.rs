//! ARM Generic Timer
//!
//! Virtual-timer access for time measurement and the periodic scheduling
//! tick. The tick period is fixed at 10 ms: the compare value is armed
//! `frequency / TICK_HZ` counter ticks ahead, and the interrupt handler
//! re-arms it the same way on every fire.

use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use aarch64_cpu::registers::{CNTFRQ_EL0, CNTVCT_EL0, CNTV_CTL_EL0, CNTV_CVAL_EL0};
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use tock_registers::interfaces::{Readable, Writeable};

/// Scheduling tick rate in Hz (10 ms period).
pub const TICK_HZ: u64 = 100;

/// Timer frequency, latched from CNTFRQ_EL0 at init.
/// Stored as an atomic since logging reads it concurrently.
static TIMER_FREQ: AtomicU64 = AtomicU64::new(0);

/// Timer control register bits.
mod ctl {
    /// Timer enabled
    pub const ENABLE: u64 = 1 << 0;
    /// Interrupt masked
    pub const IMASK: u64 = 1 << 1;
}

/// Read the virtual counter.
#[must_use]
pub fn read_counter() -> u64 {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    {
        CNTVCT_EL0.get()
    }
    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    {
        0
    }
}

fn write_cntv_cval(cval: u64) {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    CNTV_CVAL_EL0.set(cval);
    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    let _ = cval;
}

fn write_cntv_ctl(ctl: u64) {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    CNTV_CTL_EL0.set(ctl);
    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    let _ = ctl;
}

/// Initialise the timer subsystem: latch the counter frequency and leave
/// the timer disabled.
pub fn init() {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    TIMER_FREQ.store(CNTFRQ_EL0.get(), Ordering::Relaxed);

    write_cntv_ctl(0);
}

/// Get the timer frequency in Hz (0 before [`init`]).
#[must_use]
pub fn frequency() -> u64 {
    TIMER_FREQ.load(Ordering::Relaxed)
}

/// Get current time in milliseconds since boot.
#[must_use]
pub fn now_ms() -> u64 {
    let count = read_counter();
    let freq = frequency();
    if freq == 0 {
        return 0;
    }

    // Split to avoid overflowing the multiply on large counts
    let secs = count / freq;
    let frac = count % freq;
    secs * 1_000 + (frac * 1_000) / freq
}

/// Counter ticks in one scheduling tick period.
#[must_use]
pub fn tick_interval() -> u64 {
    frequency() / TICK_HZ
}

/// Arm the next scheduling tick and enable the timer interrupt.
///
/// Called once at boot and again from the tick handler on every fire.
pub fn arm_tick() {
    let target = read_counter().wrapping_add(tick_interval());
    write_cntv_cval(target);
    write_cntv_ctl(ctl::ENABLE);
}

/// Disable the timer and mask its interrupt.
pub fn disable() {
    write_cntv_ctl(ctl::IMASK);
}

/// Spin delay for a given number of microseconds.
pub fn delay_us(us: u64) {
    let freq = frequency();
    if freq == 0 {
        // No calibrated counter; burn cycles instead
        for _ in 0..us * 100 {
            core::hint::spin_loop();
        }
        return;
    }

    let ticks = (us * freq) / 1_000_000;
    let start = read_counter();
    while read_counter().wrapping_sub(start) < ticks {
        core::hint::spin_loop();
    }
}

/// Spin delay for a given number of milliseconds.
pub fn delay_ms(ms: u64) {
    delay_us(ms * 1000);
}
