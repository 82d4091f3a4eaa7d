//! # astral-arch
//!
//! ARM64 architecture support for the Astral kernel.
//!
//! Provides the low-level mechanisms the kernel core is built on:
//! - [`cpu`]: CPU control (interrupt masking, core id, per-core run state)
//! - [`sync`]: the busy-wait spinlock primitive
//! - [`context`]: the callee-saved register context and switch primitive
//! - [`mmu`]: page table type, descriptor flags, TLB and translation
//!   control register access
//! - [`exceptions`]: exception vector table and handler hooks
//!
//! # Safety
//!
//! This crate contains extensive `unsafe` code for hardware access.
//! All unsafe operations carry `// SAFETY:` comments explaining the
//! invariants that must be maintained.
//!
//! # Hosted builds
//!
//! Privileged instructions and system-register access only exist when
//! compiled for bare-metal AArch64 (`target_os = "none"`). On hosted
//! targets the same functions compile to inert fallbacks, so the crates
//! layered on top build and unit-test on a development host.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod context;
pub mod cpu;
pub mod exceptions;
pub mod mmu;
pub mod sync;

pub use context::CpuContext;
pub use sync::SpinLock;
