//! # astral-kernel
//!
//! The Astral kernel core for ARM64: execution contexts, the virtual
//! address space, and the mechanism that switches between them.
//!
//! # Modules
//!
//! - [`memory`]: the virtual-memory mapping table, hardware page-table
//!   construction, and the kernel heap
//! - [`sched`]: the task registry and round-robin scheduler
//! - [`security`]: the write-XOR-execute convention
//! - [`irq`]: timer-tick interrupt wiring
//! - [`logging`]: `log` facade backed by the platform console
//!
//! # Concurrency model
//!
//! One hardware thread of control per core. Control transfer happens only
//! at explicit yields or at the timer tick; the scheduler spinlock guards
//! registry bookkeeping and is never held across the register switch
//! itself.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
extern crate std;

pub mod irq;
pub mod logging;
pub mod memory;
pub mod sched;
pub mod security;
