//! Platform Abstraction Layer
//!
//! Hardware description and drivers for the boot platform (QEMU `virt`):
//! - [`platform`]: fixed memory/device map and framebuffer description
//! - [`console`]: PL011 early console with `print!`/`println!` macros
//! - [`timer`]: ARM generic timer, fixed 10 ms scheduling tick
//! - [`gic`]: GICv3 interrupt controller bring-up and timer PPI routing
//!
//! Register and MMIO access only exists on bare-metal AArch64 builds;
//! hosted builds get inert fallbacks so dependent crates stay testable.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod console;
pub mod gic;
pub mod platform;
pub mod timer;

pub use platform::{platform, FramebufferConfig, Platform};
