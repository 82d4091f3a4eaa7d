//! Platform Description
//!
//! A fixed description of the boot platform. The kernel core consumes
//! memory and framebuffer ranges through this one struct; on hardware with
//! a device tree these values would be discovered at boot, which is an
//! external concern. The core only needs the resulting ranges.

use astral_common::PhysAddr;

/// GIC distributor base on QEMU virt.
pub const GICD_BASE: u64 = 0x0800_0000;

/// GIC redistributor base (boot core) on QEMU virt.
pub const GICR_BASE: u64 = 0x080A_0000;

/// PL011 UART base on QEMU virt.
pub const UART_BASE: u64 = 0x0900_0000;

/// Framebuffer geometry and placement.
#[derive(Clone, Copy, Debug)]
pub struct FramebufferConfig {
    /// Physical base address
    pub base: PhysAddr,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Stride in bytes per row
    pub pitch: u32,
}

impl FramebufferConfig {
    /// Total bytes covered by the framebuffer.
    #[inline]
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.height as u64 * self.pitch as u64
    }

    /// Check if this describes a usable framebuffer.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.base.is_null() && self.width > 0 && self.height > 0 && self.pitch > 0
    }
}

/// Static hardware description of one platform.
pub struct Platform {
    /// Platform name for logs
    pub name: &'static str,
    /// PL011 UART base
    pub uart_base: u64,
    /// GIC distributor base
    pub gicd_base: u64,
    /// GIC redistributor base (boot core)
    pub gicr_base: u64,
    /// Kernel heap carve-out base
    pub heap_base: u64,
    /// Kernel heap carve-out size in bytes
    pub heap_size: usize,
    /// Framebuffer description
    pub framebuffer: FramebufferConfig,
}

/// QEMU `virt` machine.
///
/// The heap carve-out sits inside the low-memory identity range the boot
/// mapping covers. The framebuffer fallback matches a 1024x768 XRGB
/// window at the first address past that range.
static QEMU_VIRT: Platform = Platform {
    name: "qemu-virt",
    uart_base: UART_BASE,
    gicd_base: GICD_BASE,
    gicr_base: GICR_BASE,
    heap_base: 0x2000_0000,
    heap_size: 0x1000_0000,
    framebuffer: FramebufferConfig {
        base: PhysAddr::new(0x4000_0000),
        width: 1024,
        height: 768,
        pitch: 1024 * 4,
    },
};

/// Get the boot platform description.
#[must_use]
pub fn platform() -> &'static Platform {
    &QEMU_VIRT
}
