//! Mapping protection flags
//!
//! Logical permissions recorded in the mapping table. These describe what
//! a range is *for*; the hardware descriptors built at boot are coarser
//! (see the granularity note on [`VmMap`](super::VmMap)).

use core::fmt;

/// Protection flags for a mapped range.
///
/// Flags are orthogonal bits packed into a `u32`. `KERNEL` marks ranges
/// that must never become reachable from less privileged code; it is
/// bookkeeping only at this level.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct Protection(u32);

impl Protection {
    /// No access.
    pub const NONE: Self = Self(0);

    /// Readable.
    pub const READ: Self = Self(1 << 0);

    /// Writable.
    pub const WRITE: Self = Self(1 << 1);

    /// Executable.
    pub const EXEC: Self = Self(1 << 2);

    /// Kernel-privileged range.
    pub const KERNEL: Self = Self(1 << 3);

    /// Read and write.
    pub const RW: Self = Self(Self::READ.0 | Self::WRITE.0);

    /// Read, write and execute.
    pub const RWX: Self = Self(Self::RW.0 | Self::EXEC.0);

    /// Create flags from raw bits.
    ///
    /// Only the lower 4 bits are meaningful; the rest are masked off.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & 0x0F)
    }

    /// Get the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check if the range is readable.
    #[inline]
    #[must_use]
    pub const fn has_read(self) -> bool {
        (self.0 & Self::READ.0) != 0
    }

    /// Check if the range is writable.
    #[inline]
    #[must_use]
    pub const fn has_write(self) -> bool {
        (self.0 & Self::WRITE.0) != 0
    }

    /// Check if the range is executable.
    #[inline]
    #[must_use]
    pub const fn has_exec(self) -> bool {
        (self.0 & Self::EXEC.0) != 0
    }

    /// Check if the range is kernel-privileged.
    #[inline]
    #[must_use]
    pub const fn is_kernel(self) -> bool {
        (self.0 & Self::KERNEL.0) != 0
    }

    /// Check if these flags contain all of `other`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// These flags with every bit of `other` cleared.
    #[inline]
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// These flags combined with `other`.
    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl core::ops::BitOr for Protection {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl fmt::Debug for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Protection({})", self)
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.has_read() { "r" } else { "-" },
            if self.has_write() { "w" } else { "-" },
            if self.has_exec() { "x" } else { "-" },
            if self.is_kernel() { "k" } else { "-" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_predicates() {
        let prot = Protection::RW | Protection::KERNEL;
        assert!(prot.has_read());
        assert!(prot.has_write());
        assert!(!prot.has_exec());
        assert!(prot.is_kernel());
    }

    #[test]
    fn test_without_clears_only_named_bits() {
        let prot = Protection::RWX.without(Protection::EXEC);
        assert_eq!(prot, Protection::RW);
        assert_eq!(prot.without(Protection::EXEC), prot);
    }

    #[test]
    fn test_from_bits_masks_unknown() {
        assert_eq!(Protection::from_bits(0xFF).bits(), 0x0F);
    }

    #[test]
    fn test_display() {
        let mut buf = std::string::String::new();
        use core::fmt::Write;
        write!(buf, "{}", Protection::RWX | Protection::KERNEL).unwrap();
        assert_eq!(buf, "rwxk");
    }
}
