//! Write-XOR-Execute Policy
//!
//! A range that is writable must not stay executable. This check is a
//! convention applied by callers at specific points (the boot sequence
//! runs it over the framebuffer window once translation is live), not an
//! invariant enforced on every mapping operation. Code that creates
//! writable mappings is responsible for calling it.

use astral_common::VirtAddr;

use crate::memory::{Protection, VmMap};

/// Strip execute permission from `virt..virt+size` when `current` has
/// both write and execute set. Otherwise leaves the mapping untouched.
pub fn enforce_write_xor_execute(
    vm: &mut VmMap,
    virt: VirtAddr,
    size: u64,
    current: Protection,
) {
    if current.has_write() && current.has_exec() {
        if vm
            .protect(virt, size, current.without(Protection::EXEC))
            .is_err()
        {
            log::warn!("security: W^X downgrade found no mapping at {}", virt);
        }
    }
}
