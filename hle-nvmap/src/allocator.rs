// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! Backing storage for handles allocated without a guest-supplied address.

use log::trace;

/// Source of GPU-visible backing storage.
///
/// Consulted by Alloc when the guest passes a zero address and expects the
/// driver to find memory for the handle itself.
#[cfg_attr(test, mockall::automock)]
pub trait BackingAllocator: Send + Sync {
    /// Returns the address of `size` bytes aligned to `align`, or `None` when
    /// no storage is available.
    fn allocate(&self, size: u32, align: u32) -> Option<u64>;
}

/// Allocator that never has storage to give.
///
/// Alloc with a zero address always ends in `OutOfMemory` with it, leaving
/// the handle unallocated so the guest can retry with its own address.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAllocator;

impl BackingAllocator for NullAllocator {
    fn allocate(&self, size: u32, align: u32) -> Option<u64> {
        trace!("NullAllocator::allocate({size:#x}, {align:#x}) - no storage");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_allocator() {
        assert_eq!(NullAllocator.allocate(0x1000, 0x1000), None);
    }
}
