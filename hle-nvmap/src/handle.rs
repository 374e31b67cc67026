// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! The memory handle entity tracked by each process's handle table.

/// Page size of the emulated GPU address space.
pub const PAGE_SIZE: u32 = 0x1000;

/// Rounds `value` up to the next multiple of `align`, which must be a power
/// of two. Returns `None` when the result does not fit in 32 bits.
pub const fn align_up(value: u32, align: u32) -> Option<u32> {
    let mask = align - 1;
    match value.checked_add(mask) {
        Some(v) => Some(v & !mask),
        None => None,
    }
}

/// Power-of-two test as the driver performs it.
///
/// Zero passes (`0 & (0 - 1) == 0`), guest code relies on zero being accepted
/// and later raised to the page size.
pub const fn is_driver_pow2(value: u32) -> bool {
    value & value.wrapping_sub(1) == 0
}

/// State of one GPU-visible memory region.
///
/// A handle starts unallocated with a single reference. Alloc moves it to
/// the allocated state exactly once; Free drops references until the table
/// row is removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryHandle {
    id: u32,
    size: u32,
    align: u32,
    address: u64,
    kind: u8,
    allocated: bool,
    refcount: i32,
}

impl MemoryHandle {
    /// Creates an unallocated handle of `size` bytes.
    ///
    /// `size` must already be rounded to `page_size`.
    pub fn new(size: u32, page_size: u32) -> Self {
        Self {
            id: 0,
            size,
            align: page_size,
            address: 0,
            kind: 0,
            allocated: false,
            refcount: 1,
        }
    }

    /// The placeholder bound to id 0 in every table.
    pub(crate) fn sentinel(page_size: u32) -> Self {
        Self::new(0, page_size)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn align(&self) -> u32 {
        self.align
    }

    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub fn refcount(&self) -> i32 {
        self.refcount
    }

    /// Adds a logical reference and returns the new count. The count sticks
    /// at `i32::MAX`, pinning the handle.
    pub(crate) fn increment_ref(&mut self) -> i32 {
        self.refcount = self.refcount.saturating_add(1);
        self.refcount
    }

    /// Drops a logical reference and returns the new count.
    pub(crate) fn decrement_ref(&mut self) -> i32 {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount
    }

    /// Binds backing storage to the handle.
    ///
    /// Only the first call has an effect, an allocated handle keeps its
    /// fields for the rest of its life.
    pub(crate) fn commit_allocation(&mut self, size: u32, address: u64, align: u32, kind: u8) {
        if self.allocated {
            return;
        }

        self.size = size;
        self.address = address;
        self.align = align;
        self.kind = kind;
        self.allocated = true;
    }
}
