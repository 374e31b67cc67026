// nvmap GPU memory-handle service
//
// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! High-level emulation of the nvmap ioctl interface.
//!
//! Guest code creates opaque handles for GPU-visible memory regions, binds
//! backing storage to them, queries them and releases them through six
//! ioctls. Every guest process gets its own [`HandleTable`], held by the
//! [`ProcessRegistry`] of an [`NvMapService`]. The service is owned by the
//! emulated device and lives from the first process start to the last
//! process teardown.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

pub mod allocator;
pub mod config;
pub mod handle;
pub mod ioctl;
pub mod protocol;
pub mod registry;
pub mod result;
pub mod table;
#[cfg(test)]
pub(crate) mod testutils;

pub use allocator::{BackingAllocator, NullAllocator};
pub use config::{ConfigError, NvMapConfig};
pub use handle::{MemoryHandle, PAGE_SIZE};
pub use ioctl::{Error, HandlerResult, IoctlBuffers, NvMapService};
pub use registry::{ProcessId, ProcessRegistry};
pub use result::NvResult;
pub use table::{HandleTable, TableError, SENTINEL_ID};
