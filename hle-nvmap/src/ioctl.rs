// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! The nvmap ioctl interface.
//!
//! [`NvMapService::ioctl`] is the entry point used by the device
//! demultiplexer: it decodes the command word, reads the request record from
//! the guest's input buffer, runs the handler against the calling process's
//! handle table and writes the response record to the output buffer. The
//! response is only written when the handler succeeds.
//!
//! The handlers are also public and work on records directly, which is how
//! other emulated subsystems and the tests drive them without guest memory.

use log::{debug, error, info, warn};
use thiserror::Error as ThisError;
use vm_memory::{ByteValued, Bytes, GuestAddress, GuestMemoryError};

use crate::{
    allocator::{BackingAllocator, NullAllocator},
    config::NvMapConfig,
    handle::{align_up, is_driver_pow2, MemoryHandle},
    protocol::{
        FreeFlags, NvMapAlloc, NvMapCommand, NvMapCreate, NvMapFree, NvMapFromId, NvMapGetId,
        NvMapParam, ParamKind,
    },
    registry::{lock_table, ProcessId, ProcessRegistry, SharedTable},
    result::NvResult,
    table::{HandleTable, SENTINEL_ID},
};

/// Outcome of a handler: the response record, or the code to return instead.
pub type HandlerResult<T> = std::result::Result<T, NvResult>;

#[derive(Debug, ThisError)]
/// Errors related to guest memory access while serving an ioctl
pub enum Error {
    #[error("Failed to read ioctl request at {0:#x}: {1}")]
    RequestReadFailed(u64, GuestMemoryError),
    #[error("Failed to write ioctl response at {0:#x}: {1}")]
    ResponseWriteFailed(u64, GuestMemoryError),
}

/// Guest positions of the request and response records of one ioctl.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IoctlBuffers {
    pub input: GuestAddress,
    pub output: GuestAddress,
}

impl IoctlBuffers {
    pub const fn new(input: GuestAddress, output: GuestAddress) -> Self {
        Self { input, output }
    }
}

fn invalid_handle(id: u32) -> NvResult {
    warn!("Invalid handle {id:#010x}");
    NvResult::InvalidInput
}

/// Finds a handle a guest is allowed to name. The sentinel is never one.
fn lookup(table: &HandleTable, id: u32) -> HandlerResult<&MemoryHandle> {
    table.get_live(id).ok_or_else(|| invalid_handle(id))
}

fn lookup_mut(table: &mut HandleTable, id: u32) -> HandlerResult<&mut MemoryHandle> {
    table.get_mut(id).ok_or_else(|| invalid_handle(id))
}

/// The memory-handle service shared by all guest processes of a device.
pub struct NvMapService {
    config: NvMapConfig,
    registry: ProcessRegistry,
    allocator: Box<dyn BackingAllocator>,
}

impl NvMapService {
    /// Creates a service without a backing allocator, Alloc with a zero
    /// address then always reports `OutOfMemory`.
    pub fn new(config: NvMapConfig) -> Self {
        Self::with_allocator(config, Box::new(NullAllocator))
    }

    pub fn with_allocator(config: NvMapConfig, allocator: Box<dyn BackingAllocator>) -> Self {
        Self {
            config,
            registry: ProcessRegistry::new(config.page_size()),
            allocator,
        }
    }

    pub fn config(&self) -> &NvMapConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Prepares the handle table of a starting process.
    pub fn initialize_process(&self, process: ProcessId) {
        debug!("Initializing nvmap for {process}");
        self.registry.get_or_create_table(process);
    }

    /// Discards every handle of an exiting process.
    pub fn unload_process(&self, process: ProcessId) -> bool {
        debug!("Unloading nvmap for {process}");
        self.registry.drop_table(process)
    }

    /// Returns the current state of handle `id` of `process`.
    ///
    /// Used by the subsystems that turn guest handles into addresses. Like
    /// the ioctls, it never resolves the sentinel.
    pub fn resolve(&self, process: ProcessId, id: u32) -> Option<MemoryHandle> {
        if id == SENTINEL_ID {
            return None;
        }

        self.resolve_with_fb(process, id)
    }

    /// Same as [`NvMapService::resolve`], except that id 0 resolves to the
    /// sentinel. The display path hands out id 0 for framebuffers.
    pub fn resolve_with_fb(&self, process: ProcessId, id: u32) -> Option<MemoryHandle> {
        let shared = self.registry.table(process)?;
        let table = lock_table(&shared);
        table.get(id).cloned()
    }

    /// Serves one nvmap ioctl issued by `process`.
    pub fn ioctl<M>(
        &self,
        process: ProcessId,
        memory: &M,
        buffers: IoctlBuffers,
        cmd: u32,
    ) -> NvResult
    where
        M: Bytes<GuestAddress, E = GuestMemoryError> + ?Sized,
    {
        let command = match NvMapCommand::try_from(cmd) {
            Ok(command) => command,
            Err(e) => {
                warn!("{e}!");
                return NvResult::NotSupported;
            }
        };

        debug!("{process}: nvmap {command:?} (cmd {cmd:#010x}), buffers {buffers:?}");

        let result = match command {
            NvMapCommand::Create => {
                Self::marshal(memory, buffers, |args| self.create(process, args))
            }
            NvMapCommand::FromId => {
                Self::marshal(memory, buffers, |args| self.from_id(process, args))
            }
            NvMapCommand::Alloc => Self::marshal(memory, buffers, |args| self.alloc(process, args)),
            NvMapCommand::Free => Self::marshal(memory, buffers, |args| self.free(process, args)),
            NvMapCommand::Param => Self::marshal(memory, buffers, |args| self.param(process, args)),
            NvMapCommand::GetId => {
                Self::marshal(memory, buffers, |args| self.get_id(process, args))
            }
        };

        result.unwrap_or_else(|e| {
            error!("{process}: nvmap {command:?}: {e}");
            NvResult::InvalidInput
        })
    }

    /// Reads the request record, runs `handler` and writes its response.
    fn marshal<M, T, F>(memory: &M, buffers: IoctlBuffers, handler: F) -> Result<NvResult, Error>
    where
        M: Bytes<GuestAddress, E = GuestMemoryError> + ?Sized,
        T: ByteValued,
        F: FnOnce(T) -> HandlerResult<T>,
    {
        let args: T = memory
            .read_obj(buffers.input)
            .map_err(|e| Error::RequestReadFailed(buffers.input.0, e))?;

        match handler(args) {
            Ok(response) => {
                memory
                    .write_obj(response, buffers.output)
                    .map_err(|e| Error::ResponseWriteFailed(buffers.output.0, e))?;
                Ok(NvResult::Success)
            }
            Err(result) => Ok(result),
        }
    }

    fn process_table(&self, process: ProcessId) -> HandlerResult<SharedTable> {
        self.registry.table(process).ok_or_else(|| {
            warn!("{process} has no nvmap handles");
            NvResult::InvalidInput
        })
    }

    /// Creates an unallocated handle of the requested size.
    pub fn create(&self, process: ProcessId, args: NvMapCreate) -> HandlerResult<NvMapCreate> {
        let requested = u32::from(args.size);
        if requested == 0 {
            warn!("Invalid size {requested:#010x}");
            return Err(NvResult::InvalidInput);
        }

        let page_size = self.config.page_size();
        let size = align_up(requested, page_size).ok_or_else(|| {
            warn!("Size {requested:#010x} overflows once page aligned");
            NvResult::InvalidInput
        })?;

        let shared = self.registry.get_or_create_table(process);
        let id = lock_table(&shared).insert(MemoryHandle::new(size, page_size));

        info!("{process}: created map {id} with size {size:#010x}");

        Ok(NvMapCreate {
            handle: id.into(),
            ..args
        })
    }

    /// Hands out one more reference to an existing handle.
    pub fn from_id(&self, process: ProcessId, args: NvMapFromId) -> HandlerResult<NvMapFromId> {
        let shared = self.process_table(process)?;
        let mut table = lock_table(&shared);

        lookup_mut(&mut table, args.id.into())?.increment_ref();

        Ok(NvMapFromId {
            handle: args.id,
            ..args
        })
    }

    /// Binds backing storage to a handle, once.
    pub fn alloc(&self, process: ProcessId, args: NvMapAlloc) -> HandlerResult<NvMapAlloc> {
        let page_size = self.config.page_size();
        let shared = self.process_table(process)?;
        let mut table = lock_table(&shared);
        let handle = lookup_mut(&mut table, args.handle.into())?;

        let align = u32::from(args.align);
        if !is_driver_pow2(align) {
            warn!("Invalid alignment {align:#010x}");
            return Err(NvResult::InvalidInput);
        }
        let align = align.max(page_size);

        if handle.is_allocated() {
            debug!("{process}: map {} already allocated", handle.id());
            return Ok(NvMapAlloc {
                align: handle.align().into(),
                kind: handle.kind(),
                address: handle.address().into(),
                ..args
            });
        }

        let size = align_up(handle.size(), page_size).ok_or(NvResult::InvalidInput)?;

        let address = match u64::from(args.address) {
            0 => self.allocator.allocate(size, align).ok_or_else(|| {
                warn!(
                    "{process}: no backing storage for map {} of size {size:#010x}",
                    handle.id()
                );
                NvResult::OutOfMemory
            })?,
            address => address,
        };

        handle.commit_allocation(size, address, align, args.kind);

        Ok(NvMapAlloc {
            align: align.into(),
            address: address.into(),
            ..args
        })
    }

    /// Drops one reference, removing the handle with the last one.
    pub fn free(&self, process: ProcessId, args: NvMapFree) -> HandlerResult<NvMapFree> {
        let id = u32::from(args.handle);
        let shared = self.process_table(process)?;
        let mut table = lock_table(&shared);

        let handle = lookup_mut(&mut table, id)?;
        let refcount = handle.decrement_ref();
        let size = handle.size();

        if refcount > 0 {
            return Ok(NvMapFree {
                address: 0u64.into(),
                size: size.into(),
                flags: FreeFlags::NOT_FREED_YET.bits().into(),
                ..args
            });
        }

        let removed = table.remove(id).map_err(|e| {
            error!("{process}: {e}");
            NvResult::InvalidInput
        })?;

        info!("{process}: deleted map {id}");

        Ok(NvMapFree {
            address: removed.address().into(),
            size: removed.size().into(),
            flags: FreeFlags::empty().bits().into(),
            ..args
        })
    }

    /// Answers a property query about a handle.
    pub fn param(&self, process: ProcessId, args: NvMapParam) -> HandlerResult<NvMapParam> {
        let shared = self.process_table(process)?;
        let table = lock_table(&shared);
        let handle = lookup(&table, args.handle.into())?;

        let result = match ParamKind::try_from(u32::from(args.param)) {
            Ok(ParamKind::Size) => handle.size(),
            Ok(ParamKind::Align) => handle.align(),
            Ok(ParamKind::Heap) => self.config.heap_base(),
            Ok(ParamKind::Kind) => u32::from(handle.kind()),
            Ok(ParamKind::Compr) => 0,
            // The driver has no answer for the base address either.
            Ok(ParamKind::Base) | Err(_) => {
                warn!("Unsupported param {:#x}", u32::from(args.param));
                return Err(NvResult::InvalidInput);
            }
        };

        Ok(NvMapParam {
            result: result.into(),
            ..args
        })
    }

    /// Echoes the id of an existing handle.
    pub fn get_id(&self, process: ProcessId, args: NvMapGetId) -> HandlerResult<NvMapGetId> {
        let shared = self.process_table(process)?;
        let table = lock_table(&shared);
        lookup(&table, args.handle.into())?;

        Ok(NvMapGetId {
            id: args.handle,
            ..args
        })
    }
}
