// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use vm_memory::{ByteValued, Bytes, GuestAddress, GuestMemoryMmap};

use crate::{
    ioctl::{IoctlBuffers, NvMapService},
    registry::ProcessId,
    result::NvResult,
};

const MEM_SIZE: usize = 0x10000;

pub const TEST_BUFFERS: IoctlBuffers =
    IoctlBuffers::new(GuestAddress(0x1000), GuestAddress(0x2000));

/// Byte written over both ioctl buffers to detect stray writes.
pub const TEST_PATTERN: u8 = 0xa5;

pub fn create_guest_memory() -> GuestMemoryMmap {
    GuestMemoryMmap::<()>::from_ranges(&[(GuestAddress(0), MEM_SIZE)]).unwrap()
}

pub fn stamp_buffers(mem: &GuestMemoryMmap) {
    mem.write_obj([TEST_PATTERN; 32], TEST_BUFFERS.input).unwrap();
    mem.write_obj([TEST_PATTERN; 32], TEST_BUFFERS.output).unwrap();
}

pub fn read_output<T: ByteValued>(mem: &GuestMemoryMmap) -> T {
    mem.read_obj(TEST_BUFFERS.output).unwrap()
}

/// Writes `request` to the input buffer, issues `cmd` and returns the
/// result together with the output buffer.
pub fn run_ioctl<T: ByteValued>(
    service: &NvMapService,
    process: ProcessId,
    mem: &GuestMemoryMmap,
    cmd: u32,
    request: T,
) -> (NvResult, T) {
    mem.write_obj(request, TEST_BUFFERS.input).unwrap();
    let result = service.ioctl(process, mem, TEST_BUFFERS, cmd);
    (result, read_output(mem))
}
