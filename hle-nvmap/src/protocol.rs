// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! nvmap ioctl numbers and the records exchanged with the guest.
//!
//! Guest binaries read and write these records directly, so every layout
//! below is fixed: `#[repr(C)]`, little-endian, no implicit padding.

use std::fmt::{self, Display};

use bitflags::bitflags;
use vm_memory::{ByteValued, Le32, Le64};

pub const NVMAP_IOC_CREATE: u16 = 0x0101;
pub const NVMAP_IOC_FROM_ID: u16 = 0x0103;
pub const NVMAP_IOC_ALLOC: u16 = 0x0104;
pub const NVMAP_IOC_FREE: u16 = 0x0105;
pub const NVMAP_IOC_PARAM: u16 = 0x0109;
pub const NVMAP_IOC_GET_ID: u16 = 0x010e;

/// Value answered for [`ParamKind::Heap`].
pub const NVMAP_HEAP_BASE: u32 = 0x4000_0000;

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidCommand(pub u32);

impl Display for InvalidCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsupported ioctl command {:#010x}", self.0)
    }
}

impl std::error::Error for InvalidCommand {}

/// The ioctls the handle service answers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NvMapCommand {
    Create,
    FromId,
    Alloc,
    Free,
    Param,
    GetId,
}

impl NvMapCommand {
    pub const fn opcode(self) -> u16 {
        match self {
            Self::Create => NVMAP_IOC_CREATE,
            Self::FromId => NVMAP_IOC_FROM_ID,
            Self::Alloc => NVMAP_IOC_ALLOC,
            Self::Free => NVMAP_IOC_FREE,
            Self::Param => NVMAP_IOC_PARAM,
            Self::GetId => NVMAP_IOC_GET_ID,
        }
    }
}

impl TryFrom<u32> for NvMapCommand {
    type Error = InvalidCommand;

    /// Decodes a full command word. Only the low 16 bits select the ioctl,
    /// the upper bits (direction and size) are ignored.
    fn try_from(cmd: u32) -> Result<Self, Self::Error> {
        match (cmd & 0xffff) as u16 {
            NVMAP_IOC_CREATE => Ok(Self::Create),
            NVMAP_IOC_FROM_ID => Ok(Self::FromId),
            NVMAP_IOC_ALLOC => Ok(Self::Alloc),
            NVMAP_IOC_FREE => Ok(Self::Free),
            NVMAP_IOC_PARAM => Ok(Self::Param),
            NVMAP_IOC_GET_ID => Ok(Self::GetId),
            _ => Err(InvalidCommand(cmd)),
        }
    }
}

/// Properties a guest can query with the Param ioctl.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ParamKind {
    Size = 1,
    Align = 2,
    Base = 3,
    Heap = 4,
    Kind = 5,
    Compr = 6,
}

impl TryFrom<u32> for ParamKind {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Size),
            2 => Ok(Self::Align),
            3 => Ok(Self::Base),
            4 => Ok(Self::Heap),
            5 => Ok(Self::Kind),
            6 => Ok(Self::Compr),
            other => Err(other),
        }
    }
}

bitflags! {
    /// Flags reported by the Free ioctl.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FreeFlags: u32 {
        /// Other references keep the handle alive.
        const NOT_FREED_YET = 1;
    }
}

// NVMAP_IOC_CREATE
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct NvMapCreate {
    /// in
    pub size: Le32,
    /// out
    pub handle: Le32,
}

// SAFETY: The layout of the structure is fixed and can be initialized by
// reading its content from byte array.
unsafe impl ByteValued for NvMapCreate {}

// NVMAP_IOC_FROM_ID
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct NvMapFromId {
    /// in
    pub id: Le32,
    /// out
    pub handle: Le32,
}

// SAFETY: The layout of the structure is fixed and can be initialized by
// reading its content from byte array.
unsafe impl ByteValued for NvMapFromId {}

// NVMAP_IOC_ALLOC
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct NvMapAlloc {
    pub handle: Le32,
    pub heap_mask: Le32,
    pub flags: Le32,
    pub align: Le32,
    pub kind: u8,
    pub padding: [u8; 7],
    pub address: Le64,
}

// SAFETY: The layout of the structure is fixed and can be initialized by
// reading its content from byte array.
unsafe impl ByteValued for NvMapAlloc {}

// NVMAP_IOC_FREE
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct NvMapFree {
    /// in
    pub handle: Le32,
    pub padding: Le32,
    /// out
    pub address: Le64,
    /// out
    pub size: Le32,
    /// out, see [`FreeFlags`]
    pub flags: Le32,
}

// SAFETY: The layout of the structure is fixed and can be initialized by
// reading its content from byte array.
unsafe impl ByteValued for NvMapFree {}

// NVMAP_IOC_PARAM
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct NvMapParam {
    /// in
    pub handle: Le32,
    /// in, see [`ParamKind`]
    pub param: Le32,
    /// out
    pub result: Le32,
}

// SAFETY: The layout of the structure is fixed and can be initialized by
// reading its content from byte array.
unsafe impl ByteValued for NvMapParam {}

// NVMAP_IOC_GET_ID
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct NvMapGetId {
    /// out
    pub id: Le32,
    /// in
    pub handle: Le32,
}

// SAFETY: The layout of the structure is fixed and can be initialized by
// reading its content from byte array.
unsafe impl ByteValued for NvMapGetId {}
