// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

use thiserror::Error as ThisError;

use crate::{handle::PAGE_SIZE, protocol::NVMAP_HEAP_BASE};

#[derive(Debug, PartialEq, Eq, ThisError)]
pub enum ConfigError {
    #[error("Page size must be a non-zero power of two, got {0:#x}")]
    InvalidPageSize(u32),
}

/// Parameters of the handle service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NvMapConfig {
    page_size: u32,
    heap_base: u32,
}

impl NvMapConfig {
    pub fn new(page_size: u32, heap_base: u32) -> Result<Self, ConfigError> {
        if !page_size.is_power_of_two() {
            return Err(ConfigError::InvalidPageSize(page_size));
        }

        Ok(Self { page_size, heap_base })
    }

    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Value reported for the heap parameter.
    pub const fn heap_base(&self) -> u32 {
        self.heap_base
    }
}

impl Default for NvMapConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            heap_base: NVMAP_HEAP_BASE,
        }
    }
}
