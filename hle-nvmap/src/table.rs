// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! Per-process id to handle mapping.

use std::collections::BTreeSet;

use thiserror::Error as ThisError;

use crate::handle::MemoryHandle;

/// Id permanently bound to the sentinel handle.
pub const SENTINEL_ID: u32 = 0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TableError {
    #[error("No handle with id {0}")]
    NotFound(u32),
    #[error("The sentinel handle cannot be removed")]
    Sentinel,
}

/// Dense slot table of memory handles.
///
/// Slot `n` holds the handle with id `n`. Freed slots go to `free` and the
/// lowest one is handed out by the next [`HandleTable::insert`], so ids stay
/// stable while a row lives and small once it is gone.
#[derive(Debug)]
pub struct HandleTable {
    slots: Vec<Option<MemoryHandle>>,
    free: BTreeSet<u32>,
}

impl HandleTable {
    /// Creates a table holding only the sentinel.
    pub fn new(page_size: u32) -> Self {
        let mut sentinel = MemoryHandle::sentinel(page_size);
        sentinel.set_id(SENTINEL_ID);

        Self {
            slots: vec![Some(sentinel)],
            free: BTreeSet::new(),
        }
    }

    /// Stores `handle` under the lowest unused id and returns that id.
    pub fn insert(&mut self, mut handle: MemoryHandle) -> u32 {
        let id = match self.free.pop_first() {
            Some(id) => id,
            None => {
                self.slots.push(None);
                (self.slots.len() - 1) as u32
            }
        };

        handle.set_id(id);
        self.slots[id as usize] = Some(handle);
        id
    }

    pub fn get(&self, id: u32) -> Option<&MemoryHandle> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    /// Like [`HandleTable::get`], without the sentinel.
    pub fn get_live(&self, id: u32) -> Option<&MemoryHandle> {
        if id == SENTINEL_ID {
            return None;
        }

        self.get(id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut MemoryHandle> {
        if id == SENTINEL_ID {
            return None;
        }

        self.slots.get_mut(id as usize).and_then(Option::as_mut)
    }

    /// Takes the handle with `id` out of the table and recycles its id.
    pub fn remove(&mut self, id: u32) -> Result<MemoryHandle, TableError> {
        if id == SENTINEL_ID {
            return Err(TableError::Sentinel);
        }

        let handle = self
            .slots
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or(TableError::NotFound(id))?;

        self.free.insert(id);
        Ok(handle)
    }

    /// Number of live handles, the sentinel excluded.
    pub fn len(&self) -> usize {
        self.slots.len() - 1 - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
