// SPDX-License-Identifier: Apache-2.0 or BSD-3-Clause

//! Process identity to handle table mapping.

use std::{
    collections::HashMap,
    fmt::{self, Display},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use log::debug;

use crate::table::HandleTable;

/// Opaque key of the guest process issuing ioctls.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u64);

impl Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

pub type SharedTable = Arc<Mutex<HandleTable>>;

/// Locks a table, recovering it if a previous holder panicked.
///
/// Handlers only panic before touching the table, so a poisoned table is
/// still consistent.
pub(crate) fn lock_table(table: &Mutex<HandleTable>) -> MutexGuard<'_, HandleTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mapping of guest processes to their handle tables.
///
/// The outer lock is only held to look up or insert an entry, the returned
/// table carries its own lock. Handlers working on different processes
/// therefore never wait on each other.
pub struct ProcessRegistry {
    page_size: u32,
    tables: RwLock<HashMap<ProcessId, SharedTable>>,
}

impl ProcessRegistry {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the table of `process`, if one was created.
    pub fn table(&self, process: ProcessId) -> Option<SharedTable> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&process)
            .cloned()
    }

    /// Returns the table of `process`, creating it with the sentinel in
    /// place on first use.
    pub fn get_or_create_table(&self, process: ProcessId) -> SharedTable {
        if let Some(table) = self.table(process) {
            return table;
        }

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables
            .entry(process)
            .or_insert_with(|| {
                debug!("Creating handle table for {process}");
                Arc::new(Mutex::new(HandleTable::new(self.page_size)))
            })
            .clone()
    }

    /// Discards the table of `process` and every handle in it.
    ///
    /// Returns whether a table existed.
    pub fn drop_table(&self, process: ProcessId) -> bool {
        let removed = self
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&process);

        if let Some(table) = &removed {
            debug!(
                "Dropped handle table for {process} with {} live handles",
                lock_table(table).len()
            );
        }

        removed.is_some()
    }

    /// Number of processes with a table.
    pub fn len(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
