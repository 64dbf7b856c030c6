//! Undo-journal transactions for the in-memory backend.
//!
//! Writes go straight to the live maps. While a transaction is open every
//! write first records the previous state of the touched key, and rollback
//! replays those records in reverse.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use foldergate_core::Folder;
use time::OffsetDateTime;

use crate::storage::StorageKey;

/// A folder moved to the trash by a delete.
#[derive(Debug, Clone)]
pub struct TrashEntry {
    pub folder: Folder,
    pub deleted_at: OffsetDateTime,
}

/// Previous state of one key in both maps.
#[derive(Debug, Clone)]
pub(crate) struct UndoEntry {
    pub key: StorageKey,
    pub live: Option<Folder>,
    pub trashed: Option<TrashEntry>,
}

/// Journal attached to [`foldergate_storage::StorageParameters`] while a
/// transaction is open.
#[derive(Debug)]
pub(crate) struct Journal {
    modify: AtomicBool,
    entries: Mutex<Vec<UndoEntry>>,
}

impl Journal {
    pub fn new(modify: bool) -> Self {
        Self {
            modify: AtomicBool::new(modify),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn is_modify(&self) -> bool {
        self.modify.load(Ordering::Acquire)
    }

    /// A read transaction joined by a writer becomes a write transaction.
    pub fn upgrade(&self) {
        self.modify.store(true, Ordering::Release);
    }

    pub fn record(&self, entries: Vec<UndoEntry>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(entries);
    }

    pub fn drain(&self) -> Vec<UndoEntry> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Counters exposed for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStorageStats {
    pub folders_loaded: u64,
    pub writes: u64,
    pub transactions_started: u64,
    pub transactions_committed: u64,
    pub transactions_rolled_back: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub folders_loaded: AtomicU64,
    pub writes: AtomicU64,
    pub started: AtomicU64,
    pub committed: AtomicU64,
    pub rolled_back: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MemoryStorageStats {
        MemoryStorageStats {
            folders_loaded: self.folders_loaded.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            transactions_started: self.started.load(Ordering::Relaxed),
            transactions_committed: self.committed.load(Ordering::Relaxed),
            transactions_rolled_back: self.rolled_back.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.folders_loaded,
            &self.writes,
            &self.started,
            &self.committed,
            &self.rolled_back,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
