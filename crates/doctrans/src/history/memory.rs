use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{HistoryEntry, HistoryPatch, HistoryStore};
use crate::db::DatabaseError;

/// Process-local history. Lost on exit; used for tests and the `memory`
/// backend.
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: RwLock<HashMap<String, HistoryEntry>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, HistoryEntry>> {
        match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("History lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, HistoryEntry>> {
        match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("History lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn list(&self) -> Result<Vec<HistoryEntry>, DatabaseError> {
        let mut entries: Vec<HistoryEntry> = self.read().values().cloned().collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    fn get(&self, id: &str) -> Result<Option<HistoryEntry>, DatabaseError> {
        Ok(self.read().get(id).cloned())
    }

    fn append(&self, entry: HistoryEntry) -> Result<(), DatabaseError> {
        let mut entries = self.write();
        if entries.contains_key(&entry.id) {
            return Err(DatabaseError::Duplicate { id: entry.id });
        }
        entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    fn upsert(&self, id: &str, patch: &HistoryPatch) -> Result<bool, DatabaseError> {
        match self.write().get_mut(id) {
            Some(entry) => {
                entry.apply(patch);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remove(&self, id: &str) -> Result<bool, DatabaseError> {
        Ok(self.write().remove(id).is_some())
    }
}
