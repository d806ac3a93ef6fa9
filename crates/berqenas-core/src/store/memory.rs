//! In-memory state store for tests and embedding.

use super::{HistoryQuery, StateStore};
use crate::migration::{AttemptEntry, ExecutionRecord, MigrationDefinition, MigrationError};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Default)]
struct Inner {
    definitions: BTreeMap<String, MigrationDefinition>,
    records: BTreeMap<String, ExecutionRecord>,
    attempts: Vec<AttemptEntry>,
}

impl Inner {
    fn check_current(&self, expected: &ExecutionRecord) -> Result<(), MigrationError> {
        let stored = self
            .records
            .get(&expected.migration_id)
            .ok_or_else(|| MigrationError::not_found(&expected.migration_id))?;
        if stored.status != expected.status || stored.revision != expected.revision {
            return Err(MigrationError::StateConflict {
                migration_id: expected.migration_id.clone(),
            });
        }
        Ok(())
    }
}

/// State store held entirely in memory.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: RwLock<Inner>,
}

impl MemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn insert(
        &self,
        definition: &MigrationDefinition,
        record: &ExecutionRecord,
    ) -> Result<bool, MigrationError> {
        let mut inner = self.inner.write();
        if inner.records.contains_key(&definition.id) {
            return Ok(false);
        }
        inner
            .definitions
            .insert(definition.id.clone(), definition.clone());
        inner.records.insert(definition.id.clone(), record.clone());
        Ok(true)
    }

    fn replace_definition(
        &self,
        definition: &MigrationDefinition,
        expected: &ExecutionRecord,
        next: &ExecutionRecord,
    ) -> Result<(), MigrationError> {
        let mut inner = self.inner.write();
        inner.check_current(expected)?;
        inner
            .definitions
            .insert(definition.id.clone(), definition.clone());
        inner.records.insert(next.migration_id.clone(), next.clone());
        Ok(())
    }

    fn definition(&self, id: &str) -> Result<Option<MigrationDefinition>, MigrationError> {
        Ok(self.inner.read().definitions.get(id).cloned())
    }

    fn definitions(
        &self,
        database: Option<&str>,
    ) -> Result<Vec<MigrationDefinition>, MigrationError> {
        Ok(self
            .inner
            .read()
            .definitions
            .values()
            .filter(|def| database.map_or(true, |db| def.target_database == db))
            .cloned()
            .collect())
    }

    fn record(&self, id: &str) -> Result<Option<ExecutionRecord>, MigrationError> {
        Ok(self.inner.read().records.get(id).cloned())
    }

    fn records(&self, database: Option<&str>) -> Result<Vec<ExecutionRecord>, MigrationError> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .filter(|record| database.map_or(true, |db| record.target_database == db))
            .cloned()
            .collect())
    }

    fn compare_and_swap(
        &self,
        expected: &ExecutionRecord,
        next: &ExecutionRecord,
        closed: Option<&AttemptEntry>,
    ) -> Result<(), MigrationError> {
        let mut inner = self.inner.write();
        inner.check_current(expected)?;
        inner.records.insert(next.migration_id.clone(), next.clone());
        if let Some(entry) = closed {
            inner.attempts.push(entry.clone());
        }
        Ok(())
    }

    fn history(&self, query: &HistoryQuery) -> Result<Vec<AttemptEntry>, MigrationError> {
        let entries = self
            .inner
            .read()
            .attempts
            .iter()
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect();
        Ok(query.finish(entries))
    }

    fn flush(&self) -> Result<(), MigrationError> {
        Ok(())
    }
}
