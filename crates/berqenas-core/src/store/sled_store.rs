//! sled-backed state store.

use super::{HistoryQuery, StateStore};
use crate::error::Error;
use crate::migration::{AttemptEntry, ExecutionRecord, MigrationDefinition, MigrationError};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};

/// Tree name for migration definitions.
const DEFINITIONS_TREE: &str = "migrations:definitions";

/// Tree name for execution records.
const RECORDS_TREE: &str = "migrations:records";

/// Tree name for the attempt ledger.
const ATTEMPTS_TREE: &str = "migrations:attempts";

/// Separates the migration id from the ordering suffix in ledger keys.
const KEY_SEPARATOR: u8 = 0x00;

type TxResult<T> = Result<T, ConflictableTransactionError<MigrationError>>;

/// State store persisting to sled trees.
#[derive(Clone)]
pub struct SledStateStore {
    db: Db,
    definitions: Tree,
    records: Tree,
    attempts: Tree,
}

impl SledStateStore {
    /// Open the store's trees in an existing database.
    pub fn open(db: &Db) -> Result<Self, MigrationError> {
        Ok(Self {
            db: db.clone(),
            definitions: db.open_tree(DEFINITIONS_TREE).map_err(Error::from)?,
            records: db.open_tree(RECORDS_TREE).map_err(Error::from)?,
            attempts: db.open_tree(ATTEMPTS_TREE).map_err(Error::from)?,
        })
    }

    /// Open a throwaway store, deleted on drop.
    pub fn temporary() -> Result<Self, MigrationError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(Error::from)?;
        Self::open(&db)
    }

    /// Whether the underlying database was recovered after an unclean shutdown.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Number of ledger entries.
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Ledger key: `id ‖ 0x00 ‖ started_at ‖ seq`, big-endian so a prefix
    /// scan on one migration returns its attempts in start order.
    fn attempt_key(entry: &AttemptEntry, seq: u64) -> Vec<u8> {
        let mut key = Self::attempt_prefix(&entry.migration_id);
        key.extend_from_slice(&entry.attempt.started_at.to_be_bytes());
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn attempt_prefix(migration_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(migration_id.len() + 17);
        key.extend_from_slice(migration_id.as_bytes());
        key.push(KEY_SEPARATOR);
        key
    }

    /// Compare-and-swap check inside a transaction.
    fn check_current(records: &TransactionalTree, expected: &ExecutionRecord) -> TxResult<()> {
        let stored = match records.get(expected.migration_id.as_bytes())? {
            Some(bytes) => {
                ExecutionRecord::from_bytes(&bytes).map_err(ConflictableTransactionError::Abort)?
            }
            None => {
                return Err(ConflictableTransactionError::Abort(
                    MigrationError::not_found(&expected.migration_id),
                ))
            }
        };
        if stored.status != expected.status || stored.revision != expected.revision {
            return Err(ConflictableTransactionError::Abort(
                MigrationError::StateConflict {
                    migration_id: expected.migration_id.clone(),
                },
            ));
        }
        Ok(())
    }

    fn finish_tx<T>(result: Result<T, TransactionError<MigrationError>>) -> Result<T, MigrationError> {
        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(Error::Storage(e).into()),
        }
    }

    fn scan<T>(
        tree: &Tree,
        decode: impl Fn(&[u8]) -> Result<T, MigrationError>,
        keep: impl Fn(&T) -> bool,
    ) -> Result<Vec<T>, MigrationError> {
        let mut out = Vec::new();
        for result in tree.iter() {
            let (_, bytes) = result.map_err(Error::from)?;
            let item = decode(&bytes)?;
            if keep(&item) {
                out.push(item);
            }
        }
        Ok(out)
    }
}

impl StateStore for SledStateStore {
    fn insert(
        &self,
        definition: &MigrationDefinition,
        record: &ExecutionRecord,
    ) -> Result<bool, MigrationError> {
        let key = definition.id.as_bytes();
        let def_bytes = definition.to_bytes()?;
        let record_bytes = record.to_bytes()?;

        let result: Result<bool, TransactionError<MigrationError>> =
            (&self.definitions, &self.records).transaction(|(defs_tx, records_tx)| {
                if records_tx.get(key)?.is_some() {
                    return Ok(false);
                }
                defs_tx.insert(key, def_bytes.as_slice())?;
                records_tx.insert(key, record_bytes.as_slice())?;
                Ok(true)
            });
        Self::finish_tx(result)
    }

    fn replace_definition(
        &self,
        definition: &MigrationDefinition,
        expected: &ExecutionRecord,
        next: &ExecutionRecord,
    ) -> Result<(), MigrationError> {
        let key = definition.id.as_bytes();
        let def_bytes = definition.to_bytes()?;
        let record_bytes = next.to_bytes()?;

        let result: Result<(), TransactionError<MigrationError>> =
            (&self.definitions, &self.records).transaction(|(defs_tx, records_tx)| {
                Self::check_current(records_tx, expected)?;
                defs_tx.insert(key, def_bytes.as_slice())?;
                records_tx.insert(key, record_bytes.as_slice())?;
                Ok(())
            });
        Self::finish_tx(result)
    }

    fn definition(&self, id: &str) -> Result<Option<MigrationDefinition>, MigrationError> {
        match self.definitions.get(id.as_bytes()).map_err(Error::from)? {
            Some(bytes) => Ok(Some(MigrationDefinition::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn definitions(
        &self,
        database: Option<&str>,
    ) -> Result<Vec<MigrationDefinition>, MigrationError> {
        Self::scan(&self.definitions, MigrationDefinition::from_bytes, |def| {
            database.map_or(true, |db| def.target_database == db)
        })
    }

    fn record(&self, id: &str) -> Result<Option<ExecutionRecord>, MigrationError> {
        match self.records.get(id.as_bytes()).map_err(Error::from)? {
            Some(bytes) => Ok(Some(ExecutionRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn records(&self, database: Option<&str>) -> Result<Vec<ExecutionRecord>, MigrationError> {
        Self::scan(&self.records, ExecutionRecord::from_bytes, |record| {
            database.map_or(true, |db| record.target_database == db)
        })
    }

    fn compare_and_swap(
        &self,
        expected: &ExecutionRecord,
        next: &ExecutionRecord,
        closed: Option<&AttemptEntry>,
    ) -> Result<(), MigrationError> {
        let key = expected.migration_id.as_bytes();
        let record_bytes = next.to_bytes()?;
        let ledger = match closed {
            Some(entry) => {
                let seq = self.db.generate_id().map_err(Error::from)?;
                Some((Self::attempt_key(entry, seq), entry.to_bytes()?))
            }
            None => None,
        };

        let result: Result<(), TransactionError<MigrationError>> =
            (&self.records, &self.attempts).transaction(|(records_tx, attempts_tx)| {
                Self::check_current(records_tx, expected)?;
                records_tx.insert(key, record_bytes.as_slice())?;
                if let Some((ledger_key, ledger_bytes)) = &ledger {
                    attempts_tx.insert(ledger_key.as_slice(), ledger_bytes.as_slice())?;
                }
                Ok(())
            });
        Self::finish_tx(result)?;

        tracing::debug!(
            migration_id = %expected.migration_id,
            from = %expected.status,
            to = %next.status,
            revision = next.revision,
            "execution record updated"
        );
        Ok(())
    }

    fn history(&self, query: &HistoryQuery) -> Result<Vec<AttemptEntry>, MigrationError> {
        let iter = match &query.migration_id {
            Some(id) => self.attempts.scan_prefix(Self::attempt_prefix(id)),
            None => self.attempts.iter(),
        };

        let mut entries = Vec::new();
        for result in iter {
            let (_, bytes) = result.map_err(Error::from)?;
            let entry = AttemptEntry::from_bytes(&bytes)?;
            if query.matches(&entry) {
                entries.push(entry);
            }
        }
        Ok(query.finish(entries))
    }

    fn flush(&self) -> Result<(), MigrationError> {
        self.db.flush().map_err(Error::from)?;
        Ok(())
    }
}
