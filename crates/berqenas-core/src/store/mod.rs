//! Durable migration state.
//!
//! The store owns three collections: immutable definitions, one mutable
//! execution record per definition, and an append-only attempt ledger.
//! Every record write is a compare-and-swap on `(status, revision)`; a write
//! that closes an attempt appends it to the ledger atomically with the
//! record change.

mod memory;
mod sled_store;

pub use memory::MemoryStateStore;
pub use sled_store::SledStateStore;

use crate::migration::{
    AttemptEntry, AttemptOutcome, Direction, ExecutionRecord, MigrationDefinition, MigrationError,
};

/// Persistence interface consumed by the registry and the coordinator.
pub trait StateStore: Send + Sync {
    /// Store a new definition with its initial record.
    ///
    /// Returns `false` without writing if the id is already present.
    fn insert(
        &self,
        definition: &MigrationDefinition,
        record: &ExecutionRecord,
    ) -> Result<bool, MigrationError>;

    /// Replace a definition together with its record.
    ///
    /// The record write is a compare-and-swap against `expected`.
    fn replace_definition(
        &self,
        definition: &MigrationDefinition,
        expected: &ExecutionRecord,
        next: &ExecutionRecord,
    ) -> Result<(), MigrationError>;

    /// Look up a definition.
    fn definition(&self, id: &str) -> Result<Option<MigrationDefinition>, MigrationError>;

    /// All definitions, optionally restricted to one database, ordered by id.
    fn definitions(&self, database: Option<&str>)
        -> Result<Vec<MigrationDefinition>, MigrationError>;

    /// Look up a record.
    fn record(&self, id: &str) -> Result<Option<ExecutionRecord>, MigrationError>;

    /// All records, optionally restricted to one database, ordered by id.
    fn records(&self, database: Option<&str>) -> Result<Vec<ExecutionRecord>, MigrationError>;

    /// Replace `expected` with `next` if the stored record still carries
    /// `expected`'s status and revision, appending `closed` to the ledger in
    /// the same write.
    ///
    /// Fails with [`MigrationError::StateConflict`] if the record changed and
    /// [`MigrationError::MigrationNotFound`] if it does not exist.
    fn compare_and_swap(
        &self,
        expected: &ExecutionRecord,
        next: &ExecutionRecord,
        closed: Option<&AttemptEntry>,
    ) -> Result<(), MigrationError>;

    /// Ledger entries matching `query`, oldest first.
    fn history(&self, query: &HistoryQuery) -> Result<Vec<AttemptEntry>, MigrationError>;

    /// Make all writes durable.
    fn flush(&self) -> Result<(), MigrationError>;
}

/// Run `op` until it stops losing compare-and-swap races, at most
/// `max_retries` extra times.
///
/// `op` must re-read the record it swaps on every call.
pub(crate) fn retry_on_conflict<T>(
    max_retries: u32,
    mut op: impl FnMut() -> Result<T, MigrationError>,
) -> Result<T, MigrationError> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(MigrationError::StateConflict { migration_id }) if attempt < max_retries => {
                attempt += 1;
                tracing::debug!(%migration_id, attempt, "state conflict, retrying");
            }
            other => return other,
        }
    }
}

/// Criteria for reading the attempt ledger. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Only attempts of this migration.
    pub migration_id: Option<String>,
    /// Only attempts against this database.
    pub database: Option<String>,
    /// Only this outcome.
    pub outcome: Option<AttemptOutcome>,
    /// Only this action.
    pub action: Option<Direction>,
    /// Attempts started at or after this time (microseconds).
    pub from: Option<u64>,
    /// Attempts started at or before this time (microseconds).
    pub to: Option<u64>,
    /// Keep only the most recent `limit` entries.
    pub limit: Option<usize>,
}

impl HistoryQuery {
    /// Query matching the whole ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Query for one migration's attempts.
    pub fn for_migration(id: impl Into<String>) -> Self {
        Self {
            migration_id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Restrict to a database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Restrict to an outcome.
    pub fn outcome(mut self, outcome: AttemptOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Restrict to an action.
    pub fn action(mut self, action: Direction) -> Self {
        self.action = Some(action);
        self
    }

    /// Restrict to a start-time window, bounds inclusive.
    pub fn between(mut self, from: Option<u64>, to: Option<u64>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    /// Keep only the newest `limit` entries.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether an entry satisfies the query, ignoring `limit`.
    pub fn matches(&self, entry: &AttemptEntry) -> bool {
        let attempt = &entry.attempt;
        self.migration_id
            .as_ref()
            .map_or(true, |id| &entry.migration_id == id)
            && self
                .database
                .as_ref()
                .map_or(true, |db| &entry.target_database == db)
            && self.outcome.map_or(true, |o| attempt.outcome == Some(o))
            && self.action.map_or(true, |a| attempt.action == a)
            && self.from.map_or(true, |from| attempt.started_at >= from)
            && self.to.map_or(true, |to| attempt.started_at <= to)
    }

    /// Order entries oldest first and apply `limit`, keeping the newest.
    pub(crate) fn finish(&self, mut entries: Vec<AttemptEntry>) -> Vec<AttemptEntry> {
        entries.sort_by_key(|e| e.attempt.started_at);
        if let Some(limit) = self.limit {
            if entries.len() > limit {
                entries.drain(..entries.len() - limit);
            }
        }
        entries
    }
}
