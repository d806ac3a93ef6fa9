//! The migration engine facade.

use crate::config::EngineConfig;
use crate::coordinator::{DryRunExecutor, MigrationCoordinator, StatementExecutor};
use crate::error::Error;
use crate::migration::{
    AttemptEntry, ExecutionRecord, MigrationDefinition, MigrationError, MigrationFilter,
    MigrationOutcome, MigrationStats, MigrationView, RecoveredMigration, Registration, RunReport,
    SyncReport,
};
use crate::registry::{MigrationRegistry, MigrationSource};
use crate::store::{HistoryQuery, SledStateStore, StateStore};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Registration, execution and history of schema migrations.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct MigrationEngine {
    coordinator: MigrationCoordinator,
    config: EngineConfig,
}

impl MigrationEngine {
    /// Open the sled store described by `config`.
    ///
    /// With `dry_run` set, `executor` is replaced by [`DryRunExecutor`].
    pub fn open(
        config: EngineConfig,
        executor: Arc<dyn StatementExecutor>,
    ) -> Result<Self, MigrationError> {
        let db = config.to_sled_config().open().map_err(Error::from)?;
        if db.was_recovered() {
            tracing::info!(path = %config.data_path.display(), "opened existing migration store");
        }
        let store = SledStateStore::open(&db)?;
        Ok(Self::with_store(config, Arc::new(store), executor))
    }

    /// Build an engine over an existing store.
    pub fn with_store(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        executor: Arc<dyn StatementExecutor>,
    ) -> Self {
        let executor: Arc<dyn StatementExecutor> = if config.dry_run {
            tracing::info!("dry-run mode: migration bodies will not be executed");
            Arc::new(DryRunExecutor)
        } else {
            executor
        };
        let registry = MigrationRegistry::new(store, config.max_state_retries);
        let coordinator = MigrationCoordinator::new(registry, executor, config.clone());
        Self {
            coordinator,
            config,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The underlying coordinator.
    pub fn coordinator(&self) -> &MigrationCoordinator {
        &self.coordinator
    }

    fn registry(&self) -> &MigrationRegistry {
        self.coordinator.registry()
    }

    /// Register one definition.
    pub fn register(
        &self,
        definition: MigrationDefinition,
    ) -> Result<Registration, MigrationError> {
        self.coordinator.register(definition)
    }

    /// Reconcile the store with a migration source.
    pub fn sync(&self, source: &dyn MigrationSource) -> Result<SyncReport, MigrationError> {
        self.coordinator.sync(source)
    }

    /// Look up one migration.
    pub fn get(&self, id: &str) -> Result<MigrationView, MigrationError> {
        self.registry().get(id)
    }

    /// Migrations matching `filter`.
    pub fn list(&self, filter: &MigrationFilter) -> Result<Vec<MigrationView>, MigrationError> {
        self.registry().list(filter)
    }

    /// Up migrations of `database` waiting to run.
    pub fn list_pending(&self, database: &str) -> Result<Vec<MigrationView>, MigrationError> {
        self.registry().list_pending(database)
    }

    /// Every migration of `database`.
    pub fn list_all(&self, database: &str) -> Result<Vec<MigrationView>, MigrationError> {
        self.registry().list_all(database)
    }

    /// Status counts, for one database or all.
    pub fn stats(&self, database: Option<&str>) -> Result<MigrationStats, MigrationError> {
        self.registry().stats(database)
    }

    /// Databases with at least one registered migration.
    pub fn databases(&self) -> Result<Vec<String>, MigrationError> {
        let databases: BTreeSet<String> = self
            .registry()
            .store()
            .records(None)?
            .into_iter()
            .map(|r| r.target_database)
            .collect();
        Ok(databases.into_iter().collect())
    }

    /// Query the attempt ledger.
    pub fn history(&self, query: &HistoryQuery) -> Result<Vec<AttemptEntry>, MigrationError> {
        self.registry().store().history(query)
    }

    /// Apply every pending migration of `database`.
    pub async fn run_pending(&self, database: &str) -> Result<RunReport, MigrationError> {
        self.coordinator.run_pending(database).await
    }

    /// Apply one pending migration.
    pub async fn run_migration(&self, id: &str) -> Result<RunReport, MigrationError> {
        self.coordinator.run_migration(id).await
    }

    /// Reverse a completed migration.
    pub async fn rollback(&self, id: &str) -> Result<MigrationOutcome, MigrationError> {
        self.coordinator.rollback(id).await
    }

    /// Return a failed or rolled-back migration to `Pending`.
    pub fn requeue(&self, id: &str) -> Result<ExecutionRecord, MigrationError> {
        self.coordinator.requeue(id)
    }

    /// Remove a migration from scheduling.
    pub fn mark_obsolete(&self, id: &str) -> Result<bool, MigrationError> {
        self.coordinator.mark_obsolete(id)
    }

    /// Close attempts left open by a crash.
    pub fn recover(&self, database: &str) -> Result<Vec<RecoveredMigration>, MigrationError> {
        self.coordinator.recover(database)
    }

    /// Recover every known database, skipping ones with a batch running.
    pub fn recover_all(&self) -> Result<Vec<RecoveredMigration>, MigrationError> {
        let mut recovered = Vec::new();
        for database in self.databases()? {
            match self.recover(&database) {
                Ok(mut records) => recovered.append(&mut records),
                Err(MigrationError::EngineBusy { .. }) => {
                    tracing::debug!(%database, "skipping recovery, batch running");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(recovered)
    }

    /// Ask the running batch on `database` to stop.
    pub fn cancel(&self, database: &str) -> bool {
        self.coordinator.cancel(database)
    }

    /// Make all writes durable.
    pub fn flush(&self) -> Result<(), MigrationError> {
        self.registry().store().flush()
    }
}
