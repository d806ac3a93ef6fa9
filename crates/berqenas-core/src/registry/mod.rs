//! Migration registry.
//!
//! Joins definitions with their execution records and reconciles the store
//! with a [`MigrationSource`]. New definitions get a `Pending` record;
//! definitions that disappear from their source are marked `Obsolete`,
//! never deleted.

mod source;

pub use source::{DirectorySource, MigrationSource, StaticSource};

use crate::migration::{
    ChecksumVerifier, Direction, EngineWarning, ExecutionRecord, MigrationDefinition,
    MigrationError, MigrationFilter, MigrationStats, MigrationStatus, MigrationView, Registration,
    SyncReport,
};
use crate::store::{retry_on_conflict, StateStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Registers definitions and answers queries over definitions and records.
#[derive(Clone)]
pub struct MigrationRegistry {
    store: Arc<dyn StateStore>,
    max_state_retries: u32,
}

impl MigrationRegistry {
    /// Registry over `store`.
    pub fn new(store: Arc<dyn StateStore>, max_state_retries: u32) -> Self {
        Self {
            store,
            max_state_retries,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Register a definition.
    ///
    /// Registering an identical definition again is a no-op. Changed
    /// descriptive fields (name, description, table, dependencies) replace
    /// a never-applied definition and return [`Registration::Updated`]; an
    /// applied one rejects them with [`MigrationError::InvalidDefinition`].
    /// A changed body
    /// replaces a definition that has never completed and returns
    /// [`Registration::ChecksumUpdated`]. A changed body for a migration that
    /// has completed is rejected with [`MigrationError::ChecksumDrift`]; the
    /// rejected checksum is remembered so the migration can never run again
    /// until the original body is restored.
    ///
    /// Callers must hold the database's run lock.
    pub fn register(
        &self,
        mut definition: MigrationDefinition,
    ) -> Result<Registration, MigrationError> {
        definition.validate()?;
        definition.checksum = ChecksumVerifier::compute(definition.body.as_bytes());

        retry_on_conflict(self.max_state_retries, || {
            match self.store.definition(&definition.id)? {
                Some(existing) => self.reregister(&existing, &definition),
                None => self.register_new(&definition),
            }
        })
    }

    fn register_new(
        &self,
        definition: &MigrationDefinition,
    ) -> Result<Registration, MigrationError> {
        self.check_version_unique(definition)?;

        let record = ExecutionRecord::pending(definition);
        if !self.store.insert(definition, &record)? {
            // Lost an insert race; let the caller re-read.
            return Err(MigrationError::StateConflict {
                migration_id: definition.id.clone(),
            });
        }
        tracing::info!(
            migration_id = %definition.id,
            database = %definition.target_database,
            version = %definition.version,
            direction = %definition.direction,
            "migration registered"
        );
        Ok(Registration::Created {
            id: definition.id.clone(),
        })
    }

    fn reregister(
        &self,
        existing: &MigrationDefinition,
        incoming: &MigrationDefinition,
    ) -> Result<Registration, MigrationError> {
        if existing.version != incoming.version
            || existing.target_database != incoming.target_database
            || existing.direction != incoming.direction
        {
            return Err(MigrationError::invalid(format!(
                "{} is already registered as {} version {} for {}",
                existing.id, existing.direction, existing.version, existing.target_database
            )));
        }

        let record = self.record(&existing.id)?;
        let changed = existing.changed_fields(incoming);

        if existing.same_body(incoming) {
            if changed.is_empty() {
                if record.drift_checksum.is_some() {
                    // The original body is back; lift the block.
                    let mut next = record.touch();
                    next.drift_checksum = None;
                    self.store.compare_and_swap(&record, &next, None)?;
                    tracing::info!(migration_id = %existing.id, "checksum drift resolved");
                }
                return Ok(Registration::Unchanged {
                    id: existing.id.clone(),
                });
            }
            return self.update_fields(existing, incoming, &record, changed);
        }

        if record.has_applied() {
            if record.drift_checksum.as_deref() != Some(incoming.checksum.as_str()) {
                let mut next = record.touch();
                next.drift_checksum = Some(incoming.checksum.clone());
                self.store.compare_and_swap(&record, &next, None)?;
            }
            tracing::error!(
                migration_id = %existing.id,
                database = %existing.target_database,
                stored = %existing.checksum,
                computed = %incoming.checksum,
                "checksum drift: applied migration was edited"
            );
            return Err(MigrationError::ChecksumDrift {
                migration_id: existing.id.clone(),
                stored: existing.checksum.clone(),
                computed: incoming.checksum.clone(),
            });
        }

        Self::check_replaceable(&record)?;

        let replacement = MigrationDefinition {
            created_at: existing.created_at,
            ..incoming.clone()
        };
        let mut next = record.touch();
        next.last_checksum_verified = Some(replacement.checksum.clone());
        next.drift_checksum = None;
        self.store.replace_definition(&replacement, &record, &next)?;

        tracing::warn!(
            migration_id = %existing.id,
            previous = %existing.checksum,
            current = %replacement.checksum,
            "checksum updated for edited migration that never ran"
        );
        Ok(Registration::ChecksumUpdated {
            id: existing.id.clone(),
            previous: existing.checksum.clone(),
            current: replacement.checksum,
        })
    }

    /// Replace the descriptive fields of a definition whose body is
    /// unchanged. Applied migrations keep the definition they ran with.
    fn update_fields(
        &self,
        existing: &MigrationDefinition,
        incoming: &MigrationDefinition,
        record: &ExecutionRecord,
        changed: Vec<&'static str>,
    ) -> Result<Registration, MigrationError> {
        if record.has_applied() {
            return Err(MigrationError::invalid(format!(
                "{} has been applied; its {} cannot change",
                existing.id,
                changed.join(", ")
            )));
        }
        Self::check_replaceable(record)?;

        let replacement = MigrationDefinition {
            created_at: existing.created_at,
            ..incoming.clone()
        };
        self.store
            .replace_definition(&replacement, record, &record.touch())?;

        tracing::info!(
            migration_id = %existing.id,
            fields = %changed.join(","),
            "migration definition updated"
        );
        Ok(Registration::Updated {
            id: existing.id.clone(),
            fields: changed.into_iter().map(str::to_string).collect(),
        })
    }

    fn check_replaceable(record: &ExecutionRecord) -> Result<(), MigrationError> {
        if record.status.is_in_flight() || record.status == MigrationStatus::Obsolete {
            return Err(MigrationError::InvalidTransition {
                migration_id: record.migration_id.clone(),
                from: record.status,
                to: MigrationStatus::Pending,
            });
        }
        Ok(())
    }

    fn check_version_unique(&self, definition: &MigrationDefinition) -> Result<(), MigrationError> {
        let records: BTreeMap<String, ExecutionRecord> = self
            .store
            .records(Some(&definition.target_database))?
            .into_iter()
            .map(|r| (r.migration_id.clone(), r))
            .collect();

        let clash = self
            .store
            .definitions(Some(&definition.target_database))?
            .into_iter()
            .filter(|other| {
                records
                    .get(&other.id)
                    .map_or(true, |r| r.status != MigrationStatus::Obsolete)
            })
            .find(|other| {
                other.id != definition.id
                    && other.version == definition.version
                    && other.direction == definition.direction
            });

        match clash {
            Some(other) => Err(MigrationError::invalid(format!(
                "version {} for {} ({}) is already used by {}",
                definition.version, definition.target_database, definition.direction, other.id
            ))),
            None => Ok(()),
        }
    }

    /// Reconcile the store with `source`.
    ///
    /// Registers every definition the source provides and marks stored
    /// migrations of the covered databases that the source no longer lists
    /// `Obsolete`. Drift on applied migrations is reported as a warning and
    /// does not stop the sync. Callers must hold the run lock of every
    /// covered database.
    pub fn sync(&self, source: &dyn MigrationSource) -> Result<SyncReport, MigrationError> {
        let definitions = source.load()?;
        let mut report = SyncReport::default();

        // Up migrations first so a down migration never claims a version
        // whose up migration is still being registered.
        let mut ordered: Vec<&MigrationDefinition> = definitions.iter().collect();
        ordered.sort_by_key(|d| d.direction == Direction::Down);

        for definition in ordered {
            match self.register(definition.clone()) {
                Ok(registration) => {
                    if let Registration::ChecksumUpdated {
                        id,
                        previous,
                        current,
                    } = &registration
                    {
                        report
                            .warnings
                            .push(EngineWarning::checksum_updated(id, previous, current));
                    }
                    report.registrations.push(registration);
                }
                Err(err @ MigrationError::ChecksumDrift { .. }) => {
                    report.warnings.push(EngineWarning::new(
                        definition.id.clone(),
                        err.kind(),
                        err.to_string(),
                    ));
                }
                Err(err) => return Err(err),
            }
        }

        let listed: BTreeSet<&str> = definitions.iter().map(|d| d.id.as_str()).collect();
        for database in source.databases() {
            for record in self.store.records(Some(&database))? {
                if record.status == MigrationStatus::Obsolete
                    || listed.contains(record.migration_id.as_str())
                {
                    continue;
                }
                if self.mark_obsolete(&record.migration_id)? {
                    report.obsoleted.push(record.migration_id);
                }
            }
        }

        tracing::info!(
            registered = report.registrations.len(),
            obsoleted = report.obsoleted.len(),
            warnings = report.warnings.len(),
            "migration source synced"
        );
        Ok(report)
    }

    /// Move a migration to `Obsolete`.
    ///
    /// Returns `false` if it already was. A migration with an open attempt
    /// cannot be made obsolete. Callers must hold the database's run lock.
    pub fn mark_obsolete(&self, id: &str) -> Result<bool, MigrationError> {
        retry_on_conflict(self.max_state_retries, || {
            let record = self.record(id)?;
            if record.status == MigrationStatus::Obsolete {
                return Ok(false);
            }
            if record.status.is_in_flight() {
                return Err(MigrationError::InvalidTransition {
                    migration_id: id.to_string(),
                    from: record.status,
                    to: MigrationStatus::Obsolete,
                });
            }
            let next = record.transition(MigrationStatus::Obsolete)?;
            self.store.compare_and_swap(&record, &next, None)?;
            tracing::info!(migration_id = %id, from = %record.status, "migration marked obsolete");
            Ok(true)
        })
    }

    /// Up migrations of `database` waiting to run.
    pub fn list_pending(&self, database: &str) -> Result<Vec<MigrationView>, MigrationError> {
        Ok(self
            .views(Some(database))?
            .into_iter()
            .filter(|v| v.definition.is_up() && v.record.status == MigrationStatus::Pending)
            .collect())
    }

    /// Every migration of `database`, obsolete ones included.
    pub fn list_all(&self, database: &str) -> Result<Vec<MigrationView>, MigrationError> {
        self.views(Some(database))
    }

    /// Migrations matching `filter`.
    pub fn list(&self, filter: &MigrationFilter) -> Result<Vec<MigrationView>, MigrationError> {
        let views = self.views(filter.database.as_deref())?;
        Ok(filter.apply(views))
    }

    /// Look up one migration.
    pub fn get(&self, id: &str) -> Result<MigrationView, MigrationError> {
        let definition = self
            .store
            .definition(id)?
            .ok_or_else(|| MigrationError::not_found(id))?;
        let record = self.record(id)?;
        Ok(MigrationView { definition, record })
    }

    /// Status counts, for one database or all.
    pub fn stats(&self, database: Option<&str>) -> Result<MigrationStats, MigrationError> {
        let records = self.store.records(database)?;
        Ok(MigrationStats::from_records(&records))
    }

    /// The down migration reversing `up`, if one is registered.
    pub fn down_counterpart(
        &self,
        up: &MigrationDefinition,
    ) -> Result<Option<MigrationView>, MigrationError> {
        Ok(self
            .views(Some(&up.target_database))?
            .into_iter()
            .find(|v| {
                v.definition.direction == Direction::Down
                    && v.definition.version == up.version
                    && v.record.status != MigrationStatus::Obsolete
            }))
    }

    /// Migrations of the same database that declare `id` as a dependency.
    pub fn dependents(
        &self,
        id: &str,
        database: &str,
    ) -> Result<Vec<MigrationView>, MigrationError> {
        Ok(self
            .views(Some(database))?
            .into_iter()
            .filter(|v| v.definition.dependencies.iter().any(|dep| dep == id))
            .collect())
    }

    pub(crate) fn record(&self, id: &str) -> Result<ExecutionRecord, MigrationError> {
        self.store
            .record(id)?
            .ok_or_else(|| MigrationError::not_found(id))
    }

    /// Definitions joined with records, ordered by id.
    pub(crate) fn views(
        &self,
        database: Option<&str>,
    ) -> Result<Vec<MigrationView>, MigrationError> {
        let mut records: BTreeMap<String, ExecutionRecord> = self
            .store
            .records(database)?
            .into_iter()
            .map(|r| (r.migration_id.clone(), r))
            .collect();

        self.store
            .definitions(database)?
            .into_iter()
            .map(|definition| {
                let record = records.remove(&definition.id).ok_or_else(|| {
                    MigrationError::StateCorrupted {
                        message: format!("definition {} has no execution record", definition.id),
                    }
                })?;
                Ok(MigrationView { definition, record })
            })
            .collect()
    }
}
