//! Execution coordinator.
//!
//! Drives execution records through the lifecycle state machine. All work
//! on a database happens under that database's run lock. The store is never
//! held across an execution call: the record is moved to `Running` and
//! persisted, the body is executed, then the final status is persisted.
//!
//! A batch is fail-fast. The first failed migration stops it; migrations
//! after it stay `Pending`. Migrations blocked by checksum drift or by an
//! incomplete dependency are skipped without stopping the batch.

mod executor;
mod lock;

pub use executor::{
    CommandExecutor, DryRunExecutor, ExecutionError, ExecutionRequest, StatementExecutor,
};
pub use lock::{RunGuard, RunLocks};

use crate::clock::current_timestamp;
use crate::config::EngineConfig;
use crate::migration::{
    Attempt, AttemptEntry, AttemptOutcome, ChecksumGate, ChecksumVerdict, ChecksumVerifier,
    DependencyResolver, Direction, EngineWarning, ErrorKind, ExecutionRecord, MigrationDefinition,
    MigrationError, MigrationOutcome, MigrationStatus, OutcomeStatus, RecoveredMigration,
    Registration, RunReport, SyncReport,
};
use crate::registry::{MigrationRegistry, MigrationSource};
use crate::store::retry_on_conflict;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Error detail recorded for attempts cut off by the execution timeout.
pub const TIMEOUT_DETAIL: &str = "timeout";

/// Error detail recorded for attempts closed by crash recovery.
pub const INTERRUPTED_DETAIL: &str = "interrupted";

/// Runs, rolls back and re-queues migrations.
pub struct MigrationCoordinator {
    registry: MigrationRegistry,
    executor: Arc<dyn StatementExecutor>,
    locks: RunLocks,
    config: EngineConfig,
}

/// Result of executing one body.
struct Execution {
    duration_ms: u64,
    failure: Option<MigrationError>,
}

impl Execution {
    fn error_detail(&self) -> Option<String> {
        match &self.failure {
            None => None,
            Some(MigrationError::ExecutionTimeout { .. }) => Some(TIMEOUT_DETAIL.to_string()),
            Some(MigrationError::ExecutionFailure { detail, .. }) => Some(detail.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    fn outcome(&self) -> AttemptOutcome {
        if self.failure.is_none() {
            AttemptOutcome::Success
        } else {
            AttemptOutcome::Failure
        }
    }
}

impl MigrationCoordinator {
    /// Coordinator over `registry`, executing through `executor`.
    pub fn new(
        registry: MigrationRegistry,
        executor: Arc<dyn StatementExecutor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            locks: RunLocks::new(),
            config,
        }
    }

    /// The registry this coordinator mutates.
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// The run lock table.
    pub fn locks(&self) -> &RunLocks {
        &self.locks
    }

    /// Apply every pending up migration of `database` in dependency order.
    ///
    /// Fails with [`MigrationError::EngineBusy`] if another batch holds the
    /// database, and with [`MigrationError::UnknownDependency`] or
    /// [`MigrationError::DependencyCycle`] before anything runs if the
    /// migrations cannot be ordered. Everything else is reported per
    /// migration in the returned [`RunReport`].
    pub async fn run_pending(&self, database: &str) -> Result<RunReport, MigrationError> {
        let guard = self.locks.try_acquire(database)?;
        let mut report = RunReport::new(database);

        let views = self.registry.views(Some(database))?;
        let mut statuses: HashMap<String, MigrationStatus> = views
            .iter()
            .map(|v| (v.definition.id.clone(), v.record.status))
            .collect();
        let candidates: Vec<MigrationDefinition> = views
            .into_iter()
            .filter(|v| v.definition.is_up())
            .map(|v| v.definition)
            .collect();
        let order = DependencyResolver::resolve(&candidates)?;

        tracing::info!(
            database,
            pending = order
                .iter()
                .filter(|d| statuses.get(&d.id) == Some(&MigrationStatus::Pending))
                .count(),
            "starting migration batch"
        );

        let mut stop: Option<(ErrorKind, String)> = None;
        for definition in order {
            if statuses.get(&definition.id) != Some(&MigrationStatus::Pending) {
                continue;
            }

            if let Some((kind, message)) = &stop {
                report.outcomes.push(MigrationOutcome::not_attempted(
                    &definition.id,
                    *kind,
                    message.clone(),
                ));
                continue;
            }

            if guard.is_cancelled() {
                tracing::warn!(database, migration_id = %definition.id, "batch cancelled");
                report.cancelled = true;
                let message = "batch cancelled before this migration started".to_string();
                report.outcomes.push(MigrationOutcome::not_attempted(
                    &definition.id,
                    ErrorKind::Cancelled,
                    message.clone(),
                ));
                stop = Some((ErrorKind::Cancelled, message));
                continue;
            }

            if let Some(outcome) = Self::check_dependencies(definition, &statuses) {
                tracing::warn!(
                    database,
                    migration_id = %definition.id,
                    reason = outcome.message.as_deref().unwrap_or_default(),
                    "migration blocked"
                );
                report.outcomes.push(outcome);
                continue;
            }

            let outcome = match self.apply(definition, &mut report.warnings).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(
                        database,
                        migration_id = %definition.id,
                        error = %err,
                        "migration state could not be recorded"
                    );
                    MigrationOutcome::errored(&err, &definition.id)
                }
            };
            match outcome.status {
                OutcomeStatus::Completed => {
                    statuses.insert(definition.id.clone(), MigrationStatus::Completed);
                }
                OutcomeStatus::Failed => {
                    statuses.insert(definition.id.clone(), MigrationStatus::Failed);
                    stop = Some((
                        outcome.error_kind.unwrap_or(ErrorKind::ExecutionFailure),
                        format!("batch stopped after {} failed", definition.id),
                    ));
                }
                _ => {}
            }
            report.outcomes.push(outcome);
        }

        tracing::info!(
            database,
            completed = report.completed_count(),
            failed = report.has_failures(),
            cancelled = report.cancelled,
            "migration batch finished"
        );
        Ok(report)
    }

    /// Apply one pending up migration under its database's run lock.
    ///
    /// Dependencies must already be completed; otherwise the migration is
    /// reported blocked and left `Pending`.
    pub async fn run_migration(&self, id: &str) -> Result<RunReport, MigrationError> {
        let database = self.registry.get(id)?.definition.target_database;
        let _guard = self.locks.try_acquire(&database)?;

        let view = self.registry.get(id)?;
        if !view.definition.is_up() {
            return Err(MigrationError::invalid(format!(
                "{id} is a down migration; run it through rollback of its up migration"
            )));
        }
        if view.record.status != MigrationStatus::Pending {
            return Err(MigrationError::InvalidTransition {
                migration_id: id.to_string(),
                from: view.record.status,
                to: MigrationStatus::Running,
            });
        }

        let mut statuses = HashMap::new();
        for dep in &view.definition.dependencies {
            let record = self.registry.store().record(dep)?.ok_or_else(|| {
                MigrationError::UnknownDependency {
                    migration_id: id.to_string(),
                    dependency: dep.clone(),
                }
            })?;
            statuses.insert(dep.clone(), record.status);
        }

        let mut report = RunReport::new(&database);
        let outcome = match Self::check_dependencies(&view.definition, &statuses) {
            Some(blocked) => blocked,
            None => match self.apply(&view.definition, &mut report.warnings).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(
                        database = %database,
                        migration_id = id,
                        error = %err,
                        "migration state could not be recorded"
                    );
                    MigrationOutcome::errored(&err, id)
                }
            },
        };
        report.outcomes.push(outcome);
        Ok(report)
    }

    /// Reverse a completed up migration with its down counterpart.
    ///
    /// Rejected with [`MigrationError::DependentsStillApplied`] while a
    /// completed migration depends on it and with
    /// [`MigrationError::MissingDownMigration`] if it has no counterpart.
    /// A failed down execution returns the record to `Completed` and is
    /// reported in the outcome.
    pub async fn rollback(&self, id: &str) -> Result<MigrationOutcome, MigrationError> {
        let database = self.registry.get(id)?.definition.target_database;
        let _guard = self.locks.try_acquire(&database)?;

        let view = self.registry.get(id)?;
        let up = view.definition;
        if !up.is_up() {
            return Err(MigrationError::invalid(format!(
                "{id} is a down migration; roll back its up migration instead"
            )));
        }
        if view.record.status != MigrationStatus::Completed {
            return Err(MigrationError::InvalidTransition {
                migration_id: id.to_string(),
                from: view.record.status,
                to: MigrationStatus::RollingBack,
            });
        }

        let dependents: Vec<String> = self
            .registry
            .dependents(id, &database)?
            .into_iter()
            .filter(|v| v.record.status == MigrationStatus::Completed)
            .map(|v| v.definition.id)
            .collect();
        if !dependents.is_empty() {
            return Err(MigrationError::DependentsStillApplied {
                migration_id: id.to_string(),
                dependents,
            });
        }

        let down = self.registry.down_counterpart(&up)?.ok_or_else(|| {
            MigrationError::MissingDownMigration {
                migration_id: id.to_string(),
                version: up.version.clone(),
            }
        })?;
        let verdict = ChecksumVerifier::verify(&down.definition);
        let drift = match (verdict, &down.record.drift_checksum) {
            (ChecksumVerdict::Mismatch { stored, computed }, _) => Some((stored, computed)),
            (ChecksumVerdict::Match, Some(drift)) => {
                Some((down.definition.checksum.clone(), drift.clone()))
            }
            (ChecksumVerdict::Match, None) => None,
        };
        if let Some((stored, computed)) = drift {
            tracing::error!(
                migration_id = %down.definition.id,
                %stored,
                %computed,
                "checksum drift on down migration"
            );
            return Err(MigrationError::ChecksumDrift {
                migration_id: down.definition.id,
                stored,
                computed,
            });
        }

        let actor = self.config.actor.clone();
        let checksum = down.definition.checksum.clone();
        self.transition(id, |current| {
            let attempt = Attempt::start(Direction::Down, &actor, &checksum);
            Ok((current.begin(MigrationStatus::RollingBack, attempt)?, None))
        })?;
        tracing::info!(
            migration_id = id,
            database = %database,
            down = %down.definition.id,
            "rolling back migration"
        );

        let execution = self.execute(&down.definition, id).await;
        let (to, outcome) = match &execution.failure {
            None => (
                MigrationStatus::RolledBack,
                MigrationOutcome::rolled_back(id, execution.duration_ms),
            ),
            Some(err) => (
                MigrationStatus::Completed,
                MigrationOutcome::failed(err, id, execution.duration_ms),
            ),
        };
        self.transition(id, |current| {
            let (next, closed) = current.conclude(
                to,
                execution.outcome(),
                execution.duration_ms,
                execution.error_detail(),
            )?;
            Ok((next, Some(closed)))
        })?;

        match &execution.failure {
            None => tracing::info!(
                migration_id = id,
                database = %database,
                duration_ms = execution.duration_ms,
                "migration rolled back"
            ),
            Some(err) => tracing::error!(
                migration_id = id,
                database = %database,
                duration_ms = execution.duration_ms,
                error = %err,
                "rollback failed; migration remains completed"
            ),
        }
        Ok(outcome)
    }

    /// Return a failed or rolled-back migration to `Pending`.
    pub fn requeue(&self, id: &str) -> Result<ExecutionRecord, MigrationError> {
        let database = self.registry.get(id)?.definition.target_database;
        let _guard = self.locks.try_acquire(&database)?;

        let next = self.transition(id, |current| {
            if !matches!(
                current.status,
                MigrationStatus::Failed | MigrationStatus::RolledBack
            ) {
                return Err(MigrationError::InvalidTransition {
                    migration_id: id.to_string(),
                    from: current.status,
                    to: MigrationStatus::Pending,
                });
            }
            Ok((current.transition(MigrationStatus::Pending)?, None))
        })?;
        tracing::info!(migration_id = id, database = %database, "migration re-queued");
        Ok(next)
    }

    /// Register a definition under its database's run lock.
    ///
    /// Fails with [`MigrationError::EngineBusy`] while a batch runs on that
    /// database, so a batch always executes the definitions it read.
    pub fn register(
        &self,
        definition: MigrationDefinition,
    ) -> Result<Registration, MigrationError> {
        let _guard = self.locks.try_acquire(&definition.target_database)?;
        self.registry.register(definition)
    }

    /// Remove a migration from scheduling. Its history is kept.
    pub fn mark_obsolete(&self, id: &str) -> Result<bool, MigrationError> {
        let database = self.registry.get(id)?.definition.target_database;
        let _guard = self.locks.try_acquire(&database)?;
        self.registry.mark_obsolete(id)
    }

    /// Reconcile the store with `source` while holding the run lock of
    /// every database it covers.
    pub fn sync(&self, source: &dyn MigrationSource) -> Result<SyncReport, MigrationError> {
        let databases: BTreeSet<String> = source.databases().into_iter().collect();
        let _guards = databases
            .iter()
            .map(|db| self.locks.try_acquire(db))
            .collect::<Result<Vec<_>, _>>()?;
        self.registry.sync(source)
    }

    /// Close attempts left open by a process that died mid-execution.
    ///
    /// `Running` records become `Failed` and `RollingBack` records return to
    /// `Completed`; the open attempt is recorded as a failure with detail
    /// `"interrupted"`. Fails with [`MigrationError::EngineBusy`] while a
    /// batch is running, since its in-flight records are live.
    pub fn recover(&self, database: &str) -> Result<Vec<RecoveredMigration>, MigrationError> {
        let _guard = self.locks.try_acquire(database)?;

        let mut recovered = Vec::new();
        for record in self.registry.store().records(Some(database))? {
            let to = match record.status {
                MigrationStatus::Running => MigrationStatus::Failed,
                MigrationStatus::RollingBack => MigrationStatus::Completed,
                _ => continue,
            };
            self.transition(&record.migration_id, |current| {
                let Some(open) = &current.in_flight else {
                    return Ok((current.transition(to)?, None));
                };
                let elapsed_ms = current_timestamp().saturating_sub(open.started_at) / 1_000;
                let (next, closed) = current.conclude(
                    to,
                    AttemptOutcome::Failure,
                    elapsed_ms,
                    Some(INTERRUPTED_DETAIL.to_string()),
                )?;
                Ok((next, Some(closed)))
            })?;
            tracing::warn!(
                migration_id = %record.migration_id,
                database,
                from = %record.status,
                to = %to,
                "recovered interrupted migration"
            );
            recovered.push(RecoveredMigration {
                migration_id: record.migration_id,
                from: record.status,
                to,
            });
        }
        Ok(recovered)
    }

    /// Ask the batch running on `database` to stop before its next
    /// migration. Returns `false` if nothing is running there.
    pub fn cancel(&self, database: &str) -> bool {
        let signalled = self.locks.cancel(database);
        if signalled {
            tracing::warn!(database, "cancellation requested");
        }
        signalled
    }

    /// Report the first dependency that is not completed.
    fn check_dependencies(
        definition: &MigrationDefinition,
        statuses: &HashMap<String, MigrationStatus>,
    ) -> Option<MigrationOutcome> {
        definition.dependencies.iter().find_map(|dep| {
            let status = statuses.get(dep).copied();
            if status == Some(MigrationStatus::Completed) {
                return None;
            }
            let state = status.map_or("missing".to_string(), |s| s.to_string());
            Some(MigrationOutcome::blocked(
                &definition.id,
                ErrorKind::DependencyBlocked,
                format!("dependency {dep} is {state}"),
            ))
        })
    }

    /// Gate, execute and record one up migration.
    ///
    /// `definition` is the copy the caller scheduled. If the stored
    /// definition or record moved on since it was read, the migration is
    /// reported blocked and left `Pending` for the next run.
    async fn apply(
        &self,
        definition: &MigrationDefinition,
        warnings: &mut Vec<EngineWarning>,
    ) -> Result<MigrationOutcome, MigrationError> {
        let id = definition.id.as_str();
        let database = definition.target_database.as_str();
        let mut record = self.registry.record(id)?;

        let stored = self
            .registry
            .store()
            .definition(id)?
            .ok_or_else(|| MigrationError::not_found(id))?;
        if !stored.same_body(definition) || !stored.changed_fields(definition).is_empty() {
            tracing::warn!(
                migration_id = id,
                database,
                scheduled = %definition.checksum,
                stored = %stored.checksum,
                "definition changed after scheduling; migration held back"
            );
            return Ok(MigrationOutcome::blocked(
                id,
                ErrorKind::StateConflict,
                format!("definition of {id} changed after the batch read it"),
            ));
        }

        let checksum = match ChecksumVerifier::gate(definition, &record) {
            Ok(ChecksumGate::Verified) => definition.checksum.clone(),
            Ok(ChecksumGate::Updated { previous, current }) => {
                record = self.adopt_checksum(definition, &current)?;
                tracing::warn!(
                    migration_id = id,
                    %previous,
                    %current,
                    "checksum updated before execution"
                );
                warnings.push(EngineWarning::checksum_updated(id, &previous, &current));
                current
            }
            Err(err) => {
                tracing::error!(
                    migration_id = id,
                    database,
                    error = %err,
                    "checksum drift; migration blocked"
                );
                return Ok(MigrationOutcome::blocked(id, err.kind(), err.to_string()));
            }
        };

        // A single swap against the record that was gated: a definition
        // replaced since then bumped its revision.
        let attempt = Attempt::start(Direction::Up, &self.config.actor, &checksum);
        let running = record.begin(MigrationStatus::Running, attempt)?;
        match self.registry.store().compare_and_swap(&record, &running, None) {
            Ok(()) => {}
            Err(err @ MigrationError::StateConflict { .. }) => {
                tracing::warn!(
                    migration_id = id,
                    database,
                    "record changed after gating; migration held back"
                );
                return Ok(MigrationOutcome::blocked(id, err.kind(), err.to_string()));
            }
            Err(err) => return Err(err),
        }
        tracing::info!(
            migration_id = id,
            database,
            version = %definition.version,
            "applying migration"
        );

        let execution = self.execute(definition, id).await;
        let to = match execution.failure {
            None => MigrationStatus::Completed,
            Some(_) => MigrationStatus::Failed,
        };
        self.transition(id, |current| {
            let (next, closed) = current.conclude(
                to,
                execution.outcome(),
                execution.duration_ms,
                execution.error_detail(),
            )?;
            Ok((next, Some(closed)))
        })?;

        Ok(match &execution.failure {
            None => {
                tracing::info!(
                    migration_id = id,
                    database,
                    duration_ms = execution.duration_ms,
                    "migration completed"
                );
                MigrationOutcome::completed(id, execution.duration_ms)
            }
            Some(err) => {
                tracing::error!(
                    migration_id = id,
                    database,
                    duration_ms = execution.duration_ms,
                    error = %err,
                    "migration failed"
                );
                MigrationOutcome::failed(err, id, execution.duration_ms)
            }
        })
    }

    /// Run `definition`'s body, bounded by the execution timeout.
    ///
    /// `owner` is the migration whose record tracks the attempt.
    async fn execute(&self, definition: &MigrationDefinition, owner: &str) -> Execution {
        let request = ExecutionRequest {
            migration_id: &definition.id,
            target_database: &definition.target_database,
            direction: definition.direction,
            body: &definition.body,
        };
        let timeout = self.config.execution_timeout;
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.executor.execute(request)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(MigrationError::ExecutionFailure {
                migration_id: owner.to_string(),
                detail: err.detail,
            }),
            Err(_) => Some(MigrationError::ExecutionTimeout {
                migration_id: owner.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        Execution {
            duration_ms,
            failure,
        }
    }

    /// Store a recomputed checksum for a migration that never ran.
    /// Returns the updated record.
    fn adopt_checksum(
        &self,
        definition: &MigrationDefinition,
        checksum: &str,
    ) -> Result<ExecutionRecord, MigrationError> {
        let replacement = MigrationDefinition {
            checksum: checksum.to_string(),
            ..definition.clone()
        };
        retry_on_conflict(self.config.max_state_retries, || {
            let current = self.registry.record(&definition.id)?;
            let mut next = current.touch();
            next.last_checksum_verified = Some(checksum.to_string());
            self.registry
                .store()
                .replace_definition(&replacement, &current, &next)?;
            Ok(next)
        })
    }

    /// Read-modify-write a record, retrying lost races.
    ///
    /// `build` receives the current record and returns the next one plus
    /// the attempt it closes, if any.
    fn transition<F>(&self, id: &str, build: F) -> Result<ExecutionRecord, MigrationError>
    where
        F: Fn(&ExecutionRecord) -> Result<(ExecutionRecord, Option<Attempt>), MigrationError>,
    {
        retry_on_conflict(self.config.max_state_retries, || {
            let current = self.registry.record(id)?;
            let (next, closed) = build(&current)?;
            let entry = closed.map(|attempt| AttemptEntry::new(&next, attempt));
            self.registry
                .store()
                .compare_and_swap(&current, &next, entry.as_ref())?;
            Ok(next)
        })
    }
}
