//! Outcome reports returned to callers.

use super::error::{ErrorKind, MigrationError};
use super::state::MigrationStatus;
use serde::Serialize;

/// What happened to one migration during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Applied successfully.
    Completed,
    /// Attempted and failed.
    Failed,
    /// Held back by a dependency or a checksum gate; still `Pending`.
    Blocked,
    /// Not attempted because the batch stopped earlier; still `Pending`.
    NotAttempted,
    /// Reversed by its down migration.
    RolledBack,
}

/// Per-migration result of a run or rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
    /// The migration.
    pub migration_id: String,
    /// What happened.
    pub status: OutcomeStatus,
    /// Failure classification, when there was one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Human-readable failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Time spent executing, when the migration ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl MigrationOutcome {
    /// A successful application.
    pub fn completed(migration_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            migration_id: migration_id.into(),
            status: OutcomeStatus::Completed,
            error_kind: None,
            message: None,
            duration_ms: Some(duration_ms),
        }
    }

    /// A successful rollback.
    pub fn rolled_back(migration_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: OutcomeStatus::RolledBack,
            ..Self::completed(migration_id, duration_ms)
        }
    }

    /// A failed attempt.
    pub fn failed(error: &MigrationError, migration_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            migration_id: migration_id.into(),
            status: OutcomeStatus::Failed,
            error_kind: Some(error.kind()),
            message: Some(error.to_string()),
            duration_ms: Some(duration_ms),
        }
    }

    /// A failure of the engine itself, such as a store error, while
    /// handling the migration.
    pub fn errored(error: &MigrationError, migration_id: impl Into<String>) -> Self {
        Self {
            duration_ms: None,
            ..Self::failed(error, migration_id, 0)
        }
    }

    /// A migration held back before execution.
    pub fn blocked(
        migration_id: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            migration_id: migration_id.into(),
            status: OutcomeStatus::Blocked,
            error_kind: Some(kind),
            message: Some(message.into()),
            duration_ms: None,
        }
    }

    /// A migration skipped because the batch stopped.
    pub fn not_attempted(
        migration_id: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: OutcomeStatus::NotAttempted,
            ..Self::blocked(migration_id, kind, message)
        }
    }

    /// Whether the migration ended in its desired state.
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            OutcomeStatus::Completed | OutcomeStatus::RolledBack
        )
    }
}

/// Non-fatal condition surfaced alongside a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineWarning {
    /// The migration concerned.
    pub migration_id: String,
    /// Classification.
    pub kind: ErrorKind,
    /// Description.
    pub message: String,
}

impl EngineWarning {
    /// Create a warning.
    pub fn new(migration_id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            migration_id: migration_id.into(),
            kind,
            message: message.into(),
        }
    }

    /// A stored checksum was refreshed for an edited, never-applied migration.
    pub fn checksum_updated(migration_id: &str, previous: &str, current: &str) -> Self {
        Self::new(
            migration_id,
            ErrorKind::ChecksumUpdated,
            format!("checksum updated from {previous} to {current}"),
        )
    }
}

/// Result of one `run_pending` or `run_migration` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Target database.
    pub database: String,
    /// Outcomes in execution order.
    pub outcomes: Vec<MigrationOutcome>,
    /// Non-fatal conditions encountered.
    pub warnings: Vec<EngineWarning>,
    /// Whether the batch stopped because of a cancellation request.
    pub cancelled: bool,
}

impl RunReport {
    /// Empty report for a database.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            outcomes: Vec::new(),
            warnings: Vec::new(),
            cancelled: false,
        }
    }

    /// Outcome for a migration, if it was part of the run.
    pub fn outcome(&self, migration_id: &str) -> Option<&MigrationOutcome> {
        self.outcomes.iter().find(|o| o.migration_id == migration_id)
    }

    /// Number of migrations applied.
    pub fn completed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Completed)
            .count()
    }

    /// Whether any migration failed.
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.status == OutcomeStatus::Failed)
    }

    /// Whether every outcome is a success.
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.outcomes.iter().all(MigrationOutcome::is_success)
    }
}

/// Result of registering one definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Registration {
    /// New definition stored with a `Pending` record.
    Created {
        /// The migration.
        id: String,
    },
    /// Identical definition already registered.
    Unchanged {
        /// The migration.
        id: String,
    },
    /// Edited before it was ever applied; stored checksum refreshed.
    ChecksumUpdated {
        /// The migration.
        id: String,
        /// Previous checksum.
        previous: String,
        /// New checksum.
        current: String,
    },
    /// Same body, descriptive fields replaced before it was ever applied.
    Updated {
        /// The migration.
        id: String,
        /// Fields that changed.
        fields: Vec<String>,
    },
}

impl Registration {
    /// The migration registered.
    pub fn id(&self) -> &str {
        match self {
            Registration::Created { id }
            | Registration::Unchanged { id }
            | Registration::ChecksumUpdated { id, .. }
            | Registration::Updated { id, .. } => id,
        }
    }
}

/// Result of reconciling a migration source with the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Registration result per definition in the source.
    pub registrations: Vec<Registration>,
    /// Stored migrations absent from the source, now `Obsolete`.
    pub obsoleted: Vec<String>,
    /// Applied migrations whose source content changed.
    pub warnings: Vec<EngineWarning>,
}

/// A record moved out of an in-flight status by crash recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveredMigration {
    /// The migration.
    pub migration_id: String,
    /// Status it was left in.
    pub from: MigrationStatus,
    /// Status it was moved to.
    pub to: MigrationStatus,
}
