//! Migration-specific error types.

use super::state::MigrationStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable classification of an engine failure or warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A dependency id is not part of the candidate set.
    UnknownDependency,
    /// The dependency graph contains a cycle.
    DependencyCycle,
    /// A previously applied migration no longer matches its checksum.
    ChecksumDrift,
    /// A never-applied migration was edited and its checksum refreshed.
    ChecksumUpdated,
    /// The run lock for the database is held by another batch.
    EngineBusy,
    /// Rollback rejected because dependents are still applied.
    DependentsStillApplied,
    /// The execution collaborator did not answer in time.
    ExecutionTimeout,
    /// The execution collaborator reported an error.
    ExecutionFailure,
    /// A compare-and-swap on the execution record lost a race.
    StateConflict,
    /// A dependency has not completed, so the migration was held back.
    DependencyBlocked,
    /// The batch was cancelled before this migration started.
    Cancelled,
    /// The migration does not exist.
    NotFound,
    /// The requested status change is not permitted.
    InvalidTransition,
    /// No down migration exists to reverse the migration.
    MissingDownMigration,
    /// The definition is malformed.
    InvalidDefinition,
    /// The migration source could not be read.
    Source,
    /// The metadata store failed.
    Storage,
}

impl ErrorKind {
    /// Stable name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownDependency => "UnknownDependency",
            ErrorKind::DependencyCycle => "DependencyCycle",
            ErrorKind::ChecksumDrift => "ChecksumDrift",
            ErrorKind::ChecksumUpdated => "ChecksumUpdated",
            ErrorKind::EngineBusy => "EngineBusy",
            ErrorKind::DependentsStillApplied => "DependentsStillApplied",
            ErrorKind::ExecutionTimeout => "ExecutionTimeout",
            ErrorKind::ExecutionFailure => "ExecutionFailure",
            ErrorKind::StateConflict => "StateConflict",
            ErrorKind::DependencyBlocked => "DependencyBlocked",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidTransition => "InvalidTransition",
            ErrorKind::MissingDownMigration => "MissingDownMigration",
            ErrorKind::InvalidDefinition => "InvalidDefinition",
            ErrorKind::Source => "Source",
            ErrorKind::Storage => "Storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A declared dependency is not among the known migrations.
    #[error("migration {migration_id} depends on unknown migration {dependency}")]
    UnknownDependency {
        /// The migration declaring the dependency.
        migration_id: String,
        /// The missing dependency id.
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected: {}", members.join(" -> "))]
    DependencyCycle {
        /// Migrations forming the cycle, in traversal order.
        members: Vec<String>,
    },

    /// An applied migration's content no longer matches its registered checksum.
    #[error("checksum drift on {migration_id}: registered {stored}, found {computed}")]
    ChecksumDrift {
        /// The drifted migration.
        migration_id: String,
        /// Checksum recorded at registration.
        stored: String,
        /// Checksum of the content now presented.
        computed: String,
    },

    /// The run lock for the database is already held.
    #[error("run lock for database {database} is already held")]
    EngineBusy {
        /// The locked database.
        database: String,
    },

    /// Rollback rejected because completed migrations still depend on this one.
    #[error("cannot roll back {migration_id}: dependents still applied: {}", dependents.join(", "))]
    DependentsStillApplied {
        /// The migration requested for rollback.
        migration_id: String,
        /// Completed migrations that depend on it.
        dependents: Vec<String>,
    },

    /// Execution exceeded the configured timeout.
    #[error("migration {migration_id} timed out after {timeout_ms} ms")]
    ExecutionTimeout {
        /// The migration that timed out.
        migration_id: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The execution collaborator reported an error.
    #[error("migration {migration_id} failed: {detail}")]
    ExecutionFailure {
        /// The failed migration.
        migration_id: String,
        /// Collaborator-provided detail.
        detail: String,
    },

    /// The execution record changed underneath a compare-and-swap.
    #[error("state conflict on {migration_id}: record changed concurrently")]
    StateConflict {
        /// The contended migration.
        migration_id: String,
    },

    /// Migration not found.
    #[error("migration not found: {migration_id}")]
    MigrationNotFound {
        /// The unknown migration id.
        migration_id: String,
    },

    /// The state machine does not permit this status change.
    #[error("invalid transition for {migration_id}: {from} -> {to}")]
    InvalidTransition {
        /// The migration.
        migration_id: String,
        /// Current status.
        from: MigrationStatus,
        /// Requested status.
        to: MigrationStatus,
    },

    /// No down migration pairs with the migration being rolled back.
    #[error("no down migration registered for {migration_id} (version {version})")]
    MissingDownMigration {
        /// The up migration.
        migration_id: String,
        /// Its version.
        version: String,
    },

    /// The definition is malformed or conflicts with another definition.
    #[error("invalid migration definition: {message}")]
    InvalidDefinition {
        /// Description of the problem.
        message: String,
    },

    /// The migration source could not be read.
    #[error("migration source error: {message}")]
    Source {
        /// Description of the problem.
        message: String,
    },

    /// A stored record violates an engine invariant.
    #[error("migration state corrupted: {message}")]
    StateCorrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),
}

impl MigrationError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::UnknownDependency { .. } => ErrorKind::UnknownDependency,
            MigrationError::DependencyCycle { .. } => ErrorKind::DependencyCycle,
            MigrationError::ChecksumDrift { .. } => ErrorKind::ChecksumDrift,
            MigrationError::EngineBusy { .. } => ErrorKind::EngineBusy,
            MigrationError::DependentsStillApplied { .. } => ErrorKind::DependentsStillApplied,
            MigrationError::ExecutionTimeout { .. } => ErrorKind::ExecutionTimeout,
            MigrationError::ExecutionFailure { .. } => ErrorKind::ExecutionFailure,
            MigrationError::StateConflict { .. } => ErrorKind::StateConflict,
            MigrationError::MigrationNotFound { .. } => ErrorKind::NotFound,
            MigrationError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            MigrationError::MissingDownMigration { .. } => ErrorKind::MissingDownMigration,
            MigrationError::InvalidDefinition { .. } => ErrorKind::InvalidDefinition,
            MigrationError::Source { .. } => ErrorKind::Source,
            MigrationError::StateCorrupted { .. } | MigrationError::Storage(_) => {
                ErrorKind::Storage
            }
        }
    }

    /// The migration the error concerns, when there is a single one.
    pub fn migration_id(&self) -> Option<&str> {
        match self {
            MigrationError::UnknownDependency { migration_id, .. }
            | MigrationError::ChecksumDrift { migration_id, .. }
            | MigrationError::DependentsStillApplied { migration_id, .. }
            | MigrationError::ExecutionTimeout { migration_id, .. }
            | MigrationError::ExecutionFailure { migration_id, .. }
            | MigrationError::StateConflict { migration_id }
            | MigrationError::MigrationNotFound { migration_id }
            | MigrationError::InvalidTransition { migration_id, .. }
            | MigrationError::MissingDownMigration { migration_id, .. } => Some(migration_id),
            _ => None,
        }
    }

    pub(crate) fn not_found(migration_id: impl Into<String>) -> Self {
        MigrationError::MigrationNotFound {
            migration_id: migration_id.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        MigrationError::InvalidDefinition {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::DependencyCycle {
            members: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");

        let err = MigrationError::DependentsStillApplied {
            migration_id: "v001".to_string(),
            dependents: vec!["v002".to_string(), "v003".to_string()],
        };
        assert!(err.to_string().contains("v002, v003"));
    }

    #[test]
    fn test_error_kind_and_id() {
        let err = MigrationError::EngineBusy {
            database: "production".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::EngineBusy);
        assert_eq!(err.migration_id(), None);

        let err = MigrationError::ChecksumDrift {
            migration_id: "v001".to_string(),
            stored: "aa".to_string(),
            computed: "bb".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::ChecksumDrift);
        assert_eq!(err.migration_id(), Some("v001"));
        assert_eq!(err.kind().to_string(), "ChecksumDrift");
    }
}
