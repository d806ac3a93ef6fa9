//! Migration lifecycle state.
//!
//! Tracks each migration's status and its in-flight attempt. Closed attempts
//! are appended to the history ledger kept by the state store.

use super::definition::{Direction, MigrationDefinition};
use super::error::MigrationError;
use crate::clock::current_timestamp;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Lifecycle status of a migration.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Registered, waiting to run.
    Pending,
    /// Being applied.
    Running,
    /// Applied successfully.
    Completed,
    /// The last attempt failed.
    Failed,
    /// The down migration is being applied.
    RollingBack,
    /// Reversed by its down migration.
    RolledBack,
    /// Removed from scheduling; history retained.
    Obsolete,
}

impl MigrationStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [MigrationStatus; 7] = [
        MigrationStatus::Pending,
        MigrationStatus::Running,
        MigrationStatus::Completed,
        MigrationStatus::Failed,
        MigrationStatus::RollingBack,
        MigrationStatus::RolledBack,
        MigrationStatus::Obsolete,
    ];

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: MigrationStatus) -> bool {
        use MigrationStatus::*;
        match (self, next) {
            (Obsolete, _) => false,
            (_, Obsolete) => true,
            (Pending, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Completed, RollingBack)
            | (RollingBack, RolledBack)
            | (RollingBack, Completed)
            | (Failed, Pending)
            | (RolledBack, Pending) => true,
            _ => false,
        }
    }

    /// Whether an attempt is open in this status.
    pub fn is_in_flight(self) -> bool {
        matches!(self, MigrationStatus::Running | MigrationStatus::RollingBack)
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::Running => "running",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::RollingBack => "rolling_back",
            MigrationStatus::RolledBack => "rolled_back",
            MigrationStatus::Obsolete => "obsolete",
        }
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MigrationStatus {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        MigrationStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| MigrationError::invalid(format!("unknown status: {s}")))
    }
}

/// Outcome of a closed attempt.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The collaborator reported success.
    Success,
    /// The collaborator reported an error or timed out.
    Failure,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Success => write!(f, "success"),
            AttemptOutcome::Failure => write!(f, "failure"),
        }
    }
}

impl std::str::FromStr for AttemptOutcome {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(AttemptOutcome::Success),
            "failure" | "failed" => Ok(AttemptOutcome::Failure),
            other => Err(MigrationError::invalid(format!("unknown outcome: {other}"))),
        }
    }
}

/// One execution try.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    /// Whether the up or the down body was executed.
    pub action: Direction,
    /// When execution started (microseconds since epoch).
    pub started_at: u64,
    /// When execution finished (microseconds since epoch).
    pub finished_at: Option<u64>,
    /// Outcome, absent while the attempt is open.
    pub outcome: Option<AttemptOutcome>,
    /// Wall time spent in the collaborator.
    pub duration_ms: u64,
    /// Collaborator error detail, or `"timeout"`.
    pub error_detail: Option<String>,
    /// Actor that triggered the attempt.
    pub executed_by: String,
    /// Checksum of the body that was executed.
    pub observed_checksum: String,
}

impl Attempt {
    /// Open a new attempt.
    pub fn start(
        action: Direction,
        executed_by: impl Into<String>,
        observed_checksum: impl Into<String>,
    ) -> Self {
        Self {
            action,
            started_at: current_timestamp(),
            finished_at: None,
            outcome: None,
            duration_ms: 0,
            error_detail: None,
            executed_by: executed_by.into(),
            observed_checksum: observed_checksum.into(),
        }
    }

    /// Close the attempt.
    pub fn close(&mut self, outcome: AttemptOutcome, duration_ms: u64, error: Option<String>) {
        self.outcome = Some(outcome);
        self.finished_at = Some(current_timestamp());
        self.duration_ms = duration_ms;
        self.error_detail = error;
    }

    /// Whether the attempt has been closed.
    pub fn is_closed(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Mutable lifecycle wrapper around a definition.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// The migration this record tracks.
    pub migration_id: String,
    /// Database of the migration, denormalized for queries.
    pub target_database: String,
    /// Current status.
    pub status: MigrationStatus,
    /// Bumped on every write; part of the compare-and-swap key.
    pub revision: u64,
    /// Checksum the current status was last validated against.
    pub last_checksum_verified: Option<String>,
    /// Checksum of an edited body rejected after the migration was applied.
    pub drift_checksum: Option<String>,
    /// Number of successful up attempts.
    pub applied_count: u32,
    /// Attempt in progress while `Running` or `RollingBack`.
    pub in_flight: Option<Attempt>,
    /// Creation time (microseconds since epoch).
    pub created_at: u64,
    /// Last write time (microseconds since epoch).
    pub updated_at: u64,
}

impl ExecutionRecord {
    /// Fresh record for a newly registered definition.
    pub fn pending(definition: &MigrationDefinition) -> Self {
        let now = current_timestamp();
        Self {
            migration_id: definition.id.clone(),
            target_database: definition.target_database.clone(),
            status: MigrationStatus::Pending,
            revision: 0,
            last_checksum_verified: Some(definition.checksum.clone()),
            drift_checksum: None,
            applied_count: 0,
            in_flight: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the migration has ever completed.
    pub fn has_applied(&self) -> bool {
        self.applied_count > 0
    }

    /// Next revision of this record with unchanged status.
    pub fn touch(&self) -> Self {
        let mut next = self.clone();
        next.revision = self.revision + 1;
        next.updated_at = current_timestamp();
        next
    }

    /// Next revision of this record in status `to`.
    pub fn transition(&self, to: MigrationStatus) -> Result<Self, MigrationError> {
        if !self.status.can_transition_to(to) {
            return Err(MigrationError::InvalidTransition {
                migration_id: self.migration_id.clone(),
                from: self.status,
                to,
            });
        }
        let mut next = self.touch();
        next.status = to;
        Ok(next)
    }

    /// Move into an in-flight status and open `attempt`.
    pub fn begin(&self, to: MigrationStatus, attempt: Attempt) -> Result<Self, MigrationError> {
        let mut next = self.transition(to)?;
        if attempt.action == Direction::Up {
            next.last_checksum_verified = Some(attempt.observed_checksum.clone());
        }
        next.in_flight = Some(attempt);
        Ok(next)
    }

    /// Leave an in-flight status, closing the open attempt.
    ///
    /// Returns the next record and the closed attempt for the ledger.
    pub fn conclude(
        &self,
        to: MigrationStatus,
        outcome: AttemptOutcome,
        duration_ms: u64,
        error: Option<String>,
    ) -> Result<(Self, Attempt), MigrationError> {
        let mut next = self.transition(to)?;
        let mut attempt = next
            .in_flight
            .take()
            .ok_or_else(|| MigrationError::StateCorrupted {
                message: format!("record {} has no open attempt", self.migration_id),
            })?;
        attempt.close(outcome, duration_ms, error);
        if outcome == AttemptOutcome::Success && attempt.action == Direction::Up {
            next.applied_count += 1;
        }
        Ok((next, attempt))
    }

    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MigrationError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| crate::error::Error::Serialization(e.to_string()).into())
    }

    /// Deserialize a record from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MigrationError> {
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| crate::error::Error::Deserialization(e.to_string()).into())
    }
}

/// A closed attempt as stored in the history ledger.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct AttemptEntry {
    /// The migration the attempt belongs to.
    pub migration_id: String,
    /// Database of the migration.
    pub target_database: String,
    /// The attempt itself.
    pub attempt: Attempt,
}

impl AttemptEntry {
    /// Wrap a closed attempt for the ledger.
    pub fn new(record: &ExecutionRecord, attempt: Attempt) -> Self {
        Self {
            migration_id: record.migration_id.clone(),
            target_database: record.target_database.clone(),
            attempt,
        }
    }

    /// Serialize the entry to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MigrationError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| crate::error::Error::Serialization(e.to_string()).into())
    }

    /// Deserialize an entry from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MigrationError> {
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| crate::error::Error::Deserialization(e.to_string()).into())
    }
}
