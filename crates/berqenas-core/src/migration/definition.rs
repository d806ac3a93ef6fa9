//! Migration definitions.
//!
//! A definition is immutable once registered. Editing a migration that has
//! never been applied produces a replacement definition with a fresh
//! checksum; see [`crate::registry::MigrationRegistry::register`].

use super::checksum::ChecksumVerifier;
use super::error::MigrationError;
use crate::clock::current_timestamp;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Whether a migration applies a change or reverses one.
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
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Applies a schema change.
    Up,
    /// Reverses the up migration sharing its version.
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(MigrationError::invalid(format!("unknown direction: {other}"))),
        }
    }
}

/// An immutable description of one schema change.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct MigrationDefinition {
    /// Stable opaque identifier.
    pub id: String,
    /// Sortable version token, unique per database and direction.
    pub version: String,
    /// Human-readable name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Up or down.
    pub direction: Direction,
    /// Logical database the migration targets.
    pub target_database: String,
    /// Table touched by the migration, informational only.
    pub affected_table: Option<String>,
    /// Executable statements, opaque to the engine.
    pub body: String,
    /// Content hash of `body`.
    pub checksum: String,
    /// Ids that must be completed before this migration runs.
    pub dependencies: Vec<String>,
    /// Registration time (microseconds since epoch).
    pub created_at: u64,
}

impl MigrationDefinition {
    /// Create an up migration, computing the checksum of `body`.
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        target_database: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let body = body.into();
        Self {
            name: id.clone(),
            id,
            version: version.into(),
            description: String::new(),
            direction: Direction::Up,
            target_database: target_database.into(),
            affected_table: None,
            checksum: ChecksumVerifier::compute(body.as_bytes()),
            body,
            dependencies: Vec::new(),
            created_at: current_timestamp(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the direction.
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set the affected table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.affected_table = Some(table.into());
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    /// Add several dependencies.
    pub fn with_dependencies<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ids.into_iter().fold(self, |def, id| def.with_dependency(id))
    }

    /// Set the registration time.
    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether this is an up migration.
    pub fn is_up(&self) -> bool {
        self.direction == Direction::Up
    }

    /// Whether `other` carries the same executable content.
    pub fn same_body(&self, other: &MigrationDefinition) -> bool {
        self.checksum == other.checksum && self.body == other.body
    }

    /// Descriptive fields that differ from `other`. Identity fields and the
    /// body are not compared.
    pub fn changed_fields(&self, other: &MigrationDefinition) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.name != other.name {
            changed.push("name");
        }
        if self.description != other.description {
            changed.push("description");
        }
        if self.affected_table != other.affected_table {
            changed.push("affectedTable");
        }
        if self.dependencies != other.dependencies {
            changed.push("dependencies");
        }
        changed
    }

    /// Check structural validity.
    pub fn validate(&self) -> Result<(), MigrationError> {
        if self.id.trim().is_empty() {
            return Err(MigrationError::invalid("id must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(MigrationError::invalid(format!(
                "{}: version must not be empty",
                self.id
            )));
        }
        if self.target_database.trim().is_empty() {
            return Err(MigrationError::invalid(format!(
                "{}: target database must not be empty",
                self.id
            )));
        }
        if self.dependencies.iter().any(|dep| dep == &self.id) {
            return Err(MigrationError::invalid(format!(
                "{}: a migration cannot depend on itself",
                self.id
            )));
        }
        if self.direction == Direction::Down && !self.dependencies.is_empty() {
            return Err(MigrationError::invalid(format!(
                "{}: down migrations are scheduled through rollback and cannot declare dependencies",
                self.id
            )));
        }
        Ok(())
    }

    /// Serialize the definition to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MigrationError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| crate::error::Error::Serialization(e.to_string()).into())
    }

    /// Deserialize a definition from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MigrationError> {
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| crate::error::Error::Deserialization(e.to_string()).into())
    }
}
