//! Content checksums for migration bodies.
//!
//! Checksums are BLAKE3 digests rendered as lowercase hex. They are the only
//! thing standing between an edited migration and its silent re-application,
//! so every scheduling decision goes through [`ChecksumVerifier::gate`].

use super::definition::MigrationDefinition;
use super::error::MigrationError;
use super::state::ExecutionRecord;
use serde::Serialize;

/// Result of comparing a stored checksum with a recomputed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "camelCase")]
pub enum ChecksumVerdict {
    /// The content hashes to the stored checksum.
    Match,
    /// The content hashes to something else.
    Mismatch {
        /// Checksum on record.
        stored: String,
        /// Checksum of the content.
        computed: String,
    },
}

impl ChecksumVerdict {
    /// Whether the verdict is a match.
    pub fn is_match(&self) -> bool {
        matches!(self, ChecksumVerdict::Match)
    }
}

/// Outcome of the pre-execution checksum gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumGate {
    /// The definition is intact.
    Verified,
    /// The definition never ran and was edited; the new checksum should be adopted.
    Updated {
        /// Checksum on record.
        previous: String,
        /// Checksum of the current body.
        current: String,
    },
}

/// Computes and checks migration checksums.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Compute the checksum of a body.
    pub fn compute(body: &[u8]) -> String {
        hex::encode(blake3::hash(body).as_bytes())
    }

    /// Compare a stored checksum against a body.
    pub fn verify_body(stored: &str, body: &[u8]) -> ChecksumVerdict {
        let computed = Self::compute(body);
        if computed == stored {
            ChecksumVerdict::Match
        } else {
            ChecksumVerdict::Mismatch {
                stored: stored.to_string(),
                computed,
            }
        }
    }

    /// Recompute a definition's checksum from its body and compare.
    pub fn verify(definition: &MigrationDefinition) -> ChecksumVerdict {
        Self::verify_body(&definition.checksum, definition.body.as_bytes())
    }

    /// Decide whether a migration may proceed to execution.
    ///
    /// A mismatch, or a drift marker left by the registry, is fatal once the
    /// migration has completed at least once. Before that it only signals
    /// that the stored checksum must be refreshed.
    pub fn gate(
        definition: &MigrationDefinition,
        record: &ExecutionRecord,
    ) -> Result<ChecksumGate, MigrationError> {
        let verdict = Self::verify(definition);

        if record.has_applied() {
            let computed = match (&verdict, &record.drift_checksum) {
                (ChecksumVerdict::Mismatch { computed, .. }, _) => Some(computed.clone()),
                (ChecksumVerdict::Match, Some(drift)) => Some(drift.clone()),
                (ChecksumVerdict::Match, None) => None,
            };
            return match computed {
                Some(computed) => Err(MigrationError::ChecksumDrift {
                    migration_id: definition.id.clone(),
                    stored: definition.checksum.clone(),
                    computed,
                }),
                None => Ok(ChecksumGate::Verified),
            };
        }

        match verdict {
            ChecksumVerdict::Match => Ok(ChecksumGate::Verified),
            ChecksumVerdict::Mismatch { stored, computed } => Ok(ChecksumGate::Updated {
                previous: stored,
                current: computed,
            }),
        }
    }
}
