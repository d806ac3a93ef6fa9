//! Migration model for Berqenas.
//!
//! This module holds the data the engine reasons about:
//! - Immutable definitions and their content checksums
//! - Execution records and the lifecycle state machine
//! - Deterministic dependency ordering
//! - Listing filters and outcome reports
//!
//! # Lifecycle
//!
//! | From | To | Trigger |
//! |------|----|---------|
//! | Pending | Running | batch or single run |
//! | Running | Completed / Failed | executor outcome or timeout |
//! | Completed | RollingBack | rollback |
//! | RollingBack | RolledBack / Completed | down executor outcome |
//! | Failed, RolledBack | Pending | re-queue |
//! | any | Obsolete | removal |

pub mod checksum;
pub mod definition;
pub mod error;
pub mod filter;
pub mod report;
pub mod resolver;
pub mod state;

pub use checksum::{ChecksumGate, ChecksumVerdict, ChecksumVerifier};
pub use definition::{Direction, MigrationDefinition};
pub use error::{ErrorKind, MigrationError};
pub use filter::{MigrationFilter, MigrationStats, MigrationView, SortKey, SortOrder};
pub use report::{
    EngineWarning, MigrationOutcome, OutcomeStatus, RecoveredMigration, Registration, RunReport,
    SyncReport,
};
pub use resolver::DependencyResolver;
pub use state::{Attempt, AttemptEntry, AttemptOutcome, ExecutionRecord, MigrationStatus};
