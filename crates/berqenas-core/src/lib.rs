//! Berqenas Core - schema migration engine.
//!
//! Registers migration definitions, orders them by dependency, guards them
//! with content checksums, and drives their execution and rollback through
//! a durable, compare-and-swap state store.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod migration;
pub mod registry;
pub mod store;

pub use config::EngineConfig;
pub use coordinator::{
    CommandExecutor, DryRunExecutor, ExecutionError, ExecutionRequest, MigrationCoordinator,
    RunLocks, StatementExecutor,
};
pub use engine::MigrationEngine;
pub use error::Error;
pub use migration::{
    Attempt, AttemptEntry, AttemptOutcome, ChecksumVerdict, ChecksumVerifier, DependencyResolver,
    Direction, EngineWarning, ErrorKind, ExecutionRecord, MigrationDefinition, MigrationError,
    MigrationFilter, MigrationOutcome, MigrationStats, MigrationStatus, MigrationView,
    OutcomeStatus, RecoveredMigration, Registration, RunReport, SortKey, SortOrder, SyncReport,
};
pub use registry::{DirectorySource, MigrationRegistry, MigrationSource, StaticSource};
pub use store::{HistoryQuery, MemoryStateStore, SledStateStore, StateStore};
