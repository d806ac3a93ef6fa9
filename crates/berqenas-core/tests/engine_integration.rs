//! Integration tests for the migration engine.

use async_trait::async_trait;
use berqenas_core::migration::{
    Attempt, AttemptOutcome, Direction, ErrorKind, MigrationDefinition, MigrationError,
    MigrationStatus, OutcomeStatus, Registration,
};
use berqenas_core::store::{HistoryQuery, SledStateStore, StateStore};
use berqenas_core::{
    DependencyResolver, DirectorySource, EngineConfig, ExecutionError, ExecutionRequest,
    MigrationEngine, MigrationFilter, StatementExecutor,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Executor that fails bodies containing `FAIL` and sleeps on `SLOW`.
#[derive(Default)]
struct ScriptedExecutor {
    calls: Mutex<Vec<(String, Direction)>>,
    bodies: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    fn calls(&self) -> Vec<(String, Direction)> {
        self.calls.lock().clone()
    }

    fn up_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(_, d)| *d == Direction::Up)
            .map(|(id, _)| id)
            .collect()
    }

    fn body_ran(&self, id: &str) -> Option<String> {
        self.bodies
            .lock()
            .iter()
            .rev()
            .find(|(ran, _)| ran == id)
            .map(|(_, body)| body.clone())
    }
}

#[async_trait]
impl StatementExecutor for ScriptedExecutor {
    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<(), ExecutionError> {
        self.calls
            .lock()
            .push((request.migration_id.to_string(), request.direction));
        self.bodies
            .lock()
            .push((request.migration_id.to_string(), request.body.to_string()));
        if request.body.contains("SLOW") {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        if request.body.contains("FAIL") {
            return Err(ExecutionError::new("syntax error near FAIL"));
        }
        Ok(())
    }
}

struct TestContext {
    engine: Arc<MigrationEngine>,
    executor: Arc<ScriptedExecutor>,
    store: Arc<SledStateStore>,
    _db: sled::Db,
}

impl TestContext {
    fn new() -> Self {
        Self::with_config(EngineConfig::temporary())
    }

    fn with_config(config: EngineConfig) -> Self {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let store = Arc::new(SledStateStore::open(&db).unwrap());
        let executor = Arc::new(ScriptedExecutor::default());
        let engine = MigrationEngine::with_store(config, store.clone(), executor.clone());
        Self {
            engine: Arc::new(engine),
            executor,
            store,
            _db: db,
        }
    }

    fn register(&self, definition: MigrationDefinition) -> Registration {
        self.engine.register(definition).unwrap()
    }

    fn status(&self, id: &str) -> MigrationStatus {
        self.engine.get(id).unwrap().record.status
    }
}

fn up(id: &str, version: &str, body: &str) -> MigrationDefinition {
    MigrationDefinition::new(id, version, "production", body)
}

fn down(id: &str, version: &str, body: &str) -> MigrationDefinition {
    MigrationDefinition::new(id, version, "production", body).with_direction(Direction::Down)
}

#[test]
fn test_resolver_order_is_deterministic() {
    let defs = vec![
        up("d", "004", "SELECT 4;").with_dependencies(["b", "c"]),
        up("c", "003", "SELECT 3;").with_dependency("a"),
        up("b", "002", "SELECT 2;").with_dependency("a"),
        up("a", "001", "SELECT 1;"),
        up("e", "005", "SELECT 5;"),
    ];

    let first: Vec<String> = DependencyResolver::resolve(&defs)
        .unwrap()
        .into_iter()
        .map(|d| d.id.clone())
        .collect();
    for _ in 0..10 {
        let again: Vec<String> = DependencyResolver::resolve(&defs)
            .unwrap()
            .into_iter()
            .map(|d| d.id.clone())
            .collect();
        assert_eq!(first, again);
    }

    let position = |id: &str| first.iter().position(|x| x == id).unwrap();
    assert!(position("a") < position("b"));
    assert!(position("a") < position("c"));
    assert!(position("b") < position("d"));
    assert!(position("c") < position("d"));
}

#[tokio::test]
async fn test_batch_runs_in_dependency_order() {
    let ctx = TestContext::new();
    ctx.register(up("v003", "003", "SELECT 3;").with_dependency("v002"));
    ctx.register(up("v002", "002", "SELECT 2;").with_dependency("v001"));
    ctx.register(up("v001", "001", "SELECT 1;"));

    let report = ctx.engine.run_pending("production").await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.completed_count(), 3);
    assert_eq!(ctx.executor.up_calls(), vec!["v001", "v002", "v003"]);
}

#[tokio::test]
async fn test_unknown_dependency_aborts_before_running() {
    let ctx = TestContext::new();
    ctx.register(up("v001", "001", "SELECT 1;"));
    ctx.register(up("v002", "002", "SELECT 2;").with_dependency("v999"));

    let err = ctx.engine.run_pending("production").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownDependency);
    assert!(ctx.executor.calls().is_empty());
    assert_eq!(ctx.status("v001"), MigrationStatus::Pending);
}

#[tokio::test]
async fn test_dependency_cycle_aborts_before_running() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "SELECT 1;").with_dependency("b"));
    ctx.register(up("b", "002", "SELECT 2;").with_dependency("a"));

    let err = ctx.engine.run_pending("production").await.unwrap_err();
    match err {
        MigrationError::DependencyCycle { members } => {
            assert!(members.contains(&"a".to_string()));
            assert!(members.contains(&"b".to_string()));
        }
        other => panic!("expected cycle, got {other:?}"),
    }
    assert!(ctx.executor.calls().is_empty());
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let ctx = TestContext::new();
    ctx.register(up("v001", "001", "SELECT 1;"));
    ctx.register(up("v002", "002", "SELECT 2;").with_dependency("v001"));

    ctx.engine.run_pending("production").await.unwrap();
    let revision = ctx.engine.get("v002").unwrap().record.revision;
    let attempts = ctx.store.attempt_count();

    let report = ctx.engine.run_pending("production").await.unwrap();
    assert!(report.outcomes.is_empty());
    assert_eq!(ctx.executor.up_calls().len(), 2);
    assert_eq!(ctx.store.attempt_count(), attempts);
    assert_eq!(ctx.engine.get("v002").unwrap().record.revision, revision);
}

#[tokio::test]
async fn test_concurrent_batches_on_same_database() {
    let ctx = TestContext::new();
    ctx.register(up("v001", "001", "SLOW;"));

    let (first, second) = tokio::join!(
        ctx.engine.run_pending("production"),
        ctx.engine.run_pending("production")
    );

    let results = [first, second];
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(MigrationError::EngineBusy { .. })))
        .count();
    let ran = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(busy, 1);
    assert_eq!(ran, 1);
    assert_eq!(ctx.executor.up_calls(), vec!["v001"]);
}

#[tokio::test]
async fn test_batches_on_different_databases_run_in_parallel() {
    let ctx = TestContext::new();
    ctx.register(MigrationDefinition::new("p1", "001", "production", "SLOW;"));
    ctx.register(MigrationDefinition::new("s1", "001", "staging", "SLOW;"));

    let (production, staging) = tokio::join!(
        ctx.engine.run_pending("production"),
        ctx.engine.run_pending("staging")
    );
    assert_eq!(production.unwrap().completed_count(), 1);
    assert_eq!(staging.unwrap().completed_count(), 1);
}

#[tokio::test]
async fn test_fail_fast_leaves_later_migrations_pending() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "SELECT 1;"));
    ctx.register(up("b", "002", "FAIL;").with_dependency("a"));
    ctx.register(up("c", "003", "SELECT 3;").with_dependency("b"));

    let report = ctx.engine.run_pending("production").await.unwrap();
    assert!(report.has_failures());
    assert_eq!(ctx.status("a"), MigrationStatus::Completed);
    assert_eq!(ctx.status("b"), MigrationStatus::Failed);
    assert_eq!(ctx.status("c"), MigrationStatus::Pending);

    let b = report.outcome("b").unwrap();
    assert_eq!(b.status, OutcomeStatus::Failed);
    assert_eq!(b.error_kind, Some(ErrorKind::ExecutionFailure));
    assert_eq!(
        report.outcome("c").unwrap().status,
        OutcomeStatus::NotAttempted
    );
    assert_eq!(ctx.executor.up_calls(), vec!["a", "b"]);

    let history = ctx
        .engine
        .history(&HistoryQuery::for_migration("b"))
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].attempt.outcome, Some(AttemptOutcome::Failure));
    assert_eq!(
        history[0].attempt.error_detail.as_deref(),
        Some("syntax error near FAIL")
    );
}

#[tokio::test]
async fn test_fail_fast_stops_independent_migrations_too() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "FAIL;"));
    ctx.register(up("b", "002", "SELECT 2;"));

    let report = ctx.engine.run_pending("production").await.unwrap();
    assert_eq!(ctx.status("a"), MigrationStatus::Failed);
    assert_eq!(ctx.status("b"), MigrationStatus::Pending);
    assert_eq!(
        report.outcome("b").unwrap().status,
        OutcomeStatus::NotAttempted
    );
}

#[tokio::test]
async fn test_requeue_after_failure() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "FAIL;"));
    ctx.engine.run_pending("production").await.unwrap();

    let err = ctx.engine.run_migration("a").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidTransition);

    // Fixing the body of a migration that never completed is allowed.
    let registration = ctx.register(up("a", "001", "SELECT 1;"));
    assert!(matches!(registration, Registration::ChecksumUpdated { .. }));

    let record = ctx.engine.requeue("a").unwrap();
    assert_eq!(record.status, MigrationStatus::Pending);

    let report = ctx.engine.run_migration("a").await.unwrap();
    assert_eq!(report.completed_count(), 1);
    assert_eq!(ctx.status("a"), MigrationStatus::Completed);
    assert_eq!(
        ctx.engine
            .history(&HistoryQuery::for_migration("a"))
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_checksum_drift_blocks_rerun() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "CREATE TABLE users (id INT);"));
    ctx.register(down("a.down", "001", "DROP TABLE users;"));
    ctx.register(up("b", "002", "SELECT 2;").with_dependency("a"));
    ctx.engine.run_migration("a").await.unwrap();

    let err = ctx
        .engine
        .register(up("a", "001", "CREATE TABLE users (id BIGINT);"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumDrift);
    assert!(ctx.engine.get("a").unwrap().record.drift_checksum.is_some());

    // Roll back and re-queue: the drifted body must still never run.
    ctx.engine.rollback("a").await.unwrap();
    ctx.engine.requeue("a").unwrap();
    for _ in 0..3 {
        let report = ctx.engine.run_pending("production").await.unwrap();
        let a = report.outcome("a").unwrap();
        assert_eq!(a.status, OutcomeStatus::Blocked);
        assert_eq!(a.error_kind, Some(ErrorKind::ChecksumDrift));
        let b = report.outcome("b").unwrap();
        assert_eq!(b.status, OutcomeStatus::Blocked);
        assert_eq!(b.error_kind, Some(ErrorKind::DependencyBlocked));
    }
    assert_eq!(ctx.status("a"), MigrationStatus::Pending);
    assert_eq!(ctx.executor.up_calls(), vec!["a"]);
}

#[tokio::test]
async fn test_drift_does_not_block_unrelated_migrations() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "SELECT 1;"));
    ctx.register(down("a.down", "001", "SELECT -1;"));
    ctx.engine.run_pending("production").await.unwrap();
    ctx.engine.register(up("a", "001", "SELECT 100;")).unwrap_err();
    ctx.engine.rollback("a").await.unwrap();
    ctx.engine.requeue("a").unwrap();

    ctx.register(up("z", "002", "SELECT 26;"));
    let report = ctx.engine.run_pending("production").await.unwrap();
    assert_eq!(report.outcome("a").unwrap().status, OutcomeStatus::Blocked);
    assert_eq!(report.outcome("z").unwrap().status, OutcomeStatus::Completed);
}

#[tokio::test]
async fn test_restoring_body_clears_drift() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "SELECT 1;"));
    ctx.engine.run_pending("production").await.unwrap();

    ctx.engine.register(up("a", "001", "SELECT 2;")).unwrap_err();
    assert!(ctx.engine.get("a").unwrap().record.drift_checksum.is_some());

    let registration = ctx.register(up("a", "001", "SELECT 1;"));
    assert!(matches!(registration, Registration::Unchanged { .. }));
    assert!(ctx.engine.get("a").unwrap().record.drift_checksum.is_none());
}

#[tokio::test]
async fn test_rollback_guard() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "CREATE TABLE a ();"));
    ctx.register(down("a.down", "001", "DROP TABLE a;"));
    ctx.register(up("b", "002", "CREATE TABLE b ();").with_dependency("a"));
    ctx.register(down("b.down", "002", "DROP TABLE b;"));
    ctx.engine.run_pending("production").await.unwrap();

    let err = ctx.engine.rollback("a").await.unwrap_err();
    match err {
        MigrationError::DependentsStillApplied { dependents, .. } => {
            assert_eq!(dependents, vec!["b"]);
        }
        other => panic!("expected DependentsStillApplied, got {other:?}"),
    }
    assert_eq!(ctx.status("a"), MigrationStatus::Completed);

    let outcome = ctx.engine.rollback("b").await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::RolledBack);
    let outcome = ctx.engine.rollback("a").await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::RolledBack);
    assert_eq!(ctx.status("a"), MigrationStatus::RolledBack);
    assert_eq!(ctx.status("b"), MigrationStatus::RolledBack);

    let downs: Vec<String> = ctx
        .executor
        .calls()
        .into_iter()
        .filter(|(_, d)| *d == Direction::Down)
        .map(|(id, _)| id)
        .collect();
    assert_eq!(downs, vec!["b.down", "a.down"]);

    let history = ctx
        .engine
        .history(&HistoryQuery::for_migration("a").action(Direction::Down))
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].attempt.outcome, Some(AttemptOutcome::Success));
}

#[tokio::test]
async fn test_rollback_without_down_migration() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "SELECT 1;"));
    ctx.engine.run_pending("production").await.unwrap();

    let err = ctx.engine.rollback("a").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingDownMigration);
    assert_eq!(ctx.status("a"), MigrationStatus::Completed);
}

#[tokio::test]
async fn test_failed_rollback_keeps_migration_completed() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "SELECT 1;"));
    ctx.register(down("a.down", "001", "FAIL;"));
    ctx.engine.run_pending("production").await.unwrap();

    let outcome = ctx.engine.rollback("a").await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(ctx.status("a"), MigrationStatus::Completed);

    let history = ctx
        .engine
        .history(&HistoryQuery::for_migration("a"))
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].attempt.action, Direction::Down);
    assert_eq!(history[1].attempt.outcome, Some(AttemptOutcome::Failure));
}

#[tokio::test]
async fn test_users_role_scenario() {
    let ctx = TestContext::new();
    ctx.register(
        up("v001", "001", "CREATE TABLE users (id INT PRIMARY KEY);")
            .with_table("users")
            .with_description("Create users table"),
    );
    ctx.register(
        up("v002", "002", "ALTER TABLE users ADD COLUMN role TEXT;")
            .with_table("users")
            .with_dependency("v001"),
    );

    let report = ctx.engine.run_pending("production").await.unwrap();
    assert_eq!(report.completed_count(), 2);
    assert_eq!(ctx.status("v001"), MigrationStatus::Completed);
    assert_eq!(ctx.status("v002"), MigrationStatus::Completed);

    let history = ctx
        .engine
        .history(&HistoryQuery::new().database("production"))
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history
        .iter()
        .all(|e| e.attempt.outcome == Some(AttemptOutcome::Success)));

    // Editing v001 after it ran is drift; it stays completed and is not re-run.
    let err = ctx
        .engine
        .register(up("v001", "001", "CREATE TABLE users (id BIGINT PRIMARY KEY);"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumDrift);

    let report = ctx.engine.run_pending("production").await.unwrap();
    assert!(report.outcomes.is_empty());
    assert_eq!(ctx.status("v001"), MigrationStatus::Completed);
    assert_eq!(ctx.executor.up_calls(), vec!["v001", "v002"]);
}

#[tokio::test]
async fn test_timeout_fails_migration() {
    let ctx = TestContext::with_config(
        EngineConfig::temporary().with_execution_timeout(Duration::from_millis(50)),
    );
    ctx.register(up("slow", "001", "SLOW;"));
    ctx.register(up("next", "002", "SELECT 2;"));

    let report = ctx.engine.run_pending("production").await.unwrap();
    let slow = report.outcome("slow").unwrap();
    assert_eq!(slow.status, OutcomeStatus::Failed);
    assert_eq!(slow.error_kind, Some(ErrorKind::ExecutionTimeout));
    assert_eq!(ctx.status("slow"), MigrationStatus::Failed);
    assert_eq!(ctx.status("next"), MigrationStatus::Pending);

    let history = ctx
        .engine
        .history(&HistoryQuery::for_migration("slow"))
        .unwrap();
    assert_eq!(history[0].attempt.error_detail.as_deref(), Some("timeout"));
    assert!(!ctx.engine.coordinator().locks().is_held("production"));
}

#[tokio::test]
async fn test_register_rejected_while_batch_runs() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "SLOW A;"));
    ctx.register(up("b", "002", "B old;"));

    let engine = ctx.engine.clone();
    let batch = tokio::spawn(async move { engine.run_pending("production").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = ctx.engine.register(up("b", "002", "B new;")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineBusy);

    let report = batch.await.unwrap().unwrap();
    assert!(report.is_clean());
    assert_eq!(ctx.executor.body_ran("b").as_deref(), Some("B old;"));

    let view = ctx.engine.get("b").unwrap();
    assert_eq!(view.definition.body, "B old;");
    assert_eq!(view.record.status, MigrationStatus::Completed);
    let history = ctx.engine.history(&HistoryQuery::for_migration("b")).unwrap();
    assert_eq!(
        history[0].attempt.observed_checksum,
        view.definition.checksum
    );

    // Once applied, the edit is drift rather than a silent no-op.
    let err = ctx.engine.register(up("b", "002", "B new;")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChecksumDrift);
}

#[tokio::test]
async fn test_definition_replaced_mid_batch_is_held_back() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "SLOW A;"));
    ctx.register(up("b", "002", "B old;"));

    let engine = ctx.engine.clone();
    let batch = tokio::spawn(async move { engine.run_pending("production").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Writing through the registry skips the run lock.
    let registration = ctx
        .engine
        .coordinator()
        .registry()
        .register(up("b", "002", "B new;"))
        .unwrap();
    assert!(matches!(registration, Registration::ChecksumUpdated { .. }));

    let report = batch.await.unwrap().unwrap();
    let b = report.outcome("b").unwrap();
    assert_eq!(b.status, OutcomeStatus::Blocked);
    assert_eq!(b.error_kind, Some(ErrorKind::StateConflict));
    assert_eq!(ctx.executor.body_ran("b"), None);
    assert_eq!(ctx.status("b"), MigrationStatus::Pending);

    let report = ctx.engine.run_pending("production").await.unwrap();
    assert!(report.is_clean());
    assert_eq!(ctx.executor.body_ran("b").as_deref(), Some("B new;"));
}

#[tokio::test]
async fn test_dependency_added_before_run_changes_order() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "SELECT 1;"));
    ctx.register(up("b", "002", "SELECT 2;"));

    let registration = ctx.register(up("a", "001", "SELECT 1;").with_dependency("b"));
    assert!(matches!(registration, Registration::Updated { .. }));

    let report = ctx.engine.run_pending("production").await.unwrap();
    assert!(report.is_clean());
    assert_eq!(ctx.executor.up_calls(), vec!["b", "a"]);
}

#[tokio::test]
async fn test_cancel_between_migrations() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "SLOW;"));
    ctx.register(up("b", "002", "SELECT 2;"));

    let engine = ctx.engine.clone();
    let batch = tokio::spawn(async move { engine.run_pending("production").await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(ctx.engine.cancel("production"));

    let report = batch.await.unwrap().unwrap();
    assert!(report.cancelled);
    assert_eq!(ctx.status("a"), MigrationStatus::Completed);
    assert_eq!(ctx.status("b"), MigrationStatus::Pending);
    let b = report.outcome("b").unwrap();
    assert_eq!(b.status, OutcomeStatus::NotAttempted);
    assert_eq!(b.error_kind, Some(ErrorKind::Cancelled));

    assert!(!ctx.engine.cancel("production"));
}

#[tokio::test]
async fn test_recover_interrupted_migrations() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "SELECT 1;"));
    ctx.register(up("b", "002", "SELECT 2;"));
    ctx.register(down("b.down", "002", "SELECT -2;"));
    ctx.engine.run_migration("b").await.unwrap();

    // Simulate a process that died mid-execution.
    let a = ctx.store.record("a").unwrap().unwrap();
    let running = a
        .begin(
            MigrationStatus::Running,
            Attempt::start(Direction::Up, "worker-1", "deadbeef"),
        )
        .unwrap();
    ctx.store.compare_and_swap(&a, &running, None).unwrap();

    let b = ctx.store.record("b").unwrap().unwrap();
    let rolling_back = b
        .begin(
            MigrationStatus::RollingBack,
            Attempt::start(Direction::Down, "worker-1", "deadbeef"),
        )
        .unwrap();
    ctx.store.compare_and_swap(&b, &rolling_back, None).unwrap();

    let recovered = ctx.engine.recover("production").unwrap();
    assert_eq!(recovered.len(), 2);
    assert_eq!(ctx.status("a"), MigrationStatus::Failed);
    assert_eq!(ctx.status("b"), MigrationStatus::Completed);
    assert!(ctx.engine.get("a").unwrap().record.in_flight.is_none());

    let history = ctx
        .engine
        .history(&HistoryQuery::for_migration("a"))
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].attempt.error_detail.as_deref(),
        Some("interrupted")
    );

    // Nothing left to recover.
    assert!(ctx.engine.recover("production").unwrap().is_empty());
    ctx.engine.requeue("a").unwrap();
    assert_eq!(ctx.status("a"), MigrationStatus::Pending);
}

#[tokio::test]
async fn test_obsolete_migrations_are_not_scheduled() {
    let ctx = TestContext::new();
    ctx.register(up("a", "001", "SELECT 1;"));
    ctx.register(up("b", "002", "SELECT 2;").with_dependency("a"));

    assert!(ctx.engine.mark_obsolete("a").unwrap());
    let report = ctx.engine.run_pending("production").await.unwrap();
    assert!(report.outcome("a").is_none());
    let b = report.outcome("b").unwrap();
    assert_eq!(b.status, OutcomeStatus::Blocked);
    assert_eq!(b.error_kind, Some(ErrorKind::DependencyBlocked));
    assert!(ctx.executor.calls().is_empty());

    let stats = ctx.engine.stats(Some("production")).unwrap();
    assert_eq!(stats.obsolete, 1);
    assert_eq!(stats.pending, 1);
}

#[tokio::test]
async fn test_directory_sync_and_run() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("001_create_users.up.sql"),
        "-- description: Create users table\n-- table: users\nCREATE TABLE users (id INT);\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("001_create_users.down.sql"),
        "DROP TABLE users;\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("002_add_role.up.sql"),
        "-- depends: 001_create_users\nALTER TABLE users ADD COLUMN role TEXT;\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("README.md"), "not a migration").unwrap();

    let ctx = TestContext::new();
    let source = DirectorySource::new(dir.path(), "production");
    let report = ctx.engine.sync(&source).unwrap();
    assert_eq!(report.registrations.len(), 3);
    assert!(report.obsoleted.is_empty());

    let listed = ctx
        .engine
        .list(&MigrationFilter::default().with_direction(Direction::Up))
        .unwrap();
    assert_eq!(listed.len(), 2);

    let run = ctx.engine.run_pending("production").await.unwrap();
    assert_eq!(run.completed_count(), 2);
    assert_eq!(
        ctx.executor.up_calls(),
        vec!["001_create_users", "002_add_role"]
    );

    // Dropping a file from the directory obsoletes its migration.
    std::fs::remove_file(dir.path().join("002_add_role.up.sql")).unwrap();
    let report = ctx.engine.sync(&source).unwrap();
    assert_eq!(report.obsoleted, vec!["002_add_role"]);
    assert_eq!(ctx.status("002_add_role"), MigrationStatus::Obsolete);

    // Syncing the unchanged directory again is a no-op.
    let report = ctx.engine.sync(&source).unwrap();
    assert!(report
        .registrations
        .iter()
        .all(|r| matches!(r, Registration::Unchanged { .. })));
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new(dir.path()).with_flush_every_ms(None);

    {
        let engine =
            MigrationEngine::open(config.clone(), Arc::new(ScriptedExecutor::default())).unwrap();
        engine.register(up("a", "001", "SELECT 1;")).unwrap();
        engine.run_pending("production").await.unwrap();
        engine.flush().unwrap();
    }

    let engine = MigrationEngine::open(config, Arc::new(ScriptedExecutor::default())).unwrap();
    assert_eq!(
        engine.get("a").unwrap().record.status,
        MigrationStatus::Completed
    );
    assert_eq!(
        engine
            .history(&HistoryQuery::for_migration("a"))
            .unwrap()
            .len(),
        1
    );
}
