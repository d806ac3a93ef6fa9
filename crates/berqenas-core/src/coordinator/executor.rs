//! Execution collaborators.
//!
//! The coordinator hands migration bodies to a [`StatementExecutor`] and
//! only interprets success or failure; what the body means is up to the
//! executor.

use crate::migration::Direction;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// What to execute.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    /// Migration whose body is executed.
    pub migration_id: &'a str,
    /// Logical database targeted.
    pub target_database: &'a str,
    /// Whether this applies or reverses a change.
    pub direction: Direction,
    /// Statements to execute.
    pub body: &'a str,
}

/// Failure reported by an executor. The detail is opaque to the engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{detail}")]
pub struct ExecutionError {
    /// Executor-provided description.
    pub detail: String,
}

impl ExecutionError {
    /// Create an error with the given detail.
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Applies migration bodies to a database.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Execute `request.body`. Resolving means the change is committed.
    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<(), ExecutionError>;
}

/// Reports success without executing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl StatementExecutor for DryRunExecutor {
    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<(), ExecutionError> {
        tracing::info!(
            migration_id = request.migration_id,
            database = request.target_database,
            direction = %request.direction,
            bytes = request.body.len(),
            "dry run: skipping execution"
        );
        Ok(())
    }
}

/// Runs an external program per migration, writing the body to its stdin.
///
/// The program sees `BERQENAS_MIGRATION_ID`, `BERQENAS_DATABASE` and
/// `BERQENAS_DIRECTION` in its environment. A non-zero exit is a failure
/// whose detail is the program's stderr. The child is killed if the
/// execution future is dropped, which is how timeouts reach it.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandExecutor {
    /// Executor running `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl StatementExecutor for CommandExecutor {
    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<(), ExecutionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("BERQENAS_MIGRATION_ID", request.migration_id)
            .env("BERQENAS_DATABASE", request.target_database)
            .env("BERQENAS_DIRECTION", request.direction.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ExecutionError::new(format!("failed to spawn {}: {e}", self.program.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(request.body.as_bytes()).await {
                Ok(()) => {}
                // The program may exit without reading its input.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(ExecutionError::new(format!("failed to write body: {e}"))),
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecutionError::new(format!("failed to wait for executor: {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            Err(ExecutionError::new(format!("executor exited with {}", output.status)))
        } else {
            Err(ExecutionError::new(stderr))
        }
    }
}
