//! Gateway configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use berqenas_core::{CommandExecutor, DryRunExecutor, EngineConfig, StatementExecutor};
use clap::Parser;

/// Berqenas migration gateway command line arguments.
#[derive(Debug, Parser)]
#[command(name = "berqenas-gateway")]
#[command(about = "HTTP/JSON gateway for the Berqenas migration engine")]
pub struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// Directory holding the migration state store.
    #[arg(short, long, default_value = "./berqenas_data")]
    pub data_path: PathBuf,

    /// Program that executes migration bodies (body on stdin).
    #[arg(long)]
    pub exec_command: Option<PathBuf>,

    /// Argument passed to the executor program. Repeatable.
    #[arg(long = "exec-arg")]
    pub exec_args: Vec<String>,

    /// Seconds a single migration may run before it is failed.
    #[arg(long, default_value_t = 300)]
    pub timeout_secs: u64,

    /// Identity recorded on attempts.
    #[arg(long, default_value = "gateway")]
    pub actor: String,

    /// Record attempts without executing migration bodies.
    #[arg(long)]
    pub dry_run: bool,
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address to listen on for HTTP requests.
    pub listen_addr: String,
    /// Directory holding the migration state store.
    pub data_path: PathBuf,
    /// Executor program, if any.
    pub exec_command: Option<PathBuf>,
    /// Arguments for the executor program.
    pub exec_args: Vec<String>,
    /// Per-migration execution timeout.
    pub execution_timeout: Duration,
    /// Identity recorded on attempts.
    pub actor: String,
    /// Record attempts without executing migration bodies.
    pub dry_run: bool,
}

impl From<&Args> for GatewayConfig {
    fn from(args: &Args) -> Self {
        Self {
            listen_addr: args.listen.clone(),
            data_path: args.data_path.clone(),
            exec_command: args.exec_command.clone(),
            exec_args: args.exec_args.clone(),
            execution_timeout: Duration::from_secs(args.timeout_secs),
            actor: args.actor.clone(),
            // Without an executor program nothing could be applied.
            dry_run: args.dry_run || args.exec_command.is_none(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            data_path: PathBuf::from("./berqenas_data"),
            exec_command: None,
            exec_args: Vec::new(),
            execution_timeout: Duration::from_secs(300),
            actor: "gateway".to_string(),
            dry_run: true,
        }
    }
}

impl GatewayConfig {
    /// Engine configuration for this gateway.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(&self.data_path)
            .with_execution_timeout(self.execution_timeout)
            .with_actor(&self.actor)
            .with_dry_run(self.dry_run)
    }

    /// Executor for migration bodies.
    pub fn executor(&self) -> Arc<dyn StatementExecutor> {
        match &self.exec_command {
            Some(program) => Arc::new(CommandExecutor::new(program).args(self.exec_args.clone())),
            None => Arc::new(DryRunExecutor),
        }
    }
}
