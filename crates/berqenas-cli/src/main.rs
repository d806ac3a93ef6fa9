//! Berqenas Command-Line Client
//!
//! Operates the migration engine directly on its state store.

mod commands;
mod formatter;

use berqenas_core::{
    CommandExecutor, DryRunExecutor, EngineConfig, MigrationEngine, StatementExecutor,
};
use clap::Parser;
use commands::Command;
use formatter::OutputFormat;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Berqenas Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "berqenas")]
#[command(version, about = "Berqenas schema migration engine")]
pub struct Args {
    /// Directory holding the migration state store
    #[arg(long, global = true, default_value = "./berqenas_data")]
    pub data_path: PathBuf,

    /// Output format
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Program that executes migration bodies (body on stdin)
    #[arg(long, global = true)]
    pub exec_command: Option<PathBuf>,

    /// Argument passed to the executor program. Repeatable.
    #[arg(long = "exec-arg", global = true)]
    pub exec_args: Vec<String>,

    /// Seconds a single migration may run before it is failed
    #[arg(long, global = true, default_value_t = 300)]
    pub timeout_secs: u64,

    /// Identity recorded on attempts
    #[arg(long, global = true, default_value = "cli")]
    pub actor: String,

    /// Record attempts without executing migration bodies
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("berqenas_core=warn")),
        )
        .init();

    let args = Args::parse();
    let formatter = formatter::create_formatter(args.format);

    match run(args, &*formatter).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e.to_string()));
            std::process::exit(1);
        }
    }
}

/// Run the selected command. Returns whether it fully succeeded.
async fn run(
    args: Args,
    formatter: &dyn formatter::Formatter,
) -> Result<bool, Box<dyn std::error::Error>> {
    let executor: Arc<dyn StatementExecutor> = match &args.exec_command {
        Some(program) => Arc::new(CommandExecutor::new(program).args(args.exec_args.clone())),
        None => Arc::new(DryRunExecutor),
    };
    if args.exec_command.is_none() && !args.dry_run && matches!(args.command, Command::Run { .. }) {
        tracing::warn!("no --exec-command given; migrations will be recorded without executing");
    }

    let config = EngineConfig::new(&args.data_path)
        .with_execution_timeout(Duration::from_secs(args.timeout_secs))
        .with_actor(&args.actor)
        .with_dry_run(args.dry_run || args.exec_command.is_none());
    let engine = MigrationEngine::open(config, executor)?;

    let output = commands::execute(&engine, args.command, formatter).await?;
    if !output.text.is_empty() {
        println!("{}", output.text);
    }
    Ok(output.success)
}
