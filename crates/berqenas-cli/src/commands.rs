//! Subcommand definitions and their execution against the engine.

use std::path::PathBuf;

use berqenas_core::{
    AttemptOutcome, Direction, DirectorySource, HistoryQuery, MigrationEngine, MigrationError,
    MigrationFilter, MigrationStatus, SortKey, SortOrder,
};
use clap::Subcommand;

use crate::formatter::Formatter;

/// Operator commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register every migration in a directory and obsolete removed ones
    Sync {
        /// Directory of `<version>_<name>.up.sql` / `.down.sql` files
        dir: PathBuf,
        /// Database the directory targets
        #[arg(short, long)]
        database: String,
    },

    /// List migrations
    List {
        #[arg(short, long)]
        database: Option<String>,
        #[arg(long)]
        status: Option<MigrationStatus>,
        #[arg(long = "type")]
        direction: Option<Direction>,
        /// Case-insensitive text in name or description
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "createdAt")]
        sort: SortKey,
        #[arg(long, default_value = "desc")]
        order: SortOrder,
    },

    /// Show one migration with its body
    Show { id: String },

    /// Apply pending migrations of a database, or a single migration
    Run {
        /// Database whose pending migrations are applied
        #[arg(required_unless_present = "migration")]
        database: Option<String>,
        /// Apply only this migration
        #[arg(short, long, conflicts_with = "database")]
        migration: Option<String>,
    },

    /// Reverse a completed migration with its down migration
    Rollback { id: String },

    /// Return a failed or rolled-back migration to pending
    Requeue { id: String },

    /// Remove a migration from scheduling, keeping its history
    Obsolete { id: String },

    /// Close attempts left open by a crashed run
    Recover { database: String },

    /// Show the attempt ledger
    History {
        /// Only this migration
        id: Option<String>,
        #[arg(short, long)]
        database: Option<String>,
        #[arg(long)]
        outcome: Option<AttemptOutcome>,
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },

    /// Count migrations by status
    Stats {
        #[arg(short, long)]
        database: Option<String>,
    },
}

/// Rendered command output.
#[derive(Debug)]
pub struct Output {
    /// Text to print.
    pub text: String,
    /// Whether the command fully succeeded.
    pub success: bool,
}

impl Output {
    fn ok(text: String) -> Self {
        Self {
            text,
            success: true,
        }
    }
}

/// Execute `command`, rendering its result with `formatter`.
pub async fn execute(
    engine: &MigrationEngine,
    command: Command,
    formatter: &dyn Formatter,
) -> Result<Output, MigrationError> {
    let output = match command {
        Command::Sync { dir, database } => {
            let source = DirectorySource::new(dir, database);
            let report = engine.sync(&source)?;
            Output {
                text: formatter.format_sync(&report),
                success: report.warnings.is_empty(),
            }
        }

        Command::List {
            database,
            status,
            direction,
            search,
            sort,
            order,
        } => {
            let mut filter = MigrationFilter::new().sorted_by(sort, order);
            filter.database = database;
            filter.status = status;
            filter.direction = direction;
            filter.search = search;
            Output::ok(formatter.format_migrations(&engine.list(&filter)?))
        }

        Command::Show { id } => Output::ok(formatter.format_migration(&engine.get(&id)?)),

        Command::Run {
            migration: Some(id),
            ..
        } => {
            let report = engine.run_migration(&id).await?;
            Output {
                text: formatter.format_run_report(&report),
                success: report.is_clean(),
            }
        }

        Command::Run {
            database: Some(database),
            ..
        } => {
            let report = engine.run_pending(&database).await?;
            Output {
                text: formatter.format_run_report(&report),
                success: report.is_clean(),
            }
        }

        Command::Run { .. } => {
            return Err(MigrationError::InvalidDefinition {
                message: "run needs a database or --migration".to_string(),
            })
        }

        Command::Rollback { id } => {
            let outcome = engine.rollback(&id).await?;
            Output {
                text: formatter.format_outcome(&outcome),
                success: outcome.is_success(),
            }
        }

        Command::Requeue { id } => Output::ok(formatter.format_record(&engine.requeue(&id)?)),

        Command::Obsolete { id } => {
            let message = if engine.mark_obsolete(&id)? {
                format!("{id} marked obsolete")
            } else {
                format!("{id} was already obsolete")
            };
            Output::ok(formatter.format_message(&message))
        }

        Command::Recover { database } => {
            Output::ok(formatter.format_recovered(&engine.recover(&database)?))
        }

        Command::History {
            id,
            database,
            outcome,
            limit,
        } => {
            let mut query = match id {
                Some(id) => HistoryQuery::for_migration(id),
                None => HistoryQuery::new(),
            };
            if let Some(database) = database {
                query = query.database(database);
            }
            if let Some(outcome) = outcome {
                query = query.outcome(outcome);
            }
            let entries = engine.history(&query.limit(limit))?;
            Output::ok(formatter.format_history(&entries))
        }

        Command::Stats { database } => {
            Output::ok(formatter.format_stats(&engine.stats(database.as_deref())?))
        }
    };

    engine.flush()?;
    Ok(output)
}
