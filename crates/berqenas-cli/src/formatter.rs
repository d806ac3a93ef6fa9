//! Output formatters for engine results.

use berqenas_core::{
    AttemptEntry, ExecutionRecord, MigrationOutcome, MigrationStats, MigrationView, OutcomeStatus,
    RecoveredMigration, Registration, RunReport, SyncReport,
};
use clap::ValueEnum;
use comfy_table::{Cell, Table};
use serde::Serialize;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter: Send + Sync {
    /// Format a migration listing.
    fn format_migrations(&self, views: &[MigrationView]) -> String;

    /// Format one migration in detail.
    fn format_migration(&self, view: &MigrationView) -> String;

    /// Format the result of a batch or single run.
    fn format_run_report(&self, report: &RunReport) -> String;

    /// Format a rollback outcome.
    fn format_outcome(&self, outcome: &MigrationOutcome) -> String;

    /// Format an execution record.
    fn format_record(&self, record: &ExecutionRecord) -> String;

    /// Format attempt ledger entries.
    fn format_history(&self, entries: &[AttemptEntry]) -> String;

    /// Format a status summary.
    fn format_stats(&self, stats: &MigrationStats) -> String;

    /// Format the result of a sync.
    fn format_sync(&self, report: &SyncReport) -> String;

    /// Format recovered migrations.
    fn format_recovered(&self, recovered: &[RecoveredMigration]) -> String;

    /// Format an error message.
    fn format_error(&self, error: &str) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_migrations(&self, views: &[MigrationView]) -> String {
        if views.is_empty() {
            return "No migrations".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec![
            "id", "version", "type", "database", "status", "table", "depends on",
        ]);
        for view in views {
            let def = &view.definition;
            table.add_row(vec![
                Cell::new(&def.id),
                Cell::new(&def.version),
                Cell::new(def.direction),
                Cell::new(&def.target_database),
                Cell::new(view.record.status),
                Cell::new(def.affected_table.as_deref().unwrap_or("-")),
                Cell::new(or_dash(&def.dependencies.join(", "))),
            ]);
        }
        format!("{}\n{} migration(s)", table, views.len())
    }

    fn format_migration(&self, view: &MigrationView) -> String {
        let def = &view.definition;
        let record = &view.record;

        let mut table = Table::new();
        table.set_header(vec!["field", "value"]);
        let rows: Vec<(&str, String)> = vec![
            ("id", def.id.clone()),
            ("name", def.name.clone()),
            ("description", or_dash(&def.description)),
            ("version", def.version.clone()),
            ("type", def.direction.to_string()),
            ("database", def.target_database.clone()),
            ("table", def.affected_table.clone().unwrap_or_else(|| "-".to_string())),
            ("depends on", or_dash(&def.dependencies.join(", "))),
            ("checksum", def.checksum.clone()),
            ("status", record.status.to_string()),
            ("applied", record.applied_count.to_string()),
            (
                "drift",
                record.drift_checksum.clone().unwrap_or_else(|| "-".to_string()),
            ),
            ("created", format_timestamp(def.created_at)),
            ("updated", format_timestamp(record.updated_at)),
        ];
        for (field, value) in rows {
            table.add_row(vec![Cell::new(field), Cell::new(value)]);
        }
        format!("{}\n\n{}", table, def.body.trim_end())
    }

    fn format_run_report(&self, report: &RunReport) -> String {
        let mut output = if report.outcomes.is_empty() {
            format!("Nothing to run on {}", report.database)
        } else {
            let mut table = Table::new();
            table.set_header(vec!["migration", "result", "kind", "duration", "message"]);
            for outcome in &report.outcomes {
                table.add_row(outcome_row(outcome));
            }
            format!(
                "{}\n{} of {} migration(s) completed on {}",
                table,
                report.completed_count(),
                report.outcomes.len(),
                report.database
            )
        };

        for warning in &report.warnings {
            output.push_str(&format!(
                "\nwarning: {} {}: {}",
                warning.kind, warning.migration_id, warning.message
            ));
        }
        if report.cancelled {
            output.push_str("\nbatch cancelled");
        }
        output
    }

    fn format_outcome(&self, outcome: &MigrationOutcome) -> String {
        let mut table = Table::new();
        table.set_header(vec!["migration", "result", "kind", "duration", "message"]);
        table.add_row(outcome_row(outcome));
        table.to_string()
    }

    fn format_record(&self, record: &ExecutionRecord) -> String {
        format!("{} is now {}", record.migration_id, record.status)
    }

    fn format_history(&self, entries: &[AttemptEntry]) -> String {
        if entries.is_empty() {
            return "No attempts".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec![
            "migration", "action", "outcome", "started", "duration", "by", "error",
        ]);
        for entry in entries {
            let attempt = &entry.attempt;
            table.add_row(vec![
                Cell::new(&entry.migration_id),
                Cell::new(attempt.action),
                Cell::new(
                    attempt
                        .outcome
                        .map_or_else(|| "open".to_string(), |o| o.to_string()),
                ),
                Cell::new(format_timestamp(attempt.started_at)),
                Cell::new(format!("{}ms", attempt.duration_ms)),
                Cell::new(&attempt.executed_by),
                Cell::new(attempt.error_detail.as_deref().unwrap_or("-")),
            ]);
        }
        format!("{}\n{} attempt(s)", table, entries.len())
    }

    fn format_stats(&self, stats: &MigrationStats) -> String {
        let mut table = Table::new();
        table.set_header(vec!["status", "count"]);
        for (status, count) in [
            ("pending", stats.pending),
            ("running", stats.running),
            ("completed", stats.completed),
            ("failed", stats.failed),
            ("rolling_back", stats.rolling_back),
            ("rolled_back", stats.rolled_back),
            ("obsolete", stats.obsolete),
            ("total", stats.total),
        ] {
            table.add_row(vec![Cell::new(status), Cell::new(count)]);
        }
        table.to_string()
    }

    fn format_sync(&self, report: &SyncReport) -> String {
        let mut table = Table::new();
        table.set_header(vec!["migration", "result"]);
        for registration in &report.registrations {
            let result = match registration {
                Registration::Created { .. } => "created",
                Registration::Unchanged { .. } => "unchanged",
                Registration::ChecksumUpdated { .. } => "checksum updated",
                Registration::Updated { .. } => "updated",
            };
            table.add_row(vec![registration.id(), result]);
        }
        for id in &report.obsoleted {
            table.add_row(vec![id.as_str(), "obsolete"]);
        }

        let mut output = table.to_string();
        for warning in &report.warnings {
            output.push_str(&format!(
                "\nwarning: {} {}: {}",
                warning.kind, warning.migration_id, warning.message
            ));
        }
        output
    }

    fn format_recovered(&self, recovered: &[RecoveredMigration]) -> String {
        if recovered.is_empty() {
            return "Nothing to recover".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["migration", "from", "to"]);
        for migration in recovered {
            table.add_row(vec![
                Cell::new(&migration.migration_id),
                Cell::new(migration.from),
                Cell::new(migration.to),
            ]);
        }
        table.to_string()
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {}", error)
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_migrations(&self, views: &[MigrationView]) -> String {
        to_json(&views)
    }

    fn format_migration(&self, view: &MigrationView) -> String {
        to_json(view)
    }

    fn format_run_report(&self, report: &RunReport) -> String {
        to_json(report)
    }

    fn format_outcome(&self, outcome: &MigrationOutcome) -> String {
        to_json(outcome)
    }

    fn format_record(&self, record: &ExecutionRecord) -> String {
        to_json(record)
    }

    fn format_history(&self, entries: &[AttemptEntry]) -> String {
        to_json(&entries)
    }

    fn format_stats(&self, stats: &MigrationStats) -> String {
        to_json(stats)
    }

    fn format_sync(&self, report: &SyncReport) -> String {
        to_json(report)
    }

    fn format_recovered(&self, recovered: &[RecoveredMigration]) -> String {
        to_json(&recovered)
    }

    fn format_error(&self, error: &str) -> String {
        serde_json::json!({
            "error": error
        })
        .to_string()
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({
            "message": message
        })
        .to_string()
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| {
        serde_json::json!({
            "error": format!("failed to encode output: {e}")
        })
        .to_string()
    })
}

fn outcome_row(outcome: &MigrationOutcome) -> Vec<Cell> {
    vec![
        Cell::new(&outcome.migration_id),
        Cell::new(outcome_label(outcome.status)),
        Cell::new(outcome.error_kind.map_or("-", |k| k.as_str())),
        Cell::new(
            outcome
                .duration_ms
                .map_or_else(|| "-".to_string(), |ms| format!("{ms}ms")),
        ),
        Cell::new(outcome.message.as_deref().unwrap_or("")),
    ]
}

fn outcome_label(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Completed => "completed",
        OutcomeStatus::Failed => "failed",
        OutcomeStatus::Blocked => "blocked",
        OutcomeStatus::NotAttempted => "not attempted",
        OutcomeStatus::RolledBack => "rolled back",
    }
}

fn or_dash(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

/// Format a microsecond timestamp as seconds since the epoch.
fn format_timestamp(micros: u64) -> String {
    format!("{}.{:03}", micros / 1_000_000, (micros / 1_000) % 1_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use berqenas_core::{MigrationDefinition, MigrationOutcome};

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(1_700_000_000_123_456), "1700000000.123");
        assert_eq!(format_timestamp(0), "0.000");
    }

    #[test]
    fn test_or_dash() {
        assert_eq!(or_dash(""), "-");
        assert_eq!(or_dash("users"), "users");
    }

    #[test]
    fn test_table_run_report() {
        let mut report = RunReport::new("production");
        report.outcomes.push(MigrationOutcome::completed("v001", 12));
        let output = TableFormatter.format_run_report(&report);
        assert!(output.contains("v001"));
        assert!(output.contains("1 of 1 migration(s) completed on production"));

        let empty = TableFormatter.format_run_report(&RunReport::new("staging"));
        assert_eq!(empty, "Nothing to run on staging");
    }

    #[test]
    fn test_json_migrations() {
        let def = MigrationDefinition::new("v001", "001", "production", "SELECT 1;");
        let view = MigrationView {
            record: berqenas_core::ExecutionRecord::pending(&def),
            definition: def,
        };
        let output = JsonFormatter.format_migrations(&[view]);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed[0]["definition"]["id"], "v001");
        assert_eq!(parsed[0]["record"]["status"], "pending");
    }
}
