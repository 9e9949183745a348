//! Recover command.

use super::CliError;
use crate::Format;
use serde::Serialize;
use shadowdb_core::{Config, Database, RecoveryReport};
use std::path::Path;

#[derive(Debug, Serialize)]
struct RecoverOutput {
    prime: String,
    report: RecoveryReport,
    tables: Vec<String>,
}

/// Opens an existing database, which runs recovery, and closes it cleanly.
pub fn run(path: &Path, format: Format) -> Result<(), CliError> {
    let db = Database::open_with_config(path, Config::new().create_if_missing(false))?;
    let output = RecoverOutput {
        prime: db.prime_outcome().to_string(),
        report: db.recovery_report().clone(),
        tables: db.table_names(),
    };
    db.close()?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&output)?),
        Format::Text => {
            let report = &output.report;
            println!("Recovered database at: {}", path.display());
            println!();
            println!("Startup:          {}", output.prime);
            println!("Records scanned:  {}", report.records_scanned);
            match report.replay_start {
                Some(offset) => println!("Replay start:     offset {offset}"),
                None => println!("Replay start:     beginning of log"),
            }
            println!("Redone:           {}", report.redone);
            println!("Committed:        {}", report.committed);
            println!("Undone:           {}", report.undone);
            println!("Rolled back:      {}", report.losers.len());
            for txid in &report.losers {
                println!("  - {txid}");
            }
            println!("Tables:           {}", output.tables.join(", "));
        }
    }

    Ok(())
}
