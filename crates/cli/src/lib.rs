//! metadb-cli
//!
//! File-based ingest for development and recovery: reads a stream of
//! newline-delimited JSON change commands and executes them against a
//! database, in place of a live source adapter.

#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use metadb_catalog::PgCatalog;
use metadb_core::{Command, CommandList, SyncMode};
use metadb_executor::execute_command_list;
use metadb_store::{PgStore, Store};

/// Configuration for a file ingest run.
pub struct IngestConfig {
    /// File of newline-delimited JSON change commands.
    pub source_file: PathBuf,
    /// Database connection string (postgres://…).
    pub dsn: String,
    /// Name identifying the upstream source.
    pub source: String,
    /// Record identity hits for resynchronization.
    pub resync: bool,
}

/// Summary of a completed ingest run.
pub struct IngestSummary {
    /// Number of commands executed.
    pub commands: usize,
}

/// Parses newline-delimited JSON commands. Blank lines are skipped.
pub fn read_commands(input: &str) -> Result<Vec<Command>> {
    let mut commands = Vec::new();
    for (i, line) in input.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let cmd: Command = serde_json::from_str(line)
            .with_context(|| format!("parsing command at line {}", i + 1))?;
        commands.push(cmd);
    }
    Ok(commands)
}

/// Reads the source file and executes its commands.
pub async fn run_ingest(config: IngestConfig) -> Result<IngestSummary> {
    let input = std::fs::read_to_string(&config.source_file)
        .with_context(|| format!("reading {}", config.source_file.display()))?;
    let commands = read_commands(&input)?;
    let records = commands.len();
    if records == 0 {
        return Ok(IngestSummary { commands: 0 });
    }

    let store: Arc<dyn Store> = Arc::new(
        PgStore::connect(&config.dsn)
            .await
            .context("connecting to database")?,
    );
    let catalog = PgCatalog::initialize(Arc::clone(&store))
        .await
        .context("initializing catalog")?;

    let sync_mode = if config.resync {
        SyncMode::Resync
    } else {
        SyncMode::Normal
    };
    let mut list = CommandList { cmd: commands };
    execute_command_list(&catalog, store.as_ref(), &mut list, &config.source, sync_mode)
        .await
        .context("exec command list")?;
    info!(records, source = %config.source, "ingest complete");
    Ok(IngestSummary { commands: records })
}
