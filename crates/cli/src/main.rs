use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use metadb_cli::{run_ingest, IngestConfig};

#[derive(Parser)]
#[command(name = "metadb", version, about = "metadb command line utilities")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Enable detailed logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute newline-delimited JSON change commands from a file.
    Ingest(IngestArgs),
    /// Print the metadb version.
    Version,
}

#[derive(Args)]
struct IngestArgs {
    /// File of newline-delimited JSON change commands.
    source_file: PathBuf,
    /// Database connection string (postgres://…).
    #[arg(long)]
    dsn: String,
    /// Name identifying the upstream source.
    #[arg(long, default_value = "main")]
    source: String,
    /// Record identity hits for resynchronization.
    #[arg(long)]
    resync: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    match cli.command {
        Commands::Ingest(args) => {
            let summary = run_ingest(IngestConfig {
                source_file: args.source_file,
                dsn: args.dsn,
                source: args.source,
                resync: args.resync,
            })
            .await?;
            println!("executed {} commands", summary.commands);
        }
        Commands::Version => {
            println!("metadb version {}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
