//! CLI binary for marctab.
//!
//! Parses the invocation surface, initializes tracing, starts a
//! current-thread runtime, and runs one update. A SIGINT/SIGTERM handler
//! drops the working tables over a fresh connection and exits with
//! status 130.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use marctab::pipeline::{RunOptions, run};
use marctab::{PgClient, schema};
use marctab_config::{Locations, PgConnectionConfig, load_ldp1, load_metadb};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{Level, error};
use tracing_subscriber::FmtSubscriber;

/// Exit status used for cancellation by signal.
const EXIT_SIGNAL: u8 = 130;

/// marctab - transforms SRS MARC records into a tabular form.
#[derive(Parser, Debug)]
#[command(name = "marctab")]
#[command(about = "Transforms SRS MARC records into a tabular form", version)]
struct Args {
    /// Data directory holding the datasource descriptor and temporary files
    #[arg(short = 'D', long)]
    datadir: PathBuf,

    /// Database user to be granted select privileges (repeatable)
    #[arg(short = 'u', long = "user")]
    users: Vec<String>,

    /// Perform a full update even if an incremental update is available
    #[arg(short = 'f', long)]
    full_update: bool,

    /// Create a trigram index on the content column (requires pg_trgm)
    #[arg(long)]
    trigram_index: bool,

    /// Disable creation of indexes
    #[arg(long)]
    no_indexes: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Write output to a CSV file instead of the database
    #[arg(long)]
    csv_file: Option<PathBuf>,

    /// Name of the table containing SRS records to read
    #[arg(long)]
    srs_records: Option<String>,

    /// Name of the table containing SRS MARC (JSON) data to read
    #[arg(long)]
    srs_marc: Option<String>,

    /// Name of the column containing MARC JSON data
    #[arg(long)]
    srs_marc_attr: Option<String>,

    /// Use the Metadb datasource descriptor and table names
    #[arg(long)]
    metadb: bool,

    /// Skip vacuuming after the update
    #[arg(long)]
    no_vacuum: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("starting runtime: {err}");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> ExitCode {
    let loaded = if args.metadb {
        load_metadb(&args.datadir)
    } else {
        load_ldp1(&args.datadir)
    };
    let conn = match loaded {
        Ok(conn) => conn,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let loc = Locations::new(args.metadb, args.srs_records, args.srs_marc, args.srs_marc_attr);

    spawn_signal_handler(conn.clone());

    let opts = RunOptions {
        datadir: args.datadir,
        users: args.users,
        full_update: args.full_update,
        trigram_index: args.trigram_index,
        no_indexes: args.no_indexes,
        csv_file: args.csv_file,
        vacuum: !args.no_vacuum,
    };
    match run(&opts, &conn, &loc).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

/// Installs the cancellation handler. On SIGINT or SIGTERM it drops the
/// working tables over a fresh connection and exits with status 130; the
/// previously published table stays intact.
fn spawn_signal_handler(conn: PgConnectionConfig) {
    tokio::spawn(async move {
        let Ok(mut interrupt) = signal(SignalKind::interrupt()) else {
            return;
        };
        let Ok(mut terminate) = signal(SignalKind::terminate()) else {
            return;
        };
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        eprintln!("\nmarctab: canceling due to user request");
        eprintln!("marctab: cleaning up temporary tables");
        if let Ok(client) = PgClient::connect(&conn).await {
            let _ = schema::drop_working_tables(&client).await;
        }
        std::process::exit(EXIT_SIGNAL.into());
    });
}
