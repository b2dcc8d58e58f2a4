//! Loader Service - Loads the Involves visit export into the warehouse
//!
//! Responsibilities:
//! - Read the full-base CSV export
//! - Drop all-null and constant columns, normalize null-like tokens
//! - Recreate the star schema (four dimensions + fato_coleta)
//! - Insert the distinct projection of each table, in a fixed order
//!
//! IMPORTANT: every live run REPLACES the target tables.
//! Use --dry-run to see what would be loaded without touching the warehouse.

mod config;
mod frame;
mod report;
mod tables;
mod warehouse;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info, info_span, Instrument};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use crate::config::WarehouseSettings;
use crate::frame::{clean, read_csv, Cleaned};
use crate::report::{write_report, LoadReport};
use crate::warehouse::{create_dimensions_and_fact, planned_loads, PgWarehouse};

/// Where the Involves job drops the full-base export.
const DEFAULT_CSV_PATH: &str = "C:/pipelines/involves/files/full_base_involve.csv";

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Loads the Involves CSV export into the warehouse star schema")]
struct Args {
    /// Path to the CSV export
    #[arg(long, env = "CSV_PATH", default_value = DEFAULT_CSV_PATH)]
    csv: PathBuf,

    /// Dry run - clean and project, but don't connect to the warehouse
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let args = Args::parse();
    let settings = WarehouseSettings::from_env();

    let run_id = Uuid::new_v4();
    run(&args, &settings, run_id)
        .instrument(info_span!("run", %run_id))
        .await
}

async fn run(args: &Args, settings: &WarehouseSettings, run_id: Uuid) -> Result<()> {
    let started_at = Utc::now();

    println!("=== Involves Loader ===");
    println!("CSV: {}", args.csv.display());
    println!("Mode: {}", if args.dry_run { "dry-run" } else { "live" });

    let raw = read_csv(&args.csv).await?;
    let rows_read = raw.len();
    let columns_read = raw.columns().len();
    info!(rows = rows_read, columns = columns_read, "read CSV export");

    let Cleaned { frame, dropped } = clean(raw);
    info!(
        columns_kept = frame.columns().len(),
        columns_dropped = dropped.len(),
        "dropped all-null and constant columns"
    );
    if !dropped.is_empty() {
        debug!(columns = ?dropped, "dropped columns");
    }

    let tables = if args.dry_run {
        let loads = planned_loads(&frame);

        println!("\nDry run - no warehouse connection opened");
        for load in &loads {
            println!("  {:<16} {} rows", load.table, load.rows);
        }
        loads
    } else {
        debug!(settings = ?settings, "connecting to warehouse");
        let session = PgWarehouse::connect(settings).await?;
        create_dimensions_and_fact(session, settings.schema.as_deref(), &frame).await?
    };

    let report = LoadReport {
        run_id,
        source: args.csv.clone(),
        started_at,
        finished_at: Utc::now(),
        dry_run: args.dry_run,
        rows_read,
        columns_read,
        columns_kept: frame.columns().len(),
        dropped_columns: dropped,
        tables,
    };

    if let Some(path) = &args.report {
        write_report(path, &report).await?;
        info!(path = %path.display(), "run report written");
    }

    println!("\n=== Load Complete ===");
    for load in &report.tables {
        println!("  {}: {} rows", load.table, load.rows);
    }
    println!("Rows loaded: {}", report.total_rows());
    if !args.dry_run {
        println!("Tables and data loaded into the warehouse");
    }

    Ok(())
}
