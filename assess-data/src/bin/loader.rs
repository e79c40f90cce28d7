use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use assess_data::CatalogLoader;
use assess_db_sqlite::SqliteRepository;

/// Load a reference catalog from a CSV file into the database.
///
/// The CSV's header row names the option fields (e.g. `kind,unit_value`);
/// each data row becomes one selectable option. The `--key-field` column
/// is what the editor matches picked values against, so it must be
/// non-empty and unique per row.
#[derive(Parser, Debug)]
#[command(name = "assess-data-loader")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the CSV file containing catalog options
    #[arg(short, long)]
    file: PathBuf,

    /// Catalog name to store the options under (e.g. "classifications")
    #[arg(short, long)]
    catalog: String,

    /// Column the catalog is keyed by (e.g. "sub_classification")
    #[arg(short, long)]
    key_field: String,

    /// SQLite database URL (e.g. sqlite:assessments.db?mode=rwc to create if missing)
    #[arg(short, long, default_value = "sqlite:assessments.db?mode=rwc")]
    database: String,

    /// Run database migrations before loading data
    #[arg(short, long, default_value_t = false)]
    migrate: bool,

    /// Run seed files from the specified directory after migrations
    #[arg(short, long)]
    seeds: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let repo = SqliteRepository::new(&args.database)
        .await
        .with_context(|| format!("Failed to connect to database: {}", args.database))?;

    if args.migrate {
        info!("running migrations");
        repo.run_migrations()
            .await
            .context("Failed to run migrations")?;
    }

    if let Some(seeds_dir) = &args.seeds {
        info!(dir = %seeds_dir.display(), "running seeds");
        repo.run_seeds(seeds_dir)
            .await
            .with_context(|| format!("Failed to run seeds from: {}", seeds_dir.display()))?;
    }

    let file = File::open(&args.file)
        .with_context(|| format!("Failed to open CSV file: {}", args.file.display()))?;
    let list = CatalogLoader::parse(file, &args.key_field)
        .with_context(|| format!("Failed to parse CSV file: {}", args.file.display()))?;
    let inserted = CatalogLoader::load(&repo, &args.catalog, &list)
        .await
        .with_context(|| format!("Failed to load catalog '{}'", args.catalog))?;

    info!(catalog = %args.catalog, options = inserted, "catalog loaded");
    Ok(())
}
