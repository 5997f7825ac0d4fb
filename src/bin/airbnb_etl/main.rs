//! Airbnb warehouse ETL - clean raw exports and load them into PostgreSQL

use airbnb_warehouse::config::Config;
use airbnb_warehouse::ingestion::db::Warehouse;
use airbnb_warehouse::ingestion::pipeline::{clean_all, LoadOptions, Pipeline};
use airbnb_warehouse::ingestion::FileKind;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about = "Airbnb listings, calendar and reviews warehouse loader", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Turn raw comma-delimited exports into cleaned pipe-delimited files
    Clean,
    /// Load cleaned files into the warehouse
    Load {
        /// Phase to run (listings, calendar, reviews); repeatable, defaults to all
        #[arg(long = "phase")]
        phases: Vec<FileKind>,
        /// Clear every table before loading
        #[arg(long)]
        fresh: bool,
    },
    /// Clean, then run a full load
    Run {
        #[arg(long)]
        fresh: bool,
    },
    /// Drop and recreate the warehouse schema
    Reset,
    /// Log warehouse row counts
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    config.ensure_dirs()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    match runtime.block_on(run(cli.command, &config)) {
        Ok(()) => {
            info!("🎉 Done");
            Ok(())
        }
        Err(e) => {
            error!("❌ {:#}", e);
            Err(e)
        }
    }
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Clean => {
            info!("🧹 Cleaning raw files from {:?}", config.raw_data_dir);
            let written = clean_all(config)?;
            info!("✅ {} cleaned files written to {:?}", written, config.cleaned_data_dir);
        }
        Commands::Load { phases, fresh } => {
            load(config, LoadOptions { phases, fresh }).await?;
        }
        Commands::Run { fresh } => {
            clean_all(config)?;
            load(
                config,
                LoadOptions {
                    phases: Vec::new(),
                    fresh,
                },
            )
            .await?;
        }
        Commands::Reset => {
            let mut warehouse = connect(config).await?;
            warehouse.reset_schema().await?;
            warehouse.close().await?;
        }
        Commands::Stats => {
            let mut warehouse = connect(config).await?;
            warehouse.show_statistics().await?;
            warehouse.close().await?;
        }
    }
    Ok(())
}

async fn connect(config: &Config) -> Result<Warehouse> {
    info!("📦 Connecting to database...");
    Warehouse::connect(&config.database_url)
        .await
        .context("Failed to connect to database")
}

async fn load(config: &Config, options: LoadOptions) -> Result<()> {
    let mut warehouse = connect(config).await?;

    let report = Pipeline::new(config, &mut warehouse).run(&options).await?;
    for phase in &report.phases {
        info!(
            "{}: {} files, {}",
            phase.kind,
            phase.files.len(),
            phase.totals
        );
    }
    info!("Total errors: {}", report.error_count);

    warehouse.close().await?;
    Ok(())
}
