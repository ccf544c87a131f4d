//! infoscience-import - Infoscience import core
//!
//! Merges harvested source records into deduplicated publications, reconciles
//! EPFL authors against the directory and attaches open-access data.
//!
//! ## Usage
//!
//! ```bash
//! infoscience-import run scopus.jsonl wos.jsonl openalex.jsonl
//! infoscience-import dedup scopus.jsonl --catalog-snapshot items.csv
//! infoscience-import authors --from output/20250101_120000_dedup --until lookup
//! infoscience-import enrich --from output/20250101_120000_dedup
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use infoscience_import::authors::Stage;
use infoscience_import::catalog::{Catalog, CatalogSnapshot, DspaceCatalog};
use infoscience_import::config::PipelineConfig;
use infoscience_import::directory::{CachedDirectory, EpflDirectoryClient};
use infoscience_import::enrich::CachedOaService;
use infoscience_import::pipeline::ImportPipeline;
use infoscience_import::report::RunSummary;
use infoscience_import::unpaywall::UnpaywallClient;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Infoscience import core: dedup, author reconciliation, OA enrichment
#[derive(Parser)]
#[command(name = "infoscience-import")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// TOML configuration file (built-in defaults otherwise)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Parent directory of the timestamped run folders
    #[arg(short, long, global = true, default_value = "./output")]
    output: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CatalogArgs {
    /// CSV export of existing items (ref_id,doi,title,pubyear) instead of
    /// querying the live catalog
    #[arg(long)]
    catalog_snapshot: Option<PathBuf>,
}

#[derive(Args)]
struct DirectoryArgs {
    /// EPFL API user
    #[arg(long, env = "API_EPFL_USER")]
    epfl_user: Option<String>,

    /// EPFL API password
    #[arg(long, env = "API_EPFL_PWD", hide_env_values = true)]
    epfl_password: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Full pipeline: dedup, authors, OA enrichment
    Run {
        /// Source record files (JSON Lines)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        catalog: CatalogArgs,

        #[command(flatten)]
        directory: DirectoryArgs,
    },

    /// Merge sources and drop publications already in the catalog
    Dedup {
        /// Source record files (JSON Lines)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// Reconcile authors of a dedup checkpoint
    Authors {
        /// Run folder holding Publications.csv and Authors.csv
        #[arg(long)]
        from: PathBuf,

        /// Last stage to run
        #[arg(long, default_value = "units", value_parser = ["flag", "filter", "clean", "lookup", "units"])]
        until: String,

        #[command(flatten)]
        directory: DirectoryArgs,
    },

    /// Open-access enrichment of a dedup checkpoint
    Enrich {
        /// Run folder holding Publications.csv and Authors.csv
        #[arg(long)]
        from: PathBuf,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let summary = match cli.command {
        Commands::Run {
            inputs,
            catalog,
            directory,
        } => {
            let folder = run_folder(&cli.output, "run")?;
            run_full(config, folder, &inputs, &catalog, directory).await?
        }
        Commands::Dedup { inputs, catalog } => {
            let folder = run_folder(&cli.output, "dedup")?;
            run_dedup(config, folder, &inputs, &catalog).await?
        }
        Commands::Authors { from, until, directory } => {
            let until: Stage = until.parse()?;
            let folder = run_folder(&cli.output, "authors")?;
            run_authors(config, folder, &from, until, directory).await?
        }
        Commands::Enrich { from } => {
            let folder = run_folder(&cli.output, "enrich")?;
            run_enrich(config, folder, &from).await?
        }
    };

    print_summary(&summary);
    Ok(())
}

fn run_folder(output_dir: &Path, command: &str) -> Result<PathBuf> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let folder = output_dir.join(format!("{}_{}", timestamp, command));
    std::fs::create_dir_all(&folder).context("Failed to create output directory")?;
    println!("Output folder: {}", folder.display());
    Ok(folder)
}

// ============================================================================
// Collaborators
// ============================================================================

fn build_catalog(config: &PipelineConfig, args: &CatalogArgs) -> Result<Box<dyn Catalog>> {
    match &args.catalog_snapshot {
        Some(path) => {
            let snapshot = CatalogSnapshot::from_csv_path(path)
                .with_context(|| format!("Failed to load catalog snapshot {}", path.display()))?;
            Ok(Box::new(snapshot))
        }
        None => {
            info!(base_url = %config.catalog.base_url, "Using live catalog");
            Ok(Box::new(DspaceCatalog::new(&config.catalog)?))
        }
    }
}

fn build_directory(config: &PipelineConfig, args: DirectoryArgs) -> Result<CachedDirectory<EpflDirectoryClient>> {
    if args.epfl_user.is_none() {
        warn!("No EPFL API credentials, directory lookups may be refused");
    }
    let client = EpflDirectoryClient::new(&config.directory, args.epfl_user, args.epfl_password)?;
    Ok(CachedDirectory::new(client))
}

fn build_oa_service(config: &PipelineConfig) -> Result<CachedOaService<UnpaywallClient>> {
    Ok(CachedOaService::new(UnpaywallClient::new(&config.open_access)?))
}

// ============================================================================
// Commands
// ============================================================================

async fn run_full(
    config: PipelineConfig,
    folder: PathBuf,
    inputs: &[PathBuf],
    catalog_args: &CatalogArgs,
    directory_args: DirectoryArgs,
) -> Result<RunSummary> {
    let catalog = build_catalog(&config, catalog_args)?;
    let directory = build_directory(&config, directory_args)?;
    let oa_service = build_oa_service(&config)?;
    let mut pipeline = ImportPipeline::new(config, folder)?;

    println!("\n--- Stage 1: Deduplication ---");
    let result = pipeline.dedup(inputs, catalog.as_ref()).await.context("Dedup failed")?;
    println!(
        "{} publications kept, {} rejected",
        result.canonical.len(),
        result.rejected.len()
    );

    println!("\n--- Stage 2: Author Reconciliation ---");
    pipeline
        .authors(&result.canonical, &directory, Stage::Units)
        .await
        .context("Author reconciliation failed")?;
    directory.log_stats();

    println!("\n--- Stage 3: Open Access Enrichment ---");
    pipeline
        .enrich(&result.canonical, &oa_service)
        .await
        .context("OA enrichment failed")?;

    Ok(pipeline.finish()?)
}

async fn run_dedup(
    config: PipelineConfig,
    folder: PathBuf,
    inputs: &[PathBuf],
    catalog_args: &CatalogArgs,
) -> Result<RunSummary> {
    let catalog = build_catalog(&config, catalog_args)?;
    let mut pipeline = ImportPipeline::new(config, folder)?;
    let result = pipeline.dedup(inputs, catalog.as_ref()).await.context("Dedup failed")?;
    println!(
        "{} publications kept, {} rejected",
        result.canonical.len(),
        result.rejected.len()
    );
    Ok(pipeline.finish()?)
}

async fn run_authors(
    config: PipelineConfig,
    folder: PathBuf,
    from: &Path,
    until: Stage,
    directory_args: DirectoryArgs,
) -> Result<RunSummary> {
    let directory = build_directory(&config, directory_args)?;
    let mut pipeline = ImportPipeline::new(config, folder)?;
    let canonical = pipeline
        .load_checkpoint(from)
        .with_context(|| format!("Failed to read checkpoint from {}", from.display()))?;

    println!("Reconciling authors up to stage '{}'", until);
    pipeline
        .authors(&canonical, &directory, until)
        .await
        .context("Author reconciliation failed")?;
    directory.log_stats();
    Ok(pipeline.finish()?)
}

async fn run_enrich(config: PipelineConfig, folder: PathBuf, from: &Path) -> Result<RunSummary> {
    let oa_service = build_oa_service(&config)?;
    let mut pipeline = ImportPipeline::new(config, folder)?;
    let canonical = pipeline
        .load_checkpoint(from)
        .with_context(|| format!("Failed to read checkpoint from {}", from.display()))?;

    pipeline
        .enrich(&canonical, &oa_service)
        .await
        .context("OA enrichment failed")?;
    Ok(pipeline.finish()?)
}

fn print_summary(summary: &RunSummary) {
    println!("\n--- Summary ---");
    if let Some(dedup) = &summary.dedup {
        println!("Input records: {:?}", dedup.input_records);
        if !dedup.excluded_records.is_empty() {
            println!("Excluded records: {:?}", dedup.excluded_records);
        }
        println!("Canonical publications: {}", dedup.canonical);
        println!("Rejected: {:?}", dedup.rejected);
        println!("Catalog errors: {}", dedup.catalog_errors);
    }
    if let Some(authors) = &summary.authors {
        println!(
            "Authors: {} total, {} EPFL, {} resolved, {} with unit",
            authors.total,
            authors.epfl,
            authors.resolved(),
            authors.with_unit
        );
    }
    if let Some(oa) = &summary.open_access {
        println!("Open access: {:?}, {} with full text", oa.outcomes, oa.with_fulltext);
    }
}
