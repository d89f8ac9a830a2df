//! `zarrmigrate`: plan shard layouts and migrate stores off a compressor.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use zarrmigrate::codecs::AnyCodec;
use zarrmigrate::{
    Compression, LayoutRole, LocalBackend, MigrationConfig, MigrationOrchestrator,
    MigrationSummary, WriteStrategy, plan_layout,
};

#[derive(Parser, Debug)]
#[command(name = "zarrmigrate")]
#[command(about = "Shard layout planning and codec migration for Zarr V3 stores")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the chunk and shard shape planned for an array
    Plan {
        /// Array shape, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        shape: Vec<usize>,

        /// Preferred chunk shape, comma separated
        #[arg(long, value_delimiter = ',')]
        chunks: Option<Vec<usize>>,

        /// pyramid-leaf or original-dataset
        #[arg(long, default_value = "pyramid-leaf")]
        role: LayoutRole,

        /// JSON config providing shard multipliers
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Report which arrays would be migrated, without writing anything
    Inspect {
        /// Store directory
        store: PathBuf,

        /// Group to start from, relative to the store
        #[arg(long, default_value = "")]
        root: String,

        /// Compressor to look for
        #[arg(long)]
        disallowed: Option<String>,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Rewrite every array that uses the disallowed compressor
    Migrate {
        /// Store directory
        store: PathBuf,

        /// Group to start from, relative to the store
        #[arg(long, default_value = "")]
        root: String,

        #[arg(long)]
        disallowed: Option<String>,

        /// Replacement compressor, e.g. blosc-zstd, blosc-lz4, lz4, gzip
        #[arg(long)]
        replacement: Option<String>,

        /// Replacement compression level
        #[arg(long)]
        level: Option<i32>,

        /// staged or in-place
        #[arg(long)]
        strategy: Option<WriteStrategy>,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<MigrationConfig> {
    match path {
        Some(path) => MigrationConfig::load(path)
            .await
            .with_context(|| format!("reading config {}", path.display())),
        None => Ok(MigrationConfig::default()),
    }
}

async fn run_store(
    store: PathBuf,
    root: &str,
    config: &MigrationConfig,
) -> anyhow::Result<MigrationSummary> {
    anyhow::ensure!(store.is_dir(), "{} is not a directory", store.display());
    AnyCodec::from_compression(&config.replacement)
        .with_context(|| format!("unusable replacement {}", config.replacement))?;
    let backend = Arc::new(LocalBackend::new(store));
    let summary = MigrationOrchestrator::new(backend, config.migrator(), &config.disallowed)
        .with_dry_run(config.dry_run)
        .run(root)
        .await?;
    Ok(summary)
}

fn report(summary: &MigrationSummary) -> anyhow::Result<()> {
    for skipped in &summary.skipped {
        println!("skipped {}: {}", skipped.path, skipped.reason);
    }
    for record in &summary.migrated {
        println!("migrated {record}");
    }
    for failure in &summary.failed {
        println!("FAILED ({:?}) {}: {}", failure.kind, failure.path, failure.message);
    }
    println!("{summary}");
    if summary.has_destructive_failures() {
        anyhow::bail!("data was lost for at least one array, see the log above");
    }
    anyhow::ensure!(
        !summary.has_failures(),
        "{} arrays could not be migrated",
        summary.failed.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Plan {
            shape,
            chunks,
            role,
            config,
        } => {
            let config = load_config(config.as_ref()).await?;
            let layout = plan_layout(&shape, chunks.as_deref(), role, &config.multipliers);
            println!("{}", serde_json::to_string_pretty(&layout)?);
        }
        Commands::Inspect {
            store,
            root,
            disallowed,
            config,
        } => {
            let mut config = load_config(config.as_ref()).await?;
            if let Some(disallowed) = disallowed {
                config.disallowed = disallowed;
            }
            config.dry_run = true;
            report(&run_store(store, &root, &config).await?)?;
        }
        Commands::Migrate {
            store,
            root,
            disallowed,
            replacement,
            level,
            strategy,
            config,
        } => {
            let mut config = load_config(config.as_ref()).await?;
            if let Some(disallowed) = disallowed {
                config.disallowed = disallowed;
            }
            if let Some(name) = replacement {
                config.replacement = Compression::new(name, config.replacement.level);
            }
            if let Some(level) = level {
                config.replacement.level = level;
            }
            if let Some(strategy) = strategy {
                config.strategy = strategy;
            }
            report(&run_store(store, &root, &config).await?)?;
        }
    }
    Ok(())
}
