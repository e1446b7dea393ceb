use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use equity_pipeline::database::FilingArchive;
use equity_pipeline::import::import_companies;
use equity_pipeline::{build_enrichers, CancelToken, Config, EnrichmentPipeline, PipelineOptions, SqliteCompanyStore};

#[derive(Parser)]
#[command(author, version, about = "Enrich listed companies from market, SEC and LLM providers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the enrichment pipeline over the company table
    Run {
        /// Only process the first N companies
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Seed or refresh the company table from a CSV file with a Ticker column
    Import {
        csv: PathBuf,
    },
    /// Create the database schema and exit
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("equity_pipeline=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let store = SqliteCompanyStore::connect(&config.database_url)
        .await
        .context("Failed to open company datastore")?
        .with_page_size(config.batch_size);

    match cli.command {
        Commands::InitDb => {
            info!("✅ Database initialized at {}", config.database_url);
        }
        Commands::Import { csv } => {
            let imported = import_companies(&store, &csv).await?;
            info!("✅ Imported {} companies from {}", imported, csv.display());
        }
        Commands::Run { limit } => {
            let store = Arc::new(store);
            let archive: Arc<dyn FilingArchive> = store.clone();
            let enrichers = build_enrichers(&config, archive).context("Failed to configure enrichers")?;

            let cancel = CancelToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Ctrl-C received, finishing in-flight companies");
                        cancel.cancel();
                    }
                }
            });

            let pipeline = EnrichmentPipeline::new(store, enrichers, PipelineOptions::from(&config));
            let summary = pipeline.run(limit, Some(cancel)).await?;

            info!(
                "📊 {} enriched, {} failed, {} enricher errors, {} rows written in {} flushes",
                summary.enriched_companies,
                summary.failed_companies,
                summary.enricher_failures,
                summary.rows_written,
                summary.flushes
            );
        }
    }

    Ok(())
}
