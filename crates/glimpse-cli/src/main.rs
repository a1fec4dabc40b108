//! Glimpse CLI - semantic image search over a precomputed embedding corpus.
//!
//! # Usage
//!
//! ```bash
//! # Search by text or by example image
//! glimpse search "a dog on a beach"
//! glimpse search --image query.jpg -n 5 --json
//!
//! # Build and persist the vector index
//! glimpse index
//!
//! # Cross-check the identifier list against the matrix and asset directory
//! glimpse check
//! ```

mod config;
mod output;
mod search;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use glimpse_core::IndexOptions;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Glimpse semantic image search.
///
/// The data directory holds `images.names.txt`, `images.fbin`, an `images/`
/// asset directory and, once built, `images.index`.
#[derive(Parser)]
#[command(name = "glimpse", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Corpus directory (default: $GLIMPSE_DATA_DIR, then platform data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// CLIP model directory (default: $GLIMPSE_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Rank every row exactly instead of using the HNSW graph
    #[arg(long, global = true)]
    exact: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Search the corpus by text or image
    Search {
        /// Text query
        #[arg(required_unless_present = "image", conflicts_with = "image")]
        text: Option<String>,

        /// Query image (JPEG or PNG)
        #[arg(long)]
        image: Option<PathBuf>,

        /// Maximum number of results to return
        #[arg(short = 'n', long, default_value_t = glimpse_core::config::RESULT_LIMIT)]
        limit: usize,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build (or restore) the vector index and persist it
    Index,
    /// Print the catalog cross-check report and matrix shape
    Check {
        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG overrides the verbosity flag
    let default_level = if cli.verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = config::data_dir(cli.data_dir.as_deref())?;
    let index_options = if cli.exact {
        IndexOptions::exact()
    } else {
        IndexOptions::default()
    };
    info!("Data directory: {}", data_dir.display());

    match cli.command {
        Command::Search {
            text,
            image,
            limit,
            json,
        } => {
            let query = match (text, image) {
                (_, Some(path)) => search::Query::Image(path),
                (Some(text), None) => search::Query::Text(text),
                (None, None) => return Err(anyhow!("Provide a text query or --image")),
            };
            let model_dir = config::model_dir(cli.model_dir.as_deref())?;

            let hits =
                search::execute_search(&query, limit, &data_dir, &model_dir, index_options).await?;

            let images_dir = data_dir.join(glimpse_core::config::IMAGES_DIRNAME);
            let label = query.label();
            let output = if json {
                output::format_json(&label, &images_dir, &hits)
            } else {
                output::format_human(&label, &images_dir, &hits)
            };
            println!("{}", output);
        }
        Command::Index => {
            let (len, origin) = search::execute_index(&data_dir, index_options).await?;
            println!("Index ready: {} vectors ({:?})", len, origin);
        }
        Command::Check { json } => {
            let corpus = search::load_corpus(&data_dir)?;
            let check = output::CheckOutput {
                rows: corpus.matrix.rows(),
                columns: corpus.matrix.columns(),
                identifiers: corpus.catalog.len(),
                report: corpus.catalog.report(),
            };

            let output = if json {
                output::format_check_json(&check)
            } else {
                output::format_check_human(&check)
            };
            println!("{}", output);

            if !check.is_consistent() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
