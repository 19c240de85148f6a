mod catalog;
mod config;
mod error;
mod gallery;
mod scraper;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::catalog::Catalog;
use crate::config::{Overrides, Settings};
use crate::gallery::{ChromeBrowser, GalleryWalker, HttpFetcher};
use crate::scraper::{FetchOptions, FetchSummary};

#[derive(Parser)]
#[command(
    name = "gallery_scraper",
    about = "Download full-resolution product gallery images and link them into the catalog"
)]
struct Cli {
    /// Settings file (default: ./gallery.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Catalog file, overriding the configured one
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Image root directory, overriding the configured one
    #[arg(long, global = true)]
    images: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List product identifiers found in the catalog
    Ids,
    /// Walk product galleries and save full-resolution images
    Fetch {
        #[command(flatten)]
        select: SelectArgs,
    },
    /// Rewrite the catalog with published image URLs
    Update {
        /// Write here instead of overwriting the catalog
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fetch + update in one go
    Run {
        #[command(flatten)]
        select: SelectArgs,
    },
}

#[derive(clap::Args)]
struct SelectArgs {
    /// Max products to walk
    #[arg(short = 'n', long)]
    limit: Option<usize>,
    /// Only walk these identifiers (repeatable)
    #[arg(long)]
    only: Vec<String>,
    /// Skip products whose directory already holds images
    #[arg(long)]
    skip_existing: bool,
}

impl From<SelectArgs> for FetchOptions {
    fn from(args: SelectArgs) -> Self {
        FetchOptions {
            limit: args.limit,
            only: args.only,
            skip_existing: args.skip_existing,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let settings = Settings::load(
        cli.config.as_deref(),
        Overrides {
            catalog_path: cli.catalog,
            image_root: cli.images,
        },
    )
    .context("Failed to load settings")?;

    let result = match cli.command {
        Commands::Ids => {
            let catalog = read_catalog(&settings)?;
            let ids = catalog.identifiers();
            for id in &ids {
                println!("{}", id);
            }
            println!("\n{} products in {}", ids.len(), catalog.path.display());
            Ok(())
        }
        Commands::Fetch { select } => fetch(&settings, select.into()).await.map(|_| ()),
        Commands::Update { output } => update(&settings, output),
        Commands::Run { select } => {
            fetch(&settings, select.into()).await?;
            update(&settings, None)
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn read_catalog(settings: &Settings) -> anyhow::Result<Catalog> {
    Catalog::read(&settings.catalog_path, settings)
        .with_context(|| format!("Failed to read catalog {}", settings.catalog_path.display()))
}

async fn fetch(settings: &Settings, options: FetchOptions) -> anyhow::Result<FetchSummary> {
    let catalog = read_catalog(settings)?;
    let ids = catalog.identifiers();
    println!("Found {} products in {}", ids.len(), catalog.path.display());

    let (products, skipped) = scraper::select_products(settings, ids, &options);
    if products.is_empty() {
        println!("Nothing to fetch.");
        return Ok(FetchSummary {
            skipped,
            ..FetchSummary::default()
        });
    }

    let client = reqwest::Client::builder()
        .user_agent(concat!("gallery_scraper/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;
    let walker = GalleryWalker::new(
        settings,
        ChromeBrowser::from_settings(settings),
        HttpFetcher::new(client),
    );
    let mut summary = scraper::fetch_catalog(&walker, &products).await;
    summary.skipped = skipped;

    println!(
        "Done: {} products ({} skipped), {} images saved.",
        summary.products, summary.skipped, summary.images
    );
    println!(
        "Galleries exhausted: {}, repeated: {}, navigation errors: {}, download errors: {}, not started: {}",
        summary.exhausted,
        summary.duplicates,
        summary.navigation_errors,
        summary.download_errors,
        summary.setup_errors
    );
    Ok(summary)
}

fn update(settings: &Settings, output: Option<PathBuf>) -> anyhow::Result<()> {
    let input = &settings.catalog_path;
    let output = output.unwrap_or_else(|| input.clone());
    let summary = catalog::update_catalog(settings, input, &output)
        .with_context(|| format!("Failed to update catalog {}", input.display()))?;
    println!(
        "Updated {}: {} rows, {} with images, {} URLs.",
        output.display(),
        summary.rows,
        summary.with_images,
        summary.urls
    );
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
