use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use tesco_macros::category::{fetch_category, force_page_size, to_product_ids};
use tesco_macros::config::ScraperConfig;
use tesco_macros::database::Database;
use tesco_macros::models::{ProductId, ProductResult};
use tesco_macros::nutrition::{Normalizer, content_hash};
use tesco_macros::product::{fetch_product, product_id_from_url, product_url};
use tesco_macros::scraper::Scraper;
use tesco_macros::{CategoryScraper, PersistingSink};

#[derive(Parser)]
#[command(name = "tesco")]
#[command(about = "Scrape grocery products and their nutrition figures")]
#[command(version)]
struct Cli {
    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape pages and persist the raw product data
    Scrape {
        #[command(subcommand)]
        target: ScrapeTarget,
    },

    /// Fetch pages and print their data without persisting it
    Get {
        #[command(subcommand)]
        target: GetTarget,
    },

    /// Compute nutrition figures for stored products whose payload changed
    Normalize,
}

#[derive(Subcommand)]
enum ScrapeTarget {
    /// Scrape every not-yet-stored product listed by a category URL
    Category {
        url: String,

        /// Number of simultaneous product requests [default: 3]
        #[arg(long)]
        concurrency: Option<usize>,

        /// Repeat on this cron schedule, e.g. "0 0 */6 * * *"
        #[arg(long)]
        every: Option<String>,
    },
}

#[derive(Subcommand)]
enum GetTarget {
    /// Print a product's normalized nutrition
    Product {
        /// Product ID or product page URL
        id: String,

        /// Print the raw payload instead
        #[arg(long)]
        raw: bool,
    },

    /// Print the product IDs a category lists
    Category {
        url: String,

        /// Print the raw category payload instead
        #[arg(long)]
        raw: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = ScraperConfig::from_env()?;
    if let Some(database) = cli.database {
        config.database_url = database;
    }
    let config = Arc::new(config);

    match cli.command {
        Commands::Scrape {
            target: ScrapeTarget::Category {
                url,
                concurrency,
                every,
            },
        } => {
            let concurrency = concurrency.unwrap_or(config.concurrency);
            scrape_category(config, url, concurrency, every).await
        }
        Commands::Get {
            target: GetTarget::Product { id, raw },
        } => get_product(&config, &id, raw).await,
        Commands::Get {
            target: GetTarget::Category { url, raw },
        } => get_category(&config, &url, raw).await,
        Commands::Normalize => normalize(&config).await,
    }
}

async fn scrape_category(
    config: Arc<ScraperConfig>,
    url: String,
    concurrency: usize,
    every: Option<String>,
) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning remaining products");
            signal.cancel();
        }
    });

    let database = Arc::new(Database::new(&config.database_url).await?);
    let fetcher = Arc::new(Scraper::new(&config)?);
    let sink = Arc::new(PersistingSink::new(database.clone(), config.source.clone()));
    let scraper = CategoryScraper::new(fetcher, database, Arc::clone(&config))
        .with_shutdown(shutdown.clone());

    // Run once immediately; a failure here is fatal
    scraper.scrape(&url, concurrency, sink.as_ref()).await?;

    let Some(schedule) = every else {
        return Ok(());
    };

    let mut sched = JobScheduler::new().await?;
    sched
        .add(Job::new_async(schedule.as_str(), move |_uuid, _l| {
            let scraper = scraper.clone();
            let sink = Arc::clone(&sink);
            let url = url.clone();
            Box::pin(async move {
                if let Err(e) = scraper.scrape(&url, concurrency, sink.as_ref()).await {
                    error!("Scheduled scrape failed: {:#}", e);
                }
            })
        })?)
        .await?;

    info!("Scheduler started - scraping on \"{}\"", schedule);
    sched.start().await?;

    shutdown.cancelled().await;
    sched.shutdown().await?;
    Ok(())
}

async fn get_product(config: &ScraperConfig, id_or_url: &str, raw: bool) -> Result<()> {
    let raw_id = if id_or_url.contains("://") {
        product_id_from_url(id_or_url)?
    } else {
        id_or_url.to_string()
    };
    let id = ProductId::parse(&raw_id)?;

    let fetcher = Scraper::new(config)?;
    let result = fetch_product(&fetcher, &config.base_url, &id)
        .await
        .with_context(|| format!("failed to get product {id}"))?;

    if raw {
        println!("{}", result.raw_json);
        return Ok(());
    }

    let product = Normalizer::new(config.source.as_str())?.normalize(&result)?;
    println!("{}", serde_json::to_string_pretty(&product)?);
    Ok(())
}

async fn get_category(config: &ScraperConfig, url: &str, raw: bool) -> Result<()> {
    let url = force_page_size(url, config.page_size)?;

    let fetcher = Scraper::new(config)?;
    let category = fetch_category(&fetcher, &url)
        .await
        .context("failed to get category")?;

    if raw {
        println!("{}", serde_json::to_string_pretty(&category)?);
        return Ok(());
    }

    for id in to_product_ids(&category)? {
        println!("{id}");
    }
    Ok(())
}

async fn normalize(config: &ScraperConfig) -> Result<()> {
    let database = Database::new(&config.database_url).await?;
    let normalizer = Normalizer::new(config.source.as_str())?;

    let stored = database.stored_products(&config.source).await?;
    let hashes = database.nutrition_hashes(&config.source).await?;

    let (mut updated, mut unchanged, mut failed) = (0, 0, 0);

    for row in stored {
        if hashes.get(&row.id) == Some(&content_hash(&row.raw)) {
            unchanged += 1;
            continue;
        }
        debug!("Normalizing {} (fetched {})", row.id, row.fetched_at);

        let product = ProductId::parse(&row.id).and_then(|id| {
            let result = ProductResult {
                url: product_url(&config.base_url, &id)?.to_string(),
                id,
                raw_json: row.raw,
            };
            normalizer.normalize(&result)
        });

        match product {
            Ok(product) => {
                database.save_nutrition(&product).await?;
                updated += 1;
            }
            Err(e) => {
                warn!("Could not normalize product {}: {}", row.id, e);
                failed += 1;
            }
        }
    }

    info!(
        "Normalized {} products ({} unchanged, {} failed)",
        updated, unchanged, failed
    );
    Ok(())
}
