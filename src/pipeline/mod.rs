//! Category scrape pipeline
//!
//! ```text
//! category URL ─► force page size ─► fetch + extract ─► product ids
//!                                                          │
//!                      store.existing_ids (one query) ◄────┘
//!                                                          │
//!            validate + dedupe ─► intake ─► N workers ─► results ─► sink
//! ```
//!
//! Anything failing before the fan-out aborts the scrape. Once products are
//! dispatched, a failure only costs that product: it is logged and the
//! remaining work carries on.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::category::{fetch_category, force_page_size, to_product_ids};
use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::models::{ProductId, ProductResult, ScrapeSummary};
use crate::product::fetch_product;
use crate::traits::{PageFetcher, ProductSink, ProductStore};

/// Keep the candidates not already recorded under `source`, in candidate order
///
/// The store is asked once for the whole candidate set. A failed lookup fails
/// the whole call; there are no partial answers.
pub async fn filter_unfetched(
    candidates: &[String],
    source: &str,
    store: &dyn ProductStore,
) -> Result<Vec<String>, ScrapeError> {
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let mut known = store.existing_ids(candidates, source).await?;
    known.sort_unstable();

    Ok(candidates
        .iter()
        .filter(|id| known.binary_search(*id).is_err())
        .cloned()
        .collect())
}

/// Sink writing every result to a [`ProductStore`] under one source tag
pub struct PersistingSink {
    store: Arc<dyn ProductStore>,
    source: String,
}

impl PersistingSink {
    pub fn new(store: Arc<dyn ProductStore>, source: impl Into<String>) -> Self {
        Self {
            store,
            source: source.into(),
        }
    }
}

#[async_trait]
impl ProductSink for PersistingSink {
    async fn accept(&self, result: ProductResult) -> Result<bool, ScrapeError> {
        let rows = self
            .store
            .insert(&result.id, &self.source, &result.raw_json)
            .await?;

        if rows == 0 {
            debug!("Product {} was already stored", result.id);
        } else {
            info!("Stored product {}", result.id);
        }

        Ok(rows > 0)
    }
}

enum Outcome {
    Fetched(ProductResult),
    Failed,
    Cancelled,
}

/// Scrapes category pages into a [`ProductSink`], skipping stored products
#[derive(Clone)]
pub struct CategoryScraper {
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn ProductStore>,
    config: Arc<ScraperConfig>,
    shutdown: CancellationToken,
}

impl CategoryScraper {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn ProductStore>,
        config: Arc<ScraperConfig>,
    ) -> Self {
        Self {
            fetcher,
            store,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abandon the scrape once `token` is cancelled
    ///
    /// Before dispatch this returns an empty summary. After it, no further
    /// ids are taken and in-flight fetches are dropped.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Scrape one category with `concurrency` product requests in flight
    ///
    /// Returns an error only when the category itself cannot be resolved or
    /// the store cannot be queried. Per-product failures are counted in the
    /// summary.
    pub async fn scrape(
        &self,
        category_url: &str,
        concurrency: usize,
        sink: &dyn ProductSink,
    ) -> Result<ScrapeSummary> {
        if concurrency == 0 {
            return Err(ScrapeError::Validation("concurrency must be at least 1".to_string()))
                .context("invalid concurrency");
        }

        let url = force_page_size(category_url, self.config.page_size)
            .context("invalid category URL")?;

        let (listed, unfetched) = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                info!("Scrape of {} cancelled before dispatch", url);
                return Ok(ScrapeSummary::default());
            }
            resolved = self.resolve_unfetched(&url) => resolved?,
        };

        let mut summary = ScrapeSummary {
            listed: listed.len(),
            already_known: listed.len() - unfetched.len(),
            ..ScrapeSummary::default()
        };
        info!(
            "Category lists {} products, {} not yet stored",
            summary.listed,
            unfetched.len()
        );

        let work = self.prepare(unfetched, &mut summary);
        summary.dispatched = work.len();

        self.run_workers(work, concurrency, sink, &mut summary).await;

        info!(
            "Scrape finished: {} fetched, {} stored, {} failed, {} cancelled",
            summary.fetched, summary.persisted, summary.failed, summary.cancelled
        );
        Ok(summary)
    }

    /// Listed ids, and the subset of them not yet stored
    async fn resolve_unfetched(&self, url: &Url) -> Result<(Vec<String>, Vec<String>)> {
        let listed = self
            .resolve_category(url)
            .await
            .with_context(|| format!("failed to resolve category {url}"))?;

        let unfetched = filter_unfetched(&listed, &self.config.source, self.store.as_ref())
            .await
            .context("failed to check persisted products")?;

        Ok((listed, unfetched))
    }

    async fn resolve_category(&self, url: &Url) -> Result<Vec<String>, ScrapeError> {
        let category = fetch_category(self.fetcher.as_ref(), url).await?;
        to_product_ids(&category)
    }

    /// Validate ids and drop repeats, keeping first-seen order
    fn prepare(&self, unfetched: Vec<String>, summary: &mut ScrapeSummary) -> Vec<ProductId> {
        let mut seen = HashSet::new();
        let mut work = Vec::with_capacity(unfetched.len());

        for raw in unfetched {
            match ProductId::parse(&raw) {
                Ok(id) if seen.insert(id.clone()) => work.push(id),
                Ok(id) => {
                    debug!("Product {} listed more than once", id);
                    summary.duplicates += 1;
                }
                Err(e) => {
                    warn!("Skipping listed product: {}", e);
                    summary.invalid += 1;
                }
            }
        }

        work
    }

    async fn run_workers(
        &self,
        work: Vec<ProductId>,
        concurrency: usize,
        sink: &dyn ProductSink,
        summary: &mut ScrapeSummary,
    ) {
        if work.is_empty() {
            return;
        }

        // filled up front; workers stop once it drains
        let intake = Arc::new(Mutex::new(VecDeque::from(work)));

        let (results_tx, mut results_rx) = mpsc::channel::<Outcome>(concurrency);
        let mut workers = JoinSet::new();

        for worker in 0..concurrency {
            let intake = Arc::clone(&intake);
            let results = results_tx.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let config = Arc::clone(&self.config);
            let shutdown = self.shutdown.clone();

            workers.spawn(async move {
                loop {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    let Some(id) = intake.lock().await.pop_front() else {
                        break;
                    };

                    let outcome = tokio::select! {
                        biased;
                        () = shutdown.cancelled() => Outcome::Cancelled,
                        fetched = fetch_product(fetcher.as_ref(), &config.base_url, &id) => match fetched {
                            Ok(result) => Outcome::Fetched(result),
                            Err(e) => {
                                warn!("Could not get product data for {}: {}", id, e);
                                Outcome::Failed
                            }
                        },
                    };

                    if results.send(outcome).await.is_err() {
                        break;
                    }
                }
                debug!("Worker {} finished", worker);
            });
        }
        drop(results_tx);

        // Single completion point: results reach the sink one at a time
        while let Some(outcome) = results_rx.recv().await {
            match outcome {
                Outcome::Fetched(result) => {
                    summary.fetched += 1;
                    let id = result.id.clone();
                    match sink.accept(result).await {
                        Ok(true) => summary.persisted += 1,
                        Ok(false) => {}
                        Err(e) => warn!("Failed to store product {}: {}", id, e),
                    }
                }
                Outcome::Failed => summary.failed += 1,
                Outcome::Cancelled => summary.cancelled += 1,
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("Worker task failed: {}", e);
            }
        }

        // ids never taken off the intake were abandoned by shutdown
        summary.cancelled += intake.lock().await.len();
    }
}
