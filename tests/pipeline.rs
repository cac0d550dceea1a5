//! End-to-end tests for the category scrape pipeline
//!
//! The site is replaced by an in-process page map and the store by either a
//! mock or an in-memory SQLite database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use url::Url;

use tesco_macros::database::Database;
use tesco_macros::models::{ProductId, ProductResult};
use tesco_macros::traits::{PageFetcher, ProductSink, ProductStore};
use tesco_macros::{CategoryScraper, ErrorKind, PersistingSink, ScrapeError, ScraperConfig};

const CATEGORY_URL: &str = "https://www.tesco.com/groceries/en-GB/shop/fresh-food/all";
const CATEGORY_PATH: &str = "/groceries/en-GB/shop/fresh-food/all";

fn page(props: &Value) -> String {
    let escaped = props.to_string().replace('&', "&amp;").replace('"', "&quot;");
    format!(r#"<html><body><div id="data-attributes" data-props="{escaped}"></div></body></html>"#)
}

fn category_page(ids: &[&str]) -> String {
    let items: Vec<Value> = ids.iter().map(|id| json!({"product": {"id": id}})).collect();
    page(&json!({
        "resources": {
            "productsByCategory": {"data": {"results": {"productItems": items}}}
        }
    }))
}

fn product_page(id: &str) -> String {
    page(&json!({
        "resources": {
            "productDetails": {
                "data": {
                    "pageTitle": format!("Product {id}"),
                    "product": {"id": id, "description": ["Tasty."]}
                }
            }
        }
    }))
}

fn product_path(id: &str) -> String {
    format!("/groceries/en-GB/products/{id}")
}

/// Serves pages by URL path; unknown paths answer 404
#[derive(Default)]
struct FakeSite {
    pages: HashMap<String, String>,
    requests: Mutex<Vec<Url>>,
    delay: Option<Duration>,
    cancel_on_product: Option<CancellationToken>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeSite {
    fn with_category(ids: &[&str]) -> Self {
        let mut site = Self::default();
        site.pages.insert(CATEGORY_PATH.to_string(), category_page(ids));
        for id in ids {
            site.pages.insert(product_path(id), product_page(id));
        }
        site
    }

    fn product_requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|url| url.path().strip_prefix("/groceries/en-GB/products/"))
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl PageFetcher for FakeSite {
    async fn fetch(&self, url: &Url) -> Result<String, ScrapeError> {
        self.requests.lock().unwrap().push(url.clone());
        if let Some(token) = &self.cancel_on_product {
            if url.path().contains("/products/") {
                token.cancel();
            }
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.pages
            .get(url.path())
            .cloned()
            .ok_or_else(|| ScrapeError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
    }
}

#[derive(Default)]
struct FakeStore {
    known: Vec<String>,
    fail_lookup: bool,
    fail_insert: HashSet<String>,
    inserted: Mutex<Vec<String>>,
}

impl FakeStore {
    fn knowing(ids: &[&str]) -> Self {
        Self {
            known: ids.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ProductStore for FakeStore {
    async fn existing_ids(&self, ids: &[String], _source: &str) -> Result<Vec<String>, ScrapeError> {
        if self.fail_lookup {
            return Err(ScrapeError::Store(sqlx::Error::PoolClosed));
        }
        Ok(self.known.iter().filter(|id| ids.contains(id)).cloned().collect())
    }

    async fn insert(&self, id: &ProductId, _source: &str, _raw: &str) -> Result<u64, ScrapeError> {
        if self.fail_insert.contains(id.as_str()) {
            return Err(ScrapeError::Store(sqlx::Error::PoolTimedOut));
        }
        self.inserted.lock().unwrap().push(id.to_string());
        Ok(1)
    }
}

#[derive(Default)]
struct CollectingSink {
    results: Mutex<Vec<ProductResult>>,
}

impl CollectingSink {
    fn ids(&self) -> Vec<String> {
        self.results
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.id.to_string())
            .collect()
    }
}

#[async_trait]
impl ProductSink for CollectingSink {
    async fn accept(&self, result: ProductResult) -> Result<bool, ScrapeError> {
        self.results.lock().unwrap().push(result);
        Ok(true)
    }
}

fn scraper(site: Arc<FakeSite>, store: Arc<dyn ProductStore>) -> CategoryScraper {
    CategoryScraper::new(site, store, Arc::new(ScraperConfig::default()))
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

fn root_kind(err: &anyhow::Error) -> ErrorKind {
    err.downcast_ref::<ScrapeError>()
        .map(ScrapeError::kind)
        .unwrap_or_else(|| panic!("not a scrape error: {err:#}"))
}

const LISTED: [&str; 5] = ["100000001", "100000002", "100000003", "100000004", "100000005"];

#[tokio::test]
async fn fetches_only_unknown_products() {
    let site = Arc::new(FakeSite::with_category(&LISTED));
    let store = Arc::new(FakeStore::knowing(&["100000002", "100000004"]));
    let sink = CollectingSink::default();

    let summary = scraper(site.clone(), store)
        .scrape(CATEGORY_URL, 2, &sink)
        .await
        .unwrap();

    let expected = vec!["100000001", "100000003", "100000005"];
    assert_eq!(sorted(site.product_requests()), expected);
    assert_eq!(sorted(sink.ids()), expected);

    assert_eq!(summary.listed, 5);
    assert_eq!(summary.already_known, 2);
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn category_url_gets_the_page_size() {
    let site = Arc::new(FakeSite::with_category(&[]));
    let sink = CollectingSink::default();

    scraper(site.clone(), Arc::new(FakeStore::default()))
        .scrape(&format!("{CATEGORY_URL}?sort=price&count=24"), 1, &sink)
        .await
        .unwrap();

    let requests = site.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path(), CATEGORY_PATH);
    let query: Vec<(String, String)> = requests[0].query_pairs().into_owned().collect();
    assert_eq!(
        query,
        vec![
            ("count".to_string(), "48".to_string()),
            ("sort".to_string(), "price".to_string()),
        ]
    );
}

#[tokio::test]
async fn results_carry_the_product_payload() {
    let site = Arc::new(FakeSite::with_category(&["254656543"]));
    let sink = CollectingSink::default();

    scraper(site, Arc::new(FakeStore::default()))
        .scrape(CATEGORY_URL, 3, &sink)
        .await
        .unwrap();

    let results = sink.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].url, "https://www.tesco.com/groceries/en-GB/products/254656543");
    let raw: Value = serde_json::from_str(&results[0].raw_json).unwrap();
    assert_eq!(raw["pageTitle"], "Product 254656543");
}

#[tokio::test]
async fn unreachable_category_is_fatal() {
    let site = Arc::new(FakeSite::default());
    let sink = CollectingSink::default();

    let err = scraper(site, Arc::new(FakeStore::default()))
        .scrape(CATEGORY_URL, 2, &sink)
        .await
        .unwrap_err();

    assert_eq!(root_kind(&err), ErrorKind::Transport);
    assert!(format!("{err:#}").contains("failed to resolve category"));
}

#[tokio::test]
async fn upstream_error_on_category_is_fatal() {
    let mut site = FakeSite::default();
    site.pages
        .insert(CATEGORY_PATH.to_string(), page(&json!({"error": "blocked"})));
    let sink = CollectingSink::default();

    let err = scraper(Arc::new(site), Arc::new(FakeStore::default()))
        .scrape(CATEGORY_URL, 2, &sink)
        .await
        .unwrap_err();

    assert_eq!(root_kind(&err), ErrorKind::Upstream);
}

#[tokio::test]
async fn malformed_category_url_is_fatal() {
    let site = Arc::new(FakeSite::default());
    let sink = CollectingSink::default();

    let err = scraper(site.clone(), Arc::new(FakeStore::default()))
        .scrape("not a url", 2, &sink)
        .await
        .unwrap_err();

    assert_eq!(root_kind(&err), ErrorKind::Validation);
    assert!(site.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn zero_concurrency_is_rejected() {
    let site = Arc::new(FakeSite::with_category(&LISTED));
    let sink = CollectingSink::default();

    let err = scraper(site.clone(), Arc::new(FakeStore::default()))
        .scrape(CATEGORY_URL, 0, &sink)
        .await
        .unwrap_err();

    assert_eq!(root_kind(&err), ErrorKind::Validation);
    assert!(site.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn store_lookup_failure_is_fatal_before_any_product_fetch() {
    let site = Arc::new(FakeSite::with_category(&LISTED));
    let store = Arc::new(FakeStore {
        fail_lookup: true,
        ..FakeStore::default()
    });
    let sink = CollectingSink::default();

    let err = scraper(site.clone(), store)
        .scrape(CATEGORY_URL, 2, &sink)
        .await
        .unwrap_err();

    assert_eq!(root_kind(&err), ErrorKind::Store);
    assert!(site.product_requests().is_empty());
    assert!(sink.ids().is_empty());
}

#[tokio::test]
async fn product_failures_do_not_stop_the_scrape() {
    let mut site = FakeSite::with_category(&["100000001", "100000002", "100000003", "12345"]);
    site.pages.remove(&product_path("100000002"));
    site.pages.insert(
        product_path("100000003"),
        page(&json!({"error": "product not found"})),
    );
    let site = Arc::new(site);
    let sink = CollectingSink::default();

    let summary = scraper(site.clone(), Arc::new(FakeStore::default()))
        .scrape(CATEGORY_URL, 2, &sink)
        .await
        .unwrap();

    assert_eq!(sink.ids(), vec!["100000001"]);
    assert_eq!(summary.invalid, 1);
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.failed, 2);
    // out-of-range ids never reach the network
    assert!(!site.product_requests().contains(&"12345".to_string()));
}

#[tokio::test]
async fn repeated_listings_are_fetched_once() {
    let site = Arc::new(FakeSite::with_category(&[
        "100000001", "100000002", "100000001", "100000002", "100000001",
    ]));
    let sink = CollectingSink::default();

    let summary = scraper(site.clone(), Arc::new(FakeStore::default()))
        .scrape(CATEGORY_URL, 3, &sink)
        .await
        .unwrap();

    assert_eq!(sorted(site.product_requests()), vec!["100000001", "100000002"]);
    assert_eq!(sorted(sink.ids()), vec!["100000001", "100000002"]);
    assert_eq!(summary.duplicates, 3);
}

#[tokio::test]
async fn in_flight_requests_never_exceed_concurrency() {
    let ids: Vec<String> = (1..=8).map(|n| format!("20000000{n}")).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let mut site = FakeSite::with_category(&refs);
    site.delay = Some(Duration::from_millis(20));
    let site = Arc::new(site);
    let sink = CollectingSink::default();

    let summary = scraper(site.clone(), Arc::new(FakeStore::default()))
        .scrape(CATEGORY_URL, 2, &sink)
        .await
        .unwrap();

    assert_eq!(summary.fetched, 8);
    assert!(site.peak_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn store_insert_failure_skips_only_that_product() {
    let site = Arc::new(FakeSite::with_category(&["100000001", "100000002", "100000003"]));
    let store = Arc::new(FakeStore {
        fail_insert: HashSet::from(["100000002".to_string()]),
        ..FakeStore::default()
    });
    let sink = PersistingSink::new(store.clone(), "tesco");

    let summary = scraper(site, store.clone())
        .scrape(CATEGORY_URL, 2, &sink)
        .await
        .unwrap();

    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.persisted, 2);
    assert_eq!(
        sorted(store.inserted.lock().unwrap().clone()),
        vec!["100000001", "100000003"]
    );
}

#[tokio::test]
async fn cancelled_scrape_fetches_nothing() {
    let site = Arc::new(FakeSite::with_category(&LISTED));
    let sink = CollectingSink::default();
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let summary = scraper(site.clone(), Arc::new(FakeStore::default()))
        .with_shutdown(shutdown)
        .scrape(CATEGORY_URL, 2, &sink)
        .await
        .unwrap();

    assert!(site.requests.lock().unwrap().is_empty());
    assert!(sink.ids().is_empty());
    assert_eq!(summary.dispatched, 0);
}

#[tokio::test]
async fn cancelling_during_category_fetch_returns_promptly() {
    let mut site = FakeSite::with_category(&LISTED);
    site.delay = Some(Duration::from_secs(30));
    let site = Arc::new(site);
    let sink = CollectingSink::default();
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        scraper(site.clone(), Arc::new(FakeStore::default()))
            .with_shutdown(shutdown)
            .scrape(CATEGORY_URL, 2, &sink),
    )
    .await
    .expect("scrape should stop once cancelled")
    .unwrap();

    assert_eq!(summary.listed, 0);
    assert!(site.product_requests().is_empty());
}

#[tokio::test]
async fn cancelling_mid_scrape_abandons_the_rest() {
    let shutdown = CancellationToken::new();
    let mut site = FakeSite::with_category(&LISTED);
    site.cancel_on_product = Some(shutdown.clone());
    let site = Arc::new(site);
    let sink = CollectingSink::default();

    let summary = scraper(site.clone(), Arc::new(FakeStore::default()))
        .with_shutdown(shutdown)
        .scrape(CATEGORY_URL, 1, &sink)
        .await
        .unwrap();

    assert_eq!(site.product_requests().len(), 1);
    assert_eq!(summary.dispatched, 5);
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.cancelled, 4);
}

#[tokio::test]
async fn second_scrape_into_sqlite_fetches_nothing_new() {
    let database = Arc::new(Database::in_memory().await.unwrap());
    let sink = PersistingSink::new(database.clone(), "tesco");

    let first_site = Arc::new(FakeSite::with_category(&LISTED));
    let first = scraper(first_site.clone(), database.clone())
        .scrape(CATEGORY_URL, 3, &sink)
        .await
        .unwrap();
    assert_eq!(first.persisted, 5);
    assert_eq!(first_site.product_requests().len(), 5);

    let second_site = Arc::new(FakeSite::with_category(&LISTED));
    let second = scraper(second_site.clone(), database.clone())
        .scrape(CATEGORY_URL, 3, &sink)
        .await
        .unwrap();
    assert_eq!(second.already_known, 5);
    assert_eq!(second.dispatched, 0);
    assert!(second_site.product_requests().is_empty());

    assert_eq!(database.stored_products("tesco").await.unwrap().len(), 5);
}
