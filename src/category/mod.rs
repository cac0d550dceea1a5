//! Category pages: listing URL normalization and product identifier resolution

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::error::ScrapeError;
use crate::extract::extract_resources;
use crate::traits::PageFetcher;

/// Query parameter holding the listing page size
pub const PAGE_SIZE_PARAM: &str = "count";

/// Return `raw` with its page-size parameter forced to `page_size`
///
/// Any existing value is overwritten and every other parameter survives.
/// Parameters are re-emitted sorted by key, so applying this twice gives
/// the same URL as applying it once.
pub fn force_page_size(raw: &str, page_size: u32) -> Result<Url, ScrapeError> {
    let mut url = Url::parse(raw)
        .map_err(|e| ScrapeError::Validation(format!("{raw} was not a valid URL: {e}")))?;

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != PAGE_SIZE_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.push((PAGE_SIZE_PARAM.to_string(), page_size.to_string()));
    // stable, so repeated keys keep their relative order
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    url.query_pairs_mut().clear().extend_pairs(pairs);

    Ok(url)
}

/// Fetch a category page and return its `productsByCategory.data` payload
pub async fn fetch_category(fetcher: &dyn PageFetcher, url: &Url) -> Result<Value, ScrapeError> {
    info!("Fetching category {}", url);

    let html = fetcher.fetch(url).await?;
    let mut resources = extract_resources(&html)?;

    resources
        .pointer_mut("/productsByCategory/data")
        .map(Value::take)
        .ok_or_else(|| {
            ScrapeError::Shape("unable to access products data in resources".to_string())
        })
}

#[derive(Debug, Deserialize)]
struct CategoryData {
    results: Option<CategoryResults>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoryResults {
    product_items: Option<Vec<ProductItem>>,
}

#[derive(Debug, Deserialize)]
struct ProductItem {
    product: Option<ListedProduct>,
}

#[derive(Debug, Deserialize)]
struct ListedProduct {
    id: Option<ListedId>,
}

/// Identifiers arrive as strings on most pages but as numbers on some
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListedId {
    Text(String),
    Number(serde_json::Number),
}

impl ListedId {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(number) => number.to_string(),
        }
    }
}

/// Product identifiers listed by a category payload, in listing order
///
/// No deduplication or range validation happens here. Listed items without
/// an identifier are skipped.
///
/// # Errors
/// [`ScrapeError::Shape`] when `results.productItems` is absent or malformed.
pub fn to_product_ids(category: &Value) -> Result<Vec<String>, ScrapeError> {
    let data = CategoryData::deserialize(category)
        .map_err(|e| ScrapeError::Shape(format!("unexpected category payload: {e}")))?;

    let items = data
        .results
        .and_then(|results| results.product_items)
        .ok_or_else(|| {
            ScrapeError::Shape("unable to extract product ids from category".to_string())
        })?;

    let total = items.len();
    let ids: Vec<String> = items
        .into_iter()
        .filter_map(|item| item.product?.id)
        .map(ListedId::into_string)
        .collect();

    if ids.len() != total {
        debug!("{} listed items carried no product id", total - ids.len());
    }

    Ok(ids)
}
