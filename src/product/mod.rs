//! Product pages: URL shape and fetching a single product's payload

use tracing::debug;
use url::Url;

use crate::error::ScrapeError;
use crate::extract::extract_resources;
use crate::models::{ProductId, ProductResult};
use crate::traits::PageFetcher;

const PRODUCTS_SEGMENT: &str = "products";

/// `{base_url}/products/{id}`
pub fn product_url(base_url: &str, id: &ProductId) -> Result<Url, ScrapeError> {
    let url = format!(
        "{}/{PRODUCTS_SEGMENT}/{}",
        base_url.trim_end_matches('/'),
        id
    );
    Ok(Url::parse(&url)?)
}

/// Recover the identifier from a product page URL
///
/// Accepts `.../products/<digits>` with or without a trailing slash. The
/// identifier is not range checked.
pub fn product_id_from_url(raw: &str) -> Result<String, ScrapeError> {
    let url = Url::parse(raw)?;
    let no_id = || ScrapeError::Validation(format!("could not extract id from url: {raw}"));

    let mut segments = url.path_segments().ok_or_else(no_id)?;
    segments.find(|segment| *segment == PRODUCTS_SEGMENT);

    segments
        .next()
        .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
        .ok_or_else(no_id)
}

/// Fetch one product page and return its raw `productDetails.data` payload
pub async fn fetch_product(
    fetcher: &dyn PageFetcher,
    base_url: &str,
    id: &ProductId,
) -> Result<ProductResult, ScrapeError> {
    let url = product_url(base_url, id)?;
    debug!("Fetching product {}", id);

    let html = fetcher.fetch(&url).await?;
    let resources = extract_resources(&html)?;

    let data = resources
        .pointer("/productDetails/data")
        .filter(|data| !data.is_null())
        .ok_or_else(|| ScrapeError::Shape("unable to extract productDetails.data".to_string()))?;

    Ok(ProductResult {
        id: id.clone(),
        url: url.to_string(),
        raw_json: data.to_string(),
    })
}
