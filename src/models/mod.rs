//! Data models for scraped products and their nutrition figures

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;

/// Digits in the smallest identifier the site hands out (100,000,000)
const MIN_ID_DIGITS: usize = 9;

/// A validated product identifier
///
/// Kept as the decimal string the site uses, so identifiers wider than any
/// integer type survive untouched. Construction rejects anything that is not
/// a run of ASCII digits worth at least 100,000,000.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductId(String);

impl ProductId {
    pub fn parse(raw: &str) -> Result<Self, ScrapeError> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ScrapeError::Validation(format!(
                "product ID {raw:?} is not an integer"
            )));
        }

        // Compare by significant digits to avoid overflowing on huge ids
        if raw.trim_start_matches('0').len() < MIN_ID_DIGITS {
            return Err(ScrapeError::Validation(format!(
                "{raw} is an invalid productID"
            )));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ProductId {
    type Error = ScrapeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProductId> for String {
    fn from(id: ProductId) -> Self {
        id.0
    }
}

/// The as-fetched payload of one product page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductResult {
    pub id: ProductId,
    pub url: String,
    /// Compact JSON of the product's `productDetails.data` subtree
    pub raw_json: String,
}

/// A raw product row read back from the store
#[derive(Debug, Clone)]
pub struct StoredProduct {
    pub id: String,
    pub source: String,
    pub raw: String,
    pub fetched_at: DateTime<Utc>,
}

/// Macronutrients for one measurement basis
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Macros {
    /// Basis label as published, e.g. "Per 100g"
    pub per: String,
    pub size_grams: f64,
    pub carbs_grams: f64,
    pub protein_grams: f64,
    pub fat_grams: f64,
    pub kcal: f64,
}

/// Where a product was scraped from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub url: String,
    pub id: String,
    pub name: String,
}

/// A normalized product, derived entirely from one [`ProductResult`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub name: String,
    pub source: Source,
    pub description: Vec<String>,
    #[serde(skip)]
    pub raw_json: String,
    /// Hex SHA-256 of `raw_json`
    pub content_hash: String,
    pub per_composition: Macros,
    pub per_serving: Macros,
}

/// Outcome counters for one category scrape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrapeSummary {
    /// Identifiers in the category listing
    pub listed: usize,
    pub already_known: usize,
    /// Unfetched identifiers rejected by validation
    pub invalid: usize,
    /// Repeats of an identifier already queued in this run
    pub duplicates: usize,
    pub dispatched: usize,
    pub fetched: usize,
    pub failed: usize,
    /// Results the sink reported as newly stored
    pub persisted: usize,
    /// Dispatched identifiers abandoned after shutdown was requested
    pub cancelled: usize,
}
