//! Turns a product payload's free-text nutrition table into numeric macros
//!
//! Product pages publish nutrition as rows of display text, e.g.
//!
//! | name | perComp | perServing |
//! | --- | --- | --- |
//! | Typical Values | Per 100g | Per serving (30g) |
//! | Energy | 1674kJ / 400kcal | 502kJ / 120kcal |
//! | Fat | 12.5g | 3.8g |
//!
//! Cells that do not match their pattern stay at zero, and a missing row
//! leaves that nutrient at zero for both bases. Only a payload that is not
//! JSON, or whose fields have the wrong types, fails normalization.

use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::ScrapeError;
use crate::models::{Macros, Product, ProductResult, Source};

const TYPICAL_VALUES: &str = "Typical Values";
const FAT: &str = "Fat";
const PROTEIN: &str = "Protein";
const CARBOHYDRATE: &str = "Carbohydrate";
const ENERGY: &str = "Energy";

/// Hex SHA-256 of a raw payload, used to detect unchanged re-fetches
pub fn content_hash(raw: &str) -> String {
    format!("{:x}", Sha256::digest(raw.as_bytes()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductPayload {
    page_title: Option<String>,
    product: Option<ProductSection>,
}

#[derive(Debug, Deserialize)]
struct ProductSection {
    title: Option<String>,
    description: Option<Vec<String>>,
    details: Option<ProductDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductDetails {
    nutrition_info: Option<Vec<NutritionRow>>,
}

/// Cells are kept as raw JSON; anything but a string reads as no text
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NutritionRow {
    name: Option<Value>,
    per_comp: Option<Value>,
    per_serving: Option<Value>,
}

fn text(cell: Option<&Value>) -> Option<&str> {
    cell.and_then(Value::as_str)
}

/// Nutrition rows indexed by nutrient name; the last row wins on duplicates
struct NutritionTable<'a> {
    rows: &'a [NutritionRow],
    index: HashMap<&'a str, usize>,
}

impl<'a> NutritionTable<'a> {
    fn new(rows: &'a [NutritionRow]) -> Self {
        let index = rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| Some((text(row.name.as_ref())?, i)))
            .collect();

        Self { rows, index }
    }

    /// (per-100g, per-serving) text for a nutrient
    fn cells(&self, name: &str) -> (Option<&'a str>, Option<&'a str>) {
        let rows = self.rows;
        match self.index.get(name).and_then(|&i| rows.get(i)) {
            Some(row) => (text(row.per_comp.as_ref()), text(row.per_serving.as_ref())),
            None => (None, None),
        }
    }
}

/// Compiled nutrition patterns; build once and share
#[derive(Debug, Clone)]
pub struct Normalizer {
    source: String,
    per_grams: Regex,
    serving_grams: Regex,
    grams: Regex,
    kcal: Regex,
}

impl Normalizer {
    /// `source` names the site stamped onto each product's [`Source`]
    pub fn new(source: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            source: source.into(),
            per_grams: Regex::new(r"^\s*Per (\d+(?:\.\d+)?)\s?g\s*$")?,
            serving_grams: Regex::new(r"\((\d+(?:\.\d+)?)\s?g\)")?,
            grams: Regex::new(r"(\d+(?:\.\d+)?)\s?g")?,
            kcal: Regex::new(r"\d+(?:\.\d+)?\s?kJ\s*/\s*(\d+(?:\.\d+)?)\s?kcal")?,
        })
    }

    pub fn normalize(&self, result: &ProductResult) -> Result<Product, ScrapeError> {
        let payload: ProductPayload = serde_json::from_str(&result.raw_json).map_err(|e| {
            if e.is_data() {
                ScrapeError::Shape(format!("unexpected product payload: {e}"))
            } else {
                ScrapeError::Extraction(format!("invalid json: {e}"))
            }
        })?;

        let product = payload.product;
        let name = payload
            .page_title
            .or_else(|| product.as_ref().and_then(|p| p.title.clone()))
            .unwrap_or_default();
        let (description, rows) = match product {
            Some(section) => (
                section.description.unwrap_or_default(),
                section
                    .details
                    .and_then(|details| details.nutrition_info)
                    .unwrap_or_default(),
            ),
            None => (Vec::new(), Vec::new()),
        };

        let table = NutritionTable::new(&rows);
        let mut per_composition = Macros::default();
        let mut per_serving = Macros::default();

        let (comp, serving) = table.cells(TYPICAL_VALUES);
        per_composition.per = comp.unwrap_or_default().to_string();
        per_serving.per = serving.unwrap_or_default().to_string();
        per_composition.size_grams = capture(&self.per_grams, comp);
        per_serving.size_grams = capture(&self.serving_grams, serving);

        let (comp, serving) = table.cells(FAT);
        per_composition.fat_grams = capture(&self.grams, comp);
        per_serving.fat_grams = capture(&self.grams, serving);

        let (comp, serving) = table.cells(PROTEIN);
        per_composition.protein_grams = capture(&self.grams, comp);
        per_serving.protein_grams = capture(&self.grams, serving);

        let (comp, serving) = table.cells(CARBOHYDRATE);
        per_composition.carbs_grams = capture(&self.grams, comp);
        per_serving.carbs_grams = capture(&self.grams, serving);

        let (comp, serving) = table.cells(ENERGY);
        per_composition.kcal = capture(&self.kcal, comp);
        per_serving.kcal = capture(&self.kcal, serving);

        Ok(Product {
            name,
            source: Source {
                url: result.url.clone(),
                id: result.id.to_string(),
                name: self.source.clone(),
            },
            description,
            raw_json: result.raw_json.clone(),
            content_hash: content_hash(&result.raw_json),
            per_composition,
            per_serving,
        })
    }
}

/// First capture group of `pattern` in `text` as a number, zero otherwise
fn capture(pattern: &Regex, text: Option<&str>) -> f64 {
    text.and_then(|text| pattern.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0)
}
