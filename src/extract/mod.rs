//! Pulls the structured payload a page embeds in its `data-props` attribute
//!
//! Both category and product pages are server-rendered around a single
//! element whose `data-props` attribute holds the page model as an
//! HTML-escaped JSON object:
//!
//! ```html
//! <div id="data-attributes" data-props="{&quot;resources&quot;:{...}}"></div>
//! ```
//!
//! [`extract_resources`] finds that attribute, decodes it and returns the
//! `resources` subtree. Every page goes through here, so its errors are the
//! ones callers see for both page types:
//!
//! - [`ScrapeError::Extraction`] when there is no payload or it is not JSON
//! - [`ScrapeError::Upstream`] when the payload carries a top-level `error`
//! - [`ScrapeError::Shape`] when the payload lacks `resources`

use scraper::{Html, Selector};
use serde_json::Value;

use crate::error::ScrapeError;

const PAYLOAD_SELECTOR: &str = "[data-props]";
const PAYLOAD_ATTRIBUTE: &str = "data-props";

/// Extract the `resources` subtree from a page body
pub fn extract_resources(html: &str) -> Result<Value, ScrapeError> {
    let props = find_payload(html)?;
    resources_from_props(&props)
}

/// Validate a decoded `data-props` value and return its `resources`
fn resources_from_props(props: &str) -> Result<Value, ScrapeError> {
    let mut payload: Value = serde_json::from_str(props)
        .map_err(|e| ScrapeError::Extraction(format!("invalid json: {e}")))?;

    if let Some(error) = payload.get("error") {
        let message = match error {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        };
        return Err(ScrapeError::Upstream(message));
    }

    payload
        .get_mut("resources")
        .map(Value::take)
        .ok_or_else(|| ScrapeError::Shape("payload has no resources".to_string()))
}

/// Find the first `data-props` attribute holding a JSON object
///
/// Attribute values come back with HTML entities already decoded.
fn find_payload(html: &str) -> Result<String, ScrapeError> {
    let selector = Selector::parse(PAYLOAD_SELECTOR)
        .map_err(|e| ScrapeError::Extraction(format!("bad payload selector: {e:?}")))?;
    let document = Html::parse_document(html);

    document
        .select(&selector)
        .filter_map(|el| el.value().attr(PAYLOAD_ATTRIBUTE))
        .find(|props| props.trim_start().starts_with('{'))
        .map(str::to_string)
        .ok_or_else(|| ScrapeError::Extraction("no embedded payload".to_string()))
}
