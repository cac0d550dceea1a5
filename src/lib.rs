//! Scrapes grocery category and product pages into raw payloads and
//! normalized nutrition figures.

pub mod category;
pub mod config;
pub mod database;
pub mod error;
pub mod extract;
pub mod models;
pub mod nutrition;
pub mod pipeline;
pub mod product;
pub mod scraper;
pub mod traits;

pub use config::ScraperConfig;
pub use error::{ErrorKind, ScrapeError};
pub use pipeline::{CategoryScraper, PersistingSink};
