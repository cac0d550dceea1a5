use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::traits::PageFetcher;

/// HTTP page fetcher shared by every worker of a scrape
#[derive(Clone)]
pub struct Scraper {
    client: Client,
}

impl Scraper {
    pub fn new(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for Scraper {
    async fn fetch(&self, url: &Url) -> Result<String, ScrapeError> {
        debug!("GET {}", url);

        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(ScrapeError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}
