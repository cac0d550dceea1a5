//! Error taxonomy shared by every stage of the scrape

use thiserror::Error;

/// Errors raised while fetching, extracting or persisting catalog data
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The page carried no embedded payload, or the payload was not JSON
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// The site answered, but reported an error for this request
    #[error("error returned from source: {0}")]
    Upstream(String),

    /// The payload parsed, but an expected field is missing
    #[error("unexpected payload shape: {0}")]
    Shape(String),

    /// An identifier or URL was rejected before any request was made
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request to {url} failed with status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Coarse classification of a [`ScrapeError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Extraction,
    Upstream,
    Shape,
    Validation,
    Transport,
    Store,
}

impl ScrapeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Extraction(_) => ErrorKind::Extraction,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Shape(_) => ErrorKind::Shape,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Transport(_) | Self::HttpStatus { .. } => ErrorKind::Transport,
            Self::Store(_) => ErrorKind::Store,
        }
    }
}

impl From<url::ParseError> for ScrapeError {
    fn from(err: url::ParseError) -> Self {
        Self::Validation(format!("invalid URL: {err}"))
    }
}
