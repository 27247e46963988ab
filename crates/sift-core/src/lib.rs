//! Backend-agnostic research pipeline.
//!
//! Collaborators (search engines, scrapers, embedding and chat models) are consumed through the
//! traits defined here; concrete HTTP backends live in `sift-local`.

use serde::{Deserialize, Serialize};

pub mod args;
pub mod cache;
pub mod chat;
pub mod compress;
pub mod extract;
pub mod pool;
pub mod rank;
pub mod research;
pub mod tokens;
pub mod trace;

#[cfg(test)]
pub(crate) mod testing;

pub use chat::{ChatMessage, ChatModel, ChatRequest, ChatResponse, Conversation, ToolCall};
pub use trace::{Bundle, Document, PageDigest, Summary, Trace};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("scrape failed: {0}")]
    Scrape(String),
    #[error("embedding failed: {0}")]
    Embed(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("tool result binding failed: {0}")]
    ToolBind(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    /// 1-based result page.
    pub page: u32,
    pub max_results: Option<usize>,
}

impl SearchQuery {
    pub fn page(query: &str, page: u32) -> Self {
        Self {
            query: query.to_string(),
            page: page.max(1),
            max_results: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub provider: String,
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse>;
}

/// Turns a page URL into plain text.
///
/// Implementations must refuse anything that is not `https://` with [`Error::InvalidUrl`].
#[async_trait::async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<String>;
}

/// Turns text into one vector per internally chunked piece.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;
    async fn embed(&self, text: &str) -> Result<Vec<Vec<f32>>>;
}

/// Rejects anything but `https://` URLs, the transport policy scrapers share.
pub fn require_https(url: &str) -> Result<()> {
    if url.starts_with("https://") {
        Ok(())
    } else {
        Err(Error::InvalidUrl(format!("skipping non-https url: {url}")))
    }
}
