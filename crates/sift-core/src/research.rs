//! Query orchestration: cache → search → scrape → rank → summarize → attach.
//!
//! Everything here is sequential except the summarization fan-out inside [`SummaryPool`].
//! The [`ResultCache`] is owned by the [`Researcher`], so overlapping sessions against one
//! researcher are serialized by `&mut self`.

use crate::args::ResearchRequest;
use crate::cache::ResultCache;
use crate::compress::Compressor;
use crate::extract::{DEFAULT_INSTRUCTIONS, RELEVANCE_CONSTRAINT};
use crate::pool::SummaryPool;
use crate::rank::rank_by_relevance;
use crate::tokens::context_portion;
use crate::trace::{Bundle, Document, PageDigest, Trace};
use crate::{Embedder, Error, Result, Scraper, SearchProvider, SearchQuery};
use std::sync::Arc;
use std::time::Instant;

/// Minimum similarity, in percent, a document needs to be kept.
pub const DEFAULT_RELEVANCE_PERCENT: f64 = 50.0;

/// How a query ended when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Served from the cache without searching.
    Cached,
    /// Documents that cleared the relevance threshold, across all pages.
    Found(usize),
    /// Nothing relevant enough, whether just searched or remembered from an earlier search.
    NoResults,
}

pub struct Researcher {
    search: Arc<dyn SearchProvider>,
    scraper: Arc<dyn Scraper>,
    embedder: Arc<dyn Embedder>,
    pool: SummaryPool,
    cache: ResultCache,
    relevance_percent: f64,
    instructions: String,
}

impl Researcher {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        scraper: Arc<dyn Scraper>,
        embedder: Arc<dyn Embedder>,
        pool: SummaryPool,
    ) -> Self {
        Self {
            search,
            scraper,
            embedder,
            pool,
            cache: ResultCache::new(),
            relevance_percent: DEFAULT_RELEVANCE_PERCENT,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }

    /// Extraction instructions for both page summaries and digest compression. Page summaries
    /// also get the relevance constraint appended.
    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.pool = self
            .pool
            .with_instructions(&format!("{instructions}{RELEVANCE_CONSTRAINT}"));
        self.instructions = instructions.to_string();
        self
    }

    pub fn with_relevance_percent(mut self, percent: f64) -> Self {
        self.relevance_percent = percent;
        self
    }

    /// Run every query of `req` into a fresh trace. Per-query failures are logged, not fatal.
    pub async fn research(&mut self, req: &ResearchRequest) -> Trace {
        let started = Instant::now();
        let mut trace = Trace::new(&req.prompt, &req.reason);
        trace.summary_agents = self.pool.agent_names();
        trace.embedding_agent = Some(self.embedder.name().to_string());
        tracing::info!(queries = req.queries.len(), pages = req.pages, "research started");

        for query in &req.queries {
            match self.run_query(&mut trace, query, req.pages).await {
                Ok(QueryOutcome::NoResults) => {
                    tracing::info!(query = %query, "no results found");
                }
                Ok(outcome) => tracing::info!(query = %query, ?outcome, "query done"),
                Err(e) => tracing::warn!(query = %query, error = %e, "query failed"),
            }
        }
        trace.set_duration(started.elapsed());
        trace
    }

    /// Search pages `1..=pages` for `query` and attach the resulting bundle to `trace`.
    ///
    /// A cached query attaches its stored bundle unchanged. A failing page is skipped; only
    /// when every page fails is the last error returned, and nothing is cached.
    pub async fn run_query(
        &mut self,
        trace: &mut Trace,
        query: &str,
        pages: u32,
    ) -> Result<QueryOutcome> {
        if let Some(bundle) = self.cache.get(query) {
            tracing::info!(query, results = bundle.result_count(), "using cached results");
            let empty = bundle.result_count() == 0;
            trace.attach_bundle(bundle.clone());
            return Ok(if empty {
                QueryOutcome::NoResults
            } else {
                QueryOutcome::Cached
            });
        }

        let mut digests = Vec::new();
        let mut last_err = None;
        for page in 1..=pages.max(1) {
            match self.handle_page(query, page).await {
                Ok(d) => digests.push(d),
                Err(e) => {
                    tracing::warn!(query, page, error = %e, "page skipped");
                    last_err = Some(e);
                }
            }
        }
        if digests.is_empty() {
            if let Some(e) = last_err {
                return Err(e);
            }
        }

        let bundle = Bundle::new(query, digests);
        let found = bundle.result_count();
        self.cache.insert(&bundle);
        tracing::debug!(query, cached_queries = self.cache.len(), "bundle cached");
        trace.attach_bundle(bundle);
        Ok(if found == 0 {
            QueryOutcome::NoResults
        } else {
            QueryOutcome::Found(found)
        })
    }

    async fn handle_page(&self, query: &str, page: u32) -> Result<PageDigest> {
        let resp = self.search.search(&SearchQuery::page(query, page)).await?;
        tracing::info!(
            query,
            page,
            provider = %resp.provider,
            results = resp.results.len(),
            "search results"
        );
        let docs = self
            .scrape_and_embed(resp.results.into_iter().map(Document::from))
            .await;

        let ranked =
            rank_by_relevance(self.embedder.as_ref(), docs, query, self.relevance_percent).await?;
        if ranked.is_empty() {
            return Ok(PageDigest::new(page, Vec::new()));
        }
        tracing::info!(query, page, ranked = ranked.len(), "ranked results");
        let summarized = self.pool.summarize_all(ranked).await;
        Ok(PageDigest::new(page, summarized))
    }

    /// Best effort: a document whose scrape or embedding fails is dropped.
    async fn scrape_and_embed(&self, docs: impl Iterator<Item = Document>) -> Vec<Document> {
        let mut out = Vec::new();
        for mut doc in docs {
            let text = match self.scraper.scrape(&doc.url).await {
                Ok(t) if !t.trim().is_empty() => t,
                Ok(_) => {
                    tracing::warn!(url = %doc.url, "no content found");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(url = %doc.url, error = %e, "scrape failed");
                    continue;
                }
            };
            doc.content = text.trim().to_string();
            match self.embedder.embed(&doc.content).await {
                Ok(v) => doc.embeddings = v,
                Err(e) => {
                    tracing::warn!(url = %doc.url, error = %e, "embedding failed");
                    continue;
                }
            }
            out.push(doc);
        }
        out
    }

    /// Token budget for a digest: `percent` of the primary summary agent's context window.
    pub fn digest_budget(&self, percent: f64) -> usize {
        context_portion(self.pool.primary_agent().context_window(), percent)
    }

    /// Compress `trace` to `budget` tokens and render it.
    pub async fn digest(&self, trace: &mut Trace, budget: usize) -> String {
        Compressor::new(self.pool.primary_agent())
            .with_instructions(&self.instructions)
            .digest(trace, budget)
            .await
    }
}

/// Fails unless at least one query is present.
pub fn validate(req: &ResearchRequest) -> Result<()> {
    if req.queries.iter().all(|q| q.trim().is_empty()) {
        return Err(Error::InvalidArgs("at least one query is required".to_string()));
    }
    Ok(())
}
