//! Research trace: Trace → Bundle → PageDigest → Document.
//!
//! Each level exclusively owns the next. Sizes are estimated with [`crate::tokens`] over the
//! text a level would actually render, so summarizing a document shrinks its ancestors.

use crate::tokens::estimate_tokens;
use crate::SearchResult;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;

const DIVIDER: &str = "---";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub content: String,
    pub duration_ms: u64,
}

impl Summary {
    pub fn new(content: String, duration: Duration) -> Self {
        Self {
            content,
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// One retrieved document and what the pipeline derived from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Scraped text; empty until scraping succeeds.
    pub content: String,
    /// One vector per embedded chunk of `content`.
    #[serde(skip)]
    pub embeddings: Vec<Vec<f32>>,
    pub summary: Option<Summary>,
    /// Shorter rendering written by the compressor when the summary alone is over budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condensed: Option<String>,
    /// Mean cosine similarity to the query, in [-1, 1].
    pub score: f64,
}

impl Document {
    pub fn new(title: &str, url: &str, snippet: &str) -> Self {
        Self {
            title: title.to_string(),
            url: url.to_string(),
            snippet: snippet.to_string(),
            ..Self::default()
        }
    }

    pub fn summary_text(&self) -> Option<&str> {
        self.summary
            .as_ref()
            .map(|s| s.content.as_str())
            .filter(|s| !s.is_empty())
    }

    /// Condensed text, else the summary, else raw content.
    pub fn display_text(&self) -> &str {
        self.condensed
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.summary_text())
            .unwrap_or(&self.content)
    }

    pub fn total_tokens(&self) -> usize {
        estimate_tokens(self.display_text())
    }

    /// Page info block handed to the extractor.
    pub fn format_info(&self) -> String {
        format!(
            "Title: {}\nURL: {}\nContent: {}\n\n**End of {}**\n\n",
            self.title, self.url, self.content, self.title
        )
    }

    pub fn format_duration(&self) -> String {
        format_duration_ms(self.summary.as_ref().map(|s| s.duration_ms).unwrap_or(0))
    }

    pub fn render(&self) -> String {
        format!(
            "\n{DIVIDER}\n### Title:\n{}\n#### URL:\n{}\n#### Content:\n{}\n{DIVIDER}\n",
            self.title,
            self.url,
            self.display_text()
        )
    }

    /// Title and URL only, for pages whose body is replaced by a rollup.
    pub fn render_reference(&self) -> String {
        format!("- [{}]({})\n", self.title, self.url)
    }
}

impl From<SearchResult> for Document {
    fn from(r: SearchResult) -> Self {
        Self {
            title: r.title.unwrap_or_default().trim().to_string(),
            url: r.url,
            snippet: r.snippet.unwrap_or_default().trim().to_string(),
            ..Self::default()
        }
    }
}

/// One page of one query: ranked documents plus derived state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageDigest {
    pub page: u32,
    results: Vec<Document>,
    pub summary: Option<Summary>,
    average_relevancy: f64,
}

impl PageDigest {
    pub fn new(page: u32, results: Vec<Document>) -> Self {
        let mut digest = Self {
            page,
            results: Vec::new(),
            summary: None,
            average_relevancy: 0.0,
        };
        digest.set_results(results);
        digest
    }

    pub fn results(&self) -> &[Document] {
        &self.results
    }

    /// Mutable access to individual documents; the sequence itself can only be replaced through
    /// [`PageDigest::set_results`], which keeps the average current.
    pub fn results_mut(&mut self) -> &mut [Document] {
        &mut self.results
    }

    pub fn set_results(&mut self, results: Vec<Document>) {
        self.results = results;
        self.compute_average_relevancy();
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Mean document score; an empty page averages 0.
    pub fn average_relevancy(&self) -> f64 {
        self.average_relevancy
    }

    fn compute_average_relevancy(&mut self) {
        self.average_relevancy = if self.results.is_empty() {
            0.0
        } else {
            self.results.iter().map(|r| r.score).sum::<f64>() / self.results.len() as f64
        };
    }

    pub fn rollup_text(&self) -> Option<&str> {
        self.summary
            .as_ref()
            .map(|s| s.content.as_str())
            .filter(|s| !s.is_empty())
    }

    /// A rollup replaces the document bodies, so only its size counts.
    pub fn total_tokens(&self) -> usize {
        match self.rollup_text() {
            Some(r) => estimate_tokens(r),
            None => self.results.iter().map(Document::total_tokens).sum(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!("\n{DIVIDER}\n ## Page: {}\n", self.page);
        match self.rollup_text() {
            Some(rollup) => {
                let _ = writeln!(out, "#### Page summary:\n{rollup}\n#### Sources:");
                for r in &self.results {
                    out.push_str(&r.render_reference());
                }
            }
            None => {
                for r in &self.results {
                    out.push_str(&r.render());
                }
            }
        }
        out.push_str(DIVIDER);
        out
    }
}

/// Every page searched for one literal query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bundle {
    pub query: String,
    pub pages: Vec<PageDigest>,
}

impl Bundle {
    pub fn new(query: &str, pages: Vec<PageDigest>) -> Self {
        Self {
            query: query.to_string(),
            pages,
        }
    }

    pub fn average_relevancy(&self) -> f64 {
        if self.pages.is_empty() {
            return 0.0;
        }
        self.pages.iter().map(PageDigest::average_relevancy).sum::<f64>() / self.pages.len() as f64
    }

    /// Page indices ordered by descending average relevancy; storage order is untouched.
    pub fn ranked_page_indices(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.pages.len()).collect();
        idx.sort_by(|&a, &b| {
            self.pages[b]
                .average_relevancy()
                .total_cmp(&self.pages[a].average_relevancy())
        });
        idx
    }

    pub fn result_count(&self) -> usize {
        self.pages.iter().map(|p| p.results().len()).sum()
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.pages.iter().flat_map(|p| p.results().iter())
    }

    pub fn total_tokens(&self) -> usize {
        self.pages.iter().map(PageDigest::total_tokens).sum()
    }

    pub fn render(&self) -> String {
        let mut out = format!("\n{DIVIDER}\n# **Search Results For: {}**\n", self.query);
        if self.result_count() == 0 {
            out.push_str("\nNo results found.\n");
        }
        for page in &self.pages {
            out.push_str(&page.render());
        }
        out
    }
}

/// One research session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    pub user_prompt: String,
    pub reason: String,
    pub bundles: Vec<Bundle>,
    pub duration_ms: u64,
    pub summary_agents: Vec<String>,
    pub embedding_agent: Option<String>,
}

impl Trace {
    pub fn new(prompt: &str, reason: &str) -> Self {
        Self {
            user_prompt: prompt.to_string(),
            reason: reason.to_string(),
            ..Self::default()
        }
    }

    pub fn attach_bundle(&mut self, bundle: Bundle) -> &mut Self {
        self.bundles.push(bundle);
        self
    }

    /// 1-based bundle lookup.
    pub fn bundle(&self, n: usize) -> Option<&Bundle> {
        n.checked_sub(1).and_then(|i| self.bundles.get(i))
    }

    /// 1-based page digest lookup within a 1-based bundle.
    pub fn page_digest(&self, bundle: usize, digest: usize) -> Option<&PageDigest> {
        self.bundle(bundle)
            .and_then(|b| digest.checked_sub(1).and_then(|i| b.pages.get(i)))
    }

    pub fn page_results(&self, bundle: usize, digest: usize) -> &[Document] {
        self.page_digest(bundle, digest)
            .map(PageDigest::results)
            .unwrap_or(&[])
    }

    pub fn page_summary(&self, bundle: usize, digest: usize) -> Option<&str> {
        self.page_digest(bundle, digest)
            .and_then(PageDigest::rollup_text)
    }

    pub fn set_duration(&mut self, d: Duration) {
        self.duration_ms = d.as_millis() as u64;
    }

    pub fn format_duration(&self) -> String {
        format_duration_ms(self.duration_ms)
    }

    pub fn result_count(&self) -> usize {
        self.bundles.iter().map(Bundle::result_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.result_count() == 0
    }

    pub fn total_tokens(&self) -> usize {
        self.bundles.iter().map(Bundle::total_tokens).sum()
    }

    /// Markdown digest suitable for injection into a conversation.
    pub fn render(&self) -> String {
        let mut out = format!(
            "# **UserPrompt: {}**\n ## Reason: {}\n",
            self.user_prompt, self.reason
        );
        for b in &self.bundles {
            out.push_str(&b.render());
        }
        out
    }
}

fn format_duration_ms(ms: u64) -> String {
    if ms == 0 {
        return "0ms".to_string();
    }
    let d = Duration::from_millis(ms);
    if d.as_secs() == 0 {
        format!("{ms}ms")
    } else {
        format!("{:.3}s", d.as_secs_f64())
    }
}
