//! Fit a trace into a token budget by summarizing its least relevant documents first.
//!
//! The walk is top-down: each level splits its budget evenly across its children, visits them
//! from the least relevant end, and shrinks any child larger than its share until the level as
//! a whole fits. Leaves shrink by summarization, or by condensing a summary that is still too
//! large; a page that cannot fit through its leaves is replaced by a rollup. This is a
//! heuristic, so the result may overshoot by about one leaf.

use crate::chat::{ChatModel, Conversation};
use crate::extract::{
    condense, extraction_registry, summarize_document, DEFAULT_INSTRUCTIONS,
    EXTRACTOR_SYSTEM_PROMPT,
};
use crate::tokens::estimate_tokens;
use crate::trace::{Bundle, Document, PageDigest, Summary, Trace};
use std::sync::Arc;
use std::time::Instant;

/// Floor for a single document's summarization budget.
pub const MIN_LEAF_BUDGET: usize = 128;

pub struct Compressor {
    conv: Conversation,
    instructions: String,
}

/// Indices of `scores` in ascending order; equal scores keep storage order.
fn ascending(scores: impl Iterator<Item = f64>) -> Vec<usize> {
    let scores: Vec<f64> = scores.collect();
    let mut idx: Vec<usize> = (0..scores.len()).collect();
    idx.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    idx
}

fn share_of(budget: usize, children: usize) -> usize {
    if children == 0 {
        budget
    } else {
        (budget / children).max(1)
    }
}

impl Compressor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            conv: Conversation::new(model, EXTRACTOR_SYSTEM_PROMPT, extraction_registry()),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = instructions.to_string();
        self
    }

    /// Shrink `trace` in place, then render it.
    pub async fn digest(&mut self, trace: &mut Trace, budget: usize) -> String {
        self.fit(trace, budget).await;
        trace.render()
    }

    pub async fn fit(&mut self, trace: &mut Trace, budget: usize) {
        let before = trace.total_tokens();
        if before <= budget {
            return;
        }
        let share = share_of(budget, trace.bundles.len());
        for i in ascending(trace.bundles.iter().map(Bundle::average_relevancy)) {
            if trace.total_tokens() <= budget {
                break;
            }
            if trace.bundles[i].total_tokens() > share {
                self.fit_bundle(&mut trace.bundles[i], share).await;
            }
        }
        tracing::info!(before, after = trace.total_tokens(), budget, "trace compressed");
    }

    async fn fit_bundle(&mut self, bundle: &mut Bundle, budget: usize) {
        let share = share_of(budget, bundle.pages.len());
        let order: Vec<usize> = bundle.ranked_page_indices().into_iter().rev().collect();
        for i in order {
            if bundle.total_tokens() <= budget {
                break;
            }
            if bundle.pages[i].total_tokens() > share {
                self.fit_page(&mut bundle.pages[i], share).await;
            }
        }
    }

    /// Shrink leaves from the least relevant end; if the page is still over, roll it up.
    async fn fit_page(&mut self, page: &mut PageDigest, budget: usize) {
        let share = share_of(budget, page.results().len());
        let leaf_budget = share.max(MIN_LEAF_BUDGET);
        for i in ascending(page.results().iter().map(|d| d.score)) {
            if page.total_tokens() <= budget {
                break;
            }
            let doc = &mut page.results_mut()[i];
            if doc.total_tokens() > share {
                tracing::debug!(url = %doc.url, size = doc.total_tokens(), share, "shrinking");
                self.shrink_leaf(doc, share, leaf_budget).await;
            }
        }
        if page.total_tokens() > budget && page.results().len() > 1 && page.summary.is_none() {
            self.roll_up(page, budget.max(MIN_LEAF_BUDGET)).await;
        }
    }

    /// Summarize a raw leaf; condense a summarized one that is still larger than `share`.
    async fn shrink_leaf(&mut self, doc: &mut Document, share: usize, leaf_budget: usize) {
        if doc.summary_text().is_none() {
            summarize_document(&mut self.conv, doc, &self.instructions, leaf_budget).await;
            if doc.summary_text().is_none() {
                return;
            }
        }
        let size = doc.total_tokens();
        if size <= share {
            return;
        }
        let text = doc.display_text().to_string();
        let shorter = condense(&mut self.conv, text, &self.instructions, leaf_budget).await;
        if !shorter.is_empty() && estimate_tokens(&shorter) < size {
            doc.condensed = Some(shorter);
        }
    }

    async fn roll_up(&mut self, page: &mut PageDigest, budget: usize) {
        let before = page.total_tokens();
        let combined = page
            .results()
            .iter()
            .map(|d| d.display_text())
            .collect::<Vec<_>>()
            .join("\n\n");
        let started = Instant::now();
        let rollup = condense(&mut self.conv, combined, &self.instructions, budget).await;
        if !rollup.is_empty() && estimate_tokens(&rollup) < before {
            tracing::debug!(
                page = page.page,
                before,
                after = estimate_tokens(&rollup),
                "page rolled up"
            );
            page.summary = Some(Summary::new(rollup, started.elapsed()));
        }
    }
}
