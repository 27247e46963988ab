//! Extraction-and-bind: turn page text into a short summary with citations by round-tripping
//! through the model's tool-call mechanism.
//!
//! Each chunk is sent as one user turn; the reply must carry a `search_extraction` tool call.
//! A reply that cannot be bound is retried once on a cleared conversation, then the chunk is
//! dropped. The conversation is cleared after every chunk so history never accumulates.

use crate::chat::{Conversation, Tool, ToolRegistry, ToolSpec};
use crate::tokens::{chunk_by_tokens, estimate_tokens, split_oversized};
use crate::trace::{Document, Summary};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::time::Instant;

pub const EXTRACTOR_TOOL: &str = "search_extraction";

/// Attempts per chunk when the tool result cannot be bound.
pub const MAX_BIND_ATTEMPTS: usize = 2;

/// Upper bound on re-summarization passes over an over-budget concatenation.
pub const MAX_CONDENSE_ROUNDS: usize = 3;

/// Smallest chunk limit handed to the chunker, whatever the remaining budget.
const MIN_CHUNK_TOKENS: usize = 32;

pub const EXTRACTOR_SYSTEM_PROMPT: &str = "You extract facts from web pages for a research \
assistant. Report findings only through the search_extraction tool: a short summary plus \
citations quoting the page.";

pub const DEFAULT_INSTRUCTIONS: &str = "Summarize this article and extract the information \
relevant to the user's question.";

/// Appended to the instructions for every page the pool summarizes.
pub const RELEVANCE_CONSTRAINT: &str =
    " If not relevant say 'No results found' and exit.\n\n**YOU MUST USE THE TOOLS PROVIDED**";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    #[serde(alias = "extracted_content")]
    pub content: String,
    #[serde(alias = "source")]
    pub url: String,
    #[serde(default)]
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Extraction {
    pub summary: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl Extraction {
    pub fn join_citations(&self) -> String {
        let mut out = String::new();
        for c in &self.citations {
            let _ = write!(
                out,
                "Content: {}\nURL: {}\nRelevance: {:.2}\n\n",
                c.content, c.url, c.relevance
            );
        }
        out
    }

    pub fn render(&self) -> String {
        format!(
            "Summary: {}\n\nCitations:\n{}",
            self.summary,
            self.join_citations()
        )
    }
}

/// Validates the model's arguments and echoes them back as the call's result.
fn review_extraction(args: &Map<String, Value>) -> Result<Value> {
    let summary = args
        .get("summary")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidArgs("summary not found in arguments".to_string()))?;
    let citations = args
        .get("citations")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidArgs("citations not found in arguments".to_string()))?;
    tracing::debug!(summary_chars = summary.len(), citations = citations.len(), "extraction");
    Ok(serde_json::json!({
        "summary": summary,
        "citations": citations,
    }))
}

pub fn extractor_tool() -> Tool {
    Tool {
        spec: ToolSpec {
            name: EXTRACTOR_TOOL.to_string(),
            description: "Record a concise summary of the page and the passages that support it."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "summary": {
                        "type": "string",
                        "description": "Concise summary of the relevant information on the page."
                    },
                    "citations": {
                        "type": "array",
                        "description": "Passages quoted from the page.",
                        "items": {
                            "type": "object",
                            "properties": {
                                "content": { "type": "string", "description": "Quoted passage." },
                                "url": { "type": "string", "description": "Source URL." },
                                "relevance": { "type": "number", "description": "0 to 1." }
                            },
                            "required": ["content", "url"]
                        }
                    }
                },
                "required": ["summary", "citations"]
            }),
        },
        handler: review_extraction,
    }
}

pub fn extraction_registry() -> ToolRegistry {
    ToolRegistry::new([extractor_tool()])
}

pub fn build_prompt(instructions: &str, content: &str) -> String {
    format!("{instructions}\n\nExtract key information:\n\n{content}")
}

/// Tokens every chunk prompt carries besides the chunk itself.
fn prompt_overhead(conv: &Conversation, instructions: &str) -> usize {
    // +1: the byte fudge can round up once more when prefix and chunk are joined.
    estimate_tokens(conv.system_prompt()) + estimate_tokens(&build_prompt(instructions, "")) + 1
}

fn chunk_limit(conv: &Conversation, instructions: &str, budget: usize) -> usize {
    budget
        .saturating_sub(prompt_overhead(conv, instructions))
        .max(MIN_CHUNK_TOKENS)
}

/// Split `text` into pieces that fit next to the system prompt and instructions within `budget`.
fn fit_chunks(conv: &Conversation, text: &str, instructions: &str, budget: usize) -> Vec<String> {
    let limit = chunk_limit(conv, instructions, budget);
    chunk_by_tokens(text, limit)
        .into_iter()
        .flat_map(|c| split_oversized(&c, limit))
        .collect()
}

/// Extract one chunk that already fits the budget.
///
/// Transport errors are returned immediately. Bind failures are retried on a cleared
/// conversation; after [`MAX_BIND_ATTEMPTS`] the chunk fails with [`Error::Extraction`].
pub async fn summarize_chunk(
    conv: &mut Conversation,
    chunk: &str,
    instructions: &str,
) -> Result<String> {
    let prompt = build_prompt(instructions, chunk);
    let mut last_err = None;
    for attempt in 1..=MAX_BIND_ATTEMPTS {
        tracing::debug!(attempt, prompt_tokens = estimate_tokens(&prompt), "extracting chunk");
        let resp = match conv.send_user(&prompt).await {
            Ok(r) => r,
            Err(e) => {
                conv.clear();
                return Err(e);
            }
        };
        conv.clear();
        match resp.bind_tool_result::<Extraction>(EXTRACTOR_TOOL) {
            Ok(ext) => return Ok(ext.render()),
            Err(e) => {
                tracing::debug!(attempt, error = %e, "extraction not bound");
                last_err = Some(e);
            }
        }
    }
    Err(Error::Extraction(match last_err {
        Some(e) => e.to_string(),
        None => "no attempts made".to_string(),
    }))
}

/// Extract every chunk, re-splitting any that do not fit. Failed chunks are logged and left
/// out; the rest are returned in order.
pub async fn process_chunks(
    conv: &mut Conversation,
    chunks: &[String],
    instructions: &str,
    budget: usize,
) -> Vec<String> {
    let overhead = prompt_overhead(conv, instructions);
    let mut out = Vec::new();
    for chunk in chunks {
        let pieces = if overhead + estimate_tokens(chunk) > budget {
            fit_chunks(conv, chunk, instructions, budget)
        } else {
            vec![chunk.clone()]
        };
        for piece in pieces {
            match summarize_chunk(conv, &piece, instructions).await {
                Ok(s) => out.push(s),
                Err(e) => {
                    tracing::warn!(model = %conv.model_name(), error = %e, "chunk failed");
                }
            }
        }
    }
    out
}

/// Re-summarize `text` until it fits `budget`, at most [`MAX_CONDENSE_ROUNDS`] times.
///
/// Stops early when a round produces nothing or does not shrink the text.
pub async fn condense(
    conv: &mut Conversation,
    text: String,
    instructions: &str,
    budget: usize,
) -> String {
    let overhead = estimate_tokens(conv.system_prompt());
    let mut text = text;
    for round in 1..=MAX_CONDENSE_ROUNDS {
        let size = estimate_tokens(&text);
        if overhead + size <= budget {
            break;
        }
        tracing::debug!(round, size, budget, "summary over budget, condensing");
        let chunks = fit_chunks(conv, &text, instructions, budget);
        let next = process_chunks(conv, &chunks, instructions, budget)
            .await
            .join("\n\n");
        if next.is_empty() || estimate_tokens(&next) >= size {
            tracing::warn!(round, size, "condensing made no progress");
            break;
        }
        text = next;
    }
    text
}

/// Summarize `doc` within `budget` tokens and store the result on it.
///
/// Idempotent: a document that already carries a summary returns it without calling the
/// model. When every chunk fails, nothing is stored and an empty string is returned.
pub async fn summarize_document(
    conv: &mut Conversation,
    doc: &mut Document,
    instructions: &str,
    budget: usize,
) -> String {
    if let Some(s) = doc.summary_text() {
        return s.to_string();
    }
    let task = format!("\n\n{instructions}\n\n{}", doc.format_info());
    let chunks = fit_chunks(conv, &task, instructions, budget);
    if chunks.is_empty() {
        return String::new();
    }

    let started = Instant::now();
    let parts = process_chunks(conv, &chunks, instructions, budget).await;
    if parts.is_empty() {
        tracing::warn!(url = %doc.url, chunks = chunks.len(), "no chunk could be extracted");
        return String::new();
    }
    let joined = parts.join("\n\n");
    let text = condense(conv, joined, instructions, budget).await;
    doc.summary = Some(Summary::new(text.clone(), started.elapsed()));
    tracing::info!(url = %doc.url, duration = %doc.format_duration(), "summarized");
    text
}
