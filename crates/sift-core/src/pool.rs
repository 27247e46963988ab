//! Fixed-size pool of summarization workers.
//!
//! One worker per model agent, each with its own [`Conversation`]. Documents travel through a
//! bounded queue and come back tagged with their input position, so the caller sees them in
//! the order it submitted them no matter which worker finished first.

use crate::chat::{ChatModel, Conversation};
use crate::extract::{
    extraction_registry, summarize_document, DEFAULT_INSTRUCTIONS, EXTRACTOR_SYSTEM_PROMPT,
    RELEVANCE_CONSTRAINT,
};
use crate::tokens::context_portion;
use crate::trace::Document;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

/// Share of a summary agent's context window a single page may use.
pub const DEFAULT_CONTEXT_PERCENT: f64 = 75.0;

pub struct SummaryPool {
    agents: Vec<Arc<dyn ChatModel>>,
    system_prompt: String,
    instructions: String,
    context_percent: f64,
}

impl SummaryPool {
    /// Fails with [`Error::NotConfigured`] when no agent is supplied.
    pub fn new(agents: Vec<Arc<dyn ChatModel>>) -> Result<Self> {
        if agents.is_empty() {
            return Err(Error::NotConfigured(
                "summary pool needs at least one model agent".to_string(),
            ));
        }
        Ok(Self {
            agents,
            system_prompt: EXTRACTOR_SYSTEM_PROMPT.to_string(),
            instructions: format!("{DEFAULT_INSTRUCTIONS}{RELEVANCE_CONSTRAINT}"),
            context_percent: DEFAULT_CONTEXT_PERCENT,
        })
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = instructions.to_string();
        self
    }

    pub fn with_context_percent(mut self, percent: f64) -> Self {
        self.context_percent = percent;
        self
    }

    pub fn agent_names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name().to_string()).collect()
    }

    /// Any one agent, used for work outside the fan-out (e.g. digest compression).
    pub fn primary_agent(&self) -> Arc<dyn ChatModel> {
        Arc::clone(&self.agents[0])
    }

    /// Per-document token budget: the configured share of the smallest agent context window.
    pub fn budget(&self) -> usize {
        let window = self
            .agents
            .iter()
            .map(|a| a.context_window())
            .min()
            .unwrap_or(0);
        context_portion(window, self.context_percent)
    }

    pub async fn summarize_all(&self, docs: Vec<Document>) -> Vec<Document> {
        self.summarize_all_within(docs, self.budget()).await
    }

    /// Summarize every document lacking a summary and wait for all of them.
    ///
    /// Output order equals input order. A document whose worker died is logged and dropped.
    pub async fn summarize_all_within(&self, docs: Vec<Document>, budget: usize) -> Vec<Document> {
        let mut slots: Vec<Option<Document>> = Vec::with_capacity(docs.len());
        let mut pending = Vec::new();
        for (i, d) in docs.into_iter().enumerate() {
            if d.summary_text().is_some() {
                slots.push(Some(d));
            } else {
                slots.push(None);
                pending.push((i, d));
            }
        }
        if pending.is_empty() {
            return slots.into_iter().flatten().collect();
        }

        let (job_tx, job_rx) = mpsc::channel::<(usize, Document)>(self.agents.len());
        let job_rx = Arc::new(Mutex::new(job_rx));
        let mut workers = JoinSet::new();
        for (worker, agent) in self.agents.iter().enumerate() {
            let rx = Arc::clone(&job_rx);
            let mut conv = Conversation::new(
                Arc::clone(agent),
                &self.system_prompt,
                extraction_registry(),
            );
            let instructions = self.instructions.clone();
            workers.spawn(async move {
                let mut done = Vec::new();
                loop {
                    let job = rx.lock().await.recv().await;
                    let Some((i, mut doc)) = job else {
                        break;
                    };
                    tracing::info!(
                        worker,
                        model = %conv.model_name(),
                        title = %doc.title,
                        url = %doc.url,
                        "summarizing"
                    );
                    summarize_document(&mut conv, &mut doc, &instructions, budget).await;
                    done.push((i, doc));
                }
                done
            });
        }

        for job in pending {
            if job_tx.send(job).await.is_err() {
                tracing::error!("summary workers exited before the queue drained");
                break;
            }
        }
        drop(job_tx);

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(done) => {
                    for (i, doc) in done {
                        slots[i] = Some(doc);
                    }
                }
                Err(e) => tracing::error!(error = %e, "summary worker failed"),
            }
        }

        let expected = slots.len();
        let out: Vec<Document> = slots.into_iter().flatten().collect();
        if out.len() != expected {
            tracing::warn!(lost = expected - out.len(), "documents lost during summarization");
        }
        out
    }
}
