//! In-memory collaborators for unit tests.

use crate::chat::{ChatModel, ChatRequest, ChatResponse, Role, ToolCall};
use crate::extract::EXTRACTOR_TOOL;
use crate::trace::Document;
use crate::{
    require_https, Embedder, Error, Result, Scraper, SearchProvider, SearchQuery,
    SearchResponse, SearchResult,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn doc_with_embedding(title: &str, v: Vec<f32>) -> Document {
    Document {
        content: format!("content of {title}"),
        embeddings: vec![v],
        ..Document::new(title, &format!("https://example.com/{title}"), "")
    }
}

/// Returns `default` for any text not listed in `table`.
pub struct FakeEmbedder {
    default: Vec<f32>,
    table: HashMap<String, Vec<f32>>,
    fail_all: bool,
    fail_texts: HashSet<String>,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(default: Vec<f32>) -> Self {
        Self {
            default,
            table: HashMap::new(),
            fail_all: false,
            fail_texts: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::new(vec![1.0])
        }
    }

    pub fn with(mut self, text: &str, v: Vec<f32>) -> Self {
        self.table.insert(text.to_string(), v);
        self
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.fail_texts.insert(text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Embedder for FakeEmbedder {
    fn name(&self) -> &str {
        "fake-embedder"
    }

    async fn embed(&self, text: &str) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all || self.fail_texts.contains(text) {
            return Err(Error::Embed("embedding service unavailable".to_string()));
        }
        Ok(vec![self
            .table
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.default.clone())])
    }
}

/// Replays canned responses in order, then answers with plain text forever.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ChatResponse>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<ChatResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn context_window(&self) -> usize {
        4096
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.requests.lock().unwrap().push(req.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(ChatResponse {
                    content: "No results found".to_string(),
                    ..ChatResponse::default()
                })
            })
    }
}

/// Answers every prompt with an extractor tool call whose summary is `summary`.
///
/// Prompts containing any of `refuse_markers` get a free-text refusal instead, which the
/// extractor cannot bind.
pub struct ExtractingModel {
    name: String,
    summary: String,
    context_window: usize,
    refuse_markers: Vec<String>,
    answers: Vec<(String, String)>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    max_messages: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ExtractingModel {
    pub fn new(summary: &str) -> Self {
        Self {
            name: "extractor".to_string(),
            summary: summary.to_string(),
            context_window: 4096,
            refuse_markers: Vec::new(),
            answers: Vec::new(),
            delay: None,
            calls: AtomicUsize::new(0),
            max_messages: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts containing `marker` get `summary` instead of the default one.
    pub fn answering(mut self, marker: &str, summary: &str) -> Self {
        self.answers.push((marker.to_string(), summary.to_string()));
        self
    }

    /// Every user prompt received, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_context_window(mut self, n: usize) -> Self {
        self.context_window = n;
        self
    }

    pub fn refusing(mut self, marker: &str) -> Self {
        self.refuse_markers.push(marker.to_string());
        self
    }

    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Longest message history seen in a single request.
    pub fn max_messages(&self) -> usize {
        self.max_messages.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChatModel for ExtractingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.max_messages
            .fetch_max(req.messages.len(), Ordering::SeqCst);
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        let prompt = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.refuse_markers.iter().any(|m| prompt.contains(m)) {
            return Ok(ChatResponse {
                content: "No results found".to_string(),
                ..ChatResponse::default()
            });
        }
        let summary = self
            .answers
            .iter()
            .find(|(marker, _)| prompt.contains(marker.as_str()))
            .map(|(_, s)| s.as_str())
            .unwrap_or(self.summary.as_str());
        let args = serde_json::json!({
            "summary": summary,
            "citations": [{
                "content": "quoted",
                "url": "https://example.com/cited",
                "relevance": 0.9,
            }],
        });
        Ok(ChatResponse {
            content: String::new(),
            thinking: None,
            tool_calls: vec![ToolCall {
                name: EXTRACTOR_TOOL.to_string(),
                arguments: args.as_object().cloned().unwrap_or_default(),
                result: None,
            }],
        })
    }
}

#[derive(Default)]
pub struct FakeSearch {
    pages: HashMap<u32, Vec<SearchResult>>,
    failing_pages: HashSet<u32>,
    calls: AtomicUsize,
}

impl FakeSearch {
    pub fn page(mut self, page: u32, results: Vec<(&str, &str)>) -> Self {
        self.pages.insert(
            page,
            results
                .into_iter()
                .map(|(title, url)| SearchResult {
                    url: url.to_string(),
                    title: Some(title.to_string()),
                    snippet: Some(format!("snippet for {title}")),
                    source: "fake".to_string(),
                })
                .collect(),
        );
        self
    }

    pub fn failing_page(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SearchProvider for FakeSearch {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_pages.contains(&q.page) {
            return Err(Error::Search(format!("page {} unavailable", q.page)));
        }
        Ok(SearchResponse {
            results: self.pages.get(&q.page).cloned().unwrap_or_default(),
            provider: "fake".to_string(),
        })
    }
}

/// Serves `pages[url]`, enforcing https like a real scraper.
#[derive(Default)]
pub struct FakeScraper {
    pages: HashMap<String, String>,
    calls: AtomicUsize,
}

impl FakeScraper {
    pub fn page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Scraper for FakeScraper {
    async fn scrape(&self, url: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        require_https(url)?;
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Scrape(format!("no content found for url: {url}")))
    }
}
